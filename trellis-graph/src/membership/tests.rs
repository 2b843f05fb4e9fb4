// SPDX-License-Identifier: MIT OR Apache-2.0

use std::time::Duration;

use assert_matches::assert_matches;
use mock_instant::thread_local::MockClock;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use trellis_auth::{AuthorizationService, OWNERSHIP_TRANSFER, RateLimitPolicy, RateLimiter};
use trellis_core::{Permission, Principal, Role, Timestamp, UserId, WorkspaceId, WorkspaceMember};
use trellis_store::{MemberStore, SqliteStore, Transaction};

use crate::error::{MembershipError, ValidationError};
use crate::events::Topic;
use crate::membership::MembershipService;
use crate::test_utils::{RecordingPublisher, TestDirectory, setup_logging};

type Service = MembershipService<TestDirectory, TestDirectory, RecordingPublisher>;

struct Setup {
    directory: TestDirectory,
    store: SqliteStore,
    publisher: RecordingPublisher,
    service: Service,
    owner: UserId,
    workspace_id: WorkspaceId,
}

async fn setup() -> Setup {
    setup_with_limiter(RateLimiter::new(ChaCha20Rng::from_seed([1; 32]))).await
}

async fn setup_with_limiter(limiter: RateLimiter) -> Setup {
    setup_logging();
    MockClock::set_system_time(Duration::from_secs(1_000));

    let directory = TestDirectory::new();
    let store = SqliteStore::temporary().await;
    let publisher = RecordingPublisher::default();
    let auth = AuthorizationService::new(directory.clone(), store.clone());
    let service = MembershipService::new(
        auth,
        directory.clone(),
        store.clone(),
        publisher.clone(),
        limiter,
    );

    let owner = UserId::random();
    let workspace_id = directory.create_workspace(owner);

    Setup {
        directory,
        store,
        publisher,
        service,
        owner,
        workspace_id,
    }
}

async fn add_member(store: &SqliteStore, workspace_id: WorkspaceId, user_id: UserId, role: Role) {
    let permit = store.begin().await.unwrap();
    store
        .upsert_member(&WorkspaceMember {
            user_id,
            workspace_id,
            role,
            permissions: vec![],
            invited_by: None,
            is_active: true,
            joined_at: Timestamp::now(),
        })
        .await
        .unwrap();
    store.commit(permit).await.unwrap();
}

#[tokio::test]
async fn change_roles_and_remove() {
    let Setup {
        store,
        publisher,
        service,
        owner,
        workspace_id,
        ..
    } = setup().await;

    let admin = UserId::random();
    let editor = UserId::random();
    add_member(&store, workspace_id, admin, Role::Admin).await;
    add_member(&store, workspace_id, editor, Role::Editor).await;

    let member = service
        .update_member_role(&workspace_id, &editor, Role::Viewer, &Principal::from(admin))
        .await
        .unwrap();
    assert_eq!(member.role, Role::Viewer);

    // Viewers can't manage members.
    assert_matches!(
        service
            .update_member_role(&workspace_id, &admin, Role::Viewer, &Principal::from(editor))
            .await,
        Err(MembershipError::Unauthorized(err)) if err.permission() == &Permission::MEMBER_UPDATE
    );
    assert_matches!(
        service
            .update_member_role(&workspace_id, &editor, Role::Owner, &Principal::from(owner))
            .await,
        Err(MembershipError::Validation(ValidationError::OwnerAssignment))
    );
    assert_matches!(
        service
            .update_member_role(&workspace_id, &owner, Role::Viewer, &Principal::from(admin))
            .await,
        Err(MembershipError::Validation(ValidationError::OwnerRoleChange))
    );
    assert_matches!(
        service
            .update_member_role(&workspace_id, &UserId::random(), Role::Viewer, &Principal::from(owner))
            .await,
        Err(MembershipError::MemberNotFound(_))
    );

    assert_matches!(
        service
            .remove_member(&workspace_id, &owner, &Principal::from(admin))
            .await,
        Err(MembershipError::Validation(ValidationError::RemoveOwner))
    );
    service
        .remove_member(&workspace_id, &editor, &Principal::from(admin))
        .await
        .unwrap();
    assert_matches!(
        service
            .remove_member(&workspace_id, &editor, &Principal::from(admin))
            .await,
        Err(MembershipError::MemberNotFound(_))
    );

    let members = service
        .members(&workspace_id, &Principal::from(owner))
        .await
        .unwrap();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].user_id, admin);

    // Removed members lose access right away.
    assert_matches!(
        service.members(&workspace_id, &Principal::from(editor)).await,
        Err(MembershipError::Unauthorized(_))
    );

    let topics: Vec<Topic> = publisher.events().iter().map(|event| event.topic()).collect();
    assert_eq!(topics, vec![Topic::MemberUpdated, Topic::MemberRemoved]);
}

#[tokio::test]
async fn transfer_ownership() {
    // Enough attempts for every step below.
    let limiter = RateLimiter::new(ChaCha20Rng::from_seed([1; 32])).with_policy(
        OWNERSHIP_TRANSFER,
        RateLimitPolicy {
            max_requests: 10,
            ..RateLimitPolicy::ownership_transfer()
        },
    );
    let Setup {
        directory,
        store,
        publisher,
        service,
        owner,
        workspace_id,
    } = setup_with_limiter(limiter).await;

    let successor = UserId::random();
    let stranger = UserId::random();
    add_member(&store, workspace_id, successor, Role::Editor).await;

    assert_matches!(
        service
            .transfer_ownership(&workspace_id, &stranger, &Principal::from(owner))
            .await,
        Err(MembershipError::MemberNotFound(id)) if id == stranger
    );
    assert_matches!(
        service
            .transfer_ownership(&workspace_id, &owner, &Principal::from(owner))
            .await,
        Err(MembershipError::Validation(ValidationError::AlreadyOwner))
    );

    let member = service
        .transfer_ownership(&workspace_id, &successor, &Principal::from(owner))
        .await
        .unwrap();
    assert_eq!(member.role, Role::Owner);
    assert_eq!(directory.owner_of(&workspace_id), Some(successor));

    let previous = store.member(&workspace_id, &owner).await.unwrap().unwrap();
    assert!(previous.is_active);
    assert_eq!(previous.role, Role::Admin);
    assert_eq!(
        store
            .member(&workspace_id, &successor)
            .await
            .unwrap()
            .unwrap()
            .role,
        Role::Owner
    );

    // The previous owner can't transfer anymore.
    assert_matches!(
        service
            .transfer_ownership(&workspace_id, &owner, &Principal::from(owner))
            .await,
        Err(MembershipError::Unauthorized(_))
    );

    let events = publisher.events();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|event| event.topic() == Topic::MemberUpdated));
}

#[tokio::test]
async fn only_the_owner_transfers() {
    let Setup {
        directory,
        store,
        publisher,
        service,
        owner,
        workspace_id,
    } = setup().await;

    // An explicit grant of the transfer permission is not enough.
    let admin = UserId::random();
    let permit = store.begin().await.unwrap();
    store
        .upsert_member(&WorkspaceMember {
            user_id: admin,
            workspace_id,
            role: Role::Admin,
            permissions: vec![Permission::WORKSPACE_TRANSFER],
            invited_by: Some(owner),
            is_active: true,
            joined_at: Timestamp::now(),
        })
        .await
        .unwrap();
    store.commit(permit).await.unwrap();

    assert_matches!(
        service
            .transfer_ownership(&workspace_id, &admin, &Principal::from(admin))
            .await,
        Err(MembershipError::Unauthorized(err)) => {
            assert_eq!(err.permission(), &Permission::WORKSPACE_TRANSFER);
            assert_eq!(err.denied(), &[workspace_id]);
        }
    );
    assert_eq!(directory.owner_of(&workspace_id), Some(owner));
    assert_eq!(
        store.member(&workspace_id, &admin).await.unwrap().unwrap().role,
        Role::Admin
    );
    assert!(publisher.events().is_empty());
}

#[tokio::test]
async fn failed_transfer_rolls_back() {
    let Setup {
        directory,
        store,
        publisher,
        service,
        owner,
        workspace_id,
    } = setup().await;

    let successor = UserId::random();
    add_member(&store, workspace_id, successor, Role::Editor).await;
    directory.fail_ownership(true);

    assert_matches!(
        service
            .transfer_ownership(&workspace_id, &successor, &Principal::from(owner))
            .await,
        Err(MembershipError::Lookup(_))
    );
    assert_eq!(directory.owner_of(&workspace_id), Some(owner));
    assert_eq!(
        store
            .member(&workspace_id, &successor)
            .await
            .unwrap()
            .unwrap()
            .role,
        Role::Editor
    );
    assert!(store.member(&workspace_id, &owner).await.unwrap().is_none());
    assert!(publisher.events().is_empty());
}

#[tokio::test]
async fn transfer_attempts_are_limited() {
    let Setup {
        store,
        service,
        owner,
        workspace_id,
        ..
    } = setup().await;

    let admin = UserId::random();
    add_member(&store, workspace_id, admin, Role::Admin).await;

    for _ in 0..3 {
        assert_matches!(
            service
                .transfer_ownership(&workspace_id, &admin, &Principal::from(admin))
                .await,
            Err(MembershipError::Unauthorized(_))
        );
    }
    assert_matches!(
        service
            .transfer_ownership(&workspace_id, &admin, &Principal::from(admin))
            .await,
        Err(MembershipError::RateLimited(err)) => {
            assert_eq!(err.max_requests, 3);
            assert!(err.remaining <= err.window);
        }
    );

    // Limits are tracked per user.
    service
        .transfer_ownership(&workspace_id, &admin, &Principal::from(owner))
        .await
        .unwrap();

    // The window closes after a day.
    MockClock::advance_system_time(Duration::from_secs(24 * 60 * 60));
    service
        .transfer_ownership(&workspace_id, &owner, &Principal::from(admin))
        .await
        .unwrap();
}
