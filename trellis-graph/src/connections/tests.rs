// SPDX-License-Identifier: MIT OR Apache-2.0

use assert_matches::assert_matches;
use trellis_auth::AuthorizationService;
use trellis_core::{
    CardId, ConnectionId, Permission, Principal, Role, Timestamp, UserId, WorkspaceId,
    WorkspaceMember,
};
use trellis_store::{ConnectionStore, MemberStore, SqliteStore, Transaction};

use crate::config::GraphConfig;
use crate::connections::{BatchUpdate, ConnectionGraphService, CreateConnection, UpdateConnection};
use crate::error::{ConnectionError, ValidationError};
use crate::events::{Payload, Topic};
use crate::test_utils::{FailingPublisher, RecordingPublisher, TestDirectory, setup_logging};

type Service<P = RecordingPublisher> = ConnectionGraphService<TestDirectory, TestDirectory, P>;

struct Setup {
    directory: TestDirectory,
    store: SqliteStore,
    publisher: RecordingPublisher,
    service: Service,
}

async fn setup(config: GraphConfig) -> Setup {
    setup_logging();

    let directory = TestDirectory::new();
    let store = SqliteStore::temporary().await;
    let publisher = RecordingPublisher::default();
    let auth = AuthorizationService::new(directory.clone(), store.clone());
    let service = ConnectionGraphService::new(
        directory.clone(),
        auth,
        store.clone(),
        publisher.clone(),
        config,
    );

    Setup {
        directory,
        store,
        publisher,
        service,
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

/// Rejects every insert of a connection with the type "broken" on storage level.
async fn install_broken_trigger(store: &SqliteStore) {
    store
        .execute(async |pool| {
            sqlx::query(
                "
                CREATE TRIGGER reject_broken_connections
                BEFORE INSERT ON connections
                WHEN NEW.connection_type = 'broken'
                BEGIN
                    SELECT RAISE(ABORT, 'rejected by storage');
                END
                ",
            )
            .execute(pool)
            .await?;
            Ok(())
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn create_update_delete() {
    let Setup {
        directory,
        store,
        publisher,
        service,
    } = setup(GraphConfig::default()).await;

    let owner = UserId::random();
    let workspace_id = directory.create_workspace(owner);
    let card_a = directory.create_card(workspace_id);
    let card_b = directory.create_card(workspace_id);
    let principal = Principal::from(owner);

    let connection = service
        .create(CreateConnection::new(card_a, card_b, "references"), &principal)
        .await
        .unwrap();
    assert_eq!(connection.created_by, owner);
    assert_eq!(connection.confidence, 1.0);
    assert_eq!(service.get(&connection.id).await.unwrap(), Some(connection.clone()));

    let updated = service
        .update(
            &connection.id,
            UpdateConnection {
                confidence: Some(0.4),
                is_visible: Some(false),
                ..Default::default()
            },
            &principal,
        )
        .await
        .unwrap();
    assert_eq!(updated.confidence, 0.4);
    assert!(!updated.is_visible);
    assert_eq!(updated.connection_type, "references");
    assert_eq!(updated.source_card_id, card_a);

    let deleted = service.delete(&connection.id, &principal).await.unwrap();
    assert_eq!(deleted, updated);
    assert_eq!(store.connection(&connection.id).await.unwrap(), None);

    let topics: Vec<Topic> = publisher.events().iter().map(|event| event.topic()).collect();
    assert_eq!(
        topics,
        vec![
            Topic::ConnectionCreated,
            Topic::ConnectionUpdated,
            Topic::ConnectionDeleted
        ]
    );
    assert!(
        publisher
            .events()
            .iter()
            .all(|event| event.workspace_id() == &workspace_id)
    );
}

#[tokio::test]
async fn permission_required_in_both_workspaces() {
    let Setup {
        directory,
        store,
        service,
        ..
    } = setup(GraphConfig::default()).await;

    let user = UserId::random();
    let own = directory.create_workspace(user);
    let foreign = directory.create_workspace(UserId::random());
    let card_a = directory.create_card(own);
    let card_b = directory.create_card(foreign);
    let principal = Principal::from(user);

    // Access in the source workspace only is not enough, in both directions.
    for (source, target) in [(card_a, card_b), (card_b, card_a)] {
        let result = service
            .create(CreateConnection::new(source, target, "references"), &principal)
            .await;
        assert_matches!(result, Err(ConnectionError::Unauthorized(err)) => {
            assert_eq!(err.permission(), &Permission::CONNECTION_CREATE);
            assert_eq!(err.denied(), &[foreign]);
        });
    }
    assert!(store.connections_for_card(&card_a).await.unwrap().is_empty());

    // Viewers can not mutate connections.
    add_member(&store, foreign, user, Role::Viewer).await;
    let result = service
        .create(CreateConnection::new(card_a, card_b, "references"), &principal)
        .await;
    assert_matches!(result, Err(ConnectionError::Unauthorized(_)));

    // Editors of the other workspace can.
    let editor = UserId::random();
    add_member(&store, own, editor, Role::Editor).await;
    add_member(&store, foreign, editor, Role::Editor).await;
    let connection = service
        .create(
            CreateConnection::new(card_a, card_b, "references"),
            &Principal::from(editor),
        )
        .await
        .unwrap();

    // The original user is still only a viewer in the target workspace.
    assert_matches!(
        service
            .update(&connection.id, UpdateConnection::default(), &principal)
            .await,
        Err(ConnectionError::Unauthorized(err)) if err.permission() == &Permission::CONNECTION_UPDATE
    );
    assert_matches!(
        service.delete(&connection.id, &principal).await,
        Err(ConnectionError::Unauthorized(err)) if err.denied() == [foreign]
    );
    assert!(service.get(&connection.id).await.unwrap().is_some());
}

#[tokio::test]
async fn missing_cards_and_principals() {
    let Setup {
        directory, service, ..
    } = setup(GraphConfig::default()).await;

    let owner = UserId::random();
    let workspace_id = directory.create_workspace(owner);
    let card = directory.create_card(workspace_id);
    let missing = CardId::random();

    assert_matches!(
        service
            .create(
                CreateConnection::new(card, missing, "references"),
                &Principal::from(owner)
            )
            .await,
        Err(ConnectionError::CardNotFound(id)) if id == missing
    );
    assert_matches!(
        service
            .create(CreateConnection::new(card, card, "references"), &Principal::Anonymous)
            .await,
        Err(ConnectionError::Unauthenticated)
    );
    assert_matches!(
        service
            .update(
                &ConnectionId::random(),
                UpdateConnection::default(),
                &Principal::from(owner)
            )
            .await,
        Err(ConnectionError::ConnectionNotFound(_))
    );
}

#[tokio::test]
async fn validation_rules() {
    let Setup {
        directory, service, ..
    } = setup(GraphConfig {
        allow_self_connections: false,
        allow_duplicate_connections: false,
    })
    .await;

    let owner = UserId::random();
    let principal = Principal::from(owner);
    let workspace_id = directory.create_workspace(owner);
    let card_a = directory.create_card(workspace_id);
    let card_b = directory.create_card(workspace_id);

    let input = CreateConnection {
        confidence: 1.5,
        ..CreateConnection::new(card_a, card_b, "references")
    };
    assert_matches!(
        service.create(input, &principal).await,
        Err(ConnectionError::Validation(ValidationError::Confidence(_)))
    );
    assert_matches!(
        service
            .create(CreateConnection::new(card_a, card_b, "  "), &principal)
            .await,
        Err(ConnectionError::Validation(ValidationError::EmptyConnectionType))
    );
    assert_matches!(
        service
            .create(CreateConnection::new(card_a, card_a, "references"), &principal)
            .await,
        Err(ConnectionError::Validation(ValidationError::SelfConnection))
    );

    service
        .create(CreateConnection::new(card_a, card_b, "references"), &principal)
        .await
        .unwrap();
    assert_matches!(
        service
            .create(CreateConnection::new(card_a, card_b, "references"), &principal)
            .await,
        Err(ConnectionError::Validation(ValidationError::DuplicateConnection(_)))
    );

    // Same cards but different type or direction are fine.
    let other = service
        .create(CreateConnection::new(card_a, card_b, "supports"), &principal)
        .await
        .unwrap();
    service
        .create(CreateConnection::new(card_b, card_a, "references"), &principal)
        .await
        .unwrap();

    // Changing the type into an existing one is a duplicate as well.
    assert_matches!(
        service
            .update(
                &other.id,
                UpdateConnection {
                    connection_type: Some("references".to_string()),
                    ..Default::default()
                },
                &principal
            )
            .await,
        Err(ConnectionError::Validation(ValidationError::DuplicateConnection(_)))
    );
}

#[tokio::test]
async fn self_connections_allowed_by_default() {
    let Setup {
        directory, service, ..
    } = setup(GraphConfig::default()).await;

    let owner = UserId::random();
    let card = directory.create_card(directory.create_workspace(owner));
    let principal = Principal::from(owner);

    service
        .create(CreateConnection::new(card, card, "related"), &principal)
        .await
        .unwrap();
    service
        .create(CreateConnection::new(card, card, "related"), &principal)
        .await
        .unwrap();
}

#[tokio::test]
async fn reading_connections() {
    let Setup {
        directory,
        store,
        service,
        ..
    } = setup(GraphConfig::default()).await;

    let owner = UserId::random();
    let reader = UserId::random();
    let own = directory.create_workspace(owner);
    let shared = directory.create_workspace(UserId::random());
    let hidden = directory.create_workspace(UserId::random());
    add_member(&store, own, reader, Role::Viewer).await;
    add_member(&store, shared, reader, Role::Viewer).await;
    for workspace_id in [shared, hidden] {
        add_member(&store, workspace_id, owner, Role::Editor).await;
    }

    let card_a = directory.create_card(own);
    let card_b = directory.create_card(shared);
    let card_c = directory.create_card(hidden);

    let principal = Principal::from(owner);
    let visible = service
        .create(CreateConnection::new(card_a, card_b, "references"), &principal)
        .await
        .unwrap();
    let secret = service
        .create(CreateConnection::new(card_c, card_a, "references"), &principal)
        .await
        .unwrap();

    let reader = Principal::from(reader);
    assert_eq!(
        service.list_for_card(&card_a, &reader).await.unwrap(),
        vec![visible.clone()]
    );
    assert_eq!(service.list_for_card(&card_a, &principal).await.unwrap().len(), 2);

    assert_eq!(
        service.get_authorized(&visible.id, &reader).await.unwrap(),
        visible
    );
    assert_matches!(
        service.get_authorized(&secret.id, &reader).await,
        Err(ConnectionError::Unauthorized(err)) => {
            assert_eq!(err.denied(), &[hidden]);
            assert!(err.granted(&hidden).unwrap().is_empty());
        }
    );
    assert_matches!(
        service.get_authorized(&ConnectionId::random(), &reader).await,
        Err(ConnectionError::ConnectionNotFound(_))
    );
    assert_matches!(
        service.list_for_card(&card_c, &reader).await,
        Err(ConnectionError::Unauthorized(_))
    );
}

#[tokio::test]
async fn batch_fails_fast_on_authorization() {
    let Setup {
        directory,
        store,
        publisher,
        service,
    } = setup(GraphConfig::default()).await;

    let user = UserId::random();
    let own = directory.create_workspace(user);
    let foreign = directory.create_workspace(UserId::random());
    let card_a = directory.create_card(own);
    let card_b = directory.create_card(own);
    let card_c = directory.create_card(foreign);

    let items = vec![
        CreateConnection::new(card_a, card_b, "references"),
        CreateConnection::new(card_b, card_a, "references"),
        CreateConnection::new(card_b, card_c, "references"),
        CreateConnection::new(card_a, card_b, "supports"),
    ];
    let result = service.batch_create(items, &Principal::from(user)).await;
    assert_matches!(result, Err(ConnectionError::Unauthorized(err)) => {
        assert_eq!(err.denied(), &[foreign]);
    });

    for card in [card_a, card_b, card_c] {
        assert!(store.connections_for_card(&card).await.unwrap().is_empty());
    }
    assert!(publisher.events().is_empty());
}

async fn install_unique_edges(store: &SqliteStore) {
    store
        .execute(async |pool| {
            sqlx::query(
                "
                CREATE UNIQUE INDEX unique_edges
                ON connections (source_card_id, target_card_id, connection_type)
                ",
            )
            .execute(pool)
            .await?;
            Ok(())
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn rejected_inserts_are_not_reported_as_created() {
    let Setup {
        directory,
        store,
        publisher,
        service,
    } = setup(GraphConfig::default()).await;
    install_unique_edges(&store).await;

    let user = UserId::random();
    let workspace_id = directory.create_workspace(user);
    let card_a = directory.create_card(workspace_id);
    let card_b = directory.create_card(workspace_id);

    let items = vec![
        CreateConnection::new(card_a, card_b, "references"),
        CreateConnection::new(card_a, card_b, "references"),
        CreateConnection::new(card_b, card_a, "references"),
    ];
    let result = service
        .batch_create(items, &Principal::from(user))
        .await
        .unwrap();

    assert_eq!(result.total_processed, 3);
    assert_eq!(result.successful.len(), 2);
    assert_eq!(result.failed.len(), 1);
    assert_matches!(
        &result.failed[0].error,
        ConnectionError::Validation(ValidationError::DuplicateConnection(connection_type))
            if connection_type == "references"
    );
    assert_eq!(store.connections_for_card(&card_a).await.unwrap().len(), 2);
    assert_eq!(publisher.events().len(), 2);

    assert_matches!(
        service
            .create(
                CreateConnection::new(card_a, card_b, "references"),
                &Principal::from(user)
            )
            .await,
        Err(ConnectionError::Validation(ValidationError::DuplicateConnection(_)))
    );
    assert_eq!(store.connections_for_card(&card_a).await.unwrap().len(), 2);
    assert_eq!(publisher.events().len(), 2);
}

#[tokio::test]
async fn batch_tolerates_item_failures() {
    let Setup {
        directory,
        store,
        publisher,
        service,
    } = setup(GraphConfig::default()).await;
    install_broken_trigger(&store).await;

    let user = UserId::random();
    let workspace_id = directory.create_workspace(user);
    let card_a = directory.create_card(workspace_id);
    let card_b = directory.create_card(workspace_id);
    let missing = CardId::random();

    let items = vec![
        CreateConnection::new(card_a, card_b, "references"),
        CreateConnection::new(card_a, card_b, "broken"),
        CreateConnection::new(card_b, card_a, "references"),
        CreateConnection::new(card_a, missing, "references"),
        CreateConnection {
            confidence: -0.1,
            ..CreateConnection::new(card_b, card_a, "supports")
        },
    ];
    let result = service
        .batch_create(items, &Principal::from(user))
        .await
        .unwrap();

    assert_eq!(result.total_processed, 5);
    assert_eq!(result.successful.len(), 2);
    assert_eq!(result.failed.len(), 3);
    assert_matches!(
        &result.failed[0].error,
        ConnectionError::Store(_)
    );
    assert_eq!(result.failed[0].input.connection_type, "broken");
    assert_matches!(
        &result.failed[1].error,
        ConnectionError::CardNotFound(id) if id == &missing
    );
    assert_matches!(
        &result.failed[2].error,
        ConnectionError::Validation(ValidationError::Confidence(_))
    );

    assert_eq!(store.connections_for_card(&card_a).await.unwrap().len(), 2);
    assert_eq!(publisher.events().len(), 2);

    // Updates and deletes of unknown connections fail per item as well.
    let unknown = ConnectionId::random();
    let existing = result.successful[0].clone();
    let updates = vec![
        BatchUpdate {
            id: existing.id,
            changes: UpdateConnection {
                connection_type: Some("contradicts".to_string()),
                ..Default::default()
            },
        },
        BatchUpdate {
            id: unknown,
            changes: UpdateConnection::default(),
        },
    ];
    let result = service
        .batch_update(updates, &Principal::from(user))
        .await
        .unwrap();
    assert_eq!(result.total_processed, 2);
    assert_eq!(result.successful[0].connection_type, "contradicts");
    assert_matches!(
        &result.failed[0].error,
        ConnectionError::ConnectionNotFound(id) if id == &unknown
    );

    let result = service
        .batch_delete(vec![unknown, existing.id], &Principal::from(user))
        .await
        .unwrap();
    assert_eq!(result.total_processed, 2);
    assert_eq!(result.successful.len(), 1);
    assert_eq!(result.failed[0].input, unknown);
}

#[tokio::test]
async fn batch_delete_routes_events_to_prior_workspace() {
    let Setup {
        directory,
        store,
        publisher,
        service,
    } = setup(GraphConfig::default()).await;

    let user = UserId::random();
    let workspace_1 = directory.create_workspace(user);
    let workspace_2 = directory.create_workspace(user);
    let card_a = directory.create_card(workspace_1);
    let card_b = directory.create_card(workspace_1);
    let card_c = directory.create_card(workspace_2);

    let principal = Principal::from(user);
    let result = service
        .batch_create(
            vec![
                CreateConnection::new(card_a, card_b, "references"),
                CreateConnection::new(card_c, card_a, "references"),
                CreateConnection::new(card_c, card_b, "supports"),
            ],
            &principal,
        )
        .await
        .unwrap();
    assert_eq!(result.successful.len(), 3);
    let ids: Vec<ConnectionId> = result.successful.iter().map(|c| c.id).collect();

    let result = service.batch_delete(ids.clone(), &principal).await.unwrap();
    assert_eq!(result.successful.len(), 3);
    for id in &ids {
        assert_eq!(store.connection(id).await.unwrap(), None);
    }

    let deleted: Vec<_> = publisher
        .events()
        .into_iter()
        .filter(|event| event.topic() == Topic::ConnectionDeleted)
        .collect();
    assert_eq!(deleted.len(), 3);
    for event in deleted {
        let Payload::ConnectionDeleted(connection) = event.payload() else {
            panic!("unexpected payload");
        };
        let expected = if connection.source_card_id == card_a {
            workspace_1
        } else {
            workspace_2
        };
        assert_eq!(event.workspace_id(), &expected);
    }
}

#[tokio::test]
async fn failed_publishing_keeps_mutation() {
    setup_logging();

    let directory = TestDirectory::new();
    let store = SqliteStore::temporary().await;
    let auth = AuthorizationService::new(directory.clone(), store.clone());
    let service: Service<FailingPublisher> = ConnectionGraphService::new(
        directory.clone(),
        auth,
        store.clone(),
        FailingPublisher,
        GraphConfig::default(),
    );

    let owner = UserId::random();
    let workspace_id = directory.create_workspace(owner);
    let card_a = directory.create_card(workspace_id);
    let card_b = directory.create_card(workspace_id);

    let connection = service
        .create(
            CreateConnection::new(card_a, card_b, "references"),
            &Principal::from(owner),
        )
        .await
        .unwrap();
    assert!(store.connection(&connection.id).await.unwrap().is_some());
}
