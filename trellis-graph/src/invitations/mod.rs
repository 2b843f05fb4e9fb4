// SPDX-License-Identifier: MIT OR Apache-2.0

//! Invitations into workspaces, bound to an email address and authenticated by a secret token.
//!
//! ```text
//!            accept
//!          ┌────────▶ accepted
//!          │ reject
//! pending ─┼────────▶ rejected
//!          │ cancel
//!          ├────────▶ cancelled
//!          │ expiry
//!          └────────▶ expired
//! ```
//!
//! All states except `pending` are terminal. Expiry happens lazily when an expired invitation is
//! used and through [`InvitationService::expire_old_invitations`].

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use trellis_auth::{AuthorizationService, PermissionEvaluator, RoleBased, authenticated};
use trellis_core::traits::{UserLookup, WorkspaceLookup};
use trellis_core::{
    InviteId, InviteStatus, InviteToken, Permission, Principal, Role, Timestamp, WorkspaceId,
    WorkspaceInvite, WorkspaceMember, normalize_email,
};
use trellis_store::{AcceptOutcome, InviteStore, MemberStore, SqliteStore, Transaction};

use crate::config::InvitationConfig;
use crate::error::{InvitationError, ValidationError};
use crate::events::{Event, EventFanout, EventPublisher, Payload};
use crate::transaction::atomically;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CreateInvite {
    pub workspace_id: WorkspaceId,
    pub email: String,
    pub role: Role,
    pub message: Option<String>,

    /// Grants on top of the role defaults.
    pub permissions: Vec<Permission>,
}

impl CreateInvite {
    pub fn new(workspace_id: WorkspaceId, email: &str, role: Role) -> Self {
        Self {
            workspace_id,
            email: email.to_string(),
            role,
            message: None,
            permissions: Vec::new(),
        }
    }
}

/// Issues invitations and turns accepted ones into memberships.
#[derive(Clone, Debug)]
pub struct InvitationService<W, U, P, E = RoleBased> {
    auth: AuthorizationService<W, E>,
    users: U,
    store: SqliteStore,
    events: EventFanout<P>,
    config: InvitationConfig,
}

impl<W, U, P, E> InvitationService<W, U, P, E>
where
    W: WorkspaceLookup,
    U: UserLookup,
    P: EventPublisher,
    E: PermissionEvaluator,
{
    pub fn new(
        auth: AuthorizationService<W, E>,
        users: U,
        store: SqliteStore,
        publisher: P,
        config: InvitationConfig,
    ) -> Self {
        Self {
            auth,
            users,
            store,
            events: EventFanout::new(publisher),
            config,
        }
    }

    /// Invite an email address into a workspace, requires `workspace:invite`.
    pub async fn create_invite(
        &self,
        input: CreateInvite,
        principal: &Principal,
    ) -> Result<WorkspaceInvite, InvitationError> {
        let actor = authenticated(principal)?;
        self.auth
            .require_access(
                &actor,
                &input.workspace_id,
                &Permission::WORKSPACE_INVITE,
                "not allowed to invite into workspace",
            )
            .await?;

        if input.role == Role::Owner {
            return Err(ValidationError::OwnerInvite.into());
        }
        if input.permissions.contains(&Permission::WORKSPACE_TRANSFER) {
            return Err(ValidationError::TransferGrant.into());
        }
        // Inviters can only pass on what they hold themselves.
        for permission in &input.permissions {
            self.auth
                .require_access(
                    &actor,
                    &input.workspace_id,
                    permission,
                    "not allowed to grant a permission the inviter does not hold",
                )
                .await?;
        }

        let email = normalize_email(&input.email);
        if !is_plausible_email(&email) {
            return Err(ValidationError::InvalidEmail(input.email).into());
        }

        // Invitations past their expiry date are closed here, they must not block a new one.
        let now = Timestamp::now();
        atomically(&self.store, async |store| {
            store
                .expire_invites_for_email(&input.workspace_id, &email, now)
                .await
        })
        .await?;

        if self
            .store
            .has_pending_invite(&input.workspace_id, &email)
            .await?
        {
            return Err(ValidationError::DuplicateInvite.into());
        }

        let user = self.users.find_by_email(&email).await?;
        if let Some(user) = &user {
            let member = self.store.member(&input.workspace_id, &user.id).await?;
            if member.is_some_and(|member| member.is_active) {
                return Err(ValidationError::AlreadyMember.into());
            }
        }

        let invite = WorkspaceInvite {
            id: InviteId::random(),
            workspace_id: input.workspace_id,
            invited_by: actor,
            email,
            user_id: user.map(|user| user.id),
            role: input.role,
            permissions: input.permissions,
            token: InviteToken::random(),
            expires_at: now + self.config.invite_lifetime,
            status: InviteStatus::Pending,
            message: input.message,
            accepted_at: None,
            created_at: now,
            updated_at: now,
        };

        // A concurrent request may have created a pending invitation for the same email after our
        // check, the database rejects the second one.
        atomically(&self.store, async |store| store.insert_invite(&invite).await)
            .await
            .map_err(|err| {
                if err.is_unique_violation() {
                    InvitationError::Validation(ValidationError::DuplicateInvite)
                } else {
                    InvitationError::Store(err)
                }
            })?;
        debug!(id = %invite.id, workspace = %invite.workspace_id, actor = %actor, "created invitation");

        self.events
            .publish(Event::new(
                invite.workspace_id,
                Payload::InviteCreated {
                    invite_id: invite.id,
                    email: invite.email.clone(),
                    role: invite.role,
                },
            ))
            .await;
        Ok(invite)
    }

    /// Accept an invitation with its token and become a member of the workspace.
    ///
    /// The invitation is bound to its email address, the accepting user needs to have the same
    /// one. Membership and the closed invitation are written atomically.
    pub async fn accept_invite(
        &self,
        token: &InviteToken,
        principal: &Principal,
    ) -> Result<WorkspaceMember, InvitationError> {
        let actor = authenticated(principal)?;
        let invite = self.pending_invite(token).await?;

        let user = self
            .users
            .find_by_id(&actor)
            .await?
            .ok_or(InvitationError::UserNotFound(actor))?;
        if normalize_email(&user.email) != invite.email {
            return Err(ValidationError::EmailMismatch.into());
        }

        let now = Timestamp::now();
        let member = WorkspaceMember {
            user_id: actor,
            workspace_id: invite.workspace_id,
            role: invite.role,
            permissions: invite.permissions.clone(),
            invited_by: Some(invite.invited_by),
            is_active: true,
            joined_at: now,
        };

        let permit = self.store.begin().await?;
        let outcome = match self.store.accept_invite(&invite.id, &actor, &member, now).await {
            Ok(outcome) => outcome,
            Err(err) => {
                if let Err(rollback_err) = self.store.rollback(permit).await {
                    warn!(%rollback_err, "failed rolling back accepted invitation");
                }
                return Err(InvitationError::Transaction(err));
            }
        };

        match outcome {
            AcceptOutcome::Accepted => {
                self.store
                    .commit(permit)
                    .await
                    .map_err(InvitationError::Transaction)?;
            }
            AcceptOutcome::NotPending => {
                self.store.rollback(permit).await?;
                return Err(InvitationError::AlreadyProcessed);
            }
            AcceptOutcome::AlreadyMember => {
                self.store.rollback(permit).await?;
                return Err(ValidationError::AlreadyMember.into());
            }
        }
        debug!(id = %invite.id, workspace = %invite.workspace_id, user = %actor, "accepted invitation");

        self.events
            .publish(Event::new(
                member.workspace_id,
                Payload::MemberAdded(member.clone()),
            ))
            .await;
        Ok(member)
    }

    /// Decline an invitation, the token is the only credential needed.
    pub async fn reject_invite(&self, token: &InviteToken) -> Result<(), InvitationError> {
        let invite = self.pending_invite(token).await?;
        self.transition(&invite, InviteStatus::Rejected).await?;
        debug!(id = %invite.id, workspace = %invite.workspace_id, "rejected invitation");
        Ok(())
    }

    /// Withdraw a pending invitation, requires `workspace:invite`.
    pub async fn cancel_invite(
        &self,
        id: &InviteId,
        principal: &Principal,
    ) -> Result<(), InvitationError> {
        let actor = authenticated(principal)?;
        let invite = self
            .store
            .invite(id)
            .await?
            .ok_or(InvitationError::InviteNotFound)?;
        self.auth
            .require_access(
                &actor,
                &invite.workspace_id,
                &Permission::WORKSPACE_INVITE,
                "not allowed to cancel invitation",
            )
            .await?;

        if invite.status != InviteStatus::Pending {
            return Err(InvitationError::AlreadyProcessed);
        }
        self.transition(&invite, InviteStatus::Cancelled).await?;
        debug!(%id, workspace = %invite.workspace_id, actor = %actor, "cancelled invitation");

        self.events
            .publish(Event::new(
                invite.workspace_id,
                Payload::InviteCancelled { invite_id: invite.id },
            ))
            .await;
        Ok(())
    }

    /// Mark every pending invitation past its expiry date as expired.
    ///
    /// Returns the number of expired invitations. Safe to run at any time and concurrently.
    pub async fn expire_old_invitations(&self) -> Result<u64, InvitationError> {
        let now = Timestamp::now();
        let expired = atomically(&self.store, async |store| store.expire_invites(now).await).await?;
        debug!(expired, "expired old invitations");
        Ok(expired)
    }

    /// Invitations of a workspace, requires `workspace:read`.
    pub async fn workspace_invites(
        &self,
        workspace_id: &WorkspaceId,
        principal: &Principal,
        include_past: bool,
    ) -> Result<Vec<WorkspaceInvite>, InvitationError> {
        let actor = authenticated(principal)?;
        self.auth
            .require_access(
                &actor,
                workspace_id,
                &Permission::WORKSPACE_READ,
                "not allowed to read invitations of workspace",
            )
            .await?;
        Ok(self
            .store
            .workspace_invites(workspace_id, include_past)
            .await?)
    }

    /// Pending, unexpired invitations sent to an email address.
    ///
    /// There is no permission check, callers need to make sure the email belongs to the
    /// authenticated user.
    pub async fn user_invites(&self, email: &str) -> Result<Vec<WorkspaceInvite>, InvitationError> {
        Ok(self
            .store
            .pending_invites_for_email(&normalize_email(email), Timestamp::now())
            .await?)
    }

    /// Pending, unexpired invitation of a token, for showing it before accepting.
    pub async fn invite_by_token(
        &self,
        token: &InviteToken,
    ) -> Result<Option<WorkspaceInvite>, InvitationError> {
        let invite = self.store.pending_invite_by_token(token).await?;
        Ok(invite.filter(|invite| !invite.is_expired_at(Timestamp::now())))
    }

    /// Look up a pending invitation, expiring it on the way if it is past its expiry date.
    async fn pending_invite(&self, token: &InviteToken) -> Result<WorkspaceInvite, InvitationError> {
        let invite = self
            .store
            .pending_invite_by_token(token)
            .await?
            .ok_or(InvitationError::InviteNotFound)?;

        if invite.is_expired_at(Timestamp::now()) {
            // Losing against a concurrent transition is fine, the invitation is closed either way.
            match self.transition(&invite, InviteStatus::Expired).await {
                Ok(()) | Err(InvitationError::AlreadyProcessed) => (),
                Err(err) => return Err(err),
            }
            debug!(id = %invite.id, "invitation expired");
            return Err(ValidationError::InviteExpired.into());
        }

        Ok(invite)
    }

    async fn transition(
        &self,
        invite: &WorkspaceInvite,
        status: InviteStatus,
    ) -> Result<(), InvitationError> {
        let now = Timestamp::now();
        let changed = atomically(&self.store, async |store| {
            store.transition_invite(&invite.id, status, now).await
        })
        .await?;
        if !changed {
            return Err(InvitationError::AlreadyProcessed);
        }
        Ok(())
    }
}

fn is_plausible_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.contains('@'),
        None => false,
    }
}
