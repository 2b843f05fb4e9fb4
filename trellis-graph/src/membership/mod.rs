// SPDX-License-Identifier: MIT OR Apache-2.0

//! Roles of workspace members and transfer of workspace ownership.
#[cfg(test)]
mod tests;

use std::collections::BTreeMap;

use tracing::{debug, warn};
use trellis_auth::{
    AuthorizationError, AuthorizationService, OWNERSHIP_TRANSFER, PermissionEvaluator,
    RateLimiter, RoleBased, authenticated,
};
use trellis_core::traits::{LookupError, WorkspaceLookup, WorkspaceOwnership};
use trellis_core::{
    Permission, Principal, Role, Timestamp, UserId, Workspace, WorkspaceId, WorkspaceMember,
};
use trellis_store::{MemberStore, SqliteStore, Transaction};

use crate::error::{MembershipError, ValidationError};
use crate::events::{Event, EventFanout, EventPublisher, Payload};
use crate::transaction::atomically;

/// Manages members of workspaces.
#[derive(Clone, Debug)]
pub struct MembershipService<W, O, P, E = RoleBased> {
    auth: AuthorizationService<W, E>,
    ownership: O,
    store: SqliteStore,
    events: EventFanout<P>,
    limiter: RateLimiter,
}

impl<W, O, P, E> MembershipService<W, O, P, E>
where
    W: WorkspaceLookup,
    O: WorkspaceOwnership,
    P: EventPublisher,
    E: PermissionEvaluator,
{
    pub fn new(
        auth: AuthorizationService<W, E>,
        ownership: O,
        store: SqliteStore,
        publisher: P,
        limiter: RateLimiter,
    ) -> Self {
        Self {
            auth,
            ownership,
            store,
            events: EventFanout::new(publisher),
            limiter,
        }
    }

    /// Active members of a workspace, requires `workspace:read`.
    pub async fn members(
        &self,
        workspace_id: &WorkspaceId,
        principal: &Principal,
    ) -> Result<Vec<WorkspaceMember>, MembershipError> {
        let actor = authenticated(principal)?;
        self.auth
            .require_access(
                &actor,
                workspace_id,
                &Permission::WORKSPACE_READ,
                "not allowed to read members of workspace",
            )
            .await?;
        Ok(self.store.members(workspace_id).await?)
    }

    /// Change the role of an active member, requires `member:update`.
    pub async fn update_member_role(
        &self,
        workspace_id: &WorkspaceId,
        user_id: &UserId,
        role: Role,
        principal: &Principal,
    ) -> Result<WorkspaceMember, MembershipError> {
        let actor = authenticated(principal)?;
        let workspace = self
            .authorized_workspace(
                &actor,
                workspace_id,
                &Permission::MEMBER_UPDATE,
                "not allowed to change member roles",
            )
            .await?;

        if role == Role::Owner {
            return Err(ValidationError::OwnerAssignment.into());
        }
        if &workspace.owner_id == user_id {
            return Err(ValidationError::OwnerRoleChange.into());
        }

        let member = self.active_member(workspace_id, user_id).await?;
        let updated = atomically(&self.store, async |store| {
            store.update_member_role(workspace_id, user_id, role).await
        })
        .await?;
        if !updated {
            return Err(MembershipError::MemberNotFound(*user_id));
        }
        debug!(workspace = %workspace_id, user = %user_id, %role, actor = %actor, "changed member role");

        let member = WorkspaceMember { role, ..member };
        self.events
            .publish(Event::new(*workspace_id, Payload::MemberUpdated(member.clone())))
            .await;
        Ok(member)
    }

    /// Deactivate a membership, requires `member:remove`. The owner can not be removed.
    pub async fn remove_member(
        &self,
        workspace_id: &WorkspaceId,
        user_id: &UserId,
        principal: &Principal,
    ) -> Result<(), MembershipError> {
        let actor = authenticated(principal)?;
        let workspace = self
            .authorized_workspace(
                &actor,
                workspace_id,
                &Permission::MEMBER_REMOVE,
                "not allowed to remove members",
            )
            .await?;

        if &workspace.owner_id == user_id {
            return Err(ValidationError::RemoveOwner.into());
        }

        let removed = atomically(&self.store, async |store| {
            store.deactivate_member(workspace_id, user_id).await
        })
        .await?;
        if !removed {
            return Err(MembershipError::MemberNotFound(*user_id));
        }
        debug!(workspace = %workspace_id, user = %user_id, actor = %actor, "removed member");

        self.events
            .publish(Event::new(
                *workspace_id,
                Payload::MemberRemoved { user_id: *user_id },
            ))
            .await;
        Ok(())
    }

    /// Hand the workspace over to another active member.
    ///
    /// Only the current owner can do this and only a few times per day. The previous owner stays
    /// in the workspace as an admin.
    pub async fn transfer_ownership(
        &self,
        workspace_id: &WorkspaceId,
        new_owner: &UserId,
        principal: &Principal,
    ) -> Result<WorkspaceMember, MembershipError> {
        let actor = authenticated(principal)?;

        // Every attempt counts, including those failing further down.
        self.limiter.check_limit(&actor, OWNERSHIP_TRANSFER).await?;

        let workspace = self
            .authorized_workspace(
                &actor,
                workspace_id,
                &Permission::WORKSPACE_TRANSFER,
                "not allowed to transfer ownership",
            )
            .await?;
        let previous_owner = workspace.owner_id;

        // Explicit grants of `workspace:transfer` do not replace being the owner.
        if previous_owner != actor {
            warn!(
                target: "trellis::audit",
                user = %actor,
                workspace = %workspace_id,
                "ownership transfer by non-owner denied"
            );
            let granted = self.auth.granted_permissions(&actor, workspace_id).await?;
            return Err(AuthorizationError::new(
                "only the owner can transfer ownership",
                Permission::WORKSPACE_TRANSFER,
                BTreeMap::from([(*workspace_id, granted)]),
            )
            .into());
        }

        if &previous_owner == new_owner {
            return Err(ValidationError::AlreadyOwner.into());
        }

        let successor = self.active_member(workspace_id, new_owner).await?;
        let previous = self
            .store
            .member(workspace_id, &previous_owner)
            .await?
            .filter(|member| member.is_active);

        let successor = WorkspaceMember {
            role: Role::Owner,
            ..successor
        };
        let demoted = match previous {
            Some(member) => WorkspaceMember {
                role: Role::Admin,
                ..member
            },
            None => WorkspaceMember {
                user_id: previous_owner,
                workspace_id: *workspace_id,
                role: Role::Admin,
                permissions: Vec::new(),
                invited_by: None,
                is_active: true,
                joined_at: Timestamp::now(),
            },
        };

        let permit = self.store.begin().await?;
        let result = self.write_transfer(workspace_id, &successor, &demoted).await;
        match result {
            Ok(()) => self
                .store
                .commit(permit)
                .await
                .map_err(MembershipError::Transaction)?,
            Err(err) => {
                if let Err(rollback_err) = self.store.rollback(permit).await {
                    warn!(%rollback_err, "failed rolling back ownership transfer");
                }
                warn!(workspace = %workspace_id, %err, "transferring ownership failed");
                return Err(err);
            }
        }
        debug!(workspace = %workspace_id, from = %previous_owner, to = %new_owner, "transferred ownership");

        self.events
            .publish_all([
                Event::new(*workspace_id, Payload::MemberUpdated(successor.clone())),
                Event::new(*workspace_id, Payload::MemberUpdated(demoted)),
            ])
            .await;
        Ok(successor)
    }

    /// Writes of an ownership transfer, runs inside the caller's transaction.
    async fn write_transfer(
        &self,
        workspace_id: &WorkspaceId,
        successor: &WorkspaceMember,
        demoted: &WorkspaceMember,
    ) -> Result<(), MembershipError> {
        let promoted = self
            .store
            .update_member_role(workspace_id, &successor.user_id, Role::Owner)
            .await
            .map_err(MembershipError::Transaction)?;
        if !promoted {
            return Err(MembershipError::MemberNotFound(successor.user_id));
        }

        let demoted_existing = self
            .store
            .update_member_role(workspace_id, &demoted.user_id, Role::Admin)
            .await
            .map_err(MembershipError::Transaction)?;
        if !demoted_existing {
            self.store
                .upsert_member(demoted)
                .await
                .map_err(MembershipError::Transaction)?;
        }

        self.ownership
            .set_owner(workspace_id, &successor.user_id)
            .await?;
        Ok(())
    }

    async fn authorized_workspace(
        &self,
        actor: &UserId,
        workspace_id: &WorkspaceId,
        permission: &Permission,
        message: &str,
    ) -> Result<Workspace, MembershipError> {
        self.auth
            .require_access(actor, workspace_id, permission, message)
            .await?;
        // Access was granted, so the workspace existed a moment ago.
        self.auth
            .workspace(workspace_id)
            .await?
            .ok_or_else(|| LookupError::new("workspaces", "workspace vanished").into())
    }

    async fn active_member(
        &self,
        workspace_id: &WorkspaceId,
        user_id: &UserId,
    ) -> Result<WorkspaceMember, MembershipError> {
        self.store
            .member(workspace_id, user_id)
            .await?
            .filter(|member| member.is_active)
            .ok_or(MembershipError::MemberNotFound(*user_id))
    }
}
