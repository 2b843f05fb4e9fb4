// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::{debug, warn};
use trellis_core::traits::WorkspaceLookup;
use trellis_core::{Permission, UserId, Workspace, WorkspaceId};
use trellis_store::{MemberStore, SqliteStore};

use crate::error::{AuthError, AuthorizationError};
use crate::evaluator::{PermissionEvaluator, RoleBased};

/// Evaluates permissions of users in workspaces.
///
/// A workspace which does not exist is treated exactly like one the user has no access to, the
/// caller can not tell both cases apart.
#[derive(Clone, Debug)]
pub struct AuthorizationService<W, E = RoleBased> {
    workspaces: W,
    store: SqliteStore,
    evaluator: E,
}

impl<W> AuthorizationService<W, RoleBased>
where
    W: WorkspaceLookup,
{
    pub fn new(workspaces: W, store: SqliteStore) -> Self {
        Self::with_evaluator(workspaces, store, RoleBased)
    }
}

impl<W, E> AuthorizationService<W, E>
where
    W: WorkspaceLookup,
    E: PermissionEvaluator,
{
    pub fn with_evaluator(workspaces: W, store: SqliteStore, evaluator: E) -> Self {
        Self {
            workspaces,
            store,
            evaluator,
        }
    }

    /// Look up a workspace record through the workspace collaborator.
    pub async fn workspace(&self, id: &WorkspaceId) -> Result<Option<Workspace>, AuthError> {
        Ok(self.workspaces.get_by_id(id).await?)
    }

    /// Resolve all grants the user holds in a workspace. Empty for unknown workspaces.
    pub async fn granted_permissions(
        &self,
        user_id: &UserId,
        workspace_id: &WorkspaceId,
    ) -> Result<BTreeSet<Permission>, AuthError> {
        let Some(workspace) = self.workspace(workspace_id).await? else {
            return Ok(BTreeSet::new());
        };

        let member = self
            .store
            .member(workspace_id, user_id)
            .await?
            .filter(|member| member.is_active);

        Ok(self.evaluator.granted(user_id, &workspace, member.as_ref()))
    }

    pub async fn has_access(
        &self,
        user_id: &UserId,
        workspace_id: &WorkspaceId,
        permission: &Permission,
    ) -> Result<bool, AuthError> {
        let granted = self.granted_permissions(user_id, workspace_id).await?;
        Ok(granted.contains(permission))
    }

    /// Fails with an [`AuthorizationError`] if the user does not hold the permission.
    pub async fn require_access(
        &self,
        user_id: &UserId,
        workspace_id: &WorkspaceId,
        permission: &Permission,
        message: &str,
    ) -> Result<(), AuthError> {
        let granted = self.granted_permissions(user_id, workspace_id).await?;
        if granted.contains(permission) {
            return Ok(());
        }

        warn!(
            target: "trellis::audit",
            user = %user_id,
            workspace = %workspace_id,
            %permission,
            "permission denied"
        );
        Err(AuthorizationError::new(
            message,
            permission.clone(),
            BTreeMap::from([(*workspace_id, granted)]),
        )
        .into())
    }

    /// Evaluate the permission in every given workspace.
    ///
    /// Every workspace is checked, a denial does not stop the evaluation of the remaining ones.
    pub async fn has_access_batch(
        &self,
        user_id: &UserId,
        workspace_ids: &[WorkspaceId],
        permission: &Permission,
    ) -> Result<HashMap<WorkspaceId, bool>, AuthError> {
        let grants = self.grants_batch(user_id, workspace_ids).await?;
        Ok(grants
            .into_iter()
            .map(|(workspace_id, granted)| (workspace_id, granted.contains(permission)))
            .collect())
    }

    /// Fails with an [`AuthorizationError`] naming _every_ workspace in which the permission is
    /// missing.
    pub async fn require_access_batch(
        &self,
        user_id: &UserId,
        workspace_ids: &[WorkspaceId],
        permission: &Permission,
        message: &str,
    ) -> Result<(), AuthError> {
        let denied: BTreeMap<WorkspaceId, BTreeSet<Permission>> = self
            .grants_batch(user_id, workspace_ids)
            .await?
            .into_iter()
            .filter(|(_, granted)| !granted.contains(permission))
            .collect();

        if denied.is_empty() {
            debug!(user = %user_id, %permission, workspaces = workspace_ids.len(), "access granted");
            return Ok(());
        }

        warn!(
            target: "trellis::audit",
            user = %user_id,
            %permission,
            denied = denied.len(),
            "permission denied"
        );
        Err(AuthorizationError::new(message, permission.clone(), denied).into())
    }

    async fn grants_batch(
        &self,
        user_id: &UserId,
        workspace_ids: &[WorkspaceId],
    ) -> Result<BTreeMap<WorkspaceId, BTreeSet<Permission>>, AuthError> {
        let mut grants = BTreeMap::new();
        for workspace_id in workspace_ids {
            if grants.contains_key(workspace_id) {
                continue;
            }
            let granted = self.granted_permissions(user_id, workspace_id).await?;
            grants.insert(*workspace_id, granted);
        }
        Ok(grants)
    }
}
