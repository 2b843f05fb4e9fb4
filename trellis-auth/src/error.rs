// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;

use thiserror::Error;
use trellis_core::traits::LookupError;
use trellis_core::{Permission, Principal, UserId, WorkspaceId};
use trellis_store::SqliteError;

/// Denied permission check of a known user.
///
/// Carries which permission was missing in which workspaces together with the grants the caller
/// _does_ hold there. It never contains anything about other users or about resources the caller
/// can not access.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthorizationError {
    message: String,
    permission: Permission,
    denied: Vec<WorkspaceId>,
    granted: BTreeMap<WorkspaceId, BTreeSet<Permission>>,
}

impl AuthorizationError {
    pub fn new(
        message: impl Into<String>,
        permission: Permission,
        denied: BTreeMap<WorkspaceId, BTreeSet<Permission>>,
    ) -> Self {
        Self {
            message: message.into(),
            permission,
            denied: denied.keys().copied().collect(),
            granted: denied,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn permission(&self) -> &Permission {
        &self.permission
    }

    /// Workspaces in which the permission is missing.
    pub fn denied(&self) -> &[WorkspaceId] {
        &self.denied
    }

    /// Grants the caller holds in the given denied workspace.
    pub fn granted(&self, workspace_id: &WorkspaceId) -> Option<&BTreeSet<Permission>> {
        self.granted.get(workspace_id)
    }
}

impl Display for AuthorizationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let denied: Vec<String> = self.denied.iter().map(WorkspaceId::to_hex).collect();
        write!(
            f,
            "{}: missing permission '{}' in workspace {}",
            self.message,
            self.permission,
            denied.join(", ")
        )
    }
}

impl std::error::Error for AuthorizationError {}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("authentication required")]
    Unauthenticated,

    #[error(transparent)]
    Unauthorized(#[from] AuthorizationError),

    #[error(transparent)]
    Lookup(#[from] LookupError),

    #[error(transparent)]
    Store(#[from] SqliteError),
}

/// Returns the id of an authenticated user or fails for anonymous principals.
pub fn authenticated(principal: &Principal) -> Result<UserId, AuthError> {
    principal.user_id().copied().ok_or(AuthError::Unauthenticated)
}
