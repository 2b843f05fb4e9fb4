// SPDX-License-Identifier: MIT OR Apache-2.0

use std::error::Error;

use trellis_core::{Role, UserId, WorkspaceId, WorkspaceMember};

/// Interface for reading and changing workspace membership rows.
///
/// Reads are served from committed state, every write requires a running transaction.
pub trait MemberStore {
    type Error: Error;

    /// Get the membership row of a user in a workspace, active or not.
    fn member(
        &self,
        workspace_id: &WorkspaceId,
        user_id: &UserId,
    ) -> impl Future<Output = Result<Option<WorkspaceMember>, Self::Error>>;

    /// Get all active members of a workspace.
    fn members(
        &self,
        workspace_id: &WorkspaceId,
    ) -> impl Future<Output = Result<Vec<WorkspaceMember>, Self::Error>>;

    /// Insert a membership or re-activate a previously deactivated one.
    ///
    /// Returns `false` when the user is already an active member and nothing was written.
    fn upsert_member(
        &self,
        member: &WorkspaceMember,
    ) -> impl Future<Output = Result<bool, Self::Error>>;

    /// Change the role of an active member.
    ///
    /// Returns `false` when no active membership was found.
    fn update_member_role(
        &self,
        workspace_id: &WorkspaceId,
        user_id: &UserId,
        role: Role,
    ) -> impl Future<Output = Result<bool, Self::Error>>;

    /// Mark a membership as inactive.
    ///
    /// Returns `false` when no active membership was found.
    fn deactivate_member(
        &self,
        workspace_id: &WorkspaceId,
        user_id: &UserId,
    ) -> impl Future<Output = Result<bool, Self::Error>>;
}
