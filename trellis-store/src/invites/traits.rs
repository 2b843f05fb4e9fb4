// SPDX-License-Identifier: MIT OR Apache-2.0

use std::error::Error;

use trellis_core::{
    InviteId, InviteStatus, InviteToken, Timestamp, UserId, WorkspaceId, WorkspaceInvite,
    WorkspaceMember,
};

/// Result of closing an invitation and writing the membership it grants.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcceptOutcome {
    /// Invitation was closed and the membership row written.
    Accepted,

    /// Invitation left the pending state before this attempt, probably due to a concurrent
    /// accept, reject or cancel.
    NotPending,

    /// Accepting user is already an active member of the workspace.
    AlreadyMember,
}

/// Interface for storing invitations and moving them through their lifecycle.
///
/// Every transition is guarded by `status = 'pending'` so concurrent writers racing on the same
/// invitation observe the loss instead of overwriting a terminal state.
pub trait InviteStore {
    type Error: Error;

    fn invite(
        &self,
        id: &InviteId,
    ) -> impl Future<Output = Result<Option<WorkspaceInvite>, Self::Error>>;

    /// Look up a pending invitation by its secret token.
    fn pending_invite_by_token(
        &self,
        token: &InviteToken,
    ) -> impl Future<Output = Result<Option<WorkspaceInvite>, Self::Error>>;

    /// Returns `true` if a pending invitation for this (normalized) email exists in the
    /// workspace.
    fn has_pending_invite(
        &self,
        workspace_id: &WorkspaceId,
        email: &str,
    ) -> impl Future<Output = Result<bool, Self::Error>>;

    /// Insert a new invitation.
    ///
    /// Fails with a unique constraint violation if another pending invitation for the same
    /// workspace and email exists.
    fn insert_invite(
        &self,
        invite: &WorkspaceInvite,
    ) -> impl Future<Output = Result<(), Self::Error>>;

    /// Move a pending invitation into another state.
    ///
    /// Returns `false` if the invitation was not pending (anymore).
    fn transition_invite(
        &self,
        id: &InviteId,
        status: InviteStatus,
        now: Timestamp,
    ) -> impl Future<Output = Result<bool, Self::Error>>;

    /// Mark a pending invitation as accepted by the given user and write the membership row.
    ///
    /// Both writes happen inside the same transaction. Callers must roll back unless the outcome
    /// is [`AcceptOutcome::Accepted`].
    fn accept_invite(
        &self,
        id: &InviteId,
        user_id: &UserId,
        member: &WorkspaceMember,
        now: Timestamp,
    ) -> impl Future<Output = Result<AcceptOutcome, Self::Error>>;

    /// Mark all pending invitations which expired before `now` as expired.
    ///
    /// Returns the number of affected invitations.
    fn expire_invites(&self, now: Timestamp) -> impl Future<Output = Result<u64, Self::Error>>;

    /// Mark pending invitations for one email address in a workspace as expired if they expired
    /// before `now`.
    ///
    /// Returns the number of affected invitations.
    fn expire_invites_for_email(
        &self,
        workspace_id: &WorkspaceId,
        email: &str,
        now: Timestamp,
    ) -> impl Future<Output = Result<u64, Self::Error>>;

    /// Get invitations of a workspace, newest first. Only pending ones unless `include_past` is
    /// set.
    fn workspace_invites(
        &self,
        workspace_id: &WorkspaceId,
        include_past: bool,
    ) -> impl Future<Output = Result<Vec<WorkspaceInvite>, Self::Error>>;

    /// Get pending invitations for an email address which did not expire at `now`.
    fn pending_invites_for_email(
        &self,
        email: &str,
        now: Timestamp,
    ) -> impl Future<Output = Result<Vec<WorkspaceInvite>, Self::Error>>;
}
