// SPDX-License-Identifier: MIT OR Apache-2.0

//! Identifiers, records and collaborator interfaces shared by all trellis crates.
mod identity;
mod models;
mod permission;
mod timestamp;
pub mod traits;

pub use identity::{
    CardId, ConnectionId, ID_LEN, IdentifierError, InviteId, InviteToken, TOKEN_LEN, UserId,
    WorkspaceId,
};
pub use models::{
    Card, Connection, InviteStatus, InviteStatusError, Principal, User, Workspace,
    WorkspaceInvite, WorkspaceMember, normalize_email,
};
pub use permission::{Permission, PermissionError, Role};
pub use timestamp::Timestamp;
