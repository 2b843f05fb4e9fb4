// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::identity::{CardId, ConnectionId, InviteId, InviteToken, UserId, WorkspaceId};
use crate::permission::{Permission, Role};
use crate::timestamp::Timestamp;

/// A node in the knowledge graph. Only its workspace affiliation is of interest here.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    pub id: CardId,
    pub workspace_id: WorkspaceId,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: WorkspaceId,
    pub owner_id: UserId,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
}

/// A typed, directed edge between two cards which may live in different workspaces.
///
/// Source and target are fixed once the connection was created.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub id: ConnectionId,
    pub source_card_id: CardId,
    pub target_card_id: CardId,
    pub connection_type: String,
    pub confidence: f64,
    pub metadata: Option<Value>,
    pub is_visible: bool,
    pub created_by: UserId,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Membership of a user in a workspace, one per (user, workspace) pair.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceMember {
    pub user_id: UserId,
    pub workspace_id: WorkspaceId,
    pub role: Role,

    /// Explicit grants layered on top of the role defaults.
    pub permissions: Vec<Permission>,
    pub invited_by: Option<UserId>,
    pub is_active: bool,
    pub joined_at: Timestamp,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InviteStatus {
    Pending,
    Accepted,
    Rejected,
    Expired,
    Cancelled,
}

impl InviteStatus {
    /// All states except `Pending` are final, no transition leaves them.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, InviteStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InviteStatus::Pending => "pending",
            InviteStatus::Accepted => "accepted",
            InviteStatus::Rejected => "rejected",
            InviteStatus::Expired => "expired",
            InviteStatus::Cancelled => "cancelled",
        }
    }
}

impl Display for InviteStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for InviteStatus {
    type Err = InviteStatusError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(InviteStatus::Pending),
            "accepted" => Ok(InviteStatus::Accepted),
            "rejected" => Ok(InviteStatus::Rejected),
            "expired" => Ok(InviteStatus::Expired),
            "cancelled" => Ok(InviteStatus::Cancelled),
            _ => Err(InviteStatusError(value.to_owned())),
        }
    }
}

#[derive(Debug, Error)]
#[error("unknown invitation status '{0}'")]
pub struct InviteStatusError(String);

/// Time-bounded, single-use offer of workspace membership bound to an email address.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceInvite {
    pub id: InviteId,
    pub workspace_id: WorkspaceId,
    pub invited_by: UserId,

    /// Normalized (trimmed, lower-case) email address, see [`normalize_email`].
    pub email: String,

    /// User who accepted the invitation.
    pub user_id: Option<UserId>,
    pub role: Role,
    pub permissions: Vec<Permission>,
    pub token: InviteToken,
    pub expires_at: Timestamp,
    pub status: InviteStatus,
    pub message: Option<String>,
    pub accepted_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl WorkspaceInvite {
    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        now > self.expires_at
    }
}

/// Identity of the caller of an operation as established by the transport layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Principal {
    Anonymous,
    User(UserId),
}

impl Principal {
    pub fn user_id(&self) -> Option<&UserId> {
        match self {
            Principal::Anonymous => None,
            Principal::User(user_id) => Some(user_id),
        }
    }
}

impl From<UserId> for Principal {
    fn from(user_id: UserId) -> Self {
        Principal::User(user_id)
    }
}

/// Canonical form of an email address used for invitation lookups and comparisons.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
