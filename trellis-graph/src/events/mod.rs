// SPDX-License-Identifier: MIT OR Apache-2.0

//! Change events of connections, memberships and invitations, scoped to a workspace.
//!
//! Services hand events to an [`EventFanout`] after the mutation committed. The fanout forwards
//! them to an [`EventPublisher`], usually the in-process [`EventBus`], and never fails the
//! mutation when publishing does. Subscribers are re-validated through a [`SubscriptionGate`]
//! before every delivery.
mod bus;
mod fanout;

use serde::{Deserialize, Serialize};
use trellis_core::{Connection, InviteId, Role, UserId, WorkspaceId, WorkspaceMember};

pub use bus::{EventBus, PublishError, SubscribeError, Subscription, SubscriptionGate};
pub use fanout::{ConnectionScope, EventFanout, EventPublisher};

/// Closed set of topics subscribers can choose from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Topic {
    ConnectionCreated,
    ConnectionUpdated,
    ConnectionDeleted,
    MemberAdded,
    MemberUpdated,
    MemberRemoved,
    InviteCreated,
    InviteCancelled,
}

impl Topic {
    pub const ALL: [Topic; 8] = [
        Topic::ConnectionCreated,
        Topic::ConnectionUpdated,
        Topic::ConnectionDeleted,
        Topic::MemberAdded,
        Topic::MemberUpdated,
        Topic::MemberRemoved,
        Topic::InviteCreated,
        Topic::InviteCancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::ConnectionCreated => "CONNECTION_CREATED",
            Topic::ConnectionUpdated => "CONNECTION_UPDATED",
            Topic::ConnectionDeleted => "CONNECTION_DELETED",
            Topic::MemberAdded => "MEMBER_ADDED",
            Topic::MemberUpdated => "MEMBER_UPDATED",
            Topic::MemberRemoved => "MEMBER_REMOVED",
            Topic::InviteCreated => "INVITE_CREATED",
            Topic::InviteCancelled => "INVITE_CANCELLED",
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Mutated entity carried by an event.
///
/// Invitation events never contain the invitation token.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    ConnectionCreated(Connection),
    ConnectionUpdated(Connection),
    /// Last state of the connection before it was deleted.
    ConnectionDeleted(Connection),
    MemberAdded(WorkspaceMember),
    MemberUpdated(WorkspaceMember),
    MemberRemoved {
        user_id: UserId,
    },
    InviteCreated {
        invite_id: InviteId,
        email: String,
        role: Role,
    },
    InviteCancelled {
        invite_id: InviteId,
    },
}

impl Payload {
    pub fn topic(&self) -> Topic {
        match self {
            Payload::ConnectionCreated(_) => Topic::ConnectionCreated,
            Payload::ConnectionUpdated(_) => Topic::ConnectionUpdated,
            Payload::ConnectionDeleted(_) => Topic::ConnectionDeleted,
            Payload::MemberAdded(_) => Topic::MemberAdded,
            Payload::MemberUpdated(_) => Topic::MemberUpdated,
            Payload::MemberRemoved { .. } => Topic::MemberRemoved,
            Payload::InviteCreated { .. } => Topic::InviteCreated,
            Payload::InviteCancelled { .. } => Topic::InviteCancelled,
        }
    }
}

/// A change in a workspace.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    workspace_id: WorkspaceId,
    payload: Payload,
}

impl Event {
    pub fn new(workspace_id: WorkspaceId, payload: Payload) -> Self {
        Self {
            workspace_id,
            payload,
        }
    }

    pub fn workspace_id(&self) -> &WorkspaceId {
        &self.workspace_id
    }

    pub fn topic(&self) -> Topic {
        self.payload.topic()
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }
}
