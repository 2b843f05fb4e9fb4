// SPDX-License-Identifier: MIT OR Apache-2.0

//! Authorized mutations of the card connection graph, the workspace invitation lifecycle and
//! workspace-scoped change events.
//!
//! Services take the acting user as a [`Principal`](trellis_core::Principal), check permissions
//! through an [`AuthorizationService`](trellis_auth::AuthorizationService), write through the
//! [`SqliteStore`](trellis_store::SqliteStore) and publish an event once the write committed.
pub mod config;
pub mod connections;
mod error;
pub mod events;
pub mod invitations;
pub mod membership;
#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;
mod transaction;

pub use config::{GraphConfig, InvitationConfig};
pub use connections::{
    BatchFailure, BatchResult, BatchUpdate, ConnectionGraphService, CreateConnection,
    UpdateConnection,
};
pub use error::{ConnectionError, InvitationError, MembershipError, ValidationError};
pub use events::{Event, EventBus, EventFanout, EventPublisher, Payload, Topic};
pub use invitations::{CreateInvite, InvitationService};
pub use membership::MembershipService;
