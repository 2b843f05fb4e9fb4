// SPDX-License-Identifier: MIT OR Apache-2.0

//! Interfaces of external collaborators owning cards, workspaces and users.
//!
//! This system only ever reads the workspace affiliation of cards, the owner of workspaces and
//! the email address of users. Ownership transfer is the single write it delegates.
use std::error::Error;

use thiserror::Error;

use crate::identity::{CardId, UserId, WorkspaceId};
use crate::models::{Card, User, Workspace};

/// Read access to cards owned by the card repository.
pub trait CardLookup {
    fn get_by_id(&self, id: &CardId) -> impl Future<Output = Result<Option<Card>, LookupError>>;

    /// Batched variant of `get_by_id`. Unknown ids are omitted from the result, the order of
    /// returned cards is unspecified.
    fn get_by_ids(&self, ids: &[CardId]) -> impl Future<Output = Result<Vec<Card>, LookupError>>;
}

pub trait WorkspaceLookup {
    fn get_by_id(
        &self,
        id: &WorkspaceId,
    ) -> impl Future<Output = Result<Option<Workspace>, LookupError>>;
}

pub trait UserLookup {
    fn find_by_id(&self, id: &UserId) -> impl Future<Output = Result<Option<User>, LookupError>>;

    /// Find a user by their normalized email address.
    fn find_by_email(
        &self,
        email: &str,
    ) -> impl Future<Output = Result<Option<User>, LookupError>>;
}

/// Changes the owner of a workspace record held by the workspace repository.
pub trait WorkspaceOwnership {
    fn set_owner(
        &self,
        workspace_id: &WorkspaceId,
        owner_id: &UserId,
    ) -> impl Future<Output = Result<(), LookupError>>;
}

/// Failure reported by an external collaborator.
#[derive(Debug, Error)]
#[error("{collaborator} failed: {source}")]
pub struct LookupError {
    collaborator: &'static str,
    #[source]
    source: Box<dyn Error + Send + Sync>,
}

impl LookupError {
    pub fn new(collaborator: &'static str, source: impl Into<Box<dyn Error + Send + Sync>>) -> Self {
        Self {
            collaborator,
            source: source.into(),
        }
    }

    pub fn collaborator(&self) -> &'static str {
        self.collaborator
    }
}
