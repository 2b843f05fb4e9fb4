// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory collaborators and publishers for tests.
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use trellis_core::traits::{
    CardLookup, LookupError, UserLookup, WorkspaceLookup, WorkspaceOwnership,
};
use trellis_core::{Card, CardId, User, UserId, Workspace, WorkspaceId, normalize_email};

use crate::events::{Event, EventPublisher, PublishError};

#[derive(Debug, Default)]
struct Directory {
    cards: HashMap<CardId, Card>,
    workspaces: HashMap<WorkspaceId, Workspace>,
    users: HashMap<UserId, User>,
    fail_ownership: bool,
}

/// Cards, workspaces and users held in memory, standing in for the external repositories.
#[derive(Clone, Debug, Default)]
pub struct TestDirectory(Arc<RwLock<Directory>>);

impl TestDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_user(&self, email: &str) -> UserId {
        let user = User {
            id: UserId::random(),
            email: normalize_email(email),
        };
        let id = user.id;
        self.0.write().unwrap().users.insert(id, user);
        id
    }

    pub fn create_workspace(&self, owner_id: UserId) -> WorkspaceId {
        let workspace = Workspace {
            id: WorkspaceId::random(),
            owner_id,
        };
        let id = workspace.id;
        self.0.write().unwrap().workspaces.insert(id, workspace);
        id
    }

    pub fn create_card(&self, workspace_id: WorkspaceId) -> CardId {
        let card = Card {
            id: CardId::random(),
            workspace_id,
        };
        let id = card.id;
        self.0.write().unwrap().cards.insert(id, card);
        id
    }

    pub fn remove_card(&self, id: &CardId) {
        self.0.write().unwrap().cards.remove(id);
    }

    pub fn owner_of(&self, workspace_id: &WorkspaceId) -> Option<UserId> {
        self.0
            .read()
            .unwrap()
            .workspaces
            .get(workspace_id)
            .map(|workspace| workspace.owner_id)
    }

    /// Make every following ownership change fail.
    pub fn fail_ownership(&self, fail: bool) {
        self.0.write().unwrap().fail_ownership = fail;
    }
}

impl CardLookup for TestDirectory {
    async fn get_by_id(&self, id: &CardId) -> Result<Option<Card>, LookupError> {
        Ok(self.0.read().unwrap().cards.get(id).cloned())
    }

    async fn get_by_ids(&self, ids: &[CardId]) -> Result<Vec<Card>, LookupError> {
        let directory = self.0.read().unwrap();
        Ok(ids
            .iter()
            .filter_map(|id| directory.cards.get(id).cloned())
            .collect())
    }
}

impl WorkspaceLookup for TestDirectory {
    async fn get_by_id(&self, id: &WorkspaceId) -> Result<Option<Workspace>, LookupError> {
        Ok(self.0.read().unwrap().workspaces.get(id).cloned())
    }
}

impl UserLookup for TestDirectory {
    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, LookupError> {
        Ok(self.0.read().unwrap().users.get(id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, LookupError> {
        Ok(self
            .0
            .read()
            .unwrap()
            .users
            .values()
            .find(|user| user.email == email)
            .cloned())
    }
}

impl WorkspaceOwnership for TestDirectory {
    async fn set_owner(
        &self,
        workspace_id: &WorkspaceId,
        owner_id: &UserId,
    ) -> Result<(), LookupError> {
        let mut directory = self.0.write().unwrap();
        if directory.fail_ownership {
            return Err(LookupError::new("workspaces", "workspace repository unavailable"));
        }
        let workspace = directory
            .workspaces
            .get_mut(workspace_id)
            .ok_or_else(|| LookupError::new("workspaces", "unknown workspace"))?;
        workspace.owner_id = *owner_id;
        Ok(())
    }
}

/// Keeps every published event.
#[derive(Clone, Debug, Default)]
pub struct RecordingPublisher(Arc<Mutex<Vec<Event>>>);

impl RecordingPublisher {
    pub fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap().clone()
    }
}

impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: Event) -> Result<(), PublishError> {
        self.0.lock().unwrap().push(event);
        Ok(())
    }
}

/// Rejects every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct FailingPublisher;

impl EventPublisher for FailingPublisher {
    async fn publish(&self, _event: Event) -> Result<(), PublishError> {
        Err(PublishError::Transport("connection reset".to_string()))
    }
}

/// Install a log subscriber when `RUST_LOG` is set, useful when debugging a failing test.
pub fn setup_logging() {
    if std::env::var("RUST_LOG").is_ok() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    }
}
