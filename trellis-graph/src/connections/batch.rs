// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;
use trellis_auth::{PermissionEvaluator, authenticated};
use trellis_core::traits::{CardLookup, WorkspaceLookup};
use trellis_core::{
    Card, CardId, Connection, ConnectionId, Permission, Principal, Timestamp, UserId, WorkspaceId,
};
use trellis_store::ConnectionStore;

use crate::connections::{ConnectionGraphService, CreateConnection, UpdateConnection};
use crate::error::ConnectionError;
use crate::events::{ConnectionScope, Event, EventPublisher, Payload};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BatchUpdate {
    pub id: ConnectionId,
    pub changes: UpdateConnection,
}

/// Item of a batch which could not be applied.
#[derive(Debug)]
pub struct BatchFailure<I> {
    pub input: I,
    pub error: ConnectionError,
}

/// Outcome of a batch operation.
///
/// `total_processed` always equals the number of successful plus failed items.
#[derive(Debug)]
pub struct BatchResult<I, T> {
    pub successful: Vec<T>,
    pub failed: Vec<BatchFailure<I>>,
    pub total_processed: usize,
    pub processing_time: Duration,
}

impl<I, T> BatchResult<I, T> {
    fn new() -> Self {
        Self {
            successful: Vec::new(),
            failed: Vec::new(),
            total_processed: 0,
            processing_time: Duration::ZERO,
        }
    }

    fn push(&mut self, input: I, result: Result<T, ConnectionError>) {
        match result {
            Ok(value) => self.successful.push(value),
            Err(error) => self.failed.push(BatchFailure { input, error }),
        }
    }

    fn finish(mut self, started: Instant) -> Self {
        self.total_processed = self.successful.len() + self.failed.len();
        self.processing_time = started.elapsed();
        self
    }
}

impl<C, W, P, E> ConnectionGraphService<C, W, P, E>
where
    C: CardLookup,
    W: WorkspaceLookup,
    P: EventPublisher,
    E: PermissionEvaluator,
{
    /// Create many connections.
    ///
    /// Fails as a whole, without writing anything, if the user lacks `connection:create` for any
    /// item. Otherwise every item is attempted and failures are reported per item.
    pub async fn batch_create(
        &self,
        items: Vec<CreateConnection>,
        principal: &Principal,
    ) -> Result<BatchResult<CreateConnection, Connection>, ConnectionError> {
        let started = Instant::now();
        let actor = authenticated(principal)?;

        let endpoints: Vec<(CardId, CardId)> = items
            .iter()
            .map(|item| (item.source_card_id, item.target_card_id))
            .collect();
        let cards = self
            .preflight(
                &actor,
                &endpoints,
                &Permission::CONNECTION_CREATE,
                "not allowed to create connections",
            )
            .await?;

        let mut result = BatchResult::new();
        let mut events = Vec::new();
        for input in items {
            let created = self.create_item(&actor, &input, &cards).await;
            if let Ok((connection, workspace_id)) = &created {
                events.push(Event::new(
                    *workspace_id,
                    Payload::ConnectionCreated(connection.clone()),
                ));
            }
            result.push(input, created.map(|(connection, _)| connection));
        }

        let result = result.finish(started);
        debug!(
            actor = %actor,
            successful = result.successful.len(),
            failed = result.failed.len(),
            "batch created connections"
        );
        self.events.publish_all(events).await;
        Ok(result)
    }

    /// Update many connections, with the same semantics as [`Self::batch_create`].
    pub async fn batch_update(
        &self,
        items: Vec<BatchUpdate>,
        principal: &Principal,
    ) -> Result<BatchResult<BatchUpdate, Connection>, ConnectionError> {
        let started = Instant::now();
        let actor = authenticated(principal)?;

        let existing = self.existing_many(items.iter().map(|item| &item.id)).await?;
        let cards = self
            .preflight(
                &actor,
                &endpoints_of(items.iter().map(|item| &item.id), &existing),
                &Permission::CONNECTION_UPDATE,
                "not allowed to update connections",
            )
            .await?;

        let mut result = BatchResult::new();
        let mut events = Vec::new();
        for item in items {
            let updated = self.update_item(&item, &existing, &cards).await;
            if let Ok((connection, workspace_id)) = &updated {
                events.push(Event::new(
                    *workspace_id,
                    Payload::ConnectionUpdated(connection.clone()),
                ));
            }
            result.push(item, updated.map(|(connection, _)| connection));
        }

        let result = result.finish(started);
        debug!(
            actor = %actor,
            successful = result.successful.len(),
            failed = result.failed.len(),
            "batch updated connections"
        );
        self.events.publish_all(events).await;
        Ok(result)
    }

    /// Delete many connections, with the same semantics as [`Self::batch_create`].
    ///
    /// Every deleted connection results in one event, routed to the workspace its source card
    /// belonged to before the deletion.
    pub async fn batch_delete(
        &self,
        ids: Vec<ConnectionId>,
        principal: &Principal,
    ) -> Result<BatchResult<ConnectionId, Connection>, ConnectionError> {
        let started = Instant::now();
        let actor = authenticated(principal)?;

        let existing = self.existing_many(&ids).await?;
        let cards = self
            .preflight(
                &actor,
                &endpoints_of(&ids, &existing),
                &Permission::CONNECTION_DELETE,
                "not allowed to delete connections",
            )
            .await?;

        // Routing scope is captured before the first connection is gone.
        let scope = ConnectionScope::resolve(existing.values(), &cards);

        let mut result = BatchResult::new();
        let mut events = Vec::new();
        for id in ids {
            let deleted = self.delete_item(&id, &existing, &cards).await;
            if let Ok(connection) = &deleted
                && let Some(workspace_id) = scope.workspace_of(&id)
            {
                events.push(Event::new(
                    workspace_id,
                    Payload::ConnectionDeleted(connection.clone()),
                ));
            }
            result.push(id, deleted);
        }

        let result = result.finish(started);
        debug!(
            actor = %actor,
            successful = result.successful.len(),
            failed = result.failed.len(),
            "batch deleted connections"
        );
        self.events.publish_all(events).await;
        Ok(result)
    }

    /// Check the permission for every item before anything gets written.
    ///
    /// Cards are fetched with one batched lookup and every workspace is only evaluated once. The
    /// first item denied in one of its workspaces fails the whole batch. Items with unknown cards
    /// are skipped here and reported as failures when they are applied.
    async fn preflight(
        &self,
        actor: &UserId,
        endpoints: &[(CardId, CardId)],
        permission: &Permission,
        message: &str,
    ) -> Result<HashMap<CardId, Card>, ConnectionError> {
        let card_ids: Vec<CardId> = endpoints
            .iter()
            .flat_map(|(source, target)| [*source, *target])
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let cards = self.card_map(&card_ids).await?;

        let mut access: HashMap<WorkspaceId, bool> = HashMap::new();
        for (source_id, target_id) in endpoints {
            let (Some(source), Some(target)) = (cards.get(source_id), cards.get(target_id)) else {
                continue;
            };

            let workspace_ids = [source.workspace_id, target.workspace_id];
            let mut denied = false;
            for workspace_id in workspace_ids {
                let allowed = match access.get(&workspace_id) {
                    Some(allowed) => *allowed,
                    None => {
                        let allowed = self.auth.has_access(actor, &workspace_id, permission).await?;
                        access.insert(workspace_id, allowed);
                        allowed
                    }
                };
                denied |= !allowed;
            }

            if denied {
                self.auth
                    .require_access_batch(actor, &workspace_ids, permission, message)
                    .await?;
            }
        }

        Ok(cards)
    }

    async fn existing_many(
        &self,
        ids: impl IntoIterator<Item = &ConnectionId>,
    ) -> Result<HashMap<ConnectionId, Connection>, ConnectionError> {
        let mut existing = HashMap::new();
        for id in ids {
            if existing.contains_key(id) {
                continue;
            }
            if let Some(connection) = self.store.connection(id).await? {
                existing.insert(*id, connection);
            }
        }
        Ok(existing)
    }

    async fn create_item(
        &self,
        actor: &UserId,
        input: &CreateConnection,
        cards: &HashMap<CardId, Card>,
    ) -> Result<(Connection, WorkspaceId), ConnectionError> {
        let source = resolved(cards, &input.source_card_id)?;
        resolved(cards, &input.target_card_id)?;
        self.validate_new(input).await?;

        let connection = input.clone().into_connection(*actor, Timestamp::now());
        self.write_insert(&connection).await?;
        Ok((connection, source.workspace_id))
    }

    async fn update_item(
        &self,
        item: &BatchUpdate,
        existing: &HashMap<ConnectionId, Connection>,
        cards: &HashMap<CardId, Card>,
    ) -> Result<(Connection, WorkspaceId), ConnectionError> {
        let connection = existing
            .get(&item.id)
            .ok_or(ConnectionError::ConnectionNotFound(item.id))?;
        let source = resolved(cards, &connection.source_card_id)?;
        resolved(cards, &connection.target_card_id)?;

        let updated = item.changes.clone().apply(connection, Timestamp::now());
        self.validate_update(connection, &updated).await?;
        self.write_update(&updated).await?;
        Ok((updated, source.workspace_id))
    }

    async fn delete_item(
        &self,
        id: &ConnectionId,
        existing: &HashMap<ConnectionId, Connection>,
        cards: &HashMap<CardId, Card>,
    ) -> Result<Connection, ConnectionError> {
        let connection = existing
            .get(id)
            .ok_or(ConnectionError::ConnectionNotFound(*id))?;
        resolved(cards, &connection.source_card_id)?;
        resolved(cards, &connection.target_card_id)?;

        self.write_delete(id).await?;
        Ok(connection.clone())
    }
}

/// Cards of existing connections in the order of the batch items.
fn endpoints_of<'a>(
    ids: impl IntoIterator<Item = &'a ConnectionId>,
    connections: &HashMap<ConnectionId, Connection>,
) -> Vec<(CardId, CardId)> {
    ids.into_iter()
        .filter_map(|id| connections.get(id))
        .map(|connection| (connection.source_card_id, connection.target_card_id))
        .collect()
}

fn resolved<'a>(cards: &'a HashMap<CardId, Card>, id: &CardId) -> Result<&'a Card, ConnectionError> {
    cards.get(id).ok_or(ConnectionError::CardNotFound(*id))
}
