// SPDX-License-Identifier: MIT OR Apache-2.0

//! Connections between cards which may live in different workspaces.
//!
//! Every mutation requires the permission in the workspaces of _both_ cards. Batch operations
//! check all items before writing anything and then apply every item independently, see
//! [`BatchResult`].
mod batch;
#[cfg(test)]
mod tests;

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use trellis_auth::{AuthorizationService, PermissionEvaluator, RoleBased, authenticated};
use trellis_core::traits::{CardLookup, WorkspaceLookup};
use trellis_core::{
    Card, CardId, Connection, ConnectionId, Permission, Principal, Timestamp, UserId,
};
use trellis_store::{ConnectionStore, SqliteStore};

use crate::config::GraphConfig;
use crate::error::{ConnectionError, ValidationError};
use crate::events::{ConnectionScope, Event, EventFanout, EventPublisher, Payload};
use crate::transaction::atomically;

pub use batch::{BatchFailure, BatchResult, BatchUpdate};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CreateConnection {
    pub source_card_id: CardId,
    pub target_card_id: CardId,
    pub connection_type: String,
    pub confidence: f64,
    pub metadata: Option<Value>,
    pub is_visible: bool,
}

impl CreateConnection {
    /// Visible connection with full confidence and without metadata.
    pub fn new(source_card_id: CardId, target_card_id: CardId, connection_type: &str) -> Self {
        Self {
            source_card_id,
            target_card_id,
            connection_type: connection_type.to_string(),
            confidence: 1.0,
            metadata: None,
            is_visible: true,
        }
    }

    fn into_connection(self, created_by: UserId, now: Timestamp) -> Connection {
        Connection {
            id: ConnectionId::random(),
            source_card_id: self.source_card_id,
            target_card_id: self.target_card_id,
            connection_type: self.connection_type,
            confidence: self.confidence,
            metadata: self.metadata,
            is_visible: self.is_visible,
            created_by,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Changes to a connection, `None` keeps the current value.
///
/// Source and target of a connection can not be changed.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateConnection {
    pub connection_type: Option<String>,
    pub confidence: Option<f64>,
    pub metadata: Option<Value>,
    pub is_visible: Option<bool>,
}

impl UpdateConnection {
    fn apply(self, connection: &Connection, now: Timestamp) -> Connection {
        Connection {
            connection_type: self
                .connection_type
                .unwrap_or_else(|| connection.connection_type.clone()),
            confidence: self.confidence.unwrap_or(connection.confidence),
            metadata: self.metadata.or_else(|| connection.metadata.clone()),
            is_visible: self.is_visible.unwrap_or(connection.is_visible),
            updated_at: now,
            ..connection.clone()
        }
    }
}

/// Reads and mutates connections on behalf of users.
#[derive(Clone, Debug)]
pub struct ConnectionGraphService<C, W, P, E = RoleBased> {
    cards: C,
    auth: AuthorizationService<W, E>,
    store: SqliteStore,
    events: EventFanout<P>,
    config: GraphConfig,
}

impl<C, W, P, E> ConnectionGraphService<C, W, P, E>
where
    C: CardLookup,
    W: WorkspaceLookup,
    P: EventPublisher,
    E: PermissionEvaluator,
{
    pub fn new(
        cards: C,
        auth: AuthorizationService<W, E>,
        store: SqliteStore,
        publisher: P,
        config: GraphConfig,
    ) -> Self {
        Self {
            cards,
            auth,
            store,
            events: EventFanout::new(publisher),
            config,
        }
    }

    /// Get a connection without any permission check, for internal callers.
    pub async fn get(&self, id: &ConnectionId) -> Result<Option<Connection>, ConnectionError> {
        Ok(self.store.connection(id).await?)
    }

    /// Get a connection the user may read in the workspaces of both cards.
    pub async fn get_authorized(
        &self,
        id: &ConnectionId,
        principal: &Principal,
    ) -> Result<Connection, ConnectionError> {
        let actor = authenticated(principal)?;
        let connection = self.existing(id).await?;
        let (source, target) = self
            .endpoints(&connection.source_card_id, &connection.target_card_id)
            .await?;
        self.auth
            .require_access_batch(
                &actor,
                &[source.workspace_id, target.workspace_id],
                &Permission::CONNECTION_READ,
                "not allowed to read connection",
            )
            .await?;
        Ok(connection)
    }

    /// Connections from or to a card.
    ///
    /// Connections whose other card lives in a workspace the user can not read are left out.
    pub async fn list_for_card(
        &self,
        card_id: &CardId,
        principal: &Principal,
    ) -> Result<Vec<Connection>, ConnectionError> {
        let actor = authenticated(principal)?;
        let card = self
            .cards
            .get_by_id(card_id)
            .await?
            .ok_or(ConnectionError::CardNotFound(*card_id))?;
        self.auth
            .require_access(
                &actor,
                &card.workspace_id,
                &Permission::CONNECTION_READ,
                "not allowed to read connections of card",
            )
            .await?;

        let connections = self.store.connections_for_card(card_id).await?;

        let other_ids: Vec<CardId> = connections
            .iter()
            .map(|connection| other_end(connection, card_id))
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let others = self.card_map(&other_ids).await?;
        let workspace_ids: Vec<_> = others.values().map(|card| card.workspace_id).collect();
        let readable = self
            .auth
            .has_access_batch(&actor, &workspace_ids, &Permission::CONNECTION_READ)
            .await?;

        Ok(connections
            .into_iter()
            .filter(|connection| {
                others
                    .get(&other_end(connection, card_id))
                    .and_then(|card| readable.get(&card.workspace_id))
                    .copied()
                    .unwrap_or(false)
            })
            .collect())
    }

    pub async fn create(
        &self,
        input: CreateConnection,
        principal: &Principal,
    ) -> Result<Connection, ConnectionError> {
        let actor = authenticated(principal)?;
        let (source, target) = self
            .endpoints(&input.source_card_id, &input.target_card_id)
            .await?;
        self.auth
            .require_access_batch(
                &actor,
                &[source.workspace_id, target.workspace_id],
                &Permission::CONNECTION_CREATE,
                "not allowed to create connection",
            )
            .await?;
        self.validate_new(&input).await?;

        let connection = input.into_connection(actor, Timestamp::now());
        self.write_insert(&connection).await?;
        debug!(id = %connection.id, actor = %actor, workspace = %source.workspace_id, "created connection");

        self.events
            .publish(Event::new(
                source.workspace_id,
                Payload::ConnectionCreated(connection.clone()),
            ))
            .await;
        Ok(connection)
    }

    pub async fn update(
        &self,
        id: &ConnectionId,
        changes: UpdateConnection,
        principal: &Principal,
    ) -> Result<Connection, ConnectionError> {
        let actor = authenticated(principal)?;
        let existing = self.existing(id).await?;
        let (source, target) = self
            .endpoints(&existing.source_card_id, &existing.target_card_id)
            .await?;
        self.auth
            .require_access_batch(
                &actor,
                &[source.workspace_id, target.workspace_id],
                &Permission::CONNECTION_UPDATE,
                "not allowed to update connection",
            )
            .await?;

        let updated = changes.apply(&existing, Timestamp::now());
        self.validate_update(&existing, &updated).await?;
        self.write_update(&updated).await?;
        debug!(%id, actor = %actor, workspace = %source.workspace_id, "updated connection");

        self.events
            .publish(Event::new(
                source.workspace_id,
                Payload::ConnectionUpdated(updated.clone()),
            ))
            .await;
        Ok(updated)
    }

    /// Delete a connection and return its last state.
    pub async fn delete(
        &self,
        id: &ConnectionId,
        principal: &Principal,
    ) -> Result<Connection, ConnectionError> {
        let actor = authenticated(principal)?;
        let existing = self.existing(id).await?;
        let (source, target) = self
            .endpoints(&existing.source_card_id, &existing.target_card_id)
            .await?;
        self.auth
            .require_access_batch(
                &actor,
                &[source.workspace_id, target.workspace_id],
                &Permission::CONNECTION_DELETE,
                "not allowed to delete connection",
            )
            .await?;

        // Routing scope is captured while the connection still exists.
        let cards = HashMap::from([(source.id, source.clone())]);
        let scope = ConnectionScope::resolve([&existing], &cards);

        self.write_delete(id).await?;
        debug!(%id, actor = %actor, workspace = %source.workspace_id, "deleted connection");

        if let Some(workspace_id) = scope.workspace_of(id) {
            self.events
                .publish(Event::new(
                    workspace_id,
                    Payload::ConnectionDeleted(existing.clone()),
                ))
                .await;
        }
        Ok(existing)
    }

    async fn existing(&self, id: &ConnectionId) -> Result<Connection, ConnectionError> {
        self.store
            .connection(id)
            .await?
            .ok_or(ConnectionError::ConnectionNotFound(*id))
    }

    /// Look up both cards of a connection with a single batched call.
    async fn endpoints(
        &self,
        source_card_id: &CardId,
        target_card_id: &CardId,
    ) -> Result<(Card, Card), ConnectionError> {
        let mut cards = self.card_map(&[*source_card_id, *target_card_id]).await?;
        let source = cards
            .get(source_card_id)
            .cloned()
            .ok_or(ConnectionError::CardNotFound(*source_card_id))?;
        let target = cards
            .remove(target_card_id)
            .ok_or(ConnectionError::CardNotFound(*target_card_id))?;
        Ok((source, target))
    }

    async fn card_map(&self, ids: &[CardId]) -> Result<HashMap<CardId, Card>, ConnectionError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let cards = self.cards.get_by_ids(ids).await?;
        Ok(cards.into_iter().map(|card| (card.id, card)).collect())
    }

    async fn validate_new(&self, input: &CreateConnection) -> Result<(), ConnectionError> {
        validate_fields(&input.connection_type, input.confidence)?;

        if !self.config.allow_self_connections && input.source_card_id == input.target_card_id {
            return Err(ValidationError::SelfConnection.into());
        }

        if !self.config.allow_duplicate_connections
            && self
                .store
                .has_parallel_connection(
                    &input.source_card_id,
                    &input.target_card_id,
                    &input.connection_type,
                )
                .await?
        {
            return Err(ValidationError::DuplicateConnection(input.connection_type.clone()).into());
        }

        Ok(())
    }

    async fn validate_update(
        &self,
        existing: &Connection,
        updated: &Connection,
    ) -> Result<(), ConnectionError> {
        validate_fields(&updated.connection_type, updated.confidence)?;

        if !self.config.allow_duplicate_connections
            && existing.connection_type != updated.connection_type
            && self
                .store
                .has_parallel_connection(
                    &updated.source_card_id,
                    &updated.target_card_id,
                    &updated.connection_type,
                )
                .await?
        {
            return Err(
                ValidationError::DuplicateConnection(updated.connection_type.clone()).into(),
            );
        }

        Ok(())
    }

    /// Insert a connection, rejected rows surface as validation errors.
    async fn write_insert(&self, connection: &Connection) -> Result<(), ConnectionError> {
        atomically(&self.store, async |store| store.insert_connection(connection).await)
            .await
            .map_err(|err| {
                if err.is_unique_violation() {
                    ValidationError::DuplicateConnection(connection.connection_type.clone()).into()
                } else {
                    ConnectionError::Store(err)
                }
            })
    }

    async fn write_update(&self, connection: &Connection) -> Result<(), ConnectionError> {
        let updated =
            atomically(&self.store, async |store| store.update_connection(connection).await)
                .await?;
        if !updated {
            return Err(ConnectionError::ConnectionNotFound(connection.id));
        }
        Ok(())
    }

    async fn write_delete(&self, id: &ConnectionId) -> Result<(), ConnectionError> {
        let deleted = atomically(&self.store, async |store| store.delete_connection(id).await).await?;
        if !deleted {
            return Err(ConnectionError::ConnectionNotFound(*id));
        }
        Ok(())
    }
}

fn validate_fields(connection_type: &str, confidence: f64) -> Result<(), ValidationError> {
    if connection_type.trim().is_empty() {
        return Err(ValidationError::EmptyConnectionType);
    }

    if !(0.0..=1.0).contains(&confidence) {
        return Err(ValidationError::Confidence(confidence));
    }

    Ok(())
}

fn other_end(connection: &Connection, card_id: &CardId) -> CardId {
    if &connection.source_card_id == card_id {
        connection.target_card_id
    } else {
        connection.source_card_id
    }
}
