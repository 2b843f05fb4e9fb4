// SPDX-License-Identifier: MIT OR Apache-2.0

use std::error::Error;

use trellis_core::{CardId, Connection, ConnectionId};

/// Interface for storing, changing and querying connections between cards.
pub trait ConnectionStore {
    type Error: Error;

    fn connection(
        &self,
        id: &ConnectionId,
    ) -> impl Future<Output = Result<Option<Connection>, Self::Error>>;

    /// Get all connections where the card is either source or target.
    fn connections_for_card(
        &self,
        card_id: &CardId,
    ) -> impl Future<Output = Result<Vec<Connection>, Self::Error>>;

    /// Returns `true` if an edge with the same direction and type already exists.
    fn has_parallel_connection(
        &self,
        source_card_id: &CardId,
        target_card_id: &CardId,
        connection_type: &str,
    ) -> impl Future<Output = Result<bool, Self::Error>>;

    /// Insert a connection.
    ///
    /// Fails with a unique violation if a connection with the same id already exists or the row
    /// conflicts with another unique constraint.
    fn insert_connection(
        &self,
        connection: &Connection,
    ) -> impl Future<Output = Result<(), Self::Error>>;

    /// Overwrite the mutable fields (type, confidence, metadata, visibility, updated_at) of a
    /// connection. Source and target are never changed.
    ///
    /// Returns `false` if the connection was not found.
    fn update_connection(
        &self,
        connection: &Connection,
    ) -> impl Future<Output = Result<bool, Self::Error>>;

    /// Returns `false` if the connection was not found.
    fn delete_connection(&self, id: &ConnectionId)
    -> impl Future<Output = Result<bool, Self::Error>>;
}
