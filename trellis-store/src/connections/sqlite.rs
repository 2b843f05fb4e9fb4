// SPDX-License-Identifier: MIT OR Apache-2.0

use sqlx::{FromRow, query, query_as};
use trellis_core::{CardId, Connection, ConnectionId};

use crate::connections::ConnectionStore;
use crate::sqlite::{SqliteError, SqliteStore, decode};

impl ConnectionStore for SqliteStore {
    type Error = SqliteError;

    async fn connection(&self, id: &ConnectionId) -> Result<Option<Connection>, Self::Error> {
        let row = self
            .execute(async |pool| {
                query_as::<_, ConnectionRow>(
                    "
                    SELECT
                        id,
                        source_card_id,
                        target_card_id,
                        connection_type,
                        confidence,
                        metadata,
                        is_visible,
                        created_by,
                        created_at,
                        updated_at
                    FROM
                        connections
                    WHERE
                        id = ?
                    ",
                )
                .bind(id.to_hex())
                .fetch_optional(pool)
                .await
                .map_err(SqliteError::Sqlite)
            })
            .await?;

        row.map(Connection::try_from).transpose()
    }

    async fn connections_for_card(&self, card_id: &CardId) -> Result<Vec<Connection>, Self::Error> {
        let rows = self
            .execute(async |pool| {
                query_as::<_, ConnectionRow>(
                    "
                    SELECT
                        id,
                        source_card_id,
                        target_card_id,
                        connection_type,
                        confidence,
                        metadata,
                        is_visible,
                        created_by,
                        created_at,
                        updated_at
                    FROM
                        connections
                    WHERE
                        source_card_id = ?1
                        OR target_card_id = ?1
                    ORDER BY
                        created_at
                    ",
                )
                .bind(card_id.to_hex())
                .fetch_all(pool)
                .await
                .map_err(SqliteError::Sqlite)
            })
            .await?;

        rows.into_iter().map(Connection::try_from).collect()
    }

    async fn has_parallel_connection(
        &self,
        source_card_id: &CardId,
        target_card_id: &CardId,
        connection_type: &str,
    ) -> Result<bool, Self::Error> {
        let result = self
            .execute(async |pool| {
                query(
                    "
                    SELECT
                        1
                    FROM
                        connections
                    WHERE
                        source_card_id = ?
                        AND target_card_id = ?
                        AND connection_type = ?
                    ",
                )
                .bind(source_card_id.to_hex())
                .bind(target_card_id.to_hex())
                .bind(connection_type)
                .fetch_optional(pool)
                .await
                .map_err(SqliteError::Sqlite)
            })
            .await?;
        Ok(result.is_some())
    }

    async fn insert_connection(&self, connection: &Connection) -> Result<(), Self::Error> {
        let metadata = encode_metadata(connection)?;
        self.tx(async |tx| {
            query(
                "
                INSERT
                INTO
                    connections (
                        id,
                        source_card_id,
                        target_card_id,
                        connection_type,
                        confidence,
                        metadata,
                        is_visible,
                        created_by,
                        created_at,
                        updated_at
                    )
                VALUES
                    (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ",
            )
            .bind(connection.id.to_hex())
            .bind(connection.source_card_id.to_hex())
            .bind(connection.target_card_id.to_hex())
            .bind(&connection.connection_type)
            .bind(connection.confidence)
            .bind(metadata)
            .bind(connection.is_visible)
            .bind(connection.created_by.to_hex())
            .bind(i64::from(connection.created_at))
            .bind(i64::from(connection.updated_at))
            .execute(&mut **tx)
            .await
            .map_err(SqliteError::Sqlite)
        })
        .await?;
        Ok(())
    }

    async fn update_connection(&self, connection: &Connection) -> Result<bool, Self::Error> {
        let metadata = encode_metadata(connection)?;
        let result = self
            .tx(async |tx| {
                query(
                    "
                    UPDATE
                        connections
                    SET
                        connection_type = ?,
                        confidence = ?,
                        metadata = ?,
                        is_visible = ?,
                        updated_at = ?
                    WHERE
                        id = ?
                    ",
                )
                .bind(&connection.connection_type)
                .bind(connection.confidence)
                .bind(metadata)
                .bind(connection.is_visible)
                .bind(i64::from(connection.updated_at))
                .bind(connection.id.to_hex())
                .execute(&mut **tx)
                .await
                .map_err(SqliteError::Sqlite)
            })
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_connection(&self, id: &ConnectionId) -> Result<bool, Self::Error> {
        let result = self
            .tx(async |tx| {
                query(
                    "
                    DELETE FROM
                        connections
                    WHERE
                        id = ?
                    ",
                )
                .bind(id.to_hex())
                .execute(&mut **tx)
                .await
                .map_err(SqliteError::Sqlite)
            })
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn encode_metadata(connection: &Connection) -> Result<Option<String>, SqliteError> {
    connection
        .metadata
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|err| SqliteError::Encode("metadata".to_string(), err))
}

#[derive(Debug, FromRow)]
struct ConnectionRow {
    id: String,
    source_card_id: String,
    target_card_id: String,
    connection_type: String,
    confidence: f64,
    metadata: Option<String>,
    is_visible: bool,
    created_by: String,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<ConnectionRow> for Connection {
    type Error = SqliteError;

    fn try_from(row: ConnectionRow) -> Result<Self, Self::Error> {
        Ok(Connection {
            id: decode("id", row.id.parse())?,
            source_card_id: decode("source_card_id", row.source_card_id.parse())?,
            target_card_id: decode("target_card_id", row.target_card_id.parse())?,
            connection_type: row.connection_type,
            confidence: row.confidence,
            metadata: row
                .metadata
                .map(|value| decode("metadata", serde_json::from_str(&value)))
                .transpose()?,
            is_visible: row.is_visible,
            created_by: decode("created_by", row.created_by.parse())?,
            created_at: row.created_at.into(),
            updated_at: row.updated_at.into(),
        })
    }
}
