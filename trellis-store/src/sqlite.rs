// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite backend of the member, connection and invitation stores.
use std::sync::Arc;

use sqlx::migrate::{MigrateDatabase, Migrator};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Sqlite, migrate};
use thiserror::Error;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::trace;

/// Create SQLite database if it doesn't already exist.
pub async fn create_database(url: &str) -> Result<(), SqliteError> {
    if !Sqlite::database_exists(url).await? {
        Sqlite::create_database(url).await?
    }
    Ok(())
}

/// Drop SQLite database if it exists.
pub async fn drop_database(url: &str) -> Result<(), SqliteError> {
    if Sqlite::database_exists(url).await? {
        Sqlite::drop_database(url).await?
    }
    Ok(())
}

/// Get migrations creating the `workspace_members`, `connections` and `workspace_invites`
/// tables without running them.
pub fn migrations() -> Migrator {
    migrate!()
}

/// Run any pending database migrations from inside the application.
pub async fn run_pending_migrations(pool: &sqlx::SqlitePool) -> Result<(), SqliteError> {
    migrations().run(pool).await?;
    Ok(())
}

pub struct SqliteStoreBuilder {
    url: String,
    max_connections: u32,
    run_migrations: bool,
    create_database: bool,
}

impl Default for SqliteStoreBuilder {
    fn default() -> Self {
        Self {
            url: "sqlite::memory:".into(),
            max_connections: 16,
            create_database: true,
            run_migrations: true,
        }
    }
}

impl SqliteStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(any(test, feature = "test_utils"))]
    pub fn random_memory_url(mut self) -> Self {
        // Every temporary database gets a different, random name to keep tests isolated from each
        // other.
        //
        // See related issue: https://github.com/launchbadge/sqlx/issues/2510
        self.url = format!(
            "sqlite://trellis{}?mode=memory&cache=private",
            rand::random::<u32>()
        );
        self
    }

    pub fn database_url(mut self, url: &str) -> Self {
        self.url = url.to_string();
        self
    }

    pub fn max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn create_database(mut self, create_database: bool) -> Self {
        self.create_database = create_database;
        self
    }

    pub fn run_default_migrations(mut self, run_migrations: bool) -> Self {
        self.run_migrations = run_migrations;
        self
    }

    pub async fn build(self) -> Result<SqliteStore, SqliteError> {
        if self.create_database {
            create_database(&self.url).await?;
        }

        let pool: sqlx::SqlitePool = SqlitePoolOptions::new()
            .max_connections(self.max_connections)
            .connect(&self.url)
            .await?;

        if self.run_migrations {
            run_pending_migrations(&pool).await?;
        }

        Ok(SqliteStore::new(pool))
    }
}

pub type SqliteTransaction = sqlx::Transaction<'static, Sqlite>;

/// Storage of workspace members, connections and invitations.
///
/// Every clone shares one pool and one transaction slot. Store writes (`upsert_member`,
/// `insert_connection`, `accept_invite`, ..) run on the open transaction and fail with
/// [`SqliteError::TransactionMissing`] outside of one. Store reads (`member`, `connection`,
/// `pending_invite_by_token`, ..) never see the open transaction, they run on the pool and only
/// observe committed rows.
///
/// Services therefore follow one order for every mutation:
///
/// ```text
/// read & authorize (pool) -> begin -> write (transaction) -> commit / rollback -> publish
/// ```
///
/// Reading after `begin` is a bug: the write is not visible to it, and with a single pooled
/// connection (as in [`SqliteStore::temporary`]) the read waits for the connection the
/// transaction holds and never returns.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    tx: Arc<Mutex<Option<SqliteTransaction>>>,
    pool: sqlx::SqlitePool,
    semaphore: Arc<Semaphore>,
}

impl SqliteStore {
    pub(crate) fn new(pool: sqlx::SqlitePool) -> Self {
        Self {
            tx: Arc::default(),
            pool,
            // One open transaction per store.
            semaphore: Arc::new(Semaphore::new(1)),
        }
    }

    /// Isolated in-memory database with a single connection, for tests.
    #[cfg(any(test, feature = "test_utils"))]
    pub async fn temporary() -> Self {
        SqliteStoreBuilder::new()
            .random_memory_url()
            .max_connections(1)
            .build()
            .await
            .expect("migrations succeeded")
    }

    /// Run a write on the open transaction.
    ///
    /// Fails with [`SqliteError::TransactionMissing`] when no transaction was started. A failed
    /// write leaves the transaction open, the holder of the permit decides about rolling back.
    pub async fn tx<F, R>(&self, f: F) -> Result<R, SqliteError>
    where
        F: AsyncFnOnce(&mut SqliteTransaction) -> Result<R, SqliteError>,
    {
        let mut tx_ref = self.tx.lock().await;
        let tx = tx_ref.as_mut().ok_or(SqliteError::TransactionMissing)?;

        f(tx).await
    }

    /// Run a read on the pool, outside of any transaction.
    pub async fn execute<F, R>(&self, f: F) -> Result<R, SqliteError>
    where
        F: AsyncFnOnce(&sqlx::SqlitePool) -> Result<R, SqliteError>,
    {
        f(&self.pool).await
    }
}

impl crate::traits::Transaction for SqliteStore {
    type Error = SqliteError;

    type Permit = TransactionPermit;

    /// Open the transaction, waiting until the current holder (if any) finished.
    async fn begin(&self) -> Result<TransactionPermit, SqliteError> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("if semaphore is closed then the whole struct is gone as well");

        let mut tx_ref = self.tx.lock().await;
        assert!(
            tx_ref.is_none(),
            "transaction slot is empty while nobody holds the permit"
        );

        let tx = self.pool.begin().await?;
        tx_ref.replace(tx);
        trace!("begin transaction");

        Ok(TransactionPermit(permit))
    }

    /// Rolls back the transaction and frees the permit, both on success and on error.
    async fn rollback(&self, permit: TransactionPermit) -> Result<(), SqliteError> {
        let Some(tx) = self.tx.lock().await.take() else {
            panic!("can't have no transaction without dropping permit first")
        };

        let result = tx.rollback().await.map_err(SqliteError::Sqlite);
        trace!(ok = result.is_ok(), "rollback transaction");
        drop(permit);

        result
    }

    /// Commits the transaction and frees the permit, both on success and on error.
    async fn commit(&self, permit: TransactionPermit) -> Result<(), SqliteError> {
        let Some(tx) = self.tx.lock().await.take() else {
            panic!("can't have no transaction without dropping permit first")
        };

        let result = tx.commit().await.map_err(SqliteError::Sqlite);
        trace!(ok = result.is_ok(), "commit transaction");
        drop(permit);

        result
    }
}

#[allow(unused)]
pub struct TransactionPermit(OwnedSemaphorePermit);

#[derive(Debug, Error)]
pub enum SqliteError {
    /// Queries writing to the database can only run after a transaction was started. This
    /// indicates wrong usage of the API.
    #[error("tried to interact with inexistant transaction")]
    TransactionMissing,

    /// SQLite database and connection error.
    #[error(transparent)]
    Sqlite(#[from] sqlx::Error),

    /// SQL table schema migration error.
    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// Failed encoding a value before storing it into the database.
    #[error("failed encoding '{0}' value before storing to database: {1}")]
    Encode(String, serde_json::Error),

    /// Invalid, corrupted data was found in the database. This is a critical error.
    #[error("could not decode corrupted '{0}' value from database: {1}")]
    Decode(String, DecodeError),
}

impl SqliteError {
    /// Returns `true` if a UNIQUE or PRIMARY KEY constraint rejected the write.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            SqliteError::Sqlite(sqlx::Error::Database(err)) => err.is_unique_violation(),
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error(transparent)]
    Identifier(#[from] trellis_core::IdentifierError),

    #[error(transparent)]
    Permission(#[from] trellis_core::PermissionError),

    #[error(transparent)]
    InviteStatus(#[from] trellis_core::InviteStatusError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Shorthand to decode a column and attach its name to the error.
pub(crate) fn decode<T, E>(column: &str, result: Result<T, E>) -> Result<T, SqliteError>
where
    E: Into<DecodeError>,
{
    result.map_err(|err| SqliteError::Decode(column.to_string(), err.into()))
}
