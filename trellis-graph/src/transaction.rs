// SPDX-License-Identifier: MIT OR Apache-2.0

use tracing::warn;
use trellis_store::{SqliteError, SqliteStore, Transaction};

/// Run writes inside one transaction, committing on success and rolling back on error.
pub(crate) async fn atomically<F, R>(store: &SqliteStore, f: F) -> Result<R, SqliteError>
where
    F: AsyncFnOnce(&SqliteStore) -> Result<R, SqliteError>,
{
    let permit = store.begin().await?;
    match f(store).await {
        Ok(value) => {
            store.commit(permit).await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = store.rollback(permit).await {
                warn!(%rollback_err, "failed rolling back transaction");
            }
            Err(err)
        }
    }
}
