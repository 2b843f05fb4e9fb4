// SPDX-License-Identifier: MIT OR Apache-2.0

use std::error::Error;

/// Unit-of-work provider for multi-statement atomic commits.
///
/// Holding a transaction is made explicit with a "permit" which is handed out by `begin` and
/// consumed by either `commit` or `rollback`. This does not protect against misuse but makes it
/// visible in the calling code which part of a workflow runs inside a transaction.
pub trait Transaction {
    type Error: Error;

    type Permit;

    /// Begins a transaction.
    fn begin(&self) -> impl Future<Output = Result<Self::Permit, Self::Error>>;

    /// Rolls back the transaction and with that all uncommitted changes.
    fn rollback(&self, permit: Self::Permit) -> impl Future<Output = Result<(), Self::Error>>;

    /// Commits the transaction.
    fn commit(&self, permit: Self::Permit) -> impl Future<Output = Result<(), Self::Error>>;
}
