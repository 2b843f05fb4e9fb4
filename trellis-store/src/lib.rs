// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite persistence for the rows owned by trellis: connections between cards, workspace
//! memberships and invitations.
//!
//! All writes run inside the single transaction slot of [`SqliteStore`], started with
//! [`Transaction::begin`]. Reads use the connection pool and only observe committed state.
pub mod connections;
pub mod invites;
pub mod members;
pub mod sqlite;
pub mod traits;

pub use connections::ConnectionStore;
pub use invites::{AcceptOutcome, InviteStore};
pub use members::MemberStore;
pub use sqlite::{
    DecodeError, SqliteError, SqliteStore, SqliteStoreBuilder, SqliteTransaction,
    TransactionPermit,
};
pub use traits::Transaction;
