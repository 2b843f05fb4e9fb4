// SPDX-License-Identifier: MIT OR Apache-2.0

mod sqlite;
mod traits;

pub use traits::{AcceptOutcome, InviteStore};
