// SPDX-License-Identifier: MIT OR Apache-2.0

mod sqlite;
mod traits;

pub(crate) use sqlite::upsert_member;
pub use traits::MemberStore;
