// SPDX-License-Identifier: MIT OR Apache-2.0

mod sqlite;
#[cfg(test)]
mod tests;
mod traits;

pub use traits::ConnectionStore;
