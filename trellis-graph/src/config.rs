// SPDX-License-Identifier: MIT OR Apache-2.0

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Validation rules for connections between cards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Allow connections where source and target are the same card.
    ///
    /// Defaults to `true`.
    pub allow_self_connections: bool,

    /// Allow more than one connection of the same type from one card to another.
    ///
    /// Defaults to `true`.
    pub allow_duplicate_connections: bool,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            allow_self_connections: true,
            allow_duplicate_connections: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvitationConfig {
    /// Time after which a pending invitation can not be accepted anymore.
    ///
    /// Defaults to 7 days.
    pub invite_lifetime: Duration,
}

impl Default for InvitationConfig {
    fn default() -> Self {
        Self {
            invite_lifetime: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}
