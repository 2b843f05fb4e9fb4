// SPDX-License-Identifier: MIT OR Apache-2.0

//! Identifiers of records owned by this system or by its collaborators.
use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Size of every record identifier in bytes.
pub const ID_LEN: usize = 16;

/// Size of an invitation token in bytes.
pub const TOKEN_LEN: usize = 32;

macro_rules! identifier {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name([u8; ID_LEN]);

        impl $name {
            /// Generate a new, random identifier.
            pub fn random() -> Self {
                Self(rand::random())
            }

            pub const fn from_bytes(bytes: [u8; ID_LEN]) -> Self {
                Self(bytes)
            }

            pub fn as_bytes(&self) -> &[u8; ID_LEN] {
                &self.0
            }

            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.to_hex())
            }
        }

        impl From<[u8; ID_LEN]> for $name {
            fn from(bytes: [u8; ID_LEN]) -> Self {
                Self(bytes)
            }
        }

        impl FromStr for $name {
            type Err = IdentifierError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                Ok(Self(decode_hex(value)?))
            }
        }
    };
}

identifier!(
    /// Identifier of a user account, owned by the user directory.
    UserId
);

identifier!(
    /// Identifier of a workspace, the top-level authorization boundary.
    WorkspaceId
);

identifier!(
    /// Identifier of a card (graph node), owned by the card repository.
    CardId
);

identifier!(
    /// Identifier of a connection (graph edge) between two cards.
    ConnectionId
);

identifier!(
    /// Identifier of a workspace invitation.
    InviteId
);

/// Unguessable secret which is the sole credential needed to accept or reject an invitation.
///
/// The token is 32 bytes drawn from a cryptographically secure random number generator and
/// encoded as hex when stored or sent out. `Debug` output is redacted so tokens don't end up in
/// logs.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InviteToken([u8; TOKEN_LEN]);

impl InviteToken {
    pub fn random() -> Self {
        // `ThreadRng` is a CSPRNG periodically reseeded from the operating system.
        Self(rand::random())
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl Debug for InviteToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "InviteToken(..)")
    }
}

impl Display for InviteToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for InviteToken {
    type Err = IdentifierError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(Self(decode_hex(value)?))
    }
}

fn decode_hex<const N: usize>(value: &str) -> Result<[u8; N], IdentifierError> {
    let bytes = hex::decode(value)?;
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_| IdentifierError::InvalidLength(len, N))
}

#[derive(Debug, Error)]
pub enum IdentifierError {
    #[error("invalid hex encoding: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("invalid length {0}, expected {1} bytes")]
    InvalidLength(usize, usize),
}
