// SPDX-License-Identifier: MIT OR Apache-2.0

use thiserror::Error;
use trellis_auth::{AuthError, AuthorizationError, RateLimitError};
use trellis_core::traits::LookupError;
use trellis_core::{CardId, ConnectionId, UserId};
use trellis_store::SqliteError;

/// Invalid input or a request conflicting with the current state.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum ValidationError {
    #[error("confidence {0} is not within 0.0 and 1.0")]
    Confidence(f64),

    #[error("connection type can not be empty")]
    EmptyConnectionType,

    #[error("a card can not be connected to itself")]
    SelfConnection,

    #[error("a '{0}' connection between these cards already exists")]
    DuplicateConnection(String),

    #[error("'{0}' is not a valid email address")]
    InvalidEmail(String),

    #[error("a pending invitation for this email address already exists")]
    DuplicateInvite,

    #[error("user is already a member of this workspace")]
    AlreadyMember,

    #[error("ownership can not be granted through an invitation")]
    OwnerInvite,

    #[error("the permission to transfer ownership can not be granted through an invitation")]
    TransferGrant,

    #[error("invitation expired")]
    InviteExpired,

    #[error("invitation was sent to a different email address")]
    EmailMismatch,

    #[error("owner role can only be assigned by transferring ownership")]
    OwnerAssignment,

    #[error("role of the workspace owner only changes by transferring ownership")]
    OwnerRoleChange,

    #[error("the workspace owner can not be removed")]
    RemoveOwner,

    #[error("user already owns this workspace")]
    AlreadyOwner,
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("authentication required")]
    Unauthenticated,

    #[error(transparent)]
    Unauthorized(#[from] AuthorizationError),

    #[error("card {0} not found")]
    CardNotFound(CardId),

    #[error("connection {0} not found")]
    ConnectionNotFound(ConnectionId),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Lookup(#[from] LookupError),

    #[error(transparent)]
    Store(#[from] SqliteError),
}

#[derive(Debug, Error)]
pub enum InvitationError {
    #[error("authentication required")]
    Unauthenticated,

    #[error(transparent)]
    Unauthorized(#[from] AuthorizationError),

    #[error("invitation not found")]
    InviteNotFound,

    #[error("user {0} not found")]
    UserNotFound(UserId),

    /// Invitation was accepted, rejected, cancelled or expired by a concurrent request.
    #[error("invitation was already processed")]
    AlreadyProcessed,

    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Atomic acceptance failed and was rolled back.
    #[error("accepting invitation failed: {0}")]
    Transaction(#[source] SqliteError),

    #[error(transparent)]
    Lookup(#[from] LookupError),

    #[error(transparent)]
    Store(#[from] SqliteError),
}

#[derive(Debug, Error)]
pub enum MembershipError {
    #[error("authentication required")]
    Unauthenticated,

    #[error(transparent)]
    Unauthorized(#[from] AuthorizationError),

    #[error("user {0} is not an active member of this workspace")]
    MemberNotFound(UserId),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    RateLimited(#[from] RateLimitError),

    /// Multi-step membership change failed and was rolled back.
    #[error("changing membership failed: {0}")]
    Transaction(#[source] SqliteError),

    #[error(transparent)]
    Lookup(#[from] LookupError),

    #[error(transparent)]
    Store(#[from] SqliteError),
}

macro_rules! from_auth_error {
    ($name:ident) => {
        impl From<AuthError> for $name {
            fn from(err: AuthError) -> Self {
                match err {
                    AuthError::Unauthenticated => $name::Unauthenticated,
                    AuthError::Unauthorized(err) => $name::Unauthorized(err),
                    AuthError::Lookup(err) => $name::Lookup(err),
                    AuthError::Store(err) => $name::Store(err),
                }
            }
        }
    };
}

from_auth_error!(ConnectionError);
from_auth_error!(InvitationError);
from_auth_error!(MembershipError);
