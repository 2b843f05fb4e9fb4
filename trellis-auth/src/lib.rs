// SPDX-License-Identifier: MIT OR Apache-2.0

//! Decides whether a user holds a permission in a workspace and bounds how often sensitive
//! operations may be attempted.
//!
//! How grants are derived from ownership and membership is pluggable through
//! [`PermissionEvaluator`]. [`RoleBased`] layers explicit member grants on top of role defaults,
//! [`OwnerOnly`] only ever grants access to the workspace owner.
mod error;
mod evaluator;
mod service;
#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;
mod throttle;

pub use error::{AuthError, AuthorizationError, authenticated};
pub use evaluator::{OwnerOnly, PermissionEvaluator, RoleBased};
pub use service::AuthorizationService;
pub use throttle::{OWNERSHIP_TRANSFER, RateLimitError, RateLimitPolicy, RateLimiter};
