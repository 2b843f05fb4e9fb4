// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bounds how often a user may attempt a sensitive operation within a time window.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{trace, warn};
use trellis_core::{Timestamp, UserId};

/// Name of the ownership transfer operation, limited by [`RateLimitPolicy::ownership_transfer`].
pub const OWNERSHIP_TRANSFER: &str = "ownership_transfer";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    /// Number of attempts allowed within one window.
    pub max_requests: u32,

    /// Length of the window, starting with the first attempt.
    pub window: Duration,

    /// Probability of sweeping stale entries, determined on every check.
    ///
    /// ```text
    /// 0.0 = Never sweep
    /// 1.0 = Always sweep
    /// ```
    ///
    /// Defaults to 0.01 (1%) probability.
    pub sweep_probability: f64,
}

impl RateLimitPolicy {
    /// Three attempts per 24 hours.
    pub fn ownership_transfer() -> Self {
        Self {
            max_requests: 3,
            window: Duration::from_secs(24 * 60 * 60),
            ..Default::default()
        }
    }

    /// Sweep probability usable as a Bernoulli parameter, `NaN` never sweeps.
    fn sweep_chance(&self) -> f64 {
        if self.sweep_probability.is_nan() {
            0.0
        } else {
            self.sweep_probability.clamp(0.0, 1.0)
        }
    }
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            max_requests: 10,
            window: Duration::from_secs(60),
            sweep_probability: 0.01, // 1% chance
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error(
    "too many '{operation}' attempts, {max_requests} allowed per {window:?}, retry in {remaining:?}"
)]
pub struct RateLimitError {
    pub operation: String,
    pub max_requests: u32,
    pub window: Duration,

    /// Time until the current window closes.
    pub remaining: Duration,
}

#[derive(Clone, Debug)]
struct RateLimitEntry {
    /// Accepted attempts in the current window.
    count: u32,
    rejected: u32,
    first_request: Timestamp,
    last_request: Timestamp,
    window: Duration,
}

struct RateLimiterState<R> {
    entries: HashMap<String, RateLimitEntry>,
    rng: R,
}

/// Process-local attempt counter keyed by operation and user.
///
/// Each key counts attempts in a window opened by its first attempt. Once the window elapsed the
/// next attempt opens a new one. Stale entries are removed opportunistically during checks.
///
/// Cloned instances share the same counters. Counters are _not_ shared across processes.
pub struct RateLimiter<R = ChaCha20Rng> {
    policies: Arc<HashMap<String, RateLimitPolicy>>,
    default_policy: RateLimitPolicy,
    state: Arc<Mutex<RateLimiterState<R>>>,
}

impl<R> Clone for RateLimiter<R> {
    fn clone(&self) -> Self {
        Self {
            policies: self.policies.clone(),
            default_policy: self.default_policy.clone(),
            state: self.state.clone(),
        }
    }
}

impl<R> std::fmt::Debug for RateLimiter<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("policies", &self.policies)
            .field("default_policy", &self.default_policy)
            .finish_non_exhaustive()
    }
}

impl Default for RateLimiter<ChaCha20Rng> {
    fn default() -> Self {
        Self::new(ChaCha20Rng::from_rng(&mut rand::rng()))
    }
}

impl<R> RateLimiter<R>
where
    R: Rng,
{
    /// Limiter applying the ownership transfer policy to [`OWNERSHIP_TRANSFER`] and the default
    /// policy to every other operation.
    pub fn new(rng: R) -> Self {
        Self {
            policies: Arc::new(HashMap::from([(
                OWNERSHIP_TRANSFER.to_string(),
                RateLimitPolicy::ownership_transfer(),
            )])),
            default_policy: RateLimitPolicy::default(),
            state: Arc::new(Mutex::new(RateLimiterState {
                entries: HashMap::new(),
                rng,
            })),
        }
    }

    /// Set the policy of an operation, replacing an earlier one.
    pub fn with_policy(mut self, operation: &str, policy: RateLimitPolicy) -> Self {
        Arc::make_mut(&mut self.policies).insert(operation.to_string(), policy);
        self
    }

    /// Set the policy of every operation without explicit policy.
    pub fn with_default_policy(mut self, policy: RateLimitPolicy) -> Self {
        self.default_policy = policy;
        self
    }

    pub fn policy(&self, operation: &str) -> &RateLimitPolicy {
        self.policies.get(operation).unwrap_or(&self.default_policy)
    }

    /// Count an attempt of the user and fail if the current window is exhausted.
    ///
    /// Rejected attempts do not count against the limit.
    pub async fn check_limit(&self, user_id: &UserId, operation: &str) -> Result<(), RateLimitError> {
        let policy = self.policy(operation).clone();
        let now = Timestamp::now();
        let key = format!("{operation}:{user_id}");

        let mut state = self.state.lock().await;

        if state.rng.random_bool(policy.sweep_chance()) {
            let before = state.entries.len();
            state
                .entries
                .retain(|_, entry| now.duration_since(entry.first_request) < entry.window);
            trace!(removed = before - state.entries.len(), "swept rate limit entries");
        }

        let entry = state
            .entries
            .entry(key)
            .or_insert_with(|| RateLimitEntry::new(now, policy.window));

        // Window elapsed, the next attempt opens a new one.
        if now.duration_since(entry.first_request) >= policy.window {
            *entry = RateLimitEntry::new(now, policy.window);
        }

        if entry.count >= policy.max_requests {
            entry.rejected += 1;
            entry.last_request = now;
            let remaining = policy
                .window
                .saturating_sub(now.duration_since(entry.first_request));
            warn!(
                target: "trellis::audit",
                operation,
                attempts = entry.attempts(),
                user = %user_id,
                "rate limit exceeded for sensitive operation"
            );
            return Err(RateLimitError {
                operation: operation.to_string(),
                max_requests: policy.max_requests,
                window: policy.window,
                remaining,
            });
        }

        entry.count += 1;
        entry.last_request = now;

        Ok(())
    }

    /// Attempts of the user in the current window of an operation, rejected ones included.
    pub async fn attempts(&self, user_id: &UserId, operation: &str) -> u32 {
        let key = format!("{operation}:{user_id}");
        self.state
            .lock()
            .await
            .entries
            .get(&key)
            .map(RateLimitEntry::attempts)
            .unwrap_or(0)
    }

    /// Forget all attempts of the user for an operation.
    pub async fn reset(&self, user_id: &UserId, operation: &str) {
        let key = format!("{operation}:{user_id}");
        self.state.lock().await.entries.remove(&key);
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }
}

impl RateLimitEntry {
    fn new(now: Timestamp, window: Duration) -> Self {
        Self {
            count: 0,
            rejected: 0,
            first_request: now,
            last_request: now,
            window,
        }
    }

    fn attempts(&self) -> u32 {
        self.count + self.rejected
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;
    use mock_instant::thread_local::MockClock;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;
    use trellis_core::UserId;

    use super::{OWNERSHIP_TRANSFER, RateLimitError, RateLimitPolicy, RateLimiter};

    fn limiter() -> RateLimiter<ChaCha20Rng> {
        RateLimiter::new(ChaCha20Rng::from_seed([1; 32]))
    }

    #[tokio::test]
    async fn boundary_of_window() {
        MockClock::set_system_time(Duration::from_secs(1_000));

        let limiter = limiter();
        let user = UserId::random();
        let policy = RateLimitPolicy::ownership_transfer();

        for _ in 0..policy.max_requests {
            limiter.check_limit(&user, OWNERSHIP_TRANSFER).await.unwrap();
            MockClock::advance_system_time(Duration::from_secs(60));
        }

        let result = limiter.check_limit(&user, OWNERSHIP_TRANSFER).await;
        assert_matches!(result, Err(RateLimitError { max_requests: 3, window, remaining, .. }) => {
            assert_eq!(window, policy.window);
            assert!(remaining <= window);
            assert_eq!(remaining, window - Duration::from_secs(3 * 60));
        });

        assert!(limiter.check_limit(&user, OWNERSHIP_TRANSFER).await.is_err());
        assert_eq!(limiter.attempts(&user, OWNERSHIP_TRANSFER).await, 5);

        // Rejected attempts do not extend the window.
        MockClock::advance_system_time(policy.window - Duration::from_secs(3 * 60));
        limiter.check_limit(&user, OWNERSHIP_TRANSFER).await.unwrap();
        assert_eq!(limiter.attempts(&user, OWNERSHIP_TRANSFER).await, 1);
    }

    #[tokio::test]
    async fn keyed_by_user_and_operation() {
        MockClock::set_system_time(Duration::from_secs(1_000));

        let limiter = limiter().with_policy(
            "export",
            RateLimitPolicy {
                max_requests: 1,
                window: Duration::from_secs(10),
                sweep_probability: 0.0,
            },
        );
        let alice = UserId::random();
        let bob = UserId::random();

        limiter.check_limit(&alice, "export").await.unwrap();
        assert!(limiter.check_limit(&alice, "export").await.is_err());
        limiter.check_limit(&bob, "export").await.unwrap();
        limiter.check_limit(&alice, OWNERSHIP_TRANSFER).await.unwrap();

        limiter.reset(&alice, "export").await;
        limiter.check_limit(&alice, "export").await.unwrap();
    }

    #[tokio::test]
    async fn sweeps_stale_entries() {
        MockClock::set_system_time(Duration::from_secs(1_000));

        let limiter = limiter().with_default_policy(RateLimitPolicy {
            max_requests: 5,
            window: Duration::from_secs(10),
            sweep_probability: 1.0,
        });

        for _ in 0..4 {
            limiter.check_limit(&UserId::random(), "comment").await.unwrap();
        }
        assert_eq!(limiter.len().await, 4);

        MockClock::advance_system_time(Duration::from_secs(11));
        limiter.check_limit(&UserId::random(), "comment").await.unwrap();
        assert_eq!(limiter.len().await, 1);
    }

    #[tokio::test]
    async fn invalid_sweep_probability_never_sweeps() {
        MockClock::set_system_time(Duration::from_secs(1_000));

        let limiter = limiter().with_default_policy(RateLimitPolicy {
            max_requests: 5,
            window: Duration::from_secs(10),
            sweep_probability: f64::NAN,
        });

        limiter.check_limit(&UserId::random(), "comment").await.unwrap();
        MockClock::advance_system_time(Duration::from_secs(11));
        limiter.check_limit(&UserId::random(), "comment").await.unwrap();
        assert_eq!(limiter.len().await, 2);
    }
}
