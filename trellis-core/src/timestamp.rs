// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fmt::Display;
use std::hash::Hash as StdHash;
use std::ops::Add;
use std::time::Duration;
#[cfg(not(any(test, feature = "test_utils")))]
use std::time::{SystemTime, UNIX_EPOCH};

#[cfg(any(test, feature = "test_utils"))]
use mock_instant::thread_local::{SystemTime, UNIX_EPOCH};
use serde::{Deserialize, Serialize};

/// Microseconds since the UNIX epoch based on system time.
///
/// When compiled for tests (or with the `test_utils` feature) the clock is backed by
/// `mock_instant`'s thread-local `MockClock`, which allows moving time forwards to exercise
/// invitation expiry and throttling windows.
#[derive(
    Copy, Clone, Default, Debug, PartialEq, Eq, PartialOrd, Ord, StdHash, Serialize, Deserialize,
)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const fn from_micros(value: u64) -> Self {
        Self(value)
    }

    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time went backwards");
        Self(duration.as_micros() as u64)
    }

    pub fn as_micros(&self) -> u64 {
        self.0
    }

    /// Time elapsed between an earlier timestamp and this one, zero if `earlier` is in fact later.
    pub fn duration_since(&self, earlier: Timestamp) -> Duration {
        Duration::from_micros(self.0.saturating_sub(earlier.0))
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Duration) -> Self::Output {
        Self(self.0.saturating_add(rhs.as_micros() as u64))
    }
}

impl From<Timestamp> for u64 {
    fn from(value: Timestamp) -> Self {
        value.0
    }
}

impl From<u64> for Timestamp {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

// SQLite only knows signed 64-bit integers, microseconds fit comfortably until the year 294247.
impl From<Timestamp> for i64 {
    fn from(value: Timestamp) -> Self {
        value.0 as i64
    }
}

impl From<i64> for Timestamp {
    fn from(value: i64) -> Self {
        Self(value.max(0) as u64)
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
