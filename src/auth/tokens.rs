//! Token state, expiry evaluation and refresh timing

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Refresh this long before the gateway says the token expires.
pub const REFRESH_MARGIN_SECS: u64 = 60;

/// Floor for the refresh delay when the token lifetime is within the margin.
pub const MIN_REFRESH_DELAY_SECS: u64 = 1;

/// Bearer token triple. Always written as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenState {
    pub access_token: String,
    pub refresh_token: String,
    /// Absolute expiry in epoch milliseconds
    pub token_expiry: i64,
}

impl TokenState {
    /// Build a state from a grant lifetime, measured from `now_ms`.
    pub fn issued(
        access_token: String,
        refresh_token: String,
        expires_in_secs: u64,
        now_ms: i64,
    ) -> Self {
        let lifetime_ms = i64::try_from(expires_in_secs.saturating_mul(1000)).unwrap_or(i64::MAX);
        Self {
            access_token,
            refresh_token,
            token_expiry: now_ms.saturating_add(lifetime_ms),
        }
    }

    /// Whole seconds left before expiry, zero once expired.
    pub fn remaining_secs(&self, now_ms: i64) -> u64 {
        u64::try_from(self.token_expiry.saturating_sub(now_ms) / 1000).unwrap_or(0)
    }
}

/// True iff an access token is present and `now_ms` is strictly before expiry.
pub fn is_valid(state: &TokenState, now_ms: i64) -> bool {
    !state.access_token.is_empty() && now_ms < state.token_expiry
}

/// Delay before the next refresh for a token living `expires_in_secs`.
pub fn refresh_delay(expires_in_secs: u64) -> Duration {
    let secs = if expires_in_secs > REFRESH_MARGIN_SECS {
        expires_in_secs - REFRESH_MARGIN_SECS
    } else {
        MIN_REFRESH_DELAY_SECS
    };
    Duration::from_secs(secs.max(MIN_REFRESH_DELAY_SECS))
}

/// Source of wall-clock time in epoch milliseconds.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Format an epoch-millisecond timestamp in local time.
pub fn format_expiry(epoch_ms: i64) -> String {
    match chrono::DateTime::from_timestamp_millis(epoch_ms) {
        Some(utc) => utc
            .with_timezone(&chrono::Local)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string(),
        None => "Unknown".to_string(),
    }
}

#[cfg(test)]
pub use manual::ManualClock;
