// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Retry policy for failed region transfers.

use std::time::Duration;

/// Exponential backoff keyed on a record's attempt count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum attempts per region before it stays failed.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles for each further attempt.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Whether a record that has failed `attempts` times may run again.
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Wait required after the `attempts`-th failure: `base * 2^(attempts-1)`.
    pub fn delay_after(&self, attempts: u32) -> Duration {
        if attempts == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(attempts - 1).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Milliseconds until a record last attempted at `last_attempt_ms` may
    /// run again, or zero if it is ready now.
    pub fn remaining_wait(&self, attempts: u32, last_attempt_ms: i64, now_ms: i64) -> Duration {
        let delay = self.delay_after(attempts).as_millis() as i64;
        let ready_at = last_attempt_ms.saturating_add(delay);
        if now_ms >= ready_at {
            Duration::ZERO
        } else {
            Duration::from_millis((ready_at - now_ms) as u64)
        }
    }
}
