//! # Backoff & Circuit Policy
//!
//! Pure retry-delay and circuit-trip calculations. The scheduler consults
//! these on every failure path; keeping them stateless makes the retry
//! behavior independently testable.

use std::time::Duration;

/// Hard cap on the exponential backoff multiplier.
pub const MAX_BACKOFF_MULTIPLIER: u32 = 16;

/// Backoff multiplier after `consecutive_failures` failures in a row.
///
/// The first retry fires at the base interval; each subsequent failure
/// doubles the multiplier up to [`MAX_BACKOFF_MULTIPLIER`]:
/// `min(2^(n-1), 16)` for `n >= 1`.
pub fn backoff_multiplier(consecutive_failures: u32) -> u32 {
    if consecutive_failures <= 1 {
        return 1;
    }
    let doublings = consecutive_failures - 1;
    if doublings >= MAX_BACKOFF_MULTIPLIER.trailing_zeros() {
        MAX_BACKOFF_MULTIPLIER
    } else {
        1 << doublings
    }
}

/// Delay before the next retry after `consecutive_failures` failures.
///
/// With exponential backoff disabled the base interval is used unchanged.
pub fn retry_delay(base_interval: Duration, consecutive_failures: u32, exponential: bool) -> Duration {
    if exponential {
        base_interval * backoff_multiplier(consecutive_failures)
    } else {
        base_interval
    }
}

/// Whether the circuit should open given the consecutive-failure count.
///
/// A threshold of zero disables the breaker entirely.
pub fn should_open_circuit(consecutive_failures: u32, threshold: u32) -> bool {
    threshold > 0 && consecutive_failures >= threshold
}
