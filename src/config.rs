//! # Polling Configuration
//!
//! Configuration value types for registered tasks and for the scheduler as a
//! whole. Task configuration is an immutable value: partial updates build a
//! fresh [`PollingConfig`] via [`PollingConfigUpdate::apply`] rather than
//! mutating fields piecemeal, so a task never observes a half-applied update.

use crate::error::{PollerError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-task polling configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Base interval between executions. Must be greater than zero.
    pub interval: Duration,

    /// Whether the task is scheduled at all. A disabled task keeps its
    /// registration and state but never arms a timer.
    pub enabled: bool,

    /// Pause this task while the execution context is inactive.
    pub pause_on_inactive: bool,

    /// Consecutive failures before the circuit opens and automatic
    /// scheduling stops. Zero disables the breaker.
    pub circuit_breaker_threshold: u32,

    /// Double the retry delay after each consecutive failure (capped).
    pub exponential_backoff: bool,

    /// Store successful results in the last-known-good cache.
    pub enable_caching: bool,

    /// Freshness window for cached results.
    pub cache_ttl: Duration,

    /// Raise alerts for failures, circuit transitions, and recovery.
    pub enable_alerts: bool,

    /// On failure, fall back to the cached result when one exists.
    pub graceful_degradation: bool,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            enabled: true,
            pause_on_inactive: true,
            circuit_breaker_threshold: 5,
            exponential_backoff: true,
            enable_caching: true,
            cache_ttl: Duration::from_secs(300),
            enable_alerts: true,
            graceful_degradation: true,
        }
    }
}

impl PollingConfig {
    /// Validate invariants that registration depends on.
    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(PollerError::ConfigurationError(
                "interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Partial configuration update.
///
/// Every field is optional; unset fields keep their current value. Applying
/// an update produces a new [`PollingConfig`] value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollingConfigUpdate {
    pub interval: Option<Duration>,
    pub enabled: Option<bool>,
    pub pause_on_inactive: Option<bool>,
    pub circuit_breaker_threshold: Option<u32>,
    pub exponential_backoff: Option<bool>,
    pub enable_caching: Option<bool>,
    pub cache_ttl: Option<Duration>,
    pub enable_alerts: Option<bool>,
    pub graceful_degradation: Option<bool>,
}

impl PollingConfigUpdate {
    /// Structural merge: build the updated configuration from `base`.
    pub fn apply(&self, base: &PollingConfig) -> PollingConfig {
        PollingConfig {
            interval: self.interval.unwrap_or(base.interval),
            enabled: self.enabled.unwrap_or(base.enabled),
            pause_on_inactive: self.pause_on_inactive.unwrap_or(base.pause_on_inactive),
            circuit_breaker_threshold: self
                .circuit_breaker_threshold
                .unwrap_or(base.circuit_breaker_threshold),
            exponential_backoff: self.exponential_backoff.unwrap_or(base.exponential_backoff),
            enable_caching: self.enable_caching.unwrap_or(base.enable_caching),
            cache_ttl: self.cache_ttl.unwrap_or(base.cache_ttl),
            enable_alerts: self.enable_alerts.unwrap_or(base.enable_alerts),
            graceful_degradation: self
                .graceful_degradation
                .unwrap_or(base.graceful_degradation),
        }
    }

    /// Whether applying this update changes the circuit breaker threshold.
    /// A changed threshold is treated as an implicit circuit reset.
    pub fn resets_circuit(&self, base: &PollingConfig) -> bool {
        matches!(self.circuit_breaker_threshold, Some(t) if t != base.circuit_breaker_threshold)
    }
}

/// Crate-level scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// Maximum number of alerts retained by the alert sink.
    pub max_alerts: usize,

    /// Capacity of the alert broadcast channel.
    pub alert_channel_capacity: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            max_alerts: 50,
            alert_channel_capacity: 256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(PollingConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_interval_is_rejected() {
        let config = PollingConfig {
            interval: Duration::ZERO,
            ..PollingConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(PollerError::ConfigurationError(_))
        ));
    }

    #[test]
    fn partial_update_merges_only_set_fields() {
        let base = PollingConfig::default();
        let update = PollingConfigUpdate {
            interval: Some(Duration::from_secs(5)),
            enable_caching: Some(false),
            ..PollingConfigUpdate::default()
        };

        let merged = update.apply(&base);
        assert_eq!(merged.interval, Duration::from_secs(5));
        assert!(!merged.enable_caching);
        // Untouched fields carry over.
        assert_eq!(merged.circuit_breaker_threshold, base.circuit_breaker_threshold);
        assert_eq!(merged.cache_ttl, base.cache_ttl);
    }

    #[test]
    fn threshold_change_is_a_circuit_reset() {
        let base = PollingConfig::default();

        let same = PollingConfigUpdate {
            circuit_breaker_threshold: Some(base.circuit_breaker_threshold),
            ..PollingConfigUpdate::default()
        };
        assert!(!same.resets_circuit(&base));

        let changed = PollingConfigUpdate {
            circuit_breaker_threshold: Some(base.circuit_breaker_threshold + 1),
            ..PollingConfigUpdate::default()
        };
        assert!(changed.resets_circuit(&base));

        assert!(!PollingConfigUpdate::default().resets_circuit(&base));
    }
}
