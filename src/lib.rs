#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Poller Core
//!
//! Adaptive task scheduler: repeatedly invokes independently-registered
//! asynchronous operations ("polling tasks") on configurable intervals while
//! protecting the surrounding application from wasted work, runaway retries,
//! and spurious alarms when those operations fail.
//!
//! ## Architecture
//!
//! - [`scheduler`]: the [`PollingScheduler`]: task registry, per-task
//!   timers, execution steps, visibility reactions
//! - [`backoff`]: pure exponential-backoff and circuit-trip policy
//! - [`cache`]: last-known-good result cache for graceful degradation
//! - [`alerts`]: deduplicating, bounded alert sink with broadcast fan-out
//! - [`visibility`]: the foreground/active signal tasks can pause on
//! - [`config`]: immutable task configuration with partial-update merging
//! - [`error`]: structured error handling
//! - [`logging`]: tracing-subscriber initialization
//!
//! ## Key Behaviors
//!
//! - **Exponential backoff**: retry delays double after each consecutive
//!   failure, capped at 16× the base interval.
//! - **Circuit breaking**: after the configured number of consecutive
//!   failures, automatic scheduling stops until an explicit reset or a
//!   successful forced refresh.
//! - **Graceful degradation**: when a task fails but a cached result exists,
//!   the task keeps reporting the cached value and warns once it goes stale.
//! - **Visibility-driven suspension**: tasks opt in to pausing while the
//!   execution context is inactive, resuming on the next active transition.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use poller_core::{PollingConfig, PollingScheduler, VisibilityGate};
//! use serde_json::json;
//! use std::time::Duration;
//!
//! # async fn example() -> poller_core::Result<()> {
//! let gate = VisibilityGate::new(true);
//! let scheduler = PollingScheduler::new(gate.clone());
//!
//! scheduler.register(
//!     "metrics",
//!     || async { Ok(json!({"cpu": 0.42})) },
//!     PollingConfig {
//!         interval: Duration::from_secs(10),
//!         ..PollingConfig::default()
//!     },
//! )?;
//!
//! // Later: inspect health and cached results.
//! let stats = scheduler.get_error_stats("metrics");
//! let cached = scheduler.get_cached_data("metrics");
//! # let _ = (stats, cached);
//! # Ok(())
//! # }
//! ```

pub mod alerts;
pub mod backoff;
pub mod cache;
pub mod config;
pub mod error;
pub mod logging;
pub mod scheduler;
pub mod visibility;

pub use alerts::{
    Alert, AlertAction, AlertKind, AlertLevel, AlertMetadata, AlertSeverity, AlertSink,
    SystemNotifier,
};
pub use backoff::MAX_BACKOFF_MULTIPLIER;
pub use cache::{CacheEntry, CacheStore};
pub use config::{PollingConfig, PollingConfigUpdate, SchedulerSettings};
pub use error::{PollerError, Result};
pub use scheduler::{ErrorStats, PollingScheduler, TaskRegistration, TaskState};
pub use visibility::VisibilityGate;
