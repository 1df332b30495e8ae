//! Task records, state, and read-only snapshot types.

use crate::config::PollingConfig;
use crate::error::Result;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// The polled operation. Owned exclusively by its task registration;
/// replacing the registration replaces the callback atomically.
pub type TaskCallback = Arc<dyn Fn() -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Mutable task state. Owned and mutated exclusively by the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskState {
    /// Mirrors `config.enabled`; a disabled task keeps its registration.
    pub active: bool,
    /// Timer suspended (user pause or visibility gate).
    pub paused: bool,
    pub last_execution: Option<DateTime<Utc>>,
    pub next_execution: Option<DateTime<Utc>>,
    /// Lifetime failure count. Never reset automatically.
    pub error_count: u64,
    /// Failures since the last success. Reset to zero only on success.
    pub consecutive_errors: u32,
    pub circuit_breaker_open: bool,
    /// Current backoff multiplier, >= 1. Doubles on failure (capped),
    /// resets to 1 on success.
    pub backoff_multiplier: u32,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// The task is currently reporting a cached result instead of a live one.
    pub using_cached_data: bool,
}

impl TaskState {
    pub(crate) fn new(active: bool) -> Self {
        Self {
            active,
            paused: false,
            last_execution: None,
            next_execution: None,
            error_count: 0,
            consecutive_errors: 0,
            circuit_breaker_open: false,
            backoff_multiplier: 1,
            last_success: None,
            last_error: None,
            using_cached_data: false,
        }
    }
}

/// One registered task. At most one pending timer exists per entry.
///
/// `generation` identifies the registration itself: re-registering an id
/// creates a new generation, so an execution that was in flight for the old
/// registration never touches the new one's state. `epoch` identifies the
/// armed timer: a firing whose epoch no longer matches was superseded and is
/// discarded.
pub(crate) struct TaskEntry {
    pub callback: TaskCallback,
    pub config: PollingConfig,
    pub state: TaskState,
    pub timer: Option<JoinHandle<()>>,
    pub generation: u64,
    pub epoch: u64,
}

impl TaskEntry {
    /// Cancel the pending timer, if any.
    pub fn cancel_timer(&mut self) {
        if let Some(handle) = self.timer.take() {
            handle.abort();
        }
        self.state.next_execution = None;
    }

    /// Whether a new timer may be armed for this entry right now.
    pub fn can_schedule(&self, globally_paused: bool) -> bool {
        self.config.enabled
            && self.state.active
            && !self.state.paused
            && !self.state.circuit_breaker_open
            && !globally_paused
    }
}

/// Read-only snapshot of a registration.
#[derive(Debug, Clone, Serialize)]
pub struct TaskRegistration {
    pub id: String,
    pub config: PollingConfig,
    pub state: TaskState,
}

/// Read-only failure statistics for a task.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorStats {
    pub error_count: u64,
    pub consecutive_errors: u32,
    pub circuit_breaker_open: bool,
    pub last_error: Option<String>,
    pub using_cached_data: bool,
}

/// What initiated an execution step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExecutionTrigger {
    /// A timer fired.
    Scheduled,
    /// A caller requested an immediate out-of-cadence probe.
    Manual,
}
