//! # Polling Scheduler
//!
//! The orchestrating component: owns the task registry, starts and stops
//! per-task timers, applies backoff and circuit breaking on failure, writes
//! successful results to the last-known-good cache, emits alerts, and reacts
//! to visibility transitions.
//!
//! ## Lifecycle
//!
//! Callers register a task (id, async callback, configuration); the
//! scheduler arms a timer at the configured interval. When the timer fires
//! the callback runs to completion. Success resets failure state and
//! re-arms at the base interval, failure consults the backoff/circuit policy
//! and either arms a delayed retry or opens the circuit and stops. All
//! failures are caught at the execution-step boundary; callers observe them
//! only through error stats and alerts.
//!
//! ## Concurrency
//!
//! Registry mutations happen under a sync mutex that is never held across an
//! await. For a single task id executions are strictly sequential: the next
//! timer is armed only after the prior invocation settles. Cancellation
//! (unregister, pause, circuit open) cancels the pending timer, never an
//! in-flight callback; the post-invocation re-arm re-checks current state.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use poller_core::{PollingConfig, PollingScheduler, VisibilityGate};
//! use serde_json::json;
//!
//! # async fn example() -> poller_core::Result<()> {
//! let gate = VisibilityGate::new(true);
//! let scheduler = PollingScheduler::new(gate.clone());
//!
//! scheduler.register(
//!     "health-check",
//!     || async { Ok(json!({"status": "ok"})) },
//!     PollingConfig::default(),
//! )?;
//!
//! // The host environment drives the gate.
//! gate.set_visible(false);
//! # Ok(())
//! # }
//! ```

pub mod error_classifier;
pub mod types;

mod execution;

pub use error_classifier::{classify_failure, FailureCategory};
pub use types::{ErrorStats, TaskRegistration, TaskState};

use crate::alerts::{AlertSink, SystemNotifier};
use crate::cache::CacheStore;
use crate::config::{PollingConfig, PollingConfigUpdate, SchedulerSettings};
use crate::error::{PollerError, Result};
use crate::visibility::VisibilityGate;
use chrono::Utc;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace};
use types::{ExecutionTrigger, TaskCallback, TaskEntry};

/// Adaptive task scheduler. Cheap to clone; clones share one registry,
/// cache, and alert sink.
pub struct PollingScheduler {
    inner: Arc<SchedulerInner>,
}

impl Clone for PollingScheduler {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

pub(crate) struct SchedulerInner {
    pub(crate) tasks: Mutex<HashMap<String, TaskEntry>>,
    pub(crate) globally_paused: AtomicBool,
    pub(crate) sequence: AtomicU64,
    pub(crate) cache: CacheStore,
    pub(crate) alerts: AlertSink,
    pub(crate) visibility: VisibilityGate,
}

impl PollingScheduler {
    /// Create a scheduler wired to the given visibility gate.
    ///
    /// Must be called within a tokio runtime: the scheduler spawns a watcher
    /// on the gate's subscription.
    pub fn new(visibility: VisibilityGate) -> Self {
        Self::with_settings(visibility, SchedulerSettings::default())
    }

    /// Create a scheduler with explicit settings.
    pub fn with_settings(visibility: VisibilityGate, settings: SchedulerSettings) -> Self {
        Self::build(
            visibility,
            AlertSink::new(settings.max_alerts, settings.alert_channel_capacity),
        )
    }

    /// Create a scheduler with a best-effort system notifier attached to the
    /// alert sink.
    pub fn with_notifier(
        visibility: VisibilityGate,
        settings: SchedulerSettings,
        notifier: Arc<dyn SystemNotifier>,
    ) -> Self {
        Self::build(
            visibility,
            AlertSink::new(settings.max_alerts, settings.alert_channel_capacity)
                .with_notifier(notifier),
        )
    }

    fn build(visibility: VisibilityGate, alerts: AlertSink) -> Self {
        let inner = Arc::new(SchedulerInner {
            tasks: Mutex::new(HashMap::new()),
            globally_paused: AtomicBool::new(false),
            sequence: AtomicU64::new(0),
            cache: CacheStore::new(),
            alerts,
            visibility,
        });
        SchedulerInner::spawn_visibility_watcher(&inner);
        Self { inner }
    }

    /// Register a polling task. An existing registration under the same id
    /// is fully unregistered first (timer stopped, state discarded, scoped
    /// cache entries and alerts dropped), so two copies of one id never
    /// coexist.
    ///
    /// When the configuration enables the task, the first timer is armed at
    /// the base interval with no backoff.
    pub fn register<F, Fut>(
        &self,
        id: impl Into<String>,
        callback: F,
        config: PollingConfig,
    ) -> Result<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        config.validate()?;
        let id = id.into();
        let callback: TaskCallback =
            Arc::new(move || -> BoxFuture<'static, Result<Value>> { Box::pin(callback()) });

        // Idempotent replace.
        self.inner.remove_task(&id);

        let generation = self.inner.next_sequence();
        let mut entry = TaskEntry {
            callback,
            state: types::TaskState::new(config.enabled),
            config,
            timer: None,
            generation,
            epoch: 0,
        };

        // Tasks registered while the context is inactive start paused; the
        // next active transition resumes them.
        if entry.config.pause_on_inactive && !self.inner.visibility.is_visible() {
            entry.state.paused = true;
        }

        let globally_paused = self.inner.globally_paused.load(Ordering::SeqCst);
        if entry.can_schedule(globally_paused) {
            let delay = entry.config.interval;
            SchedulerInner::arm_timer(&self.inner, &id, &mut entry, delay);
        }

        let interval_ms = entry.config.interval.as_millis() as u64;
        self.inner.tasks.lock().insert(id.clone(), entry);
        info!(task_id = %id, interval_ms, "📋 Task registered");
        Ok(())
    }

    /// Remove a registration, its pending timer, and the cache entries and
    /// alerts scoped to it. No-op on an unknown id.
    pub fn unregister(&self, id: &str) {
        if self.inner.remove_task(id) {
            info!(task_id = %id, "🗑️ Task unregistered");
        }
    }

    /// Cancel the pending timer without touching config or error counters.
    /// Idempotent.
    pub fn pause(&self, id: &str) {
        let mut tasks = self.inner.tasks.lock();
        if let Some(entry) = tasks.get_mut(id) {
            if !entry.state.paused {
                entry.cancel_timer();
                entry.state.paused = true;
                debug!(task_id = %id, "⏸️ Task paused");
            }
        }
    }

    /// Re-arm a paused task at its current, possibly backed-off interval.
    /// Suppressed while globally paused or while the circuit is open.
    pub fn resume(&self, id: &str) {
        if self.inner.globally_paused.load(Ordering::SeqCst) {
            debug!(task_id = %id, "Resume suppressed: scheduler is globally paused");
            return;
        }
        let mut tasks = self.inner.tasks.lock();
        let Some(entry) = tasks.get_mut(id) else {
            return;
        };
        if entry.state.circuit_breaker_open {
            debug!(task_id = %id, "Resume suppressed: circuit breaker is open");
            return;
        }
        if entry.state.paused {
            entry.state.paused = false;
            if entry.can_schedule(false) && entry.timer.is_none() {
                let delay = entry.config.interval * entry.state.backoff_multiplier;
                SchedulerInner::arm_timer(&self.inner, id, entry, delay);
            }
            debug!(task_id = %id, "▶️ Task resumed");
        }
    }

    /// Process-wide pause: cancels every pending timer. Individual `resume`
    /// calls are suppressed until [`PollingScheduler::resume_all`].
    pub fn pause_all(&self) {
        self.inner.globally_paused.store(true, Ordering::SeqCst);
        let mut tasks = self.inner.tasks.lock();
        for entry in tasks.values_mut() {
            entry.cancel_timer();
        }
        info!(task_count = tasks.len(), "⏸️ All tasks paused");
    }

    /// Lift the process-wide pause and re-arm every eligible task.
    pub fn resume_all(&self) {
        self.inner.globally_paused.store(false, Ordering::SeqCst);
        let mut tasks = self.inner.tasks.lock();
        let mut resumed = 0usize;
        for (id, entry) in tasks.iter_mut() {
            if entry.can_schedule(false) && entry.timer.is_none() {
                let delay = entry.config.interval * entry.state.backoff_multiplier;
                SchedulerInner::arm_timer(&self.inner, id, entry, delay);
                resumed += 1;
            }
        }
        info!(resumed_tasks = resumed, "▶️ Global pause lifted");
    }

    /// Merge a partial configuration update and re-arm with the new
    /// interval. A changed circuit breaker threshold is an implicit circuit
    /// reset: the open flag, consecutive errors, and backoff multiplier are
    /// cleared before re-arming.
    pub fn update_config(&self, id: &str, update: PollingConfigUpdate) -> Result<()> {
        let mut tasks = self.inner.tasks.lock();
        let entry = tasks
            .get_mut(id)
            .ok_or_else(|| PollerError::UnknownTask(id.to_string()))?;

        let new_config = update.apply(&entry.config);
        new_config.validate()?;
        let circuit_reset = update.resets_circuit(&entry.config);

        entry.cancel_timer();
        entry.config = new_config;
        entry.state.active = entry.config.enabled;

        if circuit_reset {
            entry.state.circuit_breaker_open = false;
            entry.state.consecutive_errors = 0;
            entry.state.backoff_multiplier = 1;
            debug!(task_id = %id, "Circuit breaker implicitly reset by threshold change");
        }

        let globally_paused = self.inner.globally_paused.load(Ordering::SeqCst);
        if entry.can_schedule(globally_paused) {
            let delay = entry.config.interval * entry.state.backoff_multiplier;
            SchedulerInner::arm_timer(&self.inner, id, entry, delay);
        }
        debug!(task_id = %id, "🔧 Task configuration updated");
        Ok(())
    }

    /// Clear failure state unconditionally and re-arm when eligible.
    /// Returns `false` for an unknown id.
    pub fn reset_circuit_breaker(&self, id: &str) -> bool {
        let mut tasks = self.inner.tasks.lock();
        let Some(entry) = tasks.get_mut(id) else {
            return false;
        };
        entry.state.circuit_breaker_open = false;
        entry.state.consecutive_errors = 0;
        entry.state.backoff_multiplier = 1;

        let globally_paused = self.inner.globally_paused.load(Ordering::SeqCst);
        if entry.can_schedule(globally_paused) && entry.timer.is_none() {
            let delay = entry.config.interval;
            SchedulerInner::arm_timer(&self.inner, id, entry, delay);
        }
        info!(task_id = %id, "🔄 Circuit breaker reset");
        true
    }

    /// Execute the callback immediately, outside the timer cadence.
    ///
    /// Success resets error counters and, if the circuit was open, closes it
    /// and resumes normal scheduling. Failure is reported through alerts and
    /// error stats but never increments `consecutive_errors`: manual probes
    /// must not trip the breaker. Returns whether the execution succeeded
    /// (`false` for an unknown id).
    pub async fn force_refresh(&self, id: &str) -> bool {
        debug!(task_id = %id, "🔁 Manual refresh requested");
        SchedulerInner::execute(
            Arc::clone(&self.inner),
            id.to_string(),
            0,
            ExecutionTrigger::Manual,
        )
        .await
    }

    /// Snapshot of one registration.
    pub fn get_registration(&self, id: &str) -> Option<TaskRegistration> {
        let tasks = self.inner.tasks.lock();
        tasks.get(id).map(|entry| TaskRegistration {
            id: id.to_string(),
            config: entry.config.clone(),
            state: entry.state.clone(),
        })
    }

    /// Snapshots of every registration.
    pub fn get_all_registrations(&self) -> Vec<TaskRegistration> {
        let tasks = self.inner.tasks.lock();
        tasks
            .iter()
            .map(|(id, entry)| TaskRegistration {
                id: id.clone(),
                config: entry.config.clone(),
                state: entry.state.clone(),
            })
            .collect()
    }

    /// Failure statistics for a task, or `None` for an unknown id.
    pub fn get_error_stats(&self, id: &str) -> Option<ErrorStats> {
        let tasks = self.inner.tasks.lock();
        tasks.get(id).map(|entry| ErrorStats {
            error_count: entry.state.error_count,
            consecutive_errors: entry.state.consecutive_errors,
            circuit_breaker_open: entry.state.circuit_breaker_open,
            last_error: entry.state.last_error.clone(),
            using_cached_data: entry.state.using_cached_data,
        })
    }

    /// The task's cached result, if a fresh one exists.
    pub fn get_cached_data(&self, id: &str) -> Option<Value> {
        self.inner.cache.get(id)
    }

    pub fn is_context_visible(&self) -> bool {
        self.inner.visibility.is_visible()
    }

    pub fn is_globally_paused(&self) -> bool {
        self.inner.globally_paused.load(Ordering::SeqCst)
    }

    pub fn task_count(&self) -> usize {
        self.inner.tasks.lock().len()
    }

    /// The alert sink, for subscription and dismissal by UI layers.
    pub fn alerts(&self) -> &AlertSink {
        &self.inner.alerts
    }

    /// The last-known-good cache.
    pub fn cache(&self) -> &CacheStore {
        &self.inner.cache
    }
}

impl SchedulerInner {
    pub(crate) fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Arm the single pending timer for `entry`. Any prior timer is
    /// cancelled first, so at most one timer exists per task at any instant.
    ///
    /// Never takes the registry lock: callers already hold it.
    pub(crate) fn arm_timer(
        inner: &Arc<SchedulerInner>,
        id: &str,
        entry: &mut TaskEntry,
        delay: Duration,
    ) {
        entry.cancel_timer();

        let epoch = inner.next_sequence();
        entry.epoch = epoch;
        entry.state.next_execution = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|d| Utc::now().checked_add_signed(d));

        trace!(task_id = %id, delay_ms = delay.as_millis() as u64, "⏲️ Timer armed");

        let weak = Arc::downgrade(inner);
        let task_id = id.to_string();
        let deadline = tokio::time::Instant::now() + delay;
        entry.timer = Some(tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            SchedulerInner::execute(inner, task_id, epoch, ExecutionTrigger::Scheduled).await;
        }));
    }

    /// Remove a task and the artifacts scoped to its id. Returns whether a
    /// registration existed.
    pub(crate) fn remove_task(&self, id: &str) -> bool {
        let removed = self.tasks.lock().remove(id);
        match removed {
            Some(mut entry) => {
                entry.cancel_timer();
                self.cache.delete(id);
                self.alerts.clear_for_task(id);
                true
            }
            None => false,
        }
    }

    fn spawn_visibility_watcher(inner: &Arc<SchedulerInner>) {
        let weak = Arc::downgrade(inner);
        let mut rx = inner.visibility.subscribe();
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let visible = *rx.borrow_and_update();
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                SchedulerInner::handle_visibility_change(&inner, visible);
            }
        });
    }

    /// React to a visibility transition.
    ///
    /// Inactive: pause every `pause_on_inactive` task that is active and
    /// unpaused, without touching error counters. Active: resume each such
    /// paused task at its current, possibly backed-off interval unless its
    /// circuit is open or global pause is set.
    pub(crate) fn handle_visibility_change(inner: &Arc<SchedulerInner>, visible: bool) {
        if visible {
            let globally_paused = inner.globally_paused.load(Ordering::SeqCst);
            let mut tasks = inner.tasks.lock();
            let mut resumed = 0usize;
            for (id, entry) in tasks.iter_mut() {
                if !(entry.config.pause_on_inactive && entry.state.paused) {
                    continue;
                }
                if entry.state.circuit_breaker_open || globally_paused {
                    continue;
                }
                entry.state.paused = false;
                if entry.can_schedule(globally_paused) && entry.timer.is_none() {
                    let delay = entry.config.interval * entry.state.backoff_multiplier;
                    SchedulerInner::arm_timer(inner, id, entry, delay);
                    resumed += 1;
                }
            }
            info!(resumed_tasks = resumed, "🌞 Context active: eligible tasks resumed");
        } else {
            let mut tasks = inner.tasks.lock();
            let mut paused = 0usize;
            for entry in tasks.values_mut() {
                if entry.config.pause_on_inactive && entry.state.active && !entry.state.paused {
                    entry.cancel_timer();
                    entry.state.paused = true;
                    paused += 1;
                }
            }
            info!(paused_tasks = paused, "🌙 Context inactive: eligible tasks paused");
        }
    }
}

impl Drop for SchedulerInner {
    fn drop(&mut self) {
        for entry in self.tasks.get_mut().values_mut() {
            entry.cancel_timer();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scheduler() -> PollingScheduler {
        PollingScheduler::new(VisibilityGate::new(true))
    }

    fn config(interval_ms: u64) -> PollingConfig {
        PollingConfig {
            interval: Duration::from_millis(interval_ms),
            ..PollingConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn register_rejects_zero_interval() {
        let scheduler = scheduler();
        let result = scheduler.register("t", || async { Ok(json!(1)) }, config(0));
        assert!(matches!(result, Err(PollerError::ConfigurationError(_))));
        assert!(scheduler.get_registration("t").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn register_replaces_prior_registration() {
        let scheduler = scheduler();
        scheduler
            .register("t", || async { Ok(json!("first")) }, config(1000))
            .expect("register");
        scheduler
            .register("t", || async { Ok(json!("second")) }, config(2000))
            .expect("register");

        assert_eq!(scheduler.task_count(), 1);
        let registration = scheduler.get_registration("t").expect("registered");
        assert_eq!(registration.config.interval, Duration::from_millis(2000));
        // Fresh registration starts with clean counters.
        assert_eq!(registration.state.consecutive_errors, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unregister_is_idempotent() {
        let scheduler = scheduler();
        scheduler
            .register("t", || async { Ok(json!(1)) }, config(1000))
            .expect("register");

        scheduler.unregister("t");
        scheduler.unregister("t");
        assert!(scheduler.get_registration("t").is_none());
        assert!(scheduler.get_error_stats("t").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn pause_twice_is_a_noop_the_second_time() {
        let scheduler = scheduler();
        scheduler
            .register("t", || async { Ok(json!(1)) }, config(1000))
            .expect("register");

        scheduler.pause("t");
        scheduler.pause("t");
        let registration = scheduler.get_registration("t").expect("registered");
        assert!(registration.state.paused);
        assert!(registration.state.next_execution.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn resume_is_suppressed_while_globally_paused() {
        let scheduler = scheduler();
        scheduler
            .register("t", || async { Ok(json!(1)) }, config(1000))
            .expect("register");

        scheduler.pause("t");
        scheduler.pause_all();
        scheduler.resume("t");

        let registration = scheduler.get_registration("t").expect("registered");
        assert!(registration.state.paused);

        scheduler.resume_all();
        // Individually paused tasks stay paused across a global resume.
        let registration = scheduler.get_registration("t").expect("registered");
        assert!(registration.state.paused);

        scheduler.resume("t");
        let registration = scheduler.get_registration("t").expect("registered");
        assert!(!registration.state.paused);
    }

    #[tokio::test(start_paused = true)]
    async fn update_config_on_unknown_id_errors() {
        let scheduler = scheduler();
        let result = scheduler.update_config("missing", PollingConfigUpdate::default());
        assert!(matches!(result, Err(PollerError::UnknownTask(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn reset_circuit_breaker_on_unknown_id_returns_false() {
        let scheduler = scheduler();
        assert!(!scheduler.reset_circuit_breaker("missing"));
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_task_is_registered_but_never_armed() {
        let scheduler = scheduler();
        let disabled = PollingConfig {
            enabled: false,
            ..config(1000)
        };
        scheduler
            .register("t", || async { Ok(json!(1)) }, disabled)
            .expect("register");

        let registration = scheduler.get_registration("t").expect("registered");
        assert!(!registration.state.active);
        assert!(registration.state.next_execution.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn task_registered_while_inactive_starts_paused() {
        let gate = VisibilityGate::new(false);
        let scheduler = PollingScheduler::new(gate);
        scheduler
            .register("t", || async { Ok(json!(1)) }, config(1000))
            .expect("register");

        let registration = scheduler.get_registration("t").expect("registered");
        assert!(registration.state.paused);
        assert!(registration.state.next_execution.is_none());
    }
}
