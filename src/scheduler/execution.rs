//! Per-timer execution step.
//!
//! One call per armed timer (or per manual refresh): stamp the execution,
//! invoke the callback with the registry lock released, then re-acquire the
//! lock and apply the success or failure path. The post-invocation step
//! re-checks current registration and pause state rather than state captured
//! before the await. Cancellation cancels pending timers, never in-flight
//! callbacks, so a settled invocation must not arm a timer for a task that
//! was unregistered or paused while it ran.

use super::error_classifier::{classify_failure, FailureCategory};
use super::types::{ExecutionTrigger, TaskCallback};
use super::SchedulerInner;
use crate::alerts::{Alert, AlertAction, AlertKind, AlertMetadata, AlertSeverity};
use crate::backoff::{backoff_multiplier, retry_delay, should_open_circuit};
use crate::config::PollingConfig;
use crate::error::PollerError;
use chrono::Utc;
use serde_json::Value;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Snapshot taken under the lock before invoking the callback.
struct StepTicket {
    callback: TaskCallback,
    config: PollingConfig,
    generation: u64,
}

/// Failure-path facts gathered under the lock, reported after it is
/// released.
struct FailureReport {
    metadata: AlertMetadata,
    stale_age: Option<Duration>,
    circuit_opened: bool,
    consecutive_errors: u32,
}

impl SchedulerInner {
    /// Run one execution step for `id`. Returns whether the callback
    /// succeeded; `false` also covers unknown ids and stale timer firings.
    pub(crate) async fn execute(
        inner: Arc<SchedulerInner>,
        id: String,
        epoch: u64,
        trigger: ExecutionTrigger,
    ) -> bool {
        let Some(ticket) = Self::begin_step(&inner, &id, epoch, trigger) else {
            return false;
        };

        let result = (ticket.callback)().await;

        match result {
            Ok(value) => {
                Self::complete_success(&inner, &id, ticket.generation, trigger, value, &ticket.config);
                true
            }
            Err(failure) => {
                Self::complete_failure(&inner, &id, ticket.generation, trigger, &failure, &ticket.config);
                false
            }
        }
    }

    /// Claim the execution: consume the fired timer, gate on current state,
    /// stamp `last_execution`, and snapshot the callback and config.
    fn begin_step(
        inner: &Arc<SchedulerInner>,
        id: &str,
        epoch: u64,
        trigger: ExecutionTrigger,
    ) -> Option<StepTicket> {
        let mut tasks = inner.tasks.lock();
        let entry = tasks.get_mut(id)?;

        if trigger == ExecutionTrigger::Scheduled {
            if entry.epoch != epoch {
                // Superseded timer (replaced registration or re-arm race).
                return None;
            }
            entry.timer = None;
            entry.state.next_execution = None;
            if !entry.can_schedule(inner.globally_paused.load(Ordering::SeqCst)) {
                return None;
            }
        }

        entry.state.last_execution = Some(Utc::now());
        Some(StepTicket {
            callback: Arc::clone(&entry.callback),
            config: entry.config.clone(),
            generation: entry.generation,
        })
    }

    fn complete_success(
        inner: &Arc<SchedulerInner>,
        id: &str,
        generation: u64,
        trigger: ExecutionTrigger,
        value: Value,
        config: &PollingConfig,
    ) {
        // The settled path always runs its cache write, even when the task
        // was unregistered or paused while the callback was in flight.
        if config.enable_caching {
            inner.cache.set(id, value, config.cache_ttl, None);
        }

        let recovered = {
            let mut tasks = inner.tasks.lock();
            let Some(entry) = tasks.get_mut(id) else {
                return;
            };
            if entry.generation != generation {
                // The id was re-registered mid-flight; its state is not ours.
                return;
            }

            let was_open = entry.state.circuit_breaker_open;
            entry.state.consecutive_errors = 0;
            entry.state.backoff_multiplier = 1;
            entry.state.circuit_breaker_open = false;
            entry.state.last_error = None;
            entry.state.using_cached_data = false;
            entry.state.last_success = Some(Utc::now());

            // Success always returns to the base interval.
            if entry.can_schedule(inner.globally_paused.load(Ordering::SeqCst))
                && entry.timer.is_none()
            {
                let delay = entry.config.interval;
                Self::arm_timer(inner, id, entry, delay);
            }

            was_open.then(|| AlertMetadata {
                error_count: entry.state.error_count,
                consecutive_errors: 0,
                circuit_breaker_open: false,
            })
        };

        debug!(task_id = %id, trigger = ?trigger, "🟢 Task execution succeeded");

        if let Some(metadata) = recovered {
            debug!(task_id = %id, "🟢 Circuit breaker closed (recovered)");
            if config.enable_alerts {
                inner.alerts.raise(
                    Alert::new(
                        id,
                        AlertKind::Recovery,
                        "Task recovered",
                        format!("Task '{id}' is healthy again; normal scheduling resumed"),
                    )
                    .with_metadata(metadata),
                );
            }
        }
    }

    fn complete_failure(
        inner: &Arc<SchedulerInner>,
        id: &str,
        generation: u64,
        trigger: ExecutionTrigger,
        failure: &PollerError,
        config: &PollingConfig,
    ) {
        let message = failure.to_string();
        let category = classify_failure(failure);

        let report = {
            let mut tasks = inner.tasks.lock();
            let Some(entry) = tasks.get_mut(id) else {
                return;
            };
            if entry.generation != generation {
                return;
            }

            entry.state.error_count += 1;
            entry.state.last_error = Some(message.clone());

            let mut stale_age = None;
            if config.graceful_degradation && config.enable_caching {
                match inner.cache.get_with_age(id) {
                    Some((_, age, ttl)) => {
                        entry.state.using_cached_data = true;
                        // Staleness is judged against the TTL the entry was
                        // stored with, not the current configuration.
                        if age >= ttl {
                            stale_age = Some(age);
                        }
                    }
                    // The entry was evicted; nothing is being served.
                    None => entry.state.using_cached_data = false,
                }
            }

            let mut circuit_opened = false;
            if trigger == ExecutionTrigger::Scheduled {
                entry.state.consecutive_errors += 1;
                if config.exponential_backoff {
                    entry.state.backoff_multiplier =
                        backoff_multiplier(entry.state.consecutive_errors);
                }

                if should_open_circuit(
                    entry.state.consecutive_errors,
                    config.circuit_breaker_threshold,
                ) {
                    // Opening the circuit always wins over arming a retry.
                    entry.state.circuit_breaker_open = true;
                    entry.cancel_timer();
                    circuit_opened = true;
                } else if entry.can_schedule(inner.globally_paused.load(Ordering::SeqCst))
                    && entry.timer.is_none()
                {
                    let delay = retry_delay(
                        config.interval,
                        entry.state.consecutive_errors,
                        config.exponential_backoff,
                    );
                    Self::arm_timer(inner, id, entry, delay);
                }
            }

            FailureReport {
                metadata: AlertMetadata {
                    error_count: entry.state.error_count,
                    consecutive_errors: entry.state.consecutive_errors,
                    circuit_breaker_open: entry.state.circuit_breaker_open,
                },
                stale_age,
                circuit_opened,
                consecutive_errors: entry.state.consecutive_errors,
            }
        };

        match trigger {
            ExecutionTrigger::Scheduled => warn!(
                task_id = %id,
                consecutive_errors = report.consecutive_errors,
                error = %message,
                "🔴 Task execution failed"
            ),
            ExecutionTrigger::Manual => warn!(
                task_id = %id,
                error = %message,
                "🔴 Manual refresh failed"
            ),
        }

        if report.circuit_opened {
            error!(
                task_id = %id,
                consecutive_errors = report.consecutive_errors,
                threshold = config.circuit_breaker_threshold,
                "🔴 Circuit breaker opened (failing fast)"
            );
        }

        if !config.enable_alerts {
            return;
        }

        if let Some(age) = report.stale_age {
            inner.alerts.raise(
                Alert::new(
                    id,
                    AlertKind::StaleCache,
                    "Serving cached data",
                    format!(
                        "Task '{id}' is serving cached data {}s old",
                        age.as_secs()
                    ),
                )
                .with_metadata(report.metadata.clone()),
            );
        }

        let failure_actions = vec![
            AlertAction::Retry {
                task_id: id.to_string(),
            },
            AlertAction::Dismiss,
        ];
        let failure_alert = match category {
            FailureCategory::Network => Alert::new(
                id,
                AlertKind::NetworkError,
                "Network error",
                format!("Task '{id}' failed: {message}"),
            ),
            FailureCategory::Generic => {
                let alert = Alert::new(
                    id,
                    AlertKind::TaskError,
                    "Task failed",
                    format!("Task '{id}' failed: {message}"),
                );
                if report.consecutive_errors > 1 {
                    alert.with_severity(AlertSeverity::High)
                } else {
                    alert
                }
            }
        };
        inner.alerts.raise(
            failure_alert
                .with_actions(failure_actions)
                .with_metadata(report.metadata.clone()),
        );

        if report.circuit_opened {
            inner.alerts.raise(
                Alert::new(
                    id,
                    AlertKind::CircuitOpen,
                    "Circuit breaker open",
                    format!(
                        "Task '{id}' suspended after {} consecutive failures; automatic scheduling stopped",
                        report.consecutive_errors
                    ),
                )
                .with_actions(vec![
                    AlertAction::ResetCircuit {
                        task_id: id.to_string(),
                    },
                    AlertAction::Dismiss,
                ])
                .with_metadata(report.metadata),
            );
        }
    }
}
