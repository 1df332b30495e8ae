//! # Alert Sink
//!
//! Accumulates, deduplicates, and broadcasts notifications about task
//! health. Alerts for the same `(task id, kind)` pair collapse into one
//! updated record instead of accumulating duplicates, and a bounded ring
//! retains only the most recent entries. Subscribers receive every raised
//! alert over a broadcast channel; an optional [`SystemNotifier`] delivers
//! best-effort host notifications for critical events.

use crate::error::Result;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

/// Alert categories. Also the deduplication key together with the task id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// Generic task failure.
    TaskError,
    /// Network-shaped task failure (connection, timeout, DNS, ...).
    NetworkError,
    /// Circuit breaker opened; automatic scheduling stopped.
    CircuitOpen,
    /// Serving cached data older than its freshness window.
    StaleCache,
    /// Task recovered after its circuit was open.
    Recovery,
}

/// Presentation level of an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Error,
    Warning,
    Info,
    Success,
}

/// Operational severity of an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// Actions a consumer can offer alongside an alert. These are data, not
/// callbacks: the UI layer maps them onto the matching scheduler calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AlertAction {
    /// Re-run the task immediately via a forced refresh.
    Retry { task_id: String },
    /// Clear the task's failure state and resume scheduling.
    ResetCircuit { task_id: String },
    /// Dismiss the alert.
    Dismiss,
}

/// Task-health context attached to an alert.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertMetadata {
    pub error_count: u64,
    pub consecutive_errors: u32,
    pub circuit_breaker_open: bool,
}

/// A single alert record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub task_id: String,
    pub kind: AlertKind,
    pub level: AlertLevel,
    pub severity: AlertSeverity,
    pub title: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub dismissed: bool,
    pub actions: Vec<AlertAction>,
    pub metadata: AlertMetadata,
}

impl Alert {
    /// Create an alert with kind-derived level and severity defaults.
    pub fn new(
        task_id: impl Into<String>,
        kind: AlertKind,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let (level, severity) = match kind {
            AlertKind::TaskError => (AlertLevel::Error, AlertSeverity::Medium),
            AlertKind::NetworkError => (AlertLevel::Warning, AlertSeverity::Medium),
            AlertKind::CircuitOpen => (AlertLevel::Error, AlertSeverity::Critical),
            AlertKind::StaleCache => (AlertLevel::Warning, AlertSeverity::Medium),
            AlertKind::Recovery => (AlertLevel::Success, AlertSeverity::Low),
        };
        Self {
            id: Uuid::new_v4(),
            task_id: task_id.into(),
            kind,
            level,
            severity,
            title: title.into(),
            message: message.into(),
            created_at: Utc::now(),
            dismissed: false,
            actions: Vec::new(),
            metadata: AlertMetadata::default(),
        }
    }

    pub fn with_severity(mut self, severity: AlertSeverity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_actions(mut self, actions: Vec<AlertAction>) -> Self {
        self.actions = actions;
        self
    }

    pub fn with_metadata(mut self, metadata: AlertMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Whether this alert warrants a best-effort host notification.
    fn needs_system_notification(&self) -> bool {
        self.severity == AlertSeverity::Critical
            || matches!(self.kind, AlertKind::CircuitOpen | AlertKind::Recovery)
    }
}

/// Best-effort host notification capability (desktop notification, webhook,
/// ...). Delivery failures are logged and swallowed; the sink never blocks
/// on a notifier.
#[async_trait::async_trait]
pub trait SystemNotifier: Send + Sync {
    async fn notify(&self, alert: &Alert) -> Result<()>;
}

/// Bounded, deduplicating alert store with broadcast fan-out.
pub struct AlertSink {
    ring: Mutex<VecDeque<Alert>>,
    max_alerts: usize,
    sender: broadcast::Sender<Alert>,
    notifier: Option<Arc<dyn SystemNotifier>>,
}

impl AlertSink {
    /// Create a sink retaining at most `max_alerts` records.
    pub fn new(max_alerts: usize, channel_capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(channel_capacity.max(1));
        Self {
            ring: Mutex::new(VecDeque::new()),
            max_alerts: max_alerts.max(1),
            sender,
            notifier: None,
        }
    }

    /// Attach a best-effort system notifier.
    pub fn with_notifier(mut self, notifier: Arc<dyn SystemNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Record an alert, collapsing it into the prior live alert for the
    /// same `(task id, kind)` pair when one exists. Returns the stored
    /// record (the collapsed record keeps its original id).
    pub fn raise(&self, alert: Alert) -> Alert {
        let stored = {
            let mut ring = self.ring.lock();

            let existing = ring
                .iter_mut()
                .find(|a| !a.dismissed && a.task_id == alert.task_id && a.kind == alert.kind);

            let stored = if let Some(prior) = existing {
                prior.level = alert.level;
                prior.severity = alert.severity;
                prior.title = alert.title;
                prior.message = alert.message;
                prior.created_at = alert.created_at;
                prior.actions = alert.actions;
                prior.metadata = alert.metadata;
                prior.clone()
            } else {
                let stored = alert.clone();
                ring.push_back(alert);
                while ring.len() > self.max_alerts {
                    ring.pop_front();
                }
                stored
            };
            stored
        };

        debug!(
            task_id = %stored.task_id,
            kind = ?stored.kind,
            severity = ?stored.severity,
            "🚨 Alert raised"
        );

        // Broadcast tolerates zero subscribers.
        let _ = self.sender.send(stored.clone());

        if stored.needs_system_notification() {
            if let Some(notifier) = &self.notifier {
                let notifier = Arc::clone(notifier);
                let alert = stored.clone();
                tokio::spawn(async move {
                    if let Err(error) = notifier.notify(&alert).await {
                        warn!(alert_id = %alert.id, %error, "System notification failed");
                    }
                });
            }
        }

        stored
    }

    /// Mark an alert dismissed. Returns whether it existed and was live.
    pub fn dismiss(&self, id: Uuid) -> bool {
        let mut ring = self.ring.lock();
        match ring.iter_mut().find(|a| a.id == id && !a.dismissed) {
            Some(alert) => {
                alert.dismissed = true;
                true
            }
            None => false,
        }
    }

    /// Drop every alert.
    pub fn clear_all(&self) {
        self.ring.lock().clear();
    }

    /// Drop all alerts scoped to a task id.
    pub fn clear_for_task(&self, task_id: &str) {
        self.ring.lock().retain(|a| a.task_id != task_id);
    }

    /// Snapshot of all retained alerts, oldest first.
    pub fn alerts(&self) -> Vec<Alert> {
        self.ring.lock().iter().cloned().collect()
    }

    /// Snapshot of live (non-dismissed) alerts, oldest first.
    pub fn live_alerts(&self) -> Vec<Alert> {
        self.ring.lock().iter().filter(|a| !a.dismissed).cloned().collect()
    }

    pub fn alert_count(&self) -> usize {
        self.ring.lock().len()
    }

    /// Subscribe to raised alerts. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<Alert> {
        self.sender.subscribe()
    }
}

impl std::fmt::Debug for AlertSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertSink")
            .field("max_alerts", &self.max_alerts)
            .field("alert_count", &self.alert_count())
            .field("has_notifier", &self.notifier.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sink() -> AlertSink {
        AlertSink::new(50, 16)
    }

    #[tokio::test]
    async fn duplicate_alerts_collapse_into_one_record() {
        let sink = sink();

        let first = sink.raise(Alert::new("task-a", AlertKind::TaskError, "Failure", "boom"));
        let second = sink.raise(Alert::new(
            "task-a",
            AlertKind::TaskError,
            "Failure",
            "boom again",
        ));

        assert_eq!(first.id, second.id);
        assert_eq!(sink.alert_count(), 1);
        assert_eq!(sink.alerts()[0].message, "boom again");
    }

    #[tokio::test]
    async fn different_kinds_do_not_collapse() {
        let sink = sink();
        sink.raise(Alert::new("task-a", AlertKind::TaskError, "Failure", "boom"));
        sink.raise(Alert::new("task-a", AlertKind::CircuitOpen, "Circuit", "open"));
        assert_eq!(sink.alert_count(), 2);
    }

    #[tokio::test]
    async fn dismissed_alerts_are_not_collapsed_into() {
        let sink = sink();
        let first = sink.raise(Alert::new("task-a", AlertKind::TaskError, "Failure", "boom"));
        assert!(sink.dismiss(first.id));
        assert!(!sink.dismiss(first.id));

        let second = sink.raise(Alert::new("task-a", AlertKind::TaskError, "Failure", "boom"));
        assert_ne!(first.id, second.id);
        assert_eq!(sink.alert_count(), 2);
    }

    #[tokio::test]
    async fn ring_is_bounded() {
        let sink = AlertSink::new(3, 16);
        for i in 0..5 {
            sink.raise(Alert::new(
                format!("task-{i}"),
                AlertKind::TaskError,
                "Failure",
                "boom",
            ));
        }
        assert_eq!(sink.alert_count(), 3);
        // Oldest entries were evicted.
        assert_eq!(sink.alerts()[0].task_id, "task-2");
    }

    #[tokio::test]
    async fn clear_for_task_is_scoped() {
        let sink = sink();
        sink.raise(Alert::new("task-a", AlertKind::TaskError, "Failure", "boom"));
        sink.raise(Alert::new("task-b", AlertKind::TaskError, "Failure", "boom"));

        sink.clear_for_task("task-a");
        let remaining = sink.alerts();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].task_id, "task-b");
    }

    #[tokio::test]
    async fn subscribers_receive_raised_alerts() {
        let sink = sink();
        let mut rx = sink.subscribe();

        sink.raise(Alert::new("task-a", AlertKind::NetworkError, "Network", "down"));
        let received = rx.recv().await.expect("alert broadcast");
        assert_eq!(received.kind, AlertKind::NetworkError);
    }

    struct CountingNotifier(AtomicUsize);

    #[async_trait::async_trait]
    impl SystemNotifier for CountingNotifier {
        async fn notify(&self, _alert: &Alert) -> crate::error::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn critical_alerts_reach_the_notifier() {
        let notifier = Arc::new(CountingNotifier(AtomicUsize::new(0)));
        let sink = AlertSink::new(50, 16).with_notifier(notifier.clone());

        sink.raise(Alert::new("task-a", AlertKind::CircuitOpen, "Circuit", "open"));
        sink.raise(Alert::new("task-a", AlertKind::TaskError, "Failure", "boom"));

        tokio::task::yield_now().await;
        assert_eq!(notifier.0.load(Ordering::SeqCst), 1);
    }
}
