//! # Visibility Gate
//!
//! Process-wide boolean signal describing whether the execution context is
//! foreground/active. The host environment's activity detector publishes
//! transitions through [`VisibilityGate::set_visible`]; the scheduler
//! subscribes and pauses or resumes eligible tasks on changes. The gate
//! deliberately knows nothing about any particular host API.

use tokio::sync::watch;
use tracing::debug;

/// Shared visibility signal with change subscriptions.
#[derive(Debug, Clone)]
pub struct VisibilityGate {
    sender: std::sync::Arc<watch::Sender<bool>>,
}

impl VisibilityGate {
    /// Create a gate with the given initial visibility.
    pub fn new(initially_visible: bool) -> Self {
        let (sender, _) = watch::channel(initially_visible);
        Self {
            sender: std::sync::Arc::new(sender),
        }
    }

    /// Publish a visibility transition. No-op if the value is unchanged.
    pub fn set_visible(&self, visible: bool) {
        let changed = self.sender.send_if_modified(|current| {
            if *current == visible {
                false
            } else {
                *current = visible;
                true
            }
        });
        if changed {
            debug!(visible, "👁️ Visibility transition");
        }
    }

    /// Current visibility.
    pub fn is_visible(&self) -> bool {
        *self.sender.borrow()
    }

    /// Subscribe to visibility changes.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }
}

impl Default for VisibilityGate {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn transitions_are_observed_by_subscribers() {
        let gate = VisibilityGate::new(true);
        let mut rx = gate.subscribe();

        assert!(gate.is_visible());

        gate.set_visible(false);
        rx.changed().await.expect("gate alive");
        assert!(!*rx.borrow_and_update());
        assert!(!gate.is_visible());
    }

    #[tokio::test]
    async fn redundant_sets_do_not_wake_subscribers() {
        let gate = VisibilityGate::new(true);
        let mut rx = gate.subscribe();
        rx.mark_unchanged();

        gate.set_visible(true);
        assert!(!rx.has_changed().expect("gate alive"));
    }
}
