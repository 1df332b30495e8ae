//! # Failure Classification
//!
//! Classifies task failures into network-shaped and generic categories so
//! the alert surface can distinguish connectivity problems from task bugs.
//! Classification works on the failure's display text: callbacks wrap
//! arbitrary upstream errors, so the message is the only uniform signal.

use crate::error::PollerError;

/// Failure categories recognized by the alert surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCategory {
    /// Connectivity-shaped failure (connection, timeout, DNS, ...).
    Network,
    /// Everything else.
    Generic,
}

const NETWORK_MARKERS: &[&str] = &[
    "network",
    "connection",
    "connect",
    "timeout",
    "timed out",
    "dns",
    "refused",
    "unreachable",
    "reset by peer",
    "broken pipe",
    "socket",
    "offline",
    "fetch",
];

/// Classify a task failure by its message.
pub fn classify_failure(error: &PollerError) -> FailureCategory {
    let message = error.to_string().to_lowercase();
    if NETWORK_MARKERS.iter().any(|marker| message.contains(marker)) {
        FailureCategory::Network
    } else {
        FailureCategory::Generic
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connectivity_messages_are_network_shaped() {
        for msg in [
            "connection refused",
            "request timed out after 30s",
            "DNS resolution failed",
            "host unreachable",
            "Network is down",
        ] {
            assert_eq!(
                classify_failure(&PollerError::task_failed(msg)),
                FailureCategory::Network,
                "expected network classification for {msg:?}"
            );
        }
    }

    #[test]
    fn other_messages_are_generic() {
        for msg in ["invalid payload", "500 internal server error", "parse failure"] {
            assert_eq!(
                classify_failure(&PollerError::task_failed(msg)),
                FailureCategory::Generic,
                "expected generic classification for {msg:?}"
            );
        }
    }
}
