//! Status events broadcast by a session.
//!
//! Serialised with camelCase fields and lowercase status names so the host
//! (signaling server, UI bridge) can forward them verbatim as JSON.

use serde::{Deserialize, Serialize};

/// Emitted whenever a session changes state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusEvent {
    pub status: SessionStatus,
    /// Optional human-readable detail (e.g. error message).
    pub detail: Option<String>,
}

/// Lifecycle state of a translation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Created, `start()` not yet called. Languages and voice may change.
    Idle,
    /// Stage tasks are running.
    Running,
    /// Inbound audio has ended; queued work is flushing through.
    Draining,
    /// Stage tasks have terminated; the session cannot be restarted.
    Stopped,
    /// `start()` failed.
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_event_serializes_with_lowercase_status() {
        let event = SessionStatusEvent {
            status: SessionStatus::Draining,
            detail: Some("input finished".into()),
        };

        let json = serde_json::to_value(&event).expect("serialize status event");
        assert_eq!(json["status"], "draining");
        assert_eq!(json["detail"], "input finished");

        let round_trip: SessionStatusEvent =
            serde_json::from_value(json).expect("deserialize status event");
        assert_eq!(round_trip.status, SessionStatus::Draining);
    }

    #[test]
    fn status_rejects_non_lowercase_values() {
        assert!(serde_json::from_str::<SessionStatus>(r#""Running""#).is_err());
    }
}
