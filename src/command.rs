//! Wire types for the control queue and the per-schedule stop queues.
//!
//! Both message kinds are plain JSON objects. Parsing is total: anything
//! malformed yields `None` and the caller drops the payload; a broken
//! message must never take the consumer down.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Command verb on the control queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Add,
    Delete,
    Play,
    Stop,
    Update,
    Refresh,
}

/// A recurring schedule definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleDef {
    pub id: String,
    #[serde(default)]
    pub zone: String,
    /// Run duration in seconds.
    #[serde(default)]
    pub duration: f64,
    /// Start time of day, `HH:MM` or `HH:MM:SS`.
    #[serde(default)]
    pub time: Option<String>,
    /// Weekday tags (`mon`..`sun`), case-insensitive.
    #[serde(default)]
    pub days: Vec<String>,
}

/// A command received on the control queue.
///
/// Absent fields default to empty; only `method` is required.
#[derive(Debug, Clone, Deserialize)]
pub struct Command {
    pub method: Method,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub zone: String,
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub days: Vec<String>,
    /// Only used by `refresh`.
    #[serde(default)]
    pub schedules: Vec<ScheduleDef>,
}

impl Command {
    /// Parse a raw control-queue payload. Malformed payloads yield `None`.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        serde_json::from_slice(payload).ok()
    }
}

/// A stop message on a per-schedule queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownMessage {
    pub action: String,
    /// RFC 3339 timestamp with sub-second precision.
    pub ts: DateTime<Utc>,
}

impl ShutdownMessage {
    /// A stop message stamped with the current time.
    pub fn stop_now() -> Self {
        Self {
            action: "stop".to_string(),
            ts: Utc::now(),
        }
    }

    /// Parse a raw per-schedule queue payload. Malformed payloads yield `None`.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        serde_json::from_slice(payload).ok()
    }

    /// Whether this message should shut down a worker started at `start`.
    ///
    /// Messages stamped at or before the worker's start time are stale
    /// replays (e.g. queued while a previous worker for the same schedule
    /// was alive) and must be ignored.
    pub fn supersedes(&self, start: DateTime<Utc>) -> bool {
        self.action == "stop" && self.ts > start
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn parse_play_command() {
        let cmd = Command::parse(br#"{"method":"play","id":"z1","zone":"front","duration":300}"#)
            .expect("valid command");
        assert_eq!(cmd.method, Method::Play);
        assert_eq!(cmd.id, "z1");
        assert_eq!(cmd.zone, "front");
        assert_eq!(cmd.duration, 300.0);
        assert!(cmd.days.is_empty());
        assert!(cmd.schedules.is_empty());
    }

    #[test]
    fn parse_add_command_with_days() {
        let cmd = Command::parse(
            br#"{"method":"add","id":"z2","zone":"back","duration":120,"time":"06:30","days":["mon","wed","fri"]}"#,
        )
        .expect("valid command");
        assert_eq!(cmd.method, Method::Add);
        assert_eq!(cmd.time.as_deref(), Some("06:30"));
        assert_eq!(cmd.days, vec!["mon", "wed", "fri"]);
    }

    #[test]
    fn parse_refresh_command() {
        let cmd = Command::parse(
            br#"{"method":"refresh","schedules":[{"id":"a","zone":"front","duration":60,"time":"07:00","days":["sun"]}]}"#,
        )
        .expect("valid command");
        assert_eq!(cmd.method, Method::Refresh);
        assert_eq!(cmd.schedules.len(), 1);
        assert_eq!(cmd.schedules[0].id, "a");
    }

    #[test]
    fn absent_fields_default_to_empty() {
        let cmd = Command::parse(br#"{"method":"stop"}"#).expect("valid command");
        assert_eq!(cmd.method, Method::Stop);
        assert_eq!(cmd.id, "");
        assert_eq!(cmd.zone, "");
        assert_eq!(cmd.duration, 0.0);
        assert!(cmd.time.is_none());
    }

    #[test]
    fn malformed_payloads_are_rejected() {
        assert!(Command::parse(b"not json").is_none());
        assert!(Command::parse(b"{}").is_none()); // missing method
        assert!(Command::parse(br#"{"method":"explode"}"#).is_none());
        assert!(Command::parse(b"").is_none());
    }

    #[test]
    fn shutdown_roundtrip() {
        let msg = ShutdownMessage::stop_now();
        let bytes = serde_json::to_vec(&msg).unwrap();
        let parsed = ShutdownMessage::parse(&bytes).expect("valid shutdown");
        assert_eq!(parsed.action, "stop");
        assert_eq!(parsed.ts, msg.ts);
    }

    #[test]
    fn stale_shutdown_is_ignored() {
        let start = Utc::now();
        let stale = ShutdownMessage {
            action: "stop".to_string(),
            ts: start - Duration::seconds(5),
        };
        assert!(!stale.supersedes(start));

        let exact = ShutdownMessage {
            action: "stop".to_string(),
            ts: start,
        };
        assert!(!exact.supersedes(start));
    }

    #[test]
    fn fresh_shutdown_supersedes() {
        let start = Utc::now();
        let fresh = ShutdownMessage {
            action: "stop".to_string(),
            ts: start + Duration::milliseconds(1),
        };
        assert!(fresh.supersedes(start));
    }

    #[test]
    fn non_stop_action_never_supersedes() {
        let start = Utc::now();
        let msg = ShutdownMessage {
            action: "pause".to_string(),
            ts: start + Duration::seconds(1),
        };
        assert!(!msg.supersedes(start));
    }

    #[test]
    fn malformed_shutdown_is_rejected() {
        assert!(ShutdownMessage::parse(b"garbage").is_none());
        assert!(ShutdownMessage::parse(br#"{"action":"stop","ts":"not a time"}"#).is_none());
    }
}
