use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{event, Level};

/// Events recorded for every forwarded message, in fixed order: pulled,
/// pushed, push-acknowledged, pull-acknowledged. Together they form the
/// compliance trail proving no message vanished in transit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    PulledFromIncoming {
        title: Option<String>,
        delivery_tag: u64,
    },
    PushedToOutgoing {
        title: Option<String>,
        routing_key: String,
    },
    PushAcknowledged {
        title: Option<String>,
    },
    PullAcknowledged {
        title: Option<String>,
        delivery_tag: u64,
    },
}

impl AuditEvent {
    fn kind(&self) -> &'static str {
        match self {
            AuditEvent::PulledFromIncoming { .. } => "pulled_from_incoming",
            AuditEvent::PushedToOutgoing { .. } => "pushed_to_outgoing",
            AuditEvent::PushAcknowledged { .. } => "push_acknowledged",
            AuditEvent::PullAcknowledged { .. } => "pull_acknowledged",
        }
    }

    fn title(&self) -> &str {
        let title = match self {
            AuditEvent::PulledFromIncoming { title, .. } => title,
            AuditEvent::PushedToOutgoing { title, .. } => title,
            AuditEvent::PushAcknowledged { title } => title,
            AuditEvent::PullAcknowledged { title, .. } => title,
        };
        title.as_deref().unwrap_or("-")
    }
}

impl fmt::Display for AuditEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} title={}", self.kind(), self.title())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub seq: u64,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: AuditEvent,
}

/// Process-wide audit trail.
///
/// Recording is unconditional: there is no level to raise, lower, or disable,
/// and records do not pass through the `tracing` subscriber's filter. They
/// land in the trail's own append-only sink regardless of how logging is
/// configured. Each record is additionally emitted as a `tracing` event under
/// the dedicated `audit` target so operators see the trail inline with
/// service logs.
///
/// The in-memory window is bounded; the `tracing` emission carries the full
/// trail to whatever sink the deployment attaches.
#[derive(Debug)]
pub struct AuditLog {
    records: Mutex<AuditWindow>,
}

#[derive(Debug)]
struct AuditWindow {
    entries: VecDeque<AuditRecord>,
    capacity: usize,
    next_seq: u64,
}

pub const DEFAULT_AUDIT_CAPACITY: usize = 1024;

impl Default for AuditLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_AUDIT_CAPACITY)
    }
}

impl AuditLog {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: Mutex::new(AuditWindow {
                entries: VecDeque::with_capacity(capacity),
                capacity,
                next_seq: 0,
            }),
        }
    }

    /// Append an event to the trail.
    pub fn record(&self, audit_event: AuditEvent) {
        event!(target: "audit", Level::INFO, event = %audit_event);

        let mut window = self.lock();
        let seq = window.next_seq;
        window.next_seq += 1;
        if window.entries.len() == window.capacity {
            window.entries.pop_front();
        }
        window.entries.push_back(AuditRecord {
            seq,
            at: Utc::now(),
            event: audit_event,
        });
    }

    pub fn pulled(&self, title: Option<String>, delivery_tag: u64) {
        self.record(AuditEvent::PulledFromIncoming {
            title,
            delivery_tag,
        });
    }

    pub fn pushed(&self, title: Option<String>, routing_key: &str) {
        self.record(AuditEvent::PushedToOutgoing {
            title,
            routing_key: routing_key.to_string(),
        });
    }

    pub fn push_acknowledged(&self, title: Option<String>) {
        self.record(AuditEvent::PushAcknowledged { title });
    }

    pub fn pull_acknowledged(&self, title: Option<String>, delivery_tag: u64) {
        self.record(AuditEvent::PullAcknowledged {
            title,
            delivery_tag,
        });
    }

    /// Snapshot of the retained window, oldest first.
    pub fn recent(&self) -> Vec<AuditRecord> {
        self.lock().entries.iter().cloned().collect()
    }

    /// Total number of events ever recorded (including those rotated out of
    /// the window).
    pub fn recorded(&self) -> u64 {
        self.lock().next_seq
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, AuditWindow> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_recorded_in_order() {
        let audit = AuditLog::default();
        audit.pulled(Some("T1".into()), 1);
        audit.pushed(Some("T1".into()), "register_publisher");
        audit.push_acknowledged(Some("T1".into()));
        audit.pull_acknowledged(Some("T1".into()), 1);

        let kinds: Vec<&str> = audit.recent().iter().map(|r| r.event.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                "pulled_from_incoming",
                "pushed_to_outgoing",
                "push_acknowledged",
                "pull_acknowledged",
            ]
        );
    }

    #[test]
    fn sequence_numbers_are_strictly_increasing() {
        let audit = AuditLog::default();
        for tag in 0..5 {
            audit.pulled(None, tag);
        }
        let seqs: Vec<u64> = audit.recent().iter().map(|r| r.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn window_rotates_but_count_keeps_growing() {
        let audit = AuditLog::with_capacity(2);
        audit.pulled(None, 1);
        audit.pulled(None, 2);
        audit.pulled(None, 3);

        let recent = audit.recent();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].seq, 1);
        assert_eq!(recent[1].seq, 2);
        assert_eq!(audit.recorded(), 3);
    }

    #[test]
    fn records_serialize_for_export() {
        let audit = AuditLog::default();
        audit.pulled(Some("T1".into()), 9);

        let json = serde_json::to_string(&audit.recent()).unwrap();
        assert!(json.contains(r#""event":"pulled_from_incoming""#));
        assert!(json.contains(r#""title":"T1""#));
        assert!(json.contains(r#""delivery_tag":9"#));
    }

    #[test]
    fn missing_title_renders_as_dash() {
        let event = AuditEvent::PushAcknowledged { title: None };
        assert_eq!(event.to_string(), "push_acknowledged title=-");
    }

    #[test]
    fn ack_event_strictly_follows_push_event() {
        let audit = AuditLog::default();
        audit.pulled(Some("T9".into()), 7);
        audit.pushed(Some("T9".into()), "register_publisher");
        audit.push_acknowledged(Some("T9".into()));
        audit.pull_acknowledged(Some("T9".into()), 7);

        let records = audit.recent();
        let push_seq = records
            .iter()
            .find(|r| matches!(r.event, AuditEvent::PushedToOutgoing { .. }))
            .map(|r| r.seq)
            .unwrap();
        let ack_seq = records
            .iter()
            .find(|r| matches!(r.event, AuditEvent::PullAcknowledged { .. }))
            .map(|r| r.seq)
            .unwrap();
        assert!(ack_seq > push_seq);
    }
}
