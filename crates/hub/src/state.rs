use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::actuator::Transition;
use crate::alerts::Alert;
use crate::report::{CalibrationReport, ProfilesReport, StatusReport};

/// Maximum number of events retained in the ring buffer.
const MAX_EVENTS: usize = 200;

// ---------------------------------------------------------------------------
// Public type alias
// ---------------------------------------------------------------------------

pub type SharedState = Arc<RwLock<SystemState>>;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

/// What the web API serves. Written only by the control loop (snapshots)
/// and the MQTT task (connection flag).
pub struct SystemState {
    pub started_at: Instant,
    pub mqtt_connected: bool,
    pub status: Option<StatusReport>,
    pub profiles: Option<ProfilesReport>,
    pub calibration: Option<CalibrationReport>,
    pub events: VecDeque<SystemEvent>,
}

#[derive(Clone, Serialize)]
pub struct SystemEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    pub kind: EventKind,
    pub detail: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Actuator,
    Alert,
    Admin,
    Error,
    System,
}

// ---------------------------------------------------------------------------
// JSON response (what the API returns)
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct StatusResponse {
    pub uptime_secs: u64,
    pub mqtt_connected: bool,
    #[serde(flatten)]
    pub status: Option<StatusReport>,
    pub events: Vec<SystemEvent>,
}

// ---------------------------------------------------------------------------
// Construction & mutation
// ---------------------------------------------------------------------------

impl SystemState {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            mqtt_connected: false,
            status: None,
            profiles: None,
            calibration: None,
            events: VecDeque::with_capacity(MAX_EVENTS),
        }
    }

    pub fn shared() -> SharedState {
        Arc::new(RwLock::new(Self::new()))
    }

    pub fn record_transition(&mut self, t: &Transition) {
        let state_str = if t.on { "ON" } else { "OFF" };
        self.push_event(EventKind::Actuator, format!("{} set {state_str}", t.actuator));
    }

    pub fn record_alert(&mut self, alert: &Alert) {
        self.push_event(EventKind::Alert, alert.message.clone());
    }

    /// Record a successful administrative operation.
    pub fn record_admin(&mut self, detail: String) {
        self.push_event(EventKind::Admin, detail);
    }

    pub fn record_error(&mut self, detail: String) {
        self.push_event(EventKind::Error, detail);
    }

    pub fn record_system(&mut self, detail: String) {
        self.push_event(EventKind::System, detail);
    }

    /// Build the JSON-serialisable status snapshot, newest events first.
    pub fn to_status(&self) -> StatusResponse {
        StatusResponse {
            uptime_secs: self.started_at.elapsed().as_secs(),
            mqtt_connected: self.mqtt_connected,
            status: self.status.clone(),
            events: self.events.iter().rev().cloned().collect(),
        }
    }

    fn push_event(&mut self, kind: EventKind, detail: String) {
        if self.events.len() >= MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(SystemEvent {
            ts: OffsetDateTime::now_utc(),
            kind,
            detail,
        });
    }
}

impl Default for SystemState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::ActuatorKind;

    #[test]
    fn ring_buffer_is_bounded_and_newest_first() {
        let mut st = SystemState::new();
        for i in 0..MAX_EVENTS + 5 {
            st.record_system(format!("event {i}"));
        }
        assert_eq!(st.events.len(), MAX_EVENTS);
        let status = st.to_status();
        assert_eq!(status.events[0].detail, format!("event {}", MAX_EVENTS + 4));
        assert_eq!(status.events.last().unwrap().detail, "event 5");
    }

    #[test]
    fn transition_event_text() {
        let mut st = SystemState::new();
        st.record_transition(&Transition {
            actuator: ActuatorKind::Pump,
            on: true,
            at: 0,
        });
        assert_eq!(st.events[0].kind, EventKind::Actuator);
        assert_eq!(st.events[0].detail, "pump set ON");
    }

    #[test]
    fn status_serializes_without_snapshot() {
        let st = SystemState::new();
        let json = serde_json::to_value(st.to_status()).unwrap();
        assert_eq!(json["mqtt_connected"], false);
        assert!(json["events"].as_array().unwrap().is_empty());
    }
}
