//! Inbound commands and outbound events (§6) plus the non-blocking bus that
//! carries them. The transport that multiplexes these to UI clients is out of
//! scope here; this module only defines the stable contract and a channel to
//! publish on.

use serde::Serialize;
use uuid::Uuid;

use crate::session::stats::StatsSnapshot;
use crate::timesync::Interface;

// ── Commands ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum StopCondition {
    Unlimited,
    StopAfter(u32),
    StopAt(chrono::DateTime<chrono::Local>),
}

#[derive(Debug, Clone)]
pub enum Command {
    StartIntervalometerWithTitle {
        interval_seconds: u64,
        stop_condition: StopCondition,
        title: Option<String>,
    },
    PauseIntervalometer,
    ResumeIntervalometer,
    StopIntervalometer,
    UpdateSessionTitle { session_id: Uuid, title: String },
    GetTimelapseReports,
    GetTimelapseReport { id: Uuid },
    DeleteTimelapseReport { id: Uuid },
    UpdateReportTitle { id: Uuid, title: String },
    ClientConnected { address: String, interface: Interface },
    ClientDisconnected { address: String },
    ClientTimeResponse {
        address: String,
        client_time: chrono::DateTime<chrono::Utc>,
        timezone: Option<String>,
    },
    ManualTimeSync,
}

// ── Events ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    SessionStarted { session_id: Uuid, title: String },
    PhotoTaken {
        session_id: Uuid,
        title: String,
        shot_number: u32,
        file_path: String,
        shot_duration_seconds: f64,
    },
    PhotoFailed {
        session_id: Uuid,
        title: String,
        shot_number: u32,
        error: String,
    },
    PhotoOvertime {
        session_id: Uuid,
        title: String,
        shot_number: u32,
        interval: u64,
        shot_duration: f64,
        overtime: f64,
        file_path: String,
        message: String,
    },
    SessionCompleted { session_id: Uuid, title: String, reason: String, stats: StatsSnapshot },
    SessionStopped { session_id: Uuid, title: String, reason: String, stats: StatsSnapshot },
    SessionError { session_id: Uuid, title: String, reason: String, stats: StatsSnapshot },
    SessionSaved { session_id: Uuid, report_id: Uuid },

    CameraConnected { model: String },
    CameraDisconnected,
    CameraIpChanged { previous_ip: String, new_ip: String },

    TimeSyncStatus { state: String, valid: bool },
    PiSync { client_address: String, set_to: chrono::DateTime<chrono::Utc> },
    CameraSync { drift_seconds: f64 },

    StatusUpdate {
        camera_connected: bool,
        time_proxy_valid: bool,
        active_session: Option<StatsSnapshot>,
    },
}

/// Non-blocking publisher: core components send on an unbounded channel, the
/// external transport drains it. Back-pressure is the consumer's concern.
#[derive(Clone)]
pub struct EventBus {
    tx: tokio::sync::mpsc::UnboundedSender<Event>,
}

pub struct EventReceiver {
    pub rx: tokio::sync::mpsc::UnboundedReceiver<Event>,
}

impl EventBus {
    pub fn new() -> (Self, EventReceiver) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (Self { tx }, EventReceiver { rx })
    }

    /// Publish an event. Never blocks; a dropped receiver just means the
    /// event is discarded (logged at debug, not an error condition).
    pub fn publish(&self, event: Event) {
        if self.tx.send(event).is_err() {
            log::debug!("event bus has no receiver; event dropped");
        }
    }
}
