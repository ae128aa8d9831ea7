//! Error taxonomy for the controller (§7).
//!
//! `CtlError` groups the spec's error *kinds* — not exhaustive wire-level
//! types — so callers can match on `Transient` / `CameraBusy` / etc. without
//! caring whether the underlying cause was a socket error or an HTTP status.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CtlError {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Task join: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// Socket/TLS error, connect timeout, or an unrecognised 5xx — caller may retry.
    #[error("transient camera error: {0}")]
    Transient(String),

    /// HTTP 503 from the camera. Carries the attempt number for the backoff ladder.
    #[error("camera busy (attempt {attempt})")]
    CameraBusy { attempt: u32 },

    /// The coordinator's TLS socket closed mid-operation, or the health probe failed.
    #[error("camera disconnected")]
    CameraDisconnected,

    /// Vendor-returned `{message}` body on a 4xx — not retried, surfaced verbatim.
    #[error("camera error: {0}")]
    CcapiError(String),

    #[error("invalid title: {0}")]
    InvalidTitle(String),

    #[error("invalid interval: {0}")]
    InvalidInterval(String),

    #[error("invalid session config: {0}")]
    InvalidConfig(String),

    #[error("capture already in progress")]
    CaptureInProgress,

    #[error("session already running")]
    AlreadyRunning,

    #[error("high failure rate detected")]
    HighFailureRate,

    #[error("timed out waiting for camera event (deadline {0:?})")]
    Timeout(std::time::Duration),

    /// Caller asked for a strictly-serialized, non-blocking call and the
    /// single in-flight slot was occupied.
    #[error("queued behind another in-flight call")]
    QueuedBehindOtherCall,

    #[error("not connected to camera")]
    CameraNotConnected,

    #[error("config: {0}")]
    Config(String),

    #[error("report not found: {0}")]
    ReportNotFound(uuid::Uuid),
}

pub type Result<T> = std::result::Result<T, CtlError>;
