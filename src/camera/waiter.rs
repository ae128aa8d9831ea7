//! Event-polling waiter (§4.2): given a coordinator and a wall-clock deadline,
//! block until the vendor's long-poll reports a new content item and return
//! its vendor path.

use std::time::Duration;

use log::debug;
use tokio::time::Instant;

use crate::camera::coordinator::Coordinator;
use crate::error::{CtlError, Result};

const MAX_POLL_TIMEOUT: Duration = Duration::from_secs(35);
const HEARTBEAT_SLEEP: Duration = Duration::from_millis(50);
const ALREADY_STARTED_RETRY: Duration = Duration::from_millis(100);

/// Classify `addedcontents` paths: prefer JPEG, fall back to RAW, else the
/// first element (§4.2 step 2, boundary B5).
fn pick_content(paths: &[String]) -> Option<String> {
    if paths.is_empty() {
        return None;
    }
    let is_jpeg = |p: &str| {
        let lower = p.to_ascii_lowercase();
        lower.ends_with(".jpg") || lower.ends_with(".jpeg")
    };
    let is_raw = |p: &str| {
        let lower = p.to_ascii_lowercase();
        lower.ends_with(".cr3") || lower.ends_with(".cr2") || lower.ends_with(".raw")
    };
    paths
        .iter()
        .find(|p| is_jpeg(p))
        .or_else(|| paths.iter().find(|p| is_raw(p)))
        .or_else(|| paths.first())
        .cloned()
}

/// Wait for the camera's event-polling long-poll to report a new content
/// item, up to `deadline`. Must be started before the shutter press (race
/// invariant, §4.2) — callers spawn this before issuing `take_photo`.
pub async fn wait_for_content(coordinator: &Coordinator, deadline: Instant, cancel: &mut tokio::sync::watch::Receiver<bool>) -> Result<String> {
    loop {
        let now = Instant::now();
        if now >= deadline {
            return Err(CtlError::Timeout(deadline.saturating_duration_since(now)));
        }
        let remaining = deadline.saturating_duration_since(now);
        let call_timeout = std::cmp::min(remaining, MAX_POLL_TIMEOUT);

        // Fixed vendor path (§6) rather than capability-resolved: the
        // long-poll's query string would never match a capability record.
        // Goes through `poll_event`, not `request` — it must not queue
        // behind the shutter press it's racing against (§4.1, §4.2).
        let poll = coordinator.poll_event("/ccapi/ver110/event/polling?timeout=long", call_timeout);

        tokio::select! {
            _ = cancel.changed() => {
                if *cancel.borrow() {
                    return Err(CtlError::Transient("capture cancelled".into()));
                }
            }
            result = poll => {
                match result {
                    Ok(resp) => {
                        let value = resp.into_json().ok_or(CtlError::CcapiError("non-json event poll response".into()))?;
                        let added: Vec<String> = value
                            .get("addedcontents")
                            .and_then(|v| v.as_array())
                            .map(|arr| arr.iter().filter_map(|e| e.as_str().map(str::to_string)).collect())
                            .unwrap_or_default();

                        if let Some(path) = pick_content(&added) {
                            return Ok(path);
                        }
                        debug!("event poll: heartbeat, no addedcontents");
                        tokio::time::sleep(HEARTBEAT_SLEEP).await;
                    }
                    Err(CtlError::Timeout(_)) => {
                        continue; // client-side long-poll expiry, keep looping
                    }
                    Err(CtlError::CcapiError(msg)) if msg.contains("Already started") => {
                        tokio::time::sleep(ALREADY_STARTED_RETRY).await;
                    }
                    Err(e @ CtlError::CameraDisconnected) => return Err(e),
                    Err(e) => return Err(e),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_jpeg_over_raw() {
        let paths = vec!["x.CR3".to_string(), "y.JPG".to_string()];
        assert_eq!(pick_content(&paths), Some("y.JPG".to_string()));
    }

    #[test]
    fn falls_back_to_raw_when_no_jpeg() {
        let paths = vec!["x.cr2".to_string()];
        assert_eq!(pick_content(&paths), Some("x.cr2".to_string()));
    }

    #[test]
    fn falls_back_to_first_when_neither_jpeg_nor_raw() {
        let paths = vec!["x.bin".to_string(), "y.dat".to_string()];
        assert_eq!(pick_content(&paths), Some("x.bin".to_string()));
    }

    #[test]
    fn empty_list_yields_none() {
        assert_eq!(pick_content(&[]), None);
    }
}
