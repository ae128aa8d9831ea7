//! Camera I/O coordinator (§4.1): the one and only outbound HTTPS conversation
//! with the camera. Serializes vendor traffic, probes capabilities, runs a
//! connection monitor with exponential backoff, and exposes pause/resume
//! gates so destructive operations can freeze background polling.
//!
//! Grounded in the permissive-TLS client the teacher builds in `cam.rs`
//! (`danger_accept_invalid_certs`/`danger_accept_invalid_hostnames`) — the
//! vendor device presents a self-signed cert the same way the Axis cameras
//! there did.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use log::{debug, info, warn};
use reqwest::{Client, StatusCode};
use serde_json::json;
use tokio::sync::{Mutex, RwLock};

use crate::camera::types::{
    CapabilityMap, CapabilityResponse, CameraIdentity, CameraSettings, CcapiErrorBody,
    ConnectResult, RequestBody, RequestOpts, ResponseBody, ResponseType, Verb,
};
use crate::error::{CtlError, Result};
use crate::events::{Event, EventBus};
use crate::util;

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const BUSY_BACKOFF_ATTEMPTS: u32 = 5;
const BUSY_BACKOFF_BASE_SECS: u64 = 2;

/// A completed HTTP exchange, stripped to what the coordinator needs to
/// interpret a response: status and raw body bytes.
struct RawResponse {
    status: StatusCode,
    body: Vec<u8>,
}

/// Transport-level failure, distinct from the vendor-level `CtlError`
/// taxonomy the coordinator maps it onto.
#[derive(Debug)]
enum TransportErr {
    Timeout,
    Connect,
    Other(String),
}

fn map_transport_err(e: TransportErr, timeout: Duration) -> CtlError {
    match e {
        TransportErr::Timeout => CtlError::Timeout(timeout),
        TransportErr::Connect => CtlError::CameraDisconnected,
        TransportErr::Other(msg) => CtlError::Transient(msg),
    }
}

/// Minimal seam over the wire (§A "Test tooling": "a minimal injectable HTTP
/// seam for the coordinator's unit tests"). The real implementation wraps
/// `reqwest::Client`; tests inject a fake that returns canned responses
/// without touching a socket, so the FIFO gate, the 503 ladder, and
/// connection-loss detection are all exercised as pure async logic.
trait Transport: Send + Sync {
    fn send<'a>(
        &'a self,
        verb: Verb,
        url: &'a str,
        body: &'a RequestBody,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = std::result::Result<RawResponse, TransportErr>> + Send + 'a>>;
}

struct ReqwestTransport {
    client: Client,
}

impl Transport for ReqwestTransport {
    fn send<'a>(
        &'a self,
        verb: Verb,
        url: &'a str,
        body: &'a RequestBody,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = std::result::Result<RawResponse, TransportErr>> + Send + 'a>> {
        Box::pin(async move {
            let mut builder = match verb {
                Verb::Get => self.client.get(url),
                Verb::Post => self.client.post(url),
                Verb::Put => self.client.put(url),
            };
            builder = builder.timeout(timeout);
            builder = match body {
                RequestBody::Json(v) => builder.json(v),
                RequestBody::Bytes(b) => builder.body(b.clone()),
                RequestBody::None => builder,
            };

            let resp = builder.send().await.map_err(|e| {
                if e.is_timeout() {
                    TransportErr::Timeout
                } else if e.is_connect() {
                    TransportErr::Connect
                } else {
                    TransportErr::Other(e.to_string())
                }
            })?;
            let status = resp.status();
            let body = resp.bytes().await.map_err(|e| TransportErr::Other(e.to_string()))?.to_vec();
            Ok(RawResponse { status, body })
        })
    }
}

struct Inner {
    transport: Box<dyn Transport>,
    base_url: Mutex<String>,
    capabilities: RwLock<CapabilityMap>,
    identity: RwLock<CameraIdentity>,
    settings: RwLock<CameraSettings>,
    connected: AtomicBool,
    info_poll_pause: AtomicU32,
    conn_monitor_pause: AtomicU32,
    request_lock: Mutex<()>,
    last_successful_ip: Mutex<Option<String>>,
    data_dir: PathBuf,
    reconnect_floor: Duration,
    reconnect_ceil: Duration,
    events: EventBus,
}

/// Cheap, cloneable handle to the coordinator. Sessions hold this rather than
/// a raw controller pointer so reconnection is transparent — every call
/// re-resolves the current connection state.
#[derive(Clone)]
pub struct Coordinator(Arc<Inner>);

impl Coordinator {
    pub fn new(data_dir: PathBuf, reconnect_floor: Duration, reconnect_ceil: Duration, events: EventBus) -> Result<Self> {
        let http = Client::builder()
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(CtlError::Http)?;

        Self::new_with_transport(Box::new(ReqwestTransport { client: http }), data_dir, reconnect_floor, reconnect_ceil, events)
    }

    fn new_with_transport(
        transport: Box<dyn Transport>,
        data_dir: PathBuf,
        reconnect_floor: Duration,
        reconnect_ceil: Duration,
        events: EventBus,
    ) -> Result<Self> {
        Ok(Self(Arc::new(Inner {
            transport,
            base_url: Mutex::new(String::new()),
            capabilities: RwLock::new(CapabilityMap::default()),
            identity: RwLock::new(CameraIdentity::default()),
            settings: RwLock::new(CameraSettings::default()),
            connected: AtomicBool::new(false),
            info_poll_pause: AtomicU32::new(0),
            conn_monitor_pause: AtomicU32::new(0),
            request_lock: Mutex::new(()),
            last_successful_ip: Mutex::new(None),
            data_dir,
            reconnect_floor,
            reconnect_ceil,
            events,
        })))
    }

    pub async fn is_connected(&self) -> bool {
        self.0.connected.load(Ordering::Acquire)
    }

    /// Probe capabilities at `base_url` and, on success, mark connected. The
    /// probe is itself a non-poll vendor call (§4.1), so it takes the same
    /// serialization permit as `request()` — it must never run concurrently
    /// with an in-flight shutter press or settings call (I5).
    pub async fn connect(&self, base_url: &str) -> Result<ConnectResult> {
        let url = format!("{}/ccapi/", base_url.trim_end_matches('/'));
        let raw = {
            let _permit = self.0.request_lock.lock().await;
            self.0
                .transport
                .send(Verb::Get, &url, &RequestBody::None, PROBE_TIMEOUT)
                .await
                .map_err(|e| map_transport_err(e, PROBE_TIMEOUT))?
        };

        if !raw.status.is_success() {
            return Err(CtlError::Transient(format!("capability probe: HTTP {}", raw.status)));
        }
        let body: CapabilityResponse = serde_json::from_slice(&raw.body).map_err(CtlError::Json)?;
        let capabilities = CapabilityMap::from_response(body);

        *self.0.base_url.lock().await = base_url.to_string();
        *self.0.capabilities.write().await = capabilities.clone();
        self.0.connected.store(true, Ordering::Release);

        self.check_ip_change(base_url).await;
        self.record_connection_history(base_url).await;

        let identity = self.get_device_info().await.unwrap_or_default();
        self.0.events.publish(Event::CameraConnected { model: identity.model.clone() });
        info!("camera connected at {base_url}");

        Ok(ConnectResult { connected: true, model: identity.model, capabilities })
    }

    async fn check_ip_change(&self, new_base_url: &str) {
        let previous = self.0.last_successful_ip.lock().await.clone();
        if let Some(prev) = previous {
            if prev != new_base_url {
                self.0.events.publish(Event::CameraIpChanged {
                    previous_ip: prev,
                    new_ip: new_base_url.to_string(),
                });
            }
        }
    }

    /// Best-effort write of `camera-connection-history.json`. Never blocks or
    /// fails a connect.
    async fn record_connection_history(&self, base_url: &str) {
        *self.0.last_successful_ip.lock().await = Some(base_url.to_string());
        let path = self.0.data_dir.join("camera-connection-history.json");
        let body = json!({ "lastSuccessfulIP": base_url });
        let bytes = match serde_json::to_vec_pretty(&body) {
            Ok(b) => b,
            Err(e) => {
                warn!("serializing connection history: {e}");
                return;
            }
        };
        if let Err(e) = tokio::task::spawn_blocking(move || util::atomic_write(&path, &bytes)).await {
            warn!("connection history write task panicked: {e}");
        }
    }

    fn mark_disconnected(&self) {
        if self.0.connected.swap(false, Ordering::AcqRel) {
            warn!("camera disconnected");
            self.0.events.publish(Event::CameraDisconnected);
        }
    }

    // ── Pause/resume gates ────────────────────────────────────────────────────

    pub fn pause_info_polling(&self) {
        self.0.info_poll_pause.fetch_add(1, Ordering::AcqRel);
    }
    pub fn resume_info_polling(&self) {
        self.0.info_poll_pause.fetch_sub(1, Ordering::AcqRel);
    }
    pub fn info_polling_paused(&self) -> bool {
        self.0.info_poll_pause.load(Ordering::Acquire) > 0
    }

    pub fn pause_connection_monitor(&self) {
        self.0.conn_monitor_pause.fetch_add(1, Ordering::AcqRel);
    }
    pub fn resume_connection_monitor(&self) {
        self.0.conn_monitor_pause.fetch_sub(1, Ordering::AcqRel);
    }
    pub fn connection_monitor_paused(&self) -> bool {
        self.0.conn_monitor_pause.load(Ordering::Acquire) > 0
    }

    // ── Requests ──────────────────────────────────────────────────────────────

    /// Issue a typed vendor request. Exactly one non-poll request is in
    /// flight at a time; callers queue FIFO behind `request_lock`.
    pub async fn request(&self, verb: Verb, path: &str, body: RequestBody, opts: RequestOpts) -> Result<ResponseBody> {
        let _permit = if opts.non_blocking {
            self.0
                .request_lock
                .try_lock()
                .map_err(|_| CtlError::QueuedBehindOtherCall)?
        } else {
            self.0.request_lock.lock().await
        };

        if !self.is_connected().await {
            return Err(CtlError::CameraNotConnected);
        }

        let base_url = self.0.base_url.lock().await.clone();
        let full_path = self.resolve_path(path, verb).await;
        let url = format!("{}{}", base_url, full_path);

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let result = self.send_once(verb, &url, &body, &opts).await;
            match result {
                Ok(resp) => return Ok(resp),
                Err(CtlError::CameraBusy { .. }) if attempt < BUSY_BACKOFF_ATTEMPTS => {
                    let backoff = BUSY_BACKOFF_BASE_SECS * 2u64.pow(attempt - 1);
                    debug!("camera busy, attempt {attempt}, backing off {backoff}s");
                    tokio::time::sleep(Duration::from_secs(backoff)).await;
                    continue;
                }
                Err(e @ (CtlError::Transient(_) | CtlError::CameraDisconnected)) => {
                    self.mark_disconnected();
                    return Err(e);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Issue the event-polling long-poll directly against the transport,
    /// bypassing `request_lock` entirely. §4.1: long-polls "do NOT count
    /// against this gate" — this call must be able to run concurrently with
    /// an in-flight shutter press, since the waiter races the press (§4.2).
    pub async fn poll_event(&self, path: &str, timeout: Duration) -> Result<ResponseBody> {
        if !self.is_connected().await {
            return Err(CtlError::CameraNotConnected);
        }
        let base_url = self.0.base_url.lock().await.clone();
        let url = format!("{base_url}{path}");
        let opts = RequestOpts { timeout, response_type: ResponseType::Json, non_blocking: false };
        self.send_once(Verb::Get, &url, &RequestBody::None, &opts).await
    }

    async fn resolve_path(&self, path: &str, verb: Verb) -> String {
        if path.starts_with("/ccapi/") {
            return path.to_string();
        }
        self.0
            .capabilities
            .read()
            .await
            .resolve(path, verb)
            .unwrap_or_else(|| format!("/ccapi/{}", path.trim_start_matches('/')))
    }

    async fn send_once(&self, verb: Verb, url: &str, body: &RequestBody, opts: &RequestOpts) -> Result<ResponseBody> {
        let raw = self
            .0
            .transport
            .send(verb, url, body, opts.timeout)
            .await
            .map_err(|e| map_transport_err(e, opts.timeout))?;

        let status = raw.status;
        if status == StatusCode::SERVICE_UNAVAILABLE {
            return Err(CtlError::CameraBusy { attempt: 0 });
        }
        if status.is_client_error() {
            let message = serde_json::from_slice::<CcapiErrorBody>(&raw.body)
                .map(|b| b.message)
                .unwrap_or_else(|_| format!("HTTP {status}"));
            return Err(CtlError::CcapiError(message));
        }
        if status.is_server_error() {
            return Err(CtlError::Transient(format!("HTTP {status}")));
        }

        match opts.response_type {
            ResponseType::Json => Ok(ResponseBody::Json(serde_json::from_slice(&raw.body).map_err(CtlError::Json)?)),
            ResponseType::Bytes => Ok(ResponseBody::Bytes(raw.body)),
        }
    }

    // ── Public operations named in §4.1 ──────────────────────────────────────

    pub async fn take_photo(&self) -> Result<()> {
        self.request(
            Verb::Post,
            "shooting/control/shutterbutton",
            RequestBody::Json(json!({ "af": true })),
            RequestOpts::default(),
        )
        .await?;
        Ok(())
    }

    pub async fn get_device_info(&self) -> Result<CameraIdentity> {
        let resp = self
            .request(Verb::Get, "deviceinformation", RequestBody::None, RequestOpts::default())
            .await?;
        let value = resp.into_json().ok_or(CtlError::CcapiError("non-json device info".into()))?;
        let identity = CameraIdentity {
            model: value.get("productname").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
            serial: value.get("serialnumber").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
            firmware: value.get("firmwareversion").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
        };
        *self.0.identity.write().await = identity.clone();
        Ok(identity)
    }

    pub async fn get_settings(&self) -> Result<CameraSettings> {
        let resp = self
            .request(Verb::Get, "shooting/settings", RequestBody::None, RequestOpts::default())
            .await?;
        let value = resp.into_json().ok_or(CtlError::CcapiError("non-json settings".into()))?;
        let settings = CameraSettings {
            raw: value.as_object().cloned().unwrap_or_default(),
        };
        *self.0.settings.write().await = settings.clone();
        Ok(settings)
    }

    /// §4.3: refuse `interval <= 0`; when the camera's shutter speed is known,
    /// refuse intervals shorter than `shutter + safety_margin`.
    pub async fn validate_interval(&self, seconds: u64, safety_margin: u64) -> (bool, Option<String>) {
        if seconds == 0 {
            return (false, Some("interval must be greater than zero".into()));
        }
        let settings = self.0.settings.read().await;
        match settings.raw.get("tv").and_then(|v| v.as_str()).and_then(parse_shutter_speed_secs) {
            Some(shutter) if seconds < (shutter as u64 + safety_margin) => (
                false,
                Some(format!("interval shorter than shutter speed ({shutter:.3}s) plus safety margin")),
            ),
            Some(_) => (true, None),
            None => (true, None), // unknown shutter speed: warn via caller, non-fatal
        }
    }

    /// Read the camera's clock and return drift in seconds (camera - local).
    /// The vendor datetime endpoint isn't enumerated in the core contract;
    /// this uses the conventional CCAPI `functions/datetime` path.
    pub async fn clock_drift_seconds(&self) -> Result<f64> {
        let resp = self
            .request(Verb::Get, "functions/datetime", RequestBody::None, RequestOpts::default())
            .await?;
        let value = resp.into_json().ok_or(CtlError::CcapiError("non-json datetime".into()))?;
        let camera_time = value
            .get("datetime")
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .ok_or(CtlError::CcapiError("unparseable camera datetime".into()))?;
        let drift = camera_time.with_timezone(&Local).signed_duration_since(Local::now());
        Ok(drift.num_milliseconds() as f64 / 1000.0)
    }

    pub async fn set_camera_clock(&self, when: DateTime<Local>) -> Result<()> {
        self.request(
            Verb::Put,
            "functions/datetime",
            RequestBody::Json(json!({ "datetime": util::iso8601_local(when) })),
            RequestOpts::default(),
        )
        .await?;
        Ok(())
    }

    /// Battery snapshot for the info-polling loop. Tries `ver110/devicestatus/batterylist`
    /// first and falls back to `ver100/devicestatus/battery` (§6 endpoint list).
    pub async fn get_battery(&self) -> Result<serde_json::Value> {
        match self
            .request(Verb::Get, "/ccapi/ver110/devicestatus/batterylist", RequestBody::None, RequestOpts::default())
            .await
        {
            Ok(resp) => resp.into_json().ok_or(CtlError::CcapiError("non-json battery list".into())),
            Err(_) => {
                let resp = self
                    .request(Verb::Get, "/ccapi/ver100/devicestatus/battery", RequestBody::None, RequestOpts::default())
                    .await?;
                resp.into_json().ok_or(CtlError::CcapiError("non-json battery".into()))
            }
        }
    }
}

fn parse_shutter_speed_secs(tv: &str) -> Option<f64> {
    // Vendor shutter speed strings look like "1/250" or "2.5".
    if let Some((num, den)) = tv.split_once('/') {
        let num: f64 = num.parse().ok()?;
        let den: f64 = den.parse().ok()?;
        if den == 0.0 {
            None
        } else {
            Some(num / den)
        }
    } else {
        tv.parse().ok()
    }
}

/// Connection monitor task (§5): sleeps until due, runs one capability probe,
/// updates `connected`, backs off exponentially on failure, respects the
/// pause counter.
pub async fn run_connection_monitor(coordinator: Coordinator, base_url: String, probe_interval: Duration) {
    let mut backoff = coordinator.0.reconnect_floor;
    loop {
        if coordinator.connection_monitor_paused() {
            tokio::time::sleep(Duration::from_millis(200)).await;
            continue;
        }

        let sleep_for = if coordinator.is_connected().await { probe_interval } else { backoff };
        tokio::time::sleep(sleep_for).await;

        if coordinator.connection_monitor_paused() {
            continue;
        }

        match coordinator.connect(&base_url).await {
            Ok(_) => {
                backoff = coordinator.0.reconnect_floor;
            }
            Err(e) => {
                coordinator.mark_disconnected();
                warn!("connection monitor probe failed: {e}");
                backoff = std::cmp::min(backoff * 2, coordinator.0.reconnect_ceil);
            }
        }
    }
}

/// Info-polling loop task (§5): periodically refreshes identity/battery,
/// respecting the pause counter a session pushes for its duration.
pub async fn run_info_polling_loop(coordinator: Coordinator, interval: Duration) {
    loop {
        tokio::time::sleep(interval).await;
        if coordinator.info_polling_paused() || !coordinator.is_connected().await {
            continue;
        }
        if let Err(e) = coordinator.get_device_info().await {
            debug!("info poll: device info refresh failed: {e}");
        }
        if let Err(e) = coordinator.get_battery().await {
            debug!("info poll: battery refresh failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    /// Canned response queue standing in for the camera's wire. Each `send`
    /// pops the next scripted reply, yielding once first so a second
    /// concurrent caller has a chance to overlap if the FIFO gate didn't
    /// actually serialize them.
    #[derive(Default)]
    struct FakeTransport {
        replies: Mutex<Vec<RawResponse>>,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_observed_in_flight: Arc<AtomicUsize>,
    }

    impl FakeTransport {
        fn with_replies(replies: Vec<RawResponse>) -> Self {
            Self { replies: Mutex::new(replies), ..Default::default() }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    fn ok_response(body: serde_json::Value) -> RawResponse {
        RawResponse { status: StatusCode::OK, body: serde_json::to_vec(&body).unwrap() }
    }

    fn status_response(status: StatusCode) -> RawResponse {
        RawResponse { status, body: Vec::new() }
    }

    impl Transport for FakeTransport {
        fn send<'a>(
            &'a self,
            _verb: Verb,
            _url: &'a str,
            _body: &'a RequestBody,
            _timeout: Duration,
        ) -> Pin<Box<dyn Future<Output = std::result::Result<RawResponse, TransportErr>> + Send + 'a>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                let cur = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_observed_in_flight.fetch_max(cur, Ordering::SeqCst);
                tokio::task::yield_now().await;

                let reply = {
                    let mut replies = self.replies.lock().await;
                    if replies.is_empty() {
                        RawResponse { status: StatusCode::OK, body: b"{}".to_vec() }
                    } else {
                        replies.remove(0)
                    }
                };
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(reply)
            })
        }
    }

    fn coordinator_with(transport: FakeTransport) -> Coordinator {
        let (events, _rx) = EventBus::new();
        Coordinator::new_with_transport(
            Box::new(transport),
            PathBuf::from("/tmp/tetherd-test"),
            Duration::from_secs(2),
            Duration::from_secs(30),
            events,
        )
        .unwrap()
    }

    /// I5: at most one non-poll vendor call in flight at any instant —
    /// two concurrent `request()` callers must never overlap on the wire,
    /// even though the fake transport yields mid-call to give an unserialized
    /// implementation the chance to interleave.
    #[tokio::test]
    async fn request_calls_are_strictly_serialized() {
        let max_observed = Arc::new(AtomicUsize::new(0));
        let transport = FakeTransport {
            replies: Mutex::new(vec![ok_response(json!({"a": 1})), ok_response(json!({"a": 2}))]),
            max_observed_in_flight: max_observed.clone(),
            ..Default::default()
        };
        let coord = coordinator_with(transport);
        coord.0.connected.store(true, Ordering::Release);
        *coord.0.base_url.lock().await = "https://camera".to_string();

        let c1 = coord.clone();
        let c2 = coord.clone();
        let (r1, r2) = tokio::join!(
            c1.request(Verb::Get, "shooting/settings", RequestBody::None, RequestOpts::default()),
            c2.request(Verb::Get, "shooting/settings", RequestBody::None, RequestOpts::default()),
        );
        assert!(r1.is_ok());
        assert!(r2.is_ok());
        assert_eq!(max_observed.load(Ordering::SeqCst), 1, "two requests overlapped on the wire");
    }

    /// Exercises the HTTP 503 backoff ladder with a paused clock: no real
    /// sleeping, but every `tokio::time::sleep` in `request()`'s retry loop
    /// still advances and resolves in simulated time.
    #[tokio::test(start_paused = true)]
    async fn retries_through_503_ladder_then_succeeds() {
        let transport = FakeTransport::with_replies(vec![
            status_response(StatusCode::SERVICE_UNAVAILABLE),
            status_response(StatusCode::SERVICE_UNAVAILABLE),
            ok_response(json!({ "ok": true })),
        ]);
        let coord = coordinator_with(transport);
        coord.0.connected.store(true, Ordering::Release);

        let result = coord.request(Verb::Get, "shooting/settings", RequestBody::None, RequestOpts::default()).await;
        assert!(result.is_ok(), "expected eventual success through the busy ladder: {result:?}");
    }

    /// §7: `CameraDisconnected` — a transport-level connect failure — must
    /// flip the coordinator to disconnected, the same as a `Transient` error.
    #[tokio::test]
    async fn connect_failure_marks_coordinator_disconnected() {
        struct AlwaysConnectFails;
        impl Transport for AlwaysConnectFails {
            fn send<'a>(
                &'a self,
                _verb: Verb,
                _url: &'a str,
                _body: &'a RequestBody,
                _timeout: Duration,
            ) -> Pin<Box<dyn Future<Output = std::result::Result<RawResponse, TransportErr>> + Send + 'a>> {
                Box::pin(async move { Err(TransportErr::Connect) })
            }
        }
        let (events, _rx) = EventBus::new();
        let coord = Coordinator::new_with_transport(
            Box::new(AlwaysConnectFails),
            PathBuf::from("/tmp/tetherd-test"),
            Duration::from_secs(2),
            Duration::from_secs(30),
            events,
        )
        .unwrap();
        coord.0.connected.store(true, Ordering::Release);

        let result = coord.request(Verb::Get, "shooting/settings", RequestBody::None, RequestOpts::default()).await;
        assert!(matches!(result, Err(CtlError::CameraDisconnected)));
        assert!(!coord.is_connected().await);
    }

    #[test]
    fn parses_fractional_shutter_speed() {
        assert_eq!(parse_shutter_speed_secs("1/250"), Some(1.0 / 250.0));
    }

    #[test]
    fn parses_plain_decimal_shutter_speed() {
        assert_eq!(parse_shutter_speed_secs("2.5"), Some(2.5));
    }

    #[test]
    fn rejects_malformed_shutter_speed() {
        assert_eq!(parse_shutter_speed_secs("bogus"), None);
    }

    #[tokio::test]
    async fn validate_interval_rejects_zero() {
        let (events, _rx) = EventBus::new();
        let coord = Coordinator::new(PathBuf::from("/tmp/tetherd-test"), Duration::from_secs(2), Duration::from_secs(30), events).unwrap();
        let (valid, _) = coord.validate_interval(0, 1).await;
        assert!(!valid);
    }

    #[tokio::test]
    async fn pause_resume_gate_counters() {
        let (events, _rx) = EventBus::new();
        let coord = Coordinator::new(PathBuf::from("/tmp/tetherd-test"), Duration::from_secs(2), Duration::from_secs(30), events).unwrap();
        assert!(!coord.info_polling_paused());
        coord.pause_info_polling();
        assert!(coord.info_polling_paused());
        coord.resume_info_polling();
        assert!(!coord.info_polling_paused());
    }
}
