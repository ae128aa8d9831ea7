//! Time-proxy state machine (§4.4). Single-writer: every signal is enqueued
//! to one task, which is what makes the transition table testable.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use log::{info, warn};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::camera::coordinator::Coordinator;
use crate::events::{Event, EventBus};

/// Tunables lifted from `tetherd.conf` (§4.4); defaults match spec.md's
/// suggested values.
#[derive(Debug, Clone, Copy)]
pub struct TimeProxyTuning {
    pub validity_window: Duration,
    pub resync_interval: Duration,
    pub expiry_sweep: Duration,
    pub camera_drift_threshold: Duration,
}

impl Default for TimeProxyTuning {
    fn default() -> Self {
        Self {
            validity_window: Duration::from_secs(600),
            resync_interval: Duration::from_secs(300),
            expiry_sweep: Duration::from_secs(60),
            camera_drift_threshold: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interface {
    Ap0,
    Wlan0,
}

impl Interface {
    /// ap0 > wlan0: total order on interface tier.
    fn priority(self) -> u8 {
        match self {
            Interface::Ap0 => 1,
            Interface::Wlan0 => 0,
        }
    }
}

#[derive(Debug, Clone)]
struct ConnectedClient {
    address: String,
    interface: Interface,
    last_seen: DateTime<Local>,
}

#[derive(Debug, Clone)]
enum ProxyState {
    None,
    Device { address: String, interface: Interface, acquired_at: DateTime<Local> },
}

impl ProxyState {
    fn is_valid(&self, validity_window: Duration) -> bool {
        match self {
            ProxyState::None => false,
            ProxyState::Device { acquired_at, .. } => {
                Local::now().signed_duration_since(*acquired_at)
                    < chrono::Duration::from_std(validity_window).unwrap()
            }
        }
    }

    fn tier(&self) -> Option<Interface> {
        match self {
            ProxyState::None => None,
            ProxyState::Device { interface, .. } => Some(*interface),
        }
    }

    fn address(&self) -> Option<&str> {
        match self {
            ProxyState::None => None,
            ProxyState::Device { address, .. } => Some(address),
        }
    }
}

/// Signals the state machine consumes, enqueued in order.
#[derive(Debug)]
pub enum Signal {
    ClientConnect { address: String, interface: Interface },
    ClientTimeResponse { address: String, client_time: DateTime<Utc>, timezone: Option<String> },
    ClientDisconnect { address: String },
    ResyncTick,
    ExpirySweepTick,
}

pub struct TimeProxyHandle {
    tx: mpsc::UnboundedSender<Signal>,
    acquired_at_rx: watch::Receiver<Option<DateTime<Local>>>,
    validity_window: Duration,
}

impl TimeProxyHandle {
    pub fn send(&self, signal: Signal) {
        if self.tx.send(signal).is_err() {
            warn!("time-proxy state machine is gone; signal dropped");
        }
    }

    /// Cheap read-only check of `isValid()` (§3, I6) without round-tripping
    /// through the state-machine task.
    pub fn is_valid(&self) -> bool {
        match *self.acquired_at_rx.borrow() {
            Some(acquired_at) => {
                Local::now().signed_duration_since(acquired_at) < chrono::Duration::from_std(self.validity_window).unwrap()
            }
            None => false,
        }
    }
}

/// Spawn the single-task state machine. Returns a handle for enqueuing
/// signals and a join handle for the task itself.
pub fn spawn(coordinator: Coordinator, events: EventBus, tuning: TimeProxyTuning) -> (TimeProxyHandle, tokio::task::JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let (acquired_at_tx, acquired_at_rx) = watch::channel(None);
    let handle = TimeProxyHandle { tx: tx.clone(), acquired_at_rx, validity_window: tuning.validity_window };

    let join = tokio::spawn(run(rx, tx, coordinator, events, tuning, acquired_at_tx));
    (handle, join)
}

async fn run(
    mut rx: mpsc::UnboundedReceiver<Signal>,
    self_tx: mpsc::UnboundedSender<Signal>,
    coordinator: Coordinator,
    events: EventBus,
    tuning: TimeProxyTuning,
    acquired_at_tx: watch::Sender<Option<DateTime<Local>>>,
) {
    let mut state = ProxyState::None;
    let mut clients: HashMap<String, ConnectedClient> = HashMap::new();

    let mut resync_timer = tokio::time::interval_at(Instant::now() + tuning.resync_interval, tuning.resync_interval);
    let mut sweep_timer = tokio::time::interval_at(Instant::now() + tuning.expiry_sweep, tuning.expiry_sweep);

    loop {
        tokio::select! {
            sig = rx.recv() => {
                let Some(sig) = sig else { break };
                let reset_resync = handle_signal(sig, &mut state, &mut clients, &coordinator, &events, tuning).await;
                publish_acquired_at(&state, &acquired_at_tx);
                if reset_resync {
                    // §4.4: acquiring a proxy "cancels pending resync, schedules
                    // new" — the 5-minute cadence restarts from acquisition, not
                    // from task startup.
                    resync_timer = tokio::time::interval_at(Instant::now() + tuning.resync_interval, tuning.resync_interval);
                }
            }
            _ = resync_timer.tick() => {
                let _ = self_tx.send(Signal::ResyncTick);
            }
            _ = sweep_timer.tick() => {
                let _ = self_tx.send(Signal::ExpirySweepTick);
            }
        }
    }
}

fn publish_acquired_at(state: &ProxyState, tx: &watch::Sender<Option<DateTime<Local>>>) {
    let value = match state {
        ProxyState::None => None,
        ProxyState::Device { acquired_at, .. } => Some(*acquired_at),
    };
    let _ = tx.send_if_modified(|current| {
        if *current != value {
            *current = value;
            true
        } else {
            false
        }
    });
}

/// Returns `true` when the signal acquired or re-acquired a proxy and the
/// resync timer must restart from now (§4.4: "cancel pending resync,
/// schedule new").
async fn handle_signal(
    sig: Signal,
    state: &mut ProxyState,
    clients: &mut HashMap<String, ConnectedClient>,
    coordinator: &Coordinator,
    events: &EventBus,
    tuning: TimeProxyTuning,
) -> bool {
    match sig {
        Signal::ClientConnect { address, interface } => {
            clients.insert(
                address.clone(),
                ConnectedClient { address: address.clone(), interface, last_seen: Local::now() },
            );
            on_client_connect(address, interface, state, events, tuning.validity_window)
        }
        Signal::ClientTimeResponse { address, client_time, timezone } => {
            on_time_response(address, client_time, timezone, state, coordinator, events, tuning.camera_drift_threshold).await;
            false
        }
        Signal::ClientDisconnect { address } => {
            clients.remove(&address);
            // Validity window persists; state is unchanged.
            false
        }
        Signal::ResyncTick => {
            on_resync(state, clients, events);
            false
        }
        Signal::ExpirySweepTick => {
            if !state.is_valid(tuning.validity_window) {
                if !matches!(state, ProxyState::None) {
                    info!("time-proxy validity window expired; state -> none");
                }
                *state = ProxyState::None;
            }
            false
        }
    }
}

/// Returns `true` iff `state` was (re)acquired by this connect — the caller
/// resets the resync cadence only then, not on an ignored connect.
fn on_client_connect(address: String, interface: Interface, state: &mut ProxyState, events: &EventBus, validity_window: Duration) -> bool {
    match interface {
        Interface::Ap0 => {
            info!("time-proxy: ap0 client {address} connected; becomes proxy");
            *state = ProxyState::Device { address, interface, acquired_at: Local::now() };
            events.publish(Event::TimeSyncStatus { state: "ap0-device".into(), valid: true });
            true
        }
        Interface::Wlan0 => {
            if state.tier() == Some(Interface::Ap0) && state.is_valid(validity_window) {
                return false; // ap0 outranks; ignore
            }
            if matches!(state, ProxyState::Device { interface: Interface::Wlan0, .. }) && state.is_valid(validity_window) {
                return false; // first wlan0 wins
            }
            info!("time-proxy: wlan0 client {address} connected; becomes proxy");
            *state = ProxyState::Device { address, interface, acquired_at: Local::now() };
            events.publish(Event::TimeSyncStatus { state: "wlan0-device".into(), valid: true });
            true
        }
    }
}

async fn on_time_response(
    address: String,
    client_time: DateTime<Utc>,
    timezone: Option<String>,
    state: &mut ProxyState,
    coordinator: &Coordinator,
    events: &EventBus,
    drift_threshold: Duration,
) {
    if state.address() != Some(address.as_str()) {
        return;
    }
    info!("time-proxy: applying clock from {address}: {client_time}");
    events.publish(Event::PiSync { client_address: address, set_to: client_time });

    if let ProxyState::Device { acquired_at, .. } = state {
        *acquired_at = Local::now();
    }
    let _ = timezone; // host-OS timezone application is out of scope here

    if coordinator.is_connected().await {
        match cascade_to_camera(coordinator, drift_threshold).await {
            Ok(Some(drift)) => events.publish(Event::CameraSync { drift_seconds: drift }),
            Ok(None) => {}
            Err(e) => warn!("camera clock cascade failed: {e}"),
        }
    }
}

fn on_resync(state: &mut ProxyState, clients: &HashMap<String, ConnectedClient>, events: &EventBus) {
    match state.clone() {
        ProxyState::Device { interface: Interface::Ap0, address, .. } => {
            let target = clients
                .values()
                .find(|c| c.interface == Interface::Ap0 && c.address != address)
                .map(|c| c.address.clone())
                .or_else(|| clients.get(&address).map(|c| c.address.clone()));
            if let Some(addr) = target {
                info!("time-proxy resync: re-targeting ap0 client {addr}");
                events.publish(Event::TimeSyncStatus { state: "ap0-device".into(), valid: true });
            }
        }
        ProxyState::Device { interface: Interface::Wlan0, address, .. } => {
            if let Some(ap0_client) = clients.values().find(|c| c.interface == Interface::Ap0) {
                info!("time-proxy resync: promoting ap0 client {}", ap0_client.address);
                *state = ProxyState::Device {
                    address: ap0_client.address.clone(),
                    interface: Interface::Ap0,
                    acquired_at: Local::now(),
                };
                events.publish(Event::TimeSyncStatus { state: "ap0-device".into(), valid: true });
            } else if clients.contains_key(&address) {
                // re-use current client
            } else if let Some(other) = clients.values().find(|c| c.interface == Interface::Wlan0) {
                info!("time-proxy resync: failing over to wlan0 client {}", other.address);
                *state = ProxyState::Device {
                    address: other.address.clone(),
                    interface: Interface::Wlan0,
                    acquired_at: Local::now(),
                };
            }
        }
        ProxyState::None => {}
    }
}

/// Read the camera's clock, compare to local time, and push a correction if
/// drift exceeds the threshold. Returns the observed drift (seconds) if a
/// push was made.
async fn cascade_to_camera(coordinator: &Coordinator, drift_threshold: Duration) -> crate::error::Result<Option<f64>> {
    let drift = coordinator.clock_drift_seconds().await?;
    if drift.abs() > drift_threshold.as_secs_f64() {
        coordinator.set_camera_clock(Local::now()).await?;
        Ok(Some(drift))
    } else {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ap0_outranks_wlan0() {
        assert!(Interface::Ap0.priority() > Interface::Wlan0.priority());
    }

    #[test]
    fn state_invalid_when_none() {
        assert!(!ProxyState::None.is_valid(TimeProxyTuning::default().validity_window));
    }

    #[test]
    fn state_invalid_past_validity_window() {
        let old = Local::now() - chrono::Duration::minutes(11);
        let s = ProxyState::Device { address: "1.2.3.4".into(), interface: Interface::Wlan0, acquired_at: old };
        assert!(!s.is_valid(TimeProxyTuning::default().validity_window));
    }

    #[test]
    fn state_valid_within_window() {
        let recent = Local::now() - chrono::Duration::minutes(1);
        let s = ProxyState::Device { address: "1.2.3.4".into(), interface: Interface::Ap0, acquired_at: recent };
        assert!(s.is_valid(TimeProxyTuning::default().validity_window));
    }

    #[test]
    fn ap0_connect_always_resets_resync() {
        let (events, _rx) = EventBus::new();
        let mut state = ProxyState::None;
        let reset = on_client_connect("a".into(), Interface::Ap0, &mut state, &events, Duration::from_secs(600));
        assert!(reset);
        assert_eq!(state.tier(), Some(Interface::Ap0));
    }

    #[test]
    fn wlan0_connect_ignored_while_valid_ap0_held_does_not_reset_resync() {
        let (events, _rx) = EventBus::new();
        let mut state = ProxyState::Device { address: "a".into(), interface: Interface::Ap0, acquired_at: Local::now() };
        let reset = on_client_connect("b".into(), Interface::Wlan0, &mut state, &events, Duration::from_secs(600));
        assert!(!reset);
        assert_eq!(state.address(), Some("a"));
    }

    #[test]
    fn wlan0_connect_accepted_when_no_proxy_held_resets_resync() {
        let (events, _rx) = EventBus::new();
        let mut state = ProxyState::None;
        let reset = on_client_connect("a".into(), Interface::Wlan0, &mut state, &events, Duration::from_secs(600));
        assert!(reset);
        assert_eq!(state.address(), Some("a"));
    }
}
