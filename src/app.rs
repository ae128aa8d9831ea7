//! Top-level `App` value (§9 Design Notes): wires the coordinator, the
//! report store, the time-proxy state machine, and the active session
//! together with no global mutable state. Tests construct a fresh `App`
//! per case; the transport that feeds `Command`s into [`App::dispatch`] is
//! out of scope here (§1).

use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::camera::coordinator::{self, Coordinator};
use crate::config::ClientConfig;
use crate::error::{CtlError, Result};
use crate::events::{Command, Event, EventBus, EventReceiver};
use crate::session::report::{Report, ReportStore};
use crate::session::timelapse::{Session, SessionConfig};
use crate::timesync::{self, Signal, TimeProxyHandle, TimeProxyTuning};

/// Reply to a dispatched [`Command`]; the out-of-scope transport maps these
/// onto whatever wire format it speaks.
#[derive(Debug, Clone)]
pub enum CommandAck {
    Ack,
    SessionStarted { session_id: Uuid },
    Reports(Vec<Report>),
    Report(Report),
}

pub struct App {
    pub coordinator: Coordinator,
    pub report_store: Arc<ReportStore>,
    pub events: EventBus,
    time_proxy: TimeProxyHandle,
    active_session: RwLock<Option<Session>>,
    safety_margin_secs: u64,
    status_update_interval: Duration,
}

impl App {
    /// Build every component from `cfg`. Does not connect to the camera —
    /// the caller spawns the connection monitor, which performs the first
    /// connect attempt and all subsequent reconnects.
    pub async fn bootstrap(cfg: &ClientConfig) -> Result<(Arc<Self>, EventReceiver, tokio::task::JoinHandle<()>)> {
        let (events, event_rx) = EventBus::new();

        let coordinator = Coordinator::new(
            cfg.data_dir.clone(),
            Duration::from_secs(cfg.reconnect_floor_secs),
            Duration::from_secs(cfg.reconnect_ceil_secs),
            events.clone(),
        )?;

        let report_store = Arc::new(ReportStore::load(&cfg.data_dir).await?);

        let tuning = TimeProxyTuning {
            validity_window: Duration::from_secs(cfg.time_proxy_validity_secs),
            resync_interval: Duration::from_secs(cfg.time_proxy_resync_secs),
            expiry_sweep: Duration::from_secs(cfg.time_proxy_sweep_secs),
            camera_drift_threshold: Duration::from_secs(cfg.camera_drift_threshold_secs),
        };
        let (time_proxy, time_proxy_join) = timesync::spawn(coordinator.clone(), events.clone(), tuning);

        let app = Arc::new(Self {
            coordinator,
            report_store,
            events,
            time_proxy,
            active_session: RwLock::new(None),
            safety_margin_secs: cfg.interval_safety_margin_secs,
            status_update_interval: Duration::from_secs(cfg.status_update_interval_secs),
        });

        Ok((app, event_rx, time_proxy_join))
    }

    /// Spawn the coordinator's connection monitor (first connect + all
    /// reconnects) and info-polling loop, both respecting the session's
    /// pause gates.
    pub fn spawn_background_tasks(self: Arc<Self>, cfg: &ClientConfig) {
        tokio::spawn(coordinator::run_connection_monitor(
            self.coordinator.clone(),
            cfg.camera_base_url.clone(),
            Duration::from_secs(cfg.probe_interval_secs),
        ));
        tokio::spawn(coordinator::run_info_polling_loop(
            self.coordinator.clone(),
            Duration::from_secs(cfg.probe_interval_secs),
        ));
        tokio::spawn(async move { self.run_status_update_loop().await });
    }

    /// Supplemental `status_update` aggregate (SPEC_FULL §B): emitted on a
    /// fixed cadence while a session is running.
    async fn run_status_update_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.status_update_interval);
        loop {
            ticker.tick().await;
            let active_session = {
                let guard = self.active_session.read().await;
                match guard.as_ref() {
                    Some(s) if !s.state().await.is_terminal() => Some(s.stats_snapshot().await),
                    _ => None,
                }
            };
            self.events.publish(Event::StatusUpdate {
                camera_connected: self.coordinator.is_connected().await,
                time_proxy_valid: self.time_proxy.is_valid(),
                active_session,
            });
        }
    }

    /// Dispatch one inbound [`Command`] (§6) and return its reply.
    pub async fn dispatch(&self, cmd: Command) -> Result<CommandAck> {
        match cmd {
            Command::StartIntervalometerWithTitle { interval_seconds, stop_condition, title } => {
                self.start_session(interval_seconds, stop_condition, title).await
            }
            Command::PauseIntervalometer => {
                self.with_active_session(|s| s.pause()).await?;
                Ok(CommandAck::Ack)
            }
            Command::ResumeIntervalometer => {
                self.with_active_session(|s| s.resume()).await?;
                Ok(CommandAck::Ack)
            }
            Command::StopIntervalometer => {
                self.with_active_session(|s| s.stop()).await?;
                Ok(CommandAck::Ack)
            }
            Command::UpdateSessionTitle { session_id, title } => {
                let guard = self.active_session.read().await;
                match guard.as_ref() {
                    Some(s) if s.id() == session_id => {
                        s.set_title(title).await?;
                        Ok(CommandAck::Ack)
                    }
                    _ => Err(CtlError::InvalidConfig("no matching active session".into())),
                }
            }
            Command::GetTimelapseReports => Ok(CommandAck::Reports(self.report_store.list().await)),
            Command::GetTimelapseReport { id } => Ok(CommandAck::Report(self.report_store.get(id).await?)),
            Command::DeleteTimelapseReport { id } => {
                self.report_store.delete(id).await?;
                Ok(CommandAck::Ack)
            }
            Command::UpdateReportTitle { id, title } => {
                self.report_store.update_title(id, title).await?;
                Ok(CommandAck::Ack)
            }
            Command::ClientConnected { address, interface } => {
                self.time_proxy.send(Signal::ClientConnect { address, interface });
                Ok(CommandAck::Ack)
            }
            Command::ClientDisconnected { address } => {
                self.time_proxy.send(Signal::ClientDisconnect { address });
                Ok(CommandAck::Ack)
            }
            Command::ClientTimeResponse { address, client_time, timezone } => {
                self.time_proxy.send(Signal::ClientTimeResponse { address, client_time, timezone });
                Ok(CommandAck::Ack)
            }
            Command::ManualTimeSync => {
                self.time_proxy.send(Signal::ResyncTick);
                Ok(CommandAck::Ack)
            }
        }
    }

    async fn start_session(
        &self,
        interval_seconds: u64,
        stop_condition: crate::events::StopCondition,
        title: Option<String>,
    ) -> Result<CommandAck> {
        {
            let guard = self.active_session.read().await;
            if let Some(s) = guard.as_ref() {
                if !s.state().await.is_terminal() {
                    return Err(CtlError::AlreadyRunning);
                }
            }
        }
        let config = SessionConfig {
            interval_seconds,
            stop_condition,
            title,
            safety_margin_secs: self.safety_margin_secs,
        };
        let session = Session::start(config, self.coordinator.clone(), Arc::clone(&self.report_store), self.events.clone()).await?;
        let session_id = session.id();
        *self.active_session.write().await = Some(session);
        Ok(CommandAck::SessionStarted { session_id })
    }

    async fn with_active_session<F: FnOnce(&Session)>(&self, f: F) -> Result<()> {
        let guard = self.active_session.read().await;
        match guard.as_ref() {
            Some(s) if !s.state().await.is_terminal() => {
                f(s);
                Ok(())
            }
            _ => Err(CtlError::InvalidConfig("no active session".into())),
        }
    }

    /// Best-effort initial connect. Failure is logged and left to the
    /// connection monitor's backoff ladder, matching §4.1's reconnection
    /// policy — the daemon never refuses to start because the camera is
    /// momentarily unreachable.
    pub async fn initial_connect(&self, base_url: &str) {
        if let Err(e) = self.coordinator.connect(base_url).await {
            warn!("initial camera connect failed, deferring to connection monitor: {e}");
        } else {
            info!("initial camera connect succeeded");
        }
    }
}
