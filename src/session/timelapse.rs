//! Timelapse session state machine (§4.3): per-session scheduler that fires
//! shots at a target interval, correlates each shutter press with the
//! event-polling waiter, and persists a report on any terminal transition.
//!
//! The session task is the single writer of its own statistics (§9 Design
//! Notes): external callers only enqueue commands and read snapshots, they
//! never mutate state directly.

use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use log::{info, warn};
use tokio::sync::{mpsc, watch, RwLock};
use uuid::Uuid;

use crate::camera::coordinator::Coordinator;
use crate::camera::waiter;
use crate::error::{CtlError, Result};
use crate::events::{Event, EventBus, StopCondition};
use crate::session::report::{IntervalometerConfig, Report, ReportStatus, ReportStore};
use crate::session::stats::Stats;
use crate::util;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Running,
    Paused,
    Completed,
    Stopped,
    Error,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Stopped | SessionState::Error)
    }
}

enum Command {
    Pause,
    Resume,
    Stop,
    UpdateTitle(String),
}

#[derive(Debug, Clone, Copy)]
enum EffectiveStop {
    Unlimited,
    AfterShots(u32),
}

pub struct SessionConfig {
    pub interval_seconds: u64,
    pub stop_condition: StopCondition,
    pub title: Option<String>,
    pub safety_margin_secs: u64,
}

#[derive(Clone)]
pub struct Session {
    pub id: Uuid,
    title: Arc<RwLock<String>>,
    state: Arc<watch::Sender<SessionState>>,
    stats: Arc<RwLock<Stats>>,
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl Session {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub async fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub async fn stats_snapshot(&self) -> crate::session::stats::StatsSnapshot {
        self.stats.read().await.snapshot()
    }

    pub fn pause(&self) {
        let _ = self.cmd_tx.send(Command::Pause);
    }

    pub fn resume(&self) {
        let _ = self.cmd_tx.send(Command::Resume);
    }

    pub fn stop(&self) {
        let _ = self.cmd_tx.send(Command::Stop);
    }

    pub async fn set_title(&self, title: String) -> Result<()> {
        if title.trim().is_empty() {
            return Err(CtlError::InvalidTitle("title must not be blank".into()));
        }
        let _ = self.cmd_tx.send(Command::UpdateTitle(title));
        Ok(())
    }

    /// §4.3 start contract. Spawns the scheduler task and returns immediately
    /// once setup succeeds; the task continues until a terminal transition.
    pub async fn start(
        config: SessionConfig,
        coordinator: Coordinator,
        report_store: Arc<ReportStore>,
        events: EventBus,
    ) -> Result<Self> {
        if !coordinator.is_connected().await {
            return Err(CtlError::CameraNotConnected);
        }

        let identity = coordinator.get_device_info().await.unwrap_or_default();
        let settings = coordinator.get_settings().await.unwrap_or_default();

        let (valid, reason) = coordinator.validate_interval(config.interval_seconds, config.safety_margin_secs).await;
        if !valid {
            return Err(CtlError::InvalidInterval(reason.unwrap_or_default()));
        }
        if config.interval_seconds == 0 {
            return Err(CtlError::InvalidInterval("interval must be greater than zero".into()));
        }

        let id = Uuid::new_v4();
        let title = config.title.clone().unwrap_or_else(util::default_title);
        let start_time = Local::now();

        let effective_stop = match &config.stop_condition {
            StopCondition::Unlimited => EffectiveStop::Unlimited,
            StopCondition::StopAfter(n) => EffectiveStop::AfterShots(*n),
            StopCondition::StopAt(t) => {
                let remaining = (*t - start_time).num_seconds().max(0) as u64;
                let derived = (remaining + config.interval_seconds - 1) / config.interval_seconds.max(1);
                EffectiveStop::AfterShots(derived.max(1) as u32)
            }
        };
        if let EffectiveStop::AfterShots(0) = effective_stop {
            return Err(CtlError::InvalidConfig("stop condition resolves to zero shots".into()));
        }

        coordinator.pause_info_polling();
        coordinator.pause_connection_monitor();

        let stats = Arc::new(RwLock::new(Stats::new(start_time)));
        let (state_tx, _state_rx) = watch::channel(SessionState::Created);
        let state_tx = Arc::new(state_tx);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let title = Arc::new(RwLock::new(title));

        let session = Session { id, title: title.clone(), state: state_tx.clone(), stats: stats.clone(), cmd_tx };

        events.publish(Event::SessionStarted { session_id: id, title: title.read().await.clone() });

        tokio::spawn(run_scheduler(
            id,
            config.interval_seconds,
            effective_stop,
            start_time,
            title,
            state_tx,
            stats,
            cmd_rx,
            cancel_tx,
            cancel_rx,
            coordinator,
            report_store,
            events,
            identity,
            settings,
            config.stop_condition,
        ));

        Ok(session)
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_scheduler(
    id: Uuid,
    interval_seconds: u64,
    effective_stop: EffectiveStop,
    start_time: chrono::DateTime<Local>,
    title: Arc<RwLock<String>>,
    state_tx: Arc<watch::Sender<SessionState>>,
    stats: Arc<RwLock<Stats>>,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    cancel_tx: watch::Sender<bool>,
    cancel_rx: watch::Receiver<bool>,
    coordinator: Coordinator,
    report_store: Arc<ReportStore>,
    events: EventBus,
    identity: crate::camera::types::CameraIdentity,
    settings: crate::camera::types::CameraSettings,
    stop_condition: StopCondition,
) {
    let _ = state_tx.send(SessionState::Running);
    let mut terminal: Option<(SessionState, String)> = None;

    'outer: loop {
        let shots_taken = stats.read().await.shots_taken;
        if let EffectiveStop::AfterShots(total) = effective_stop {
            if shots_taken >= total {
                terminal = Some((SessionState::Completed, "stop condition reached".into()));
                break;
            }
        }

        let next_shot_time = start_time + chrono::Duration::seconds((shots_taken as i64) * interval_seconds as i64);
        let now = Local::now();
        let delay = (next_shot_time - now).to_std().unwrap_or(Duration::ZERO);

        tokio::select! {
            _ = tokio::time::sleep(delay) => {
                let mut pending_pause = false;
                let shot_fut = run_one_shot(id, interval_seconds, &title, &stats, &coordinator, &events, cancel_rx.clone());
                tokio::pin!(shot_fut);
                loop {
                    tokio::select! {
                        _ = &mut shot_fut => break,
                        cmd = cmd_rx.recv() => {
                            match cmd {
                                Some(Command::Stop) => {
                                    let _ = cancel_tx.send(true);
                                    (&mut shot_fut).await;
                                    let _ = cancel_tx.send(false);
                                    terminal = Some((SessionState::Stopped, "stopped by request".into()));
                                    break 'outer;
                                }
                                Some(Command::Pause) => pending_pause = true,
                                Some(Command::UpdateTitle(t)) => *title.write().await = t,
                                Some(Command::Resume) | None => {}
                            }
                        }
                    }
                }

                if stats.read().await.high_failure_rate() {
                    terminal = Some((SessionState::Error, "High failure rate detected".into()));
                    break 'outer;
                }

                if pending_pause {
                    let _ = state_tx.send(SessionState::Paused);
                    loop {
                        match cmd_rx.recv().await {
                            Some(Command::Resume) => { let _ = state_tx.send(SessionState::Running); break; }
                            Some(Command::Stop) => { terminal = Some((SessionState::Stopped, "stopped by request".into())); break 'outer; }
                            Some(Command::UpdateTitle(t)) => { *title.write().await = t; }
                            Some(Command::Pause) | None => {}
                        }
                    }
                }
            }
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(Command::Pause) => {
                        let _ = state_tx.send(SessionState::Paused);
                        loop {
                            match cmd_rx.recv().await {
                                Some(Command::Resume) => { let _ = state_tx.send(SessionState::Running); break; }
                                Some(Command::Stop) => { terminal = Some((SessionState::Stopped, "stopped by request".into())); break 'outer; }
                                Some(Command::UpdateTitle(t)) => { *title.write().await = t; }
                                Some(Command::Pause) | None => {}
                            }
                        }
                    }
                    Some(Command::Stop) => {
                        terminal = Some((SessionState::Stopped, "stopped by request".into()));
                        break 'outer;
                    }
                    Some(Command::UpdateTitle(t)) => {
                        *title.write().await = t;
                    }
                    Some(Command::Resume) | None => {}
                }
            }
        }
    }

    let (final_state, reason) = terminal.unwrap_or((SessionState::Completed, "completed".into()));
    finish_session(id, final_state, reason, &title, &state_tx, &stats, &coordinator, &report_store, &events, identity, settings, interval_seconds, stop_condition, start_time).await;
}

async fn run_one_shot(
    id: Uuid,
    interval_seconds: u64,
    title: &Arc<RwLock<String>>,
    stats: &Arc<RwLock<Stats>>,
    coordinator: &Coordinator,
    events: &EventBus,
    mut cancel_rx: watch::Receiver<bool>,
) {
    let shot_number = stats.read().await.shots_taken + 1;
    let shot_start = std::time::Instant::now();
    let per_shot_timeout = Duration::from_secs(interval_seconds + 30);
    let deadline = tokio::time::Instant::now() + per_shot_timeout;

    let waiter_coordinator = coordinator.clone();
    let mut waiter_cancel_rx = cancel_rx.clone();
    let waiter_handle = tokio::spawn(async move {
        waiter::wait_for_content(&waiter_coordinator, deadline, &mut waiter_cancel_rx).await
    });
    // Give the waiter task a chance to issue its long-poll before the
    // shutter press leaves (§4.2 race invariant).
    tokio::task::yield_now().await;

    // The in-flight shutter press is never cancelled once issued — the
    // camera has already been commanded (§5 Cancellation).
    let press_result = coordinator.take_photo().await;
    let wait_result = waiter_handle.await.unwrap_or(Err(CtlError::Transient("waiter task panicked".into())));

    let title_snapshot = title.read().await.clone();

    match (press_result, wait_result) {
        (Ok(()), Ok(file_path)) => {
            let duration = shot_start.elapsed().as_secs_f64();
            let overtime = {
                let mut s = stats.write().await;
                s.record_success(shot_number, interval_seconds, duration, &file_path)
            };
            if overtime {
                let over = duration - interval_seconds as f64;
                events.publish(Event::PhotoOvertime {
                    session_id: id,
                    title: title_snapshot.clone(),
                    shot_number,
                    interval: interval_seconds,
                    shot_duration: duration,
                    overtime: over,
                    file_path: file_path.clone(),
                    message: format!("shot {shot_number} exceeded interval by {over:.1}s"),
                });
            }
            events.publish(Event::PhotoTaken {
                session_id: id,
                title: title_snapshot,
                shot_number,
                file_path,
                shot_duration_seconds: duration,
            });
        }
        (press_err, wait_err) => {
            let error_message = match (press_err, wait_err) {
                (Err(e), _) => e.to_string(),
                (_, Err(e)) => e.to_string(),
                _ => "unknown capture failure".to_string(),
            };
            warn!("shot {shot_number} failed: {error_message}");
            stats.write().await.record_failure(shot_number, error_message.clone());
            events.publish(Event::PhotoFailed { session_id: id, title: title_snapshot, shot_number, error: error_message });
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn finish_session(
    id: Uuid,
    final_state: SessionState,
    reason: String,
    title: &Arc<RwLock<String>>,
    state_tx: &Arc<watch::Sender<SessionState>>,
    stats: &Arc<RwLock<Stats>>,
    coordinator: &Coordinator,
    report_store: &Arc<ReportStore>,
    events: &EventBus,
    identity: crate::camera::types::CameraIdentity,
    settings: crate::camera::types::CameraSettings,
    interval_seconds: u64,
    stop_condition: StopCondition,
    start_time: chrono::DateTime<Local>,
) {
    {
        let mut s = stats.write().await;
        s.end_time = Some(Local::now());
    }
    let _ = state_tx.send(final_state);

    coordinator.resume_info_polling();
    coordinator.resume_connection_monitor();

    let title_snapshot = title.read().await.clone();
    let snapshot = stats.read().await.snapshot();

    let event = match final_state {
        SessionState::Completed => Event::SessionCompleted { session_id: id, title: title_snapshot.clone(), reason: reason.clone(), stats: snapshot.clone() },
        SessionState::Stopped => Event::SessionStopped { session_id: id, title: title_snapshot.clone(), reason: reason.clone(), stats: snapshot.clone() },
        SessionState::Error => Event::SessionError { session_id: id, title: title_snapshot.clone(), reason: reason.clone(), stats: snapshot.clone() },
        _ => return,
    };
    events.publish(event);

    let report_status = match final_state {
        SessionState::Completed => ReportStatus::Completed,
        SessionState::Stopped => ReportStatus::Stopped,
        _ => ReportStatus::Error,
    };
    let (stop_condition_str, number_of_shots, stop_at) = match stop_condition {
        StopCondition::Unlimited => ("unlimited".to_string(), None, None),
        StopCondition::StopAfter(n) => ("stop-after".to_string(), Some(n), None),
        StopCondition::StopAt(t) => ("stop-at".to_string(), None, Some(t)),
    };

    let report = Report::from_session(
        id,
        title_snapshot,
        report_status,
        &snapshot,
        IntervalometerConfig { interval: interval_seconds, number_of_shots, stop_condition: stop_condition_str, stop_at },
        identity,
        settings,
        reason,
    );
    let report_id = report.id;
    match report_store.save(report).await {
        Ok(()) => {
            events.publish(Event::SessionSaved { session_id: id, report_id });
            info!("session {id} terminal ({final_state:?}); report {report_id} saved");
        }
        Err(e) => warn!("failed to save report for session {id}: {e}"),
    }
    let _ = start_time;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_are_identified() {
        assert!(SessionState::Completed.is_terminal());
        assert!(SessionState::Stopped.is_terminal());
        assert!(SessionState::Error.is_terminal());
        assert!(!SessionState::Running.is_terminal());
        assert!(!SessionState::Paused.is_terminal());
    }
}
