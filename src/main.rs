//! `tetherd` — on-device timelapse controller daemon.
//!
//! Usage:
//!   tetherd -c /etc/tetherd/tetherd.conf
//!   tetherd -c /etc/tetherd/tetherd.conf --stderr   # log to stderr

mod app;
mod camera;
mod config;
mod error;
mod events;
mod session;
mod timesync;
mod util;

use std::path::PathBuf;
use std::process;

use clap::Parser;
use log::{error, info, warn};

use crate::events::Event;

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Debug, Parser)]
#[command(name = "tetherd", about = "On-device timelapse controller for a tethered CCAPI-style camera")]
struct Cli {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", default_value = "/etc/tetherd/tetherd.conf")]
    config: PathBuf,

    /// Log to stderr instead of syslog (useful for debugging).
    #[arg(long)]
    stderr: bool,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let cfg = match config::load_config(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("tetherd: config error: {e}");
            process::exit(1);
        }
    };
    if let Err(e) = config::validate_config(&cfg) {
        eprintln!("tetherd: config validation: {e}");
        process::exit(1);
    }

    let use_syslog = cfg.log_syslog && !cli.stderr;
    setup_logging(use_syslog).expect("failed to set up logging");

    if let Err(e) = util::write_pid_file(&cfg.pid_file) {
        error!("cannot write PID file {}: {e}", cfg.pid_file.display());
    }

    info!("tetherd starting (camera: {})", cfg.camera_base_url);

    let (app, mut event_rx, _time_proxy_join) = match app::App::bootstrap(&cfg).await {
        Ok(v) => v,
        Err(e) => {
            error!("bootstrap failed: {e}");
            process::exit(1);
        }
    };

    app.initial_connect(&cfg.camera_base_url).await;
    app.clone().spawn_background_tasks(&cfg);

    // Drain the event bus to the log until an external transport is wired
    // in (§1: the WS/HTTP multiplexer is out of scope for this core).
    tokio::spawn(async move {
        while let Some(event) = event_rx.rx.recv().await {
            log_event(&event);
        }
    });

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received shutdown signal"),
        Err(e) => warn!("failed to listen for shutdown signal: {e}"),
    }

    util::remove_pid_file(&cfg.pid_file);
    info!("tetherd stopped");
}

fn log_event(event: &Event) {
    match event {
        Event::PhotoFailed { .. } | Event::SessionError { .. } | Event::CameraDisconnected => {
            warn!("event: {event:?}");
        }
        _ => info!("event: {event:?}"),
    }
}

// ── Logging setup ─────────────────────────────────────────────────────────────

fn setup_logging(use_syslog: bool) -> anyhow::Result<()> {
    if use_syslog {
        let formatter = syslog::Formatter3164 {
            facility: syslog::Facility::LOG_DAEMON,
            hostname: None,
            process:  "tetherd".into(),
            pid:      process::id(),
        };
        let logger = syslog::unix(formatter)
            .map_err(|e| anyhow::anyhow!("syslog connect failed: {e}"))?;
        log::set_boxed_logger(Box::new(syslog::BasicLogger::new(logger)))
            .map(|()| log::set_max_level(log::LevelFilter::Info))
            .map_err(|e| anyhow::anyhow!("set_logger: {e}"))?;
    } else {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Debug)
            .init();
    }
    Ok(())
}
