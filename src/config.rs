//! `tetherd.conf` configuration file parser.
//!
//! Same `key = value` flat-file format the teacher config used: one setting
//! per line, `#` comments, unknown keys ignored, malformed numbers fall back
//! to the compiled-in default rather than failing the whole load.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{CtlError, Result};

// Default interval / timeout constants (seconds unless noted).
const DEFAULT_PROBE_INTERVAL:      u64 = 10;
const DEFAULT_PROBE_TIMEOUT:       u64 = 10;
const DEFAULT_RECONNECT_FLOOR:     u64 = 2;
const DEFAULT_RECONNECT_CEIL:      u64 = 30;
const DEFAULT_RESYNC_INTERVAL:     u64 = 300;
const DEFAULT_EXPIRY_SWEEP:        u64 = 60;
const DEFAULT_VALIDITY_WINDOW:     u64 = 600;
const DEFAULT_CAMERA_DRIFT_THRESH: u64 = 2;
const DEFAULT_STATUS_INTERVAL:     u64 = 5;

/// Full controller configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // ── Camera endpoint ───────────────────────────────────────────────────────
    /// Vendor CCAPI base URL, e.g. `https://192.168.1.50:8080`.
    pub camera_base_url: String,
    /// Low-frequency health-probe interval while connected.
    pub probe_interval_secs: u64,
    /// Per-probe HTTP timeout.
    pub probe_timeout_secs: u64,
    /// Exponential backoff floor while reconnecting.
    pub reconnect_floor_secs: u64,
    /// Exponential backoff ceiling while reconnecting.
    pub reconnect_ceil_secs: u64,

    // ── Intervalometer ────────────────────────────────────────────────────────
    /// Minimum gap enforced between shutter speed and a proposed interval.
    pub interval_safety_margin_secs: u64,

    // ── Time-proxy ────────────────────────────────────────────────────────────
    /// How long an acquired proxy is trusted for (§4.4 validity window).
    pub time_proxy_validity_secs: u64,
    /// Re-sync cadence while a proxy is held.
    pub time_proxy_resync_secs: u64,
    /// How often the expiry sweep runs.
    pub time_proxy_sweep_secs: u64,
    /// Drift threshold (seconds) that triggers a camera clock cascade.
    pub camera_drift_threshold_secs: u64,

    // ── Status heartbeat ──────────────────────────────────────────────────────
    /// Cadence of the aggregate `status_update` event while a session runs.
    pub status_update_interval_secs: u64,

    // ── Directories ───────────────────────────────────────────────────────────
    /// Root of the persisted-state tree (reports/, test-shots/, connection history).
    pub data_dir: PathBuf,

    // ── Process ───────────────────────────────────────────────────────────────
    pub pid_file:   PathBuf,
    pub log_syslog: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            camera_base_url:             String::new(),
            probe_interval_secs:         DEFAULT_PROBE_INTERVAL,
            probe_timeout_secs:          DEFAULT_PROBE_TIMEOUT,
            reconnect_floor_secs:        DEFAULT_RECONNECT_FLOOR,
            reconnect_ceil_secs:         DEFAULT_RECONNECT_CEIL,
            interval_safety_margin_secs: 1,
            time_proxy_validity_secs:   DEFAULT_VALIDITY_WINDOW,
            time_proxy_resync_secs:     DEFAULT_RESYNC_INTERVAL,
            time_proxy_sweep_secs:      DEFAULT_EXPIRY_SWEEP,
            camera_drift_threshold_secs: DEFAULT_CAMERA_DRIFT_THRESH,
            status_update_interval_secs: DEFAULT_STATUS_INTERVAL,
            data_dir:   PathBuf::from("/var/lib/tetherd"),
            pid_file:   PathBuf::from("/var/run/tetherd.pid"),
            log_syslog: true,
        }
    }
}

/// Parse `path` as a `tetherd.conf` key=value configuration file.
pub fn load_config(path: &Path) -> Result<ClientConfig> {
    let content = fs::read_to_string(path)
        .map_err(|e| CtlError::Config(format!("cannot read {}: {e}", path.display())))?;
    let mut cfg = ClientConfig::default();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.splitn(2, '=');
        let key = match parts.next() {
            Some(k) => k.trim().to_ascii_lowercase(),
            None => continue,
        };
        let val = match parts.next() {
            Some(v) => v.trim().to_string(),
            None => continue,
        };
        if val.is_empty() {
            continue;
        }

        match key.as_str() {
            "camera_base_url"             => cfg.camera_base_url = val,
            "probe_interval_secs"         => cfg.probe_interval_secs = val.parse().unwrap_or(DEFAULT_PROBE_INTERVAL),
            "probe_timeout_secs"          => cfg.probe_timeout_secs = val.parse().unwrap_or(DEFAULT_PROBE_TIMEOUT),
            "reconnect_floor_secs"        => cfg.reconnect_floor_secs = val.parse().unwrap_or(DEFAULT_RECONNECT_FLOOR),
            "reconnect_ceil_secs"         => cfg.reconnect_ceil_secs = val.parse().unwrap_or(DEFAULT_RECONNECT_CEIL),
            "interval_safety_margin_secs" => cfg.interval_safety_margin_secs = val.parse().unwrap_or(1),
            "time_proxy_validity_secs"    => cfg.time_proxy_validity_secs = val.parse().unwrap_or(DEFAULT_VALIDITY_WINDOW),
            "time_proxy_resync_secs"      => cfg.time_proxy_resync_secs = val.parse().unwrap_or(DEFAULT_RESYNC_INTERVAL),
            "time_proxy_sweep_secs"       => cfg.time_proxy_sweep_secs = val.parse().unwrap_or(DEFAULT_EXPIRY_SWEEP),
            "camera_drift_threshold_secs" => cfg.camera_drift_threshold_secs = val.parse().unwrap_or(DEFAULT_CAMERA_DRIFT_THRESH),
            "status_update_interval_secs" => cfg.status_update_interval_secs = val.parse().unwrap_or(DEFAULT_STATUS_INTERVAL),
            "data_dir"                    => cfg.data_dir = PathBuf::from(&val),
            "pid_file"                    => cfg.pid_file = PathBuf::from(&val),
            "log_syslog"                  => cfg.log_syslog = val == "true" || val == "1" || val == "yes",
            _ => {} // ignore unknown keys
        }
    }

    Ok(cfg)
}

/// Validate that required fields are populated before any task starts.
pub fn validate_config(cfg: &ClientConfig) -> Result<()> {
    if cfg.camera_base_url.is_empty() {
        return Err(CtlError::Config("camera_base_url is required".into()));
    }
    if cfg.reconnect_floor_secs == 0 || cfg.reconnect_floor_secs > cfg.reconnect_ceil_secs {
        return Err(CtlError::Config(
            "reconnect_floor_secs must be > 0 and <= reconnect_ceil_secs".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn tempfile_with(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn parses_known_keys_and_ignores_unknown() {
        let f = tempfile_with(
            "camera_base_url = https://192.168.1.50:8080\n\
             probe_interval_secs = 15\n\
             # a comment\n\
             bogus_key = whatever\n\
             log_syslog = false\n",
        );
        let cfg = load_config(f.path()).unwrap();
        assert_eq!(cfg.camera_base_url, "https://192.168.1.50:8080");
        assert_eq!(cfg.probe_interval_secs, 15);
        assert!(!cfg.log_syslog);
    }

    #[test]
    fn malformed_number_falls_back_to_default() {
        let f = tempfile_with("probe_interval_secs = not-a-number\n");
        let cfg = load_config(f.path()).unwrap();
        assert_eq!(cfg.probe_interval_secs, DEFAULT_PROBE_INTERVAL);
    }

    #[test]
    fn validate_rejects_empty_base_url() {
        let cfg = ClientConfig::default();
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn validate_rejects_inverted_backoff_bounds() {
        let cfg = ClientConfig {
            camera_base_url: "https://camera".into(),
            reconnect_floor_secs: 30,
            reconnect_ceil_secs: 2,
            ..ClientConfig::default()
        };
        assert!(validate_config(&cfg).is_err());
    }
}
