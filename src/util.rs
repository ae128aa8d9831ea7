//! Miscellaneous utilities: timestamp formatting, PID file, atomic file writes.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

use chrono::{DateTime, Local};
use log::warn;

// ── Timestamps ──────────────────────────────────────────────────────────────

/// Format `when` as an ISO-8601 string with local offset, e.g.
/// `2024-01-15T10:30:45.123-08:00`.
pub fn iso8601_local(when: DateTime<Local>) -> String {
    when.to_rfc3339_opts(chrono::SecondsFormat::Millis, false)
}

/// Format `when` as a filename-safe local timestamp, `YYYYMMDD-HHmmss`.
pub fn filename_stamp(when: DateTime<Local>) -> String {
    when.format("%Y%m%d-%H%M%S").to_string()
}

/// Default session title: `filename_stamp(now)`.
pub fn default_title() -> String {
    filename_stamp(Local::now())
}

// ── PID file ──────────────────────────────────────────────────────────────────

/// Write the current process PID to `path`.
pub fn write_pid_file(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut f = File::create(path)?;
    writeln!(f, "{}", std::process::id())?;
    Ok(())
}

/// Remove the PID file (best-effort, logs a warning on failure).
pub fn remove_pid_file(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        warn!("failed to remove PID file {}: {e}", path.display());
    }
}

// ── Atomic file write ─────────────────────────────────────────────────────────

/// Write `contents` to `path` atomically: write to a sibling `.tmp` file then
/// rename over the destination. Used by the report store so a crash mid-write
/// never leaves a truncated report blob.
pub fn atomic_write(path: &Path, contents: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("tmp");
    {
        let mut f = File::create(&tmp_path)?;
        f.write_all(contents)?;
        f.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn filename_stamp_has_no_separators() {
        let when = Local.with_ymd_and_hms(2024, 1, 15, 10, 30, 45).unwrap();
        assert_eq!(filename_stamp(when), "20240115-103045");
    }

    #[test]
    fn iso8601_local_round_trips_instant() {
        let when = Local.with_ymd_and_hms(2024, 1, 15, 10, 30, 45).unwrap();
        let s = iso8601_local(when);
        let parsed = DateTime::parse_from_rfc3339(&s).unwrap();
        assert_eq!(parsed.timestamp(), when.timestamp());
    }

    #[test]
    fn atomic_write_then_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        atomic_write(&path, b"{\"a\":1}").unwrap();
        let read = fs::read_to_string(&path).unwrap();
        assert_eq!(read, "{\"a\":1}");
        assert!(!path.with_extension("tmp").exists());
    }
}
