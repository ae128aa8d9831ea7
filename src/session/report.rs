//! Report store (§4.5): append-only, indexed by ID, persisted as individual
//! JSON blobs. Saves are atomic (write-temp + rename, via `util::atomic_write`).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::camera::types::{CameraIdentity, CameraSettings};
use crate::error::{CtlError, Result};
use crate::session::stats::StatsSnapshot;
use crate::util;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Completed,
    Stopped,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntervalometerConfig {
    pub interval: u64,
    pub number_of_shots: Option<u32>,
    pub stop_condition: String,
    pub stop_at: Option<DateTime<Local>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportResults {
    pub images_captured: u32,
    pub images_successful: u32,
    pub images_failed: u32,
    pub first_image_name: Option<String>,
    pub last_image_name: Option<String>,
    pub errors: Vec<crate::session::stats::ShotError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub saved_at: DateTime<Local>,
    pub version: u32,
    pub completion_reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub id: Uuid,
    pub session_id: Uuid,
    pub title: String,
    pub status: ReportStatus,
    pub start_time: DateTime<Local>,
    pub end_time: DateTime<Local>,
    pub duration_ms: i64,
    pub intervalometer: IntervalometerConfig,
    pub results: ReportResults,
    pub camera_info: CameraIdentity,
    pub camera_settings: CameraSettings,
    pub metadata: ReportMetadata,
}

impl Report {
    pub fn from_session(
        session_id: Uuid,
        title: String,
        status: ReportStatus,
        stats: &StatsSnapshot,
        intervalometer: IntervalometerConfig,
        camera_info: CameraIdentity,
        camera_settings: CameraSettings,
        completion_reason: String,
    ) -> Self {
        let end_time = stats.end_time.unwrap_or_else(Local::now);
        let duration_ms = (end_time - stats.start_time).num_milliseconds().max(0);
        Self {
            id: Uuid::new_v4(),
            session_id,
            title,
            status,
            start_time: stats.start_time,
            end_time,
            duration_ms,
            intervalometer,
            results: ReportResults {
                images_captured: stats.shots_taken,
                images_successful: stats.shots_successful,
                images_failed: stats.shots_failed,
                first_image_name: stats.first_image_name.clone(),
                last_image_name: stats.last_image_name.clone(),
                errors: stats.errors.clone(),
            },
            camera_info,
            camera_settings,
            metadata: ReportMetadata { saved_at: Local::now(), version: 1, completion_reason },
        }
    }
}

pub struct ReportStore {
    dir: PathBuf,
    reports: Arc<RwLock<HashMap<Uuid, Report>>>,
}

impl ReportStore {
    /// Load every `reports/<uuid>.json` blob under `data_dir` into memory.
    pub async fn load(data_dir: &std::path::Path) -> Result<Self> {
        let dir = data_dir.join("reports");
        tokio::fs::create_dir_all(&dir).await?;

        let mut reports = HashMap::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = tokio::fs::read_to_string(&path).await?;
            match serde_json::from_str::<Report>(&content) {
                Ok(report) => {
                    reports.insert(report.id, report);
                }
                Err(e) => log::warn!("skipping unreadable report {}: {e}", path.display()),
            }
        }
        Ok(Self { dir, reports: Arc::new(RwLock::new(reports)) })
    }

    /// Reports ordered by `start_time` descending.
    pub async fn list(&self) -> Vec<Report> {
        let mut all: Vec<Report> = self.reports.read().await.values().cloned().collect();
        all.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        all
    }

    pub async fn get(&self, id: Uuid) -> Result<Report> {
        self.reports.read().await.get(&id).cloned().ok_or(CtlError::ReportNotFound(id))
    }

    pub async fn save(&self, report: Report) -> Result<()> {
        let path = self.dir.join(format!("{}.json", report.id));
        let bytes = serde_json::to_vec_pretty(&report)?;
        let path_clone = path.clone();
        tokio::task::spawn_blocking(move || util::atomic_write(&path_clone, &bytes))
            .await
            .map_err(CtlError::Join)??;
        self.reports.write().await.insert(report.id, report);
        Ok(())
    }

    pub async fn update_title(&self, id: Uuid, title: String) -> Result<()> {
        if title.trim().is_empty() {
            return Err(CtlError::InvalidTitle("title must not be blank".into()));
        }
        let mut guard = self.reports.write().await;
        let report = guard.get_mut(&id).ok_or(CtlError::ReportNotFound(id))?;
        report.title = title;
        let updated = report.clone();
        drop(guard);

        let path = self.dir.join(format!("{id}.json"));
        let bytes = serde_json::to_vec_pretty(&updated)?;
        tokio::task::spawn_blocking(move || util::atomic_write(&path, &bytes))
            .await
            .map_err(CtlError::Join)??;
        Ok(())
    }

    pub async fn delete(&self, id: Uuid) -> Result<()> {
        let path = self.dir.join(format!("{id}.json"));
        if path.exists() {
            tokio::fs::remove_file(&path).await?;
        }
        self.reports.write().await.remove(&id).ok_or(CtlError::ReportNotFound(id))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_report(start_time: DateTime<Local>) -> Report {
        let stats = StatsSnapshot {
            start_time,
            end_time: Some(start_time + chrono::Duration::seconds(10)),
            shots_taken: 3,
            shots_successful: 3,
            shots_failed: 0,
            current_shot: 3,
            errors: Vec::new(),
            overtime_shots: 0,
            total_overtime_seconds: 0.0,
            max_overtime_seconds: 0.0,
            last_shot_duration_seconds: 1.0,
            total_shot_duration_seconds: 3.0,
            first_image_name: Some("a.jpg".into()),
            last_image_name: Some("c.jpg".into()),
            success_rate: 1.0,
            average_shot_duration: 1.0,
        };
        Report::from_session(
            Uuid::new_v4(),
            "t".into(),
            ReportStatus::Completed,
            &stats,
            IntervalometerConfig { interval: 5, number_of_shots: Some(3), stop_condition: "stop-after".into(), stop_at: None },
            CameraIdentity::default(),
            CameraSettings::default(),
            "completed normally".into(),
        )
    }

    #[tokio::test]
    async fn save_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReportStore::load(dir.path()).await.unwrap();
        let report = sample_report(Local::now());
        let id = report.id;
        store.save(report.clone()).await.unwrap();

        let fetched = store.get(id).await.unwrap();
        assert_eq!(fetched.id, report.id);
        assert_eq!(fetched.results.images_captured, 3);
    }

    #[tokio::test]
    async fn list_orders_by_start_time_descending() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReportStore::load(dir.path()).await.unwrap();
        let now = Local::now();
        let older = sample_report(now - chrono::Duration::hours(1));
        let newer = sample_report(now);
        store.save(older).await.unwrap();
        store.save(newer.clone()).await.unwrap();

        let listed = store.list().await;
        assert_eq!(listed[0].id, newer.id);
    }

    #[tokio::test]
    async fn update_title_rejects_blank() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReportStore::load(dir.path()).await.unwrap();
        let report = sample_report(Local::now());
        let id = report.id;
        store.save(report).await.unwrap();

        let result = store.update_title(id, "   ".into()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn delete_removes_blob_and_in_memory_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReportStore::load(dir.path()).await.unwrap();
        let report = sample_report(Local::now());
        let id = report.id;
        store.save(report).await.unwrap();

        store.delete(id).await.unwrap();
        assert!(store.get(id).await.is_err());
    }
}
