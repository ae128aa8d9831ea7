//! Shot statistics bundle (§3) and its derived, never-persisted fields.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShotError {
    pub shot_number: u32,
    pub error: String,
    pub timestamp: DateTime<Local>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stats {
    pub start_time: DateTime<Local>,
    pub end_time: Option<DateTime<Local>>,
    pub shots_taken: u32,
    pub shots_successful: u32,
    pub shots_failed: u32,
    pub current_shot: u32,
    pub errors: Vec<ShotError>,
    pub overtime_shots: u32,
    pub total_overtime_seconds: f64,
    pub max_overtime_seconds: f64,
    pub last_shot_duration_seconds: f64,
    pub total_shot_duration_seconds: f64,
    pub first_image_name: Option<String>,
    pub last_image_name: Option<String>,
}

impl Stats {
    pub fn new(start_time: DateTime<Local>) -> Self {
        Self {
            start_time,
            end_time: None,
            shots_taken: 0,
            shots_successful: 0,
            shots_failed: 0,
            current_shot: 0,
            errors: Vec::new(),
            overtime_shots: 0,
            total_overtime_seconds: 0.0,
            max_overtime_seconds: 0.0,
            last_shot_duration_seconds: 0.0,
            total_shot_duration_seconds: 0.0,
            first_image_name: None,
            last_image_name: None,
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.shots_taken == 0 {
            1.0
        } else {
            self.shots_successful as f64 / self.shots_taken as f64
        }
    }

    pub fn failure_rate(&self) -> f64 {
        if self.shots_taken == 0 {
            0.0
        } else {
            self.shots_failed as f64 / self.shots_taken as f64
        }
    }

    pub fn average_shot_duration(&self) -> f64 {
        if self.shots_successful == 0 {
            0.0
        } else {
            self.total_shot_duration_seconds / self.shots_successful as f64
        }
    }

    /// §4.3 circuit breaker precondition.
    pub fn high_failure_rate(&self) -> bool {
        self.shots_taken > 5 && self.failure_rate() > 0.5
    }

    pub fn record_success(&mut self, shot_number: u32, interval_seconds: u64, duration: f64, file_path: &str) -> bool {
        self.shots_taken += 1;
        self.shots_successful += 1;
        self.last_shot_duration_seconds = duration;
        self.total_shot_duration_seconds += duration;
        if self.first_image_name.is_none() {
            self.first_image_name = Some(file_path.to_string());
        }
        self.last_image_name = Some(file_path.to_string());

        let is_overtime = duration > interval_seconds as f64;
        if is_overtime {
            let overtime = duration - interval_seconds as f64;
            self.overtime_shots += 1;
            self.total_overtime_seconds += overtime;
            if overtime > self.max_overtime_seconds {
                self.max_overtime_seconds = overtime;
            }
        }
        let _ = shot_number;
        is_overtime
    }

    pub fn record_failure(&mut self, shot_number: u32, error: String) {
        self.shots_taken += 1;
        self.shots_failed += 1;
        self.errors.push(ShotError {
            shot_number,
            error,
            timestamp: Local::now(),
        });
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            start_time: self.start_time,
            end_time: self.end_time,
            shots_taken: self.shots_taken,
            shots_successful: self.shots_successful,
            shots_failed: self.shots_failed,
            current_shot: self.current_shot,
            errors: self.errors.clone(),
            overtime_shots: self.overtime_shots,
            total_overtime_seconds: self.total_overtime_seconds,
            max_overtime_seconds: self.max_overtime_seconds,
            last_shot_duration_seconds: self.last_shot_duration_seconds,
            total_shot_duration_seconds: self.total_shot_duration_seconds,
            first_image_name: self.first_image_name.clone(),
            last_image_name: self.last_image_name.clone(),
            success_rate: self.success_rate(),
            average_shot_duration: self.average_shot_duration(),
        }
    }
}

/// Immutable snapshot handed to event consumers and the report store so they
/// never observe a statistics bundle mid-mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub start_time: DateTime<Local>,
    pub end_time: Option<DateTime<Local>>,
    pub shots_taken: u32,
    pub shots_successful: u32,
    pub shots_failed: u32,
    pub current_shot: u32,
    pub errors: Vec<ShotError>,
    pub overtime_shots: u32,
    pub total_overtime_seconds: f64,
    pub max_overtime_seconds: f64,
    pub last_shot_duration_seconds: f64,
    pub total_shot_duration_seconds: f64,
    pub first_image_name: Option<String>,
    pub last_image_name: Option<String>,
    pub success_rate: f64,
    pub average_shot_duration: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> Stats {
        Stats::new(Local::now())
    }

    #[test]
    fn shots_taken_equals_successful_plus_failed() {
        let mut s = fresh();
        s.record_success(1, 5, 1.0, "a.jpg");
        s.record_failure(2, "boom".into());
        assert_eq!(s.shots_taken, s.shots_successful + s.shots_failed);
    }

    #[test]
    fn overtime_requires_strict_greater_than() {
        let mut s = fresh();
        let overtime = s.record_success(1, 5, 5.0, "a.jpg");
        assert!(!overtime);
        assert_eq!(s.overtime_shots, 0);

        let overtime = s.record_success(2, 5, 7.0, "b.jpg");
        assert!(overtime);
        assert_eq!(s.overtime_shots, 1);
        assert!((s.max_overtime_seconds - 2.0).abs() < 1e-9);
    }

    #[test]
    fn circuit_breaker_trips_past_five_shots_over_half_failed() {
        let mut s = fresh();
        for i in 1..=4 {
            s.record_failure(i, "err".into());
        }
        s.record_success(5, 5, 1.0, "a.jpg"); // 5 taken, rate 0.8 but not >5
        assert!(!s.high_failure_rate());

        s.record_failure(6, "err".into()); // 6 taken, 5 failed, rate 0.833
        assert!(s.high_failure_rate());
    }

    #[test]
    fn first_image_name_set_once_last_always_updated() {
        let mut s = fresh();
        s.record_success(1, 5, 1.0, "a.jpg");
        s.record_success(2, 5, 1.0, "b.jpg");
        assert_eq!(s.first_image_name.as_deref(), Some("a.jpg"));
        assert_eq!(s.last_image_name.as_deref(), Some("b.jpg"));
    }

    #[test]
    fn success_rate_is_one_when_no_shots_taken() {
        let s = fresh();
        assert_eq!(s.success_rate(), 1.0);
    }
}
