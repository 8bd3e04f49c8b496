//! End-of-session summary.
//!
//! Presentational only: nothing here affects inventory correctness. A report
//! is always produced, even when the scan records could not be fetched.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use stocktake_core::{ScanId, SessionId};

use crate::session::{EndSync, Session};

/// Outcome of a recorded scan as stored by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanRecordStatus {
    Success,
    Error,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRecord {
    pub scan_id: ScanId,
    pub barcode: String,
    pub status: ScanRecordStatus,
    pub scanned_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressionConfig {
    pub xp_per_scan: u64,
    pub starting_level: u64,
}

impl Default for ProgressionConfig {
    fn default() -> Self {
        Self {
            xp_per_scan: 10,
            starting_level: 1,
        }
    }
}

const POINTS_PER_LEVEL: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progression {
    pub total_points: u64,
    pub level: u64,
    pub points_to_next_level: u64,
}

impl Progression {
    pub fn calculate(successful_scans: u64, config: &ProgressionConfig) -> Self {
        let total_points = successful_scans.saturating_mul(config.xp_per_scan);
        Self {
            total_points,
            level: total_points / POINTS_PER_LEVEL + config.starting_level,
            points_to_next_level: POINTS_PER_LEVEL - total_points % POINTS_PER_LEVEL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionReport {
    pub session_id: SessionId,
    pub session_name: String,
    pub location: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_seconds: i64,
    pub scan_count: u64,
    pub successful_scans: u64,
    pub failed_scans: u64,
    pub progression: Progression,
    /// False when the server never confirmed the end.
    pub synchronized: bool,
    /// False when the scan records could not be fetched; counts are then zero.
    pub records_available: bool,
}

impl SessionReport {
    /// `records` is `None` when fetching the session's scans failed.
    pub fn calculate(
        session: &Session,
        ended_at: DateTime<Utc>,
        records: Option<&[ScanRecord]>,
        sync: &EndSync,
        config: &ProgressionConfig,
    ) -> Self {
        let records_available = records.is_some();
        let records = records.unwrap_or_default();

        let scan_count = records.len() as u64;
        let successful_scans = records
            .iter()
            .filter(|r| r.status == ScanRecordStatus::Success)
            .count() as u64;

        let elapsed = ended_at.signed_duration_since(session.started_at);

        Self {
            session_id: session.id.clone(),
            session_name: session.name.clone(),
            location: session.location.clone(),
            started_at: session.started_at,
            ended_at,
            duration_seconds: elapsed.num_seconds().max(0),
            scan_count,
            successful_scans,
            failed_scans: scan_count - successful_scans,
            progression: Progression::calculate(successful_scans, config),
            synchronized: sync.is_synchronized(),
            records_available,
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::seconds(self.duration_seconds)
    }

    pub fn duration_display(&self) -> String {
        format_duration(self.duration())
    }
}

/// `"1h 02m 05s"`, `"12m 05s"` or `"45s"`; negative spans render as `"0s"`.
pub fn format_duration(duration: Duration) -> String {
    let total = duration.num_seconds().max(0);
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{hours}h {minutes:02}m {seconds:02}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds:02}s")
    } else {
        format!("{seconds}s")
    }
}
