use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::config::{AppConfig, SchoolConfig};
use crate::db::SqliteStore;
use crate::sync::{SchoolReport, SchoolyearSyncer, SyncError};
use crate::webuntis::WebUntisClient;

pub type Syncer = SchoolyearSyncer<WebUntisClient, SqliteStore>;

/// Shared state of the server and the periodic sync job.
pub struct AppState {
    pub config: AppConfig,
    pub syncer: Syncer,
    /// Most recent report per school id
    pub last_reports: DashMap<String, SchoolReport>,
}

impl AppState {
    pub fn new(config: AppConfig, syncer: Syncer) -> Self {
        Self {
            config,
            syncer,
            last_reports: DashMap::new(),
        }
    }

    /// Syncs every configured school and remembers the reports.
    ///
    /// Failed schools get a report with `success: false`.
    pub async fn sync_all(&self) -> Vec<SchoolReport> {
        let started_at = Utc::now();
        let results = self.syncer.sync_all(&self.config.schools).await;

        self.config
            .schools
            .iter()
            .zip(results)
            .map(|(school, result)| self.record(school, started_at, &result))
            .collect()
    }

    /// Syncs one school by id and remembers the outcome.
    pub async fn sync_school(&self, school_id: &str) -> Result<SchoolReport, SyncError> {
        let school = self
            .config
            .get_school(school_id)
            .ok_or_else(|| SyncError::UnknownSchool {
                school_id: school_id.to_string(),
            })?;

        let started_at = Utc::now();
        let result = self.syncer.sync_school(school).await;
        self.record(school, started_at, &result);
        result
    }

    pub fn last_report(&self, school_id: &str) -> Option<SchoolReport> {
        self.last_reports
            .get(school_id)
            .map(|entry| entry.value().clone())
    }

    /// Turns a run's result into a report and stores it as the school's last one.
    ///
    /// A run rejected as already running leaves the stored report of the
    /// ongoing run's predecessor untouched.
    fn record(
        &self,
        school: &SchoolConfig,
        started_at: DateTime<Utc>,
        result: &Result<SchoolReport, SyncError>,
    ) -> SchoolReport {
        let report = match result {
            Ok(report) => report.clone(),
            Err(e) => SchoolReport::failed(school, started_at, e),
        };
        if !matches!(result, Err(SyncError::AlreadyRunning { .. })) {
            self.last_reports
                .insert(school.id.clone(), report.clone());
        }
        report
    }
}
