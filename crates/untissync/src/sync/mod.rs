/// WebUntis school-year sync: fetch a school's timetable and reconcile it
/// into local classes and courses
mod error;
pub mod fetch;
pub mod reconcile;
mod stats;
pub mod times;
mod types;

pub use error::SyncError;
pub use reconcile::{RecurringSlot, TimetableReconciler, MIN_OCCURRENCES};
pub use stats::{DropCounts, EntityCounts, ReconcileStats, SlotCounts};
pub use types::*;

use crate::config::{SchoolConfig, WebUntisSystem};
use crate::db::SchoolStore;
use crate::webuntis::{TimetableConnector, TimetableSource};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Outcome of one school's sync run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchoolReport {
    pub school_id: String,
    pub school: String,
    pub success: bool,
    pub correlation_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub systems: Vec<SystemReport>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemReport {
    pub system: String,
    pub school_year: String,
    pub stats: ReconcileStats,
}

/// Runs school-year syncs against a timetable system and a store.
///
/// Runs for different schools may overlap; a second run for a school that is
/// already syncing is rejected with [`SyncError::AlreadyRunning`].
pub struct SchoolyearSyncer<C, S: ?Sized> {
    connector: C,
    store: Arc<S>,
    running: DashMap<String, Arc<Mutex<()>>>,
}

impl<C, S> SchoolyearSyncer<C, S>
where
    C: TimetableConnector,
    S: SchoolStore + ?Sized,
{
    pub fn new(connector: C, store: Arc<S>) -> Self {
        Self {
            connector,
            store,
            running: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Syncs one school from every WebUntis system configured for it.
    ///
    /// # Returns
    /// * `Ok(SchoolReport)` - Stats per system, `success` set
    /// * `Err(SyncError)` - Missing configuration, overlapping run, upstream
    ///   or persistence failure
    pub async fn sync_school(&self, school: &SchoolConfig) -> Result<SchoolReport, SyncError> {
        if school.systems.is_empty() {
            return Err(SyncError::NoConfiguration {
                school: school.name.clone(),
            });
        }

        let lock = self
            .running
            .entry(school.id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock
            .try_lock_owned()
            .map_err(|_| SyncError::AlreadyRunning {
                school: school.name.clone(),
            })?;

        let correlation_id = generate_correlation_id();
        let started_at = Utc::now();
        let start = Instant::now();
        info!(
            correlation_id = %correlation_id,
            school = %school.name,
            systems = school.systems.len(),
            "Starting school-year sync"
        );

        let mut systems = Vec::with_capacity(school.systems.len());
        for system in &school.systems {
            systems.push(self.sync_from_system(school, system, &correlation_id).await?);
        }

        info!(
            correlation_id = %correlation_id,
            school = %school.name,
            duration_ms = start.elapsed().as_millis() as u64,
            "School-year sync completed"
        );

        Ok(SchoolReport {
            school_id: school.id.clone(),
            school: school.name.clone(),
            success: true,
            correlation_id,
            started_at,
            finished_at: Utc::now(),
            systems,
            error: None,
        })
    }

    /// Syncs all schools concurrently.
    ///
    /// Results are returned in the order of `schools`.
    pub async fn sync_all(
        &self,
        schools: &[SchoolConfig],
    ) -> Vec<Result<SchoolReport, SyncError>> {
        join_all(schools.iter().map(|school| async move {
            let result = self.sync_school(school).await;
            if let Err(e) = &result {
                error!(school = %school.name, error = %e, "School-year sync failed");
            }
            result
        }))
        .await
    }

    async fn sync_from_system(
        &self,
        school: &SchoolConfig,
        system: &WebUntisSystem,
        correlation_id: &str,
    ) -> Result<SystemReport, SyncError> {
        let upstream = |source| SyncError::UpstreamUnavailable {
            school: school.name.clone(),
            source,
        };

        let session = self.connector.login(system).await.map_err(upstream)?;
        let fetched = fetch::fetch_schoolyear(&session).await;

        if let Err(e) = session.logout().await {
            warn!(
                correlation_id = %correlation_id,
                system = %system.key(),
                error = %e,
                "WebUntis logout failed"
            );
        }

        let feed = fetched.map_err(upstream)?;
        let system_key = system.key();
        let reconciler = TimetableReconciler::new(self.store.as_ref(), school, &system_key);
        let stats = reconciler
            .reconcile(feed.classes, &feed.rooms, &feed.room_schedules)
            .await?;

        Ok(SystemReport {
            system: system_key,
            school_year: feed.school_year.name,
            stats,
        })
    }
}

impl SchoolReport {
    pub fn failed(school: &SchoolConfig, started_at: DateTime<Utc>, error: &SyncError) -> Self {
        Self {
            school_id: school.id.clone(),
            school: school.name.clone(),
            success: false,
            correlation_id: String::new(),
            started_at,
            finished_at: Utc::now(),
            systems: Vec::new(),
            error: Some(error.to_string()),
        }
    }
}

/// Generates a unique correlation ID for tracing one sync run.
fn generate_correlation_id() -> String {
    let timestamp = Utc::now().timestamp_micros();
    let random: u32 = rand::thread_rng().gen();
    format!("{:x}-{:08x}", timestamp & 0xFFFFFFFF, random)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{
        CourseQuery, CourseTime, LocalClass, LocalCourse, NewClass, NewCourse, ReconcileKey,
        SqliteStore, StoreError,
    };
    use crate::webuntis::{
        ElementRef, Klasse, Room, Schoolyear, TimegridDay, TimetablePeriod, TimetableRange,
        WebUntisError,
    };
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    #[derive(Clone, Default)]
    struct FakeFeed {
        classes: Vec<Klasse>,
        rooms: Vec<Room>,
        timetables: HashMap<i64, Vec<TimetablePeriod>>,
        fail_timetables: bool,
    }

    struct FakeSession {
        feed: FakeFeed,
        logouts: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl TimetableSource for FakeSession {
        async fn current_schoolyear(&self) -> Result<Schoolyear, WebUntisError> {
            Ok(Schoolyear {
                id: 11,
                name: "2023/2024".to_string(),
                start_date: 20230801,
                end_date: 20240731,
            })
        }

        async fn timegrid(&self) -> Result<Vec<TimegridDay>, WebUntisError> {
            Ok(Vec::new())
        }

        async fn classes(&self, schoolyear_id: i64) -> Result<Vec<Klasse>, WebUntisError> {
            assert_eq!(schoolyear_id, 11);
            Ok(self.feed.classes.clone())
        }

        async fn rooms(&self) -> Result<Vec<Room>, WebUntisError> {
            Ok(self.feed.rooms.clone())
        }

        async fn room_timetable(
            &self,
            room_id: i64,
            range: TimetableRange,
        ) -> Result<Vec<TimetablePeriod>, WebUntisError> {
            assert_eq!(range.start_date, 20230801);
            if self.feed.fail_timetables {
                return Err(WebUntisError::Network {
                    message: "connection reset".to_string(),
                });
            }
            Ok(self.feed.timetables.get(&room_id).cloned().unwrap_or_default())
        }

        async fn logout(&self) -> Result<(), WebUntisError> {
            self.logouts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeConnector {
        feed: FakeFeed,
        reject_login: bool,
        logouts: Arc<AtomicUsize>,
        /// (entered, release): login signals `entered` then waits for `release`
        gate: Option<(Arc<Notify>, Arc<Notify>)>,
    }

    #[async_trait]
    impl TimetableConnector for FakeConnector {
        type Session = FakeSession;

        async fn login(&self, _system: &WebUntisSystem) -> Result<FakeSession, WebUntisError> {
            if let Some((entered, release)) = &self.gate {
                entered.notify_one();
                release.notified().await;
            }
            if self.reject_login {
                return Err(WebUntisError::Authentication {
                    message: "bad credentials".to_string(),
                });
            }
            Ok(FakeSession {
                feed: self.feed.clone(),
                logouts: self.logouts.clone(),
            })
        }
    }

    /// Delegates to SQLite but fails to create one particular class
    struct FailingStore {
        inner: SqliteStore,
        fail_on_class: String,
    }

    #[async_trait]
    impl SchoolStore for FailingStore {
        async fn find_classes(
            &self,
            school_id: &str,
            name: &str,
        ) -> Result<Vec<LocalClass>, StoreError> {
            self.inner.find_classes(school_id, name).await
        }

        async fn get_class(&self, class_id: i64) -> Result<Option<LocalClass>, StoreError> {
            self.inner.get_class(class_id).await
        }

        async fn create_class(&self, class: NewClass) -> Result<LocalClass, StoreError> {
            if class.name == self.fail_on_class {
                return Err(StoreError::Unavailable {
                    message: "disk full".to_string(),
                });
            }
            self.inner.create_class(class).await
        }

        async fn find_courses(&self, query: &CourseQuery) -> Result<Vec<LocalCourse>, StoreError> {
            self.inner.find_courses(query).await
        }

        async fn get_course(&self, course_id: i64) -> Result<Option<LocalCourse>, StoreError> {
            self.inner.get_course(course_id).await
        }

        async fn create_course(&self, course: NewCourse) -> Result<LocalCourse, StoreError> {
            self.inner.create_course(course).await
        }

        async fn update_course_times(
            &self,
            course_id: i64,
            times: &[CourseTime],
        ) -> Result<(), StoreError> {
            self.inner.update_course_times(course_id, times).await
        }

        async fn find_link(&self, key: &ReconcileKey) -> Result<Option<i64>, StoreError> {
            self.inner.find_link(key).await
        }

        async fn save_link(&self, key: &ReconcileKey, local_id: i64) -> Result<(), StoreError> {
            self.inner.save_link(key, local_id).await
        }
    }

    fn element(id: i64, longname: &str) -> ElementRef {
        ElementRef {
            id,
            name: None,
            longname: Some(longname.to_string()),
        }
    }

    fn klasse(id: i64, name: &str) -> Klasse {
        Klasse {
            id,
            name: name.to_string(),
            long_name: name.to_string(),
        }
    }

    fn lesson(date: u32, class_id: i64) -> TimetablePeriod {
        TimetablePeriod {
            id: 0,
            date,
            start_time: 800,
            end_time: 845,
            kl: vec![element(class_id, "")],
            te: vec![element(20, "Mr. Smith")],
            su: vec![element(30, "Math")],
            ro: vec![element(3, "")],
        }
    }

    fn feed(class_names: &[&str]) -> FakeFeed {
        let classes: Vec<Klasse> = class_names
            .iter()
            .enumerate()
            .map(|(i, name)| klasse(i as i64 + 1, name))
            .collect();
        let periods = classes
            .iter()
            .flat_map(|k| [lesson(20230904, k.id), lesson(20230911, k.id)])
            .collect();

        FakeFeed {
            classes,
            rooms: vec![Room {
                id: 3,
                name: "101".to_string(),
                long_name: "Room".to_string(),
                building: "Bldg".to_string(),
            }],
            timetables: HashMap::from([(3, periods)]),
            fail_timetables: false,
        }
    }

    fn school(with_system: bool) -> SchoolConfig {
        SchoolConfig {
            id: "school-1".to_string(),
            name: "Gymnasium".to_string(),
            current_year: None,
            systems: if with_system {
                vec![WebUntisSystem {
                    url: "https://mese.webuntis.com".to_string(),
                    school_name: "gym".to_string(),
                    user: "sync".to_string(),
                    password: "secret".to_string(),
                }]
            } else {
                Vec::new()
            },
        }
    }

    #[tokio::test]
    async fn test_sync_school_reports_stats() {
        let connector = FakeConnector {
            feed: feed(&["5a", "5b"]),
            ..Default::default()
        };
        let logouts = connector.logouts.clone();
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let syncer = SchoolyearSyncer::new(connector, store.clone());

        let report = syncer.sync_school(&school(true)).await.unwrap();

        assert!(report.success);
        assert_eq!(report.systems.len(), 1);
        let system = &report.systems[0];
        assert_eq!(system.system, "https://mese.webuntis.com#gym");
        assert_eq!(system.school_year, "2023/2024");
        assert_eq!(system.stats.classes.created_count, 2);
        assert_eq!(system.stats.courses.created_count, 2);
        assert_eq!(logouts.load(Ordering::SeqCst), 1);

        let courses = store.list_courses("school-1").unwrap();
        assert!(courses.iter().all(|c| c.times.len() == 1));
    }

    #[tokio::test]
    async fn test_no_configuration_rejected_without_writes() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let syncer = SchoolyearSyncer::new(FakeConnector::default(), store.clone());

        let result = syncer.sync_school(&school(false)).await;

        assert!(matches!(result, Err(SyncError::NoConfiguration { .. })));
        assert!(store.list_classes("school-1").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_login_failure_is_upstream_error() {
        let connector = FakeConnector {
            reject_login: true,
            ..Default::default()
        };
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let syncer = SchoolyearSyncer::new(connector, store);

        let result = syncer.sync_school(&school(true)).await;

        match result {
            Err(SyncError::UpstreamUnavailable { school, source }) => {
                assert_eq!(school, "Gymnasium");
                assert!(matches!(source, WebUntisError::Authentication { .. }));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fetch_failure_still_logs_out() {
        let mut fake = feed(&["5a"]);
        fake.fail_timetables = true;
        let connector = FakeConnector {
            feed: fake,
            ..Default::default()
        };
        let logouts = connector.logouts.clone();
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let syncer = SchoolyearSyncer::new(connector, store.clone());

        let result = syncer.sync_school(&school(true)).await;

        assert!(matches!(result, Err(SyncError::UpstreamUnavailable { .. })));
        assert_eq!(logouts.load(Ordering::SeqCst), 1);
        assert!(store.list_classes("school-1").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_persistence_failure_aborts_remaining_classes() {
        let connector = FakeConnector {
            feed: feed(&["5a", "5b", "5c"]),
            ..Default::default()
        };
        let store = Arc::new(FailingStore {
            inner: SqliteStore::open_in_memory().unwrap(),
            fail_on_class: "5b".to_string(),
        });
        let syncer = SchoolyearSyncer::new(connector, store.clone());

        let result = syncer.sync_school(&school(true)).await;

        assert!(matches!(result, Err(SyncError::Persistence(_))));
        let names: Vec<String> = store
            .inner
            .list_classes("school-1")
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["5a".to_string()]);
    }

    #[tokio::test]
    async fn test_sync_all_keeps_per_school_results() {
        let connector = FakeConnector {
            feed: feed(&["5a"]),
            ..Default::default()
        };
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let syncer = SchoolyearSyncer::new(connector, store);

        let mut unconfigured = school(false);
        unconfigured.id = "school-2".to_string();
        unconfigured.name = "Realschule".to_string();

        let results = syncer.sync_all(&[school(true), unconfigured]).await;

        assert_eq!(results.len(), 2);
        assert!(results[0].as_ref().unwrap().success);
        match &results[1] {
            Err(e @ SyncError::NoConfiguration { .. }) => {
                assert!(e.to_string().contains("Realschule"))
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_overlapping_sync_of_same_school_rejected() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let connector = FakeConnector {
            feed: feed(&["5a"]),
            gate: Some((entered.clone(), release.clone())),
            ..Default::default()
        };
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let syncer = Arc::new(SchoolyearSyncer::new(connector, store));

        let first = tokio::spawn({
            let syncer = syncer.clone();
            async move { syncer.sync_school(&school(true)).await }
        });
        entered.notified().await;

        let second = syncer.sync_school(&school(true)).await;
        assert!(matches!(second, Err(SyncError::AlreadyRunning { .. })));

        release.notify_one();
        assert!(first.await.unwrap().is_ok());
    }
}
