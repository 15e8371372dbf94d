//! Reconciliation of remote classes and timetables against local classes
//! and courses.
//!
//! Per class, every subject gets one course named `"<subject> <class>"`.
//! Lesson occurrences are folded into recurring weekly slots; only slots seen
//! on at least [`MIN_OCCURRENCES`] dates end up in the course's `times`.

use super::fetch::distribute_room_schedule;
use super::stats::ReconcileStats;
use super::types::{RemoteClass, RemoteRoom, RemoteTimetableEntry, RoomSchedule};
use crate::config::SchoolConfig;
use crate::db::{
    CourseQuery, CourseTime, LocalClass, LocalCourse, NewClass, NewCourse, ReconcileKey,
    SchoolStore, StoreError,
};
use chrono::{NaiveTime, Weekday};
use std::collections::HashMap;
use tracing::{debug, info, warn};

use super::times::{duration_minutes, weekday};

/// Slots observed fewer times than this are one-off events, not schedule.
pub const MIN_OCCURRENCES: u32 = 2;

/// Name format stored on classes created by the sync.
const STATIC_NAME_FORMAT: &str = "static";

/// A weekly pattern aggregated from lesson occurrences.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecurringSlot {
    pub weekday: Weekday,
    pub start_time: NaiveTime,
    /// Minutes
    pub duration: u32,
    pub room: String,
    pub count: u32,
}

impl RecurringSlot {
    fn from_entry(entry: &RemoteTimetableEntry) -> Self {
        Self {
            weekday: weekday(entry.date),
            start_time: entry.start_time,
            duration: duration_minutes(entry.start_time, entry.end_time),
            room: entry.room.clone(),
            count: 1,
        }
    }

    fn same_pattern(&self, other: &RecurringSlot) -> bool {
        self.weekday == other.weekday
            && self.start_time == other.start_time
            && self.duration == other.duration
            && self.room == other.room
    }

    pub fn to_course_time(&self) -> CourseTime {
        CourseTime {
            weekday: self.weekday,
            start_time: self.start_time,
            duration: self.duration,
            event_id: None,
            room: self.room.clone(),
        }
    }
}

/// Folds one occurrence into `slots`.
///
/// Returns true if the occurrence started a new pattern.
pub fn add_occurrence(slots: &mut Vec<RecurringSlot>, entry: &RemoteTimetableEntry) -> bool {
    let candidate = RecurringSlot::from_entry(entry);
    match slots.iter_mut().find(|slot| slot.same_pattern(&candidate)) {
        Some(slot) => {
            slot.count += 1;
            false
        }
        None => {
            slots.push(candidate);
            true
        }
    }
}

/// The course times kept from a subject's slots.
pub fn retained_times(slots: &[RecurringSlot]) -> Vec<CourseTime> {
    slots
        .iter()
        .filter(|slot| slot.count >= MIN_OCCURRENCES)
        .map(RecurringSlot::to_course_time)
        .collect()
}

/// Course handle and slots of one subject within one class
struct SubjectSchedule {
    course: LocalCourse,
    slots: Vec<RecurringSlot>,
}

/// Reconciles one school's feed from one WebUntis system.
pub struct TimetableReconciler<'a, S: ?Sized> {
    store: &'a S,
    school: &'a SchoolConfig,
    /// Identifies the WebUntis system in reconcile keys
    system: &'a str,
}

impl<'a, S> TimetableReconciler<'a, S>
where
    S: SchoolStore + ?Sized,
{
    pub fn new(store: &'a S, school: &'a SchoolConfig, system: &'a str) -> Self {
        Self {
            store,
            school,
            system,
        }
    }

    /// Distributes the room schedules onto `classes`, then creates or reuses
    /// each class and its courses and overwrites the courses' times.
    ///
    /// Classes are processed in feed order. A store failure aborts the run;
    /// classes handled before it keep their changes.
    pub async fn reconcile(
        &self,
        mut classes: Vec<RemoteClass>,
        rooms: &[RemoteRoom],
        room_schedules: &[RoomSchedule],
    ) -> Result<ReconcileStats, StoreError> {
        let mut stats = ReconcileStats::default();

        let rooms_by_id: HashMap<i64, &RemoteRoom> =
            rooms.iter().map(|room| (room.id, room)).collect();
        for schedule in room_schedules {
            match rooms_by_id.get(&schedule.room_id) {
                Some(room) => distribute_room_schedule(
                    &mut classes,
                    room,
                    &schedule.periods,
                    &mut stats.dropped,
                ),
                None => warn!(
                    school = %self.school.name,
                    room_id = schedule.room_id,
                    "Skipping schedule of unknown room"
                ),
            }
        }

        for remote_class in &classes {
            self.reconcile_class(remote_class, &mut stats).await?;
        }

        info!(
            school = %self.school.name,
            classes_created = stats.classes.created_count,
            classes_reused = stats.classes.reused_count,
            courses_created = stats.courses.created_count,
            courses_reused = stats.courses.reused_count,
            slots = stats.times.count,
            dropped = stats.dropped.total(),
            "Reconciliation finished"
        );

        Ok(stats)
    }

    async fn reconcile_class(
        &self,
        remote_class: &RemoteClass,
        stats: &mut ReconcileStats,
    ) -> Result<(), StoreError> {
        info!(
            school = %self.school.name,
            class = %remote_class.name,
            entries = remote_class.timetable.len(),
            "Handling class"
        );
        let local_class = self.resolve_class(remote_class, stats).await?;

        let mut subjects: Vec<SubjectSchedule> = Vec::new();
        let mut subject_index: HashMap<&str, usize> = HashMap::new();

        for entry in &remote_class.timetable {
            let index = match subject_index.get(entry.subject.as_str()) {
                Some(&index) => index,
                None => {
                    let course = self
                        .resolve_course(&local_class, remote_class.id, &entry.subject, stats)
                        .await?;
                    subjects.push(SubjectSchedule {
                        course,
                        slots: Vec::new(),
                    });
                    subject_index.insert(entry.subject.as_str(), subjects.len() - 1);
                    subjects.len() - 1
                }
            };

            if add_occurrence(&mut subjects[index].slots, entry) {
                stats.times.count += 1;
            }
        }

        for subject in &subjects {
            let times = retained_times(&subject.slots);
            debug!(
                course = %subject.course.name,
                slots = subject.slots.len(),
                retained = times.len(),
                "Updating course times"
            );
            self.store
                .update_course_times(subject.course.course_id, &times)
                .await?;
        }

        Ok(())
    }

    /// Finds the local class for a remote one: by reconcile key first, then
    /// by name (oldest match wins), creating it if neither exists.
    async fn resolve_class(
        &self,
        remote_class: &RemoteClass,
        stats: &mut ReconcileStats,
    ) -> Result<LocalClass, StoreError> {
        let key = ReconcileKey::class(&self.school.id, self.system, remote_class.id);

        if let Some(local_id) = self.store.find_link(&key).await? {
            match self.store.get_class(local_id).await? {
                Some(class) => {
                    stats.classes.reused_count += 1;
                    return Ok(class);
                }
                None => warn!(link = %key, local_id, "Linked class no longer exists"),
            }
        }

        let found = self
            .store
            .find_classes(&self.school.id, &remote_class.name)
            .await?;
        if found.len() > 1 {
            warn!(
                school = %self.school.name,
                class = %remote_class.name,
                matches = found.len(),
                "Multiple classes share this name, using the oldest"
            );
            stats.ambiguous_matches += 1;
        }

        let class = match found.into_iter().next() {
            Some(class) => {
                stats.classes.reused_count += 1;
                class
            }
            None => {
                let class = self
                    .store
                    .create_class(NewClass {
                        school_id: self.school.id.clone(),
                        name: remote_class.name.clone(),
                        name_format: STATIC_NAME_FORMAT.to_string(),
                        year: self.school.current_year.clone(),
                    })
                    .await?;
                stats.classes.created_count += 1;
                class
            }
        };

        self.store.save_link(&key, class.class_id).await?;
        Ok(class)
    }

    /// Finds or creates the course of `subject` in `class`.
    async fn resolve_course(
        &self,
        class: &LocalClass,
        remote_class_id: i64,
        subject: &str,
        stats: &mut ReconcileStats,
    ) -> Result<LocalCourse, StoreError> {
        let key = ReconcileKey::course(&self.school.id, self.system, remote_class_id, subject);

        if let Some(local_id) = self.store.find_link(&key).await? {
            match self.store.get_course(local_id).await? {
                Some(course) if course.class_ids.contains(&class.class_id) => {
                    stats.courses.reused_count += 1;
                    return Ok(course);
                }
                _ => warn!(link = %key, local_id, "Linked course no longer matches its class"),
            }
        }

        let course_name = format!("{} {}", subject, class.name);
        debug!(school = %self.school.name, course = %course_name, "Handling course");

        let found = self
            .store
            .find_courses(&CourseQuery {
                name: course_name.clone(),
                class_id: class.class_id,
                school_id: self.school.id.clone(),
            })
            .await?;
        if found.len() > 1 {
            warn!(
                school = %self.school.name,
                course = %course_name,
                matches = found.len(),
                "Multiple courses share this name, using the oldest"
            );
            stats.ambiguous_matches += 1;
        }

        let course = match found.into_iter().next() {
            Some(course) => {
                stats.courses.reused_count += 1;
                course
            }
            None => {
                let course = self
                    .store
                    .create_course(NewCourse {
                        school_id: self.school.id.clone(),
                        name: course_name,
                        class_ids: vec![class.class_id],
                        teacher_ids: Vec::new(),
                    })
                    .await?;
                stats.courses.created_count += 1;
                course
            }
        };

        self.store.save_link(&key, course.course_id).await?;
        Ok(course)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteStore;
    use crate::sync::times::format_date;
    use crate::webuntis::{ElementRef, TimetablePeriod};
    use chrono::NaiveDate;

    const SYSTEM: &str = "https://mese.webuntis.com#gym";

    fn school() -> SchoolConfig {
        SchoolConfig {
            id: "school-1".to_string(),
            name: "Gymnasium".to_string(),
            current_year: Some("2023/24".to_string()),
            systems: Vec::new(),
        }
    }

    fn entry(
        date: (i32, u32, u32),
        start: (u32, u32),
        end: (u32, u32),
        room: &str,
    ) -> RemoteTimetableEntry {
        RemoteTimetableEntry {
            date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
            start_time: NaiveTime::from_hms_opt(start.0, start.1, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(end.0, end.1, 0).unwrap(),
            teacher: "Mr. Smith".to_string(),
            subject: "Math".to_string(),
            room: room.to_string(),
        }
    }

    fn element(id: i64, longname: &str) -> ElementRef {
        ElementRef {
            id,
            name: None,
            longname: Some(longname.to_string()),
        }
    }

    /// A lesson of `subject` for `class_ids` in room 3 on `date` (`yyyymmdd`)
    fn lesson(
        date: u32,
        start: u32,
        end: u32,
        subject: &str,
        class_ids: &[i64],
    ) -> TimetablePeriod {
        TimetablePeriod {
            id: 0,
            date,
            start_time: start,
            end_time: end,
            kl: class_ids.iter().map(|&id| element(id, "")).collect(),
            te: vec![element(20, "Mr. Smith")],
            su: vec![element(30, subject)],
            ro: vec![element(3, "")],
        }
    }

    fn room() -> RemoteRoom {
        RemoteRoom {
            id: 3,
            name: "101 (Room, Bldg)".to_string(),
        }
    }

    #[test]
    fn test_identical_occurrences_aggregate() {
        let mut slots = Vec::new();
        // Two Mondays, same time and room
        assert!(add_occurrence(&mut slots, &entry((2023, 9, 4), (8, 0), (8, 45), "101")));
        assert!(!add_occurrence(&mut slots, &entry((2023, 9, 11), (8, 0), (8, 45), "101")));
        // Same slot, different room
        assert!(add_occurrence(&mut slots, &entry((2023, 9, 18), (8, 0), (8, 45), "102")));

        assert_eq!(slots.len(), 2);
        assert_eq!(slots[0].count, 2);
        assert_eq!(slots[0].weekday, Weekday::Mon);
        assert_eq!(slots[0].duration, 45);
        assert_eq!(slots[1].count, 1);
    }

    #[test]
    fn test_retention_threshold() {
        let slot = |room: &str, count| RecurringSlot {
            weekday: Weekday::Tue,
            start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            duration: 45,
            room: room.to_string(),
            count,
        };
        let slots = vec![slot("A", 1), slot("B", 3), slot("C", 2)];

        let rooms: Vec<String> = retained_times(&slots).into_iter().map(|t| t.room).collect();
        assert_eq!(rooms, vec!["B".to_string(), "C".to_string()]);
        assert!(retained_times(&slots).iter().all(|t| t.event_id.is_none()));
    }

    #[tokio::test]
    async fn test_weekly_lesson_with_single_substitution() {
        let store = SqliteStore::open_in_memory().unwrap();
        let school = school();
        let reconciler = TimetableReconciler::new(&store, &school, SYSTEM);

        // Ten Mondays starting 2023-09-04, plus one Wednesday substitution
        let mut periods: Vec<TimetablePeriod> = (0..10)
            .map(|week| {
                let date =
                    NaiveDate::from_ymd_opt(2023, 9, 4).unwrap() + chrono::Days::new(7 * week);
                lesson(format_date(date), 800, 845, "Math", &[7])
            })
            .collect();
        periods.push(lesson(20230906, 1000, 1045, "Math", &[7]));

        let stats = reconciler
            .reconcile(
                vec![RemoteClass::new(7, "5a")],
                &[room()],
                &[RoomSchedule { room_id: 3, periods }],
            )
            .await
            .unwrap();

        assert_eq!(stats.classes.created_count, 1);
        assert_eq!(stats.courses.created_count, 1);
        assert_eq!(stats.times.count, 2);

        let classes = store.list_classes("school-1").unwrap();
        assert_eq!(classes.len(), 1);
        assert_eq!(classes[0].name, "5a");
        assert_eq!(classes[0].year.as_deref(), Some("2023/24"));

        let courses = store.list_courses("school-1").unwrap();
        assert_eq!(courses.len(), 1);
        assert_eq!(courses[0].name, "Math 5a");
        assert_eq!(courses[0].class_ids, vec![classes[0].class_id]);
        assert_eq!(
            courses[0].times,
            vec![CourseTime {
                weekday: Weekday::Mon,
                start_time: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
                duration: 45,
                event_id: None,
                room: "101 (Room, Bldg)".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_second_run_reuses_everything() {
        let store = SqliteStore::open_in_memory().unwrap();
        let school = school();
        let reconciler = TimetableReconciler::new(&store, &school, SYSTEM);

        let classes = || vec![RemoteClass::new(7, "5a"), RemoteClass::new(8, "5b")];
        let schedules = vec![RoomSchedule {
            room_id: 3,
            periods: vec![
                lesson(20230904, 800, 845, "Math", &[7, 8]),
                lesson(20230911, 800, 845, "Math", &[7, 8]),
            ],
        }];

        let first = reconciler.reconcile(classes(), &[room()], &schedules).await.unwrap();
        assert_eq!(first.classes.created_count, 2);
        assert_eq!(first.classes.reused_count, 0);
        assert_eq!(first.courses.created_count, 2);

        let second = reconciler.reconcile(classes(), &[room()], &schedules).await.unwrap();
        assert_eq!(second.classes.created_count, 0);
        assert_eq!(second.classes.reused_count, 2);
        assert_eq!(second.courses.created_count, 0);
        assert_eq!(second.courses.reused_count, 2);

        // Same subject in two classes yields two courses
        let names: Vec<String> = store
            .list_courses("school-1")
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["Math 5a".to_string(), "Math 5b".to_string()]);
    }

    #[tokio::test]
    async fn test_name_match_reuses_preexisting_records() {
        let store = SqliteStore::open_in_memory().unwrap();
        let school = school();

        // Records created by hand before the first sync, duplicate class names included
        let oldest = store
            .create_class(NewClass {
                school_id: "school-1".to_string(),
                name: "5a".to_string(),
                name_format: "static".to_string(),
                year: None,
            })
            .await
            .unwrap();
        store
            .create_class(NewClass {
                school_id: "school-1".to_string(),
                name: "5a".to_string(),
                name_format: "static".to_string(),
                year: None,
            })
            .await
            .unwrap();

        let reconciler = TimetableReconciler::new(&store, &school, SYSTEM);
        let stats = reconciler
            .reconcile(vec![RemoteClass::new(7, "5a")], &[room()], &[])
            .await
            .unwrap();

        assert_eq!(stats.classes.reused_count, 1);
        assert_eq!(stats.ambiguous_matches, 1);
        let key = ReconcileKey::class("school-1", SYSTEM, 7);
        assert_eq!(store.find_link(&key).await.unwrap(), Some(oldest.class_id));
    }

    #[tokio::test]
    async fn test_times_overwritten_on_rerun() {
        let store = SqliteStore::open_in_memory().unwrap();
        let school = school();
        let reconciler = TimetableReconciler::new(&store, &school, SYSTEM);

        let weekly = |start: u32| RoomSchedule {
            room_id: 3,
            periods: vec![
                lesson(20230904, start, start + 45, "Math", &[7]),
                lesson(20230911, start, start + 45, "Math", &[7]),
            ],
        };

        reconciler
            .reconcile(vec![RemoteClass::new(7, "5a")], &[room()], &[weekly(800)])
            .await
            .unwrap();
        reconciler
            .reconcile(vec![RemoteClass::new(7, "5a")], &[room()], &[weekly(1000)])
            .await
            .unwrap();

        let courses = store.list_courses("school-1").unwrap();
        assert_eq!(courses.len(), 1);
        assert_eq!(courses[0].times.len(), 1);
        assert_eq!(
            courses[0].times[0].start_time,
            NaiveTime::from_hms_opt(10, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn test_renamed_class_is_found_through_link() {
        let store = SqliteStore::open_in_memory().unwrap();
        let school = school();
        let reconciler = TimetableReconciler::new(&store, &school, SYSTEM);

        reconciler
            .reconcile(vec![RemoteClass::new(7, "5a")], &[room()], &[])
            .await
            .unwrap();

        // The class is renamed upstream; the link still points at the old record
        let stats = reconciler
            .reconcile(vec![RemoteClass::new(7, "5a (new)")], &[room()], &[])
            .await
            .unwrap();

        assert_eq!(stats.classes.created_count, 0);
        assert_eq!(stats.classes.reused_count, 1);
        assert_eq!(store.list_classes("school-1").unwrap().len(), 1);
    }

    fn weekly_math(class_ids: &[i64]) -> Vec<RoomSchedule> {
        vec![RoomSchedule {
            room_id: 3,
            periods: vec![
                lesson(20230904, 800, 845, "Math", class_ids),
                lesson(20230911, 800, 845, "Math", class_ids),
            ],
        }]
    }

    async fn create_class(store: &SqliteStore, name: &str) -> LocalClass {
        store
            .create_class(NewClass {
                school_id: "school-1".to_string(),
                name: name.to_string(),
                name_format: "static".to_string(),
                year: None,
            })
            .await
            .unwrap()
    }

    async fn create_course(store: &SqliteStore, name: &str, class_id: i64) -> LocalCourse {
        store
            .create_course(NewCourse {
                school_id: "school-1".to_string(),
                name: name.to_string(),
                class_ids: vec![class_id],
                teacher_ids: Vec::new(),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_duplicate_courses_use_oldest() {
        let store = SqliteStore::open_in_memory().unwrap();
        let school = school();
        let class = create_class(&store, "5a").await;
        let oldest = create_course(&store, "Math 5a", class.class_id).await;
        let newer = create_course(&store, "Math 5a", class.class_id).await;

        let reconciler = TimetableReconciler::new(&store, &school, SYSTEM);
        let stats = reconciler
            .reconcile(vec![RemoteClass::new(7, "5a")], &[room()], &weekly_math(&[7]))
            .await
            .unwrap();

        assert_eq!(stats.classes.reused_count, 1);
        assert_eq!(stats.courses.reused_count, 1);
        assert_eq!(stats.courses.created_count, 0);
        assert_eq!(stats.ambiguous_matches, 1);

        let key = ReconcileKey::course("school-1", SYSTEM, 7, "Math");
        assert_eq!(store.find_link(&key).await.unwrap(), Some(oldest.course_id));
        let stored_oldest = store.get_course(oldest.course_id).await.unwrap().unwrap();
        assert_eq!(stored_oldest.times.len(), 1);
        let stored_newer = store.get_course(newer.course_id).await.unwrap().unwrap();
        assert!(stored_newer.times.is_empty());
    }

    #[tokio::test]
    async fn test_linked_course_reused_despite_other_name() {
        let store = SqliteStore::open_in_memory().unwrap();
        let school = school();
        let class = create_class(&store, "5a").await;
        let course = create_course(&store, "Mathematics (5a)", class.class_id).await;
        let key = ReconcileKey::course("school-1", SYSTEM, 7, "Math");
        store.save_link(&key, course.course_id).await.unwrap();

        let reconciler = TimetableReconciler::new(&store, &school, SYSTEM);
        let stats = reconciler
            .reconcile(vec![RemoteClass::new(7, "5a")], &[room()], &weekly_math(&[7]))
            .await
            .unwrap();

        assert_eq!(stats.courses.reused_count, 1);
        assert_eq!(stats.courses.created_count, 0);
        assert_eq!(stats.ambiguous_matches, 0);

        let courses = store.list_courses("school-1").unwrap();
        assert_eq!(courses.len(), 1);
        assert_eq!(courses[0].name, "Mathematics (5a)");
        assert_eq!(courses[0].times.len(), 1);
    }

    #[tokio::test]
    async fn test_stale_course_link_falls_back_to_name() {
        let store = SqliteStore::open_in_memory().unwrap();
        let school = school();
        create_class(&store, "5a").await;
        let other_class = create_class(&store, "5b").await;
        let foreign = create_course(&store, "Math 5b", other_class.class_id).await;
        let key = ReconcileKey::course("school-1", SYSTEM, 7, "Math");
        store.save_link(&key, foreign.course_id).await.unwrap();

        let reconciler = TimetableReconciler::new(&store, &school, SYSTEM);
        let stats = reconciler
            .reconcile(vec![RemoteClass::new(7, "5a")], &[room()], &weekly_math(&[7]))
            .await
            .unwrap();

        assert_eq!(stats.courses.created_count, 1);
        assert_eq!(stats.courses.reused_count, 0);

        let relinked = store.find_link(&key).await.unwrap().unwrap();
        assert_ne!(relinked, foreign.course_id);
        let created = store.get_course(relinked).await.unwrap().unwrap();
        assert_eq!(created.name, "Math 5a");
        assert_eq!(created.times.len(), 1);

        let untouched = store.get_course(foreign.course_id).await.unwrap().unwrap();
        assert!(untouched.times.is_empty());
    }
}
