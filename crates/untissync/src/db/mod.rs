/// Database module for synced classes, courses and reconcile links

mod error;
mod types;

pub use error::StoreError;
pub use types::{
    CourseQuery, CourseTime, LinkKind, LocalClass, LocalCourse, NewClass, NewCourse, ReconcileKey,
};

use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

const SCHEMA_SQL: &str = include_str!("../../../../sql/init_sync.sql");

/// Storage for classes and courses the sync job reconciles against.
///
/// `find_*` results are ordered by creation, so the first element is the
/// oldest matching record.
#[async_trait]
pub trait SchoolStore: Send + Sync {
    async fn find_classes(&self, school_id: &str, name: &str) -> Result<Vec<LocalClass>, StoreError>;

    async fn get_class(&self, class_id: i64) -> Result<Option<LocalClass>, StoreError>;

    async fn create_class(&self, class: NewClass) -> Result<LocalClass, StoreError>;

    async fn find_courses(&self, query: &CourseQuery) -> Result<Vec<LocalCourse>, StoreError>;

    async fn get_course(&self, course_id: i64) -> Result<Option<LocalCourse>, StoreError>;

    async fn create_course(&self, course: NewCourse) -> Result<LocalCourse, StoreError>;

    /// Replaces the course's `times` with the given list.
    async fn update_course_times(
        &self,
        course_id: i64,
        times: &[CourseTime],
    ) -> Result<(), StoreError>;

    async fn find_link(&self, key: &ReconcileKey) -> Result<Option<i64>, StoreError>;

    async fn save_link(&self, key: &ReconcileKey, local_id: i64) -> Result<(), StoreError>;
}

pub struct SqliteStore {
    db: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (or creates) the database at `path` and initializes the schema
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref())?;
        info!("Opened sync database at {}", path.as_ref().display());
        Self::with_connection(conn)
    }

    /// Opens a private in-memory database
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    fn with_db<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let db = self.db.lock().map_err(|_| StoreError::Poisoned)?;
        f(&db)
    }

    /// Gets all classes of a school, oldest first
    pub fn list_classes(&self, school_id: &str) -> Result<Vec<LocalClass>, StoreError> {
        self.with_db(|db| {
            let mut stmt = db.prepare(
                "SELECT class_id, school_id, name, name_format, year
                 FROM classes WHERE school_id = ? ORDER BY class_id",
            )?;
            let classes = stmt
                .query_map([school_id], class_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(classes)
        })
    }

    /// Gets all courses of a school with their class ids and times, oldest first
    pub fn list_courses(&self, school_id: &str) -> Result<Vec<LocalCourse>, StoreError> {
        self.with_db(|db| {
            let mut stmt = db.prepare(
                "SELECT course_id, school_id, name, teacher_ids, times, updated_at
                 FROM courses WHERE school_id = ? ORDER BY course_id",
            )?;
            let rows = stmt
                .query_map([school_id], course_columns)?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            rows.into_iter()
                .map(|columns| load_course(db, columns))
                .collect()
        })
    }
}

#[async_trait]
impl SchoolStore for SqliteStore {
    async fn find_classes(&self, school_id: &str, name: &str) -> Result<Vec<LocalClass>, StoreError> {
        self.with_db(|db| {
            let mut stmt = db.prepare(
                "SELECT class_id, school_id, name, name_format, year
                 FROM classes WHERE school_id = ? AND name = ? ORDER BY class_id",
            )?;
            let classes = stmt
                .query_map([school_id, name], class_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(classes)
        })
    }

    async fn get_class(&self, class_id: i64) -> Result<Option<LocalClass>, StoreError> {
        self.with_db(|db| {
            let class = db
                .query_row(
                    "SELECT class_id, school_id, name, name_format, year
                     FROM classes WHERE class_id = ?",
                    [class_id],
                    class_from_row,
                )
                .optional()?;
            Ok(class)
        })
    }

    async fn create_class(&self, class: NewClass) -> Result<LocalClass, StoreError> {
        self.with_db(|db| {
            db.execute(
                "INSERT INTO classes (school_id, name, name_format, year, created_at)
                 VALUES (?1, ?2, ?3, ?4, datetime('now'))",
                (&class.school_id, &class.name, &class.name_format, &class.year),
            )?;
            let class_id = db.last_insert_rowid();
            debug!(class_id, name = %class.name, "Created class");

            Ok(LocalClass {
                class_id,
                school_id: class.school_id,
                name: class.name,
                name_format: class.name_format,
                year: class.year,
            })
        })
    }

    async fn find_courses(&self, query: &CourseQuery) -> Result<Vec<LocalCourse>, StoreError> {
        self.with_db(|db| {
            let mut stmt = db.prepare(
                "SELECT c.course_id, c.school_id, c.name, c.teacher_ids, c.times, c.updated_at
                 FROM courses c
                 JOIN course_classes cc ON cc.course_id = c.course_id
                 WHERE c.name = ?1 AND c.school_id = ?2 AND cc.class_id = ?3
                 ORDER BY c.course_id",
            )?;
            let rows = stmt
                .query_map(
                    params![query.name, query.school_id, query.class_id],
                    course_columns,
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            rows.into_iter()
                .map(|columns| load_course(db, columns))
                .collect()
        })
    }

    async fn get_course(&self, course_id: i64) -> Result<Option<LocalCourse>, StoreError> {
        self.with_db(|db| {
            let columns = db
                .query_row(
                    "SELECT course_id, school_id, name, teacher_ids, times, updated_at
                     FROM courses WHERE course_id = ?",
                    [course_id],
                    course_columns,
                )
                .optional()?;

            columns.map(|columns| load_course(db, columns)).transpose()
        })
    }

    async fn create_course(&self, course: NewCourse) -> Result<LocalCourse, StoreError> {
        self.with_db(|db| {
            let teacher_ids = serde_json::to_string(&course.teacher_ids)?;

            let tx = db.unchecked_transaction()?;
            tx.execute(
                "INSERT INTO courses (school_id, name, teacher_ids, times, created_at)
                 VALUES (?1, ?2, ?3, '[]', datetime('now'))",
                (&course.school_id, &course.name, &teacher_ids),
            )?;
            let course_id = tx.last_insert_rowid();

            for class_id in &course.class_ids {
                tx.execute(
                    "INSERT OR IGNORE INTO course_classes (course_id, class_id) VALUES (?1, ?2)",
                    (course_id, class_id),
                )?;
            }
            tx.commit()?;
            debug!(course_id, name = %course.name, "Created course");

            Ok(LocalCourse {
                course_id,
                school_id: course.school_id,
                name: course.name,
                class_ids: course.class_ids,
                teacher_ids: course.teacher_ids,
                times: Vec::new(),
                updated_at: None,
            })
        })
    }

    async fn update_course_times(
        &self,
        course_id: i64,
        times: &[CourseTime],
    ) -> Result<(), StoreError> {
        let times_json = serde_json::to_string(times)?;
        let now = Utc::now().naive_utc();

        self.with_db(|db| {
            let updated = db.execute(
                "UPDATE courses SET times = ?1, updated_at = ?2 WHERE course_id = ?3",
                params![times_json, now, course_id],
            )?;
            if updated == 0 {
                return Err(StoreError::NotFound {
                    entity: "course",
                    id: course_id,
                });
            }
            Ok(())
        })
    }

    async fn find_link(&self, key: &ReconcileKey) -> Result<Option<i64>, StoreError> {
        self.with_db(|db| {
            let local_id = db
                .query_row(
                    "SELECT local_id FROM sync_links
                     WHERE school_id = ?1 AND system = ?2 AND kind = ?3 AND remote_key = ?4",
                    (&key.school_id, &key.system, key.kind.as_str(), &key.remote_key),
                    |row| row.get(0),
                )
                .optional()?;
            Ok(local_id)
        })
    }

    async fn save_link(&self, key: &ReconcileKey, local_id: i64) -> Result<(), StoreError> {
        self.with_db(|db| {
            db.execute(
                "INSERT OR REPLACE INTO sync_links
                    (school_id, system, kind, remote_key, local_id, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, datetime('now'))",
                (
                    &key.school_id,
                    &key.system,
                    key.kind.as_str(),
                    &key.remote_key,
                    local_id,
                ),
            )?;
            Ok(())
        })
    }
}

fn class_from_row(row: &Row<'_>) -> rusqlite::Result<LocalClass> {
    Ok(LocalClass {
        class_id: row.get(0)?,
        school_id: row.get(1)?,
        name: row.get(2)?,
        name_format: row.get(3)?,
        year: row.get(4)?,
    })
}

/// Raw course columns before JSON decoding and class lookup
struct CourseColumns {
    course_id: i64,
    school_id: String,
    name: String,
    teacher_ids: String,
    times: String,
    updated_at: Option<NaiveDateTime>,
}

fn course_columns(row: &Row<'_>) -> rusqlite::Result<CourseColumns> {
    Ok(CourseColumns {
        course_id: row.get(0)?,
        school_id: row.get(1)?,
        name: row.get(2)?,
        teacher_ids: row.get(3)?,
        times: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

fn load_course(db: &Connection, columns: CourseColumns) -> Result<LocalCourse, StoreError> {
    let mut stmt =
        db.prepare("SELECT class_id FROM course_classes WHERE course_id = ? ORDER BY class_id")?;
    let class_ids = stmt
        .query_map([columns.course_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<i64>>>()?;

    Ok(LocalCourse {
        course_id: columns.course_id,
        school_id: columns.school_id,
        name: columns.name,
        class_ids,
        teacher_ids: serde_json::from_str(&columns.teacher_ids)?,
        times: serde_json::from_str(&columns.times)?,
        updated_at: columns.updated_at,
    })
}
