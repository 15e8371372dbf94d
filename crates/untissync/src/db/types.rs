/// Database types for synced classes and courses
use chrono::{NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalClass {
    pub class_id: i64,
    pub school_id: String,
    pub name: String,
    pub name_format: String,
    pub year: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewClass {
    pub school_id: String,
    pub name: String,
    pub name_format: String,
    pub year: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalCourse {
    pub course_id: i64,
    pub school_id: String,
    pub name: String,
    pub class_ids: Vec<i64>,
    pub teacher_ids: Vec<String>,
    pub times: Vec<CourseTime>,
    pub updated_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone)]
pub struct NewCourse {
    pub school_id: String,
    pub name: String,
    pub class_ids: Vec<i64>,
    pub teacher_ids: Vec<String>,
}

/// Lookup for courses: exact name, containing `class_id`, within `school_id`
#[derive(Debug, Clone)]
pub struct CourseQuery {
    pub name: String,
    pub class_id: i64,
    pub school_id: String,
}

/// A weekly recurring slot attached to a course
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseTime {
    pub weekday: Weekday,
    pub start_time: NaiveTime,
    /// Minutes
    pub duration: u32,
    /// Reserved for linking a calendar event; never set by the sync
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    pub room: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkKind {
    Class,
    Course,
}

impl LinkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkKind::Class => "class",
            LinkKind::Course => "course",
        }
    }
}

/// Maps a remote entity of one WebUntis system to a local record
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReconcileKey {
    pub school_id: String,
    pub system: String,
    pub kind: LinkKind,
    pub remote_key: String,
}

impl ReconcileKey {
    pub fn class(school_id: &str, system: &str, remote_class_id: i64) -> Self {
        Self {
            school_id: school_id.to_string(),
            system: system.to_string(),
            kind: LinkKind::Class,
            remote_key: remote_class_id.to_string(),
        }
    }

    pub fn course(school_id: &str, system: &str, remote_class_id: i64, subject: &str) -> Self {
        Self {
            school_id: school_id.to_string(),
            system: system.to_string(),
            kind: LinkKind::Course,
            remote_key: format!("{remote_class_id}/{subject}"),
        }
    }
}

impl fmt::Display for ReconcileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.school_id,
            self.system,
            self.kind.as_str(),
            self.remote_key
        )
    }
}
