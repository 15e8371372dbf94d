/// Remote school-year data, normalized from the WebUntis wire types
use crate::webuntis::{Room, TimetablePeriod, TimetableRange};
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use super::times::format_date;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchoolYear {
    pub id: i64,
    pub name: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl SchoolYear {
    /// The school year window as a timetable query range.
    pub fn range(&self) -> TimetableRange {
        TimetableRange {
            start_date: format_date(self.start),
            end_date: format_date(self.end),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteClass {
    pub id: i64,
    pub name: String,
    /// Filled while room schedules are distributed
    pub timetable: Vec<RemoteTimetableEntry>,
}

impl RemoteClass {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            timetable: Vec::new(),
        }
    }
}

/// One occurrence of one lesson on one date
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteTimetableEntry {
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub teacher: String,
    pub subject: String,
    pub room: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRoom {
    pub id: i64,
    /// Display name, e.g. `101 (Room, Bldg)`
    pub name: String,
}

impl RemoteRoom {
    pub fn from_room(room: &Room) -> Self {
        let name = if room.building.is_empty() {
            format!("{} ({})", room.name, room.long_name)
        } else {
            format!("{} ({}, {})", room.name, room.long_name, room.building)
        };
        Self { id: room.id, name }
    }
}

/// The raw timetable of one room for the school year
#[derive(Debug, Clone)]
pub struct RoomSchedule {
    pub room_id: i64,
    pub periods: Vec<TimetablePeriod>,
}

/// Everything fetched from one WebUntis system for one school year
#[derive(Debug, Clone)]
pub struct SchoolyearFeed {
    pub school_year: SchoolYear,
    pub classes: Vec<RemoteClass>,
    pub rooms: Vec<RemoteRoom>,
    pub room_schedules: Vec<RoomSchedule>,
}
