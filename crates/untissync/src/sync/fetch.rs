//! Fetching a school year from a timetable source and distributing the
//! per-room schedules onto the classes they belong to.

use super::stats::DropCounts;
use super::times::{parse_date, parse_time};
use super::types::*;
use crate::webuntis::{TimetablePeriod, TimetableSource, WebUntisError};
use std::collections::HashMap;
use tracing::{debug, info};

/// Why a room-schedule entry was not attributed to any class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Not exactly one room, or the room is not the queried one
    RoomMismatch,
    NoClass,
    /// Not exactly one teacher
    TeacherCount,
    /// Not exactly one subject
    SubjectCount,
    /// Date or time is not a valid calendar value
    Malformed,
}

/// Checks that an entry can be attributed unambiguously.
///
/// Requires exactly one room equal to `room_id`, at least one class, exactly
/// one teacher and exactly one subject.
pub fn check_attribution(period: &TimetablePeriod, room_id: i64) -> Result<(), DropReason> {
    if period.ro.len() != 1 || period.ro[0].id != room_id {
        return Err(DropReason::RoomMismatch);
    }
    if period.kl.is_empty() {
        return Err(DropReason::NoClass);
    }
    if period.te.len() != 1 {
        return Err(DropReason::TeacherCount);
    }
    if period.su.len() != 1 {
        return Err(DropReason::SubjectCount);
    }
    Ok(())
}

/// Builds the class-independent timetable entry of a qualifying period.
pub fn to_entry(
    period: &TimetablePeriod,
    room: &RemoteRoom,
) -> Result<RemoteTimetableEntry, DropReason> {
    check_attribution(period, room.id)?;

    let date = parse_date(period.date).ok_or(DropReason::Malformed)?;
    let start_time = parse_time(period.start_time).ok_or(DropReason::Malformed)?;
    let end_time = parse_time(period.end_time).ok_or(DropReason::Malformed)?;

    Ok(RemoteTimetableEntry {
        date,
        start_time,
        end_time,
        teacher: period.te[0].long_name().to_string(),
        subject: period.su[0].long_name().to_string(),
        room: room.name.clone(),
    })
}

/// Appends every qualifying period of a room to the timetables of the
/// classes it references.
///
/// Classes not present in `classes` are skipped silently.
pub fn distribute_room_schedule(
    classes: &mut [RemoteClass],
    room: &RemoteRoom,
    periods: &[TimetablePeriod],
    dropped: &mut DropCounts,
) {
    let index: HashMap<i64, usize> = classes
        .iter()
        .enumerate()
        .map(|(i, class)| (class.id, i))
        .collect();

    for period in periods {
        let entry = match to_entry(period, room) {
            Ok(entry) => entry,
            Err(reason) => {
                dropped.record(reason);
                continue;
            }
        };

        for class_ref in &period.kl {
            if let Some(&i) = index.get(&class_ref.id) {
                classes[i].timetable.push(entry.clone());
            }
        }
    }
}

/// Fetches school year, time grid, classes, rooms and every room's timetable.
///
/// Any failing call aborts the whole fetch.
pub async fn fetch_schoolyear<S>(source: &S) -> Result<SchoolyearFeed, WebUntisError>
where
    S: TimetableSource + ?Sized,
{
    let raw_year = source.current_schoolyear().await?;
    let school_year = SchoolYear {
        id: raw_year.id,
        start: parse_date(raw_year.start_date)
            .ok_or_else(|| invalid_date("startDate", raw_year.start_date))?,
        end: parse_date(raw_year.end_date)
            .ok_or_else(|| invalid_date("endDate", raw_year.end_date))?,
        name: raw_year.name,
    };
    info!(
        school_year = %school_year.name,
        start = %school_year.start,
        end = %school_year.end,
        "Fetched current school year"
    );

    // The grid is not reconciled, only checked for availability
    let grid_days = source.timegrid().await?.len();
    debug!(days = grid_days, "Fetched time grid");

    let classes: Vec<RemoteClass> = source
        .classes(school_year.id)
        .await?
        .into_iter()
        .map(|klasse| RemoteClass::new(klasse.id, klasse.long_name))
        .collect();

    let rooms: Vec<RemoteRoom> = source
        .rooms()
        .await?
        .iter()
        .map(RemoteRoom::from_room)
        .collect();

    info!(
        classes = classes.len(),
        rooms = rooms.len(),
        "Fetched classes and rooms"
    );

    let range = school_year.range();
    let mut room_schedules = Vec::with_capacity(rooms.len());
    for room in &rooms {
        let periods = source.room_timetable(room.id, range).await?;
        debug!(room = %room.name, periods = periods.len(), "Fetched room timetable");
        room_schedules.push(RoomSchedule {
            room_id: room.id,
            periods,
        });
    }

    Ok(SchoolyearFeed {
        school_year,
        classes,
        rooms,
        room_schedules,
    })
}

fn invalid_date(field: &str, value: u32) -> WebUntisError {
    WebUntisError::UnexpectedResponse {
        message: format!("school year has invalid {field} {value}"),
    }
}
