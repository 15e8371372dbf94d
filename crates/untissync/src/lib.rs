//! Synchronizes WebUntis school-year timetables into local classes and
//! courses with deduplicated weekly schedules.

pub mod config;
pub mod db;
pub mod scheduler;
pub mod server;
pub mod sync;
pub mod types;
pub mod webuntis;
