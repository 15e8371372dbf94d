//! WebUntis access: JSON-RPC client and the source traits the sync job consumes.

mod client;
mod error;
mod types;

pub use client::{SessionKey, WebUntisClient, WebUntisSession};
pub use error::WebUntisError;
pub use types::*;

use crate::config::WebUntisSystem;
use async_trait::async_trait;

/// Date window of a timetable query, as `yyyymmdd` integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimetableRange {
    pub start_date: u32,
    pub end_date: u32,
}

/// An authenticated session against a timetable system.
#[async_trait]
pub trait TimetableSource: Send + Sync {
    async fn current_schoolyear(&self) -> Result<Schoolyear, WebUntisError>;

    async fn timegrid(&self) -> Result<Vec<TimegridDay>, WebUntisError>;

    async fn classes(&self, schoolyear_id: i64) -> Result<Vec<Klasse>, WebUntisError>;

    async fn rooms(&self) -> Result<Vec<Room>, WebUntisError>;

    /// Fetches the base timetable of one room for the given window.
    async fn room_timetable(
        &self,
        room_id: i64,
        range: TimetableRange,
    ) -> Result<Vec<TimetablePeriod>, WebUntisError>;

    async fn logout(&self) -> Result<(), WebUntisError>;
}

/// Opens sessions against configured timetable systems.
#[async_trait]
pub trait TimetableConnector: Send + Sync {
    type Session: TimetableSource;

    async fn login(&self, system: &WebUntisSystem) -> Result<Self::Session, WebUntisError>;
}
