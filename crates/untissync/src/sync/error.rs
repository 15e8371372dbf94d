//! Error types for the school-year sync.

use crate::db::StoreError;
use crate::webuntis::WebUntisError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    /// Login or fetching from WebUntis failed
    #[error("WebUntis unavailable for school {school}: {source}")]
    UpstreamUnavailable {
        school: String,
        #[source]
        source: WebUntisError,
    },

    /// The school has no WebUntis system configured
    #[error("No WebUntis configuration for school {school}")]
    NoConfiguration { school: String },

    /// Another sync of the same school is still running
    #[error("Sync already in progress for school {school}")]
    AlreadyRunning { school: String },

    #[error("Unknown school {school_id}")]
    UnknownSchool { school_id: String },

    /// Reading or writing local classes/courses failed
    #[error("Persistence failure: {0}")]
    Persistence(#[from] StoreError),
}
