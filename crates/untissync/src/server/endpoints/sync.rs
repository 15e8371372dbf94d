//! Endpoints that trigger school-year syncs and expose their reports.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::server::types::ApiErrorType;
use crate::sync::SyncError;
use crate::types::AppState;

/// Converts SyncError to API response.
fn sync_error_to_response(error: SyncError) -> Response {
    let (status, message) = match &error {
        SyncError::UnknownSchool { .. } => (StatusCode::NOT_FOUND, "Unknown school"),
        SyncError::NoConfiguration { .. } => (
            StatusCode::UNPROCESSABLE_ENTITY,
            "No WebUntis configuration for this school",
        ),
        SyncError::AlreadyRunning { .. } => (
            StatusCode::CONFLICT,
            "A sync for this school is already running",
        ),
        SyncError::UpstreamUnavailable { .. } => {
            (StatusCode::BAD_GATEWAY, "WebUntis is unavailable")
        }
        SyncError::Persistence(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to store classes or courses",
        ),
    };

    ApiErrorType::from((status, message, Some(error.to_string()))).into_response()
}

/// POST /sync
///
/// Syncs all configured schools. Always answers 200; failed schools carry
/// `success: false` in their report.
pub async fn post_sync_all(State(s): State<Arc<AppState>>) -> Response {
    info!("POST /sync - syncing {} school(s)", s.config.schools.len());

    let reports = s.sync_all().await;
    (StatusCode::OK, Json(reports)).into_response()
}

/// POST /sync/:school_id
pub async fn post_sync_school(
    Path(school_id): Path<String>,
    State(s): State<Arc<AppState>>,
) -> Response {
    info!("POST /sync/{}", school_id);

    match s.sync_school(&school_id).await {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(e) => {
            match &e {
                SyncError::UnknownSchool { .. } | SyncError::AlreadyRunning { .. } => {
                    warn!("Sync of {} rejected: {}", school_id, e)
                }
                _ => error!("Sync of {} failed: {}", school_id, e),
            }
            sync_error_to_response(e)
        }
    }
}

/// GET /sync/:school_id/last
pub async fn get_last_report(
    Path(school_id): Path<String>,
    State(s): State<Arc<AppState>>,
) -> Response {
    match s.last_report(&school_id) {
        Some(report) => (StatusCode::OK, Json(report)).into_response(),
        None => ApiErrorType::from((
            StatusCode::NOT_FOUND,
            "No sync report for this school",
            None,
        ))
        .into_response(),
    }
}
