use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tracing::info;

use crate::server::types::ApiErrorType;
use crate::types::AppState;

/// GET /schools/:school_id/classes
pub async fn get_classes(
    Path(school_id): Path<String>,
    State(s): State<Arc<AppState>>,
) -> Response {
    info!("GET /schools/{}/classes", school_id);

    match s.syncer.store().list_classes(&school_id) {
        Ok(classes) => (StatusCode::OK, Json(classes)).into_response(),
        Err(e) => ApiErrorType::from((
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to fetch classes",
            Some(e.to_string()),
        ))
        .into_response(),
    }
}

/// GET /schools/:school_id/courses
/// Returns the school's courses with their class ids and weekly times
pub async fn get_courses(
    Path(school_id): Path<String>,
    State(s): State<Arc<AppState>>,
) -> Response {
    info!("GET /schools/{}/courses", school_id);

    match s.syncer.store().list_courses(&school_id) {
        Ok(courses) => (StatusCode::OK, Json(courses)).into_response(),
        Err(e) => ApiErrorType::from((
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to fetch courses",
            Some(e.to_string()),
        ))
        .into_response(),
    }
}
