use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use crate::server::endpoints::{schools, status, sync};
use crate::types::AppState;

mod endpoints;
mod types;

pub use types::ApiErrorType;

/// Creates a router that can be used by `axum`.
///
/// # Parameters
/// - `app_state`: The app server state.
///
/// # Returns
/// The router.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let sync_router = Router::new()
        .route("/sync", post(sync::post_sync_all))
        .route("/sync/:school_id", post(sync::post_sync_school))
        .route("/sync/:school_id/last", get(sync::get_last_report));

    let school_router = Router::new()
        .route("/schools/:school_id/classes", get(schools::get_classes))
        .route("/schools/:school_id/courses", get(schools::get_courses));

    Router::new()
        .route("/health", get(status::get_health))
        .merge(sync_router)
        .merge(school_router)
        .with_state(app_state)
}
