use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::error::ReserveError;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/seats", get(get_state))
        .route("/seats/select", patch(select_seat))
        .route("/seats/watch", patch(watch_selected))
        .route("/bookings", post(book_seat))
        .route("/stats", get(get_stats))
}

/* ---------- helpers ---------- */

// One failure, one user-visible response body
fn error_response(err: ReserveError) -> (StatusCode, String) {
    let status = match &err {
        ReserveError::Unauthenticated => StatusCode::UNAUTHORIZED,
        ReserveError::NotSelected => StatusCode::BAD_REQUEST,
        ReserveError::AlreadyOccupied(_) | ReserveError::BookingFailed(_) => StatusCode::CONFLICT,
        ReserveError::Sync(_) => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, err.to_string())
}

/* ---------- SEATS ---------- */

// GET /api/seats
async fn get_state(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let view = state.reconciler.lock().await.snapshot();
    (StatusCode::OK, Json(view))
}

// GET /api/stats
async fn get_stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.reconciler.lock().await.stats();
    (StatusCode::OK, Json(stats))
}

// PATCH /api/seats/select
#[derive(Debug, Deserialize)]
struct SelectSeatRequest {
    seat_id: String,
}

async fn select_seat(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SelectSeatRequest>,
) -> impl IntoResponse {
    let mut reconciler = state.reconciler.lock().await;
    reconciler.select_seat(&req.seat_id);
    let selected = reconciler.selected_seat().cloned();
    (StatusCode::OK, Json(json!({ "selected_seat": selected })))
}

// PATCH /api/seats/watch
async fn watch_selected(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let outcome = state
        .reconciler
        .lock()
        .await
        .watch_selected()
        .map_err(error_response)?;
    Ok((StatusCode::OK, Json(json!({ "outcome": outcome }))))
}

/* ---------- BOOKINGS ---------- */

// POST /api/bookings
#[derive(Debug, Deserialize)]
struct BookRequest {
    #[serde(rename = "durationMinutes")]
    duration_minutes: u32,
}

async fn book_seat(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BookRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    if req.duration_minutes == 0 {
        return Err((
            StatusCode::BAD_REQUEST,
            "durationMinutes must be > 0".to_string(),
        ));
    }

    let confirmed = state
        .reconciler
        .lock()
        .await
        .book(req.duration_minutes)
        .await
        .map_err(error_response)?;

    Ok((StatusCode::CREATED, Json(confirmed)))
}
