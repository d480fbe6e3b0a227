use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use validator::Validate;

use super::{ledger_error, validate};
use crate::middleware::Caller;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/bookings", get(get_user_bookings).post(create_booking))
        .route("/bookings/cancel", patch(cancel_booking))
}

/* ---------- BOOKINGS ---------- */

// POST /api/bookings
#[derive(Debug, Deserialize, Validate)]
struct CreateBookingRequest {
    #[validate(range(min = 1))]
    trip_id: i64,
    #[validate(range(min = 1))]
    seats: i32,
}

async fn create_booking(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Json(req): Json<CreateBookingRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    validate(&req)?;
    let booking = state
        .ledger
        .book(caller.user_id, req.trip_id, req.seats)
        .await
        .map_err(ledger_error)?;
    Ok((StatusCode::CREATED, Json(booking)))
}

// GET /api/bookings
async fn get_user_bookings(
    State(state): State<Arc<AppState>>,
    caller: Caller,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let bookings = state
        .ledger
        .passenger_bookings(caller.user_id)
        .await
        .map_err(ledger_error)?;
    Ok(Json(bookings))
}

// PATCH /api/bookings/cancel
#[derive(Debug, Deserialize, Validate)]
struct CancelBookingRequest {
    #[validate(range(min = 1))]
    booking_id: i64,
}

async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Json(req): Json<CancelBookingRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    validate(&req)?;
    let booking = state
        .ledger
        .cancel_booking(caller.user_id, req.booking_id)
        .await
        .map_err(ledger_error)?;
    Ok(Json(booking))
}
