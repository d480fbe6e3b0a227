use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use validator::Validate;

use super::{ledger_error, validate};
use crate::middleware::Caller;
use crate::models::{NewTrip, TripSearch, TripStatus};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/trips", post(create_trip).get(search_trips))
        .route("/trips/mine", get(my_trips))
        .route("/trips/{id}", get(get_trip))
        .route("/trips/{id}/status", patch(transition_status))
        .route("/trips/{id}/bookings", get(trip_bookings))
        .route("/vehicles/{id}/conflicts", get(vehicle_conflicts))
}

/* ---------- TRIPS ---------- */

// POST /api/trips
#[derive(Debug, Deserialize, Validate)]
struct CreateTripRequest {
    vehicle_id: i64,
    #[validate(length(min = 1, max = 100))]
    departure_location: String,
    #[validate(length(min = 1, max = 100))]
    destination_location: String,
    departure_time: DateTime<Utc>,
    #[validate(range(min = 1))]
    seats: i32,
    price: Decimal,
}

async fn create_trip(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Json(req): Json<CreateTripRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    validate(&req)?;
    let trip = state
        .ledger
        .create_trip(
            caller.user_id,
            NewTrip {
                vehicle_id: req.vehicle_id,
                departure_location: req.departure_location,
                destination_location: req.destination_location,
                departure_time: req.departure_time,
                seats: req.seats,
                price: req.price,
            },
        )
        .await
        .map_err(ledger_error)?;
    Ok((StatusCode::CREATED, Json(trip)))
}

// GET /api/trips?from=&to=&date=
#[derive(Debug, Deserialize)]
struct SearchQuery {
    from: Option<String>,
    to: Option<String>,
    date: Option<NaiveDate>,
}

async fn search_trips(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let trips = state
        .ledger
        .search_trips(TripSearch {
            departure_location: params.from.filter(|s| !s.trim().is_empty()),
            destination_location: params.to.filter(|s| !s.trim().is_empty()),
            date: params.date,
        })
        .await
        .map_err(ledger_error)?;
    Ok(Json(trips))
}

// GET /api/trips/mine
async fn my_trips(
    State(state): State<Arc<AppState>>,
    caller: Caller,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let trips = state
        .ledger
        .driver_trips(caller.user_id)
        .await
        .map_err(ledger_error)?;
    Ok(Json(trips))
}

async fn get_trip(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let trip = state.ledger.trip(id).await.map_err(ledger_error)?;
    Ok(Json(trip))
}

// PATCH /api/trips/{id}/status
#[derive(Debug, Deserialize)]
struct TransitionRequest {
    status: TripStatus,
}

async fn transition_status(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<i64>,
    Json(req): Json<TransitionRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let trip = state
        .ledger
        .transition_trip_status(caller.actor(), id, req.status)
        .await
        .map_err(ledger_error)?;
    Ok(Json(trip))
}

// GET /api/trips/{id}/bookings - только водителю поездки или оператору
async fn trip_bookings(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let trip = state.ledger.trip(id).await.map_err(ledger_error)?;
    caller.actor().authorize(&trip).map_err(ledger_error)?;
    let bookings = state.ledger.trip_bookings(id).await.map_err(ledger_error)?;
    Ok(Json(bookings))
}

/* ---------- CONFLICTS ---------- */

// GET /api/vehicles/{id}/conflicts?departure=2025-01-01T18:00:00Z&window_hours=2
#[derive(Debug, Deserialize)]
struct ConflictQuery {
    departure: DateTime<Utc>,
    window_hours: Option<i64>,
}

async fn vehicle_conflicts(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Query(params): Query<ConflictQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let window = conflict_window(params.window_hours)?;
    let conflict = state
        .ledger
        .check_vehicle_conflict(id, params.departure, window)
        .await
        .map_err(ledger_error)?;
    Ok(Json(serde_json::json!({ "conflict": conflict })))
}

// Часы из query-строки: вне диапазона TimeDelta - 400, а не паника
fn conflict_window(
    hours: Option<i64>,
) -> Result<Option<chrono::Duration>, (StatusCode, String)> {
    hours
        .map(|hours| {
            chrono::Duration::try_hours(hours).ok_or((
                StatusCode::BAD_REQUEST,
                "window_hours is out of range".to_string(),
            ))
        })
        .transpose()
}
