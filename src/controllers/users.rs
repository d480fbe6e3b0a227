use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use validator::Validate;

use super::{ledger_error, validate};
use crate::middleware::Caller;
use crate::models::{NewUser, NewVehicle, UserRole, VerificationStatus};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/users", post(register_user))
        .route("/users/{id}", get(get_user))
        .route("/users/{id}/verification", patch(set_verification))
        .route("/vehicles", post(register_vehicle))
}

// POST /api/users
#[derive(Debug, Deserialize, Validate)]
struct RegisterUserRequest {
    telegram_id: i64,
    #[validate(length(min = 1, max = 255))]
    name: String,
    #[validate(length(max = 20))]
    phone_number: Option<String>,
    role: Option<UserRole>,
}

async fn register_user(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterUserRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    validate(&req)?;
    let user = state
        .ledger
        .register_user(NewUser {
            telegram_id: req.telegram_id,
            name: req.name,
            phone_number: req.phone_number,
            role: req.role,
        })
        .await
        .map_err(ledger_error)?;
    Ok((StatusCode::CREATED, Json(user)))
}

// GET /api/users/{id} - в том числе average_rating / rating_count
async fn get_user(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let user = state.ledger.user(id).await.map_err(ledger_error)?;
    Ok(Json(user))
}

// PATCH /api/users/{id}/verification - только оператор
#[derive(Debug, Deserialize)]
struct VerificationRequest {
    status: VerificationStatus,
}

async fn set_verification(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<i64>,
    Json(req): Json<VerificationRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let user = state
        .ledger
        .set_verification_status(caller.actor(), id, req.status)
        .await
        .map_err(ledger_error)?;
    Ok(Json(user))
}

// POST /api/vehicles
#[derive(Debug, Deserialize, Validate)]
struct RegisterVehicleRequest {
    #[validate(length(min = 1, max = 50))]
    brand: String,
    #[validate(length(min = 1, max = 50))]
    model: String,
    #[validate(length(min = 1, max = 20))]
    license_plate: String,
    #[validate(range(min = 1))]
    seat_capacity: i32,
}

async fn register_vehicle(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Json(req): Json<RegisterVehicleRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    validate(&req)?;
    let vehicle = state
        .ledger
        .register_vehicle(NewVehicle {
            driver_id: caller.user_id,
            brand: req.brand,
            model: req.model,
            license_plate: req.license_plate,
            seat_capacity: req.seat_capacity,
        })
        .await
        .map_err(ledger_error)?;
    Ok((StatusCode::CREATED, Json(vehicle)))
}
