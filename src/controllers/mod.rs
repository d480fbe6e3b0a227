pub mod bookings;
pub mod ratings;
pub mod trips;
pub mod users;

use axum::{http::StatusCode, Router};
use std::sync::Arc;
use validator::Validate;

use crate::error::LedgerError;

pub fn routes() -> Router<Arc<crate::AppState>> {
    Router::new()
        .merge(users::routes())
        .merge(trips::routes())
        .merge(bookings::routes())
        .merge(ratings::routes())
}

/* ---------- helpers ---------- */

type ApiError = (StatusCode, String);

// Бизнес-ошибки отдаем текстом, инфраструктурные - общим "попробуйте позже"
pub(crate) fn ledger_error(err: LedgerError) -> ApiError {
    let status = match &err {
        LedgerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        LedgerError::NotFound { .. } => StatusCode::NOT_FOUND,
        LedgerError::Forbidden(_) | LedgerError::NotTripParticipant { .. } => {
            StatusCode::FORBIDDEN
        }
        LedgerError::InsufficientSeats { .. }
        | LedgerError::TripNotBookable { .. }
        | LedgerError::BookingAlreadyCanceled { .. }
        | LedgerError::TripNotRateable { .. }
        | LedgerError::AlreadyRated
        | LedgerError::VehicleConflict { .. }
        | LedgerError::InvalidTransition { .. }
        | LedgerError::AlreadyExists(_) => StatusCode::CONFLICT,
        LedgerError::StoreUnavailable(_) | LedgerError::Timeout => {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                "Service is busy, please try again".to_string(),
            );
        }
        LedgerError::CommitOutcomeUnknown(_) => {
            tracing::error!("commit outcome unknown: {}", err);
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                "Operation result is unknown, check your bookings before retrying".to_string(),
            );
        }
        LedgerError::Internal(_) => {
            tracing::error!("internal ledger error: {}", err);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal error".to_string(),
            );
        }
    };
    (status, err.to_string())
}

pub(crate) fn validate<T: Validate>(req: &T) -> Result<(), ApiError> {
    req.validate()
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))
}
