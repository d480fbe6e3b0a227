use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use validator::Validate;

use super::{ledger_error, validate};
use crate::error::LedgerError;
use crate::middleware::Caller;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/ratings", post(rate_user))
}

// POST /api/ratings
#[derive(Debug, Deserialize, Validate)]
struct RateRequest {
    trip_id: i64,
    rated_user_id: i64,
    #[validate(range(min = 1, max = 5))]
    score: i16,
    #[validate(length(max = 1000))]
    comment: Option<String>,
}

async fn rate_user(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Json(req): Json<RateRequest>,
) -> Result<Response, (StatusCode, String)> {
    validate(&req)?;
    match state
        .ledger
        .rate(caller.user_id, req.rated_user_id, req.trip_id, req.score, req.comment)
        .await
    {
        Ok(rating) => Ok((StatusCode::CREATED, Json(rating)).into_response()),
        // Повторная оценка - не ошибка для пользователя, просто информируем
        Err(LedgerError::AlreadyRated) => Ok((
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "already_rated",
                "message": "You have already rated this user for this trip"
            })),
        )
            .into_response()),
        Err(e) => Err(ledger_error(e)),
    }
}
