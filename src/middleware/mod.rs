use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
};
use std::sync::Arc;

use crate::models::Actor;

/// Заголовок с id пользователя; выставляется слоем идентификации перед ядром.
pub const USER_ID_HEADER: &str = "x-user-id";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";

#[derive(Debug, Clone, Copy)]
pub struct Caller {
    pub user_id: i64,
    pub is_operator: bool,
}

impl Caller {
    pub fn actor(&self) -> Actor {
        if self.is_operator {
            Actor::Operator
        } else {
            Actor::Driver(self.user_id)
        }
    }
}

impl FromRequestParts<Arc<crate::AppState>> for Caller {
    type Rejection = (StatusCode, String);

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &Arc<crate::AppState>,
    ) -> Result<Self, Self::Rejection> {
        // Пользователь уже аутентифицирован выше по цепочке, здесь только разбор id
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<i64>().ok())
            .filter(|id| *id > 0)
            .ok_or((StatusCode::UNAUTHORIZED, "missing or invalid X-User-Id".to_string()))?;

        let is_operator = parts
            .headers
            .get(ACTOR_ROLE_HEADER)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|role| role.eq_ignore_ascii_case("operator"));

        Ok(Caller { user_id, is_operator })
    }
}
