use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::error::LedgerError;

pub const MIN_SCORE: i16 = 1;
pub const MAX_SCORE: i16 = 5;

/// Одна строка на (trip, rater, rated_user). Не меняется и не удаляется.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Rating {
    pub id: i64,
    pub trip_id: i64,
    pub rater_id: i64,
    pub rated_user_id: i64,
    pub score: i16,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewRating {
    pub trip_id: i64,
    pub rater_id: i64,
    pub rated_user_id: i64,
    pub score: i16,
    pub comment: Option<String>,
}

impl NewRating {
    pub fn validate(&self) -> Result<(), LedgerError> {
        if !(MIN_SCORE..=MAX_SCORE).contains(&self.score) {
            return Err(LedgerError::InvalidRequest(format!(
                "score must be between {} and {}, got {}",
                MIN_SCORE, MAX_SCORE, self.score
            )));
        }
        if self.rater_id == self.rated_user_id {
            return Err(LedgerError::InvalidRequest(
                "users cannot rate themselves".to_string(),
            ));
        }
        Ok(())
    }
}

/// Агрегат, который хранится в строке оцененного пользователя.
#[derive(Debug, Clone, Copy, PartialEq, FromRow, Serialize, Deserialize)]
pub struct RatingSummary {
    pub rating_count: i32,
    pub average_rating: f64,
}

impl RatingSummary {
    pub fn from_scores<I>(scores: I) -> Self
    where
        I: IntoIterator<Item = i16>,
    {
        let (count, sum) = scores
            .into_iter()
            .fold((0i32, 0i64), |(c, s), score| (c + 1, s + i64::from(score)));
        let average_rating = if count == 0 {
            0.0
        } else {
            sum as f64 / f64::from(count)
        };
        Self {
            rating_count: count,
            average_rating,
        }
    }
}
