use tracing::{error, info};

use super::{with_retry, Ledger, LedgerEvent};
use crate::error::{LedgerError, LedgerResult};
use crate::models::{NewRating, Rating, User};

impl Ledger {
    /// Записывает оценку `score` от `rater_id` для `rated_user_id` за поездку.
    ///
    /// Повторный вызов для той же тройки возвращает `AlreadyRated` и ничего
    /// не пересчитывает. Среднее и количество всегда пересчитываются по всем
    /// оценкам пользователя под блокировкой его строки.
    pub async fn rate(
        &self,
        rater_id: i64,
        rated_user_id: i64,
        trip_id: i64,
        score: i16,
        comment: Option<String>,
    ) -> LedgerResult<Rating> {
        let rating = NewRating {
            trip_id,
            rater_id,
            rated_user_id,
            score,
            comment: comment.filter(|c| !c.trim().is_empty()),
        };
        rating.validate()?;

        let result = with_retry(&self.retry, "rate", || {
            self.store.record_rating(rating.clone())
        })
        .await;

        let (rating, summary) = match result {
            Ok(ok) => ok,
            // Повторная оценка - штатная ситуация, не сбой
            Err(LedgerError::AlreadyRated) => {
                info!(rater_id, rated_user_id, trip_id, "rating already recorded");
                return Err(LedgerError::AlreadyRated);
            }
            Err(e) => {
                if !e.is_business() {
                    error!(rater_id, rated_user_id, trip_id, error = %e, "rating failed");
                }
                return Err(e);
            }
        };

        info!(
            rating_id = rating.id,
            rated_user_id,
            score,
            average_rating = summary.average_rating,
            rating_count = summary.rating_count,
            "rating recorded"
        );
        self.notify(
            vec![rated_user_id],
            LedgerEvent::rating_recorded(&rating, summary.average_rating, summary.rating_count),
        )
        .await;

        Ok(rating)
    }

    pub async fn user(&self, user_id: i64) -> LedgerResult<User> {
        with_retry(&self.retry, "get_user", || self.store.get_user(user_id)).await
    }
}
