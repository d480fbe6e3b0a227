use thiserror::Error;

use crate::models::{BookingStatus, TripStatus};

/// Все ошибки леджера. Бизнес-варианты - штатные отказы, которые показываются
/// пользователю текстом; `StoreUnavailable`, `Timeout`, `CommitOutcomeUnknown`
/// и `Internal` - сбои инфраструктуры.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("insufficient seats: {available} available")]
    InsufficientSeats { available: i32 },

    #[error("trip is not bookable (status {status})")]
    TripNotBookable { status: TripStatus },

    #[error("booking is already {status}")]
    BookingAlreadyCanceled { status: BookingStatus },

    #[error("trip cannot be rated yet (status {status})")]
    TripNotRateable { status: TripStatus },

    #[error("user {user_id} did not take part in trip {trip_id}")]
    NotTripParticipant { trip_id: i64, user_id: i64 },

    #[error("rating already recorded")]
    AlreadyRated,

    #[error("vehicle already has an active trip {trip_id} inside the conflict window")]
    VehicleConflict { trip_id: i64 },

    #[error("illegal status transition {from} -> {to}")]
    InvalidTransition { from: TripStatus, to: TripStatus },

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("timed out waiting for a row lock")]
    Timeout,

    /// Соединение оборвалось на COMMIT: транзакция могла и примениться.
    /// Не повторяется автоматически, иначе возможна двойная бронь.
    #[error("commit outcome unknown: {0}")]
    CommitOutcomeUnknown(String),

    #[error("internal store error: {0}")]
    Internal(String),
}

impl LedgerError {
    /// Сбои, после которых безопасно повторить транзакцию целиком.
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::StoreUnavailable(_) | LedgerError::Timeout)
    }

    pub fn is_business(&self) -> bool {
        !self.is_transient()
            && !matches!(
                self,
                LedgerError::Internal(_) | LedgerError::CommitOutcomeUnknown(_)
            )
    }

    /// Ошибка из `COMMIT`. Ответ сервера означает откат транзакции, и такую
    /// ошибку классифицируем как обычно. Обрыв соединения оставляет исход неизвестным.
    pub fn from_commit(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(_) => err.into(),
            other => LedgerError::CommitOutcomeUnknown(other.to_string()),
        }
    }

    pub fn not_found(entity: &'static str, id: i64) -> Self {
        LedgerError::NotFound { entity, id }
    }
}

// lock_not_available, query_canceled (таймаут блокировки/запроса)
const TIMEOUT_CODES: &[&str] = &["55P03", "57014"];
// serialization_failure, deadlock_detected
const RETRYABLE_CODES: &[&str] = &["40001", "40P01"];

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => LedgerError::Timeout,
            sqlx::Error::PoolClosed | sqlx::Error::Io(_) | sqlx::Error::Tls(_) => {
                LedgerError::StoreUnavailable(err.to_string())
            }
            sqlx::Error::RowNotFound => LedgerError::Internal("row not found".to_string()),
            sqlx::Error::Database(ref db) => {
                let code = db.code();
                let code = code.as_deref().unwrap_or_default();
                if TIMEOUT_CODES.contains(&code) {
                    LedgerError::Timeout
                } else if RETRYABLE_CODES.contains(&code) {
                    LedgerError::StoreUnavailable(db.message().to_string())
                } else if db.is_unique_violation() {
                    LedgerError::AlreadyExists(
                        db.constraint().unwrap_or("unique constraint").to_string(),
                    )
                } else {
                    LedgerError::Internal(db.message().to_string())
                }
            }
            other => LedgerError::Internal(other.to_string()),
        }
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
