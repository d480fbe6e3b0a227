use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

use crate::error::LedgerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "booking_status", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum BookingStatus {
    Active,
    Canceled,
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BookingStatus::Active => f.write_str("ACTIVE"),
            BookingStatus::Canceled => f.write_str("CANCELED"),
        }
    }
}

// Бронь неизменяема после создания, кроме перехода в CANCELED
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Booking {
    pub id: i64,
    pub passenger_id: i64,
    pub trip_id: i64,
    pub seats_booked: i32,
    pub status: BookingStatus,
    pub created_at: DateTime<Utc>,
    pub canceled_at: Option<DateTime<Utc>>,
}

impl Booking {
    pub fn check_cancel(&self, passenger_id: i64) -> Result<(), LedgerError> {
        if self.passenger_id != passenger_id {
            return Err(LedgerError::Forbidden(format!(
                "booking {} does not belong to user {}",
                self.id, passenger_id
            )));
        }
        if self.status != BookingStatus::Active {
            return Err(LedgerError::BookingAlreadyCanceled { status: self.status });
        }
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.status == BookingStatus::Active
    }
}
