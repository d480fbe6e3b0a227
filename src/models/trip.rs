use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

use crate::error::LedgerError;

/// ACTIVE -> COMPLETED | CANCELED. Оба конечных статуса терминальные.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "trip_status", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum TripStatus {
    Active,
    Completed,
    Canceled,
}

impl TripStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TripStatus::Active)
    }

    pub fn can_transition_to(self, next: TripStatus) -> bool {
        matches!(
            (self, next),
            (TripStatus::Active, TripStatus::Completed) | (TripStatus::Active, TripStatus::Canceled)
        )
    }

    pub fn transition_to(self, next: TripStatus) -> Result<TripStatus, LedgerError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(LedgerError::InvalidTransition { from: self, to: next })
        }
    }
}

impl fmt::Display for TripStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TripStatus::Active => "ACTIVE",
            TripStatus::Completed => "COMPLETED",
            TripStatus::Canceled => "CANCELED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Trip {
    pub id: i64,
    pub driver_id: i64,
    pub vehicle_id: i64,
    pub departure_location: String,
    pub destination_location: String,
    pub departure_time: DateTime<Utc>,
    /// Число мест при создании, дальше не меняется.
    pub seat_capacity: i32,
    pub available_seats: i32,
    pub price: Decimal,
    pub status: TripStatus,
    pub created_at: DateTime<Utc>,
}

impl Trip {
    /// Проверки по только что заблокированной строке, до списания мест.
    pub fn check_booking(&self, passenger_id: i64, seats: i32) -> Result<(), LedgerError> {
        if self.status != TripStatus::Active {
            return Err(LedgerError::TripNotBookable { status: self.status });
        }
        if passenger_id == self.driver_id {
            return Err(LedgerError::InvalidRequest(
                "driver cannot book a seat on their own trip".to_string(),
            ));
        }
        if self.available_seats < seats {
            return Err(LedgerError::InsufficientSeats {
                available: self.available_seats,
            });
        }
        Ok(())
    }

    /// Места возвращаются только в активную поездку и не выше вместимости.
    pub fn check_release(&self, seats: i32) -> Result<(), LedgerError> {
        if self.status != TripStatus::Active {
            return Err(LedgerError::TripNotBookable { status: self.status });
        }
        if self.available_seats + seats > self.seat_capacity {
            return Err(LedgerError::Internal(format!(
                "releasing {} seats would exceed capacity {} of trip {}",
                seats, self.seat_capacity, self.id
            )));
        }
        Ok(())
    }

    pub fn booked_seats(&self) -> i32 {
        self.seat_capacity - self.available_seats
    }
}

/// Кто запрашивает смену статуса.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    Driver(i64),
    Operator,
}

impl Actor {
    pub fn authorize(&self, trip: &Trip) -> Result<(), LedgerError> {
        match self {
            Actor::Operator => Ok(()),
            Actor::Driver(id) if *id == trip.driver_id => Ok(()),
            Actor::Driver(id) => Err(LedgerError::Forbidden(format!(
                "user {} is not the driver of trip {}",
                id, trip.id
            ))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewTrip {
    pub vehicle_id: i64,
    pub departure_location: String,
    pub destination_location: String,
    pub departure_time: DateTime<Utc>,
    pub seats: i32,
    pub price: Decimal,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TripSearch {
    pub departure_location: Option<String>,
    pub destination_location: Option<String>,
    pub date: Option<NaiveDate>,
}

impl TripSearch {
    pub fn matches(&self, trip: &Trip, now: DateTime<Utc>) -> bool {
        let same = |filter: &Option<String>, value: &str| {
            filter
                .as_deref()
                .map_or(true, |f| f.trim().eq_ignore_ascii_case(value.trim()))
        };
        trip.status == TripStatus::Active
            && trip.available_seats > 0
            && trip.departure_time > now
            && same(&self.departure_location, &trip.departure_location)
            && same(&self.destination_location, &trip.destination_location)
            && self
                .date
                .map_or(true, |d| trip.departure_time.date_naive() == d)
    }
}
