use chrono::{DateTime, Duration, Utc};
use tracing::info;

use super::{with_retry, Ledger, LedgerEvent};
use crate::error::{LedgerError, LedgerResult};
use crate::models::{
    Actor, NewTrip, NewUser, NewVehicle, Trip, TripSearch, TripStatus, User, Vehicle,
    VerificationStatus,
};

impl Ledger {
    pub async fn register_user(&self, user: NewUser) -> LedgerResult<User> {
        if user.name.trim().is_empty() {
            return Err(LedgerError::InvalidRequest("name is required".to_string()));
        }
        with_retry(&self.retry, "register_user", || {
            self.store.create_user(user.clone())
        })
        .await
    }

    pub async fn register_vehicle(&self, vehicle: NewVehicle) -> LedgerResult<Vehicle> {
        if vehicle.seat_capacity <= 0 {
            return Err(LedgerError::InvalidRequest(
                "seat_capacity must be greater than 0".to_string(),
            ));
        }
        if vehicle.license_plate.trim().is_empty() {
            return Err(LedgerError::InvalidRequest(
                "license_plate is required".to_string(),
            ));
        }
        with_retry(&self.retry, "register_vehicle", || {
            self.store.create_vehicle(vehicle.clone())
        })
        .await
    }

    /// Решение оператора по документам водителя.
    pub async fn set_verification_status(
        &self,
        actor: Actor,
        user_id: i64,
        status: VerificationStatus,
    ) -> LedgerResult<User> {
        if actor != Actor::Operator {
            return Err(LedgerError::Forbidden(
                "only an operator can change verification status".to_string(),
            ));
        }
        let user = with_retry(&self.retry, "set_verification_status", || {
            self.store.set_verification_status(user_id, status)
        })
        .await?;
        info!(user_id, status = ?status, "verification status changed");
        Ok(user)
    }

    fn validate_trip(&self, trip: &NewTrip) -> LedgerResult<()> {
        let policy = &self.policy;
        if trip.departure_location.trim().is_empty() || trip.destination_location.trim().is_empty()
        {
            return Err(LedgerError::InvalidRequest(
                "departure and destination are required".to_string(),
            ));
        }
        if !(policy.min_seats..=policy.max_seats).contains(&trip.seats) {
            return Err(LedgerError::InvalidRequest(format!(
                "seats must be between {} and {}",
                policy.min_seats, policy.max_seats
            )));
        }
        if trip.price < policy.min_price {
            return Err(LedgerError::InvalidRequest(format!(
                "price must be at least {}",
                policy.min_price
            )));
        }
        if trip.departure_time <= Utc::now() {
            return Err(LedgerError::InvalidRequest(
                "departure time must be in the future".to_string(),
            ));
        }
        Ok(())
    }

    /// Создание поездки водителем. Проверка пересечений по машине и вставка
    /// идут в одной транзакции, чтобы два водителя не заняли одну машину.
    pub async fn create_trip(&self, driver_id: i64, trip: NewTrip) -> LedgerResult<Trip> {
        self.validate_trip(&trip)?;
        let window = self.policy.conflict_window;
        let require_verified = self.policy.require_verified_driver;

        let trip = with_retry(&self.retry, "create_trip", || {
            self.store
                .create_trip(driver_id, trip.clone(), window, require_verified)
        })
        .await?;

        info!(
            trip_id = trip.id,
            driver_id,
            vehicle_id = trip.vehicle_id,
            seats = trip.seat_capacity,
            departure = %trip.departure_time,
            "trip created"
        );
        Ok(trip)
    }

    /// true, если у машины есть активная поездка в пределах окна
    /// (по умолчанию окно из политики, ±2 часа).
    pub async fn check_vehicle_conflict(
        &self,
        vehicle_id: i64,
        proposed_departure: DateTime<Utc>,
        window: Option<Duration>,
    ) -> LedgerResult<bool> {
        let window = window.unwrap_or(self.policy.conflict_window);
        if window < Duration::zero() {
            return Err(LedgerError::InvalidRequest(
                "conflict window must not be negative".to_string(),
            ));
        }
        let conflict = with_retry(&self.retry, "check_vehicle_conflict", || {
            self.store
                .find_vehicle_conflict(vehicle_id, proposed_departure, window)
        })
        .await?;
        Ok(conflict.is_some())
    }

    /// ACTIVE -> COMPLETED | CANCELED. Пассажиры с активной бронью получают уведомление.
    pub async fn transition_trip_status(
        &self,
        actor: Actor,
        trip_id: i64,
        status: TripStatus,
    ) -> LedgerResult<Trip> {
        let transition = with_retry(&self.retry, "transition_trip_status", || {
            self.store.transition_trip(actor, trip_id, status)
        })
        .await?;

        info!(
            trip_id,
            from = %transition.previous,
            to = %transition.trip.status,
            passengers = transition.passenger_ids.len(),
            "trip status changed"
        );
        self.notify(
            transition.passenger_ids,
            LedgerEvent::TripStatusChanged {
                trip_id,
                previous: transition.previous,
                status: transition.trip.status,
            },
        )
        .await;

        Ok(transition.trip)
    }

    pub async fn trip(&self, trip_id: i64) -> LedgerResult<Trip> {
        with_retry(&self.retry, "get_trip", || self.store.get_trip(trip_id)).await
    }

    /// "Мои поездки" водителя, сначала самые поздние по времени отправления.
    pub async fn driver_trips(&self, driver_id: i64) -> LedgerResult<Vec<Trip>> {
        with_retry(&self.retry, "driver_trips", || {
            self.store.list_driver_trips(driver_id)
        })
        .await
    }

    pub async fn search_trips(&self, search: TripSearch) -> LedgerResult<Vec<Trip>> {
        with_retry(&self.retry, "search_trips", || {
            self.store.search_trips(search.clone())
        })
        .await
    }
}
