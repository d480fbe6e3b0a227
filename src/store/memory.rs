use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

use super::{conflict_bounds, within_bounds, LedgerStore, TripTransition};
use crate::error::{LedgerError, LedgerResult};
use crate::models::{
    Actor, Booking, BookingStatus, NewRating, NewTrip, NewUser, NewVehicle, Rating,
    RatingSummary, Trip, TripSearch, TripStatus, User, Vehicle, VerificationStatus,
};

#[derive(Debug, Default)]
struct Tables {
    next_id: i64,
    users: BTreeMap<i64, User>,
    vehicles: BTreeMap<i64, Vehicle>,
    trips: BTreeMap<i64, Trip>,
    bookings: BTreeMap<i64, Booking>,
    ratings: BTreeMap<i64, Rating>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn trip(&self, trip_id: i64) -> LedgerResult<&Trip> {
        self.trips
            .get(&trip_id)
            .ok_or(LedgerError::not_found("trip", trip_id))
    }

    fn user(&self, user_id: i64) -> LedgerResult<&User> {
        self.users
            .get(&user_id)
            .ok_or(LedgerError::not_found("user", user_id))
    }

    fn is_participant(&self, trip: &Trip, user_id: i64) -> bool {
        trip.driver_id == user_id
            || self.bookings.values().any(|b| {
                b.trip_id == trip.id && b.passenger_id == user_id && b.is_active()
            })
    }

    fn conflict(
        &self,
        vehicle_id: i64,
        departure: DateTime<Utc>,
        window: Duration,
    ) -> Option<i64> {
        let bounds = conflict_bounds(departure, window);
        self.trips
            .values()
            .filter(|t| t.vehicle_id == vehicle_id && t.status == TripStatus::Active)
            .filter(|t| within_bounds(t.departure_time, bounds))
            .min_by_key(|t| t.departure_time)
            .map(|t| t.id)
    }
}

/// Хранилище в памяти процесса. Один async-мьютекс заменяет базу: каждый
/// метод выполняется как сериализуемая транзакция под ним, ожидание
/// мьютекса ограничено `lock_timeout`.
#[derive(Debug)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    lock_timeout: std::time::Duration,
    injected_failures: AtomicU32,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(std::time::Duration::from_secs(2))
    }
}

impl MemoryStore {
    pub fn new(lock_timeout: std::time::Duration) -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            lock_timeout,
            injected_failures: AtomicU32::new(0),
        }
    }

    /// Следующие `count` транзакций завершатся `StoreUnavailable`.
    pub fn inject_failures(&self, count: u32) {
        self.injected_failures.store(count, Ordering::SeqCst);
    }

    async fn begin(&self) -> LedgerResult<MutexGuard<'_, Tables>> {
        let injected = self
            .injected_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if injected.is_ok() {
            debug!("memory store: injected transient failure");
            return Err(LedgerError::StoreUnavailable(
                "injected failure".to_string(),
            ));
        }

        tokio::time::timeout(self.lock_timeout, self.tables.lock())
            .await
            .map_err(|_| LedgerError::Timeout)
    }

    /// Занимает хранилище целиком, пока жив guard. Остальные транзакции
    /// ждут его не дольше `lock_timeout`.
    pub async fn hold_lock(&self) -> MutexGuard<'_, impl std::fmt::Debug> {
        self.tables.lock().await
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn create_user(&self, user: NewUser) -> LedgerResult<User> {
        let mut db = self.begin().await?;
        if db.users.values().any(|u| u.telegram_id == user.telegram_id) {
            return Err(LedgerError::AlreadyExists(format!(
                "user with telegram_id {}",
                user.telegram_id
            )));
        }
        let id = db.next_id();
        let row = User {
            id,
            telegram_id: user.telegram_id,
            name: user.name,
            phone_number: user.phone_number,
            role: user.role,
            verification_status: VerificationStatus::default(),
            average_rating: 0.0,
            rating_count: 0,
            created_at: Utc::now(),
        };
        db.users.insert(id, row.clone());
        Ok(row)
    }

    async fn get_user(&self, user_id: i64) -> LedgerResult<User> {
        let db = self.begin().await?;
        db.user(user_id).cloned()
    }

    async fn create_vehicle(&self, vehicle: NewVehicle) -> LedgerResult<Vehicle> {
        let mut db = self.begin().await?;
        db.user(vehicle.driver_id)?;
        if db
            .vehicles
            .values()
            .any(|v| v.license_plate == vehicle.license_plate)
        {
            return Err(LedgerError::AlreadyExists(format!(
                "vehicle {}",
                vehicle.license_plate
            )));
        }
        let id = db.next_id();
        let row = Vehicle {
            id,
            driver_id: vehicle.driver_id,
            brand: vehicle.brand,
            model: vehicle.model,
            license_plate: vehicle.license_plate,
            seat_capacity: vehicle.seat_capacity,
            created_at: Utc::now(),
        };
        db.vehicles.insert(id, row.clone());
        Ok(row)
    }

    async fn get_trip(&self, trip_id: i64) -> LedgerResult<Trip> {
        let db = self.begin().await?;
        db.trip(trip_id).cloned()
    }

    async fn create_trip(
        &self,
        driver_id: i64,
        trip: NewTrip,
        window: Duration,
        require_verified: bool,
    ) -> LedgerResult<Trip> {
        let mut db = self.begin().await?;
        if require_verified && !db.user(driver_id)?.is_verified() {
            return Err(LedgerError::Forbidden(format!(
                "driver {} is not verified",
                driver_id
            )));
        }
        let vehicle = db
            .vehicles
            .get(&trip.vehicle_id)
            .ok_or(LedgerError::not_found("vehicle", trip.vehicle_id))?;
        if vehicle.driver_id != driver_id {
            return Err(LedgerError::Forbidden(format!(
                "vehicle {} does not belong to user {}",
                vehicle.id, driver_id
            )));
        }
        if trip.seats > vehicle.seat_capacity {
            return Err(LedgerError::InvalidRequest(format!(
                "vehicle has only {} seats",
                vehicle.seat_capacity
            )));
        }
        if let Some(trip_id) = db.conflict(trip.vehicle_id, trip.departure_time, window) {
            return Err(LedgerError::VehicleConflict { trip_id });
        }

        let id = db.next_id();
        let row = Trip {
            id,
            driver_id,
            vehicle_id: trip.vehicle_id,
            departure_location: trip.departure_location,
            destination_location: trip.destination_location,
            departure_time: trip.departure_time,
            seat_capacity: trip.seats,
            available_seats: trip.seats,
            price: trip.price,
            status: TripStatus::Active,
            created_at: Utc::now(),
        };
        db.trips.insert(id, row.clone());
        Ok(row)
    }

    async fn set_verification_status(
        &self,
        user_id: i64,
        status: VerificationStatus,
    ) -> LedgerResult<User> {
        let mut db = self.begin().await?;
        let user = db
            .users
            .get_mut(&user_id)
            .ok_or(LedgerError::not_found("user", user_id))?;
        user.verification_status = status;
        Ok(user.clone())
    }

    async fn find_vehicle_conflict(
        &self,
        vehicle_id: i64,
        departure: DateTime<Utc>,
        window: Duration,
    ) -> LedgerResult<Option<i64>> {
        let db = self.begin().await?;
        if !db.vehicles.contains_key(&vehicle_id) {
            return Err(LedgerError::not_found("vehicle", vehicle_id));
        }
        Ok(db.conflict(vehicle_id, departure, window))
    }

    async fn book_seats(
        &self,
        passenger_id: i64,
        trip_id: i64,
        seats: i32,
    ) -> LedgerResult<(Booking, Trip)> {
        let mut db = self.begin().await?;
        db.trip(trip_id)?.check_booking(passenger_id, seats)?;
        db.user(passenger_id)?;

        let id = db.next_id();
        let booking = Booking {
            id,
            passenger_id,
            trip_id,
            seats_booked: seats,
            status: BookingStatus::Active,
            created_at: Utc::now(),
            canceled_at: None,
        };
        let trip = db
            .trips
            .get_mut(&trip_id)
            .ok_or(LedgerError::not_found("trip", trip_id))?;
        trip.available_seats -= seats;
        let trip = trip.clone();
        db.bookings.insert(id, booking.clone());
        Ok((booking, trip))
    }

    async fn cancel_booking(
        &self,
        passenger_id: i64,
        booking_id: i64,
    ) -> LedgerResult<(Booking, Trip)> {
        let mut db = self.begin().await?;
        let booking = db
            .bookings
            .get(&booking_id)
            .ok_or(LedgerError::not_found("booking", booking_id))?;
        booking.check_cancel(passenger_id)?;
        let (trip_id, seats) = (booking.trip_id, booking.seats_booked);
        db.trip(trip_id)?.check_release(seats)?;

        let trip = db
            .trips
            .get_mut(&trip_id)
            .ok_or(LedgerError::not_found("trip", trip_id))?;
        trip.available_seats += seats;
        let trip = trip.clone();

        let booking = db
            .bookings
            .get_mut(&booking_id)
            .ok_or(LedgerError::not_found("booking", booking_id))?;
        booking.status = BookingStatus::Canceled;
        booking.canceled_at = Some(Utc::now());
        Ok((booking.clone(), trip))
    }

    async fn transition_trip(
        &self,
        actor: Actor,
        trip_id: i64,
        next: TripStatus,
    ) -> LedgerResult<TripTransition> {
        let mut db = self.begin().await?;
        let current = db.trip(trip_id)?;
        actor.authorize(current)?;
        let previous = current.status;
        previous.transition_to(next)?;

        let mut passenger_ids: Vec<i64> = db
            .bookings
            .values()
            .filter(|b| b.trip_id == trip_id && b.is_active())
            .map(|b| b.passenger_id)
            .collect();
        passenger_ids.sort_unstable();
        passenger_ids.dedup();

        let trip = db
            .trips
            .get_mut(&trip_id)
            .ok_or(LedgerError::not_found("trip", trip_id))?;
        trip.status = next;
        Ok(TripTransition {
            trip: trip.clone(),
            previous,
            passenger_ids,
        })
    }

    async fn record_rating(&self, rating: NewRating) -> LedgerResult<(Rating, RatingSummary)> {
        let mut db = self.begin().await?;
        let trip = db.trip(rating.trip_id)?;
        if trip.status != TripStatus::Completed {
            return Err(LedgerError::TripNotRateable {
                status: trip.status,
            });
        }
        for user_id in [rating.rater_id, rating.rated_user_id] {
            if !db.is_participant(trip, user_id) {
                return Err(LedgerError::NotTripParticipant {
                    trip_id: trip.id,
                    user_id,
                });
            }
        }
        db.user(rating.rated_user_id)?;

        let duplicate = db.ratings.values().any(|r| {
            r.trip_id == rating.trip_id
                && r.rater_id == rating.rater_id
                && r.rated_user_id == rating.rated_user_id
        });
        if duplicate {
            return Err(LedgerError::AlreadyRated);
        }

        let id = db.next_id();
        let row = Rating {
            id,
            trip_id: rating.trip_id,
            rater_id: rating.rater_id,
            rated_user_id: rating.rated_user_id,
            score: rating.score,
            comment: rating.comment,
            created_at: Utc::now(),
        };
        db.ratings.insert(id, row.clone());

        let summary = RatingSummary::from_scores(
            db.ratings
                .values()
                .filter(|r| r.rated_user_id == row.rated_user_id)
                .map(|r| r.score),
        );
        let user = db
            .users
            .get_mut(&row.rated_user_id)
            .ok_or(LedgerError::not_found("user", row.rated_user_id))?;
        user.rating_count = summary.rating_count;
        user.average_rating = summary.average_rating;
        Ok((row, summary))
    }

    async fn list_passenger_bookings(&self, passenger_id: i64) -> LedgerResult<Vec<Booking>> {
        let db = self.begin().await?;
        let mut bookings: Vec<Booking> = db
            .bookings
            .values()
            .filter(|b| b.passenger_id == passenger_id)
            .cloned()
            .collect();
        bookings.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(bookings)
    }

    async fn list_trip_bookings(&self, trip_id: i64) -> LedgerResult<Vec<Booking>> {
        let db = self.begin().await?;
        db.trip(trip_id)?;
        Ok(db
            .bookings
            .values()
            .filter(|b| b.trip_id == trip_id)
            .cloned()
            .collect())
    }

    async fn list_driver_trips(&self, driver_id: i64) -> LedgerResult<Vec<Trip>> {
        let db = self.begin().await?;
        let mut trips: Vec<Trip> = db
            .trips
            .values()
            .filter(|t| t.driver_id == driver_id)
            .cloned()
            .collect();
        trips.sort_by(|a, b| b.departure_time.cmp(&a.departure_time));
        Ok(trips)
    }

    async fn search_trips(&self, search: TripSearch) -> LedgerResult<Vec<Trip>> {
        let db = self.begin().await?;
        let now = Utc::now();
        let mut trips: Vec<Trip> = db
            .trips
            .values()
            .filter(|t| search.matches(t, now))
            .cloned()
            .collect();
        trips.sort_by_key(|t| t.departure_time);
        Ok(trips)
    }
}
