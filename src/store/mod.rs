//! Хранилище леджера.
//!
//! Каждый изменяющий метод - одна транзакция: строка-владелец блокируется,
//! перечитывается, проверяется и только потом изменяется. Изменения метода
//! видны другим только если метод завершился успешно.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::error::LedgerResult;
use crate::models::{
    Actor, Booking, NewRating, NewTrip, NewUser, NewVehicle, Rating, RatingSummary, Trip,
    TripSearch, TripStatus, User, Vehicle, VerificationStatus,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Результат закоммиченной смены статуса.
#[derive(Debug, Clone)]
pub struct TripTransition {
    pub trip: Trip,
    pub previous: TripStatus,
    /// Пассажиры с активной бронью на момент коммита.
    pub passenger_ids: Vec<i64>,
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn create_user(&self, user: NewUser) -> LedgerResult<User>;

    async fn get_user(&self, user_id: i64) -> LedgerResult<User>;

    async fn create_vehicle(&self, vehicle: NewVehicle) -> LedgerResult<Vehicle>;

    async fn get_trip(&self, trip_id: i64) -> LedgerResult<Trip>;

    /// Блокирует машину, отклоняет пересечения с активными поездками в пределах
    /// `window` и вставляет поездку в той же транзакции. При `require_verified`
    /// водитель должен быть одобрен.
    async fn create_trip(
        &self,
        driver_id: i64,
        trip: NewTrip,
        window: Duration,
        require_verified: bool,
    ) -> LedgerResult<Trip>;

    /// Смена статуса верификации пользователя (только оператор).
    async fn set_verification_status(
        &self,
        user_id: i64,
        status: VerificationStatus,
    ) -> LedgerResult<User>;

    /// Id активной поездки `vehicle_id` с отправлением в
    /// `[departure - window, departure + window]`.
    async fn find_vehicle_conflict(
        &self,
        vehicle_id: i64,
        departure: DateTime<Utc>,
        window: Duration,
    ) -> LedgerResult<Option<i64>>;

    /// Проверка и списание мест под блокировкой строки поездки.
    async fn book_seats(&self, passenger_id: i64, trip_id: i64, seats: i32)
        -> LedgerResult<(Booking, Trip)>;

    async fn cancel_booking(&self, passenger_id: i64, booking_id: i64)
        -> LedgerResult<(Booking, Trip)>;

    async fn transition_trip(
        &self,
        actor: Actor,
        trip_id: i64,
        next: TripStatus,
    ) -> LedgerResult<TripTransition>;

    /// Вставляет оценку один раз и пересчитывает агрегат оцениваемого
    /// под блокировкой его строки.
    async fn record_rating(&self, rating: NewRating) -> LedgerResult<(Rating, RatingSummary)>;

    async fn list_passenger_bookings(&self, passenger_id: i64) -> LedgerResult<Vec<Booking>>;

    async fn list_trip_bookings(&self, trip_id: i64) -> LedgerResult<Vec<Booking>>;

    async fn list_driver_trips(&self, driver_id: i64) -> LedgerResult<Vec<Trip>>;

    async fn search_trips(&self, search: TripSearch) -> LedgerResult<Vec<Trip>>;
}

/// Границы окна конфликта. `None` - граница вышла за диапазон дат и окно
/// с этой стороны не ограничено.
pub(crate) fn conflict_bounds(
    departure: DateTime<Utc>,
    window: Duration,
) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
    (
        departure.checked_sub_signed(window),
        departure.checked_add_signed(window),
    )
}

pub(crate) fn within_bounds(
    at: DateTime<Utc>,
    (from, to): (Option<DateTime<Utc>>, Option<DateTime<Utc>>),
) -> bool {
    from.map_or(true, |from| at >= from) && to.map_or(true, |to| at <= to)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_saturate_instead_of_overflowing() {
        let far = DateTime::<Utc>::MAX_UTC - Duration::minutes(30);
        let bounds = conflict_bounds(far, Duration::hours(2));
        assert_eq!(bounds.0, Some(far - Duration::hours(2)));
        assert_eq!(bounds.1, None);
        assert!(within_bounds(DateTime::<Utc>::MAX_UTC, bounds));

        let now = Utc::now();
        let bounds = conflict_bounds(now, Duration::days(100_000_000));
        assert_eq!(bounds, (None, None));
        assert!(within_bounds(DateTime::<Utc>::MIN_UTC, bounds));
    }

    #[test]
    fn bounds_are_inclusive() {
        let departure = Utc::now();
        let bounds = conflict_bounds(departure, Duration::hours(2));
        assert!(within_bounds(departure + Duration::hours(2), bounds));
        assert!(!within_bounds(departure + Duration::hours(2) + Duration::seconds(1), bounds));
    }
}
