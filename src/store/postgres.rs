use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use std::time::Duration as StdDuration;

use super::{conflict_bounds, LedgerStore, TripTransition};
use crate::error::{LedgerError, LedgerResult};
use crate::models::{
    Actor, Booking, NewRating, NewTrip, NewUser, NewVehicle, Rating, RatingSummary, Trip,
    TripSearch, TripStatus, User, Vehicle, VerificationStatus,
};

type PgTx = Transaction<'static, Postgres>;

const PG_MIN_YEAR: i32 = -4712;

/// Хранилище на Postgres. Блокировки строк через `SELECT ... FOR UPDATE`;
/// каждая транзакция выставляет локальный `lock_timeout`, поэтому ожидание
/// чужой блокировки заканчивается `LedgerError::Timeout`.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    lock_timeout: StdDuration,
}

impl PgStore {
    pub fn new(pool: PgPool, lock_timeout: StdDuration) -> Self {
        Self { pool, lock_timeout }
    }

    async fn begin(&self) -> LedgerResult<PgTx> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(format!("{}ms", self.lock_timeout.as_millis()))
            .execute(&mut *tx)
            .await?;
        Ok(tx)
    }
}

async fn commit(tx: PgTx) -> LedgerResult<()> {
    tx.commit().await.map_err(LedgerError::from_commit)
}

async fn lock_trip(tx: &mut PgTx, trip_id: i64) -> LedgerResult<Trip> {
    sqlx::query_as::<_, Trip>("SELECT * FROM trips WHERE id = $1 FOR UPDATE")
        .bind(trip_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(LedgerError::not_found("trip", trip_id))
}

async fn user_exists(tx: &mut PgTx, user_id: i64) -> LedgerResult<()> {
    let exists = sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM users WHERE id = $1)")
        .bind(user_id)
        .fetch_one(&mut **tx)
        .await?;
    if exists {
        Ok(())
    } else {
        Err(LedgerError::not_found("user", user_id))
    }
}

async fn is_participant(tx: &mut PgTx, trip: &Trip, user_id: i64) -> LedgerResult<bool> {
    if trip.driver_id == user_id {
        return Ok(true);
    }
    let booked = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(
           SELECT 1 FROM bookings
           WHERE trip_id = $1 AND passenger_id = $2 AND status = 'ACTIVE'
         )",
    )
    .bind(trip.id)
    .bind(user_id)
    .fetch_one(&mut **tx)
    .await?;
    Ok(booked)
}

async fn vehicle_conflict<'e, E>(
    executor: E,
    vehicle_id: i64,
    departure: DateTime<Utc>,
    window: Duration,
) -> LedgerResult<Option<i64>>
where
    E: sqlx::PgExecutor<'e>,
{
    let (from, to) = conflict_bounds(departure, window);
    // timestamptz начинается с 4713 до н.э.; более ранняя граница = без ограничения
    let from = from.filter(|at| at.year() > PG_MIN_YEAR);
    let trip_id = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT id FROM trips
        WHERE vehicle_id = $1
          AND status = 'ACTIVE'
          AND ($2::TIMESTAMPTZ IS NULL OR departure_time >= $2)
          AND ($3::TIMESTAMPTZ IS NULL OR departure_time <= $3)
        ORDER BY departure_time
        LIMIT 1
        "#,
    )
    .bind(vehicle_id)
    .bind(from)
    .bind(to)
    .fetch_optional(executor)
    .await?;
    Ok(trip_id)
}

#[async_trait]
impl LedgerStore for PgStore {
    async fn create_user(&self, user: NewUser) -> LedgerResult<User> {
        let row = sqlx::query_as::<_, User>(
            "INSERT INTO users (telegram_id, name, phone_number, role)
             VALUES ($1, $2, $3, $4)
             RETURNING *",
        )
        .bind(user.telegram_id)
        .bind(&user.name)
        .bind(&user.phone_number)
        .bind(user.role)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get_user(&self, user_id: i64) -> LedgerResult<User> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(LedgerError::not_found("user", user_id))
    }

    async fn create_vehicle(&self, vehicle: NewVehicle) -> LedgerResult<Vehicle> {
        let mut tx = self.begin().await?;
        user_exists(&mut tx, vehicle.driver_id).await?;
        let row = sqlx::query_as::<_, Vehicle>(
            "INSERT INTO vehicles (driver_id, brand, model, license_plate, seat_capacity)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING *",
        )
        .bind(vehicle.driver_id)
        .bind(&vehicle.brand)
        .bind(&vehicle.model)
        .bind(&vehicle.license_plate)
        .bind(vehicle.seat_capacity)
        .fetch_one(&mut *tx)
        .await?;
        commit(tx).await?;
        Ok(row)
    }

    async fn get_trip(&self, trip_id: i64) -> LedgerResult<Trip> {
        sqlx::query_as::<_, Trip>("SELECT * FROM trips WHERE id = $1")
            .bind(trip_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(LedgerError::not_found("trip", trip_id))
    }

    async fn create_trip(
        &self,
        driver_id: i64,
        trip: NewTrip,
        window: Duration,
        require_verified: bool,
    ) -> LedgerResult<Trip> {
        let mut tx = self.begin().await?;

        if require_verified {
            let status = sqlx::query_scalar::<_, VerificationStatus>(
                "SELECT verification_status FROM users WHERE id = $1 FOR SHARE",
            )
            .bind(driver_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(LedgerError::not_found("user", driver_id))?;
            if status != VerificationStatus::Approved {
                return Err(LedgerError::Forbidden(format!(
                    "driver {} is not verified",
                    driver_id
                )));
            }
        }

        // Блокировка строки машины сериализует создание поездок на одну машину
        let vehicle = sqlx::query_as::<_, Vehicle>("SELECT * FROM vehicles WHERE id = $1 FOR UPDATE")
            .bind(trip.vehicle_id)
            .fetch_optional(&mut *tx)
            .await?
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
        if let Some(trip_id) =
            vehicle_conflict(&mut *tx, vehicle.id, trip.departure_time, window).await?
        {
            return Err(LedgerError::VehicleConflict { trip_id });
        }

        let row = sqlx::query_as::<_, Trip>(
            r#"
            INSERT INTO trips (driver_id, vehicle_id, departure_location, destination_location,
                               departure_time, seat_capacity, available_seats, price)
            VALUES ($1, $2, $3, $4, $5, $6, $6, $7)
            RETURNING *
            "#,
        )
        .bind(driver_id)
        .bind(vehicle.id)
        .bind(&trip.departure_location)
        .bind(&trip.destination_location)
        .bind(trip.departure_time)
        .bind(trip.seats)
        .bind(trip.price)
        .fetch_one(&mut *tx)
        .await?;

        commit(tx).await?;
        Ok(row)
    }

    async fn set_verification_status(
        &self,
        user_id: i64,
        status: VerificationStatus,
    ) -> LedgerResult<User> {
        sqlx::query_as::<_, User>(
            "UPDATE users SET verification_status = $2 WHERE id = $1 RETURNING *",
        )
        .bind(user_id)
        .bind(status)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(LedgerError::not_found("user", user_id))
    }

    async fn find_vehicle_conflict(
        &self,
        vehicle_id: i64,
        departure: DateTime<Utc>,
        window: Duration,
    ) -> LedgerResult<Option<i64>> {
        let exists =
            sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM vehicles WHERE id = $1)")
                .bind(vehicle_id)
                .fetch_one(&self.pool)
                .await?;
        if !exists {
            return Err(LedgerError::not_found("vehicle", vehicle_id));
        }
        vehicle_conflict(&self.pool, vehicle_id, departure, window).await
    }

    async fn book_seats(
        &self,
        passenger_id: i64,
        trip_id: i64,
        seats: i32,
    ) -> LedgerResult<(Booking, Trip)> {
        let mut tx = self.begin().await?;

        // 1) Статус и остаток читаются заново под блокировкой строки
        let trip = lock_trip(&mut tx, trip_id).await?;
        trip.check_booking(passenger_id, seats)?;
        user_exists(&mut tx, passenger_id).await?;

        // 2) Списываем места
        let trip = sqlx::query_as::<_, Trip>(
            "UPDATE trips SET available_seats = available_seats - $2
             WHERE id = $1
             RETURNING *",
        )
        .bind(trip_id)
        .bind(seats)
        .fetch_one(&mut *tx)
        .await?;

        // 3) Создаем бронь
        let booking = sqlx::query_as::<_, Booking>(
            "INSERT INTO bookings (passenger_id, trip_id, seats_booked)
             VALUES ($1, $2, $3)
             RETURNING *",
        )
        .bind(passenger_id)
        .bind(trip_id)
        .bind(seats)
        .fetch_one(&mut *tx)
        .await?;

        // 4) Коммит; при любой ошибке выше транзакция откатывается на drop
        commit(tx).await?;
        Ok((booking, trip))
    }

    async fn cancel_booking(
        &self,
        passenger_id: i64,
        booking_id: i64,
    ) -> LedgerResult<(Booking, Trip)> {
        let mut tx = self.begin().await?;

        let booking =
            sqlx::query_as::<_, Booking>("SELECT * FROM bookings WHERE id = $1 FOR UPDATE")
                .bind(booking_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or(LedgerError::not_found("booking", booking_id))?;
        booking.check_cancel(passenger_id)?;

        let trip = lock_trip(&mut tx, booking.trip_id).await?;
        trip.check_release(booking.seats_booked)?;

        let trip = sqlx::query_as::<_, Trip>(
            "UPDATE trips SET available_seats = available_seats + $2
             WHERE id = $1
             RETURNING *",
        )
        .bind(trip.id)
        .bind(booking.seats_booked)
        .fetch_one(&mut *tx)
        .await?;

        let booking = sqlx::query_as::<_, Booking>(
            "UPDATE bookings SET status = 'CANCELED', canceled_at = NOW()
             WHERE id = $1
             RETURNING *",
        )
        .bind(booking_id)
        .fetch_one(&mut *tx)
        .await?;

        commit(tx).await?;
        Ok((booking, trip))
    }

    async fn transition_trip(
        &self,
        actor: Actor,
        trip_id: i64,
        next: TripStatus,
    ) -> LedgerResult<TripTransition> {
        let mut tx = self.begin().await?;

        let current = lock_trip(&mut tx, trip_id).await?;
        actor.authorize(&current)?;
        let previous = current.status;
        previous.transition_to(next)?;

        let trip = sqlx::query_as::<_, Trip>("UPDATE trips SET status = $2 WHERE id = $1 RETURNING *")
            .bind(trip_id)
            .bind(next)
            .fetch_one(&mut *tx)
            .await?;

        let passenger_ids = sqlx::query_scalar::<_, i64>(
            "SELECT DISTINCT passenger_id FROM bookings
             WHERE trip_id = $1 AND status = 'ACTIVE'
             ORDER BY passenger_id",
        )
        .bind(trip_id)
        .fetch_all(&mut *tx)
        .await?;

        commit(tx).await?;
        Ok(TripTransition {
            trip,
            previous,
            passenger_ids,
        })
    }

    async fn record_rating(&self, rating: NewRating) -> LedgerResult<(Rating, RatingSummary)> {
        let mut tx = self.begin().await?;

        // FOR SHARE: статус поездки не может смениться до конца транзакции
        let trip = sqlx::query_as::<_, Trip>("SELECT * FROM trips WHERE id = $1 FOR SHARE")
            .bind(rating.trip_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(LedgerError::not_found("trip", rating.trip_id))?;
        if trip.status != TripStatus::Completed {
            return Err(LedgerError::TripNotRateable {
                status: trip.status,
            });
        }
        for user_id in [rating.rater_id, rating.rated_user_id] {
            if !is_participant(&mut tx, &trip, user_id).await? {
                return Err(LedgerError::NotTripParticipant {
                    trip_id: trip.id,
                    user_id,
                });
            }
        }

        // Сначала блокируем строку оцениваемого: параллельные оценки одного
        // пользователя пересчитывают среднее по очереди
        sqlx::query_scalar::<_, i64>("SELECT id FROM users WHERE id = $1 FOR UPDATE")
            .bind(rating.rated_user_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(LedgerError::not_found("user", rating.rated_user_id))?;

        let row = sqlx::query_as::<_, Rating>(
            r#"
            INSERT INTO ratings (trip_id, rater_id, rated_user_id, score, comment)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (trip_id, rater_id, rated_user_id) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(rating.trip_id)
        .bind(rating.rater_id)
        .bind(rating.rated_user_id)
        .bind(rating.score)
        .bind(&rating.comment)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(LedgerError::AlreadyRated)?;

        let summary = sqlx::query_as::<_, RatingSummary>(
            r#"
            SELECT COUNT(*)::INT4 AS rating_count,
                   COALESCE(AVG(score)::FLOAT8, 0) AS average_rating
            FROM ratings
            WHERE rated_user_id = $1
            "#,
        )
        .bind(rating.rated_user_id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE users SET rating_count = $2, average_rating = $3 WHERE id = $1")
            .bind(rating.rated_user_id)
            .bind(summary.rating_count)
            .bind(summary.average_rating)
            .execute(&mut *tx)
            .await?;

        commit(tx).await?;
        Ok((row, summary))
    }

    async fn list_passenger_bookings(&self, passenger_id: i64) -> LedgerResult<Vec<Booking>> {
        let rows = sqlx::query_as::<_, Booking>(
            "SELECT * FROM bookings WHERE passenger_id = $1 ORDER BY created_at DESC, id DESC",
        )
        .bind(passenger_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn list_trip_bookings(&self, trip_id: i64) -> LedgerResult<Vec<Booking>> {
        self.get_trip(trip_id).await?;
        let rows =
            sqlx::query_as::<_, Booking>("SELECT * FROM bookings WHERE trip_id = $1 ORDER BY id")
                .bind(trip_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows)
    }

    async fn list_driver_trips(&self, driver_id: i64) -> LedgerResult<Vec<Trip>> {
        let rows = sqlx::query_as::<_, Trip>(
            "SELECT * FROM trips WHERE driver_id = $1 ORDER BY departure_time DESC",
        )
        .bind(driver_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn search_trips(&self, search: TripSearch) -> LedgerResult<Vec<Trip>> {
        let rows = sqlx::query_as::<_, Trip>(
            r#"
            SELECT * FROM trips
            WHERE status = 'ACTIVE'
              AND available_seats > 0
              AND departure_time > NOW()
              AND ($1::TEXT IS NULL OR LOWER(TRIM(departure_location)) = LOWER(TRIM($1)))
              AND ($2::TEXT IS NULL OR LOWER(TRIM(destination_location)) = LOWER(TRIM($2)))
              AND ($3::DATE IS NULL OR (departure_time AT TIME ZONE 'UTC')::DATE = $3)
            ORDER BY departure_time
            "#,
        )
        .bind(search.departure_location)
        .bind(search.destination_location)
        .bind(search.date)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
