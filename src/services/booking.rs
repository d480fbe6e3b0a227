use tracing::{info, warn};

use super::{with_retry, Ledger, LedgerEvent};
use crate::error::{LedgerError, LedgerResult};
use crate::models::Booking;

impl Ledger {
    /// Бронирует `seats` мест на поездке.
    ///
    /// Проверка статуса, проверка остатка и списание выполняются одной
    /// транзакцией под блокировкой строки поездки, поэтому из N конкурирующих
    /// запросов на последние места успешны только те, что помещаются в остаток.
    pub async fn book(&self, passenger_id: i64, trip_id: i64, seats: i32) -> LedgerResult<Booking> {
        if seats <= 0 {
            return Err(LedgerError::InvalidRequest(
                "seats must be greater than 0".to_string(),
            ));
        }

        let result = with_retry(&self.retry, "book", || {
            self.store.book_seats(passenger_id, trip_id, seats)
        })
        .await;

        let (booking, trip) = match result {
            Ok(ok) => ok,
            Err(e) => {
                if e.is_business() {
                    info!(passenger_id, trip_id, seats, reason = %e, "booking rejected");
                }
                return Err(e);
            }
        };

        info!(
            booking_id = booking.id,
            passenger_id,
            trip_id,
            seats,
            available_seats = trip.available_seats,
            "booking created"
        );
        self.notify(
            vec![trip.driver_id, passenger_id],
            LedgerEvent::booking_created(&booking, trip.available_seats),
        )
        .await;

        Ok(booking)
    }

    /// Отмена брони пассажиром: места возвращаются в поездку.
    pub async fn cancel_booking(&self, passenger_id: i64, booking_id: i64) -> LedgerResult<Booking> {
        let (booking, trip) = with_retry(&self.retry, "cancel_booking", || {
            self.store.cancel_booking(passenger_id, booking_id)
        })
        .await
        .inspect_err(|e| {
            if e.is_business() {
                warn!(passenger_id, booking_id, reason = %e, "cancellation rejected");
            }
        })?;

        info!(
            booking_id,
            trip_id = trip.id,
            seats_released = booking.seats_booked,
            available_seats = trip.available_seats,
            "booking canceled"
        );
        self.notify(
            vec![trip.driver_id, passenger_id],
            LedgerEvent::booking_canceled(&booking, trip.available_seats),
        )
        .await;

        Ok(booking)
    }

    /// "Мои бронирования", новые сверху.
    pub async fn passenger_bookings(&self, passenger_id: i64) -> LedgerResult<Vec<Booking>> {
        with_retry(&self.retry, "passenger_bookings", || {
            self.store.list_passenger_bookings(passenger_id)
        })
        .await
    }

    pub async fn trip_bookings(&self, trip_id: i64) -> LedgerResult<Vec<Booking>> {
        with_retry(&self.retry, "trip_bookings", || {
            self.store.list_trip_bookings(trip_id)
        })
        .await
    }
}
