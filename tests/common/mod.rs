#![allow(dead_code)]

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;

use myroute_ledger::{
    models::{NewTrip, NewUser, NewVehicle, Trip, User, UserRole, Vehicle},
    services::{BroadcastNotifier, RetryPolicy, TripPolicy},
    store::{LedgerStore, MemoryStore},
    Ledger,
};

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub notifier: BroadcastNotifier,
    pub ledger: Ledger,
}

pub fn harness() -> Harness {
    harness_with(
        MemoryStore::new(std::time::Duration::from_secs(5)),
        TripPolicy::default(),
    )
}

/// Боевые настройки повторов поверх заданного хранилища и политики.
pub fn harness_with(store: MemoryStore, policy: TripPolicy) -> Harness {
    let store = Arc::new(store);
    let notifier = BroadcastNotifier::new(1024);
    let ledger = Ledger::new(
        store.clone(),
        Arc::new(notifier.clone()),
        RetryPolicy::default(),
        policy,
    );
    Harness {
        store,
        notifier,
        ledger,
    }
}

/// Завтра в `hour:minute` UTC.
pub fn tomorrow_at(hour: u32, minute: u32) -> DateTime<Utc> {
    let date = (Utc::now() + Duration::days(1)).date_naive();
    date.and_hms_opt(hour, minute, 0).unwrap().and_utc()
}

impl Harness {
    pub async fn user(&self, telegram_id: i64, role: UserRole) -> User {
        self.ledger
            .register_user(NewUser::new(telegram_id, format!("user-{telegram_id}"), role))
            .await
            .unwrap()
    }

    pub async fn vehicle(&self, driver_id: i64, plate: &str) -> Vehicle {
        self.ledger
            .register_vehicle(NewVehicle {
                driver_id,
                brand: "Kia".into(),
                model: "Rio".into(),
                license_plate: plate.into(),
                seat_capacity: 7,
            })
            .await
            .unwrap()
    }

    pub fn new_trip(vehicle_id: i64, departure: DateTime<Utc>, seats: i32) -> NewTrip {
        NewTrip {
            vehicle_id,
            departure_location: "Almaty".into(),
            destination_location: "Astana".into(),
            departure_time: departure,
            seats,
            price: Decimal::new(1500, 0),
        }
    }

    /// Водитель с машиной и ACTIVE-поездкой на `seats` мест завтра в 18:00.
    pub async fn trip_with_seats(&self, seats: i32) -> (User, Trip) {
        let driver = self.user(1000, UserRole::Driver).await;
        let vehicle = self.vehicle(driver.id, "777ABC02").await;
        let trip = self
            .ledger
            .create_trip(driver.id, Self::new_trip(vehicle.id, tomorrow_at(18, 0), seats))
            .await
            .unwrap();
        (driver, trip)
    }

    pub async fn passengers(&self, count: i64) -> Vec<User> {
        let mut users = Vec::new();
        for i in 0..count {
            users.push(self.user(2000 + i, UserRole::Passenger).await);
        }
        users
    }

    pub async fn available(&self, trip_id: i64) -> i32 {
        self.store.get_trip(trip_id).await.unwrap().available_seats
    }

    /// available + места активных броней, всегда равно вместимости.
    pub async fn seat_total(&self, trip_id: i64) -> i32 {
        let trip = self.store.get_trip(trip_id).await.unwrap();
        let booked: i32 = self
            .store
            .list_trip_bookings(trip_id)
            .await
            .unwrap()
            .iter()
            .filter(|b| b.is_active())
            .map(|b| b.seats_booked)
            .sum();
        trip.available_seats + booked
    }
}
