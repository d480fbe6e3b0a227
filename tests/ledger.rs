//! Сквозные сценарии леджера на хранилище в памяти.

mod common;

use chrono::{DateTime, Duration, Utc};
use common::{harness, harness_with, tomorrow_at, Harness};
use futures::future::join_all;
use myroute_ledger::{
    models::{Actor, TripSearch, TripStatus, UserRole, VerificationStatus},
    services::{LedgerEvent, TripPolicy},
    store::MemoryStore,
    LedgerError,
};

// ---------------------------------------------------------------------------
// Бронирование
// ---------------------------------------------------------------------------

#[tokio::test]
async fn two_bookings_race_for_last_seats() {
    let h = harness();
    let (_driver, trip) = h.trip_with_seats(3).await;
    let p = h.passengers(2).await;

    let (a, b) = tokio::join!(
        h.ledger.book(p[0].id, trip.id, 2),
        h.ledger.book(p[1].id, trip.id, 2),
    );

    let results = [a, b];
    let ok = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(ok, 1);
    assert!(results.iter().any(|r| matches!(
        r,
        Err(LedgerError::InsufficientSeats { available: 1 })
    )));
    assert_eq!(h.available(trip.id).await, 1);
    assert_eq!(h.seat_total(trip.id).await, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_single_seat_bookings_never_oversell() {
    let h = harness();
    let (_driver, trip) = h.trip_with_seats(5).await;
    let passengers = h.passengers(20).await;

    let results = join_all(passengers.iter().map(|p| {
        let ledger = h.ledger.clone();
        let (passenger_id, trip_id) = (p.id, trip.id);
        tokio::spawn(async move { ledger.book(passenger_id, trip_id, 1).await })
    }))
    .await;

    let mut booked = 0;
    for result in results {
        match result.unwrap() {
            Ok(_) => booked += 1,
            Err(LedgerError::InsufficientSeats { available: 0 }) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(booked, 5);
    assert_eq!(h.available(trip.id).await, 0);
    assert_eq!(h.seat_total(trip.id).await, 5);
}

#[tokio::test]
async fn driver_cannot_book_own_trip() {
    let h = harness();
    let (driver, trip) = h.trip_with_seats(3).await;
    assert!(matches!(
        h.ledger.book(driver.id, trip.id, 1).await,
        Err(LedgerError::InvalidRequest(_))
    ));
    assert_eq!(h.available(trip.id).await, 3);
}

#[tokio::test]
async fn booking_unknown_trip_is_not_found() {
    let h = harness();
    let p = h.passengers(1).await;
    assert!(matches!(
        h.ledger.book(p[0].id, 9999, 1).await,
        Err(LedgerError::NotFound { entity: "trip", .. })
    ));
}

#[tokio::test]
async fn cancellation_returns_seats() {
    let h = harness();
    let (_driver, trip) = h.trip_with_seats(4).await;
    let p = h.passengers(2).await;

    let first = h.ledger.book(p[0].id, trip.id, 3).await.unwrap();
    assert!(matches!(
        h.ledger.book(p[1].id, trip.id, 2).await,
        Err(LedgerError::InsufficientSeats { available: 1 })
    ));

    // чужую бронь отменить нельзя
    assert!(matches!(
        h.ledger.cancel_booking(p[1].id, first.id).await,
        Err(LedgerError::Forbidden(_))
    ));

    let canceled = h.ledger.cancel_booking(p[0].id, first.id).await.unwrap();
    assert!(!canceled.is_active());
    assert!(canceled.canceled_at.is_some());
    assert_eq!(h.available(trip.id).await, 4);

    assert!(matches!(
        h.ledger.cancel_booking(p[0].id, first.id).await,
        Err(LedgerError::BookingAlreadyCanceled { .. })
    ));
    assert_eq!(h.available(trip.id).await, 4);

    h.ledger.book(p[1].id, trip.id, 2).await.unwrap();
    assert_eq!(h.seat_total(trip.id).await, 4);

    let mine = h.ledger.passenger_bookings(p[0].id).await.unwrap();
    assert_eq!(mine.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn interleaved_book_and_cancel_conserve_capacity() {
    let h = harness();
    let (_driver, trip) = h.trip_with_seats(6).await;
    let passengers = h.passengers(8).await;

    let tasks = passengers.iter().map(|p| {
        let ledger = h.ledger.clone();
        let (passenger_id, trip_id) = (p.id, trip.id);
        tokio::spawn(async move {
            if let Ok(booking) = ledger.book(passenger_id, trip_id, 2).await {
                if passenger_id % 2 == 0 {
                    ledger.cancel_booking(passenger_id, booking.id).await.unwrap();
                }
            }
        })
    });
    for task in join_all(tasks).await {
        task.unwrap();
    }

    let available = h.available(trip.id).await;
    assert!((0..=6).contains(&available));
    assert_eq!(h.seat_total(trip.id).await, 6);
}

// ---------------------------------------------------------------------------
// Статусы поездки
// ---------------------------------------------------------------------------

#[tokio::test]
async fn booking_rejected_after_trip_canceled() {
    let h = harness();
    let (driver, trip) = h.trip_with_seats(3).await;
    let p = h.passengers(1).await;

    // снимок поездки еще ACTIVE, но к моменту брони статус уже другой
    let snapshot = h.ledger.trip(trip.id).await.unwrap();
    assert_eq!(snapshot.status, TripStatus::Active);

    h.ledger
        .transition_trip_status(Actor::Driver(driver.id), trip.id, TripStatus::Canceled)
        .await
        .unwrap();

    assert!(matches!(
        h.ledger.book(p[0].id, trip.id, 1).await,
        Err(LedgerError::TripNotBookable {
            status: TripStatus::Canceled
        })
    ));
    assert_eq!(h.available(trip.id).await, 3);
}

#[tokio::test]
async fn terminal_statuses_cannot_change() {
    let h = harness();
    let (driver, trip) = h.trip_with_seats(3).await;
    let actor = Actor::Driver(driver.id);

    h.ledger
        .transition_trip_status(actor, trip.id, TripStatus::Completed)
        .await
        .unwrap();

    for next in [TripStatus::Active, TripStatus::Canceled, TripStatus::Completed] {
        assert!(matches!(
            h.ledger.transition_trip_status(actor, trip.id, next).await,
            Err(LedgerError::InvalidTransition {
                from: TripStatus::Completed,
                ..
            })
        ));
    }
}

#[tokio::test]
async fn only_driver_or_operator_changes_status() {
    let h = harness();
    let (_driver, trip) = h.trip_with_seats(3).await;
    let p = h.passengers(1).await;

    assert!(matches!(
        h.ledger
            .transition_trip_status(Actor::Driver(p[0].id), trip.id, TripStatus::Canceled)
            .await,
        Err(LedgerError::Forbidden(_))
    ));

    let trip = h
        .ledger
        .transition_trip_status(Actor::Operator, trip.id, TripStatus::Canceled)
        .await
        .unwrap();
    assert_eq!(trip.status, TripStatus::Canceled);
}

#[tokio::test]
async fn cancellation_notifies_booked_passengers() {
    let h = harness();
    let (driver, trip) = h.trip_with_seats(3).await;
    let p = h.passengers(2).await;
    h.ledger.book(p[0].id, trip.id, 1).await.unwrap();
    h.ledger.book(p[1].id, trip.id, 1).await.unwrap();

    let mut rx = h.notifier.subscribe();
    h.ledger
        .transition_trip_status(Actor::Driver(driver.id), trip.id, TripStatus::Canceled)
        .await
        .unwrap();

    let mut recipients = Vec::new();
    while let Ok(n) = rx.try_recv() {
        assert!(matches!(
            n.event,
            LedgerEvent::TripStatusChanged {
                status: TripStatus::Canceled,
                ..
            }
        ));
        recipients.push(n.recipient_id);
    }
    recipients.sort_unstable();
    assert_eq!(recipients, vec![p[0].id, p[1].id]);
}

// ---------------------------------------------------------------------------
// Оценки
// ---------------------------------------------------------------------------

async fn completed_trip_with_passengers(h: &Harness, count: i64) -> (i64, i64, Vec<i64>) {
    let (driver, trip) = h.trip_with_seats(7).await;
    let passengers = h.passengers(count).await;
    for p in &passengers {
        h.ledger.book(p.id, trip.id, 1).await.unwrap();
    }
    h.ledger
        .transition_trip_status(Actor::Driver(driver.id), trip.id, TripStatus::Completed)
        .await
        .unwrap();
    (driver.id, trip.id, passengers.iter().map(|p| p.id).collect())
}

#[tokio::test]
async fn average_is_recomputed_over_all_scores() {
    let h = harness();
    let (driver_id, trip_id, passengers) = completed_trip_with_passengers(&h, 3).await;

    for (passenger_id, score) in passengers.iter().zip([3, 5, 4]) {
        h.ledger
            .rate(*passenger_id, driver_id, trip_id, score, None)
            .await
            .unwrap();
    }

    let driver = h.ledger.user(driver_id).await.unwrap();
    assert_eq!(driver.rating_count, 3);
    assert!((driver.average_rating - 4.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn second_rating_for_same_trip_is_rejected() {
    let h = harness();
    let (driver_id, trip_id, passengers) = completed_trip_with_passengers(&h, 1).await;

    h.ledger
        .rate(passengers[0], driver_id, trip_id, 5, Some("отлично".into()))
        .await
        .unwrap();
    assert!(matches!(
        h.ledger.rate(passengers[0], driver_id, trip_id, 1, None).await,
        Err(LedgerError::AlreadyRated)
    ));

    let driver = h.ledger.user(driver_id).await.unwrap();
    assert_eq!(driver.rating_count, 1);
    assert!((driver.average_rating - 5.0).abs() < f64::EPSILON);

    // водитель может оценить пассажира независимо
    h.ledger
        .rate(driver_id, passengers[0], trip_id, 4, None)
        .await
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_raters_produce_exact_aggregate() {
    let h = harness();
    let (driver_id, trip_id, passengers) = completed_trip_with_passengers(&h, 6).await;
    let scores = [5_i16, 4, 3, 5, 2, 5];

    let tasks = passengers.iter().zip(scores).map(|(passenger_id, score)| {
        let ledger = h.ledger.clone();
        let passenger_id = *passenger_id;
        tokio::spawn(async move { ledger.rate(passenger_id, driver_id, trip_id, score, None).await })
    });
    for task in join_all(tasks).await {
        task.unwrap().unwrap();
    }

    let driver = h.ledger.user(driver_id).await.unwrap();
    assert_eq!(driver.rating_count, 6);
    let expected = f64::from(scores.iter().map(|s| i32::from(*s)).sum::<i32>()) / 6.0;
    assert!((driver.average_rating - expected).abs() < 1e-9);
}

#[tokio::test]
async fn ratings_require_completed_trip_and_participants() {
    let h = harness();
    let (driver, trip) = h.trip_with_seats(3).await;
    let p = h.passengers(2).await;
    h.ledger.book(p[0].id, trip.id, 1).await.unwrap();

    assert!(matches!(
        h.ledger.rate(p[0].id, driver.id, trip.id, 5, None).await,
        Err(LedgerError::TripNotRateable {
            status: TripStatus::Active
        })
    ));

    h.ledger
        .transition_trip_status(Actor::Driver(driver.id), trip.id, TripStatus::Completed)
        .await
        .unwrap();

    assert!(matches!(
        h.ledger.rate(p[1].id, driver.id, trip.id, 5, None).await,
        Err(LedgerError::NotTripParticipant { .. })
    ));
    assert!(matches!(
        h.ledger.rate(p[0].id, driver.id, trip.id, 6, None).await,
        Err(LedgerError::InvalidRequest(_))
    ));
    assert!(matches!(
        h.ledger.rate(p[0].id, p[0].id, trip.id, 5, None).await,
        Err(LedgerError::InvalidRequest(_))
    ));
}

// ---------------------------------------------------------------------------
// Поездки и пересечения по машине
// ---------------------------------------------------------------------------

#[tokio::test]
async fn vehicle_conflict_window() {
    let h = harness();
    let (driver, trip) = h.trip_with_seats(3).await;

    let vehicle_id = trip.vehicle_id;
    let check = |hour, minute| {
        h.ledger
            .check_vehicle_conflict(vehicle_id, tomorrow_at(hour, minute), None)
    };
    assert!(check(19, 30).await.unwrap());
    assert!(check(20, 0).await.unwrap());
    assert!(!check(21, 30).await.unwrap());
    assert!(!check(15, 59).await.unwrap());

    assert!(!h
        .ledger
        .check_vehicle_conflict(trip.vehicle_id, tomorrow_at(19, 30), Some(chrono::Duration::hours(1)))
        .await
        .unwrap());

    assert!(matches!(
        h.ledger
            .create_trip(driver.id, Harness::new_trip(trip.vehicle_id, tomorrow_at(19, 30), 3))
            .await,
        Err(LedgerError::VehicleConflict { trip_id }) if trip_id == trip.id
    ));
    h.ledger
        .create_trip(driver.id, Harness::new_trip(trip.vehicle_id, tomorrow_at(21, 30), 3))
        .await
        .unwrap();

    // отмененная поездка больше не занимает машину
    h.ledger
        .transition_trip_status(Actor::Driver(driver.id), trip.id, TripStatus::Canceled)
        .await
        .unwrap();
    assert!(!check(18, 0).await.unwrap());
}

#[tokio::test]
async fn huge_conflict_window_saturates() {
    let h = harness();
    let (_driver, trip) = h.trip_with_seats(3).await;

    let conflict = h
        .ledger
        .check_vehicle_conflict(
            trip.vehicle_id,
            tomorrow_at(6, 0),
            Some(Duration::days(100_000_000)),
        )
        .await
        .unwrap();
    assert!(conflict);
}

#[tokio::test]
async fn trip_at_the_end_of_time_can_be_created() {
    let h = harness();
    let driver = h.user(1, UserRole::Driver).await;
    let vehicle = h.vehicle(driver.id, "999ZZZ01").await;
    let departure = DateTime::<Utc>::MAX_UTC - Duration::minutes(30);

    let trip = h
        .ledger
        .create_trip(driver.id, Harness::new_trip(vehicle.id, departure, 3))
        .await
        .unwrap();
    assert_eq!(trip.departure_time, departure);
    assert!(h
        .ledger
        .check_vehicle_conflict(vehicle.id, DateTime::<Utc>::MAX_UTC, None)
        .await
        .unwrap());
    assert!(matches!(
        h.ledger
            .create_trip(driver.id, Harness::new_trip(vehicle.id, departure, 3))
            .await,
        Err(LedgerError::VehicleConflict { trip_id }) if trip_id == trip.id
    ));
}

#[tokio::test]
async fn trip_policy_is_enforced() {
    let h = harness();
    let driver = h.user(1, UserRole::Driver).await;
    let vehicle = h.vehicle(driver.id, "001AAA01").await;

    let mut too_many = Harness::new_trip(vehicle.id, tomorrow_at(10, 0), 8);
    assert!(matches!(
        h.ledger.create_trip(driver.id, too_many.clone()).await,
        Err(LedgerError::InvalidRequest(_))
    ));

    too_many.seats = 3;
    too_many.price = rust_decimal::Decimal::new(49, 0);
    assert!(matches!(
        h.ledger.create_trip(driver.id, too_many.clone()).await,
        Err(LedgerError::InvalidRequest(_))
    ));

    let past = Harness::new_trip(vehicle.id, chrono::Utc::now() - chrono::Duration::hours(1), 3);
    assert!(matches!(
        h.ledger.create_trip(driver.id, past).await,
        Err(LedgerError::InvalidRequest(_))
    ));

    let other = h.user(2, UserRole::Driver).await;
    assert!(matches!(
        h.ledger
            .create_trip(other.id, Harness::new_trip(vehicle.id, tomorrow_at(10, 0), 3))
            .await,
        Err(LedgerError::Forbidden(_))
    ));
}

#[tokio::test]
async fn search_hides_full_and_inactive_trips() {
    let h = harness();
    let (_driver, trip) = h.trip_with_seats(1).await;
    let p = h.passengers(1).await;

    let search = TripSearch {
        departure_location: Some("almaty".into()),
        destination_location: None,
        date: Some(tomorrow_at(0, 0).date_naive()),
    };
    let found = h.ledger.search_trips(search.clone()).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, trip.id);

    h.ledger.book(p[0].id, trip.id, 1).await.unwrap();
    assert!(h.ledger.search_trips(search).await.unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Верификация водителя
// ---------------------------------------------------------------------------

#[tokio::test]
async fn only_operator_sets_verification_status() {
    let h = harness();
    let driver = h.user(1, UserRole::Driver).await;
    assert_eq!(driver.verification_status, VerificationStatus::NotVerified);

    assert!(matches!(
        h.ledger
            .set_verification_status(Actor::Driver(driver.id), driver.id, VerificationStatus::Approved)
            .await,
        Err(LedgerError::Forbidden(_))
    ));

    let approved = h
        .ledger
        .set_verification_status(Actor::Operator, driver.id, VerificationStatus::Approved)
        .await
        .unwrap();
    assert!(approved.is_verified());
    assert!(h.ledger.user(driver.id).await.unwrap().is_verified());

    assert!(matches!(
        h.ledger
            .set_verification_status(Actor::Operator, 9999, VerificationStatus::Rejected)
            .await,
        Err(LedgerError::NotFound { .. })
    ));
}

#[tokio::test]
async fn unverified_driver_cannot_publish_when_required() {
    let h = harness_with(
        MemoryStore::default(),
        TripPolicy {
            require_verified_driver: true,
            ..TripPolicy::default()
        },
    );
    let driver = h.user(1, UserRole::Driver).await;
    let vehicle = h.vehicle(driver.id, "010BBB02").await;
    let trip = || Harness::new_trip(vehicle.id, tomorrow_at(9, 0), 3);

    for status in [
        VerificationStatus::NotVerified,
        VerificationStatus::Pending,
        VerificationStatus::Rejected,
    ] {
        h.ledger
            .set_verification_status(Actor::Operator, driver.id, status)
            .await
            .unwrap();
        assert!(matches!(
            h.ledger.create_trip(driver.id, trip()).await,
            Err(LedgerError::Forbidden(_))
        ));
    }

    h.ledger
        .set_verification_status(Actor::Operator, driver.id, VerificationStatus::Approved)
        .await
        .unwrap();
    h.ledger.create_trip(driver.id, trip()).await.unwrap();
}

// ---------------------------------------------------------------------------
// Повторы и уведомления
// ---------------------------------------------------------------------------

#[tokio::test]
async fn transient_failures_are_retried() {
    let h = harness();
    let (_driver, trip) = h.trip_with_seats(3).await;
    let p = h.passengers(1).await;

    h.store.inject_failures(2);
    h.ledger.book(p[0].id, trip.id, 1).await.unwrap();
    assert_eq!(h.available(trip.id).await, 2);

    h.store.inject_failures(3);
    assert!(matches!(
        h.ledger.book(p[0].id, trip.id, 1).await,
        Err(LedgerError::StoreUnavailable(_))
    ));
    assert_eq!(h.available(trip.id).await, 2);
}

#[tokio::test]
async fn lock_timeout_surfaces_after_retries() {
    let h = harness_with(
        MemoryStore::new(std::time::Duration::from_millis(20)),
        TripPolicy::default(),
    );
    let (_driver, trip) = h.trip_with_seats(3).await;
    let p = h.passengers(1).await;

    let guard = h.store.hold_lock().await;
    let result = h.ledger.book(p[0].id, trip.id, 1).await;
    drop(guard);

    assert!(matches!(result, Err(LedgerError::Timeout)));
    assert_eq!(h.available(trip.id).await, 3);
    h.ledger.book(p[0].id, trip.id, 1).await.unwrap();
}

#[tokio::test]
async fn booking_notifies_driver_and_passenger() {
    let h = harness();
    let (driver, trip) = h.trip_with_seats(3).await;
    let p = h.passengers(1).await;
    let mut rx = h.notifier.subscribe();

    let booking = h.ledger.book(p[0].id, trip.id, 2).await.unwrap();

    let first = rx.recv().await.unwrap();
    let second = rx.recv().await.unwrap();
    assert_eq!(first.recipient_id, driver.id);
    assert_eq!(second.recipient_id, p[0].id);
    assert_eq!(
        first.event,
        LedgerEvent::BookingCreated {
            booking_id: booking.id,
            trip_id: trip.id,
            passenger_id: p[0].id,
            seats_booked: 2,
            available_seats: 1,
        }
    );
}
