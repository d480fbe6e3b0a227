//! notifications.rs
//!
//! События леджера для внешнего диспетчера уведомлений (Telegram-бот и т.п.).
//!
//! Ядро только публикует пары (получатель, событие) после коммита транзакции;
//! форматирование и доставка сообщений остаются на стороне подписчика.
//! 1.  **RedisNotifier**: PUBLISH JSON в канал Redis, бот подписан на канал.
//! 2.  **BroadcastNotifier**: локальный tokio broadcast, когда Redis не настроен.

use async_trait::async_trait;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::models::{Booking, Rating, TripStatus};
use crate::redis_client::RedisClient;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    BookingCreated {
        booking_id: i64,
        trip_id: i64,
        passenger_id: i64,
        seats_booked: i32,
        available_seats: i32,
    },
    BookingCanceled {
        booking_id: i64,
        trip_id: i64,
        passenger_id: i64,
        seats_released: i32,
        available_seats: i32,
    },
    TripStatusChanged {
        trip_id: i64,
        previous: TripStatus,
        status: TripStatus,
    },
    RatingRecorded {
        rating_id: i64,
        trip_id: i64,
        rater_id: i64,
        score: i16,
        average_rating: f64,
        rating_count: i32,
    },
}

impl LedgerEvent {
    pub fn booking_created(booking: &Booking, available_seats: i32) -> Self {
        LedgerEvent::BookingCreated {
            booking_id: booking.id,
            trip_id: booking.trip_id,
            passenger_id: booking.passenger_id,
            seats_booked: booking.seats_booked,
            available_seats,
        }
    }

    pub fn booking_canceled(booking: &Booking, available_seats: i32) -> Self {
        LedgerEvent::BookingCanceled {
            booking_id: booking.id,
            trip_id: booking.trip_id,
            passenger_id: booking.passenger_id,
            seats_released: booking.seats_booked,
            available_seats,
        }
    }

    pub fn rating_recorded(rating: &Rating, average_rating: f64, rating_count: i32) -> Self {
        LedgerEvent::RatingRecorded {
            rating_id: rating.id,
            trip_id: rating.trip_id,
            rater_id: rating.rater_id,
            score: rating.score,
            average_rating,
            rating_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub recipient_id: i64,
    pub event: LedgerEvent,
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("redis publish failed: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("serialize failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn publish(&self, notification: &Notification) -> Result<(), NotifyError>;
}

pub struct RedisNotifier {
    redis: RedisClient,
    channel: String,
}

impl RedisNotifier {
    pub fn new(redis: RedisClient, channel: impl Into<String>) -> Self {
        Self {
            redis,
            channel: channel.into(),
        }
    }
}

#[async_trait]
impl Notifier for RedisNotifier {
    async fn publish(&self, notification: &Notification) -> Result<(), NotifyError> {
        let payload = serde_json::to_string(notification)?;
        let mut conn = self.redis.conn.clone();
        let receivers: i64 = conn.publish(&self.channel, payload).await?;
        debug!(
            recipient_id = notification.recipient_id,
            receivers, "notification published"
        );
        Ok(())
    }
}

/// Рассылка внутри процесса. Публикация без подписчиков ошибкой не считается.
#[derive(Clone)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<Notification>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Notifier for BroadcastNotifier {
    async fn publish(&self, notification: &Notification) -> Result<(), NotifyError> {
        if self.sender.send(notification.clone()).is_err() {
            debug!("no local subscribers for notifications");
        }
        Ok(())
    }
}
