//! Сервисный слой леджера.
//!
//! `Ledger` - единая точка входа для бота и HTTP-обработчиков:
//! 1.  **Бронирование** (`booking.rs`): атомарное списание мест и отмена брони.
//! 2.  **Рейтинги** (`rating.rs`): одна оценка на (поездка, автор, получатель),
//!     полный пересчет среднего под блокировкой.
//! 3.  **Поездки** (`trips.rs`): создание с проверкой конфликтов машины,
//!     смена статуса ACTIVE -> COMPLETED | CANCELED.
//!
//! Вся корректность при конкуренции обеспечивается хранилищем (`LedgerStore`);
//! сервис валидирует вход, повторяет транзиентные сбои и публикует события.

use chrono::Duration;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::warn;

use crate::store::LedgerStore;

pub mod booking;
pub mod notifications;
pub mod rating;
pub mod retry;
pub mod trips;

pub use notifications::{
    BroadcastNotifier, LedgerEvent, Notification, Notifier, NotifyError, RedisNotifier,
};
pub use retry::{with_retry, RetryPolicy};

/// Бизнес-константы, применяемые при создании поездки водителем.
#[derive(Debug, Clone)]
pub struct TripPolicy {
    pub conflict_window: Duration,
    pub min_seats: i32,
    pub max_seats: i32,
    pub min_price: Decimal,
    /// Создавать поездки могут только водители со статусом `approved`.
    pub require_verified_driver: bool,
}

impl Default for TripPolicy {
    fn default() -> Self {
        Self {
            conflict_window: Duration::hours(2),
            min_seats: 1,
            max_seats: 7,
            min_price: Decimal::new(50, 0),
            require_verified_driver: false,
        }
    }
}

#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn LedgerStore>,
    notifier: Arc<dyn Notifier>,
    retry: RetryPolicy,
    policy: TripPolicy,
}

impl Ledger {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        notifier: Arc<dyn Notifier>,
        retry: RetryPolicy,
        policy: TripPolicy,
    ) -> Self {
        Self {
            store,
            notifier,
            retry,
            policy,
        }
    }

    pub fn policy(&self) -> &TripPolicy {
        &self.policy
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    // Уведомления не критичны: ошибка доставки логируется, операция уже закоммичена
    async fn notify(&self, recipients: Vec<i64>, event: LedgerEvent) {
        for recipient_id in recipients {
            let notification = Notification {
                recipient_id,
                event: event.clone(),
            };
            if let Err(e) = self.notifier.publish(&notification).await {
                warn!(recipient_id, error = %e, "failed to publish notification");
            }
        }
    }
}
