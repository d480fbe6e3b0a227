use config::ConfigError;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::services::{RetryPolicy, TripPolicy};

// Главная структура конфигурации - контейнер для всех настроек
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    pub ledger: LedgerConfig,
    pub policy: PolicyConfig,
}

// Настройки приложения
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub rust_log: String,
}

// Настройки базы данных
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_size: u32,
    pub acquire_timeout_secs: u64,
}

// Redis нужен только для рассылки уведомлений; без url события идут в локальный канал
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RedisConfig {
    pub url: Option<String>,
    #[serde(default = "default_channel")]
    pub channel: String,
}

fn default_channel() -> String {
    "myroute:notifications".to_string()
}

// Блокировки и повторы транзакций
#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    pub lock_timeout_ms: u64,
    pub retry_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

impl LedgerConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_attempts.max(1),
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
        }
    }
}

// Бизнес-константы поездок
#[derive(Debug, Clone, Deserialize)]
pub struct PolicyConfig {
    pub conflict_window_hours: i64,
    pub min_seats: i32,
    pub max_seats: i32,
    pub min_price: Decimal,
    #[serde(default)]
    pub require_verified_driver: bool,
}

impl PolicyConfig {
    /// Проверяет значения и переводит их в типы рантайма.
    pub fn trip_policy(&self) -> Result<TripPolicy, ConfigError> {
        if self.conflict_window_hours < 0 {
            return Err(ConfigError::Message(
                "policy.conflict_window_hours must not be negative".to_string(),
            ));
        }
        let conflict_window = chrono::Duration::try_hours(self.conflict_window_hours)
            .ok_or_else(|| {
                ConfigError::Message("policy.conflict_window_hours is out of range".to_string())
            })?;
        if self.min_seats < 1 || self.max_seats < self.min_seats {
            return Err(ConfigError::Message(
                "policy seats must satisfy 1 <= min_seats <= max_seats".to_string(),
            ));
        }
        Ok(TripPolicy {
            conflict_window,
            min_seats: self.min_seats,
            max_seats: self.max_seats,
            min_price: self.min_price,
            require_verified_driver: self.require_verified_driver,
        })
    }
}

impl Config {
    /// Значения по умолчанию, затем переменные `MYROUTE__SECTION__KEY`, затем
    /// привычные `DATABASE_URL` / `REDIS_URL` / `PORT` / `RUST_LOG`.
    pub fn load() -> Result<Self, ConfigError> {
        let config: Config = config::Config::builder()
            .set_default("app.host", "0.0.0.0")?
            .set_default("app.port", 8000_i64)?
            .set_default("app.rust_log", "myroute_ledger=debug,tower_http=debug")?
            .set_default("database.pool_size", 20_i64)?
            .set_default("database.acquire_timeout_secs", 5_i64)?
            .set_default("redis.channel", default_channel())?
            .set_default("ledger.lock_timeout_ms", 2000_i64)?
            .set_default("ledger.retry_attempts", 3_i64)?
            .set_default("ledger.retry_base_delay_ms", 50_i64)?
            .set_default("ledger.retry_max_delay_ms", 500_i64)?
            .set_default("policy.conflict_window_hours", 2_i64)?
            .set_default("policy.min_seats", 1_i64)?
            .set_default("policy.max_seats", 7_i64)?
            .set_default("policy.min_price", "50")?
            .set_default("policy.require_verified_driver", false)?
            .add_source(
                config::Environment::with_prefix("MYROUTE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("database.url", env::var("DATABASE_URL").ok())?
            .set_override_option("redis.url", env::var("REDIS_URL").ok())?
            .set_override_option("app.port", env::var("PORT").ok())?
            .set_override_option("app.rust_log", env::var("RUST_LOG").ok())?
            .build()?
            .try_deserialize()?;

        // Невалидная политика должна ронять старт, а не отключать проверки
        config.policy.trip_policy()?;
        Ok(config)
    }
}
