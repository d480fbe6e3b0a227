use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "user_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Passenger,
    Driver,
}

// Проверка документов водителя оператором
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "verification_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    #[default]
    NotVerified,
    Pending,
    Approved,
    Rejected,
}

// Пользователь бота; average_rating и rating_count пересчитываются только внутри rate()
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub telegram_id: i64,
    pub name: String,
    pub phone_number: Option<String>,
    pub role: Option<UserRole>,
    pub verification_status: VerificationStatus,
    pub average_rating: f64,
    pub rating_count: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub telegram_id: i64,
    pub name: String,
    pub phone_number: Option<String>,
    pub role: Option<UserRole>,
}

impl NewUser {
    pub fn new(telegram_id: i64, name: impl Into<String>, role: UserRole) -> Self {
        Self {
            telegram_id,
            name: name.into(),
            phone_number: None,
            role: Some(role),
        }
    }
}

impl User {
    pub fn is_verified(&self) -> bool {
        self.verification_status == VerificationStatus::Approved
    }
}
