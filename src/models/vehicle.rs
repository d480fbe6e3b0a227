use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: i64,
    pub driver_id: i64,
    pub brand: String,
    pub model: String,
    pub license_plate: String,
    pub seat_capacity: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewVehicle {
    pub driver_id: i64,
    pub brand: String,
    pub model: String,
    pub license_plate: String,
    pub seat_capacity: i32,
}
