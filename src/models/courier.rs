use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleType {
    Bicycle,
    Motorbike,
    ThreeWheeler,
    Car,
}

/// A delivery-personnel record. Availability and location are owned by the
/// registry; the rating is a running average fed by post-completion ratings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Courier {
    pub id: Uuid,
    pub name: String,
    pub phone: String,
    pub vehicle: VehicleType,
    pub location: GeoPoint,
    /// False while the courier is claimed by an active delivery.
    pub is_available: bool,
    /// False when the courier is off shift; inactive couriers are never
    /// candidates regardless of availability.
    pub is_active: bool,
    pub rating: f64,
    pub total_ratings: u32,
    pub last_location_update: DateTime<Utc>,
}

impl Courier {
    pub fn minutes_since_location_update(&self, now: DateTime<Utc>) -> f64 {
        (now - self.last_location_update).num_seconds().max(0) as f64 / 60.0
    }
}
