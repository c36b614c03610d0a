use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::courier::GeoPoint;
use crate::models::delivery::DeliveryStatus;

/// One courier position report. Appended to the delivery trail even when it
/// arrives out of order, so the full history stays auditable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationPing {
    pub courier_id: Uuid,
    pub delivery_id: Option<Uuid>,
    pub location: GeoPoint,
    pub recorded_at: DateTime<Utc>,
}

/// Whether a ping moved state forward or was dropped as out of order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PingOutcome {
    Applied,
    Stale,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Eta {
    pub minutes: u32,
    pub arrival_time: DateTime<Utc>,
}

/// Pushed to every subscriber of a delivery topic on each applied ping and
/// each status transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingEvent {
    pub delivery_id: Uuid,
    pub location: GeoPoint,
    pub status: DeliveryStatus,
    pub eta: Option<Eta>,
    pub recorded_at: DateTime<Utc>,
}

/// Poll-side view for clients without a live push channel.
#[derive(Debug, Clone, Serialize)]
pub struct TrackingSnapshot {
    pub delivery_id: Uuid,
    pub status: DeliveryStatus,
    pub location: Option<GeoPoint>,
    pub eta: Option<Eta>,
    pub last_update: Option<DateTime<Utc>>,
}
