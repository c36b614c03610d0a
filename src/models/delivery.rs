use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::courier::GeoPoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Assigned,
    PickedUp,
    InTransit,
    Delivered,
    Cancelled,
}

impl DeliveryStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, DeliveryStatus::Delivered | DeliveryStatus::Cancelled)
    }

    /// A delivery that has a courier on the road: location pings against it
    /// re-estimate the ETA and fan out to subscribers.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            DeliveryStatus::Assigned | DeliveryStatus::PickedUp | DeliveryStatus::InTransit
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Assigned => "assigned",
            DeliveryStatus::PickedUp => "picked_up",
            DeliveryStatus::InTransit => "in_transit",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The fulfillment record for a single order, created when the order reaches
/// `ready_for_pickup` and driven through the status lifecycle by dispatch and
/// courier transitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delivery {
    pub id: Uuid,
    pub order_id: Uuid,
    pub restaurant_id: Uuid,
    pub restaurant_location: GeoPoint,
    pub restaurant_address: String,
    pub customer_id: Uuid,
    pub customer_location: GeoPoint,
    pub customer_address: String,
    pub courier_id: Option<Uuid>,
    pub status: DeliveryStatus,
    /// Restaurant-to-customer leg, fixed at creation.
    pub distance_km: f64,
    /// Initial estimate at creation (restaurant-to-customer plus the dispatch
    /// buffer); never recomputed.
    pub estimated_minutes: u32,
    /// Live estimate, recomputed from the latest applied ping.
    pub current_eta_minutes: Option<u32>,
    pub current_eta_at: Option<DateTime<Utc>>,
    pub delivery_fee: f64,
    pub driver_earnings: f64,
    pub created_at: DateTime<Utc>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub picked_up_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    /// Wall-clock minutes from assignment to hand-over, set on delivery.
    pub actual_minutes: Option<i64>,
    /// Timestamp of the latest ping applied to this delivery; older pings are
    /// dropped from ETA recomputation and publication.
    pub last_ping_at: Option<DateTime<Utc>>,
    pub rating: Option<f64>,
    pub feedback: Option<String>,
}

impl Delivery {
    /// Destination of the courier's current leg: the restaurant until the
    /// order is picked up, the customer afterwards.
    pub fn current_destination(&self) -> GeoPoint {
        match self.status {
            DeliveryStatus::Pending | DeliveryStatus::Assigned => self.restaurant_location,
            _ => self.customer_location,
        }
    }
}
