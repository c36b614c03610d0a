use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

use crate::error::AppError;
use crate::geo::haversine_km;
use crate::models::courier::{Courier, GeoPoint};
use crate::models::tracking::PingOutcome;

/// Candidate search radius when the caller does not override it.
pub const DEFAULT_SEARCH_RADIUS_KM: f64 = 10.0;

/// Result of an atomic claim attempt on a courier.
#[derive(Debug, Clone)]
pub enum ClaimOutcome {
    /// The courier was available and is now held by the caller.
    Claimed(Courier),
    /// Someone else holds the courier, or they are off shift.
    Unavailable,
    NotFound,
}

/// Single source of truth for courier availability, location and rating.
///
/// All mutation goes through these methods; each one works inside a single
/// map-entry guard, so per-courier updates serialize and a concurrent
/// claim/availability race cannot lose a write.
pub struct CourierRegistry {
    couriers: DashMap<Uuid, Courier>,
}

impl CourierRegistry {
    pub fn new() -> Self {
        Self {
            couriers: DashMap::new(),
        }
    }

    pub fn register(&self, courier: Courier) {
        self.couriers.insert(courier.id, courier);
    }

    pub fn get(&self, id: Uuid) -> Option<Courier> {
        self.couriers.get(&id).map(|entry| entry.value().clone())
    }

    pub fn list(&self) -> Vec<Courier> {
        self.couriers
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.couriers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.couriers.is_empty()
    }

    /// Couriers that are on shift, unclaimed and within `radius_km` of
    /// `origin`, most recently located first. The recency order keeps
    /// downstream tie-breaking stable.
    pub fn find_candidates(&self, origin: &GeoPoint, radius_km: f64) -> Vec<Courier> {
        let mut candidates: Vec<Courier> = self
            .couriers
            .iter()
            .filter_map(|entry| {
                let courier = entry.value();
                let eligible = courier.is_available
                    && courier.is_active
                    && haversine_km(&courier.location, origin) <= radius_km;
                eligible.then(|| courier.clone())
            })
            .collect();

        candidates.sort_by(|a, b| b.last_location_update.cmp(&a.last_location_update));
        candidates
    }

    /// Last-write-wins location update. A timestamp at or before the stored
    /// one is a stale no-op, not an error.
    pub fn update_location(
        &self,
        id: Uuid,
        location: GeoPoint,
        recorded_at: DateTime<Utc>,
    ) -> Result<PingOutcome, AppError> {
        let mut courier = self
            .couriers
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("courier {id} not found")))?;

        if recorded_at <= courier.last_location_update {
            debug!(
                courier_id = %id,
                recorded_at = %recorded_at,
                stored = %courier.last_location_update,
                "stale location update ignored"
            );
            return Ok(PingOutcome::Stale);
        }

        courier.location = location;
        courier.last_location_update = recorded_at;
        Ok(PingOutcome::Applied)
    }

    pub fn set_availability(&self, id: Uuid, is_available: bool) -> Result<Courier, AppError> {
        let mut courier = self
            .couriers
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("courier {id} not found")))?;
        courier.is_available = is_available;
        Ok(courier.clone())
    }

    pub fn set_active(&self, id: Uuid, is_active: bool) -> Result<Courier, AppError> {
        let mut courier = self
            .couriers
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("courier {id} not found")))?;
        courier.is_active = is_active;
        Ok(courier.clone())
    }

    /// Atomically take the courier for a delivery: succeeds only when they
    /// are on shift and unclaimed, flipping `is_available` in the same entry
    /// guard so concurrent dispatchers cannot both win.
    pub fn try_claim(&self, id: Uuid) -> ClaimOutcome {
        let Some(mut courier) = self.couriers.get_mut(&id) else {
            return ClaimOutcome::NotFound;
        };
        if !courier.is_available || !courier.is_active {
            return ClaimOutcome::Unavailable;
        }
        courier.is_available = false;
        ClaimOutcome::Claimed(courier.clone())
    }

    /// Hand the courier back after a delivery completes, is cancelled, or a
    /// claim is aborted. Idempotent.
    pub fn release(&self, id: Uuid) -> Result<(), AppError> {
        let mut courier = self
            .couriers
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("courier {id} not found")))?;
        courier.is_available = true;
        Ok(())
    }

    /// Fold one post-completion rating into the running average.
    pub fn record_rating(&self, id: Uuid, rating: f64) -> Result<Courier, AppError> {
        let mut courier = self
            .couriers
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("courier {id} not found")))?;
        let total = courier.total_ratings as f64;
        courier.rating = (courier.rating * total + rating) / (total + 1.0);
        courier.total_ratings += 1;
        Ok(courier.clone())
    }
}

impl Default for CourierRegistry {
    fn default() -> Self {
        Self::new()
    }
}
