use chrono::{DateTime, Utc};

use crate::geo::haversine_km;
use crate::models::assignment::ScoreBreakdown;
use crate::models::courier::{Courier, GeoPoint};

/// Points a courier standing at the restaurant door earns from proximity.
pub const DISTANCE_SCORE_MAX: f64 = 50.0;

/// Proximity points lost per kilometre; zeroes out at the 10 km search
/// radius, so distance never rewards couriers outside it.
pub const DISTANCE_PENALTY_PER_KM: f64 = 5.0;

/// Scales the 0-5 rating onto 0-30 points.
pub const RATING_SCORE_MULTIPLIER: f64 = 6.0;

/// Points for a location reported this minute; decays per minute of silence
/// and zeroes out after twenty.
pub const RECENCY_SCORE_MAX: f64 = 20.0;

/// Score a candidate against a pickup point: proximity plus reputation plus
/// freshness of their last known position. Also returns the pickup distance
/// so the caller does not recompute it.
pub fn compute_score(
    courier: &Courier,
    pickup: &GeoPoint,
    now: DateTime<Utc>,
) -> (f64, ScoreBreakdown, f64) {
    let distance_km = haversine_km(&courier.location, pickup);

    let breakdown = ScoreBreakdown {
        distance_score: distance_score(distance_km),
        rating_score: rating_score(courier.rating),
        recency_score: recency_score(courier.minutes_since_location_update(now)),
    };

    let score = breakdown.distance_score + breakdown.rating_score + breakdown.recency_score;
    (score, breakdown, distance_km)
}

fn distance_score(distance_km: f64) -> f64 {
    (DISTANCE_SCORE_MAX - distance_km * DISTANCE_PENALTY_PER_KM).max(0.0)
}

fn rating_score(rating: f64) -> f64 {
    rating.clamp(0.0, 5.0) * RATING_SCORE_MULTIPLIER
}

fn recency_score(minutes_since_update: f64) -> f64 {
    (RECENCY_SCORE_MAX - minutes_since_update).max(0.0)
}
