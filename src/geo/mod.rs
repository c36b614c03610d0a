use crate::error::AppError;
use crate::models::courier::GeoPoint;

const EARTH_RADIUS_KM: f64 = 6_371.0;

/// Assumed courier speed when none is configured.
pub const DEFAULT_AVG_SPEED_KMH: f64 = 20.0;

/// ETA slack added at dispatch time, covering pickup and drop-off handling.
pub const DISPATCH_BUFFER_MIN: u32 = 10;

/// ETA slack added when re-estimating mid-route from a location ping.
pub const REROUTE_BUFFER_MIN: u32 = 5;

/// Rejects NaN and out-of-range coordinates before they reach any store.
pub fn validate_point(p: &GeoPoint) -> Result<(), AppError> {
    if !p.lat.is_finite() || !p.lng.is_finite() {
        return Err(AppError::InvalidCoordinates(format!(
            "coordinates must be finite numbers, got ({}, {})",
            p.lat, p.lng
        )));
    }
    if !(-90.0..=90.0).contains(&p.lat) {
        return Err(AppError::InvalidCoordinates(format!(
            "latitude {} outside [-90, 90]",
            p.lat
        )));
    }
    if !(-180.0..=180.0).contains(&p.lng) {
        return Err(AppError::InvalidCoordinates(format!(
            "longitude {} outside [-180, 180]",
            p.lng
        )));
    }
    Ok(())
}

pub fn haversine_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lng = (b.lng - a.lng).to_radians();

    let sin_lat = (delta_lat / 2.0).sin();
    let sin_lng = (delta_lng / 2.0).sin();

    let haversine = sin_lat * sin_lat + lat1.cos() * lat2.cos() * sin_lng * sin_lng;
    let central_angle = 2.0 * haversine.sqrt().asin();

    EARTH_RADIUS_KM * central_angle
}

/// Travel-time estimate: distance at `avg_speed_kmh`, rounded up to whole
/// minutes, plus a handling buffer.
pub fn estimate_minutes(distance_km: f64, avg_speed_kmh: f64, buffer_min: u32) -> u32 {
    let speed = if avg_speed_kmh > 0.0 {
        avg_speed_kmh
    } else {
        DEFAULT_AVG_SPEED_KMH
    };
    (distance_km.max(0.0) / speed * 60.0).ceil() as u32 + buffer_min
}
