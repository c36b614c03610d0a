use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::geo;
use crate::models::courier::{Courier, GeoPoint, VehicleType};
use crate::models::earnings::EarningsSummary;
use crate::models::tracking::PingOutcome;
use crate::state::AppState;
use crate::tracking;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/couriers", post(register_courier).get(list_couriers))
        .route("/couriers/:id", get(get_courier))
        .route("/couriers/:id/availability", patch(set_availability))
        .route("/couriers/:id/active", patch(set_active))
        .route("/couriers/:id/ping", post(ping))
        .route("/couriers/:id/earnings", get(earnings))
}

#[derive(Deserialize)]
pub struct RegisterCourierRequest {
    pub name: String,
    pub phone: String,
    pub vehicle: VehicleType,
    pub location: GeoPoint,
    pub rating: Option<f64>,
}

#[derive(Deserialize)]
pub struct SetAvailabilityRequest {
    pub is_available: bool,
}

#[derive(Deserialize)]
pub struct SetActiveRequest {
    pub is_active: bool,
}

#[derive(Deserialize)]
pub struct PingRequest {
    pub location: GeoPoint,
    /// Client-side capture time; couriers replaying queued pings send it so
    /// stale ones can be detected. Server time when absent.
    pub recorded_at: Option<DateTime<Utc>>,
    pub delivery_id: Option<Uuid>,
}

#[derive(Serialize)]
pub struct PingResponse {
    pub outcome: PingOutcome,
}

#[derive(Deserialize)]
pub struct EarningsQuery {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

async fn register_courier(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterCourierRequest>,
) -> Result<Json<Courier>, AppError> {
    if payload.name.trim().is_empty() {
        return Err(AppError::BadRequest("name cannot be empty".to_string()));
    }
    if payload.phone.trim().is_empty() {
        return Err(AppError::BadRequest("phone cannot be empty".to_string()));
    }
    geo::validate_point(&payload.location)?;

    let courier = Courier {
        id: Uuid::new_v4(),
        name: payload.name,
        phone: payload.phone,
        vehicle: payload.vehicle,
        location: payload.location,
        is_available: true,
        is_active: true,
        rating: payload.rating.unwrap_or(5.0).clamp(0.0, 5.0),
        total_ratings: 0,
        last_location_update: Utc::now(),
    };

    state.registry.register(courier.clone());
    Ok(Json(courier))
}

async fn list_couriers(State(state): State<Arc<AppState>>) -> Json<Vec<Courier>> {
    Json(state.registry.list())
}

async fn get_courier(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Courier>, AppError> {
    state
        .registry
        .get(id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("courier {id} not found")))
}

async fn set_availability(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<SetAvailabilityRequest>,
) -> Result<Json<Courier>, AppError> {
    let courier = state.registry.set_availability(id, payload.is_available)?;
    Ok(Json(courier))
}

async fn set_active(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<SetActiveRequest>,
) -> Result<Json<Courier>, AppError> {
    let courier = state.registry.set_active(id, payload.is_active)?;
    Ok(Json(courier))
}

async fn ping(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<PingRequest>,
) -> Result<Json<PingResponse>, AppError> {
    let recorded_at = payload.recorded_at.unwrap_or_else(Utc::now);
    let outcome = tracking::ingest(
        &state,
        id,
        payload.location,
        recorded_at,
        payload.delivery_id,
    )
    .await?;
    Ok(Json(PingResponse { outcome }))
}

async fn earnings(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<EarningsQuery>,
) -> Result<Json<EarningsSummary>, AppError> {
    if state.registry.get(id).is_none() {
        return Err(AppError::NotFound(format!("courier {id} not found")));
    }

    let to = query.to.unwrap_or_else(|| Utc::now().date_naive());
    let from = query.from.unwrap_or(to);
    if from > to {
        return Err(AppError::BadRequest(format!(
            "earnings range starts after it ends: {from} > {to}"
        )));
    }

    Ok(Json(state.earnings.summarize(id, from, to)))
}
