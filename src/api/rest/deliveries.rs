use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::dispatch::{accept_delivery, assign_with_timeout};
use crate::error::AppError;
use crate::lifecycle::{self, DeliveryTransition};
use crate::models::assignment::{Assignment, DispatchOutcome};
use crate::models::delivery::{Delivery, DeliveryStatus};
use crate::models::tracking::{LocationPing, TrackingSnapshot};
use crate::state::AppState;
use crate::tracking;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/deliveries", get(list_deliveries))
        .route("/deliveries/:id", get(get_delivery))
        .route("/deliveries/:id/dispatch", post(dispatch_delivery))
        .route("/deliveries/:id/accept", post(accept))
        .route("/deliveries/:id/status", post(transition_delivery))
        .route("/deliveries/:id/rating", post(rate_delivery))
        .route("/deliveries/:id/tracking", get(tracking_snapshot))
        .route("/deliveries/:id/pings", get(ping_trail))
        .route("/assignments", get(list_assignments))
}

#[derive(Deserialize)]
pub struct AcceptRequest {
    pub courier_id: Uuid,
}

#[derive(Deserialize)]
pub struct TransitionDeliveryRequest {
    pub status: DeliveryStatus,
    pub reason: Option<String>,
}

#[derive(Deserialize)]
pub struct RateRequest {
    pub rating: f64,
    pub feedback: Option<String>,
}

async fn list_deliveries(State(state): State<Arc<AppState>>) -> Json<Vec<Delivery>> {
    let deliveries = state
        .deliveries
        .iter()
        .map(|entry| entry.value().clone())
        .collect();
    Json(deliveries)
}

async fn get_delivery(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Delivery>, AppError> {
    let delivery = state
        .deliveries
        .get(&id)
        .ok_or_else(|| AppError::NotFound(format!("delivery {id} not found")))?;

    Ok(Json(delivery.value().clone()))
}

/// Kick a dispatch round for a pending delivery, outside the background
/// queue. `no_courier_available` is a 200 with a discriminated body; the
/// caller schedules its own retry.
async fn dispatch_delivery(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DispatchOutcome>, AppError> {
    let outcome = assign_with_timeout(&state, id).await?;
    Ok(Json(outcome))
}

async fn accept(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<AcceptRequest>,
) -> Result<Json<Assignment>, AppError> {
    let assignment = accept_delivery(&state, id, payload.courier_id)?;
    Ok(Json(assignment))
}

/// Courier-driven status changes. Assignment is not requestable here; it
/// only happens through dispatch or acceptance.
async fn transition_delivery(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<TransitionDeliveryRequest>,
) -> Result<Json<Delivery>, AppError> {
    let transition = match payload.status {
        DeliveryStatus::PickedUp => DeliveryTransition::PickUp,
        DeliveryStatus::InTransit => DeliveryTransition::StartTransit,
        DeliveryStatus::Delivered => DeliveryTransition::Deliver,
        DeliveryStatus::Cancelled => DeliveryTransition::Cancel {
            reason: payload
                .reason
                .unwrap_or_else(|| "delivery cancelled".to_string()),
        },
        DeliveryStatus::Assigned => {
            return Err(AppError::BadRequest(
                "assignment goes through dispatch or accept".to_string(),
            ));
        }
        DeliveryStatus::Pending => {
            return Err(AppError::BadRequest(
                "deliveries start out pending; there is no transition back".to_string(),
            ));
        }
    };

    let delivery = lifecycle::transition_delivery(&state, id, transition)?;
    Ok(Json(delivery))
}

async fn rate_delivery(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<RateRequest>,
) -> Result<Json<Delivery>, AppError> {
    let delivery = lifecycle::rate_delivery(&state, id, payload.rating, payload.feedback)?;
    Ok(Json(delivery))
}

/// Poll fallback for clients without a live stream.
async fn tracking_snapshot(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<TrackingSnapshot>, AppError> {
    let snapshot = tracking::snapshot(&state, id)?;
    Ok(Json(snapshot))
}

async fn ping_trail(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<LocationPing>>, AppError> {
    if state.deliveries.get(&id).is_none() {
        return Err(AppError::NotFound(format!("delivery {id} not found")));
    }
    Ok(Json(state.tracking.trail(id)))
}

async fn list_assignments(State(state): State<Arc<AppState>>) -> Json<Vec<Assignment>> {
    let assignments = state
        .assignments
        .iter()
        .map(|entry| entry.value().clone())
        .collect();

    Json(assignments)
}
