use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::geo;
use crate::lifecycle;
use crate::models::courier::GeoPoint;
use crate::models::delivery::Delivery;
use crate::models::order::{DeliveryAddress, Order, OrderStatus, PaymentStatus};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders", post(create_order))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/status", post(transition_order))
        .route("/orders/:id/payment", post(update_payment))
        .route("/orders/:id/ready", post(mark_ready))
}

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub customer_id: Uuid,
    pub restaurant_id: Uuid,
    pub delivery_address: DeliveryAddress,
    pub total: f64,
}

#[derive(Deserialize)]
pub struct TransitionOrderRequest {
    pub status: OrderStatus,
    pub reason: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdatePaymentRequest {
    pub status: PaymentStatus,
}

#[derive(Deserialize)]
pub struct MarkReadyRequest {
    pub restaurant_location: GeoPoint,
    pub restaurant_address: String,
}

async fn create_order(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<Json<Order>, AppError> {
    if payload.total <= 0.0 || !payload.total.is_finite() {
        return Err(AppError::BadRequest(format!(
            "order total must be positive, got {}",
            payload.total
        )));
    }
    if payload.delivery_address.street.trim().is_empty() {
        return Err(AppError::BadRequest(
            "delivery address street cannot be empty".to_string(),
        ));
    }
    geo::validate_point(&payload.delivery_address.location)?;

    let now = Utc::now();
    let order = Order {
        id: Uuid::new_v4(),
        customer_id: payload.customer_id,
        restaurant_id: payload.restaurant_id,
        status: OrderStatus::Pending,
        delivery_address: payload.delivery_address,
        total: payload.total,
        payment_status: PaymentStatus::Pending,
        delivery_person_id: None,
        refund_amount: None,
        refund_reason: None,
        created_at: now,
        updated_at: now,
    };

    state.orders.insert(order.id, order.clone());
    Ok(Json(order))
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    let order = state
        .orders
        .get(&id)
        .ok_or_else(|| AppError::NotFound(format!("order {id} not found")))?;

    Ok(Json(order.value().clone()))
}

async fn transition_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<TransitionOrderRequest>,
) -> Result<Json<Order>, AppError> {
    let order = lifecycle::transition_order(&state, id, payload.status, payload.reason)?;
    Ok(Json(order))
}

/// Payment stub: the gateway callback flips the status. Refunds are owned by
/// the cancellation path and cannot be set here.
async fn update_payment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdatePaymentRequest>,
) -> Result<Json<Order>, AppError> {
    if payload.status == PaymentStatus::Refunded {
        return Err(AppError::BadRequest(
            "refunds are issued by cancellation, not the payment stub".to_string(),
        ));
    }

    let mut order = state
        .orders
        .get_mut(&id)
        .ok_or_else(|| AppError::NotFound(format!("order {id} not found")))?;
    order.payment_status = payload.status;
    order.updated_at = Utc::now();
    Ok(Json(order.clone()))
}

/// The order subsystem's "ready for pickup" trigger: creates the delivery
/// and hands it to dispatch.
async fn mark_ready(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<MarkReadyRequest>,
) -> Result<Json<Delivery>, AppError> {
    if payload.restaurant_address.trim().is_empty() {
        return Err(AppError::BadRequest(
            "restaurant address cannot be empty".to_string(),
        ));
    }

    let delivery = lifecycle::mark_ready_for_pickup(
        &state,
        id,
        payload.restaurant_location,
        payload.restaurant_address,
    )
    .await?;
    Ok(Json(delivery))
}
