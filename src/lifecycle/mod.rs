//! Status lifecycle for the order/delivery pair.
//!
//! Every status change goes through `transition_delivery` or
//! `transition_order`; nothing else writes the status fields. The coupled
//! order update happens while the delivery's entry guard is held, and the
//! delivery is restored from a snapshot if the order side refuses, so a
//! transition and its paired write land together or not at all.
//!
//! Lock order: delivery entry guard, then order or courier entry guard.
//! Nothing in the crate acquires them in reverse.

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::queue::enqueue_dispatch;
use crate::error::AppError;
use crate::geo;
use crate::models::courier::GeoPoint;
use crate::models::delivery::{Delivery, DeliveryStatus};
use crate::models::order::{Order, OrderStatus, PaymentStatus};
use crate::state::AppState;
use crate::tracking;

/// Flat component of the delivery fee.
pub const BASE_DELIVERY_FEE: f64 = 150.0;
/// Per-kilometer component, applied to the restaurant-to-customer leg.
pub const FEE_PER_KM: f64 = 60.0;
/// Share of the delivery fee credited to the courier as earnings.
pub const DRIVER_EARNINGS_SHARE: f64 = 0.75;

pub fn order_allowed_next(status: OrderStatus) -> &'static [OrderStatus] {
    match status {
        OrderStatus::Pending => &[OrderStatus::Confirmed, OrderStatus::Cancelled],
        OrderStatus::Confirmed => &[OrderStatus::Preparing, OrderStatus::Cancelled],
        OrderStatus::Preparing => &[OrderStatus::ReadyForPickup, OrderStatus::Cancelled],
        OrderStatus::ReadyForPickup => &[OrderStatus::OutForDelivery, OrderStatus::Cancelled],
        OrderStatus::OutForDelivery => &[OrderStatus::Delivered, OrderStatus::Cancelled],
        OrderStatus::Delivered | OrderStatus::Cancelled => &[],
    }
}

pub fn delivery_allowed_next(status: DeliveryStatus) -> &'static [DeliveryStatus] {
    match status {
        DeliveryStatus::Pending => &[DeliveryStatus::Assigned, DeliveryStatus::Cancelled],
        DeliveryStatus::Assigned => &[DeliveryStatus::PickedUp, DeliveryStatus::Cancelled],
        DeliveryStatus::PickedUp => &[DeliveryStatus::InTransit, DeliveryStatus::Cancelled],
        DeliveryStatus::InTransit => &[DeliveryStatus::Delivered, DeliveryStatus::Cancelled],
        DeliveryStatus::Delivered | DeliveryStatus::Cancelled => &[],
    }
}

fn invalid_order_transition(from: OrderStatus, requested: OrderStatus) -> AppError {
    AppError::InvalidTransition {
        entity: "order",
        from: from.to_string(),
        requested: requested.to_string(),
        allowed: order_allowed_next(from)
            .iter()
            .map(|status| status.to_string())
            .collect(),
    }
}

fn invalid_delivery_transition(from: DeliveryStatus, requested: DeliveryStatus) -> AppError {
    AppError::InvalidTransition {
        entity: "delivery",
        from: from.to_string(),
        requested: requested.to_string(),
        allowed: delivery_allowed_next(from)
            .iter()
            .map(|status| status.to_string())
            .collect(),
    }
}

/// A requested delivery status change plus the data that rides along with it.
#[derive(Debug, Clone)]
pub enum DeliveryTransition {
    Assign { courier_id: Uuid },
    PickUp,
    StartTransit,
    Deliver,
    Cancel { reason: String },
}

impl DeliveryTransition {
    pub fn target(&self) -> DeliveryStatus {
        match self {
            DeliveryTransition::Assign { .. } => DeliveryStatus::Assigned,
            DeliveryTransition::PickUp => DeliveryStatus::PickedUp,
            DeliveryTransition::StartTransit => DeliveryStatus::InTransit,
            DeliveryTransition::Deliver => DeliveryStatus::Delivered,
            DeliveryTransition::Cancel { .. } => DeliveryStatus::Cancelled,
        }
    }
}

fn round_money(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

/// Apply one delivery transition with its coupled order update and side
/// effects.
///
/// Validation and the field writes for both records happen under the
/// delivery's entry guard; a refusal on the order side restores the delivery
/// snapshot before the error propagates. Side effects that cannot refuse
/// (earnings, courier release, event fan-out) run after both records are
/// committed.
pub fn transition_delivery(
    state: &AppState,
    delivery_id: Uuid,
    transition: DeliveryTransition,
) -> Result<Delivery, AppError> {
    let now = Utc::now();
    let target = transition.target();

    let (before, after) = {
        let mut delivery = state
            .deliveries
            .get_mut(&delivery_id)
            .ok_or_else(|| AppError::NotFound(format!("delivery {delivery_id} not found")))?;

        if !delivery_allowed_next(delivery.status).contains(&target) {
            return Err(invalid_delivery_transition(delivery.status, target));
        }
        let before = delivery.clone();

        match &transition {
            DeliveryTransition::Assign { courier_id } => {
                let courier = state.registry.get(*courier_id).ok_or_else(|| {
                    AppError::NotFound(format!("courier {courier_id} not found"))
                })?;
                delivery.courier_id = Some(*courier_id);
                delivery.status = DeliveryStatus::Assigned;
                delivery.assigned_at = Some(now);

                // ETA at dispatch covers the whole remaining route: courier
                // to restaurant, then the stored restaurant-to-customer leg.
                let remaining_km =
                    geo::haversine_km(&courier.location, &delivery.restaurant_location)
                        + delivery.distance_km;
                let minutes = geo::estimate_minutes(
                    remaining_km,
                    state.config.avg_speed_kmh,
                    geo::DISPATCH_BUFFER_MIN,
                );
                delivery.current_eta_minutes = Some(minutes);
                delivery.current_eta_at = Some(now + Duration::minutes(i64::from(minutes)));
            }
            DeliveryTransition::PickUp => {
                delivery.status = DeliveryStatus::PickedUp;
                delivery.picked_up_at = Some(now);
            }
            DeliveryTransition::StartTransit => {
                delivery.status = DeliveryStatus::InTransit;
            }
            DeliveryTransition::Deliver => {
                delivery.status = DeliveryStatus::Delivered;
                delivery.delivered_at = Some(now);
                delivery.actual_minutes =
                    delivery.assigned_at.map(|at| (now - at).num_minutes());
                delivery.current_eta_minutes = Some(0);
                delivery.current_eta_at = Some(now);
            }
            DeliveryTransition::Cancel { reason } => {
                delivery.status = DeliveryStatus::Cancelled;
                delivery.cancelled_at = Some(now);
                delivery.cancellation_reason = Some(reason.clone());
            }
        }

        if let Err(err) = apply_coupled_order(state, &transition, delivery.order_id, now) {
            *delivery = before;
            return Err(err);
        }

        let after = delivery.clone();
        (before, after)
    };

    match &transition {
        DeliveryTransition::Deliver => {
            if state.earnings.record_completion(&after) {
                state.metrics.earnings_recorded_total.inc();
            }
            if let Some(courier_id) = after.courier_id {
                if let Err(err) = state.registry.release(courier_id) {
                    warn!(courier_id = %courier_id, error = %err, "release after delivery failed");
                }
            }
            state.metrics.active_deliveries.dec();
        }
        DeliveryTransition::Cancel { .. } => {
            if let Some(courier_id) = after.courier_id {
                if let Err(err) = state.registry.release(courier_id) {
                    warn!(courier_id = %courier_id, error = %err, "release after cancellation failed");
                }
            }
            state.metrics.active_deliveries.dec();
        }
        _ => {}
    }

    tracking::publish_status(state, &after);
    if after.status.is_terminal() {
        state.tracking.close_topic(after.id);
    }

    info!(
        delivery_id = %after.id,
        order_id = %after.order_id,
        from = %before.status,
        to = %after.status,
        "delivery transition applied"
    );
    Ok(after)
}

/// The order-side write paired with a delivery transition. `PickUp` and
/// `StartTransit` have no order counterpart; the order is already
/// `out_for_delivery` by then.
fn apply_coupled_order(
    state: &AppState,
    transition: &DeliveryTransition,
    order_id: Uuid,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    let (target, courier_id, reason) = match transition {
        DeliveryTransition::Assign { courier_id } => {
            (OrderStatus::OutForDelivery, Some(*courier_id), None)
        }
        DeliveryTransition::Deliver => (OrderStatus::Delivered, None, None),
        DeliveryTransition::Cancel { reason } => {
            (OrderStatus::Cancelled, None, Some(reason.clone()))
        }
        DeliveryTransition::PickUp | DeliveryTransition::StartTransit => return Ok(()),
    };

    let mut order = state
        .orders
        .get_mut(&order_id)
        .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;

    if !order_allowed_next(order.status).contains(&target) {
        return Err(invalid_order_transition(order.status, target));
    }

    order.status = target;
    order.updated_at = now;
    if let Some(courier_id) = courier_id {
        order.delivery_person_id = Some(courier_id);
    }
    if target == OrderStatus::Cancelled && order.payment_status == PaymentStatus::Completed {
        order.payment_status = PaymentStatus::Refunded;
        order.refund_amount = Some(order.total);
        order.refund_reason = reason;
    }
    Ok(())
}

/// Apply an externally requested order transition.
///
/// `ready_for_pickup` has its own trigger (it creates the delivery), and
/// `out_for_delivery`/`delivered` only ever arrive through the delivery
/// side. Cancellation of an order with a live delivery routes through the
/// delivery cancellation so both records change in one place.
pub fn transition_order(
    state: &AppState,
    order_id: Uuid,
    requested: OrderStatus,
    reason: Option<String>,
) -> Result<Order, AppError> {
    match requested {
        OrderStatus::ReadyForPickup => Err(AppError::BadRequest(
            "ready_for_pickup goes through the ready trigger, which supplies restaurant details"
                .to_string(),
        )),
        OrderStatus::OutForDelivery | OrderStatus::Delivered => Err(AppError::BadRequest(format!(
            "order status {requested} is driven by the delivery lifecycle"
        ))),
        OrderStatus::Cancelled => cancel_order(state, order_id, reason),
        OrderStatus::Pending | OrderStatus::Confirmed | OrderStatus::Preparing => {
            let mut order = state
                .orders
                .get_mut(&order_id)
                .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;
            if !order_allowed_next(order.status).contains(&requested) {
                return Err(invalid_order_transition(order.status, requested));
            }
            order.status = requested;
            order.updated_at = Utc::now();
            Ok(order.clone())
        }
    }
}

fn cancel_order(
    state: &AppState,
    order_id: Uuid,
    reason: Option<String>,
) -> Result<Order, AppError> {
    let reason = reason.unwrap_or_else(|| "order cancelled".to_string());

    let live_delivery = state.deliveries.iter().find_map(|entry| {
        (entry.order_id == order_id && !entry.status.is_terminal()).then_some(entry.id)
    });
    if let Some(delivery_id) = live_delivery {
        transition_delivery(
            state,
            delivery_id,
            DeliveryTransition::Cancel { reason },
        )?;
        return state
            .orders
            .get(&order_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")));
    }

    let mut order = state
        .orders
        .get_mut(&order_id)
        .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;
    if !order_allowed_next(order.status).contains(&OrderStatus::Cancelled) {
        return Err(invalid_order_transition(order.status, OrderStatus::Cancelled));
    }
    order.status = OrderStatus::Cancelled;
    order.updated_at = Utc::now();
    if order.payment_status == PaymentStatus::Completed {
        order.payment_status = PaymentStatus::Refunded;
        order.refund_amount = Some(order.total);
        order.refund_reason = Some(reason);
    }
    Ok(order.clone())
}

/// The ready-for-pickup trigger: flips the order, creates the pending
/// delivery with its fixed distance/fee/estimate, and queues it for
/// dispatch.
pub async fn mark_ready_for_pickup(
    state: &AppState,
    order_id: Uuid,
    restaurant_location: GeoPoint,
    restaurant_address: String,
) -> Result<Delivery, AppError> {
    geo::validate_point(&restaurant_location)?;

    if let Some(existing) = state
        .deliveries
        .iter()
        .find_map(|entry| (entry.order_id == order_id).then_some(entry.id))
    {
        return Err(AppError::AlreadyAssigned(format!(
            "order {order_id} already has delivery {existing}"
        )));
    }

    let now = Utc::now();
    let (restaurant_id, customer_id, customer_location, customer_address) = {
        let mut order = state
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;
        if !order_allowed_next(order.status).contains(&OrderStatus::ReadyForPickup) {
            return Err(invalid_order_transition(order.status, OrderStatus::ReadyForPickup));
        }
        order.status = OrderStatus::ReadyForPickup;
        order.updated_at = now;
        (
            order.restaurant_id,
            order.customer_id,
            order.delivery_address.location,
            order.delivery_address.street.clone(),
        )
    };

    let distance_km = geo::haversine_km(&restaurant_location, &customer_location);
    let delivery_fee = round_money(BASE_DELIVERY_FEE + FEE_PER_KM * distance_km);
    let delivery = Delivery {
        id: Uuid::new_v4(),
        order_id,
        restaurant_id,
        restaurant_location,
        restaurant_address,
        customer_id,
        customer_location,
        customer_address,
        courier_id: None,
        status: DeliveryStatus::Pending,
        distance_km,
        estimated_minutes: geo::estimate_minutes(
            distance_km,
            state.config.avg_speed_kmh,
            geo::DISPATCH_BUFFER_MIN,
        ),
        current_eta_minutes: None,
        current_eta_at: None,
        delivery_fee,
        driver_earnings: round_money(delivery_fee * DRIVER_EARNINGS_SHARE),
        created_at: now,
        assigned_at: None,
        picked_up_at: None,
        delivered_at: None,
        cancelled_at: None,
        cancellation_reason: None,
        actual_minutes: None,
        last_ping_at: None,
        rating: None,
        feedback: None,
    };

    state.deliveries.insert(delivery.id, delivery.clone());
    state.metrics.active_deliveries.inc();
    info!(
        order_id = %order_id,
        delivery_id = %delivery.id,
        distance_km,
        "order ready; delivery queued for dispatch"
    );
    enqueue_dispatch(state, delivery.id, 1).await?;

    Ok(delivery)
}

/// Post-completion rating: stored on the delivery once, folded into the
/// courier's running average.
pub fn rate_delivery(
    state: &AppState,
    delivery_id: Uuid,
    rating: f64,
    feedback: Option<String>,
) -> Result<Delivery, AppError> {
    if !(1.0..=5.0).contains(&rating) {
        return Err(AppError::BadRequest(format!(
            "rating {rating} outside the 1.0 to 5.0 scale"
        )));
    }

    let after = {
        let mut delivery = state
            .deliveries
            .get_mut(&delivery_id)
            .ok_or_else(|| AppError::NotFound(format!("delivery {delivery_id} not found")))?;
        if delivery.status != DeliveryStatus::Delivered {
            return Err(AppError::BadRequest(format!(
                "delivery {delivery_id} is {}; only delivered deliveries take a rating",
                delivery.status
            )));
        }
        if delivery.rating.is_some() {
            return Err(AppError::BadRequest(format!(
                "delivery {delivery_id} is already rated"
            )));
        }
        delivery.rating = Some(rating);
        delivery.feedback = feedback;
        delivery.clone()
    };

    if let Some(courier_id) = after.courier_id {
        if let Err(err) = state.registry.record_rating(courier_id, rating) {
            warn!(
                courier_id = %courier_id,
                error = %err,
                "rating stored on delivery but courier record update failed"
            );
        }
    }
    Ok(after)
}
