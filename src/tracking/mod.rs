use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::error::AppError;
use crate::geo;
use crate::models::courier::GeoPoint;
use crate::models::delivery::Delivery;
use crate::models::tracking::{Eta, LocationPing, PingOutcome, TrackingEvent, TrackingSnapshot};
use crate::state::AppState;

/// Pings retained per delivery for trail reconstruction; older entries fall
/// off the front.
pub const PING_TRAIL_CAP: usize = 512;

/// Fan-out hub for live delivery updates: one broadcast topic per delivery,
/// plus the append-only ping trail behind the audit endpoint.
///
/// Topics are created lazily on first subscription and closed by the
/// lifecycle once a delivery reaches a terminal status. A subscriber that
/// cannot keep up lags on its own receiver and loses the oldest buffered
/// events; nothing here ever blocks on a slow consumer.
pub struct TrackingHub {
    topics: DashMap<Uuid, broadcast::Sender<TrackingEvent>>,
    trails: DashMap<Uuid, VecDeque<LocationPing>>,
    buffer_size: usize,
}

impl TrackingHub {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            topics: DashMap::new(),
            trails: DashMap::new(),
            buffer_size: buffer_size.max(1),
        }
    }

    /// Attach to a delivery's topic. Dropping the receiver unsubscribes;
    /// dropping it twice is nobody's problem, which makes unsubscribe
    /// idempotent for free.
    pub fn subscribe(&self, delivery_id: Uuid) -> broadcast::Receiver<TrackingEvent> {
        self.topics
            .entry(delivery_id)
            .or_insert_with(|| broadcast::channel(self.buffer_size).0)
            .subscribe()
    }

    /// Deliver an event to every current subscriber of the delivery's topic.
    /// No topic or no subscribers means nobody is watching; the event is
    /// dropped silently.
    pub fn publish(&self, event: TrackingEvent) {
        if let Some(topic) = self.topics.get(&event.delivery_id) {
            let _ = topic.send(event);
        }
    }

    /// Tear down the topic after a terminal transition; subscribers drain
    /// what is buffered and then see their stream end.
    pub fn close_topic(&self, delivery_id: Uuid) {
        self.topics.remove(&delivery_id);
    }

    pub fn subscriber_count(&self, delivery_id: Uuid) -> usize {
        self.topics
            .get(&delivery_id)
            .map_or(0, |topic| topic.receiver_count())
    }

    /// Append a ping to the delivery trail. Stale pings land here too; the
    /// trail is the audit surface, not the live view.
    pub fn record_ping(&self, delivery_id: Uuid, ping: LocationPing) {
        let mut trail = self.trails.entry(delivery_id).or_default();
        if trail.len() >= PING_TRAIL_CAP {
            trail.pop_front();
        }
        trail.push_back(ping);
    }

    pub fn trail(&self, delivery_id: Uuid) -> Vec<LocationPing> {
        self.trails
            .get(&delivery_id)
            .map(|trail| trail.iter().cloned().collect())
            .unwrap_or_default()
    }
}

/// Ingest one courier position report.
///
/// Updates the registry (last-write-wins) and appends to the delivery trail.
/// When the ping belongs to an active delivery and is not stale, it also
/// recomputes the ETA against the leg's current destination and publishes to
/// the delivery topic. The ETA update and the publish happen under the
/// delivery's entry guard, so subscribers observe events in ping-timestamp
/// order.
///
/// A ping carrying a delivery id is validated against that delivery before
/// anything mutates: the delivery must exist and the pinging courier must be
/// its assigned one. Anyone else's ping is rejected outright rather than
/// half-applied.
pub async fn ingest(
    state: &AppState,
    courier_id: Uuid,
    location: GeoPoint,
    recorded_at: DateTime<Utc>,
    delivery_id: Option<Uuid>,
) -> Result<PingOutcome, AppError> {
    if let Err(err) = geo::validate_point(&location) {
        state.metrics.pings_total.with_label_values(&["invalid"]).inc();
        return Err(err);
    }

    let Some(delivery_id) = delivery_id else {
        let outcome = state
            .registry
            .update_location(courier_id, location, recorded_at)?;
        return Ok(count_outcome(state, outcome));
    };

    let mut delivery = state.deliveries.get_mut(&delivery_id).ok_or_else(|| {
        AppError::NotFound(format!("delivery {delivery_id} not found for ping"))
    })?;

    if delivery.courier_id != Some(courier_id) {
        state.metrics.pings_total.with_label_values(&["invalid"]).inc();
        return Err(AppError::BadRequest(format!(
            "courier {courier_id} is not assigned to delivery {delivery_id}"
        )));
    }

    let registry_outcome = state
        .registry
        .update_location(courier_id, location, recorded_at)?;

    state.tracking.record_ping(
        delivery_id,
        LocationPing {
            courier_id,
            delivery_id: Some(delivery_id),
            location,
            recorded_at,
        },
    );

    if registry_outcome == PingOutcome::Stale {
        return Ok(count_outcome(state, PingOutcome::Stale));
    }

    if !delivery.status.is_active() {
        debug!(
            delivery_id = %delivery_id,
            status = %delivery.status,
            "ping for inactive delivery; location stored, nothing published"
        );
        return Ok(count_outcome(state, PingOutcome::Applied));
    }

    // The registry guard is per courier; this one is per delivery, so a
    // courier reassigned to a new delivery cannot smuggle an older ping
    // past the new delivery's history.
    if delivery.last_ping_at.is_some_and(|last| recorded_at <= last) {
        return Ok(count_outcome(state, PingOutcome::Stale));
    }
    delivery.last_ping_at = Some(recorded_at);

    let destination = delivery.current_destination();
    let leg_km = geo::haversine_km(&location, &destination);
    let minutes = geo::estimate_minutes(leg_km, state.config.avg_speed_kmh, geo::REROUTE_BUFFER_MIN);
    let eta = Eta {
        minutes,
        arrival_time: Utc::now() + Duration::minutes(i64::from(minutes)),
    };
    delivery.current_eta_minutes = Some(minutes);
    delivery.current_eta_at = Some(eta.arrival_time);

    state.tracking.publish(TrackingEvent {
        delivery_id,
        location,
        status: delivery.status,
        eta: Some(eta),
        recorded_at,
    });

    debug!(
        delivery_id = %delivery_id,
        courier_id = %courier_id,
        eta_minutes = minutes,
        "ping applied and published"
    );
    Ok(count_outcome(state, PingOutcome::Applied))
}

fn count_outcome(state: &AppState, outcome: PingOutcome) -> PingOutcome {
    let label = match outcome {
        PingOutcome::Applied => "applied",
        PingOutcome::Stale => "stale",
    };
    state.metrics.pings_total.with_label_values(&[label]).inc();
    outcome
}

/// Poll-side fallback for clients without a live stream: the last known
/// location, status and ETA in the same shape the push events use.
pub fn snapshot(state: &AppState, delivery_id: Uuid) -> Result<TrackingSnapshot, AppError> {
    let delivery = state
        .deliveries
        .get(&delivery_id)
        .map(|entry| entry.value().clone())
        .ok_or_else(|| AppError::NotFound(format!("delivery {delivery_id} not found")))?;

    let location = delivery
        .courier_id
        .and_then(|id| state.registry.get(id))
        .map(|courier| courier.location);

    let eta = match (delivery.current_eta_minutes, delivery.current_eta_at) {
        (Some(minutes), Some(arrival_time)) => Some(Eta {
            minutes,
            arrival_time,
        }),
        _ => None,
    };

    let last_update = [
        delivery.last_ping_at,
        delivery.delivered_at,
        delivery.cancelled_at,
        delivery.picked_up_at,
        delivery.assigned_at,
        Some(delivery.created_at),
    ]
    .into_iter()
    .flatten()
    .max();

    Ok(TrackingSnapshot {
        delivery_id,
        status: delivery.status,
        location,
        eta,
        last_update,
    })
}

/// Fan a status change out to the delivery's subscribers. The event carries
/// the courier's last known position, falling back to the restaurant before
/// anyone is en route.
pub fn publish_status(state: &AppState, delivery: &Delivery) {
    let location = delivery
        .courier_id
        .and_then(|id| state.registry.get(id))
        .map_or(delivery.restaurant_location, |courier| courier.location);

    let eta = match (delivery.current_eta_minutes, delivery.current_eta_at) {
        (Some(minutes), Some(arrival_time)) => Some(Eta {
            minutes,
            arrival_time,
        }),
        _ => None,
    };

    state.tracking.publish(TrackingEvent {
        delivery_id: delivery.id,
        location,
        status: delivery.status,
        eta,
        recorded_at: Utc::now(),
    });
}
