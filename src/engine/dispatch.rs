use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::engine::queue::{enqueue_dispatch, DispatchRequest};
use crate::engine::scoring::compute_score;
use crate::error::AppError;
use crate::lifecycle::{self, DeliveryTransition};
use crate::models::assignment::{Assignment, DispatchOutcome, ScoreBreakdown};
use crate::models::courier::Courier;
use crate::models::delivery::DeliveryStatus;
use crate::registry::ClaimOutcome;
use crate::state::AppState;

/// Failed claims tolerated within one assign call before giving up.
pub const MAX_CLAIM_ATTEMPTS: u32 = 3;

/// Candidate discovery rounds within one assign call; a fresh round runs
/// only when the previous candidate list is exhausted.
pub const MAX_DISCOVERY_ROUNDS: u32 = 2;

/// Background worker: drains the dispatch queue and assigns each pending
/// delivery, re-queueing with a delay when no courier is available.
pub async fn run_dispatch_engine(
    state: Arc<AppState>,
    mut dispatch_rx: mpsc::Receiver<DispatchRequest>,
) {
    info!("dispatch engine started");

    while let Some(request) = dispatch_rx.recv().await {
        state.metrics.deliveries_in_queue.dec();

        // Cancelled or manually accepted while queued; nothing to do.
        let pending = state
            .deliveries
            .get(&request.delivery_id)
            .is_some_and(|delivery| delivery.status == DeliveryStatus::Pending);
        if !pending {
            debug!(delivery_id = %request.delivery_id, "queued delivery no longer pending; skipping");
            continue;
        }

        let start = Instant::now();
        match assign_with_timeout(&state, request.delivery_id).await {
            Ok(DispatchOutcome::Assigned { assignment }) => {
                observe(&state, start, "assigned");
                info!(
                    delivery_id = %request.delivery_id,
                    courier_id = %assignment.courier_id,
                    score = assignment.score,
                    attempt = request.attempt,
                    "delivery assigned"
                );
            }
            Ok(DispatchOutcome::NoCourierAvailable) => {
                observe(&state, start, "no_courier");
                warn!(
                    delivery_id = %request.delivery_id,
                    attempt = request.attempt,
                    "no courier available; scheduling redispatch"
                );
                schedule_redispatch(state.clone(), request);
            }
            Err(AppError::AlreadyAssigned(_)) => {
                observe(&state, start, "skipped");
                debug!(delivery_id = %request.delivery_id, "delivery taken during dispatch");
            }
            Err(err) => {
                observe(&state, start, "error");
                error!(delivery_id = %request.delivery_id, error = %err, "dispatch failed");
            }
        }
    }

    warn!("dispatch engine stopped: queue channel closed");
}

fn observe(state: &AppState, start: Instant, outcome: &str) {
    let elapsed = start.elapsed().as_secs_f64();
    state
        .metrics
        .dispatch_latency_seconds
        .with_label_values(&[outcome])
        .observe(elapsed);
    state
        .metrics
        .dispatch_total
        .with_label_values(&[outcome])
        .inc();
}

fn schedule_redispatch(state: Arc<AppState>, request: DispatchRequest) {
    tokio::spawn(async move {
        sleep(Duration::from_millis(state.config.redispatch_delay_ms)).await;

        let still_pending = state
            .deliveries
            .get(&request.delivery_id)
            .is_some_and(|delivery| delivery.status == DeliveryStatus::Pending);
        if !still_pending {
            return;
        }
        if let Err(err) = enqueue_dispatch(&state, request.delivery_id, request.attempt + 1).await {
            error!(delivery_id = %request.delivery_id, error = %err, "redispatch enqueue failed");
        }
    });
}

/// `assign_delivery` under the configured dispatch budget. Running out of
/// time is the retryable no-courier outcome, never a failure.
pub async fn assign_with_timeout(
    state: &AppState,
    delivery_id: Uuid,
) -> Result<DispatchOutcome, AppError> {
    let budget = Duration::from_millis(state.config.dispatch_timeout_ms);
    match timeout(budget, assign_delivery(state, delivery_id)).await {
        Ok(result) => result,
        Err(_) => {
            warn!(delivery_id = %delivery_id, "dispatch timed out");
            Ok(DispatchOutcome::NoCourierAvailable)
        }
    }
}

/// Select and claim a courier for a pending delivery.
///
/// Candidates come from the registry sorted by location recency; scoring
/// reorders them best-first, and the stable sort keeps the recency order as
/// the tie-break. A claim lost to a concurrent dispatch moves on to the next
/// candidate; discovery re-runs only when the list is exhausted. Both loops
/// are bounded, and exhausting either yields `NoCourierAvailable`.
pub async fn assign_delivery(
    state: &AppState,
    delivery_id: Uuid,
) -> Result<DispatchOutcome, AppError> {
    let delivery = state
        .deliveries
        .get(&delivery_id)
        .map(|entry| entry.value().clone())
        .ok_or_else(|| AppError::NotFound(format!("delivery {delivery_id} not found")))?;
    if delivery.status != DeliveryStatus::Pending {
        return Err(AppError::AlreadyAssigned(format!(
            "delivery {delivery_id} is {}; dispatch needs a pending delivery",
            delivery.status
        )));
    }

    let now = Utc::now();
    let mut claim_attempts = 0u32;

    for round in 0..MAX_DISCOVERY_ROUNDS {
        if round > 0 {
            tokio::task::yield_now().await;
        }

        let candidates = state
            .registry
            .find_candidates(&delivery.restaurant_location, state.config.search_radius_km);
        if candidates.is_empty() {
            break;
        }

        let mut scored: Vec<(Courier, f64, ScoreBreakdown, f64)> = candidates
            .into_iter()
            .map(|courier| {
                let (score, breakdown, distance_km) =
                    compute_score(&courier, &delivery.restaurant_location, now);
                (courier, score, breakdown, distance_km)
            })
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));

        for (courier, score, breakdown, distance_km) in scored {
            if claim_attempts >= MAX_CLAIM_ATTEMPTS {
                warn!(delivery_id = %delivery_id, "claim attempts exhausted");
                return Ok(DispatchOutcome::NoCourierAvailable);
            }

            // The delivery may have been cancelled or accepted while we were
            // scoring; never commit a claim against a non-pending delivery.
            let still_pending = state
                .deliveries
                .get(&delivery_id)
                .is_some_and(|entry| entry.status == DeliveryStatus::Pending);
            if !still_pending {
                return Err(AppError::AlreadyAssigned(format!(
                    "delivery {delivery_id} left pending during dispatch"
                )));
            }

            claim_attempts += 1;
            match state.registry.try_claim(courier.id) {
                ClaimOutcome::Claimed(claimed) => {
                    let assignment =
                        commit_assignment(state, delivery_id, &claimed, score, breakdown, distance_km)?;
                    return Ok(DispatchOutcome::Assigned { assignment });
                }
                ClaimOutcome::Unavailable => {
                    state.metrics.claim_conflicts_total.inc();
                    debug!(
                        delivery_id = %delivery_id,
                        courier_id = %courier.id,
                        "candidate claimed concurrently; trying next"
                    );
                }
                ClaimOutcome::NotFound => {
                    debug!(courier_id = %courier.id, "candidate no longer registered; trying next");
                }
            }
        }
    }

    Ok(DispatchOutcome::NoCourierAvailable)
}

/// A courier accepting a pending delivery directly, outside the scored
/// selection. Same claim rule as engine dispatch; the recorded assignment
/// carries the score the courier would have had.
pub fn accept_delivery(
    state: &AppState,
    delivery_id: Uuid,
    courier_id: Uuid,
) -> Result<Assignment, AppError> {
    let delivery = state
        .deliveries
        .get(&delivery_id)
        .map(|entry| entry.value().clone())
        .ok_or_else(|| AppError::NotFound(format!("delivery {delivery_id} not found")))?;
    if delivery.status != DeliveryStatus::Pending {
        return Err(AppError::AlreadyAssigned(format!(
            "delivery {delivery_id} is {}; acceptance needs a pending delivery",
            delivery.status
        )));
    }

    let courier = match state.registry.try_claim(courier_id) {
        ClaimOutcome::Claimed(courier) => courier,
        ClaimOutcome::Unavailable => {
            state.metrics.claim_conflicts_total.inc();
            return Err(AppError::ClaimConflict(format!(
                "courier {courier_id} is not available to accept"
            )));
        }
        ClaimOutcome::NotFound => {
            return Err(AppError::NotFound(format!("courier {courier_id} not found")));
        }
    };

    let (score, breakdown, distance_km) =
        compute_score(&courier, &delivery.restaurant_location, Utc::now());
    commit_assignment(state, delivery_id, &courier, score, breakdown, distance_km).map_err(|err| {
        match err {
            AppError::InvalidTransition {
                entity: "delivery",
                from,
                ..
            } => AppError::AlreadyAssigned(format!(
                "delivery {delivery_id} is {from}; acceptance needs a pending delivery"
            )),
            other => other,
        }
    })
}

/// Drive the claimed courier through the assignment transition and record
/// the audit row. A failed transition releases the claim before the error
/// propagates, so a lost race never strands a courier unavailable.
fn commit_assignment(
    state: &AppState,
    delivery_id: Uuid,
    courier: &Courier,
    score: f64,
    score_breakdown: ScoreBreakdown,
    distance_km: f64,
) -> Result<Assignment, AppError> {
    match lifecycle::transition_delivery(
        state,
        delivery_id,
        DeliveryTransition::Assign {
            courier_id: courier.id,
        },
    ) {
        Ok(delivery) => {
            let assignment = Assignment {
                id: Uuid::new_v4(),
                delivery_id,
                courier_id: courier.id,
                score,
                score_breakdown,
                distance_km,
                assigned_at: delivery.assigned_at.unwrap_or_else(Utc::now),
            };
            state.assignments.insert(assignment.id, assignment.clone());
            Ok(assignment)
        }
        Err(err) => {
            if let Err(release_err) = state.registry.release(courier.id) {
                warn!(
                    courier_id = %courier.id,
                    error = %release_err,
                    "release after failed assignment also failed"
                );
            }
            Err(err)
        }
    }
}
