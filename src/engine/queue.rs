use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

/// One unit of work for the dispatch engine. `attempt` counts how many times
/// this delivery has been through the queue, for log context.
#[derive(Debug, Clone, Copy)]
pub struct DispatchRequest {
    pub delivery_id: Uuid,
    pub attempt: u32,
}

pub async fn enqueue_dispatch(
    state: &AppState,
    delivery_id: Uuid,
    attempt: u32,
) -> Result<(), AppError> {
    state
        .dispatch_tx
        .send(DispatchRequest {
            delivery_id,
            attempt,
        })
        .await
        .map_err(|err| AppError::Internal(format!("dispatch queue send failed: {err}")))?;

    state.metrics.deliveries_in_queue.inc();
    Ok(())
}
