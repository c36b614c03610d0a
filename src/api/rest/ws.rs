use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use futures::SinkExt;
use futures::StreamExt;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

/// Live tracking stream for one delivery. The topic closes when the
/// delivery reaches a terminal status; subscribers drain what is buffered
/// and the socket ends.
pub async fn delivery_ws_handler(
    ws: WebSocketUpgrade,
    Path(delivery_id): Path<Uuid>,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    if state.deliveries.get(&delivery_id).is_none() {
        return Err(AppError::NotFound(format!(
            "delivery {delivery_id} not found"
        )));
    }
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, delivery_id)))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, delivery_id: Uuid) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = BroadcastStream::new(state.tracking.subscribe(delivery_id));

    state.metrics.tracking_subscribers.inc();
    info!(delivery_id = %delivery_id, "tracking subscriber connected");

    let send_task = tokio::spawn(async move {
        // The stream ends when the delivery's topic closes.
        while let Some(result) = events.next().await {
            let event = match result {
                Ok(event) => event,
                Err(BroadcastStreamRecvError::Lagged(missed)) => {
                    // Slow consumer: the buffer dropped its oldest events,
                    // the stream continues from the newest retained one.
                    warn!(delivery_id = %delivery_id, missed, "subscriber lagging");
                    continue;
                }
            };

            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(err) => {
                    warn!(error = %err, "failed to serialize tracking event for ws");
                    continue;
                }
            };

            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    let recv_task = tokio::spawn(async move {
        while let Some(Ok(_msg)) = receiver.next().await {}
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    state.metrics.tracking_subscribers.dec();
    info!(delivery_id = %delivery_id, "tracking subscriber disconnected");
}
