use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use futures::SinkExt;
use futures::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};
use uuid::Uuid;

use crate::api::rest::identity::actor_from_headers;
use crate::engine::session::TrackingSession;
use crate::error::AppError;
use crate::state::AppState;

/// Live tracking feed for one order. The session is opened (and authorized)
/// before the upgrade so refusals surface as plain HTTP errors.
pub async fn track_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let viewer = actor_from_headers(&headers)?;
    let session = state.coordinator.open_tracking_session(viewer, order_id)?;

    Ok(ws.on_upgrade(move |socket| forward_session(socket, state, session)))
}

async fn forward_session(socket: WebSocket, state: Arc<AppState>, mut session: TrackingSession) {
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            event = session.next_event() => {
                let Some(event) = event else { break };
                let json = match serde_json::to_string(event.as_ref()) {
                    Ok(json) => json,
                    Err(err) => {
                        warn!(error = %err, "failed to serialize tracking event for ws");
                        continue;
                    }
                };

                if sender.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    let _ = sender.close().await;
    state.coordinator.close_tracking_session(session);
}

pub async fn notifications_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_notifications(socket, state))
}

async fn handle_notifications(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut notifications = BroadcastStream::new(state.coordinator.subscribe_notifications());

    info!("notification client connected");

    let send_task = tokio::spawn(async move {
        while let Some(item) = notifications.next().await {
            let notification = match item {
                Ok(notification) => notification,
                Err(err) => {
                    warn!(error = %err, "notification client lagged");
                    continue;
                }
            };

            let json = match serde_json::to_string(&notification) {
                Ok(json) => json,
                Err(err) => {
                    warn!(error = %err, "failed to serialize notification for ws");
                    continue;
                }
            };

            if sender.send(Message::Text(json.into())).await.is_err() {
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

    info!("notification client disconnected");
}
