//! Real-time check stream over WebSocket and Server-Sent Events.
//!
//! Both transports register with the broadcast hub on connect and receive
//! every message published while they stay connected.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
};
use futures_util::{SinkExt, Stream, StreamExt};
use tracing::{debug, error, info, warn};

use medpred_core::HubMessage;

use crate::state::AppState;

/// WebSocket upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Forward hub messages to one socket until either side goes away.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let mut subscription = state.hub.subscribe().await;
    let connection_id = subscription.id.clone();
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            outgoing = subscription.receiver.recv() => {
                let Some(message) = outgoing else { break };
                let json = match serde_json::to_string(&message) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!(connection_id = %connection_id, error = %e, "Failed to encode message");
                        continue;
                    }
                };
                if sender.send(Message::Text(json)).await.is_err() {
                    debug!(connection_id = %connection_id, "WebSocket send failed");
                    break;
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    // Pings are answered by the protocol layer.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!(connection_id = %connection_id, error = %e, "WebSocket error");
                        break;
                    }
                }
            }
        }
    }

    state.hub.unsubscribe(&connection_id).await;
    info!(connection_id = %connection_id, "WebSocket connection ended");
}

/// Server-Sent Events stream of hub messages.
///
/// The SSE event name is the message kind; the data is the same JSON frame
/// WebSocket clients receive. The client leaves the hub when the response
/// body is dropped.
pub async fn sse_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = state
        .hub
        .subscribe()
        .await
        .into_stream(state.hub.clone())
        .map(|message| Ok(to_sse_event(&message)));
    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn to_sse_event(message: &HubMessage) -> Event {
    match serde_json::to_string(message) {
        Ok(json) => Event::default().event(message.kind()).data(json),
        Err(e) => {
            warn!(error = %e, "Failed to encode message");
            Event::default().comment("encoding failed")
        }
    }
}
