//! Subscriber channel transport: one axum websocket connection per
//! client, split into an independent read task (inbound `subscribe` /
//! `unsubscribe` / `ping` frames) and write task (outbound event frames
//! from the client's Hub queue), per the concurrency model's "one read
//! task and one write task per connected subscriber".

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use sim_bus::ClientMessage;
use tracing::debug;

use crate::state::AppState;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let handle = state.hub.register();
    let id = handle.id;
    let mut receiver = handle.receiver;
    let (mut sink, mut stream) = socket.split();

    let write_task = tokio::spawn(async move {
        while let Some(event) = receiver.recv().await {
            let Ok(text) = serde_json::to_string(&event) else {
                continue;
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let hub = state.hub.clone();
    let read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = stream.next().await {
            match msg {
                Message::Text(text) => {
                    match serde_json::from_str::<ClientMessage>(&text) {
                        Ok(client_msg) => hub.handle_client_message(id, client_msg),
                        Err(e) => debug!(client_id = %id, error = %e, "dropping unparseable subscriber frame"),
                    }
                }
                Message::Pong(_) => hub.record_pong(id),
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    let _ = read_task.await;
    write_task.abort();
    state.hub.remove(id);
    debug!(client_id = %id, "subscriber disconnected");
}
