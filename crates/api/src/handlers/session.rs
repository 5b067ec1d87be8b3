//! Worker持久会话：WebSocket上的JSON消息

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tracing::{debug, warn};

use batchhost_coordinator::WorkerCoordinator;

use crate::routes::AppState;

pub async fn worker_session(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path((worker_id, start_time)): Path<(String, i64)>,
) -> Response {
    ws.on_upgrade(move |socket| run_session(socket, state.coordinator, worker_id, start_time))
}

async fn run_session(
    socket: WebSocket,
    coordinator: Arc<WorkerCoordinator>,
    worker_id: String,
    start_time: i64,
) {
    let session = coordinator.open_session(&worker_id, start_time).await;
    let session_id = session.session_id;
    let mut outgoing = session.receiver;
    let (mut sender, mut receiver) = socket.split();

    let send_task = tokio::spawn(async move {
        while let Some(message) = outgoing.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    warn!("无法序列化会话消息: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = receiver.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                coordinator
                    .handle_text_message(&worker_id, text.as_str())
                    .await
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(worker_id = %worker_id, "会话读取失败: {}", e);
                break;
            }
        }
    }

    coordinator.close_session(&worker_id, session_id).await;
    send_task.abort();
}
