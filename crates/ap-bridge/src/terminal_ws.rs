use std::sync::Arc;
use std::time::Duration;

use ap_session::bridge::{BridgeEvent, ClientMessage, IoBridge};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use uuid::Uuid;

use crate::http_api::ApiState;
use crate::protocol::{parse_text_frame, WsOutgoing};

/// Heartbeat interval for terminal WebSocket connections (30 seconds).
/// Sends a Ping frame to detect half-open TCP connections.
const WS_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// GET /ws/terminal: open a fresh shell for this connection.
///
/// Every connection gets its own session, which immediately becomes the one
/// agent commands run in. The session is destroyed when the socket closes.
pub async fn terminal_ws(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ApiState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_terminal_ws(socket, state))
}

async fn handle_terminal_ws(socket: WebSocket, state: Arc<ApiState>) {
    let connection_id = Uuid::new_v4().to_string();
    let (ws_sender, mut ws_receiver) = socket.split();

    // Shared by the output task and the heartbeat task.
    let ws_sender = Arc::new(tokio::sync::Mutex::new(ws_sender));

    let session = match state
        .registry
        .create_session(&connection_id, state.workspace_root().clone())
    {
        Ok(session) => session,
        Err(e) => {
            tracing::warn!(%connection_id, "terminal session could not be created: {e}");
            let frame = WsOutgoing::Error {
                message: e.to_string(),
            };
            let mut sender = ws_sender.lock().await;
            let _ = sender.send(Message::Text(frame.to_json().into())).await;
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };
    tracing::info!(%connection_id, pid = ?session.process().pid(), "terminal WebSocket connected");

    let bridge = Arc::new(IoBridge::attach(session));

    // Task: shell output -> WS
    let output_bridge = bridge.clone();
    let ws_sender_output = ws_sender.clone();
    let output_task_handle = tokio::spawn(async move {
        while let Some(event) = output_bridge.next_event().await {
            let mut sender = ws_sender_output.lock().await;
            match event {
                BridgeEvent::Output(bytes) => {
                    if sender.send(Message::Binary(bytes.into())).await.is_err() {
                        break;
                    }
                }
                BridgeEvent::Exited(code) => {
                    tracing::info!(code = ?code, "shell exited, closing terminal WebSocket");
                    let frame = WsOutgoing::Exit { code };
                    let _ = sender.send(Message::Text(frame.to_json().into())).await;
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });
    let output_abort = output_task_handle.abort_handle();

    // Task: WS -> shell input / resize
    let input_bridge = bridge.clone();
    let input_task_handle = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            let inbound = match msg {
                Message::Text(text) => parse_text_frame(text.as_str()),
                Message::Binary(data) => ClientMessage::Input(data.to_vec()),
                Message::Close(_) => break,
                _ => continue,
            };
            if let Err(e) = input_bridge.handle_inbound(inbound) {
                // The output task reports the exit and ends the connection.
                tracing::debug!("dropping terminal input: {e}");
            }
        }
    });
    let input_abort = input_task_handle.abort_handle();

    // Task: heartbeat Ping every 30s to detect stale connections.
    let ws_sender_heartbeat = ws_sender.clone();
    let heartbeat_task_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(WS_HEARTBEAT_INTERVAL);
        interval.tick().await;
        loop {
            interval.tick().await;
            if ws_sender_heartbeat
                .lock()
                .await
                .send(Message::Ping(Vec::new().into()))
                .await
                .is_err()
            {
                tracing::debug!("heartbeat ping failed, connection lost");
                break;
            }
        }
    });
    let heartbeat_abort = heartbeat_task_handle.abort_handle();

    // The first task to finish ends the connection.
    tokio::select! {
        _ = output_task_handle => {},
        _ = input_task_handle => {},
        _ = heartbeat_task_handle => {},
    }

    output_abort.abort();
    input_abort.abort();
    heartbeat_abort.abort();

    bridge.detach();
    state.registry.destroy_session(&connection_id);
    tracing::info!(%connection_id, "terminal WebSocket disconnected");
}
