//! WebSocket handler
//!
//! Each connection gets an outbound channel registered in the client
//! registry (so broadcasts reach it) and a read loop that answers JSON-RPC
//! requests, ping frames, and status queries. A malformed frame gets an
//! error event back; it never terminates the connection.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc::UnboundedSender;

use driftwatch_core::{
    CallToolParams, ClientFrame, JsonRpcError, JsonRpcResponse, ServerEvent, ServerInfo,
    SERVER_NAME, SERVER_VERSION,
};

use super::AppState;
use crate::ports;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

fn send_json<T: serde::Serialize>(tx: &UnboundedSender<String>, value: &T) {
    match serde_json::to_string(value) {
        Ok(text) => {
            let _ = tx.send(text);
        }
        Err(e) => tracing::error!("Failed to serialize outbound frame: {}", e),
    }
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();

    let client_id = state.ctx.clients.register(tx.clone());
    tracing::info!(
        "WebSocket client {} connected (total: {})",
        client_id,
        state.ctx.clients.count()
    );

    send_json(
        &tx,
        &ServerEvent::Welcome {
            server_info: ServerInfo {
                name: SERVER_NAME.to_string(),
                version: SERVER_VERSION.to_string(),
                port: Some(state.ctx.port),
            },
            timestamp: Utc::now().to_rfc3339(),
        },
    );

    if let Err(e) = ports::write_status_record(&state.ctx).await {
        tracing::warn!("Failed to update status record: {}", e);
    }

    // Forward queued outbound frames (responses and broadcasts) to the socket
    let forward_task = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => {
                handle_text(&state, &tx, &text).await;
            }
            Message::Close(_) => {
                break;
            }
            _ => {}
        }
    }

    state.ctx.clients.unregister(client_id);
    tracing::info!(
        "WebSocket client {} disconnected (remaining: {})",
        client_id,
        state.ctx.clients.count()
    );
    if let Err(e) = ports::write_status_record(&state.ctx).await {
        tracing::warn!("Failed to update status record: {}", e);
    }

    drop(tx);
    let _ = forward_task.await;
}

async fn handle_text(state: &AppState, tx: &UnboundedSender<String>, text: &str) {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            send_json(
                tx,
                &ServerEvent::Error {
                    error: format!("invalid JSON: {}", e),
                    timestamp: Utc::now().to_rfc3339(),
                },
            );
            return;
        }
    };

    if value.get("jsonrpc").is_some() && value.get("method").is_some() {
        let method = value
            .get("method")
            .and_then(|m| m.as_str())
            .unwrap_or_default()
            .to_string();
        let params = value.get("params").cloned().unwrap_or_else(|| json!({}));

        let Some(id) = value.get("id").and_then(|v| v.as_u64()) else {
            // A request without an id is a notification; nothing to answer
            tracing::debug!("Notification received: {}", method);
            return;
        };

        let response = dispatch_rpc(state, id, &method, params).await;
        send_json(tx, &response);
        return;
    }

    match serde_json::from_value::<ClientFrame>(value) {
        Ok(ClientFrame::Ping { .. }) => {
            send_json(
                tx,
                &ServerEvent::Pong {
                    timestamp: Utc::now().to_rfc3339(),
                    server_port: Some(state.ctx.port),
                },
            );
        }
        Ok(ClientFrame::GetStatus) => {
            send_json(
                tx,
                &ServerEvent::Status {
                    data: json!({
                        "port": state.ctx.port,
                        "clients": state.ctx.clients.count(),
                        "uptime": state.ctx.uptime(),
                        "projectPath": state.ctx.config.project_path.display().to_string(),
                    }),
                    timestamp: Utc::now().to_rfc3339(),
                },
            );
        }
        Err(_) => {
            send_json(
                tx,
                &ServerEvent::Error {
                    error: "unknown message type".to_string(),
                    timestamp: Utc::now().to_rfc3339(),
                },
            );
        }
    }
}

async fn dispatch_rpc(
    state: &AppState,
    id: u64,
    method: &str,
    params: serde_json::Value,
) -> JsonRpcResponse {
    match method {
        "tools/list" => match serde_json::to_value(state.dispatcher.catalog()) {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(e) => JsonRpcResponse::error(id, JsonRpcError::internal_error(e.to_string())),
        },
        "resources/list" => match serde_json::to_value(state.dispatcher.resources()) {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(e) => JsonRpcResponse::error(id, JsonRpcError::internal_error(e.to_string())),
        },
        "tools/call" => {
            let call: CallToolParams = match serde_json::from_value(params) {
                Ok(call) => call,
                Err(e) => {
                    return JsonRpcResponse::error(
                        id,
                        JsonRpcError::invalid_params(format!("tools/call: {}", e)),
                    );
                }
            };
            // Tool failures come back as error-flagged results inside a
            // successful response; JSON-RPC errors are for protocol misuse
            let result = state.dispatcher.invoke(&call.name, call.arguments).await;
            match serde_json::to_value(result) {
                Ok(result) => JsonRpcResponse::success(id, result),
                Err(e) => JsonRpcResponse::error(id, JsonRpcError::internal_error(e.to_string())),
            }
        }
        other => JsonRpcResponse::error(id, JsonRpcError::method_not_found(other)),
    }
}
