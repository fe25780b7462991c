//! Listener loop: classifies inbound frames and routes them to pending
//! waiters or to the server-initiated handler table.

use serde_json::Value;
use tokio::sync::mpsc;

use crate::events::{classify_message, JsonRpcId, MsgKind};
use crate::rpc::{build_ack_error, build_ack_result, extract_id, extract_method, extract_params};
use crate::state::suppress_variable_notifications;

use std::sync::Arc;

use super::handlers;
use super::RuntimeInner;

/// Drain `read_rx` until the channel closes (the transport disconnected or
/// was dropped), dispatching each frame to the right place.
pub(super) async fn dispatcher_loop(inner: Arc<RuntimeInner>, mut read_rx: mpsc::Receiver<Value>) {
    while let Some(frame) = read_rx.recv().await {
        match classify_message(&frame) {
            MsgKind::Response => route_response(&inner, frame).await,
            MsgKind::ServerRequest => route_server_request(&inner, frame).await,
            MsgKind::Notification => {
                tracing::trace!(method = ?extract_method(&frame), "ignoring notification");
            }
            MsgKind::Malformed => {
                tracing::warn!(frame = %frame, "dropping malformed frame");
            }
        }
    }
    super::rpc_io::resolve_transport_closed_pending(&inner).await;
}

async fn route_response(inner: &RuntimeInner, frame: Value) {
    let Some(id_value) = extract_id(&frame) else {
        tracing::warn!("response frame missing id");
        return;
    };
    let id = match value_to_jsonrpc_id(&id_value) {
        Some(id) => id,
        None => {
            tracing::warn!(id = %id_value, "response id is neither string nor number");
            return;
        }
    };
    let waiter = inner.pending.lock().await.remove(&id);
    match waiter {
        Some(tx) => {
            let _ = tx.send(frame);
        }
        None => {
            tracing::trace!(%id, "response for unknown or already-resolved id");
        }
    }
}

async fn route_server_request(inner: &Arc<RuntimeInner>, frame: Value) {
    let id = extract_id(&frame).unwrap_or(Value::Null);
    let method = extract_method(&frame).unwrap_or_default().to_string();
    let params = extract_params(&frame);

    let _suppress = suppress_variable_notifications();
    let outcome = handlers::dispatch(Arc::clone(inner), &method, params).await;

    let ack = match outcome {
        Ok(result) => build_ack_result(&id, result),
        Err(err) => build_ack_error(&id, -32000, err.to_string()),
    };

    if let Some(write_tx) = inner.write_tx.load().as_ref().cloned() {
        if write_tx.send(ack).await.is_err() {
            tracing::warn!(%method, "failed to send ack: writer task stopped");
        }
    }
}

fn value_to_jsonrpc_id(value: &Value) -> Option<JsonRpcId> {
    match value {
        Value::String(s) => Some(JsonRpcId::Text(s.clone())),
        Value::Number(n) => n.as_i64().map(JsonRpcId::Number),
        _ => None,
    }
}
