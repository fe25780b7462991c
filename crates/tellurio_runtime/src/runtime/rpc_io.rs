//! Request/response correlation over the pending table.

use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::timeout;

use crate::errors::{map_rpc_error, RpcErrorObject, TellurioError};
use crate::rpc::{build_notification, build_request};

use super::RuntimeInner;

pub(super) async fn call_raw_inner(
    inner: &RuntimeInner,
    method: &str,
    params: Value,
    call_timeout: Duration,
) -> Result<Value, TellurioError> {
    let (id, frame) = build_request(method, params);
    let (tx, rx) = oneshot::channel();

    {
        let mut pending = inner.pending.lock().await;
        pending.insert(id.clone(), tx);
    }

    let write_tx = inner
        .write_tx
        .load()
        .as_ref()
        .cloned()
        .ok_or_else(|| TellurioError::ConnectError {
            url: inner.ws_url.clone(),
            reason: "transport is not connected".to_string(),
        })?;

    if write_tx.send(frame).await.is_err() {
        inner.pending.lock().await.remove(&id);
        return Err(TellurioError::ConnectError {
            url: inner.ws_url.clone(),
            reason: "writer task has stopped".to_string(),
        });
    }

    match timeout(call_timeout, rx).await {
        Ok(Ok(response)) => {
            if let Some(err_value) = response.get("error") {
                let err_obj: RpcErrorObject =
                    serde_json::from_value(err_value.clone()).map_err(|_| {
                        TellurioError::protocol(format!(
                            "{method}: malformed error object {err_value}"
                        ))
                    })?;
                return Err(map_rpc_error(&err_obj));
            }
            Ok(response)
        }
        Ok(Err(_canceled)) => Err(TellurioError::ConnectError {
            url: inner.ws_url.clone(),
            reason: "connection closed before response arrived".to_string(),
        }),
        Err(_elapsed) => {
            inner.pending.lock().await.remove(&id);
            Err(TellurioError::TimeoutError {
                method: method.to_string(),
                id: id.to_string(),
            })
        }
    }
}

pub(super) async fn notify_raw_inner(
    inner: &RuntimeInner,
    method: &str,
    params: Value,
) -> Result<(), TellurioError> {
    let frame = build_notification(method, params);
    let write_tx = inner
        .write_tx
        .load()
        .as_ref()
        .cloned()
        .ok_or_else(|| TellurioError::ConnectError {
            url: inner.ws_url.clone(),
            reason: "transport is not connected".to_string(),
        })?;
    write_tx
        .send(frame)
        .await
        .map_err(|_| TellurioError::ConnectError {
            url: inner.ws_url.clone(),
            reason: "writer task has stopped".to_string(),
        })
}

/// Drain the pending table on transport close, failing every outstanding
/// waiter rather than leaving it to time out.
pub(super) async fn resolve_transport_closed_pending(inner: &RuntimeInner) {
    let mut pending = inner.pending.lock().await;
    for (_, tx) in pending.drain() {
        let _ = tx.send(serde_json::json!({
            "error": { "code": -32000, "message": "transport closed" }
        }));
    }
}
