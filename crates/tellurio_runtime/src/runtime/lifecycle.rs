//! Connection setup, the initial session-id handshake, and the reconnect
//! supervisor.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::errors::TellurioError;
use crate::transport::{TransportConfig, WsTransport};

use super::{dispatch, RuntimeInner};

const HELLO_TIMEOUT: Duration = Duration::from_secs(30);

/// Governs whether the listener reconnects after the socket closes, and
/// with what delay between attempts.
#[derive(Clone, Copy, Debug)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            delay: Duration::from_secs(5),
        }
    }
}

/// Connect, retrying up to `retries` additional times after the first
/// attempt, separated by `delay`. On success, read the initial
/// `result.session_id` frame directly off the fresh receiver before handing
/// it to the dispatcher.
pub(super) async fn connect_with_retries(
    ws_url: &str,
    api_key: &str,
    transport_config: TransportConfig,
    retries: u32,
    delay: Duration,
) -> Result<(WsTransport, mpsc::Receiver<Value>, String), TellurioError> {
    let mut attempt = 0;
    loop {
        match connect_once(ws_url, api_key, transport_config).await {
            Ok(connected) => return Ok(connected),
            Err(err) if attempt < retries => {
                attempt += 1;
                tracing::warn!(
                    %ws_url,
                    attempt,
                    retries,
                    error = %err,
                    "connect attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

async fn connect_once(
    ws_url: &str,
    api_key: &str,
    transport_config: TransportConfig,
) -> Result<(WsTransport, mpsc::Receiver<Value>, String), TellurioError> {
    let mut transport = WsTransport::connect(ws_url, api_key, transport_config).await?;
    let mut read_rx = transport
        .take_read_rx()
        .expect("freshly connected transport always has an unclaimed read receiver");

    let hello = tokio::time::timeout(HELLO_TIMEOUT, read_rx.recv())
        .await
        .map_err(|_| TellurioError::ConnectError {
            url: ws_url.to_string(),
            reason: "timed out waiting for session handshake".to_string(),
        })?
        .ok_or_else(|| TellurioError::ConnectError {
            url: ws_url.to_string(),
            reason: "connection closed before session handshake".to_string(),
        })?;

    let session_id = hello
        .get("result")
        .and_then(|r| r.get("session_id"))
        .and_then(Value::as_str)
        .ok_or_else(|| TellurioError::protocol("handshake frame missing result.session_id"))?
        .to_string();

    Ok((transport, read_rx, session_id))
}

/// Watches the dispatcher task; when it exits (the socket closed), attempts
/// to reconnect with the credential captured at the most recent successful
/// connect, never resetting it to absent. Runs until `shutdown` is called or
/// reconnection is disabled.
pub(super) async fn supervisor_loop(inner: Arc<RuntimeInner>) {
    loop {
        let dispatcher_task = inner.dispatcher_task.lock().await.take();
        if let Some(task) = dispatcher_task {
            let _ = task.await;
        }

        if inner.shutting_down.load(Ordering::SeqCst) {
            return;
        }
        if !inner.reconnect.enabled {
            tracing::warn!("connection lost and reconnection is disabled; runtime is now inert");
            return;
        }

        tokio::time::sleep(inner.reconnect.delay).await;
        if inner.shutting_down.load(Ordering::SeqCst) {
            return;
        }

        let api_key = inner.api_key.lock().await.clone();
        match connect_once(&inner.ws_url, &api_key, inner.transport_config).await {
            Ok((transport, read_rx, session_id)) => {
                tracing::info!(%session_id, "reconnected");
                let write_tx = transport
                    .write_tx()
                    .expect("freshly connected transport always has a write sender");
                inner.write_tx.store(Some(Arc::new(write_tx)));
                *inner.session_id.lock().await = Some(session_id);
                *inner.transport.lock().await = Some(transport);

                let task = tokio::spawn(dispatch::dispatcher_loop(Arc::clone(&inner), read_rx));
                *inner.dispatcher_task.lock().await = Some(task);
            }
            Err(err) => {
                tracing::warn!(error = %err, "reconnect attempt failed, will retry");
                inner.write_tx.store(None);
            }
        }
    }
}

/// Tear the runtime down: stop reconnecting, close the socket, abort the
/// background tasks, and fail every pending waiter.
pub(super) async fn shutdown(inner: &Arc<RuntimeInner>) {
    inner.shutting_down.store(true, Ordering::SeqCst);
    inner.write_tx.store(None);

    if let Some(mut transport) = inner.transport.lock().await.take() {
        transport.terminate_and_join(Duration::from_secs(2)).await;
    }
    if let Some(task) = inner.dispatcher_task.lock().await.take() {
        task.abort();
    }
    if let Some(task) = inner.supervisor_task.lock().await.take() {
        task.abort();
    }

    super::rpc_io::resolve_transport_closed_pending(inner).await;
}
