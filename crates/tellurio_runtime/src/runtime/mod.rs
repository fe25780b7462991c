//! The `Runtime`: owns the transport, the pending-request table, and the
//! single generation of background tasks (dispatcher + reconnect
//! supervisor) that every blocking call is marshalled onto.

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use serde_json::Value;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::config::WsEndpoint;
use crate::errors::TellurioError;
use crate::events::JsonRpcId;
use crate::registry::EntityRegistries;
use crate::transport::{TransportConfig, WsTransport};

mod dispatch;
mod handlers;
mod lifecycle;
mod rpc_io;

pub use lifecycle::ReconnectPolicy;

/// Configuration for `Runtime::connect`.
#[derive(Clone)]
pub struct RuntimeConfig {
    pub ws_url: String,
    pub api_key: String,
    pub connect_retries: u32,
    pub connect_retry_delay: Duration,
    pub default_call_timeout: Duration,
    pub reconnect: ReconnectPolicy,
    pub transport: TransportConfig,
}

impl RuntimeConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            ws_url: WsEndpoint::from_env().url(),
            api_key: api_key.into(),
            connect_retries: 3,
            connect_retry_delay: Duration::from_secs(5),
            default_call_timeout: Duration::from_secs(60),
            reconnect: ReconnectPolicy::default(),
            transport: TransportConfig::default(),
        }
    }

    pub fn with_ws_url(mut self, ws_url: impl Into<String>) -> Self {
        self.ws_url = ws_url.into();
        self
    }

    pub fn with_retries(mut self, retries: u32, delay: Duration) -> Self {
        self.connect_retries = retries;
        self.connect_retry_delay = delay;
        self
    }
}

struct RuntimeInner {
    registries: EntityRegistries,
    pending: Mutex<HashMap<JsonRpcId, oneshot::Sender<Value>>>,
    write_tx: ArcSwapOption<tokio::sync::mpsc::Sender<Value>>,
    ws_url: String,
    api_key: Mutex<String>,
    default_timeout: Duration,
    reconnect: ReconnectPolicy,
    transport_config: TransportConfig,
    session_id: Mutex<Option<String>>,
    shutting_down: AtomicBool,
    transport: Mutex<Option<WsTransport>>,
    dispatcher_task: Mutex<Option<JoinHandle<()>>>,
    supervisor_task: Mutex<Option<JoinHandle<()>>>,
}

/// A connected JSON-RPC runtime. Cheap to clone: every clone shares the same
/// socket, pending table, and registries.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    /// Open the WebSocket connection, retrying up to `config.connect_retries`
    /// times, and start the dispatcher and reconnect-supervisor tasks.
    /// Returns the runtime and the `session_id` from the first frame.
    pub async fn connect(config: RuntimeConfig) -> Result<(Self, String), TellurioError> {
        let (transport, read_rx, session_id) = lifecycle::connect_with_retries(
            &config.ws_url,
            &config.api_key,
            config.transport,
            config.connect_retries,
            config.connect_retry_delay,
        )
        .await?;

        let write_tx = transport
            .write_tx()
            .expect("freshly connected transport always has a write sender");

        let inner = Arc::new(RuntimeInner {
            registries: EntityRegistries::new(),
            pending: Mutex::new(HashMap::new()),
            write_tx: ArcSwapOption::new(Some(Arc::new(write_tx))),
            ws_url: config.ws_url.clone(),
            api_key: Mutex::new(config.api_key.clone()),
            default_timeout: config.default_call_timeout,
            reconnect: config.reconnect,
            transport_config: config.transport,
            session_id: Mutex::new(Some(session_id.clone())),
            shutting_down: AtomicBool::new(false),
            transport: Mutex::new(Some(transport)),
            dispatcher_task: Mutex::new(None),
            supervisor_task: Mutex::new(None),
        });

        let dispatcher_task = tokio::spawn(dispatch::dispatcher_loop(Arc::clone(&inner), read_rx));
        *inner.dispatcher_task.lock().await = Some(dispatcher_task);

        let supervisor_task = tokio::spawn(lifecycle::supervisor_loop(Arc::clone(&inner)));
        *inner.supervisor_task.lock().await = Some(supervisor_task);

        Ok((Self { inner }, session_id))
    }

    pub(crate) fn from_inner(inner: Arc<RuntimeInner>) -> Self {
        Self { inner }
    }

    pub fn registries(&self) -> &EntityRegistries {
        &self.inner.registries
    }

    pub fn default_timeout(&self) -> Duration {
        self.inner.default_timeout
    }

    pub async fn session_id(&self) -> Option<String> {
        self.inner.session_id.lock().await.clone()
    }

    /// Count of malformed frames the transport has discarded since it was
    /// established. `None` if there is no live transport (e.g. before the
    /// first connect, or mid-reconnect).
    pub async fn malformed_frame_count(&self) -> Option<u64> {
        self.inner
            .transport
            .lock()
            .await
            .as_ref()
            .map(WsTransport::malformed_frame_count)
    }

    /// Issue a JSON-RPC call with a fresh id and await its response.
    pub async fn call(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, TellurioError> {
        rpc_io::call_raw_inner(&self.inner, method, params, timeout).await
    }

    /// Fire-and-forget notification: no id, no response.
    pub async fn notify(&self, method: &str, params: Value) -> Result<(), TellurioError> {
        rpc_io::notify_raw_inner(&self.inner, method, params).await
    }

    /// Cancel the dispatcher and reconnect supervisor, close the socket, and
    /// fail every outstanding pending call.
    pub async fn close(&self) {
        lifecycle::shutdown(&self.inner).await;
    }

    /// Build a Runtime wired directly to an in-process channel pair instead
    /// of a real socket, with the dispatcher loop already running against
    /// `read_rx`. Used by `crate::testing` and by tests elsewhere in the
    /// workspace that need a Runtime without a live connection.
    #[cfg(any(test, feature = "testing"))]
    pub async fn new_for_testing(
        read_rx: tokio::sync::mpsc::Receiver<Value>,
        write_tx: tokio::sync::mpsc::Sender<Value>,
        default_timeout: Duration,
    ) -> Self {
        let inner = Arc::new(RuntimeInner {
            registries: EntityRegistries::new(),
            pending: Mutex::new(HashMap::new()),
            write_tx: ArcSwapOption::new(Some(Arc::new(write_tx))),
            ws_url: "test://fake".to_string(),
            api_key: Mutex::new(String::new()),
            default_timeout,
            reconnect: ReconnectPolicy {
                enabled: false,
                delay: Duration::from_secs(0),
            },
            transport_config: TransportConfig::default(),
            session_id: Mutex::new(Some("test-session".to_string())),
            shutting_down: AtomicBool::new(false),
            transport: Mutex::new(None),
            dispatcher_task: Mutex::new(None),
            supervisor_task: Mutex::new(None),
        });

        let dispatcher_task = tokio::spawn(dispatch::dispatcher_loop(Arc::clone(&inner), read_rx));
        *inner.dispatcher_task.lock().await = Some(dispatcher_task);

        Self { inner }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_config_defaults_are_sane() {
        let cfg = RuntimeConfig::new("sk-test");
        assert_eq!(cfg.connect_retries, 3);
        assert!(cfg.ws_url.ends_with("/ws/v0/rpc/"));
    }
}
