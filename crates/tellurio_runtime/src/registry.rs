//! Keyed maps of mirrored entities by server-assigned id, plus the
//! pending-grad-fn bookkeeping for out-of-order delivery.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, RwLock};

use crate::entity::{CallableEntry, ModelHandle, Node, OptimizerHandle, Variable};
use crate::errors::TellurioError;

/// A process-wide keyed map from server id to entity handle.
pub struct Registry<T: Clone> {
    name: &'static str,
    entries: RwLock<HashMap<String, T>>,
}

impl<T: Clone> Registry<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register(&self, id: impl Into<String>, value: T) {
        self.entries.write().await.insert(id.into(), value);
    }

    pub async fn get(&self, id: &str) -> Option<T> {
        self.entries.read().await.get(id).cloned()
    }

    pub async fn require(&self, id: &str) -> Result<T, TellurioError> {
        self.get(id)
            .await
            .ok_or_else(|| TellurioError::lookup(self.name, id))
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.entries.read().await.contains_key(id)
    }
}

struct PendingEntry {
    waiters: Vec<Variable>,
    notify: Arc<Notify>,
}

/// `node_id -> Variables awaiting that node's registration as their grad_fn`.
///
/// A key is present iff it has at least one waiting Variable; the key
/// and every waiter are removed atomically when the node registers.
pub struct PendingGradFnMap {
    entries: RwLock<HashMap<String, PendingEntry>>,
}

impl PendingGradFnMap {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Enqueue `var` to receive `grad_fn` once `node_id` registers.
    pub async fn enqueue(&self, node_id: &str, var: Variable) {
        let mut entries = self.entries.write().await;
        entries
            .entry(node_id.to_string())
            .or_insert_with(|| PendingEntry {
                waiters: Vec::new(),
                notify: Arc::new(Notify::new()),
            })
            .waiters
            .push(var);
    }

    /// Drain every Variable waiting on `node_id`, removing the key.
    /// Wakes any readers blocked on `wait_for` for this key.
    pub async fn drain(&self, node_id: &str) -> Vec<Variable> {
        let mut entries = self.entries.write().await;
        match entries.remove(node_id) {
            Some(entry) => {
                entry.notify.notify_waiters();
                entry.waiters
            }
            None => Vec::new(),
        }
    }

    pub async fn contains(&self, node_id: &str) -> bool {
        self.entries.read().await.contains_key(node_id)
    }

    /// Block until `node_id` is drained or `timeout` elapses.
    pub async fn wait_for(&self, node_id: &str, timeout: Duration) -> Result<(), TellurioError> {
        let notify = {
            let entries = self.entries.read().await;
            match entries.get(node_id) {
                Some(entry) => Arc::clone(&entry.notify),
                None => return Ok(()),
            }
        };
        match tokio::time::timeout(timeout, notify.notified()).await {
            Ok(()) => Ok(()),
            Err(_) => Err(TellurioError::lookup("pending_grad_fn", node_id)),
        }
    }
}

impl Default for PendingGradFnMap {
    fn default() -> Self {
        Self::new()
    }
}

/// The full set of entity registries, owned by the Runtime and shared with
/// every mirrored entity handle it mints.
pub struct EntityRegistries {
    pub variables: Registry<Variable>,
    pub nodes: Registry<Node>,
    pub models: Registry<ModelHandle>,
    pub optimizers: Registry<OptimizerHandle>,
    pub callables: Registry<CallableEntry>,
    pub pending_grad_fn: PendingGradFnMap,
}

impl EntityRegistries {
    pub fn new() -> Self {
        Self {
            variables: Registry::new("variable"),
            nodes: Registry::new("node"),
            models: Registry::new("model"),
            optimizers: Registry::new("optimizer"),
            callables: Registry::new("callable"),
            pending_grad_fn: PendingGradFnMap::new(),
        }
    }
}

impl Default for EntityRegistries {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test(flavor = "current_thread")]
    async fn register_and_get_roundtrip() {
        let registries = EntityRegistries::new();
        let var = Variable::detached(json!("x"), "role", true);
        registries.variables.register("v-1", var.clone()).await;
        let fetched = registries.variables.get("v-1").await.unwrap();
        assert_eq!(fetched.variable_id(), var.variable_id());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn missing_entry_is_lookup_error() {
        let registries = EntityRegistries::new();
        let err = registries.variables.require("missing").await.unwrap_err();
        assert!(matches!(err, TellurioError::LookupError { .. }));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn pending_grad_fn_drains_atomically() {
        let pending = PendingGradFnMap::new();
        let var = Variable::detached(json!("x"), "role", true);
        pending.enqueue("node-1", var).await;
        assert!(pending.contains("node-1").await);
        let waiters = pending.drain("node-1").await;
        assert_eq!(waiters.len(), 1);
        assert!(!pending.contains("node-1").await);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn wait_for_times_out_when_never_drained() {
        let pending = PendingGradFnMap::new();
        let var = Variable::detached(json!("x"), "role", true);
        pending.enqueue("node-1", var).await;
        let result = pending.wait_for("node-1", Duration::from_millis(20)).await;
        assert!(result.is_err());
    }
}
