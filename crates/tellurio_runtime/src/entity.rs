//! Mirrored entities: Variable/Parameter, Node, Model handle, Optimizer
//! handle, and Callable entry.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde_json::Value;
use uuid::Uuid;

use crate::errors::TellurioError;
use crate::runtime::Runtime;
use crate::state::{allow_grad_fn_assignment, grad_fn_assignment_allowed, is_suppressed};

const GRAD_FN_WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// A vertex in the backward graph. Cheap to clone; identity is the
/// `node_id`.
#[derive(Clone)]
pub struct Node(Arc<Mutex<NodeInner>>);

struct NodeInner {
    node_id: String,
    name: String,
    next_functions: Vec<GradientEdge>,
}

#[derive(Clone)]
pub struct GradientEdge {
    pub node: Option<Node>,
    pub output_nr: u64,
}

impl Node {
    pub fn new(node_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self(Arc::new(Mutex::new(NodeInner {
            node_id: node_id.into(),
            name: name.into(),
            next_functions: Vec::new(),
        })))
    }

    fn lock(&self) -> MutexGuard<'_, NodeInner> {
        self.0.lock().expect("node mutex poisoned")
    }

    pub fn node_id(&self) -> String {
        self.lock().node_id.clone()
    }

    pub fn name(&self) -> String {
        self.lock().name.clone()
    }

    pub fn next_functions(&self) -> Vec<GradientEdge> {
        self.lock().next_functions.clone()
    }

    /// Append-only: the server appends edges to the forward graph via
    /// `create_edge`.
    pub fn push_edge(&self, edge: GradientEdge) {
        self.lock().next_functions.push(edge);
    }
}

/// Inner mutable state of a Variable. All governed-attribute writes funnel
/// through `Variable`'s methods so the suppression/gate discipline and the
/// invariants are enforced in one place.
struct VariableInner {
    variable_id: Option<String>,
    data: Value,
    role: String,
    requires_grad: bool,
    grad: Vec<Variable>,
    output_nr: u64,
    grad_fn: Option<Node>,
    is_leaf: bool,
    retain_grad: bool,
    pending_grad: bool,
    pending_data: bool,
    pending_grad_fn_id: Option<String>,
    is_parameter: bool,
}

/// A mirrored Variable in the textual autodiff graph. Cheap to clone: all
/// clones share the same underlying state and the same server identity.
#[derive(Clone)]
pub struct Variable {
    inner: Arc<Mutex<VariableInner>>,
    runtime: Option<Runtime>,
}

impl Variable {
    /// Construct a Variable with no server identity and no attached
    /// runtime. Used for tests and for decoding where the runtime link is
    /// attached afterward via `attach_runtime`.
    pub fn detached(data: Value, role: impl Into<String>, requires_grad: bool) -> Self {
        Self {
            inner: Arc::new(Mutex::new(VariableInner {
                variable_id: None,
                data,
                role: role.into(),
                requires_grad,
                grad: Vec::new(),
                output_nr: 0,
                grad_fn: None,
                is_leaf: true,
                retain_grad: false,
                pending_grad: false,
                pending_data: false,
                pending_grad_fn_id: None,
                is_parameter: false,
            })),
            runtime: None,
        }
    }

    /// Construct and register a new Variable on the server, adopting the
    /// id the server returns. This is the path user code exercises when it
    /// writes `Variable::new(...)`.
    pub async fn new(
        runtime: &Runtime,
        data: Value,
        role: impl Into<String>,
        requires_grad: bool,
    ) -> Result<Self, TellurioError> {
        Self::create(runtime, data, role, requires_grad, false).await
    }

    /// Same as `new`, but tags the entity as a Parameter on the wire.
    pub async fn new_parameter(
        runtime: &Runtime,
        data: Value,
        role: impl Into<String>,
    ) -> Result<Self, TellurioError> {
        Self::create(runtime, data, role, true, true).await
    }

    async fn create(
        runtime: &Runtime,
        data: Value,
        role: impl Into<String>,
        requires_grad: bool,
        is_parameter: bool,
    ) -> Result<Self, TellurioError> {
        let role = role.into();
        let method = if is_parameter {
            "create_parameter"
        } else {
            "create_variable"
        };
        let params = serde_json::json!({
            "data": data,
            "role": role,
            "requires_grad": requires_grad,
        });
        let response = runtime.call(method, params, runtime.default_timeout()).await?;
        let variable_id = response
            .get("result")
            .and_then(|r| r.get("variable_id"))
            .and_then(Value::as_str)
            .ok_or_else(|| TellurioError::protocol("create_variable: missing variable_id"))?
            .to_string();

        let var = Self {
            inner: Arc::new(Mutex::new(VariableInner {
                variable_id: Some(variable_id.clone()),
                data,
                role,
                requires_grad,
                grad: Vec::new(),
                output_nr: 0,
                grad_fn: None,
                is_leaf: true,
                retain_grad: false,
                pending_grad: false,
                pending_data: false,
                pending_grad_fn_id: None,
                is_parameter,
            })),
            runtime: Some(runtime.clone()),
        };
        runtime
            .registries()
            .variables
            .register(variable_id, var.clone())
            .await;
        Ok(var)
    }

    fn lock(&self) -> MutexGuard<'_, VariableInner> {
        self.inner.lock().expect("variable mutex poisoned")
    }

    pub fn attach_runtime(&mut self, runtime: Runtime) {
        self.runtime = Some(runtime);
    }

    pub fn variable_id(&self) -> Option<String> {
        self.lock().variable_id.clone()
    }

    pub fn set_variable_id(&self, id: impl Into<String>) {
        self.lock().variable_id = Some(id.into());
    }

    pub fn is_parameter(&self) -> bool {
        self.lock().is_parameter
    }

    pub fn mark_parameter(&self) {
        self.lock().is_parameter = true;
    }

    pub fn data(&self) -> Value {
        self.lock().data.clone()
    }

    pub fn role(&self) -> String {
        self.lock().role.clone()
    }

    pub fn requires_grad(&self) -> bool {
        self.lock().requires_grad
    }

    pub fn grad(&self) -> Vec<Variable> {
        self.lock().grad.clone()
    }

    pub fn output_nr(&self) -> u64 {
        self.lock().output_nr
    }

    pub fn is_leaf(&self) -> bool {
        self.lock().is_leaf
    }

    pub fn retain_grad_flag(&self) -> bool {
        self.lock().retain_grad
    }

    pub fn pending_grad(&self) -> bool {
        self.lock().pending_grad
    }

    pub fn pending_data(&self) -> bool {
        self.lock().pending_data
    }

    pub fn pending_grad_fn_id(&self) -> Option<String> {
        self.lock().pending_grad_fn_id.clone()
    }

    pub fn set_pending_grad_fn_id(&self, id: Option<String>) {
        self.lock().pending_grad_fn_id = id;
    }

    /// Read `grad_fn`, waiting up to a bounded timeout if this Variable is
    /// still enqueued in the pending-grad-fn map.
    pub async fn grad_fn(&self) -> Result<Option<Node>, TellurioError> {
        let pending_id = self.pending_grad_fn_id();
        if let (Some(node_id), Some(runtime)) = (&pending_id, &self.runtime) {
            runtime
                .registries()
                .pending_grad_fn
                .wait_for(node_id, GRAD_FN_WAIT_TIMEOUT)
                .await?;
        }
        Ok(self.lock().grad_fn.clone())
    }

    pub fn grad_fn_sync(&self) -> Option<Node> {
        self.lock().grad_fn.clone()
    }

    /// Set `grad_fn`. Only permitted inside an `allow_grad_fn_assignment`
    /// scope; never forwarded to the server regardless of suppression,
    /// since by construction this path only runs for server-originated
    /// updates.
    pub fn set_grad_fn(&self, node: Option<Node>) -> Result<(), TellurioError> {
        if !grad_fn_assignment_allowed() {
            return Err(TellurioError::invariant(
                "setting grad_fn is only allowed on the server",
            ));
        }
        let mut inner = self.lock();
        inner.is_leaf = node.is_none();
        inner.grad_fn = node;
        inner.pending_grad_fn_id = None;
        Ok(())
    }

    async fn emit_update(&self, field: &str, value: Value) -> Result<(), TellurioError> {
        let Some(runtime) = &self.runtime else {
            return Ok(());
        };
        let variable_id = self
            .variable_id()
            .ok_or_else(|| TellurioError::invariant("cannot emit update before variable_id is set"))?;
        let params = serde_json::json!({
            "variable_id": variable_id,
            "field": field,
            "value": value,
        });
        let response = runtime
            .call("update_variable", params, runtime.default_timeout())
            .await?;
        let ok = response
            .get("result")
            .and_then(|r| r.get("message"))
            .and_then(Value::as_str)
            == Some("Ok");
        if !ok {
            return Err(TellurioError::protocol(format!(
                "update_variable({field}) did not return Ok"
            )));
        }
        Ok(())
    }

    async fn governed_write<F>(&self, field: &'static str, value: Value, apply_local: F) -> Result<(), TellurioError>
    where
        F: FnOnce(&mut VariableInner),
    {
        apply_local(&mut self.lock());
        if is_suppressed() {
            return Ok(());
        }
        self.emit_update(field, value).await
    }

    pub async fn set_data(&self, value: Value) -> Result<(), TellurioError> {
        let wire = value.clone();
        self.governed_write("data", wire, |inner| inner.data = value)
            .await
    }

    pub async fn set_role(&self, role: impl Into<String>) -> Result<(), TellurioError> {
        let role = role.into();
        let wire = Value::String(role.clone());
        self.governed_write("role", wire, |inner| inner.role = role)
            .await
    }

    pub async fn set_requires_grad(&self, flag: bool) -> Result<(), TellurioError> {
        self.governed_write("requires_grad", Value::Bool(flag), |inner| {
            inner.requires_grad = flag;
            if !flag {
                inner.grad.clear();
                inner.grad_fn = None;
                inner.is_leaf = true;
            }
        })
        .await
    }

    /// `requires_grad_(flag)`: assigns `requires_grad` and, if `flag` is
    /// false, also resets `is_leaf` true — two emissions, in that order.
    pub async fn requires_grad_(&self, flag: bool) -> Result<(), TellurioError> {
        self.set_requires_grad(flag).await?;
        if !flag {
            self.governed_write("is_leaf", Value::Bool(true), |inner| inner.is_leaf = true)
                .await?;
        }
        Ok(())
    }

    pub async fn set_output_nr(&self, output_nr: u64) -> Result<(), TellurioError> {
        self.governed_write(
            "output_nr",
            Value::from(output_nr),
            |inner| inner.output_nr = output_nr,
        )
        .await
    }

    pub async fn set_is_leaf(&self, is_leaf: bool) -> Result<(), TellurioError> {
        self.governed_write("is_leaf", Value::Bool(is_leaf), |inner| {
            inner.is_leaf = is_leaf
        })
        .await
    }

    /// `retain_grad()`: fails for leaves; for non-leaves sets
    /// `_retain_grad = true` with a single emission.
    pub async fn retain_grad(&self) -> Result<(), TellurioError> {
        if self.is_leaf() {
            return Err(TellurioError::invariant(
                "retain_grad() cannot be called on a leaf Variable",
            ));
        }
        self.governed_write("_retain_grad", Value::Bool(true), |inner| {
            inner.retain_grad = true
        })
        .await
    }

    /// `copy_(src)`: emits three updates (data, role, requires_grad) in
    /// order.
    pub async fn copy_(&self, src: &Variable) -> Result<(), TellurioError> {
        self.set_data(src.data()).await?;
        self.set_role(src.role()).await?;
        self.set_requires_grad(src.requires_grad()).await?;
        Ok(())
    }

    /// `append_grad(g)`: a Parameter may never appear as a gradient entry.
    pub async fn append_grad(&self, grad: Variable) -> Result<(), TellurioError> {
        if grad.is_parameter() {
            return Err(TellurioError::invariant(
                "a Parameter may not be appended to a Variable's grad",
            ));
        }
        let grad_for_wire = grad.clone();
        self.governed_write_async(move |inner| inner.grad.push(grad.clone()), || {
            tag_variable(&grad_for_wire)
        })
        .await
    }

    /// Helper for writes whose wire value depends on encoding another
    /// entity (only `append_grad` needs this today).
    async fn governed_write_async<F, W>(&self, apply_local: F, wire: W) -> Result<(), TellurioError>
    where
        F: FnOnce(&mut VariableInner),
        W: FnOnce() -> Value,
    {
        apply_local(&mut self.lock());
        if is_suppressed() {
            return Ok(());
        }
        let value = wire();
        self.emit_update("grad", value).await
    }

    /// Server-originated mirror of `append_grad`: reconstructs the
    /// gradient Variable from its dict form and appends it locally without
    /// emitting, under suppression.
    pub fn append_grad_local(&self, grad: Variable) {
        self.lock().grad.push(grad);
    }

    /// Server-originated field update, used by the `update_variable`
    /// inbound handler. Must be called under a suppression scope by the
    /// caller.
    pub fn update_local_field(&self, field: &str, value: &Value) -> Result<(), TellurioError> {
        let mut inner = self.lock();
        match field {
            "data" => inner.data = value.clone(),
            "role" => {
                inner.role = value
                    .as_str()
                    .ok_or_else(|| TellurioError::type_error("role", "expected string"))?
                    .to_string()
            }
            "requires_grad" => {
                inner.requires_grad = value
                    .as_bool()
                    .ok_or_else(|| TellurioError::type_error("requires_grad", "expected bool"))?
            }
            "output_nr" => {
                inner.output_nr = value
                    .as_u64()
                    .ok_or_else(|| TellurioError::type_error("output_nr", "expected u64"))?
            }
            "is_leaf" => {
                inner.is_leaf = value
                    .as_bool()
                    .ok_or_else(|| TellurioError::type_error("is_leaf", "expected bool"))?
            }
            "_retain_grad" => {
                inner.retain_grad = value
                    .as_bool()
                    .ok_or_else(|| TellurioError::type_error("_retain_grad", "expected bool"))?
            }
            other => {
                return Err(TellurioError::protocol(format!(
                    "unknown governed field: {other}"
                )))
            }
        }
        Ok(())
    }

    pub fn set_pending_grad(&self, flag: bool) {
        self.lock().pending_grad = flag;
    }

    pub fn set_pending_data(&self, flag: bool) {
        self.lock().pending_data = flag;
    }

    /// Clear accumulated gradients locally, without emitting an update.
    /// Used by an optimizer's `zero_grad()`, which tells the server
    /// separately via its own RPC.
    pub fn clear_grad_local(&self) {
        self.lock().grad.clear();
    }
}

/// Handle to a server-registered LM model client. No state is mirrored
/// beyond identity.
#[derive(Clone)]
pub struct ModelHandle {
    model_id: String,
    options: Value,
}

impl ModelHandle {
    pub fn new(model_id: impl Into<String>, options: Value) -> Self {
        Self {
            model_id: model_id.into(),
            options,
        }
    }

    /// Register a new chat-completion model client on the server, adopting
    /// the id it returns. Mirrors `Variable::new`'s create-then-adopt
    /// lifecycle.
    pub async fn create(runtime: &Runtime, options: Value) -> Result<Self, TellurioError> {
        let response = runtime
            .call("create_model_client", options.clone(), runtime.default_timeout())
            .await?;
        let model_id = response
            .get("result")
            .and_then(|r| r.get("model_id"))
            .and_then(Value::as_str)
            .ok_or_else(|| TellurioError::protocol("create_model_client: missing model_id"))?
            .to_string();
        let handle = Self::new(model_id.clone(), options);
        runtime.registries().models.register(model_id, handle.clone()).await;
        Ok(handle)
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn options(&self) -> &Value {
        &self.options
    }
}

/// Handle to a server-registered optimizer (e.g. TGD).
#[derive(Clone)]
pub struct OptimizerHandle {
    optimizer_id: String,
    params: Vec<Variable>,
    model: Option<ModelHandle>,
    defaults: Value,
}

impl OptimizerHandle {
    pub fn new(
        optimizer_id: impl Into<String>,
        params: Vec<Variable>,
        model: Option<ModelHandle>,
        defaults: Value,
    ) -> Self {
        Self {
            optimizer_id: optimizer_id.into(),
            params,
            model,
            defaults,
        }
    }

    pub fn optimizer_id(&self) -> &str {
        &self.optimizer_id
    }

    pub fn params(&self) -> &[Variable] {
        &self.params
    }

    pub fn model(&self) -> Option<&ModelHandle> {
        self.model.as_ref()
    }

    pub fn defaults(&self) -> &Value {
        &self.defaults
    }
}

/// A callable registered under a freshly minted id so the server may
/// later invoke it via a reverse RPC. The reverse-call wire shape is
/// reserved and not fixed by this crate.
#[derive(Clone)]
pub struct CallableEntry {
    callable_id: String,
}

impl CallableEntry {
    pub fn new_with_fresh_id() -> Self {
        Self {
            callable_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn callable_id(&self) -> &str {
        &self.callable_id
    }
}

/// Tag a Variable/Parameter handle in its short wire form
/// (`{"__variable__":true,"variable_id":…}` or the `__parameter__`
/// equivalent). Used wherever an already-identified entity is referenced
/// rather than fully re-serialized.
pub fn tag_variable(var: &Variable) -> Value {
    let tag = if var.is_parameter() {
        "__parameter__"
    } else {
        "__variable__"
    };
    serde_json::json!({
        tag: true,
        "variable_id": var.variable_id(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_variable_is_leaf_with_no_grad_fn() {
        let v = Variable::detached(json!("abc"), "role", true);
        assert!(v.is_leaf());
        assert!(v.grad_fn_sync().is_none());
    }

    #[test]
    fn grad_fn_assignment_requires_gate() {
        let v = Variable::detached(json!("abc"), "role", true);
        let node = Node::new("n1", "AddBackward");
        let err = v.set_grad_fn(Some(node)).unwrap_err();
        assert!(matches!(err, TellurioError::InvariantError { .. }));
    }

    #[test]
    fn grad_fn_assignment_succeeds_under_gate() {
        let v = Variable::detached(json!("abc"), "role", true);
        let node = Node::new("n1", "AddBackward");
        let _guard = allow_grad_fn_assignment();
        v.set_grad_fn(Some(node)).unwrap();
        assert!(!v.is_leaf());
        assert!(v.grad_fn_sync().is_some());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn requires_grad_false_clears_grad_and_grad_fn() {
        let v = Variable::detached(json!("abc"), "role", true);
        {
            let _guard = allow_grad_fn_assignment();
            v.set_grad_fn(Some(Node::new("n1", "AddBackward"))).unwrap();
        }
        v.append_grad_local(Variable::detached(json!("g"), "grad", false));
        assert!(!v.grad().is_empty());
        assert!(!v.is_leaf());

        let _suppress = crate::state::suppress_variable_notifications();
        v.set_requires_grad(false).await.unwrap();
        assert!(v.grad().is_empty());
        assert!(v.grad_fn_sync().is_none());
        assert!(v.is_leaf());
    }
}
