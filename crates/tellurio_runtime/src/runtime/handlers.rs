//! Server-initiated request handlers: the inbound half of the duplex.
//!
//! Every handler runs under the `suppress_variable_notifications` scope the
//! dispatcher establishes before calling in, so applying one of these
//! updates never echoes an `update_variable` RPC back at the server.

use std::sync::Arc;

use serde_json::Value;

use crate::entity::{GradientEdge, Node, Variable};
use crate::errors::TellurioError;
use crate::runtime::Runtime;
use crate::state::allow_grad_fn_assignment;
use crate::wire::{decode_value, Decoded};

use super::RuntimeInner;

const OK: &str = "Ok";

pub(super) async fn dispatch(
    inner: Arc<RuntimeInner>,
    method: &str,
    params: Value,
) -> Result<Value, TellurioError> {
    let runtime = Runtime::from_inner(inner);
    match method {
        "update_variable" => update_variable(&runtime, params).await,
        "append_grad" => append_grad(&runtime, params).await,
        "create_node" => create_node(&runtime, params).await,
        "create_edge" => create_edge(&runtime, params).await,
        "clear_pending_grad" => clear_pending_grad(&runtime, params).await,
        "clear_pending_data" => clear_pending_data(&runtime, params).await,
        other => Err(TellurioError::protocol(format!(
            "unknown server-initiated method: {other}"
        ))),
    }
}

fn field_str<'a>(params: &'a Value, key: &str) -> Result<&'a str, TellurioError> {
    params
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| TellurioError::protocol(format!("{key} missing or not a string")))
}

async fn require_variable(runtime: &Runtime, variable_id: &str) -> Result<Variable, TellurioError> {
    runtime.registries().variables.require(variable_id).await
}

async fn update_variable(runtime: &Runtime, params: Value) -> Result<Value, TellurioError> {
    let variable_id = field_str(&params, "variable_id")?;
    let field = field_str(&params, "field")?;
    let value = params
        .get("value")
        .ok_or_else(|| TellurioError::protocol("update_variable missing value"))?;
    let var = require_variable(runtime, variable_id).await?;
    var.update_local_field(field, value)?;
    Ok(ok_response())
}

async fn append_grad(runtime: &Runtime, params: Value) -> Result<Value, TellurioError> {
    let variable_id = field_str(&params, "variable_id")?;
    let grad_payload = params
        .get("grad")
        .ok_or_else(|| TellurioError::protocol("append_grad missing grad"))?;
    let var = require_variable(runtime, variable_id).await?;
    match Box::pin(decode_value(runtime, grad_payload)).await? {
        Decoded::Variable(grad) => {
            var.append_grad_local(grad);
            Ok(ok_response())
        }
        other => Err(TellurioError::type_error(
            describe(&other),
            "append_grad expects a Variable payload",
        )),
    }
}

async fn create_node(runtime: &Runtime, params: Value) -> Result<Value, TellurioError> {
    let node_id = field_str(&params, "node_id")?;
    let name = field_str(&params, "name")?;
    let node = Node::new(node_id, name);
    runtime.registries().nodes.register(node_id, node.clone()).await;

    let waiters = runtime.registries().pending_grad_fn.drain(node_id).await;
    if !waiters.is_empty() {
        let _gate = allow_grad_fn_assignment();
        for waiter in waiters {
            waiter.set_grad_fn(Some(node.clone()))?;
        }
    }
    Ok(ok_response())
}

async fn create_edge(runtime: &Runtime, params: Value) -> Result<Value, TellurioError> {
    let from_node_id = field_str(&params, "from_node_id")?;
    let to_node_id = field_str(&params, "to_node_id")?;
    let output_nr = params
        .get("output_nr")
        .and_then(Value::as_u64)
        .ok_or_else(|| TellurioError::type_error("output_nr", "expected u64"))?;

    let from_node = runtime.registries().nodes.require(from_node_id).await?;
    let to_node = runtime.registries().nodes.require(to_node_id).await?;
    from_node.push_edge(GradientEdge {
        node: Some(to_node),
        output_nr,
    });
    Ok(ok_response())
}

async fn clear_pending_grad(runtime: &Runtime, params: Value) -> Result<Value, TellurioError> {
    clear_pending(runtime, params, "variable_ids", |var| var.set_pending_grad(false)).await
}

async fn clear_pending_data(runtime: &Runtime, params: Value) -> Result<Value, TellurioError> {
    clear_pending(runtime, params, "variable_ids", |var| var.set_pending_data(false)).await
}

async fn clear_pending<F>(
    runtime: &Runtime,
    params: Value,
    key: &str,
    apply: F,
) -> Result<Value, TellurioError>
where
    F: Fn(&Variable),
{
    let ids = params
        .get(key)
        .and_then(Value::as_array)
        .ok_or_else(|| TellurioError::protocol(format!("{key} missing or not an array")))?;
    for id in ids {
        let id = id
            .as_str()
            .ok_or_else(|| TellurioError::type_error(key, "expected array of strings"))?;
        let var = require_variable(runtime, id).await?;
        apply(&var);
    }
    Ok(ok_response())
}

fn ok_response() -> Value {
    serde_json::json!({ "message": OK })
}

fn describe(decoded: &Decoded) -> &'static str {
    match decoded {
        Decoded::Variable(_) => "variable",
        Decoded::Model(_) => "model",
        Decoded::Callable(_) => "callable",
        Decoded::List(_) => "list",
        Decoded::Primitive(_) => "primitive",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::entity::Variable;
    use crate::testing::fake_runtime;

    #[tokio::test(flavor = "current_thread")]
    async fn create_node_drains_pending_grad_fn_waiters() {
        let (runtime, mut peer) = fake_runtime().await;

        let var = Variable::detached(json!("x"), "role", true);
        var.set_variable_id("v-1");
        var.set_pending_grad_fn_id(Some("node-1".to_string()));
        runtime.registries().variables.register("v-1", var.clone()).await;
        runtime
            .registries()
            .pending_grad_fn
            .enqueue("node-1", var.clone())
            .await;
        assert!(runtime.registries().pending_grad_fn.contains("node-1").await);

        let ack = peer
            .push_server_request(
                "srv-1",
                "create_node",
                json!({"node_id": "node-1", "name": "AddBackward"}),
            )
            .await;
        assert_eq!(ack["result"]["message"], "Ok");

        assert!(!runtime.registries().pending_grad_fn.contains("node-1").await);
        assert!(!var.is_leaf());
        let node = var.grad_fn().await.unwrap().expect("grad_fn resolved");
        assert_eq!(node.name(), "AddBackward");
        assert_eq!(node.node_id(), "node-1");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn create_edge_appends_to_from_nodes_next_functions() {
        let (runtime, mut peer) = fake_runtime().await;

        peer.push_server_request(
            "srv-1",
            "create_node",
            json!({"node_id": "add-bw", "name": "AddBackward"}),
        )
        .await;
        peer.push_server_request(
            "srv-2",
            "create_node",
            json!({"node_id": "accum-grad", "name": "AccumulateGrad"}),
        )
        .await;

        let ack = peer
            .push_server_request(
                "srv-3",
                "create_edge",
                json!({
                    "from_node_id": "add-bw",
                    "to_node_id": "accum-grad",
                    "output_nr": 0,
                }),
            )
            .await;
        assert_eq!(ack["result"]["message"], "Ok");

        let add_bw = runtime.registries().nodes.get("add-bw").await.unwrap();
        let edges = add_bw.next_functions();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].output_nr, 0);
        assert_eq!(edges[0].node.as_ref().unwrap().name(), "AccumulateGrad");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn create_edge_fails_for_unknown_node() {
        let (_runtime, mut peer) = fake_runtime().await;
        let ack = peer
            .push_server_request(
                "srv-1",
                "create_edge",
                json!({"from_node_id": "missing", "to_node_id": "also-missing", "output_nr": 0}),
            )
            .await;
        assert!(ack.get("error").is_some());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn clear_pending_grad_and_data_reset_flags() {
        let (runtime, mut peer) = fake_runtime().await;

        let var = Variable::detached(json!("x"), "role", true);
        var.set_variable_id("v-1");
        var.set_pending_grad(true);
        var.set_pending_data(true);
        runtime.registries().variables.register("v-1", var.clone()).await;

        peer.push_server_request(
            "srv-1",
            "clear_pending_grad",
            json!({"variable_ids": ["v-1"]}),
        )
        .await;
        assert!(!var.pending_grad());
        assert!(var.pending_data());

        peer.push_server_request(
            "srv-2",
            "clear_pending_data",
            json!({"variable_ids": ["v-1"]}),
        )
        .await;
        assert!(!var.pending_data());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn unknown_variable_id_fails_with_error_ack() {
        let (_runtime, mut peer) = fake_runtime().await;
        let ack = peer
            .push_server_request(
                "srv-1",
                "update_variable",
                json!({"variable_id": "nope", "field": "data", "value": "x"}),
            )
            .await;
        assert!(ack.get("error").is_some());
    }
}
