//! Recursive tagged serialization boundary between client and server.
//!
//! The wire contract recognizes exactly four metatags
//! (`__parameter__`, `__variable__`, `__model_client__`, `__callable__`);
//! no other shape is treated as an entity reference.

use serde_json::{Map, Value};

use crate::entity::{tag_variable, CallableEntry, ModelHandle, Variable};
use crate::errors::TellurioError;
use crate::runtime::Runtime;
use crate::state::{allow_grad_fn_assignment, suppress_variable_notifications};

/// An argument to be sent to the server, in its structured (pre-wire) form.
/// `List`/`Tuple` are kept distinct because the encoder must preserve
/// whether a sequence was a fixed-length tuple or a growable list.
pub enum Arg {
    Variable(Variable),
    Model(ModelHandle),
    Callable(CallableEntry),
    List(Vec<Arg>),
    Tuple(Vec<Arg>),
    Map(Vec<(String, Arg)>),
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Null,
}

impl Arg {
    pub fn str(s: impl Into<String>) -> Self {
        Arg::Str(s.into())
    }
}

/// Recursively encode one argument into its wire form. A `Callable` is
/// minted into the runtime's callable registry at this point, so the tag
/// emitted here always has a live counterpart for the server to call back
/// into or for a later decode to resolve.
pub async fn encode_arg(runtime: &Runtime, arg: &Arg) -> Result<Value, TellurioError> {
    Ok(match arg {
        Arg::Variable(v) => tag_variable(v),
        Arg::Model(m) => serde_json::json!({
            "__model_client__": true,
            "model_id": m.model_id(),
        }),
        Arg::Callable(c) => {
            runtime
                .registries()
                .callables
                .register(c.callable_id(), c.clone())
                .await;
            serde_json::json!({
                "__callable__": true,
                "callable_id": c.callable_id(),
            })
        }
        Arg::List(items) => {
            let mut encoded = Vec::with_capacity(items.len());
            for item in items {
                encoded.push(Box::pin(encode_arg(runtime, item)).await?);
            }
            Value::Array(encoded)
        }
        Arg::Tuple(items) => {
            // JSON has no tuple type; wire shape is a plain array on both
            // sides, the list/tuple distinction only matters client-side.
            let mut encoded = Vec::with_capacity(items.len());
            for item in items {
                encoded.push(Box::pin(encode_arg(runtime, item)).await?);
            }
            Value::Array(encoded)
        }
        Arg::Map(entries) => {
            let mut map = Map::new();
            for (k, v) in entries {
                map.insert(k.clone(), Box::pin(encode_arg(runtime, v)).await?);
            }
            Value::Object(map)
        }
        Arg::Str(s) => Value::String(s.clone()),
        Arg::Int(i) => Value::from(*i),
        Arg::Float(f) => serde_json::Number::from_f64(*f)
            .map(Value::Number)
            .ok_or_else(|| TellurioError::type_error("float", "not finite"))?,
        Arg::Bool(b) => Value::Bool(*b),
        Arg::Null => Value::Null,
    })
}

/// A value decoded from a server payload, mirroring `Arg` but resolved
/// against the live registries rather than built by hand.
pub enum Decoded {
    Variable(Variable),
    Model(ModelHandle),
    Callable(CallableEntry),
    List(Vec<Decoded>),
    Primitive(Value),
}

/// Recursively decode a server payload.
///
/// - A full Variable payload (`variable_id` + `data` both present) mints
///   and registers a new Variable under suppression, resolving `grad_fn`
///   via the node registry or enqueueing into the pending-grad-fn map.
/// - A short tag (`__variable__`/`__parameter__`/`__model_client__`)
///   resolves by registry lookup and fails with `LookupError` if absent.
/// - A JSON array decodes element-wise.
/// - Primitives pass through unchanged.
pub async fn decode_value(runtime: &Runtime, value: &Value) -> Result<Decoded, TellurioError> {
    match value {
        Value::Object(map) if map.contains_key("variable_id") && map.contains_key("data") => {
            Ok(Decoded::Variable(decode_full_variable(runtime, map).await?))
        }
        Value::Object(map) if is_tagged(map, "__variable__") || is_tagged(map, "__parameter__") => {
            let id = require_str(map, "variable_id")?;
            let var = runtime.registries().variables.require(id).await?;
            Ok(Decoded::Variable(var))
        }
        Value::Object(map) if is_tagged(map, "__model_client__") => {
            let id = require_str(map, "model_id")?;
            let model = runtime.registries().models.require(id).await?;
            Ok(Decoded::Model(model))
        }
        Value::Object(map) if is_tagged(map, "__callable__") => {
            let id = require_str(map, "callable_id")?;
            let callable = runtime.registries().callables.require(id).await?;
            Ok(Decoded::Callable(callable))
        }
        Value::Array(items) => {
            let mut decoded = Vec::with_capacity(items.len());
            for item in items {
                decoded.push(Box::pin(decode_value(runtime, item)).await?);
            }
            Ok(Decoded::List(decoded))
        }
        Value::String(_) | Value::Number(_) | Value::Bool(_) | Value::Null => {
            Ok(Decoded::Primitive(value.clone()))
        }
        other => Err(TellurioError::type_error(
            describe(other),
            "unrecognized payload shape",
        )),
    }
}

async fn decode_full_variable(runtime: &Runtime, map: &Map<String, Value>) -> Result<Variable, TellurioError> {
    let data = map
        .get("data")
        .cloned()
        .ok_or_else(|| TellurioError::protocol("variable payload missing data"))?;
    let role = require_str(map, "role")?.to_string();
    let requires_grad = map
        .get("requires_grad")
        .and_then(Value::as_bool)
        .ok_or_else(|| TellurioError::type_error("requires_grad", "expected bool"))?;

    let _suppress = suppress_variable_notifications();
    let var = Variable::detached(data, role, requires_grad);

    if let Some(flag) = map.get("_retain_grad").and_then(Value::as_bool) {
        var.update_local_field("_retain_grad", &Value::Bool(flag))?;
    }
    if let Some(nr) = map.get("_output_nr").and_then(Value::as_u64) {
        var.update_local_field("output_nr", &Value::from(nr))?;
    }
    if let Some(grad_list) = map.get("_grad").and_then(Value::as_array) {
        for g in grad_list {
            let decoded = Box::pin(decode_value(runtime, g)).await?;
            if let Decoded::Variable(gv) = decoded {
                var.append_grad_local(gv);
            }
        }
    }

    let grad_fn_id = map.get("_grad_fn").and_then(Value::as_str);
    match grad_fn_id {
        Some(node_id) => {
            if let Some(node) = runtime.registries().nodes.get(node_id).await {
                let _gate = allow_grad_fn_assignment();
                var.set_grad_fn(Some(node))?;
            } else {
                var.set_pending_grad_fn_id(Some(node_id.to_string()));
                runtime
                    .registries()
                    .pending_grad_fn
                    .enqueue(node_id, var.clone())
                    .await;
            }
        }
        None => {
            let _gate = allow_grad_fn_assignment();
            var.set_grad_fn(None)?;
        }
    }

    if let Some(is_leaf) = map.get("is_leaf").and_then(Value::as_bool) {
        var.update_local_field("is_leaf", &Value::Bool(is_leaf))?;
    }

    let variable_id = require_str(map, "variable_id")?.to_string();
    var.set_variable_id(variable_id.clone());
    let mut var = var;
    var.attach_runtime(runtime.clone());
    runtime
        .registries()
        .variables
        .register(variable_id, var.clone())
        .await;
    Ok(var)
}

fn is_tagged(map: &Map<String, Value>, tag: &str) -> bool {
    map.get(tag).and_then(Value::as_bool).unwrap_or(false)
}

fn require_str<'a>(map: &'a Map<String, Value>, key: &str) -> Result<&'a str, TellurioError> {
    map.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| TellurioError::protocol(format!("missing field {key}")))
}

fn describe(value: &Value) -> String {
    match value {
        Value::Object(_) => "object".to_string(),
        Value::Array(_) => "array".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::testing::fake_runtime;

    #[tokio::test(flavor = "current_thread")]
    async fn encodes_primitives_identically() {
        let (runtime, _peer) = fake_runtime().await;
        assert_eq!(
            encode_arg(&runtime, &Arg::Str("hi".into())).await.unwrap(),
            json!("hi")
        );
        assert_eq!(encode_arg(&runtime, &Arg::Int(3)).await.unwrap(), json!(3));
        assert_eq!(
            encode_arg(&runtime, &Arg::Bool(true)).await.unwrap(),
            json!(true)
        );
        assert_eq!(
            encode_arg(&runtime, &Arg::Null).await.unwrap(),
            json!(null)
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn encodes_variable_with_tag() {
        let (runtime, _peer) = fake_runtime().await;
        let v = Variable::detached(json!("x"), "role", true);
        v.set_variable_id("v-1");
        let encoded = encode_arg(&runtime, &Arg::Variable(v)).await.unwrap();
        assert_eq!(encoded["__variable__"], json!(true));
        assert_eq!(encoded["variable_id"], json!("v-1"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn encodes_parameter_with_parameter_tag() {
        let (runtime, _peer) = fake_runtime().await;
        let v = Variable::detached(json!("x"), "role", true);
        v.set_variable_id("p-1");
        v.mark_parameter();
        let encoded = encode_arg(&runtime, &Arg::Variable(v)).await.unwrap();
        assert_eq!(encoded["__parameter__"], json!(true));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn encodes_nested_map_preserving_keys() {
        let (runtime, _peer) = fake_runtime().await;
        let encoded = encode_arg(
            &runtime,
            &Arg::Map(vec![
                ("a".into(), Arg::Int(1)),
                ("b".into(), Arg::Str("two".into())),
            ]),
        )
        .await
        .unwrap();
        assert_eq!(encoded["a"], json!(1));
        assert_eq!(encoded["b"], json!("two"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn encoding_a_callable_registers_it() {
        let (runtime, _peer) = fake_runtime().await;
        let callable = CallableEntry::new_with_fresh_id();
        let callable_id = callable.callable_id().to_string();

        let encoded = encode_arg(&runtime, &Arg::Callable(callable)).await.unwrap();
        assert_eq!(encoded["__callable__"], json!(true));
        assert_eq!(encoded["callable_id"], json!(callable_id.clone()));

        assert!(runtime.registries().callables.contains(&callable_id).await);
    }
}
