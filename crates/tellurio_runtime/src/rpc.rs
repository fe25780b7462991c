//! Frame construction helpers for the JSON-RPC 2.0 wire contract.

use serde_json::{json, Value};
use uuid::Uuid;

use crate::events::JsonRpcId;

/// Build a request frame with a freshly minted UUIDv4 id.
pub fn build_request(method: &str, params: Value) -> (JsonRpcId, Value) {
    let id = Uuid::new_v4().to_string();
    let frame = json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params,
    });
    (JsonRpcId::Text(id), frame)
}

/// Build a fire-and-forget notification frame (no `id`).
pub fn build_notification(method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params,
    })
}

/// Build a success acknowledgement frame replying to a server-initiated
/// request, carrying the same id.
pub fn build_ack_result(id: &Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result,
    })
}

/// Build an error acknowledgement frame replying to a server-initiated
/// request, carrying the same id.
pub fn build_ack_error(id: &Value, code: i64, message: impl Into<String>) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": code,
            "message": message.into(),
        },
    })
}

/// Pull the `id` field off a frame verbatim, for echoing back in acks.
pub fn extract_id(json: &Value) -> Option<Value> {
    json.get("id").cloned()
}

pub fn extract_method(json: &Value) -> Option<&str> {
    json.get("method").and_then(Value::as_str)
}

pub fn extract_params(json: &Value) -> Value {
    json.get("params").cloned().unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_carries_fresh_uuid_id() {
        let (id, frame) = build_request("run_function", json!({"a":1}));
        assert_eq!(frame["method"], "run_function");
        assert_eq!(frame["id"], id.to_string());
        assert!(Uuid::parse_str(&id.to_string()).is_ok());
    }

    #[test]
    fn notification_has_no_id() {
        let frame = build_notification("ping", json!({}));
        assert!(frame.get("id").is_none());
    }

    #[test]
    fn ack_echoes_same_id() {
        let id = json!("abc-123");
        let frame = build_ack_result(&id, json!({"message":"Ok"}));
        assert_eq!(frame["id"], id);
        assert_eq!(frame["result"]["message"], "Ok");
    }
}
