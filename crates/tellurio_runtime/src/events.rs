//! Wire-level message shapes shared between the transport and the dispatcher.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A JSON-RPC id, which may arrive as either a string or a number.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcId {
    Number(i64),
    Text(String),
}

impl std::fmt::Display for JsonRpcId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JsonRpcId::Number(n) => write!(f, "{n}"),
            JsonRpcId::Text(s) => write!(f, "{s}"),
        }
    }
}

/// What shape an inbound JSON-RPC frame takes, as determined by
/// `classify_message`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MsgKind {
    /// A response (success or error) to a call this client made.
    Response,
    /// A server-initiated request that expects an acknowledgement.
    ServerRequest,
    /// A fire-and-forget notification with no `id`.
    Notification,
    /// Something that is not a well-formed JSON-RPC 2.0 frame.
    Malformed,
}

/// Classify a raw inbound frame by its JSON shape.
pub fn classify_message(json: &Value) -> MsgKind {
    let obj = match json.as_object() {
        Some(obj) => obj,
        None => return MsgKind::Malformed,
    };
    let has_id = obj.contains_key("id");
    let has_method = obj.contains_key("method");
    let has_result_or_error = obj.contains_key("result") || obj.contains_key("error");

    if has_result_or_error && !has_method {
        return MsgKind::Response;
    }
    if has_method && has_id {
        return MsgKind::ServerRequest;
    }
    if has_method && !has_id {
        return MsgKind::Notification;
    }
    MsgKind::Malformed
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classifies_response() {
        let v = json!({"jsonrpc":"2.0","id":"1","result":{"ok":true}});
        assert_eq!(classify_message(&v), MsgKind::Response);
    }

    #[test]
    fn classifies_server_request() {
        let v = json!({"jsonrpc":"2.0","id":"1","method":"update_variable","params":{}});
        assert_eq!(classify_message(&v), MsgKind::ServerRequest);
    }

    #[test]
    fn classifies_notification() {
        let v = json!({"jsonrpc":"2.0","method":"ping","params":{}});
        assert_eq!(classify_message(&v), MsgKind::Notification);
    }

    #[test]
    fn classifies_malformed() {
        let v = json!({"foo":"bar"});
        assert_eq!(classify_message(&v), MsgKind::Malformed);
        assert_eq!(classify_message(&json!([1, 2, 3])), MsgKind::Malformed);
    }
}
