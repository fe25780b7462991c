//! Error taxonomy for the tellurio client runtime.

use serde::{Deserialize, Serialize};

/// A JSON-RPC error object as carried in an `error` response frame.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Errors raised by the transport and runtime layers.
#[derive(Clone, Debug, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum TellurioError {
    #[error("could not connect to {url}: {reason}")]
    ConnectError { url: String, reason: String },

    #[error("invalid credential: {reason}")]
    InvalidCredential { reason: String },

    #[error("timed out waiting for response to {method} (id={id})")]
    TimeoutError { method: String, id: String },

    #[error("protocol error: {reason}")]
    ProtocolError { reason: String },

    #[error("no {registry} registered under id {id}")]
    LookupError { registry: String, id: String },

    #[error("invariant violated: {reason}")]
    InvariantError { reason: String },

    #[error("cannot encode/decode value of type {found}: {reason}")]
    TypeError { found: String, reason: String },
}

impl TellurioError {
    pub fn lookup(registry: impl Into<String>, id: impl Into<String>) -> Self {
        TellurioError::LookupError {
            registry: registry.into(),
            id: id.into(),
        }
    }

    pub fn invariant(reason: impl Into<String>) -> Self {
        TellurioError::InvariantError {
            reason: reason.into(),
        }
    }

    pub fn protocol(reason: impl Into<String>) -> Self {
        TellurioError::ProtocolError {
            reason: reason.into(),
        }
    }

    pub fn type_error(found: impl Into<String>, reason: impl Into<String>) -> Self {
        TellurioError::TypeError {
            found: found.into(),
            reason: reason.into(),
        }
    }
}

/// Map a JSON-RPC error object onto our taxonomy. Unknown codes become
/// `ProtocolError`; the server is the source of truth for specific codes.
pub fn map_rpc_error(err: &RpcErrorObject) -> TellurioError {
    match err.code {
        -32001 => TellurioError::InvalidCredential {
            reason: err.message.clone(),
        },
        -32600 | -32601 | -32602 => TellurioError::ProtocolError {
            reason: format!("{} ({})", err.message, err.code),
        },
        _ => TellurioError::ProtocolError {
            reason: format!("server error {}: {}", err.code, err.message),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_known_codes() {
        let e = RpcErrorObject {
            code: -32001,
            message: "bad key".into(),
            data: None,
        };
        assert!(matches!(
            map_rpc_error(&e),
            TellurioError::InvalidCredential { .. }
        ));
    }

    #[test]
    fn maps_unknown_code_to_protocol_error() {
        let e = RpcErrorObject {
            code: -1,
            message: "weird".into(),
            data: None,
        };
        assert!(matches!(
            map_rpc_error(&e),
            TellurioError::ProtocolError { .. }
        ));
    }
}
