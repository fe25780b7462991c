//! In-process fake RPC peer for exercising a `Runtime` without a live
//! socket: a channel pair stands in for the WebSocket, and the test drives
//! the "server" side by hand.

use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::runtime::Runtime;

const DEFAULT_CAPACITY: usize = 32;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// The server side of a fake connection: frames the Runtime sends arrive on
/// `outbound`; frames pushed into `inbound` are delivered to the Runtime as
/// if they had come off the socket.
pub struct FakePeer {
    pub outbound: mpsc::Receiver<Value>,
    pub inbound: mpsc::Sender<Value>,
}

/// Build a Runtime wired to a `FakePeer` instead of a real transport, with
/// the dispatcher loop already running.
pub async fn fake_runtime() -> (Runtime, FakePeer) {
    fake_runtime_with_timeout(DEFAULT_TIMEOUT).await
}

pub async fn fake_runtime_with_timeout(default_timeout: Duration) -> (Runtime, FakePeer) {
    let (to_runtime_tx, to_runtime_rx) = mpsc::channel(DEFAULT_CAPACITY);
    let (from_runtime_tx, from_runtime_rx) = mpsc::channel(DEFAULT_CAPACITY);

    let runtime = Runtime::new_for_testing(to_runtime_rx, from_runtime_tx, default_timeout).await;
    let peer = FakePeer {
        outbound: from_runtime_rx,
        inbound: to_runtime_tx,
    };
    (runtime, peer)
}

impl FakePeer {
    /// Wait for the next outbound frame the Runtime sent and reply to it
    /// with `result` under the matching id. Returns the request frame so
    /// the caller can assert on its method/params.
    pub async fn respond_to_next_call(&mut self, result: Value) -> Value {
        let frame = self
            .outbound
            .recv()
            .await
            .expect("runtime did not send a frame");
        let id = frame.get("id").cloned().unwrap_or(Value::Null);
        let response = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": result,
        });
        self.inbound
            .send(response)
            .await
            .expect("runtime dispatcher loop is not running");
        frame
    }

    /// Reply to the next outbound frame with a JSON-RPC error.
    pub async fn fail_next_call(&mut self, code: i64, message: impl Into<String>) -> Value {
        let frame = self
            .outbound
            .recv()
            .await
            .expect("runtime did not send a frame");
        let id = frame.get("id").cloned().unwrap_or(Value::Null);
        let response = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": code, "message": message.into() },
        });
        self.inbound
            .send(response)
            .await
            .expect("runtime dispatcher loop is not running");
        frame
    }

    /// Push a server-initiated request frame at the Runtime and wait for
    /// its acknowledgement.
    pub async fn push_server_request(&mut self, id: &str, method: &str, params: Value) -> Value {
        let frame = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        self.inbound
            .send(frame)
            .await
            .expect("runtime dispatcher loop is not running");
        self.outbound
            .recv()
            .await
            .expect("runtime did not send an acknowledgement")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test(flavor = "current_thread")]
    async fn call_round_trips_through_the_fake_peer() {
        let (runtime, mut peer) = fake_runtime().await;
        let call = tokio::spawn(async move {
            runtime
                .call("ping", json!({}), Duration::from_secs(1))
                .await
        });
        let request = peer.respond_to_next_call(json!({"message": "pong"})).await;
        assert_eq!(request["method"], "ping");
        let response = call.await.unwrap().unwrap();
        assert_eq!(response["result"]["message"], "pong");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn server_request_is_acknowledged() {
        use crate::entity::Variable;

        let (runtime, mut peer) = fake_runtime().await;
        let var = Variable::detached(json!("x"), "role", true);
        var.set_variable_id("v-1");
        runtime.registries().variables.register("v-1", var.clone()).await;

        let ack = peer
            .push_server_request(
                "srv-1",
                "update_variable",
                json!({"variable_id": "v-1", "field": "role", "value": "new-role"}),
            )
            .await;
        assert_eq!(ack["id"], json!("srv-1"));
        assert_eq!(ack["result"]["message"], "Ok");
        assert_eq!(var.role(), "new-role");
    }
}
