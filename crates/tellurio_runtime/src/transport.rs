//! WebSocket duplex transport carrying JSON-RPC 2.0 frames.
//!
//! Mirrors the shape of a process-backed transport: a writer task drains an
//! mpsc channel onto the socket, a reader task decodes frames off the socket
//! onto another mpsc channel, and the two halves are joined on shutdown.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::errors::TellurioError;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Channel capacities for the reader/writer tasks.
#[derive(Clone, Copy, Debug)]
pub struct TransportConfig {
    pub write_channel_capacity: usize,
    pub read_channel_capacity: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            write_channel_capacity: 256,
            read_channel_capacity: 256,
        }
    }
}

/// A connected WebSocket transport: two background tasks plumbing JSON
/// values in and out, plus a malformed-frame counter for diagnostics.
pub struct WsTransport {
    write_tx: Option<mpsc::Sender<Value>>,
    read_rx: Option<mpsc::Receiver<Value>>,
    malformed_frame_count: Arc<AtomicU64>,
    reader_task: Option<JoinHandle<()>>,
    writer_task: Option<JoinHandle<()>>,
}

impl WsTransport {
    /// Open a WebSocket connection at `url`, authenticating with
    /// `Authorization: Api-Key <key>`, and spawn reader/writer tasks.
    pub async fn connect(
        url: &str,
        api_key: &str,
        config: TransportConfig,
    ) -> Result<Self, TellurioError> {
        if config.write_channel_capacity == 0 || config.read_channel_capacity == 0 {
            return Err(TellurioError::ConnectError {
                url: url.to_string(),
                reason: "channel capacities must be non-zero".to_string(),
            });
        }

        let mut request = url.into_client_request().map_err(|e| TellurioError::ConnectError {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        let header_value = HeaderValue::from_str(&format!("Api-Key {api_key}")).map_err(|e| {
            TellurioError::ConnectError {
                url: url.to_string(),
                reason: e.to_string(),
            }
        })?;
        request.headers_mut().insert("Authorization", header_value);

        let (stream, _response) =
            connect_async(request)
                .await
                .map_err(|e| TellurioError::ConnectError {
                    url: url.to_string(),
                    reason: e.to_string(),
                })?;

        Ok(Self::spawn(stream, config))
    }

    fn spawn(stream: WsStream, config: TransportConfig) -> Self {
        let (sink, source) = stream.split();
        let (write_tx, write_rx) = mpsc::channel(config.write_channel_capacity);
        let (read_tx, read_rx) = mpsc::channel(config.read_channel_capacity);
        let malformed_frame_count = Arc::new(AtomicU64::new(0));

        let writer_task = tokio::spawn(writer_loop(sink, write_rx));
        let reader_task = tokio::spawn(reader_loop(
            source,
            read_tx,
            Arc::clone(&malformed_frame_count),
        ));

        Self {
            write_tx: Some(write_tx),
            read_rx: Some(read_rx),
            malformed_frame_count,
            reader_task: Some(reader_task),
            writer_task: Some(writer_task),
        }
    }

    /// A cloneable sender for outbound frames.
    pub fn write_tx(&self) -> Option<mpsc::Sender<Value>> {
        self.write_tx.clone()
    }

    /// Take ownership of the inbound frame receiver. Can only be taken once.
    pub fn take_read_rx(&mut self) -> Option<mpsc::Receiver<Value>> {
        self.read_rx.take()
    }

    pub fn malformed_frame_count(&self) -> u64 {
        self.malformed_frame_count.load(Ordering::Relaxed)
    }

    /// Close the outbound half, wait briefly for the writer to flush, then
    /// abort both tasks.
    pub async fn terminate_and_join(&mut self, flush_timeout: Duration) {
        self.write_tx.take();
        if let Some(task) = self.writer_task.take() {
            let _ = tokio::time::timeout(flush_timeout, task).await;
        }
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
    }
}

async fn writer_loop(
    mut sink: futures_util::stream::SplitSink<WsStream, Message>,
    mut write_rx: mpsc::Receiver<Value>,
) {
    while let Some(value) = write_rx.recv().await {
        let text = match serde_json::to_string(&value) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize outbound frame");
                continue;
            }
        };
        if let Err(e) = sink.send(Message::Text(text)).await {
            tracing::warn!(error = %e, "websocket write failed, writer loop exiting");
            break;
        }
    }
    let _ = sink.close().await;
}

async fn reader_loop(
    mut source: futures_util::stream::SplitStream<WsStream>,
    read_tx: mpsc::Sender<Value>,
    malformed_frame_count: Arc<AtomicU64>,
) {
    while let Some(msg) = source.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(error = %e, "websocket read failed, reader loop exiting");
                break;
            }
        };
        let text = match msg {
            Message::Text(text) => text,
            Message::Close(_) => {
                tracing::debug!("websocket peer closed connection");
                break;
            }
            _ => continue,
        };
        match serde_json::from_str::<Value>(&text) {
            Ok(value) => {
                if read_tx.send(value).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                malformed_frame_count.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, frame = %text, "dropping malformed frame");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "current_thread")]
    async fn rejects_zero_capacity_config() {
        let config = TransportConfig {
            write_channel_capacity: 0,
            read_channel_capacity: 16,
        };
        let result = WsTransport::connect("ws://127.0.0.1:1/ws/v0/rpc/", "key", config).await;
        assert!(matches!(result, Err(TellurioError::ConnectError { .. })));
    }
}
