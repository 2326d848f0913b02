//! WebSocket transport over tokio-tungstenite

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;

use super::{Connection, Connector, Transport, TransportEvent};
use crate::{Error, Result};

/// Inbound events buffered before the reader applies backpressure
const EVENT_BUFFER: usize = 256;

/// No close frame was received
const CLOSE_NO_STATUS: u16 = 1005;

/// Opens WebSocket connections
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    handshake_timeout: Duration,
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

impl WebSocketConnector {
    /// Create a connector that gives up on handshakes after `handshake_timeout`
    #[must_use]
    pub const fn new(handshake_timeout: Duration) -> Self {
        Self { handshake_timeout }
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &str) -> Result<Connection> {
        let (ws_stream, response) = tokio::time::timeout(self.handshake_timeout, connect_async(url))
            .await
            .map_err(|_| Error::Connect("handshake timed out".to_string()))?
            .map_err(|e| Error::Connect(e.to_string()))?;

        tracing::info!(status = %response.status(), "connected to flow websocket");

        let (sink, stream) = ws_stream.split();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (event_tx, events) = mpsc::channel(EVENT_BUFFER);
        let closed = Arc::new(AtomicBool::new(false));

        tokio::spawn(write_loop(sink, out_rx, event_tx.clone(), Arc::clone(&closed)));
        tokio::spawn(read_loop(stream, event_tx, Arc::clone(&closed)));

        let transport = Arc::new(WebSocketTransport {
            outgoing: out_tx,
            closed,
        });

        Ok(Connection { transport, events })
    }
}

struct WebSocketTransport {
    outgoing: mpsc::UnboundedSender<WsMessage>,
    closed: Arc<AtomicBool>,
}

impl WebSocketTransport {
    fn enqueue(&self, message: WsMessage) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::StreamSend("connection is closed".to_string()));
        }
        self.outgoing
            .send(message)
            .map_err(|_| Error::StreamSend("writer has stopped".to_string()))
    }
}

impl Transport for WebSocketTransport {
    fn send_text(&self, text: String) -> Result<()> {
        self.enqueue(WsMessage::Text(text))
    }

    fn send_binary(&self, data: Bytes) -> Result<()> {
        self.enqueue(WsMessage::Binary(data.to_vec()))
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "client closing".into(),
        };
        let _ = self.outgoing.send(WsMessage::Close(Some(frame)));
    }
}

async fn write_loop<S>(
    mut sink: S,
    mut outgoing: mpsc::UnboundedReceiver<WsMessage>,
    events: mpsc::Sender<TransportEvent>,
    closed: Arc<AtomicBool>,
) where
    S: futures::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    while let Some(message) = outgoing.recv().await {
        let is_close = matches!(message, WsMessage::Close(_));

        if let Err(e) = sink.send(message).await {
            tracing::warn!(error = %e, "websocket write failed");
            closed.store(true, Ordering::Release);
            let _ = events.send(TransportEvent::Failure(e.to_string())).await;
            break;
        }

        if is_close {
            break;
        }
    }

    tracing::debug!("websocket writer stopped");
}

async fn read_loop<S>(mut stream: S, events: mpsc::Sender<TransportEvent>, closed: Arc<AtomicBool>)
where
    S: futures::Stream<Item = std::result::Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + Unpin,
{
    let mut close_status = (CLOSE_NO_STATUS, String::new());

    while let Some(message) = stream.next().await {
        let event = match message {
            Ok(WsMessage::Text(text)) => TransportEvent::Text(text),
            Ok(WsMessage::Binary(data)) => TransportEvent::Binary(Bytes::from(data)),
            Ok(WsMessage::Close(frame)) => {
                close_status = frame.map_or((CLOSE_NO_STATUS, String::new()), |f| {
                    (u16::from(f.code), f.reason.into_owned())
                });
                TransportEvent::Closing {
                    code: close_status.0,
                    reason: close_status.1.clone(),
                }
            }
            // Ping/pong replies are handled by tungstenite
            Ok(_) => continue,
            Err(e) => {
                closed.store(true, Ordering::Release);
                let _ = events.send(TransportEvent::Failure(e.to_string())).await;
                return;
            }
        };

        if events.send(event).await.is_err() {
            // Nobody is listening anymore
            return;
        }
    }

    closed.store(true, Ordering::Release);
    let (code, reason) = close_status;
    tracing::debug!(code, reason = %reason, "websocket closed");
    let _ = events.send(TransportEvent::Closed { code, reason }).await;
}
