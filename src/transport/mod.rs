//! Persistent full-duplex message transport
//!
//! A [`Connector`] opens a [`Connection`]: a [`Transport`] handle for sending
//! and a channel of [`TransportEvent`]s for everything the peer does. The
//! session consumes events from one loop rather than from callbacks.

mod websocket;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

pub use websocket::WebSocketConnector;

use crate::{Error, Result};

/// Sending half of an open connection
///
/// Each call enqueues exactly one frame, so concurrent writers never
/// interleave within a frame.
pub trait Transport: Send + Sync {
    /// Queue a text frame
    ///
    /// # Errors
    ///
    /// Returns `Error::StreamSend` if the connection no longer accepts frames
    fn send_text(&self, text: String) -> Result<()>;

    /// Queue a binary frame
    ///
    /// # Errors
    ///
    /// Returns `Error::StreamSend` if the connection no longer accepts frames
    fn send_binary(&self, data: Bytes) -> Result<()>;

    /// Start a normal close; further sends fail
    fn close(&self);
}

/// Something the peer or the connection did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Text frame
    Text(String),
    /// Binary frame
    Binary(Bytes),
    /// The peer started closing
    Closing { code: u16, reason: String },
    /// The connection is closed
    Closed { code: u16, reason: String },
    /// The connection failed
    Failure(String),
}

/// An open connection
pub struct Connection {
    pub transport: Arc<dyn Transport>,
    pub events: mpsc::Receiver<TransportEvent>,
}

/// Opens connections to a URL
#[async_trait]
pub trait Connector: Send + Sync {
    /// Perform the handshake
    ///
    /// # Errors
    ///
    /// Returns `Error::Connect` if the handshake fails
    async fn connect(&self, url: &str) -> Result<Connection>;
}

/// Build the conversation URL carrying the session token
///
/// # Errors
///
/// Returns `Error::Config` if `base` is not a valid URL
pub fn flow_url(base: &str, token: &str) -> Result<String> {
    let mut url =
        url::Url::parse(base).map_err(|e| Error::Config(format!("invalid flow url: {e}")))?;
    url.query_pairs_mut().append_pair("jwt", token);
    Ok(url.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flow_url_appends_token() {
        let url = flow_url("wss://flow.api.speechmatics.com/v1/flow", "tok123").unwrap();
        assert_eq!(url, "wss://flow.api.speechmatics.com/v1/flow?jwt=tok123");
    }

    #[test]
    fn flow_url_escapes_and_keeps_existing_query() {
        let url = flow_url("wss://example.test/v1/flow?region=eu", "a+b=c").unwrap();
        assert_eq!(url, "wss://example.test/v1/flow?region=eu&jwt=a%2Bb%3Dc");
    }

    #[test]
    fn flow_url_rejects_garbage() {
        assert!(matches!(flow_url("not a url", "t"), Err(Error::Config(_))));
    }
}
