//! Error types for the Flow assistant

use thiserror::Error;

/// Result type alias for Flow assistant operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the Flow assistant
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Short-lived token exchange failed
    #[error("credential error: {0}")]
    Credential(String),

    /// Transport handshake failed
    #[error("connect error: {0}")]
    Connect(String),

    /// Transport reported an error after the handshake
    #[error("transport error: {0}")]
    Transport(String),

    /// A frame was not accepted by the transport mid-session
    #[error("stream send error: {0}")]
    StreamSend(String),

    /// Capture or playback hardware error
    #[error("device error: {0}")]
    Device(String),

    /// Malformed inbound control message
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Tool validation or dispatch failure
    #[error("tool error: {0}")]
    Tool(String),

    /// Connection retries were exhausted
    #[error("gave up after {attempts} connection attempts: {last}")]
    RetriesExhausted {
        /// Number of attempts made
        attempts: u32,
        /// Last error observed
        last: String,
    },

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML encoding error
    #[error("toml encode error: {0}")]
    TomlEncode(#[from] toml::ser::Error),

    /// WebSocket error
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

impl Error {
    /// Whether this error must end the active session
    ///
    /// Protocol and tool errors are reported and the session continues.
    #[must_use]
    pub const fn is_session_fatal(&self) -> bool {
        !matches!(self, Self::Protocol(_) | Self::Tool(_))
    }

    /// Whether this error is worth another connection attempt
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connect(_) | Self::Transport(_) | Self::WebSocket(_) | Self::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_and_tool_errors_are_not_fatal() {
        assert!(!Error::Protocol("bad json".into()).is_session_fatal());
        assert!(!Error::Tool("no timer".into()).is_session_fatal());
    }

    #[test]
    fn stream_and_device_errors_are_fatal() {
        assert!(Error::StreamSend("closed".into()).is_session_fatal());
        assert!(Error::Device("unplugged".into()).is_session_fatal());
        assert!(
            Error::RetriesExhausted {
                attempts: 3,
                last: "refused".into()
            }
            .is_session_fatal()
        );
    }

    #[test]
    fn only_handshake_errors_are_retryable() {
        assert!(Error::Connect("refused".into()).is_retryable());
        assert!(Error::Transport("reset".into()).is_retryable());
        assert!(!Error::Credential("401".into()).is_retryable());
        assert!(!Error::StreamSend("closed".into()).is_retryable());
    }
}
