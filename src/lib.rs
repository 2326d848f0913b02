//! Flow Assistant - realtime voice conversation client
//!
//! This library provides the core of a duplex voice client for the Flow
//! conversation protocol:
//! - Session orchestration (token exchange, connect, bounded retry, teardown)
//! - Microphone capture buffered until the conversation is acknowledged
//! - Ordered speaker playback with a single drain task
//! - Control-message handling and agent tool calls
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                     Assistant                       │
//! │   start / stop  │  state watch  │  on_background    │
//! └────────────────────┬────────────────────────────────┘
//!                      │ one runner task per session
//! ┌────────────────────▼────────────────────────────────┐
//! │   Capture ─► Uplink ─► Transport ─► Handler ─► ...   │
//! │   (pending queue)        │           │               │
//! │                          ▼           ▼               │
//! │                   Playback queue   Tool dispatcher   │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod config;
pub mod credentials;
pub mod error;
pub mod pipeline;
pub mod protocol;
pub mod session;
pub mod status;
pub mod tools;
pub mod transport;

pub use audio::{AudioDevices, AudioFrame, AudioSink, CaptureSource, CpalDevices};
pub use config::Config;
pub use credentials::{FlowTokenClient, TokenProvider};
pub use error::{Error, Result};
pub use pipeline::{PendingAudio, Phase, PlaybackQueue, Uplink};
pub use protocol::{ClientMessage, ControlMessage, ToolStatus};
pub use session::{Assistant, Collaborators, RetryPolicy, SessionSettings, SessionState};
pub use status::{ConsoleStatus, LogStatus, StatusSink};
pub use tools::{LocalTimer, ToolDispatcher, ToolExecutor, ToolResult};
pub use transport::{Connection, Connector, Transport, TransportEvent, WebSocketConnector};
