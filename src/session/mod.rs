//! Session orchestration
//!
//! [`Assistant`] is the handle callers use to start and stop conversations.
//! Each started session runs as one task that owns the transport, the
//! pipelines and the retry state, and moves through [`SessionState`]:
//!
//! ```text
//! Idle -> TokenFetch -> Connecting -> AwaitingAck -> Streaming -> Closing -> Idle
//!                          ^   |          |
//!                          |   v          v
//!                          Retrying <-----+
//! ```

mod handler;
mod retry;
mod runner;

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError};

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub use handler::{Directive, directive_for, directives_for_text};
pub use retry::{RetryPolicy, RetryState};

use crate::Config;
use crate::audio::AudioDevices;
use crate::config::{AudioConfig, ConversationConfig};
use crate::credentials::TokenProvider;
use crate::status::StatusSink;
use crate::tools::ToolExecutor;
use crate::transport::Connector;

/// Lifecycle state of the current session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session
    Idle,
    /// Exchanging the API key for a session token
    TokenFetch,
    /// Performing the transport handshake
    Connecting,
    /// Waiting to retry a failed connection
    Retrying,
    /// Connected, capture buffering until the server acknowledges
    AwaitingAck,
    /// Conversation acknowledged, audio flowing
    Streaming,
    /// Releasing resources
    Closing,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::TokenFetch => "token_fetch",
            Self::Connecting => "connecting",
            Self::Retrying => "retrying",
            Self::AwaitingAck => "awaiting_ack",
            Self::Streaming => "streaming",
            Self::Closing => "closing",
        };
        f.write_str(name)
    }
}

/// External services a session depends on
#[derive(Clone)]
pub struct Collaborators {
    pub tokens: Arc<dyn TokenProvider>,
    pub connector: Arc<dyn Connector>,
    pub devices: Arc<dyn AudioDevices>,
    pub tools: Arc<dyn ToolExecutor>,
    pub status: Arc<dyn StatusSink>,
}

/// Per-session settings
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub conversation: ConversationConfig,
    pub audio: AudioConfig,
    pub retry: RetryPolicy,
    /// Advertise the tool schema in `StartConversation`
    pub tools_enabled: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            conversation: ConversationConfig::default(),
            audio: AudioConfig::default(),
            retry: RetryPolicy::default(),
            tools_enabled: true,
        }
    }
}

impl From<&Config> for SessionSettings {
    fn from(config: &Config) -> Self {
        Self {
            conversation: config.conversation.clone(),
            audio: config.audio,
            retry: RetryPolicy {
                max_retries: config.session.max_retries,
                delay: config.session.retry_delay,
            },
            tools_enabled: config.tools_enabled,
        }
    }
}

struct ActiveSession {
    id: u64,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub(crate) struct Shared {
    settings: SessionSettings,
    collaborators: Collaborators,
    state: watch::Sender<SessionState>,
    /// Tool calls queued or running, counted from the moment they are queued
    tools_pending: Arc<AtomicUsize>,
    /// Error that ended the most recent session
    last_error: std::sync::Mutex<Option<String>>,
}

impl Shared {
    fn set_state(&self, state: SessionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!(from = %previous, to = %state, "session state changed");
        }
    }

    fn set_last_error(&self, error: Option<String>) {
        *self
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = error;
    }
}

/// Handle for starting and stopping voice conversations
///
/// Cloning shares the same session slot. At most one session runs at a time.
#[derive(Clone)]
pub struct Assistant {
    shared: Arc<Shared>,
    slot: Arc<Mutex<Option<ActiveSession>>>,
    next_id: Arc<AtomicU64>,
}

impl Assistant {
    /// Create an idle assistant
    #[must_use]
    pub fn new(settings: SessionSettings, collaborators: Collaborators) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            shared: Arc::new(Shared {
                settings,
                collaborators,
                state,
                tools_pending: Arc::new(AtomicUsize::new(0)),
                last_error: std::sync::Mutex::new(None),
            }),
            slot: Arc::new(Mutex::new(None)),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Begin a new session unless one is running
    ///
    /// Returns `false` when a session was already running. Must be called
    /// from within a tokio runtime.
    pub async fn start(&self) -> bool {
        let mut slot = self.slot.lock().await;

        if let Some(active) = slot.take() {
            // A session that reported Idle is only returning from its task
            let idle = *self.shared.state.borrow() == SessionState::Idle;
            if !active.handle.is_finished() && !idle {
                tracing::info!(session = active.id, "assistant already running");
                *slot = Some(active);
                return false;
            }
            if let Err(e) = active.handle.await {
                tracing::warn!(session = active.id, error = %e, "previous session task failed");
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        self.shared.set_last_error(None);
        self.shared.set_state(SessionState::TokenFetch);

        let handle = tokio::spawn(runner::run(Arc::clone(&self.shared), id, cancel.clone()));
        tracing::info!(session = id, "assistant started");

        *slot = Some(ActiveSession { id, cancel, handle });
        true
    }

    /// Tear down the running session and wait for it to release resources
    ///
    /// Returns `false` when no session was running.
    pub async fn stop(&self) -> bool {
        let mut slot = self.slot.lock().await;

        let Some(active) = slot.take() else {
            tracing::debug!("stop requested with no session");
            return false;
        };
        if active.handle.is_finished() || self.state() == SessionState::Idle {
            if let Err(e) = active.handle.await {
                tracing::warn!(session = active.id, error = %e, "session task failed");
                self.shared.set_state(SessionState::Idle);
            }
            return false;
        }

        tracing::info!(session = active.id, "stopping assistant");
        active.cancel.cancel();
        if let Err(e) = active.handle.await {
            tracing::warn!(session = active.id, error = %e, "session task failed");
            self.shared.set_state(SessionState::Idle);
        }
        true
    }

    /// The app lost focus or moved to the background
    ///
    /// Stops the session unless a tool call is queued or in flight, since
    /// some tools briefly hand control to another program. Returns whether
    /// the session was stopped.
    pub async fn on_background(&self) -> bool {
        if self.tool_in_flight() {
            tracing::info!("ignoring background event during tool call");
            return false;
        }
        self.stop().await
    }

    /// Current session state
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.shared.state.borrow()
    }

    /// Watch session state changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    /// Whether a session is active
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() != SessionState::Idle
    }

    /// Whether a tool call is queued or being serviced
    #[must_use]
    pub fn tool_in_flight(&self) -> bool {
        self.pending_tools() > 0
    }

    /// Number of tool calls that have not yet produced a result
    #[must_use]
    pub fn pending_tools(&self) -> usize {
        self.shared.tools_pending.load(Ordering::Acquire)
    }

    /// The error that ended the most recent session, if it failed
    ///
    /// Cleared when a new session starts.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.shared
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
