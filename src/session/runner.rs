//! Per-session task
//!
//! One runner owns everything a session allocates. It never touches the
//! [`Assistant`](super::Assistant) slot, so `stop()` can hold the slot lock
//! while it waits for the runner to finish.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use bytes::Bytes;
use secrecy::ExposeSecret;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::handler::{Directive, directives_for_text};
use super::retry::RetryState;
use super::{SessionState, Shared};
use crate::audio::{EchoSuppressor, EchoSuppressorConfig};
use crate::pipeline::{CaptureHandle, FaultSender, PlaybackQueue, Uplink, spawn_capture};
use crate::protocol::ClientMessage;
use crate::tools::ToolDispatcher;
use crate::transport::{Connection, TransportEvent, flow_url};
use crate::{Error, Result};

/// How a session ended
#[derive(Debug)]
enum Outcome {
    /// `stop()` was called
    Stopped,
    /// The server or the peer ended the conversation
    Ended(String),
    /// A session-fatal error
    Failed(Error),
}

/// Result of one connected stretch of a session
enum Stretch {
    Done(Outcome),
    /// The connection failed before the conversation was acknowledged
    Reconnect(Error),
}

struct ToolJob {
    id: String,
    name: String,
    arguments: Value,
}

struct Runner {
    shared: Arc<Shared>,
    id: u64,
    cancel: CancellationToken,
    uplink: Arc<Uplink>,
    faults_tx: FaultSender,
    faults_rx: mpsc::UnboundedReceiver<Error>,
    capture: Option<CaptureHandle>,
    playback: Option<Arc<PlaybackQueue>>,
    tool_jobs: Option<mpsc::UnboundedSender<ToolJob>>,
    tool_worker: Option<JoinHandle<()>>,
    conversation_id: Option<String>,
}

/// Drive one session from token fetch to teardown
pub(super) async fn run(shared: Arc<Shared>, id: u64, cancel: CancellationToken) {
    let (faults_tx, faults_rx) = mpsc::unbounded_channel();
    let mut runner = Runner {
        shared,
        id,
        cancel,
        uplink: Arc::new(Uplink::new()),
        faults_tx,
        faults_rx,
        capture: None,
        playback: None,
        tool_jobs: None,
        tool_worker: None,
        conversation_id: None,
    };

    let outcome = runner.drive().await;
    runner.teardown(outcome).await;
}

impl Runner {
    fn set_state(&self, state: SessionState) {
        self.shared.set_state(state);
    }

    fn status(&self, text: &str) {
        self.shared.collaborators.status.update(text);
    }

    async fn drive(&mut self) -> Outcome {
        let shared = Arc::clone(&self.shared);
        let settings = &shared.settings;
        let collaborators = &shared.collaborators;

        self.set_state(SessionState::TokenFetch);
        self.status("Fetching token");
        let token = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Outcome::Stopped,
            result = collaborators.tokens.fetch_token() => match result {
                Ok(token) => token,
                Err(e) => return Outcome::Failed(e),
            },
        };

        let url = match flow_url(&settings.conversation.url, token.expose_secret()) {
            Ok(url) => url,
            Err(e) => return Outcome::Failed(e),
        };

        if let Err(e) = self.open_playback().await {
            return Outcome::Failed(e);
        }
        self.spawn_tool_worker();

        let mut retry = RetryState::new(settings.retry);
        loop {
            self.set_state(SessionState::Connecting);
            self.status("Connecting");

            let connect = collaborators.connector.connect(&url);
            tokio::pin!(connect);
            let attempt = loop {
                tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => return Outcome::Stopped,
                    Some(fault) = self.faults_rx.recv() => {
                        if let Some(outcome) = self.on_fault(fault) {
                            return outcome;
                        }
                    }
                    result = &mut connect => break result,
                }
            };

            let failure = match attempt {
                Ok(connection) => match self.converse(connection).await {
                    Stretch::Done(outcome) => return outcome,
                    Stretch::Reconnect(e) => e,
                },
                Err(e) => e,
            };

            if !failure.is_retryable() {
                return Outcome::Failed(failure);
            }
            let Some(delay) = retry.on_failure() else {
                return Outcome::Failed(Error::RetriesExhausted {
                    attempts: retry.attempts_made(),
                    last: failure.to_string(),
                });
            };

            tracing::warn!(
                session = self.id,
                attempt = retry.attempt(),
                max = retry.max(),
                error = %failure,
                "connection failed, retrying"
            );
            self.set_state(SessionState::Retrying);
            self.status(&format!(
                "Connection failed, retrying ({}/{})",
                retry.attempt(),
                retry.max()
            ));

            let pause = tokio::time::sleep(delay);
            tokio::pin!(pause);
            loop {
                tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => return Outcome::Stopped,
                    Some(fault) = self.faults_rx.recv() => {
                        if let Some(outcome) = self.on_fault(fault) {
                            return outcome;
                        }
                    }
                    () = &mut pause => break,
                }
            }
        }
    }

    /// Capture and playback faults can arrive in any state after connecting
    fn on_fault(&self, fault: Error) -> Option<Outcome> {
        if fault.is_session_fatal() {
            tracing::error!(session = self.id, error = %fault, "session fault");
            return Some(Outcome::Failed(fault));
        }
        tracing::warn!(session = self.id, error = %fault, "ignoring non-fatal fault");
        None
    }

    async fn open_playback(&mut self) -> Result<()> {
        let devices = Arc::clone(&self.shared.collaborators.devices);
        let sample_rate = self.shared.settings.audio.sample_rate;

        let sink = tokio::task::spawn_blocking(move || devices.open_sink(sample_rate))
            .await
            .map_err(|e| Error::Device(format!("speaker open task failed: {e}")))??;

        self.playback = Some(PlaybackQueue::new(sink, self.faults_tx.clone()));
        Ok(())
    }

    /// Tool calls run one at a time, off the event loop
    fn spawn_tool_worker(&mut self) {
        let (jobs_tx, mut jobs_rx) = mpsc::unbounded_channel::<ToolJob>();
        let dispatcher = ToolDispatcher::new(Arc::clone(&self.shared.collaborators.tools));
        let uplink = Arc::clone(&self.uplink);
        let faults = self.faults_tx.clone();
        let pending = Arc::clone(&self.shared.tools_pending);

        let worker = tokio::spawn(async move {
            while let Some(job) = jobs_rx.recv().await {
                let result = dispatcher.invoke(&job.id, &job.name, &job.arguments).await;
                pending.fetch_sub(1, Ordering::AcqRel);

                if let Err(e) = uplink.send_control(&result.into_message()) {
                    tracing::error!(id = %job.id, error = %e, "failed to send tool result");
                    let _ = faults.send(e);
                }
            }
        });

        self.tool_jobs = Some(jobs_tx);
        self.tool_worker = Some(worker);
    }

    fn start_capture(&mut self) {
        if self.capture.is_some() {
            return;
        }

        let audio = self.shared.settings.audio;
        let filter = audio
            .echo_suppression
            .then(|| EchoSuppressor::new(audio.sample_rate, EchoSuppressorConfig::default()));

        self.capture = Some(spawn_capture(
            Arc::clone(&self.shared.collaborators.devices),
            audio,
            filter,
            Arc::clone(&self.uplink),
            self.faults_tx.clone(),
            self.cancel.child_token(),
        ));
    }

    async fn converse(&mut self, connection: Connection) -> Stretch {
        let Connection {
            transport,
            mut events,
        } = connection;

        self.uplink.attach(Arc::clone(&transport));
        self.set_state(SessionState::AwaitingAck);
        self.status("Connected");

        // Frames captured from here on buffer until the conversation is acknowledged
        self.start_capture();

        let settings = &self.shared.settings;
        let tools = if settings.tools_enabled {
            ToolDispatcher::definitions()
        } else {
            Vec::new()
        };
        let start = ClientMessage::start(
            settings.conversation.template_id.clone(),
            settings.conversation.timezone.clone(),
            settings.audio.sample_rate,
            tools,
        );
        if let Err(e) = self.uplink.send_control(&start) {
            return Stretch::Done(Outcome::Failed(e));
        }

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Stretch::Done(Outcome::Stopped),
                Some(fault) = self.faults_rx.recv() => {
                    if let Some(outcome) = self.on_fault(fault) {
                        return Stretch::Done(outcome);
                    }
                }
                event = events.recv() => {
                    let event = event.unwrap_or_else(|| {
                        TransportEvent::Failure("event stream ended".to_string())
                    });
                    match event {
                        TransportEvent::Text(text) => {
                            if let Some(outcome) = self.apply_text(&text) {
                                return Stretch::Done(outcome);
                            }
                        }
                        TransportEvent::Binary(pcm) => self.play(pcm),
                        TransportEvent::Closing { code, reason }
                        | TransportEvent::Closed { code, reason } => {
                            tracing::info!(session = self.id, code, %reason, "connection closed");
                            return Stretch::Done(Outcome::Ended(format!(
                                "Connection closed ({code})"
                            )));
                        }
                        TransportEvent::Failure(reason) => {
                            let error = Error::Transport(reason);
                            if self.conversation_id.is_some() {
                                return Stretch::Done(Outcome::Failed(error));
                            }
                            if let Some(transport) = self.uplink.detach() {
                                transport.close();
                            }
                            return Stretch::Reconnect(error);
                        }
                    }
                }
            }
        }
    }

    fn apply_text(&mut self, text: &str) -> Option<Outcome> {
        for directive in directives_for_text(text) {
            match directive {
                Directive::Acknowledge { session_id } => {
                    tracing::info!(session = self.id, conversation = %session_id, "conversation started");
                    self.conversation_id = Some(session_id);
                    self.set_state(SessionState::Streaming);
                    self.status("Conversation started");
                    if let Err(e) = self.uplink.drain() {
                        return Some(Outcome::Failed(e));
                    }
                }
                Directive::Status(status) => self.status(&status),
                Directive::End(status) => return Some(Outcome::Ended(status)),
                Directive::InvokeTool {
                    id,
                    name,
                    arguments,
                } => {
                    tracing::debug!(session = self.id, %id, tool = %name, "tool invoked");
                    // Counted before the send so backgrounding sees queued calls too
                    let pending = &self.shared.tools_pending;
                    pending.fetch_add(1, Ordering::AcqRel);
                    let queued = self.tool_jobs.as_ref().is_some_and(|jobs| {
                        jobs.send(ToolJob {
                            id,
                            name,
                            arguments,
                        })
                        .is_ok()
                    });
                    if !queued {
                        pending.fetch_sub(1, Ordering::AcqRel);
                        tracing::warn!(session = self.id, "tool worker unavailable");
                    }
                }
                Directive::Play(frames) => {
                    for pcm in frames {
                        self.play(pcm);
                    }
                }
                Directive::Transcript { prompt, response } => {
                    self.shared.collaborators.status.transcript(&prompt, &response);
                }
                Directive::Passive(passive) => {
                    tracing::info!(session = self.id, passive, "agent passive state changed");
                }
            }
        }
        None
    }

    fn play(&self, pcm: Bytes) {
        if let Some(playback) = &self.playback {
            playback.enqueue(pcm);
        }
    }

    async fn teardown(mut self, outcome: Outcome) {
        self.set_state(SessionState::Closing);

        if let Some(capture) = self.capture.take() {
            capture.stop().await;
        }

        if self.uplink.is_attached() {
            let ended = ClientMessage::AudioEnded {
                last_seq_no: self.uplink.frames_sent(),
            };
            if let Err(e) = self.uplink.send_control(&ended) {
                tracing::debug!(session = self.id, error = %e, "could not send audio end");
            }
        }
        if let Some(transport) = self.uplink.detach() {
            transport.close();
        }

        if let Some(playback) = self.playback.take() {
            playback.clear();
        }

        self.tool_jobs = None;
        if let Some(worker) = self.tool_worker.take() {
            worker.abort();
            // The counter reset must not race a finishing call
            let _ = worker.await;
        }
        self.shared.tools_pending.store(0, Ordering::Release);

        match &outcome {
            Outcome::Stopped => {}
            Outcome::Ended(status) => self.status(status),
            Outcome::Failed(e) => {
                tracing::error!(session = self.id, error = %e, "session failed");
                self.status(&format!("Error: {e}"));
                self.shared.set_last_error(Some(e.to_string()));
            }
        }
        tracing::info!(
            session = self.id,
            conversation = ?self.conversation_id,
            frames_sent = self.uplink.frames_sent(),
            ?outcome,
            "session closed"
        );

        self.uplink.reset();
        self.status("Assistant stopped");
        self.set_state(SessionState::Idle);
    }
}
