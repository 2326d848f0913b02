//! Shared test utilities
//!
//! Fakes for every collaborator a session talks to, so sessions can run
//! end to end without network or audio hardware.

#![allow(dead_code)]

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use secrecy::SecretString;
use serde_json::Value;
use tokio::sync::{Semaphore, mpsc};
use tokio::time::Instant;

use flow_assistant::{
    Assistant, AudioDevices, AudioSink, CaptureSource, Collaborators, Connection, Connector,
    Error, Result, RetryPolicy, SessionSettings, TokenProvider, ToolExecutor, Transport,
    TransportEvent,
};

// -- Tokens -------------------------------------------------------------------

/// Hands out a fixed token, or fails every time
pub struct StaticTokens {
    token: Option<String>,
}

impl StaticTokens {
    pub fn ok(token: &str) -> Self {
        Self {
            token: Some(token.to_string()),
        }
    }

    pub const fn failing() -> Self {
        Self { token: None }
    }
}

#[async_trait]
impl TokenProvider for StaticTokens {
    async fn fetch_token(&self) -> Result<SecretString> {
        self.token
            .as_deref()
            .map(|token| SecretString::from(token.to_string()))
            .ok_or_else(|| Error::Credential("401 unauthorized".to_string()))
    }
}

/// Token provider whose fetch panics, taking the session task down with it
pub struct PanickingTokens;

#[async_trait]
impl TokenProvider for PanickingTokens {
    async fn fetch_token(&self) -> Result<SecretString> {
        panic!("token provider crashed");
    }
}

// -- Transport ----------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Text(String),
    Binary(Bytes),
}

/// Records every frame it is asked to send
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<Sent>>,
    closed: AtomicBool,
}

impl RecordingTransport {
    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn binaries(&self) -> Vec<Bytes> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Binary(b) => Some(b),
                Sent::Text(_) => None,
            })
            .collect()
    }

    /// Text frames decoded as JSON
    pub fn messages(&self) -> Vec<Value> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Text(t) => serde_json::from_str(&t).ok(),
                Sent::Binary(_) => None,
            })
            .collect()
    }

    /// Text frames whose `message` tag equals `tag`
    pub fn messages_tagged(&self, tag: &str) -> Vec<Value> {
        self.messages()
            .into_iter()
            .filter(|m| m["message"] == tag)
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Transport for RecordingTransport {
    fn send_text(&self, text: String) -> Result<()> {
        if self.is_closed() {
            return Err(Error::StreamSend("closed".to_string()));
        }
        self.sent.lock().unwrap().push(Sent::Text(text));
        Ok(())
    }

    fn send_binary(&self, data: Bytes) -> Result<()> {
        if self.is_closed() {
            return Err(Error::StreamSend("closed".to_string()));
        }
        self.sent.lock().unwrap().push(Sent::Binary(data));
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// The test's side of an established connection
pub struct Link {
    pub transport: Arc<RecordingTransport>,
    pub events: mpsc::Sender<TransportEvent>,
}

impl Link {
    pub async fn text(&self, value: Value) {
        self.events
            .send(TransportEvent::Text(value.to_string()))
            .await
            .unwrap();
    }

    pub async fn event(&self, event: TransportEvent) {
        self.events.send(event).await.unwrap();
    }
}

/// Fails the first `failures` handshakes, then hands out recording transports
pub struct ScriptedConnector {
    failures: Mutex<u32>,
    attempts: Mutex<Vec<Instant>>,
    urls: Mutex<Vec<String>>,
    links: mpsc::UnboundedSender<Link>,
}

impl ScriptedConnector {
    pub fn new(failures: u32) -> (Self, mpsc::UnboundedReceiver<Link>) {
        let (links, rx) = mpsc::unbounded_channel();
        let connector = Self {
            failures: Mutex::new(failures),
            attempts: Mutex::new(Vec::new()),
            urls: Mutex::new(Vec::new()),
            links,
        };
        (connector, rx)
    }

    pub fn attempts(&self) -> Vec<Instant> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, url: &str) -> Result<Connection> {
        self.attempts.lock().unwrap().push(Instant::now());
        self.urls.lock().unwrap().push(url.to_string());

        {
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(Error::Connect("connection refused".to_string()));
            }
        }

        let transport = Arc::new(RecordingTransport::default());
        let (events_tx, events) = mpsc::channel(64);
        let _ = self.links.send(Link {
            transport: Arc::clone(&transport),
            events: events_tx,
        });

        Ok(Connection { transport, events })
    }
}

// -- Audio --------------------------------------------------------------------

/// Switch that makes the fake microphone fail
#[derive(Clone, Default)]
pub struct MicFault(Arc<Mutex<Option<String>>>);

impl MicFault {
    pub fn fail(&self, reason: &str) {
        *self.0.lock().unwrap() = Some(reason.to_string());
    }

    fn check(&self) -> Result<()> {
        match self.0.lock().unwrap().as_ref() {
            Some(reason) => Err(Error::Device(reason.clone())),
            None => Ok(()),
        }
    }
}

/// Capture source fed from a channel
///
/// The receiver is shared so later sessions reopen the same microphone.
pub struct ChannelCapture {
    frames: Arc<Mutex<std_mpsc::Receiver<Vec<u8>>>>,
    fault: MicFault,
}

impl CaptureSource for ChannelCapture {
    fn read_frame(&mut self) -> Result<Option<Vec<u8>>> {
        self.fault.check()?;
        let received = self
            .frames
            .lock()
            .unwrap()
            .recv_timeout(Duration::from_millis(10));
        match received {
            Ok(pcm) => Ok(Some(pcm)),
            Err(std_mpsc::RecvTimeoutError::Timeout) => Ok(None),
            Err(std_mpsc::RecvTimeoutError::Disconnected) => {
                std::thread::sleep(Duration::from_millis(10));
                Ok(None)
            }
        }
    }
}

/// Sink that keeps everything it plays
#[derive(Clone, Default)]
pub struct RecordingSink {
    pub played: Arc<Mutex<Vec<Bytes>>>,
}

impl AudioSink for RecordingSink {
    fn write(&mut self, pcm: &[u8]) -> Result<()> {
        self.played.lock().unwrap().push(Bytes::copy_from_slice(pcm));
        Ok(())
    }
}

/// Devices backed by a frame channel and a recording sink
pub struct FakeDevices {
    frames: Arc<Mutex<std_mpsc::Receiver<Vec<u8>>>>,
    sink: RecordingSink,
    pub mic_fault: MicFault,
}

impl FakeDevices {
    pub fn new() -> (Self, std_mpsc::Sender<Vec<u8>>, RecordingSink) {
        let (tx, rx) = std_mpsc::channel();
        let sink = RecordingSink::default();
        let devices = Self {
            frames: Arc::new(Mutex::new(rx)),
            sink: sink.clone(),
            mic_fault: MicFault::default(),
        };
        (devices, tx, sink)
    }
}

impl AudioDevices for FakeDevices {
    fn open_capture(
        &self,
        _sample_rate: u32,
        _frame_bytes: usize,
    ) -> Result<Box<dyn CaptureSource>> {
        self.mic_fault.check()?;
        Ok(Box::new(ChannelCapture {
            frames: Arc::clone(&self.frames),
            fault: self.mic_fault.clone(),
        }))
    }

    fn open_sink(&self, _sample_rate: u32) -> Result<Box<dyn AudioSink>> {
        Ok(Box::new(self.sink.clone()))
    }
}

// -- Tools --------------------------------------------------------------------

/// Records timer requests; optionally blocks each call until released
#[derive(Default)]
pub struct FakeTools {
    pub timers: Mutex<Vec<Duration>>,
    gate: Option<Arc<Semaphore>>,
}

impl FakeTools {
    /// Each call waits for one permit on the returned semaphore
    pub fn gated() -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let tools = Self {
            timers: Mutex::new(Vec::new()),
            gate: Some(Arc::clone(&gate)),
        };
        (tools, gate)
    }

    async fn wait_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
    }
}

#[async_trait]
impl ToolExecutor for FakeTools {
    async fn set_timer(&self, duration: Duration) -> Result<()> {
        self.wait_gate().await;
        self.timers.lock().unwrap().push(duration);
        Ok(())
    }

    async fn cancel_timer(&self) -> Result<bool> {
        self.wait_gate().await;
        Ok(!self.timers.lock().unwrap().is_empty())
    }
}

// -- Harness ------------------------------------------------------------------

/// Settings with a short retry delay for real-time tests
pub fn fast_settings() -> SessionSettings {
    SessionSettings {
        retry: RetryPolicy {
            max_retries: 3,
            delay: Duration::from_millis(20),
        },
        ..SessionSettings::default()
    }
}

pub struct Harness {
    pub assistant: Assistant,
    pub connector: Arc<ScriptedConnector>,
    pub links: mpsc::UnboundedReceiver<Link>,
    pub mic: std_mpsc::Sender<Vec<u8>>,
    pub mic_fault: MicFault,
    pub speaker: RecordingSink,
    pub tools: Arc<FakeTools>,
    pub status: mpsc::UnboundedReceiver<String>,
}

impl Harness {
    pub fn new(settings: SessionSettings, failures: u32) -> Self {
        Self::build(settings, failures, StaticTokens::ok("test-token"), FakeTools::default())
    }

    pub fn build(
        settings: SessionSettings,
        failures: u32,
        tokens: impl TokenProvider + 'static,
        tools: FakeTools,
    ) -> Self {
        let (connector, links) = ScriptedConnector::new(failures);
        let connector = Arc::new(connector);
        let (devices, mic, speaker) = FakeDevices::new();
        let mic_fault = devices.mic_fault.clone();
        let tools = Arc::new(tools);
        let (status_tx, status) = mpsc::unbounded_channel::<String>();

        let assistant = Assistant::new(
            settings,
            Collaborators {
                tokens: Arc::new(tokens),
                connector: Arc::clone(&connector) as Arc<dyn Connector>,
                devices: Arc::new(devices),
                tools: Arc::clone(&tools) as Arc<dyn ToolExecutor>,
                status: Arc::new(status_tx),
            },
        );

        Self {
            assistant,
            connector,
            links,
            mic,
            mic_fault,
            speaker,
            tools,
            status,
        }
    }

    /// Wait for the next established connection
    pub async fn next_link(&mut self) -> Link {
        tokio::time::timeout(Duration::from_secs(5), self.links.recv())
            .await
            .expect("no connection within 5s")
            .expect("connector dropped")
    }

    /// Push one captured frame
    pub fn speak(&self, pcm: &[u8]) {
        self.mic.send(pcm.to_vec()).unwrap();
    }

    /// Every status line reported so far
    pub fn statuses(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(line) = self.status.try_recv() {
            lines.push(line);
        }
        lines
    }

    pub fn played(&self) -> Vec<Bytes> {
        self.speaker.played.lock().unwrap().clone()
    }
}

/// Poll `check` until it holds, failing the test after 5 seconds
pub async fn eventually<F>(what: &str, mut check: F)
where
    F: FnMut() -> bool,
{
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(
            std::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Await a future with a 5 second limit
pub async fn within<T>(what: &str, fut: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), fut)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
}
