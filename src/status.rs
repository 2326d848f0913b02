//! Status display sink
//!
//! Every state transition and error produces a plain-text status line.

use tokio::sync::mpsc;

/// Receives user-visible status updates
pub trait StatusSink: Send + Sync {
    /// Show a status line
    fn update(&self, status: &str);

    /// Show one prompt/response exchange
    fn transcript(&self, prompt: &str, response: &str) {
        tracing::debug!(prompt, response, "transcript");
    }
}

/// Writes status lines to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogStatus;

impl StatusSink for LogStatus {
    fn update(&self, status: &str) {
        tracing::info!(status, "status");
    }
}

/// Prints timestamped status lines to stdout
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleStatus;

impl StatusSink for ConsoleStatus {
    fn update(&self, status: &str) {
        println!("[{}] {status}", chrono::Local::now().format("%H:%M:%S"));
    }

    fn transcript(&self, prompt: &str, response: &str) {
        if !prompt.is_empty() {
            println!("  you: {prompt}");
        }
        if !response.is_empty() {
            println!("  assistant: {response}");
        }
    }
}

/// Forwards status lines over a channel
impl StatusSink for mpsc::UnboundedSender<String> {
    fn update(&self, status: &str) {
        let _ = self.send(status.to_string());
    }
}
