//! Control-message handler
//!
//! Turns inbound control messages into directives for the session loop.
//! The handler owns no state; the session applies each directive.

use bytes::Bytes;
use serde_json::Value;

use crate::protocol::{ControlMessage, parse_control};

/// What the session should do in response to a control message
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    /// Conversation acknowledged: record the id and drain pending audio
    Acknowledge { session_id: String },
    /// Show a status line, no state change
    Status(String),
    /// Show a status line and close the session
    End(String),
    /// Run a tool and reply with its result
    InvokeTool {
        id: String,
        name: String,
        arguments: Value,
    },
    /// Queue audio for playback
    Play(Vec<Bytes>),
    /// Show a transcript exchange
    Transcript { prompt: String, response: String },
    /// Agent passive state changed
    Passive(bool),
}

/// Map one parsed control message to a directive
#[must_use]
pub fn directive_for(message: ControlMessage) -> Directive {
    match message {
        ControlMessage::ConversationStarted { session_id } => Directive::Acknowledge { session_id },
        ControlMessage::Info { status } => Directive::Status(status),
        ControlMessage::Warning { reason } => Directive::End(format!("Warning: {reason}")),
        ControlMessage::Error { reason } => Directive::End(format!("Error: {reason}")),
        ControlMessage::ConversationEnded => Directive::End("Conversation ended".to_string()),
        ControlMessage::ToolInvoke {
            id,
            name,
            arguments,
        } => Directive::InvokeTool {
            id,
            name,
            arguments,
        },
        ControlMessage::InlineAudio { frames } => Directive::Play(frames),
        ControlMessage::Prompt { prompt, response } => Directive::Transcript { prompt, response },
        ControlMessage::Passive(passive) => Directive::Passive(passive),
    }
}

/// Parse a text frame into directives
///
/// Malformed frames are logged and produce no directives.
#[must_use]
pub fn directives_for_text(text: &str) -> Vec<Directive> {
    match parse_control(text) {
        Ok(messages) => messages.into_iter().map(directive_for).collect(),
        Err(e) => {
            tracing::warn!(error = %e, "ignoring malformed control message");
            Vec::new()
        }
    }
}
