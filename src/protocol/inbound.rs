//! Inbound control message parsing

use base64::Engine;
use bytes::Bytes;
use serde_json::Value;

use crate::{Error, Result};

/// A decoded inbound control message
///
/// One JSON object can yield several messages: a tagged message plus any
/// `prompt`, `passive` or `audio` fields it carries.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    /// The server acknowledged the conversation
    ConversationStarted { session_id: String },
    /// Informational status update
    Info { status: String },
    /// Server warning; ends the session
    Warning { reason: String },
    /// Server error; ends the session
    Error { reason: String },
    /// The agent ended the conversation
    ConversationEnded,
    /// The agent requests a tool call
    ToolInvoke {
        id: String,
        name: String,
        arguments: Value,
    },
    /// Base64 audio embedded in JSON, already decoded
    InlineAudio { frames: Vec<Bytes> },
    /// Transcript of one exchange
    Prompt { prompt: String, response: String },
    /// Whether the agent is currently passive
    Passive(bool),
}

/// Parse one inbound text frame
///
/// Unknown tags yield no messages. Undecodable base64 audio entries are
/// skipped with a warning.
///
/// # Errors
///
/// Returns `Error::Protocol` if the frame is not a JSON object
pub fn parse_control(text: &str) -> Result<Vec<ControlMessage>> {
    let json: Value =
        serde_json::from_str(text).map_err(|e| Error::Protocol(format!("invalid json: {e}")))?;
    let Some(obj) = json.as_object() else {
        return Err(Error::Protocol("control frame is not an object".to_string()));
    };

    let str_field = |v: Option<&Value>| v.and_then(Value::as_str).unwrap_or_default().to_string();

    let mut messages = Vec::new();

    match obj.get("message").and_then(Value::as_str) {
        Some("ConversationStarted") => messages.push(ControlMessage::ConversationStarted {
            session_id: str_field(obj.get("id")),
        }),
        Some("Info") => {
            // Info frames without a status carry nothing to surface
            if let Some(status) = obj
                .get("event")
                .and_then(|e| e.get("status"))
                .and_then(Value::as_str)
            {
                messages.push(ControlMessage::Info {
                    status: status.to_string(),
                });
            }
        }
        Some("Warning") => messages.push(ControlMessage::Warning {
            reason: str_field(obj.get("reason")),
        }),
        Some("Error") => messages.push(ControlMessage::Error {
            reason: str_field(obj.get("reason")),
        }),
        Some("ConversationEnded") => messages.push(ControlMessage::ConversationEnded),
        Some("ToolInvoke") => messages.push(parse_tool_invoke(obj)?),
        Some(other) => tracing::debug!(tag = other, "ignoring control message"),
        None => {}
    }

    if let Some(prompt) = obj.get("prompt").and_then(Value::as_object) {
        messages.push(ControlMessage::Prompt {
            prompt: str_field(prompt.get("prompt")),
            response: str_field(prompt.get("response")),
        });
    }

    if let Some(passive) = obj.get("passive").and_then(Value::as_bool) {
        messages.push(ControlMessage::Passive(passive));
    }

    if let Some(audio) = obj.get("audio").and_then(Value::as_array) {
        let frames = decode_audio(audio);
        if !frames.is_empty() {
            messages.push(ControlMessage::InlineAudio { frames });
        }
    }

    Ok(messages)
}

fn parse_tool_invoke(obj: &serde_json::Map<String, Value>) -> Result<ControlMessage> {
    let id = obj
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Protocol("ToolInvoke without id".to_string()))?;
    let function = obj.get("function");
    let name = function
        .and_then(|f| f.get("name"))
        .and_then(Value::as_str)
        .unwrap_or_default();

    // Arguments arrive either as an object or as a JSON-encoded string
    let arguments = match function.and_then(|f| f.get("arguments")) {
        Some(Value::String(raw)) if raw.trim().is_empty() => Value::Object(serde_json::Map::new()),
        Some(Value::String(raw)) => serde_json::from_str(raw).unwrap_or_else(|e| {
            tracing::warn!(id, error = %e, "tool arguments are not valid json");
            Value::Null
        }),
        Some(value) => value.clone(),
        None => Value::Object(serde_json::Map::new()),
    };

    Ok(ControlMessage::ToolInvoke {
        id: id.to_string(),
        name: name.to_string(),
        arguments,
    })
}

fn decode_audio(entries: &[Value]) -> Vec<Bytes> {
    let engine = base64::engine::general_purpose::STANDARD;

    entries
        .iter()
        .enumerate()
        .filter_map(|(index, entry)| {
            let Some(encoded) = entry.as_str() else {
                tracing::warn!(index, "audio entry is not a string");
                return None;
            };
            let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
            match engine.decode(compact) {
                Ok(pcm) if pcm.is_empty() => None,
                Ok(pcm) => Some(Bytes::from(pcm)),
                Err(e) => {
                    tracing::warn!(index, error = %e, "skipping undecodable audio entry");
                    None
                }
            }
        })
        .collect()
}
