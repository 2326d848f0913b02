//! Flow conversation protocol messages
//!
//! Control messages are JSON objects tagged by their `message` field.
//! Audio travels separately as binary PCM16LE frames.

mod inbound;

use serde::{Deserialize, Serialize};

pub use inbound::{ControlMessage, parse_control};

/// Outbound control message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "message")]
pub enum ClientMessage {
    /// Opens a conversation and declares the audio format
    StartConversation {
        conversation_config: ConversationConfig,
        audio_format: AudioFormat,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tools: Vec<ToolDefinition>,
    },
    /// Marks the end of the audio stream
    AudioEnded {
        /// Sequence number of the last audio frame sent
        last_seq_no: u64,
    },
    /// Reply to a tool invocation
    ToolResult {
        id: String,
        status: ToolStatus,
        content: String,
    },
}

impl ClientMessage {
    /// Build a `StartConversation` message
    #[must_use]
    pub fn start(
        template_id: impl Into<String>,
        timezone: impl Into<String>,
        sample_rate: u32,
        tools: Vec<ToolDefinition>,
    ) -> Self {
        Self::StartConversation {
            conversation_config: ConversationConfig {
                template_id: template_id.into(),
                template_variables: TemplateVariables {
                    timezone: timezone.into(),
                },
            },
            audio_format: AudioFormat::pcm_s16le(sample_rate),
            tools,
        }
    }

    /// Encode as a JSON text frame
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Message tag, for logging
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::StartConversation { .. } => "StartConversation",
            Self::AudioEnded { .. } => "AudioEnded",
            Self::ToolResult { .. } => "ToolResult",
        }
    }
}

/// Template selection for a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationConfig {
    pub template_id: String,
    pub template_variables: TemplateVariables,
}

/// Variables substituted into the conversation template
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateVariables {
    /// IANA timezone id
    pub timezone: String,
}

/// Declared format of the outbound audio stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    #[serde(rename = "type")]
    pub kind: String,
    pub encoding: String,
    pub sample_rate: u32,
}

impl AudioFormat {
    /// Raw PCM16LE mono at `sample_rate`
    #[must_use]
    pub fn pcm_s16le(sample_rate: u32) -> Self {
        Self {
            kind: "raw".to_string(),
            encoding: "pcm_s16le".to_string(),
            sample_rate,
        }
    }
}

/// Tool schema advertised to the agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionDefinition,
}

/// Function signature of an advertised tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    /// JSON-schema-like parameter description
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    /// Describe a function tool
    #[must_use]
    pub fn function(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            kind: "function".to_string(),
            function: FunctionDefinition {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }
}

/// Outcome of a tool invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Ok,
    Failed,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn start_conversation_wire_shape() {
        let msg = ClientMessage::start("default", "Europe/Paris", 16000, Vec::new());
        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();

        assert_eq!(
            value,
            json!({
                "message": "StartConversation",
                "conversation_config": {
                    "template_id": "default",
                    "template_variables": {"timezone": "Europe/Paris"}
                },
                "audio_format": {"type": "raw", "encoding": "pcm_s16le", "sample_rate": 16000}
            })
        );
    }

    #[test]
    fn start_conversation_includes_tools_when_present() {
        let tools = vec![ToolDefinition::function(
            "cancel_timer",
            "Cancel the running timer",
            json!({"type": "object", "properties": {}}),
        )];
        let msg = ClientMessage::start("default", "UTC", 16000, tools);
        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();

        assert_eq!(value["tools"][0]["type"], "function");
        assert_eq!(value["tools"][0]["function"]["name"], "cancel_timer");
    }

    #[test]
    fn audio_ended_wire_shape() {
        let msg = ClientMessage::AudioEnded { last_seq_no: 42 };
        assert_eq!(
            msg.to_json().unwrap(),
            r#"{"message":"AudioEnded","last_seq_no":42}"#
        );
    }

    #[test]
    fn tool_result_wire_shape() {
        let msg = ClientMessage::ToolResult {
            id: "call-1".to_string(),
            status: ToolStatus::Failed,
            content: "No active timer".to_string(),
        };
        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();

        assert_eq!(
            value,
            json!({"message": "ToolResult", "id": "call-1", "status": "failed", "content": "No active timer"})
        );
    }
}
