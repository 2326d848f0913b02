//! Agent-invoked tools
//!
//! The agent calls tools by name with JSON arguments. [`ToolDispatcher`]
//! validates the arguments, runs the action through an injected
//! [`ToolExecutor`] and always produces exactly one [`ToolResult`].

mod timer;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

pub use timer::LocalTimer;

use crate::Result;
use crate::protocol::{ClientMessage, ToolDefinition, ToolStatus};

/// Side-effecting actions the agent may request
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Start a countdown, replacing any running one
    ///
    /// # Errors
    ///
    /// Returns error if no timer facility is available
    async fn set_timer(&self, duration: Duration) -> Result<()>;

    /// Cancel the running countdown
    ///
    /// Returns `false` when no timer was running.
    ///
    /// # Errors
    ///
    /// Returns error if no timer facility is available
    async fn cancel_timer(&self) -> Result<bool>;
}

/// Result of one tool invocation, correlated by `id`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolResult {
    pub id: String,
    pub status: ToolStatus,
    pub content: String,
}

impl ToolResult {
    fn ok(id: &str, content: impl Into<String>) -> Self {
        Self {
            id: id.to_string(),
            status: ToolStatus::Ok,
            content: content.into(),
        }
    }

    fn failed(id: &str, content: impl Into<String>) -> Self {
        Self {
            id: id.to_string(),
            status: ToolStatus::Failed,
            content: content.into(),
        }
    }

    /// Wire message carrying this result
    #[must_use]
    pub fn into_message(self) -> ClientMessage {
        ClientMessage::ToolResult {
            id: self.id,
            status: self.status,
            content: self.content,
        }
    }
}

/// Time unit accepted by `set_timer`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerUnit {
    Seconds,
    Minutes,
    Hours,
}

impl TimerUnit {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "second" | "seconds" => Some(Self::Seconds),
            "minute" | "minutes" => Some(Self::Minutes),
            "hour" | "hours" => Some(Self::Hours),
            _ => None,
        }
    }

    const fn seconds(self) -> u64 {
        match self {
            Self::Seconds => 1,
            Self::Minutes => 60,
            Self::Hours => 3600,
        }
    }

    const fn label(self, count: u64) -> &'static str {
        match (self, count) {
            (Self::Seconds, 1) => "second",
            (Self::Seconds, _) => "seconds",
            (Self::Minutes, 1) => "minute",
            (Self::Minutes, _) => "minutes",
            (Self::Hours, 1) => "hour",
            (Self::Hours, _) => "hours",
        }
    }
}

/// Maps tool names to executor actions
#[derive(Clone)]
pub struct ToolDispatcher {
    executor: Arc<dyn ToolExecutor>,
}

impl ToolDispatcher {
    /// Create a dispatcher backed by `executor`
    #[must_use]
    pub fn new(executor: Arc<dyn ToolExecutor>) -> Self {
        Self { executor }
    }

    /// Schemas for every tool this dispatcher understands
    #[must_use]
    pub fn definitions() -> Vec<ToolDefinition> {
        vec![
            ToolDefinition::function(
                "set_timer",
                "Start a countdown timer for the given duration",
                json!({
                    "type": "object",
                    "properties": {
                        "duration": {
                            "type": "integer",
                            "description": "Length of the timer, greater than zero"
                        },
                        "unit": {
                            "type": "string",
                            "enum": ["seconds", "minutes", "hours"],
                            "description": "Unit of the duration"
                        }
                    },
                    "required": ["duration", "unit"]
                }),
            ),
            ToolDefinition::function(
                "cancel_timer",
                "Cancel the running countdown timer",
                json!({"type": "object", "properties": {}}),
            ),
        ]
    }

    /// Run the tool `name` and describe the outcome
    ///
    /// Never fails: validation and executor errors become `Failed` results.
    pub async fn invoke(&self, id: &str, name: &str, arguments: &Value) -> ToolResult {
        let result = match name {
            "set_timer" => self.set_timer(id, arguments).await,
            "cancel_timer" => self.cancel_timer(id).await,
            other => ToolResult::failed(id, format!("Unknown tool '{other}'")),
        };

        tracing::info!(
            id,
            tool = name,
            status = ?result.status,
            content = %result.content,
            "tool invocation finished"
        );
        result
    }

    async fn set_timer(&self, id: &str, arguments: &Value) -> ToolResult {
        let duration = match arguments.get("duration") {
            Some(Value::Number(n)) => n.as_i64(),
            Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
            _ => None,
        };
        let Some(duration) = duration else {
            return ToolResult::failed(id, "Missing or non-integer duration");
        };

        let Some(raw_unit) = arguments.get("unit").and_then(Value::as_str) else {
            return ToolResult::failed(id, "Missing unit; expected seconds, minutes or hours");
        };
        let Some(unit) = TimerUnit::parse(raw_unit) else {
            return ToolResult::failed(id, format!("Unknown unit '{raw_unit}'"));
        };

        let Ok(count) = u64::try_from(duration) else {
            return ToolResult::failed(id, "Duration must be greater than zero");
        };
        let Some(seconds) = count.checked_mul(unit.seconds()) else {
            return ToolResult::failed(id, "Duration is too large");
        };
        if seconds == 0 {
            return ToolResult::failed(id, "Duration must be greater than zero");
        }

        match self.executor.set_timer(Duration::from_secs(seconds)).await {
            Ok(()) => ToolResult::ok(
                id,
                format!(
                    "Timer set for {count} {} ({seconds} seconds)",
                    unit.label(count)
                ),
            ),
            Err(e) => ToolResult::failed(id, format!("Failed to set timer: {e}")),
        }
    }

    async fn cancel_timer(&self, id: &str) -> ToolResult {
        match self.executor.cancel_timer().await {
            Ok(true) => ToolResult::ok(id, "Timer cancelled"),
            Ok(false) => ToolResult::ok(id, "No active timer"),
            Err(e) => ToolResult::failed(id, format!("Failed to cancel timer: {e}")),
        }
    }
}
