use serde_json::Value;

use crate::content::Usage;
use crate::errors::RunFailure;

/// Tool-augmented event sequence produced by `transform::tool_result_stream`.
#[derive(Clone, Debug, PartialEq)]
pub enum ToolStreamEvent {
    TextDelta {
        text: String,
    },
    ToolCallDelta {
        id: String,
        name: String,
        args_delta: String,
    },
    /// Completion for a tool with no registered executor, forwarded unresolved.
    ToolCallComplete {
        id: String,
        name: String,
        args: Value,
    },
    /// Executor result, in place of the completion that triggered it.
    ToolResult {
        id: String,
        name: String,
        args: Value,
        result: Value,
    },
    Finish {
        finish_reason: Option<String>,
        usage: Option<Usage>,
    },
    Error {
        error: RunFailure,
    },
}

/// Progress of a run that is neither text nor a resolved tool result.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunStatus {
    /// The model is streaming arguments for a tool call.
    ToolCallStreaming {
        id: String,
        name: String,
        args_delta: String,
    },
    /// The model called a tool the caller must answer.
    RequiresAction { id: String, name: String, args: Value },
}

/// Normalized incremental output consumed by a UI binding layer.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ThreadUpdate {
    /// Incremental assistant text.
    ContentDelta { text: String },
    /// A tool call resolved by a registered executor.
    ToolResult {
        id: String,
        name: String,
        args: Value,
        result: Value,
    },
    Status { status: RunStatus },
    /// Terminal success event.
    Done {
        finish_reason: Option<String>,
        usage: Option<Usage>,
    },
    /// Terminal failure event.
    Error { error: RunFailure },
}

impl ThreadUpdate {
    /// Returns true for `Done` and `Error`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }
}
