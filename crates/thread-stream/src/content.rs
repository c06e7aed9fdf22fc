use serde_json::Value;

/// Author of a thread message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One piece of a thread message.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum MessagePart {
    /// Plain text.
    Text { text: String },
    /// A model-initiated tool invocation.
    ToolCall { id: String, name: String, args: Value },
    /// The answer to an earlier tool call.
    ToolResult {
        id: String,
        name: String,
        result: Value,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

/// A message in a thread's history.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ThreadMessage {
    pub role: Role,
    pub content: Vec<MessagePart>,
}

impl ThreadMessage {
    /// Creates a message with a single text part.
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: vec![MessagePart::Text { text: text.into() }],
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::text(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::text(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::text(Role::Assistant, text)
    }

    /// Creates a tool message answering `id`.
    pub fn tool_result(id: impl Into<String>, name: impl Into<String>, result: Value) -> Self {
        Self {
            role: Role::Tool,
            content: vec![MessagePart::ToolResult {
                id: id.into(),
                name: name.into(),
                result,
                is_error: false,
            }],
        }
    }

    /// Concatenates all text parts in order.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        for part in &self.content {
            if let MessagePart::Text { text } = part {
                out.push_str(text);
            }
        }
        out
    }
}

/// Token accounting reported by the provider at the end of a turn.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// Output content produced by a run.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum OutputPart {
    /// Assistant text (consecutive deltas are merged).
    Text { text: String },
    /// A tool call resolved by a registered executor.
    ToolResult {
        id: String,
        name: String,
        args: Value,
        result: Value,
    },
    /// A tool call left for the caller because no executor was registered.
    PendingToolCall { id: String, name: String, args: Value },
}

/// Final aggregated output for a completed run.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize, Default)]
pub struct RunOutput {
    /// Output parts in the order they were produced.
    pub parts: Vec<OutputPart>,
    /// Vendor-specific finish reason when available (for example `stop`).
    pub finish_reason: Option<String>,
    pub usage: Option<Usage>,
}

impl RunOutput {
    /// Concatenates all text parts in order and ignores non-text parts.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for part in &self.parts {
            if let OutputPart::Text { text } = part {
                out.push_str(text);
            }
        }
        out
    }

    pub(crate) fn push_text(&mut self, delta: &str) {
        if let Some(OutputPart::Text { text }) = self.parts.last_mut() {
            text.push_str(delta);
        } else {
            self.parts.push(OutputPart::Text {
                text: delta.to_string(),
            });
        }
    }

    /// Converts the output into history messages for a follow-up run.
    ///
    /// Produces one assistant message (text plus every tool call) followed by
    /// one tool message per resolved call. Pending calls stay unanswered so the
    /// caller can append its own results.
    pub fn to_messages(&self) -> Vec<ThreadMessage> {
        let mut assistant = ThreadMessage {
            role: Role::Assistant,
            content: Vec::new(),
        };
        let mut tool_messages = Vec::new();
        for part in &self.parts {
            match part {
                OutputPart::Text { text } => assistant.content.push(MessagePart::Text {
                    text: text.clone(),
                }),
                OutputPart::ToolResult {
                    id,
                    name,
                    args,
                    result,
                } => {
                    assistant.content.push(MessagePart::ToolCall {
                        id: id.clone(),
                        name: name.clone(),
                        args: args.clone(),
                    });
                    tool_messages.push(ThreadMessage::tool_result(
                        id.clone(),
                        name.clone(),
                        result.clone(),
                    ));
                }
                OutputPart::PendingToolCall { id, name, args } => {
                    assistant.content.push(MessagePart::ToolCall {
                        id: id.clone(),
                        name: name.clone(),
                        args: args.clone(),
                    })
                }
            }
        }
        let mut out = Vec::with_capacity(tool_messages.len() + 1);
        if !assistant.content.is_empty() {
            out.push(assistant);
        }
        out.extend(tool_messages);
        out
    }
}
