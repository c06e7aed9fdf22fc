/// OpenAI reasoning effort hint (when supported by the selected model).
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpenAiReasoningEffort {
    /// Lower latency / cost-oriented reasoning.
    Low,
    /// Balanced reasoning.
    Medium,
    /// Higher effort reasoning.
    High,
}

/// Per-run OpenAI request options.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct OpenAiRequestOptions {
    /// Whether the model may emit several tool calls in one turn.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallel_tool_calls: Option<bool>,
    /// Ask for a trailing usage chunk (`stream_options.include_usage`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_usage: Option<bool>,
    /// Optional reasoning effort hint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<OpenAiReasoningEffort>,
}

impl OpenAiRequestOptions {
    pub fn parallel_tool_calls(mut self, enabled: bool) -> Self {
        self.parallel_tool_calls = Some(enabled);
        self
    }

    pub fn include_usage(mut self, enabled: bool) -> Self {
        self.include_usage = Some(enabled);
        self
    }

    /// Sets the reasoning effort hint.
    pub fn reasoning_effort(mut self, effort: OpenAiReasoningEffort) -> Self {
        self.reasoning_effort = Some(effort);
        self
    }
}
