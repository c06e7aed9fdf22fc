use std::time::Duration;

use crate::model::ProviderId;

/// Errors returned by a provider adapter before they are normalized into a
/// `RunFailure` for the update stream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// Provider returned an application-level failure (HTTP status, auth, etc.).
    #[error("provider error ({provider}): {message}")]
    Provider {
        provider: ProviderId,
        message: String,
        status_code: Option<u16>,
    },
    /// Transport or stream I/O failed.
    #[error("transport error ({provider}): {message}")]
    Transport {
        provider: ProviderId,
        message: String,
    },
    /// Provider response shape or event sequencing was invalid.
    #[error("protocol error ({provider}): {message}")]
    Protocol {
        provider: ProviderId,
        message: String,
    },
}

impl ProviderError {
    /// Creates a provider-level error.
    pub fn provider(
        provider: impl Into<ProviderId>,
        message: impl Into<String>,
        status_code: Option<u16>,
    ) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
            status_code,
        }
    }

    /// Creates a transport-level error.
    pub fn transport(provider: impl Into<ProviderId>, message: impl Into<String>) -> Self {
        Self::Transport {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Creates a protocol-level error.
    pub fn protocol(provider: impl Into<ProviderId>, message: impl Into<String>) -> Self {
        Self::Protocol {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Returns the provider associated with this error.
    pub fn provider_id(&self) -> &ProviderId {
        match self {
            Self::Provider { provider, .. }
            | Self::Transport { provider, .. }
            | Self::Protocol { provider, .. } => provider,
        }
    }

    /// Returns the human-readable message for this error.
    pub fn message(&self) -> &str {
        match self {
            Self::Provider { message, .. }
            | Self::Transport { message, .. }
            | Self::Protocol { message, .. } => message,
        }
    }
}

/// Errors returned by a tool executor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolError {
    /// The tool ran and reported a failure.
    #[error("{0}")]
    Failed(String),
    /// The tool did not finish within the registry's execution timeout.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    /// The tool observed the cancellation signal and stopped.
    #[error("cancelled")]
    Cancelled,
}

impl ToolError {
    /// Creates a `Failed` error from any displayable message.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Terminal run failure carried by `ThreadUpdate::Error`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunFailure {
    /// Provider returned a terminal failure (HTTP status or in-band error).
    #[error("provider failure ({provider}): {message}")]
    Provider { provider: String, message: String },
    /// Network/stream transport failed.
    #[error("transport failure ({provider}): {message}")]
    Transport { provider: String, message: String },
    /// Provider sent something the pipeline could not interpret.
    #[error("protocol failure: {message}")]
    Protocol { message: String },
    /// A registered tool failed, timed out, or received unusable arguments.
    #[error("tool `{tool_name}` failed for call {tool_call_id}: {message}")]
    ToolExecution {
        tool_call_id: String,
        tool_name: String,
        message: String,
    },
    /// The event stream ended without a finish or error marker.
    #[error("stream ended without a terminal event")]
    MalformedStream,
    /// The run was cancelled by the caller.
    #[error("run cancelled")]
    Cancelled,
}

impl RunFailure {
    pub(crate) fn tool_execution(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::ToolExecution {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            message: message.into(),
        }
    }
}

/// Top-level error type for the public adapter API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdapterError {
    /// Invalid adapter/provider/tool configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Invalid user input to the builder API.
    #[error("validation error: {0}")]
    Validation(String),
    /// Requested provider is not registered in the adapter.
    #[error("provider not found: {provider}")]
    ProviderNotFound { provider: ProviderId },
    /// Provider error surfaced outside the update stream.
    #[error(transparent)]
    Provider(ProviderError),
    /// Terminal failure returned from a started run.
    #[error(transparent)]
    RunFailed(RunFailure),
    /// Operation was cancelled before a terminal run result was returned.
    #[error("cancelled")]
    Cancelled,
    /// Internal protocol misuse or invariant violation.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl AdapterError {
    pub(crate) fn protocol_msg(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }
}

impl From<RunFailure> for AdapterError {
    fn from(value: RunFailure) -> Self {
        match value {
            RunFailure::Cancelled => AdapterError::Cancelled,
            other => AdapterError::RunFailed(other),
        }
    }
}

impl From<ProviderError> for RunFailure {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Provider {
                provider, message, ..
            } => RunFailure::Provider {
                provider: provider.to_string(),
                message,
            },
            ProviderError::Transport { provider, message } => RunFailure::Transport {
                provider: provider.to_string(),
                message,
            },
            ProviderError::Protocol { provider, message } => RunFailure::Protocol {
                message: format!("provider={provider}: {message}"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_errors_map_to_matching_failures() {
        let failure = RunFailure::from(ProviderError::transport("openai", "reset"));
        assert_eq!(
            failure,
            RunFailure::Transport {
                provider: "openai".into(),
                message: "reset".into()
            }
        );

        let failure = RunFailure::from(ProviderError::protocol("openai", "bad frame"));
        assert!(matches!(failure, RunFailure::Protocol { message } if message.contains("bad frame")));
    }

    #[test]
    fn cancelled_failure_becomes_cancelled_adapter_error() {
        assert_eq!(AdapterError::from(RunFailure::Cancelled), AdapterError::Cancelled);
        assert!(matches!(
            AdapterError::from(RunFailure::MalformedStream),
            AdapterError::RunFailed(RunFailure::MalformedStream)
        ));
    }

    #[test]
    fn run_failure_serializes_with_kind_tag() {
        let value = serde_json::to_value(RunFailure::tool_execution("1", "lookup", "boom"))
            .expect("serialize");
        assert_eq!(value["kind"], "tool_execution");
        assert_eq!(value["tool_name"], "lookup");
    }
}
