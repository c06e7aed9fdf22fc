use std::pin::Pin;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::content::{ThreadMessage, Usage};
use crate::errors::ProviderError;
use crate::model::{CallSettings, ModelRef, ProviderId, RunOptions};
use crate::tool::ToolDeclaration;

/// Provider wire events after decoding, before tool resolution.
#[derive(Clone, Debug, PartialEq)]
pub enum RawEvent {
    /// Incremental assistant text.
    TextDelta { text: String },
    /// Incremental tool-call arguments. `name` may be empty after the first
    /// delta for an id.
    ToolCallDelta {
        id: String,
        name: String,
        args_delta: String,
    },
    /// The model finished emitting a tool call. `args` is set when the source
    /// already decoded the full arguments.
    ToolCallComplete {
        id: String,
        name: String,
        args: Option<Value>,
    },
    /// End of the model turn.
    Finish {
        finish_reason: Option<String>,
        usage: Option<Usage>,
    },
    /// Error reported in-band by the provider. Unlike an `Err` item the
    /// transport itself is still healthy.
    Error { error: ProviderError },
}

/// Stream of raw events; `Err` items are transport failures.
pub type RawEventStream =
    Pin<Box<dyn futures::Stream<Item = Result<RawEvent, ProviderError>> + Send + 'static>>;

/// Request handed to a provider adapter for one run.
#[derive(Clone, Debug)]
pub struct ProviderRequest {
    pub run_id: uuid::Uuid,
    pub thread_id: uuid::Uuid,
    pub model: ModelRef,
    pub system_prompt: Option<String>,
    pub messages: Vec<ThreadMessage>,
    pub tools: Vec<ToolDeclaration>,
    pub call_settings: CallSettings,
    /// Free-form request fields merged into the provider body.
    pub config: serde_json::Map<String, Value>,
    pub options: RunOptions,
    pub vendor_options: std::collections::HashMap<ProviderId, Value>,
}

/// Response metadata captured when the stream is opened.
#[derive(Clone, Debug, Default)]
pub struct ProviderResponseMeta {
    pub request_id: Option<String>,
}

/// Open raw stream returned by `ProviderAdapter::start_stream`.
pub struct ProviderStreamHandle {
    pub stream: RawEventStream,
    pub metadata: ProviderResponseMeta,
}

/// Transport for one model provider.
#[async_trait::async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn id(&self) -> ProviderId;

    /// Issues the request and returns the raw event stream.
    ///
    /// `cancel` fires when the caller aborts the run; adapters should stop
    /// connecting and reading once it does.
    async fn start_stream(
        &self,
        req: ProviderRequest,
        cancel: CancellationToken,
    ) -> Result<ProviderStreamHandle, ProviderError>;
}
