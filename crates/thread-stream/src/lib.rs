//! Streaming thread updates for chat UIs, with tool calls resolved in-stream.
//!
//! A run obtains one raw model stream from a provider adapter, resolves tool
//! calls against a caller-owned `ToolRegistry`, and exposes the result as
//! `ThreadUpdate`s for a UI binding layer.
//!
//! Vendor-specific APIs are namespaced under `vendors::*`.
//!
//! # Builder-first usage (OpenAI-compatible)
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use thread_stream::prelude::*;
//! use thread_stream::vendors::openai::OpenAiProvider;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), AdapterError> {
//! let tools = ToolRegistry::builder()
//!     .tool_fn(ToolDeclaration::new("lookup"), |_args, _cancel| async move {
//!         Ok(serde_json::json!("42"))
//!     })
//!     .build()?;
//!
//! let adapter = ThreadAdapter::builder()
//!     .register_provider(Arc::new(OpenAiProvider::from_env()?))
//!     .tools(tools)
//!     .build()?;
//!
//! let mut run = adapter
//!     .thread(ThreadConfig::named("demo"))
//!     .run(ModelRef::new("openai", "gpt-4o-mini"))
//!     .system_prompt("Answer briefly.")
//!     .user_text("What is the answer?")
//!     .start_stream()
//!     .await?;
//!
//! while let Some(update) = run.next_update().await {
//!     if let ThreadUpdate::ContentDelta { text } = update {
//!         print!("{text}");
//!     }
//! }
//! # Ok(())
//! # }
//! ```

/// Adapter entry point and builder.
pub mod adapter;
/// Thread messages and final run output helpers.
pub mod content;
/// Public error types.
pub mod errors;
/// Model and provider identifiers plus call settings and run options.
pub mod model;
/// Logging setup.
pub mod observability;
/// Common imports for typical usage.
pub mod prelude;
/// Provider adapter contracts and raw wire events.
pub mod provider;
/// Run builder, streaming handle, and cancellation handle.
pub mod run;
/// Per-run lifecycle state.
pub mod state;
/// Tool-augmented events and thread updates.
pub mod stream;
/// Thread configuration and thread handle.
pub mod thread;
/// Tool declarations, executors, and the registry.
pub mod tool;
pub mod transform;
/// Vendor-specific integrations and extension traits.
pub mod vendors;

pub use adapter::{ThreadAdapter, ThreadAdapterBuilder};
pub use content::{MessagePart, OutputPart, Role, RunOutput, ThreadMessage, Usage};
pub use errors::{AdapterError, ProviderError, RunFailure, ToolError};
pub use model::{CallSettings, ModelRef, ProviderId, RunOptions};
pub use provider::{
    ProviderAdapter, ProviderRequest, ProviderResponseMeta, ProviderStreamHandle, RawEvent,
    RawEventStream,
};
pub use run::{AbortHandle, RunBuilder, RunStream};
pub use state::RunState;
pub use stream::{RunStatus, ThreadUpdate, ToolStreamEvent};
pub use thread::{Thread, ThreadConfig};
pub use tool::{FnTool, ToolCall, ToolDeclaration, ToolExecutor, ToolRegistry};
