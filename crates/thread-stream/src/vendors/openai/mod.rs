//! OpenAI-compatible provider integration and request options.
//!
//! Vendor-specific configuration lives here so the root adapter API can remain
//! provider-agnostic.
mod adapter;
mod config;
mod options;
pub(crate) mod transport;

pub use adapter::OpenAiProvider;
pub use config::OpenAiClientConfig;
pub use options::{OpenAiReasoningEffort, OpenAiRequestOptions};

use crate::ProviderId;
use crate::run::RunBuilder;
use tracing::warn;

/// Extension trait for attaching OpenAI-specific options to a `RunBuilder`.
pub trait OpenAiRunBuilderExt {
    /// Adds OpenAI request options for the current run.
    ///
    /// These options are stored under the `openai` provider key and read only
    /// by `OpenAiProvider`.
    fn openai_options(self, options: OpenAiRequestOptions) -> Self;
}

impl OpenAiRunBuilderExt for RunBuilder {
    fn openai_options(self, options: OpenAiRequestOptions) -> Self {
        match serde_json::to_value(options) {
            Ok(value) => self.set_vendor_options_json(ProviderId::new("openai"), value),
            Err(err) => {
                warn!(error = %err, "dropping OpenAI request options that failed to serialize");
                self
            }
        }
    }
}
