//! Common imports for typical usage.
//!
//! This module exports the most frequently used builder/runtime types so
//! demos and application code need fewer import lines.
pub use crate::{
    AbortHandle, AdapterError, CallSettings, ModelRef, ProviderId, RunBuilder, RunOutput,
    RunState, RunStatus, RunStream, Thread, ThreadAdapter, ThreadConfig, ThreadMessage,
    ThreadUpdate, ToolDeclaration, ToolError, ToolRegistry,
};
