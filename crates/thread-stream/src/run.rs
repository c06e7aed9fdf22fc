use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt as _;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info};

use crate::adapter::AdapterInner;
use crate::content::{MessagePart, OutputPart, Role, RunOutput, ThreadMessage};
use crate::errors::{AdapterError, RunFailure};
use crate::model::{CallSettings, ModelRef, ProviderId, RunOptions};
use crate::provider::{ProviderAdapter, ProviderRequest};
use crate::state::RunState;
use crate::stream::{RunStatus, ThreadUpdate};
use crate::tool::ToolRegistry;
use crate::transform::thread_update_stream;

/// Handle used to request cancellation of a running stream.
#[derive(Clone)]
pub struct AbortHandle {
    token: CancellationToken,
}

impl AbortHandle {
    /// Requests cancellation.
    ///
    /// Cancellation reaches the transport, the transforms, and any running
    /// tool executor. It becomes visible as a terminal
    /// `ThreadUpdate::Error` with `RunFailure::Cancelled`.
    pub fn abort(&self) {
        self.token.cancel();
    }

    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Builder for configuring and starting a single run.
///
/// This is the main user-facing API for providing the system prompt, message
/// history, and call settings before either streaming updates or collecting a
/// final result.
pub struct RunBuilder {
    adapter: Arc<AdapterInner>,
    thread_id: uuid::Uuid,
    thread_name: String,
    model: ModelRef,
    system_prompt: Option<String>,
    messages: Vec<ThreadMessage>,
    call_settings: CallSettings,
    config: serde_json::Map<String, Value>,
    options: RunOptions,
    vendor_options: HashMap<ProviderId, Value>,
    parent_cancel: Option<CancellationToken>,
}

impl RunBuilder {
    pub(crate) fn new(
        adapter: Arc<AdapterInner>,
        thread_id: uuid::Uuid,
        thread_name: String,
        model: ModelRef,
    ) -> Self {
        Self {
            adapter,
            thread_id,
            thread_name,
            model,
            system_prompt: None,
            messages: Vec::new(),
            call_settings: CallSettings::default(),
            config: serde_json::Map::new(),
            options: RunOptions::default(),
            vendor_options: HashMap::new(),
            parent_cancel: None,
        }
    }

    /// Sets the system prompt for the run.
    pub fn system_prompt(mut self, text: impl Into<String>) -> Self {
        self.system_prompt = Some(text.into());
        self
    }

    /// Appends one message to the history sent with the run.
    pub fn message(mut self, message: ThreadMessage) -> Self {
        self.messages.push(message);
        self
    }

    /// Appends several messages in order.
    pub fn messages(mut self, messages: impl IntoIterator<Item = ThreadMessage>) -> Self {
        self.messages.extend(messages);
        self
    }

    /// Appends a plain text user message.
    pub fn user_text(self, text: impl Into<String>) -> Self {
        self.message(ThreadMessage::user(text))
    }

    pub fn call_settings(mut self, settings: CallSettings) -> Self {
        self.call_settings = settings;
        self
    }

    /// Adds a free-form request field. Later values override earlier ones.
    pub fn config(mut self, key: impl Into<String>, value: Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }

    /// Sets an optional per-run transport timeout.
    pub fn timeout(mut self, timeout: std::time::Duration) -> Self {
        self.options.timeout = Some(timeout);
        self
    }

    /// Sets the bounded update buffer size used between the run task and the
    /// consumer.
    pub fn stream_buffer_capacity(mut self, capacity: usize) -> Self {
        self.options.stream_buffer_capacity = capacity;
        self
    }

    /// Links the run to an external cancellation signal.
    ///
    /// Cancelling `token` cancels the run; aborting the run does not cancel
    /// `token`.
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.parent_cancel = Some(token);
        self
    }

    pub(crate) fn set_vendor_options_json(mut self, provider: ProviderId, value: Value) -> Self {
        self.vendor_options.insert(provider, value);
        self
    }

    #[cfg(test)]
    pub(crate) fn vendor_options_value(&self, provider: &ProviderId) -> Option<&Value> {
        self.vendor_options.get(provider)
    }

    /// Validates the builder state and starts a streaming run.
    ///
    /// The returned `RunStream` yields thread updates ending in exactly one
    /// terminal `Done`/`Error` update. Each call issues a new request.
    pub async fn start_stream(self) -> Result<RunStream, AdapterError> {
        let adapter = self.adapter.clone();
        let cancel = match &self.parent_cancel {
            Some(parent) => parent.child_token(),
            None => CancellationToken::new(),
        };
        let thread_name = self.thread_name.clone();
        let request = self.validate_and_build_request()?;
        let provider = adapter
            .provider(&request.model.provider)
            .ok_or_else(|| AdapterError::ProviderNotFound {
                provider: request.model.provider.clone(),
            })?;

        let (tx, rx) = mpsc::channel(request.options.stream_buffer_capacity);
        let (final_tx, final_rx) = oneshot::channel();

        let run_id = request.run_id;
        let thread_id = request.thread_id;
        let model = request.model.clone();
        info!(run_id = %run_id, thread = %thread_name, provider = %model.provider, model = %model.model, "starting run");
        tokio::spawn(run_task(
            provider,
            request,
            adapter.tools.clone(),
            tx,
            final_tx,
            cancel.clone(),
        ));
        // the request is in flight once the task is spawned
        let mut state = RunState::Idle;
        state.advance(RunState::Streaming);

        Ok(RunStream {
            run_id,
            thread_id,
            provider: model.provider,
            model: model.model,
            rx,
            final_rx,
            abort_handle: AbortHandle {
                token: cancel.clone(),
            },
            state,
            _cancel_on_drop: cancel.drop_guard(),
        })
    }

    /// Runs to completion and returns the final aggregated output.
    pub async fn collect_output(self) -> Result<RunOutput, AdapterError> {
        let stream = self.start_stream().await?;
        stream.finish().await
    }

    /// Runs to completion and returns concatenated text output.
    pub async fn collect_text(self) -> Result<String, AdapterError> {
        Ok(self.collect_output().await?.text())
    }

    fn validate_and_build_request(self) -> Result<ProviderRequest, AdapterError> {
        if self.model.provider.as_str().trim().is_empty() {
            return Err(AdapterError::Validation(
                "model provider must not be empty".into(),
            ));
        }
        if self.model.model.trim().is_empty() {
            return Err(AdapterError::Validation("model must not be empty".into()));
        }
        if self.options.stream_buffer_capacity == 0 {
            return Err(AdapterError::Validation(
                "stream_buffer_capacity must be greater than 0".into(),
            ));
        }
        if self.messages.is_empty() {
            return Err(AdapterError::Validation(
                "at least one message is required".into(),
            ));
        }
        for message in &self.messages {
            if message.role == Role::User && is_blank(message) {
                return Err(AdapterError::Validation(
                    "user message must not be empty".into(),
                ));
            }
        }

        Ok(ProviderRequest {
            run_id: uuid::Uuid::new_v4(),
            thread_id: self.thread_id,
            model: self.model,
            system_prompt: self.system_prompt.filter(|s| !s.trim().is_empty()),
            messages: self.messages,
            tools: self.adapter.tools.declarations(),
            call_settings: self.call_settings,
            config: self.config,
            options: self.options,
            vendor_options: self.vendor_options,
        })
    }
}

fn is_blank(message: &ThreadMessage) -> bool {
    message.content.iter().all(|part| match part {
        MessagePart::Text { text } => text.trim().is_empty(),
        _ => false,
    })
}

/// Streaming handle returned by `RunBuilder::start_stream`.
///
/// Use `next_update()` to consume updates as they arrive and `finish()` to
/// obtain the final result after the terminal update. Dropping the handle
/// cancels the run.
pub struct RunStream {
    run_id: uuid::Uuid,
    thread_id: uuid::Uuid,
    provider: ProviderId,
    model: String,
    rx: mpsc::Receiver<ThreadUpdate>,
    final_rx: oneshot::Receiver<Result<RunOutput, AdapterError>>,
    abort_handle: AbortHandle,
    state: RunState,
    _cancel_on_drop: DropGuard,
}

impl RunStream {
    /// Returns the run id for this stream.
    pub fn run_id(&self) -> uuid::Uuid {
        self.run_id
    }

    /// Returns the thread id that owns this run.
    pub fn thread_id(&self) -> uuid::Uuid {
        self.thread_id
    }

    /// Lifecycle state as observed by the consumer.
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Returns a handle that can cancel the run.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort_handle.clone()
    }

    /// Waits for and returns the next thread update.
    ///
    /// Returns `None` after the terminal update has been delivered.
    pub async fn next_update(&mut self) -> Option<ThreadUpdate> {
        if self.state.is_terminal() {
            return None;
        }
        let update = self.rx.recv().await?;
        self.state.observe(&update);
        Some(update)
    }

    /// Converts the handle into a `futures::Stream` of updates.
    pub fn into_updates(self) -> impl futures::Stream<Item = ThreadUpdate> + Send {
        futures::stream::unfold(self, |mut run| async move {
            let update = run.next_update().await?;
            Some((update, run))
        })
    }

    /// Drains the stream (if needed) and returns the terminal run result.
    ///
    /// This is safe to call after consuming updates manually with
    /// `next_update()`.
    pub async fn finish(mut self) -> Result<RunOutput, AdapterError> {
        while self.next_update().await.is_some() {}

        match (&mut self.final_rx).await {
            Ok(result) => result,
            Err(_) => Err(AdapterError::protocol_msg(format!(
                "run task ended without final result (provider={}, model={})",
                self.provider, self.model
            ))),
        }
    }
}

async fn run_task(
    provider: Arc<dyn ProviderAdapter>,
    request: ProviderRequest,
    tools: ToolRegistry,
    tx: mpsc::Sender<ThreadUpdate>,
    final_tx: oneshot::Sender<Result<RunOutput, AdapterError>>,
    cancel: CancellationToken,
) {
    let run_id = request.run_id;
    let provider_id = request.model.provider.clone();

    let started = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(RunFailure::Cancelled),
        started = provider.start_stream(request, cancel.clone()) => started.map_err(RunFailure::from),
    };
    let handle = match started {
        Ok(handle) => handle,
        Err(failure) => {
            info!(run_id = %run_id, provider = %provider_id, error = %failure, "run failed to start");
            let _ = send_update(
                &tx,
                ThreadUpdate::Error {
                    error: failure.clone(),
                },
            )
            .await;
            let _ = final_tx.send(Err(failure.into()));
            return;
        }
    };
    if let Some(request_id) = handle.metadata.request_id.as_deref() {
        debug!(run_id = %run_id, request_id, "provider stream opened");
    }

    let mut updates = std::pin::pin!(thread_update_stream(handle.stream, tools, cancel.clone()));
    let mut output = RunOutput::default();
    let mut seq = 0_u64;
    while let Some(update) = updates.next().await {
        let result = match &update {
            ThreadUpdate::ContentDelta { text } => {
                if text.is_empty() {
                    continue;
                }
                debug!(run_id = %run_id, provider = %provider_id, seq, "content delta");
                output.push_text(text);
                None
            }
            ThreadUpdate::ToolResult {
                id,
                name,
                args,
                result,
            } => {
                debug!(run_id = %run_id, tool_call_id = %id, tool_name = %name, "tool result");
                output.parts.push(OutputPart::ToolResult {
                    id: id.clone(),
                    name: name.clone(),
                    args: args.clone(),
                    result: result.clone(),
                });
                None
            }
            ThreadUpdate::Status {
                status: RunStatus::RequiresAction { id, name, args },
            } => {
                output.parts.push(OutputPart::PendingToolCall {
                    id: id.clone(),
                    name: name.clone(),
                    args: args.clone(),
                });
                None
            }
            ThreadUpdate::Status { .. } => None,
            ThreadUpdate::Done {
                finish_reason,
                usage,
            } => {
                output.finish_reason = finish_reason.clone();
                output.usage = *usage;
                info!(run_id = %run_id, finish_reason = ?finish_reason, "run completed");
                Some(Ok(std::mem::take(&mut output)))
            }
            ThreadUpdate::Error { error } => {
                info!(run_id = %run_id, error = %error, "run ended with error");
                Some(Err(AdapterError::from(error.clone())))
            }
        };
        seq = seq.saturating_add(1);

        if !send_update(&tx, update).await {
            debug!(run_id = %run_id, "update receiver dropped, cancelling run");
            cancel.cancel();
            let _ = final_tx.send(Err(AdapterError::protocol_msg(
                "run stream receiver dropped",
            )));
            return;
        }
        if let Some(result) = result {
            let _ = final_tx.send(result);
            return;
        }
    }

    let _ = final_tx.send(Err(AdapterError::protocol_msg(
        "update stream ended without a terminal update",
    )));
}

async fn send_update(tx: &mpsc::Sender<ThreadUpdate>, update: ThreadUpdate) -> bool {
    tx.send(update).await.is_ok()
}
