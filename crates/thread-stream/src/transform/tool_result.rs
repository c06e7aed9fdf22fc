use std::collections::HashMap;

use futures::StreamExt as _;
use futures::stream;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::{RunFailure, ToolError};
use crate::provider::{RawEvent, RawEventStream};
use crate::stream::ToolStreamEvent;
use crate::tool::{ToolCall, ToolRegistry};

/// Resolves tool calls in a raw event stream.
///
/// Every `ToolCallComplete` for a tool with an executor is replaced in place by
/// a `ToolResult`; completions for tools without one pass through unresolved.
/// The stream ends after `Finish` or after the first `Error`, which covers
/// executor failures, transport failures, and cancellation.
pub fn tool_result_stream(
    raw: RawEventStream,
    registry: ToolRegistry,
    cancel: CancellationToken,
) -> impl futures::Stream<Item = ToolStreamEvent> + Send {
    stream::unfold(
        ToolResolver {
            raw,
            registry,
            cancel,
            calls: HashMap::new(),
            done: false,
        },
        |mut state| async move {
            if state.done {
                return None;
            }
            let event = state.next_event().await?;
            state.done = matches!(
                event,
                ToolStreamEvent::Finish { .. } | ToolStreamEvent::Error { .. }
            );
            Some((event, state))
        },
    )
}

struct ToolResolver {
    raw: RawEventStream,
    registry: ToolRegistry,
    cancel: CancellationToken,
    calls: HashMap<String, ToolCall>,
    done: bool,
}

impl ToolResolver {
    async fn next_event(&mut self) -> Option<ToolStreamEvent> {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Some(cancelled()),
                next = self.raw.next() => next,
            };
            let event = match next? {
                Ok(event) => event,
                Err(err) => {
                    return Some(ToolStreamEvent::Error { error: err.into() });
                }
            };
            match event {
                RawEvent::TextDelta { text } => return Some(ToolStreamEvent::TextDelta { text }),
                RawEvent::ToolCallDelta {
                    id,
                    name,
                    args_delta,
                } => {
                    let call = self
                        .calls
                        .entry(id.clone())
                        .or_insert_with(|| ToolCall::new(id.clone()));
                    if call.complete {
                        warn!(tool_call_id = %id, "argument delta after tool call completion ignored");
                        continue;
                    }
                    call.push_delta(&name, &args_delta);
                    return Some(ToolStreamEvent::ToolCallDelta {
                        id,
                        name: call.name.clone(),
                        args_delta,
                    });
                }
                RawEvent::ToolCallComplete { id, name, args } => {
                    if let Some(event) = self.complete_call(id, name, args).await {
                        return Some(event);
                    }
                }
                RawEvent::Finish {
                    finish_reason,
                    usage,
                } => {
                    return Some(ToolStreamEvent::Finish {
                        finish_reason,
                        usage,
                    });
                }
                RawEvent::Error { error } => {
                    return Some(ToolStreamEvent::Error {
                        error: error.into(),
                    });
                }
            }
        }
    }

    /// Returns `None` when the completion is a duplicate and produces no event.
    async fn complete_call(
        &mut self,
        id: String,
        name: String,
        args: Option<Value>,
    ) -> Option<ToolStreamEvent> {
        let call = self
            .calls
            .entry(id.clone())
            .or_insert_with(|| ToolCall::new(id.clone()));
        if call.complete {
            warn!(tool_call_id = %id, "duplicate tool call completion ignored");
            return None;
        }
        call.complete = true;
        call.push_delta(&name, "");
        let name = call.name.clone();
        let decoded = match args {
            Some(args) => Ok(args),
            None => call.arguments().map_err(|e| (e, call.args_text.clone())),
        };

        let Some(executor) = self.registry.executor(&name) else {
            debug!(tool_call_id = %id, tool_name = %name, "no executor registered, forwarding tool call");
            // the caller answers this call, so undecodable text is handed over as-is
            let args = decoded.unwrap_or_else(|(_, text)| Value::String(text));
            return Some(ToolStreamEvent::ToolCallComplete { id, name, args });
        };
        let args = match decoded {
            Ok(args) => args,
            Err((e, _)) => {
                return Some(ToolStreamEvent::Error {
                    error: RunFailure::tool_execution(
                        id,
                        name,
                        format!("invalid tool arguments: {e}"),
                    ),
                });
            }
        };

        debug!(tool_call_id = %id, tool_name = %name, "executing tool");
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Some(cancelled()),
            result = self.registry.run(executor, args.clone(), self.cancel.child_token()) => result,
        };
        match result {
            Ok(result) => Some(ToolStreamEvent::ToolResult {
                id,
                name,
                args,
                result,
            }),
            Err(ToolError::Cancelled) => Some(cancelled()),
            Err(err) => {
                warn!(tool_call_id = %id, tool_name = %name, error = %err, "tool execution failed");
                Some(ToolStreamEvent::Error {
                    error: RunFailure::tool_execution(id, name, err.to_string()),
                })
            }
        }
    }
}

fn cancelled() -> ToolStreamEvent {
    ToolStreamEvent::Error {
        error: RunFailure::Cancelled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ProviderError;
    use crate::tool::ToolDeclaration;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn raw(events: Vec<RawEvent>) -> RawEventStream {
        Box::pin(stream::iter(events.into_iter().map(Ok)))
    }

    fn finish() -> RawEvent {
        RawEvent::Finish {
            finish_reason: Some("stop".into()),
            usage: None,
        }
    }

    fn lookup_registry(calls: Arc<AtomicUsize>) -> ToolRegistry {
        ToolRegistry::builder()
            .tool_fn(ToolDeclaration::new("lookup"), move |_args, _cancel| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(serde_json::json!("42"))
                }
            })
            .build()
            .expect("registry")
    }

    async fn collect(
        events: RawEventStream,
        registry: ToolRegistry,
        cancel: CancellationToken,
    ) -> Vec<ToolStreamEvent> {
        tool_result_stream(events, registry, cancel)
            .collect()
            .await
    }

    #[tokio::test]
    async fn replaces_completion_with_tool_result_in_place() {
        let calls = Arc::new(AtomicUsize::new(0));
        let out = collect(
            raw(vec![
                RawEvent::TextDelta { text: "Hi".into() },
                RawEvent::ToolCallComplete {
                    id: "1".into(),
                    name: "lookup".into(),
                    args: Some(serde_json::json!({})),
                },
                finish(),
            ]),
            lookup_registry(calls.clone()),
            CancellationToken::new(),
        )
        .await;

        assert_eq!(
            out,
            vec![
                ToolStreamEvent::TextDelta { text: "Hi".into() },
                ToolStreamEvent::ToolResult {
                    id: "1".into(),
                    name: "lookup".into(),
                    args: serde_json::json!({}),
                    result: serde_json::json!("42"),
                },
                ToolStreamEvent::Finish {
                    finish_reason: Some("stop".into()),
                    usage: None,
                },
            ]
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn executes_with_arguments_accumulated_from_deltas() {
        let registry = ToolRegistry::builder()
            .tool_fn(ToolDeclaration::new("echo"), |args, _cancel| async move {
                Ok(args)
            })
            .build()
            .expect("registry");
        let out = collect(
            raw(vec![
                RawEvent::ToolCallDelta {
                    id: "c".into(),
                    name: "echo".into(),
                    args_delta: "{\"city\":".into(),
                },
                RawEvent::ToolCallDelta {
                    id: "c".into(),
                    name: String::new(),
                    args_delta: "\"Oslo\"}".into(),
                },
                RawEvent::ToolCallComplete {
                    id: "c".into(),
                    name: String::new(),
                    args: None,
                },
                finish(),
            ]),
            registry,
            CancellationToken::new(),
        )
        .await;

        assert_eq!(out.len(), 4);
        assert!(matches!(&out[1], ToolStreamEvent::ToolCallDelta { name, .. } if name == "echo"));
        assert_eq!(
            out[2],
            ToolStreamEvent::ToolResult {
                id: "c".into(),
                name: "echo".into(),
                args: serde_json::json!({"city": "Oslo"}),
                result: serde_json::json!({"city": "Oslo"}),
            }
        );
    }

    #[tokio::test]
    async fn unregistered_tool_completion_passes_through() {
        let calls = Arc::new(AtomicUsize::new(0));
        let out = collect(
            raw(vec![
                RawEvent::ToolCallComplete {
                    id: "9".into(),
                    name: "confirm".into(),
                    args: Some(serde_json::json!({"ok": true})),
                },
                finish(),
            ]),
            lookup_registry(calls.clone()),
            CancellationToken::new(),
        )
        .await;

        assert_eq!(
            out[0],
            ToolStreamEvent::ToolCallComplete {
                id: "9".into(),
                name: "confirm".into(),
                args: serde_json::json!({"ok": true}),
            }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unregistered_tool_with_undecodable_args_forwards_raw_text() {
        let out = collect(
            raw(vec![
                RawEvent::ToolCallDelta {
                    id: "9".into(),
                    name: "confirm".into(),
                    args_delta: "{partial".into(),
                },
                RawEvent::ToolCallComplete {
                    id: "9".into(),
                    name: "confirm".into(),
                    args: None,
                },
                finish(),
            ]),
            ToolRegistry::default(),
            CancellationToken::new(),
        )
        .await;

        assert_eq!(out.len(), 3);
        assert_eq!(
            out[1],
            ToolStreamEvent::ToolCallComplete {
                id: "9".into(),
                name: "confirm".into(),
                args: Value::String("{partial".into()),
            }
        );
        assert!(matches!(out[2], ToolStreamEvent::Finish { .. }));
    }

    #[tokio::test]
    async fn duplicate_completion_is_dropped_and_executor_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let complete = RawEvent::ToolCallComplete {
            id: "1".into(),
            name: "lookup".into(),
            args: None,
        };
        let out = collect(
            raw(vec![complete.clone(), complete, finish()]),
            lookup_registry(calls.clone()),
            CancellationToken::new(),
        )
        .await;

        let results = out
            .iter()
            .filter(|e| matches!(e, ToolStreamEvent::ToolResult { .. }))
            .count();
        assert_eq!(results, 1);
        assert_eq!(out.len(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn executor_failure_terminates_with_error() {
        let registry = ToolRegistry::builder()
            .tool_fn(ToolDeclaration::new("boom"), |_args, _cancel| async move {
                Err(ToolError::failed("exploded"))
            })
            .build()
            .expect("registry");
        let out = collect(
            raw(vec![
                RawEvent::TextDelta { text: "a".into() },
                RawEvent::ToolCallComplete {
                    id: "1".into(),
                    name: "boom".into(),
                    args: None,
                },
                RawEvent::TextDelta {
                    text: "never".into(),
                },
                finish(),
            ]),
            registry,
            CancellationToken::new(),
        )
        .await;

        assert_eq!(out.len(), 2);
        assert!(matches!(
            &out[1],
            ToolStreamEvent::Error { error: RunFailure::ToolExecution { message, .. } } if message == "exploded"
        ));
    }

    #[tokio::test]
    async fn invalid_accumulated_arguments_fail_the_call() {
        let calls = Arc::new(AtomicUsize::new(0));
        let out = collect(
            raw(vec![
                RawEvent::ToolCallDelta {
                    id: "1".into(),
                    name: "lookup".into(),
                    args_delta: "{not json".into(),
                },
                RawEvent::ToolCallComplete {
                    id: "1".into(),
                    name: "lookup".into(),
                    args: None,
                },
                finish(),
            ]),
            lookup_registry(calls.clone()),
            CancellationToken::new(),
        )
        .await;

        assert_eq!(out.len(), 2);
        assert!(matches!(
            &out[1],
            ToolStreamEvent::Error { error: RunFailure::ToolExecution { .. } }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancellation_during_tool_execution_yields_single_error() {
        let cancel = CancellationToken::new();
        let parent = cancel.clone();
        let registry = ToolRegistry::builder()
            .tool_fn(ToolDeclaration::new("wait"), move |_args, child| {
                let parent = parent.clone();
                async move {
                    parent.cancel();
                    child.cancelled().await;
                    Err(ToolError::Cancelled)
                }
            })
            .build()
            .expect("registry");
        let out = collect(
            raw(vec![
                RawEvent::TextDelta { text: "a".into() },
                RawEvent::ToolCallComplete {
                    id: "1".into(),
                    name: "wait".into(),
                    args: None,
                },
                RawEvent::TextDelta { text: "b".into() },
                finish(),
            ]),
            registry,
            cancel,
        )
        .await;

        assert_eq!(
            out,
            vec![
                ToolStreamEvent::TextDelta { text: "a".into() },
                ToolStreamEvent::Error {
                    error: RunFailure::Cancelled
                },
            ]
        );
    }

    #[tokio::test]
    async fn cancellation_while_waiting_for_source_yields_error() {
        let cancel = CancellationToken::new();
        let source: RawEventStream = Box::pin(stream::pending());
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });
        let out = collect(source, ToolRegistry::default(), cancel).await;
        assert_eq!(
            out,
            vec![ToolStreamEvent::Error {
                error: RunFailure::Cancelled
            }]
        );
    }

    #[tokio::test]
    async fn transport_error_terminates_the_sequence() {
        let source: RawEventStream = Box::pin(stream::iter(vec![
            Ok(RawEvent::TextDelta { text: "a".into() }),
            Err(ProviderError::transport("fake", "connection reset")),
            Ok(finish()),
        ]));
        let out = collect(source, ToolRegistry::default(), CancellationToken::new()).await;
        assert_eq!(out.len(), 2);
        assert!(matches!(
            &out[1],
            ToolStreamEvent::Error { error: RunFailure::Transport { .. } }
        ));
    }

    #[tokio::test]
    async fn in_band_provider_error_terminates_the_sequence() {
        let out = collect(
            raw(vec![
                RawEvent::TextDelta { text: "a".into() },
                RawEvent::Error {
                    error: ProviderError::provider("fake", "overloaded", None),
                },
                RawEvent::TextDelta { text: "b".into() },
                finish(),
            ]),
            ToolRegistry::default(),
            CancellationToken::new(),
        )
        .await;

        assert_eq!(out.len(), 2);
        assert_eq!(out[0], ToolStreamEvent::TextDelta { text: "a".into() });
        assert!(matches!(
            &out[1],
            ToolStreamEvent::Error { error: RunFailure::Provider { message, .. } } if message == "overloaded"
        ));
    }

    #[tokio::test]
    async fn events_after_finish_are_not_forwarded() {
        let out = collect(
            raw(vec![finish(), RawEvent::TextDelta { text: "late".into() }]),
            ToolRegistry::default(),
            CancellationToken::new(),
        )
        .await;
        assert_eq!(out.len(), 1);
    }
}
