use std::pin::Pin;

use futures::StreamExt as _;
use futures::stream;
use tracing::warn;

use crate::errors::RunFailure;
use crate::stream::{RunStatus, ThreadUpdate, ToolStreamEvent};

/// Reduces a tool-augmented event stream into thread updates.
///
/// The output always ends with exactly one terminal update. An input that
/// ends without `Finish` or `Error` gets a synthesized
/// `Error { MalformedStream }`.
pub fn run_result_stream<S>(events: S) -> impl futures::Stream<Item = ThreadUpdate> + Send
where
    S: futures::Stream<Item = ToolStreamEvent> + Send + 'static,
{
    let events: Pin<Box<dyn futures::Stream<Item = ToolStreamEvent> + Send>> = Box::pin(events);
    stream::unfold((events, true), |(mut events, turn_open)| async move {
        if !turn_open {
            return None;
        }
        let update = match events.next().await {
            Some(event) => to_thread_update(event),
            None => {
                warn!("event stream ended without a terminal event");
                ThreadUpdate::Error {
                    error: RunFailure::MalformedStream,
                }
            }
        };
        let turn_open = !update.is_terminal();
        Some((update, (events, turn_open)))
    })
}

fn to_thread_update(event: ToolStreamEvent) -> ThreadUpdate {
    match event {
        ToolStreamEvent::TextDelta { text } => ThreadUpdate::ContentDelta { text },
        ToolStreamEvent::ToolCallDelta {
            id,
            name,
            args_delta,
        } => ThreadUpdate::Status {
            status: RunStatus::ToolCallStreaming {
                id,
                name,
                args_delta,
            },
        },
        ToolStreamEvent::ToolCallComplete { id, name, args } => ThreadUpdate::Status {
            status: RunStatus::RequiresAction { id, name, args },
        },
        ToolStreamEvent::ToolResult {
            id,
            name,
            args,
            result,
        } => ThreadUpdate::ToolResult {
            id,
            name,
            args,
            result,
        },
        ToolStreamEvent::Finish {
            finish_reason,
            usage,
        } => ThreadUpdate::Done {
            finish_reason,
            usage,
        },
        ToolStreamEvent::Error { error } => ThreadUpdate::Error { error },
    }
}
