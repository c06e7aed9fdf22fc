//! Stream transforms between the provider's raw events and thread updates.
mod run_result;
mod tool_result;

pub use run_result::run_result_stream;
pub use tool_result::tool_result_stream;

use tokio_util::sync::CancellationToken;

use crate::provider::RawEventStream;
use crate::stream::ThreadUpdate;
use crate::tool::ToolRegistry;

/// Pipes a raw stream through tool resolution and then run reduction.
pub fn thread_update_stream(
    raw: RawEventStream,
    registry: ToolRegistry,
    cancel: CancellationToken,
) -> impl futures::Stream<Item = ThreadUpdate> + Send {
    run_result_stream(tool_result_stream(raw, registry, cancel))
}
