use std::sync::Arc;

use thread_stream::observability::init_observability;
use thread_stream::prelude::*;
use thread_stream::vendors::openai::{OpenAiProvider, OpenAiRequestOptions, OpenAiRunBuilderExt};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), AdapterError> {
    init_observability();

    let tools = ToolRegistry::builder()
        .tool_fn(
            ToolDeclaration::new("get_weather")
                .description("Current weather for a city")
                .parameters(serde_json::json!({
                    "type": "object",
                    "properties": { "city": { "type": "string" } },
                    "required": ["city"]
                })),
            |args, _cancel| async move {
                let city = args
                    .get("city")
                    .and_then(|v| v.as_str())
                    .unwrap_or("somewhere");
                Ok(serde_json::json!({ "city": city, "forecast": "sunny", "celsius": 21 }))
            },
        )
        .execution_timeout(std::time::Duration::from_secs(10))
        .build()?;

    let adapter = ThreadAdapter::builder()
        .register_provider(Arc::new(OpenAiProvider::from_env()?))
        .tools(tools)
        .build()?;
    let thread = adapter.thread(ThreadConfig::named("stream-tools"));

    let mut history = vec![ThreadMessage::user("What's the weather in Oslo?")];
    // one tool round trip, then let the model answer with the result
    for _ in 0..2 {
        let mut run = thread
            .run(ModelRef::new("openai", "gpt-4o-mini"))
            .system_prompt("Use tools when they help. Reply in one sentence.")
            .messages(history.clone())
            .openai_options(OpenAiRequestOptions::default().include_usage(true))
            .start_stream()
            .await?;

        while let Some(update) = run.next_update().await {
            match update {
                ThreadUpdate::ContentDelta { text } => print!("{text}"),
                ThreadUpdate::ToolResult { name, result, .. } => {
                    println!("\n[{name}] -> {result}");
                }
                ThreadUpdate::Status { .. } => {}
                ThreadUpdate::Done { .. } => println!(),
                ThreadUpdate::Error { error } => eprintln!("run error: {error}"),
            }
        }

        let output = run.finish().await?;
        let used_tools = output
            .parts
            .iter()
            .any(|p| matches!(p, thread_stream::OutputPart::ToolResult { .. }));
        history.extend(output.to_messages());
        if !used_tools {
            break;
        }
    }
    Ok(())
}
