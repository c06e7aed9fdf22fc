use std::sync::Arc;

use thread_stream::prelude::*;
use thread_stream::vendors::openai::OpenAiProvider;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), AdapterError> {
    let adapter = ThreadAdapter::builder()
        .register_provider(Arc::new(OpenAiProvider::from_env()?))
        .build()?;

    let text = adapter
        .thread(ThreadConfig::named("collect"))
        .run(ModelRef::new("openai", "gpt-4o-mini"))
        .system_prompt("You are a concise assistant. Reply with a short sentence.")
        .user_text("Say hello")
        .call_settings(CallSettings::default().temperature(0.2).max_tokens(64))
        .collect_text()
        .await?;

    println!("{text}");
    Ok(())
}
