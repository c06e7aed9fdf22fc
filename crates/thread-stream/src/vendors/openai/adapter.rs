use std::collections::VecDeque;
use std::pin::Pin;

use futures::StreamExt as _;
use futures::stream;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::ProviderId;
use crate::content::{MessagePart, Role, ThreadMessage};
use crate::errors::{AdapterError, ProviderError};
use crate::provider::{
    ProviderAdapter, ProviderRequest, ProviderResponseMeta, ProviderStreamHandle, RawEvent,
};

use super::config::OpenAiClientConfig;
use super::options::OpenAiRequestOptions;
use super::transport::{ChatCompletionMapper, SseDecoder};

const OPENAI_PROVIDER: &str = "openai";
const RESERVED_KEYS: [&str; 4] = ["model", "messages", "stream", "tools"];

type ByteStream =
    Pin<Box<dyn futures::Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static>>;

/// Provider adapter for OpenAI-compatible Chat Completions (streaming).
pub struct OpenAiProvider {
    client: reqwest::Client,
    config: OpenAiClientConfig,
}

impl OpenAiProvider {
    /// Creates a provider from explicit client configuration.
    pub fn new(config: OpenAiClientConfig) -> Result<Self, AdapterError> {
        if config.api_key.trim().is_empty() {
            return Err(AdapterError::Config(
                "OpenAI client config api_key must not be empty".into(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AdapterError::Config(format!("failed to build OpenAI client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Creates a provider using `OPENAI_API_KEY` (and `OPENAI_BASE_URL` if set).
    pub fn from_env() -> Result<Self, AdapterError> {
        Self::new(OpenAiClientConfig::from_env()?)
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for OpenAiProvider {
    fn id(&self) -> ProviderId {
        ProviderId::new(OPENAI_PROVIDER)
    }

    async fn start_stream(
        &self,
        req: ProviderRequest,
        cancel: CancellationToken,
    ) -> Result<ProviderStreamHandle, ProviderError> {
        let provider_id = ProviderId::new(OPENAI_PROVIDER);
        let request_options = read_openai_options(&req, &provider_id)?;
        let body = build_request_body(&req, &request_options);
        debug!(run_id = %req.run_id, thread_id = %req.thread_id, model = %req.model.model, tools = req.tools.len(), "starting OpenAI chat completions stream");

        let mut http_req = self
            .client
            .post(self.config.chat_completions_url())
            .bearer_auth(&self.config.api_key)
            .json(&body);
        if let Some(timeout) = req.options.timeout {
            http_req = http_req.timeout(timeout);
        }

        let response = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(ProviderError::transport(provider_id, "request cancelled"));
            }
            response = http_req.send() => response.map_err(|e| {
                ProviderError::transport(provider_id.clone(), format!("OpenAI request failed: {e}"))
            })?,
        };
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ProviderError::provider(
                provider_id,
                format!("OpenAI chat completions request failed with status {status}: {body}"),
                Some(status.as_u16()),
            ));
        }
        let request_id = response
            .headers()
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(ToOwned::to_owned);

        let bytes_stream: ByteStream = Box::pin(response.bytes_stream());
        let stream = openai_event_stream(provider_id, bytes_stream);

        Ok(ProviderStreamHandle {
            stream: Box::pin(stream),
            metadata: ProviderResponseMeta { request_id },
        })
    }
}

fn read_openai_options(
    req: &ProviderRequest,
    provider_id: &ProviderId,
) -> Result<OpenAiRequestOptions, ProviderError> {
    match req.vendor_options.get(provider_id) {
        Some(value) => serde_json::from_value(value.clone()).map_err(|e| {
            ProviderError::protocol(provider_id.clone(), format!("invalid OpenAI options: {e}"))
        }),
        None => Ok(OpenAiRequestOptions::default()),
    }
}

pub(crate) fn build_request_body(req: &ProviderRequest, options: &OpenAiRequestOptions) -> Value {
    let mut messages = Vec::with_capacity(req.messages.len() + 1);
    if let Some(system_prompt) = req
        .system_prompt
        .as_ref()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
    {
        messages.push(serde_json::json!({
            "role": "system",
            "content": system_prompt,
        }));
    }
    for message in &req.messages {
        render_message(message, &mut messages);
    }

    let mut body = serde_json::json!({
        "model": req.model.model,
        "messages": messages,
        "stream": true,
    });

    if !req.tools.is_empty() {
        body["tools"] = req
            .tools
            .iter()
            .map(|tool| {
                let mut function = serde_json::json!({
                    "name": tool.name,
                    "parameters": tool.parameters,
                });
                if let Some(description) = &tool.description {
                    function["description"] = Value::String(description.clone());
                }
                serde_json::json!({ "type": "function", "function": function })
            })
            .collect();
        if let Some(parallel) = options.parallel_tool_calls {
            body["parallel_tool_calls"] = Value::Bool(parallel);
        }
    }
    if options.include_usage.unwrap_or(false) {
        body["stream_options"] = serde_json::json!({ "include_usage": true });
    }
    if let Some(effort) = options.reasoning_effort.as_ref() {
        body["reasoning_effort"] = serde_json::json!(effort);
    }

    let extra = serde_json::to_value(&req.call_settings)
        .ok()
        .and_then(|v| v.as_object().cloned())
        .unwrap_or_default();
    for (key, value) in extra.into_iter().chain(req.config.clone()) {
        if RESERVED_KEYS.contains(&key.as_str()) {
            continue;
        }
        body[key] = value;
    }
    body
}

/// Appends the wire messages for one thread message.
///
/// Tool results become separate `tool` messages after the message that holds
/// them, matching how the API pairs them with assistant tool calls.
fn render_message(message: &ThreadMessage, out: &mut Vec<Value>) {
    let role = match message.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    };
    let mut text = String::new();
    let mut tool_calls = Vec::new();
    let mut tool_results = Vec::new();
    for part in &message.content {
        match part {
            MessagePart::Text { text: t } => text.push_str(t),
            MessagePart::ToolCall { id, name, args } => {
                // undecodable arguments are kept as the model's raw text
                let arguments = match args {
                    Value::String(raw) => raw.clone(),
                    other => other.to_string(),
                };
                tool_calls.push(serde_json::json!({
                    "id": id,
                    "type": "function",
                    "function": { "name": name, "arguments": arguments },
                }));
            }
            MessagePart::ToolResult { id, result, .. } => {
                let content = match result {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                tool_results.push(serde_json::json!({
                    "role": "tool",
                    "tool_call_id": id,
                    "content": content,
                }));
            }
        }
    }

    if message.role == Role::Assistant && !tool_calls.is_empty() {
        out.push(serde_json::json!({
            "role": role,
            "content": if text.is_empty() { Value::Null } else { Value::String(text) },
            "tool_calls": tool_calls,
        }));
    } else if !text.is_empty() {
        out.push(serde_json::json!({ "role": role, "content": text }));
    }
    out.extend(tool_results);
}

fn openai_event_stream(
    provider_id: ProviderId,
    bytes_stream: ByteStream,
) -> impl futures::Stream<Item = Result<RawEvent, ProviderError>> + Send {
    struct State {
        provider_id: ProviderId,
        bytes_stream: ByteStream,
        decoder: SseDecoder,
        mapper: ChatCompletionMapper,
        pending: VecDeque<RawEvent>,
        done: bool,
    }

    stream::try_unfold(
        State {
            provider_id,
            bytes_stream,
            decoder: SseDecoder::default(),
            mapper: ChatCompletionMapper::default(),
            pending: VecDeque::new(),
            done: false,
        },
        |mut state| async move {
            loop {
                if let Some(event) = state.pending.pop_front() {
                    return Ok(Some((event, state)));
                }
                if state.done {
                    return Ok(None);
                }

                match state.bytes_stream.next().await {
                    Some(Ok(chunk)) => {
                        let frames = state.decoder.push_chunk(&chunk);
                        for frame in frames {
                            let events = state.mapper.map_frame(&state.provider_id, &frame)?;
                            state.pending.extend(events);
                        }
                    }
                    Some(Err(e)) => {
                        return Err(ProviderError::transport(
                            state.provider_id,
                            format!("OpenAI streaming read failed: {e}"),
                        ));
                    }
                    None => {
                        if let Some(frame) = state.decoder.finish() {
                            let events = state.mapper.map_frame(&state.provider_id, &frame)?;
                            state.pending.extend(events);
                        }
                        state.pending.extend(state.mapper.end_of_stream());
                        state.done = true;
                    }
                }
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CallSettings, ModelRef, RunOptions};
    use crate::tool::ToolDeclaration;
    use crate::vendors::openai::OpenAiReasoningEffort;
    use std::collections::HashMap;

    fn request_with_messages(messages: Vec<ThreadMessage>) -> ProviderRequest {
        ProviderRequest {
            run_id: uuid::Uuid::new_v4(),
            thread_id: uuid::Uuid::new_v4(),
            model: ModelRef::new("openai", "gpt-4o-mini"),
            system_prompt: Some("sys".into()),
            messages,
            tools: Vec::new(),
            call_settings: CallSettings::default(),
            config: serde_json::Map::new(),
            options: RunOptions::default(),
            vendor_options: HashMap::new(),
        }
    }

    #[test]
    fn request_body_has_stream_system_and_user_messages() {
        let req = request_with_messages(vec![ThreadMessage::user("hello")]);
        let body = build_request_body(&req, &OpenAiRequestOptions::default());
        assert_eq!(body["stream"], true);
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(
            body["messages"],
            serde_json::json!([
                {"role": "system", "content": "sys"},
                {"role": "user", "content": "hello"},
            ])
        );
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn tools_settings_and_config_are_rendered() {
        let mut req = request_with_messages(vec![ThreadMessage::user("hi")]);
        req.tools = vec![ToolDeclaration::new("lookup").description("find")];
        req.call_settings = CallSettings::default().max_tokens(64);
        req.config.insert("user".into(), serde_json::json!("u-1"));
        req.config.insert("model".into(), serde_json::json!("ignored"));
        let body = build_request_body(
            &req,
            &OpenAiRequestOptions::default()
                .parallel_tool_calls(false)
                .include_usage(true)
                .reasoning_effort(OpenAiReasoningEffort::Low),
        );
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tools"][0]["function"]["name"], "lookup");
        assert_eq!(body["tools"][0]["function"]["description"], "find");
        assert_eq!(body["parallel_tool_calls"], false);
        assert_eq!(body["stream_options"]["include_usage"], true);
        assert_eq!(body["reasoning_effort"], "low");
        assert_eq!(body["max_tokens"], 64);
        assert_eq!(body["user"], "u-1");
        assert_eq!(body["model"], "gpt-4o-mini");
    }

    #[test]
    fn assistant_tool_calls_and_results_become_wire_messages() {
        let assistant = ThreadMessage {
            role: Role::Assistant,
            content: vec![MessagePart::ToolCall {
                id: "call_1".into(),
                name: "lookup".into(),
                args: serde_json::json!({"q": "x"}),
            }],
        };
        let req = request_with_messages(vec![
            ThreadMessage::user("hi"),
            assistant,
            ThreadMessage::tool_result("call_1", "lookup", serde_json::json!("42")),
        ]);
        let body = build_request_body(&req, &OpenAiRequestOptions::default());
        let messages = body["messages"].as_array().expect("messages");
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[2]["content"], Value::Null);
        assert_eq!(messages[2]["tool_calls"][0]["function"]["arguments"], "{\"q\":\"x\"}");
        assert_eq!(
            messages[3],
            serde_json::json!({"role": "tool", "tool_call_id": "call_1", "content": "42"})
        );
    }

    #[tokio::test]
    async fn event_stream_decodes_sse_body_across_chunks() {
        let chunks: Vec<Result<bytes::Bytes, reqwest::Error>> = vec![
            Ok(bytes::Bytes::from_static(
                b"data: {\"choices\":[{\"delta\":{\"content\":\"He\"}}]}\n\ndata: {\"choices\":[{\"delta\":{\"con",
            )),
            Ok(bytes::Bytes::from_static(
                b"tent\":\"y\"},\"finish_reason\":\"stop\"}]}\n\ndata: [DONE]\n\n",
            )),
        ];
        let events: Vec<_> = openai_event_stream(
            ProviderId::new("openai"),
            Box::pin(stream::iter(chunks)),
        )
        .collect()
        .await;
        let events: Vec<RawEvent> = events.into_iter().map(|e| e.expect("event")).collect();
        assert_eq!(
            events,
            vec![
                RawEvent::TextDelta { text: "He".into() },
                RawEvent::TextDelta { text: "y".into() },
                RawEvent::Finish {
                    finish_reason: Some("stop".into()),
                    usage: None,
                },
            ]
        );
    }

    #[tokio::test]
    async fn env_gated_smoke_collect_text_if_key_present() {
        if std::env::var("OPENAI_API_KEY")
            .unwrap_or_default()
            .trim()
            .is_empty()
        {
            eprintln!("skipping OpenAI smoke test (OPENAI_API_KEY missing)");
            return;
        }

        let adapter = crate::ThreadAdapter::builder()
            .register_provider(std::sync::Arc::new(
                OpenAiProvider::from_env().expect("provider"),
            ))
            .build()
            .expect("adapter");

        let result = adapter
            .thread(crate::ThreadConfig::named("smoke"))
            .run(crate::ModelRef::new("openai", "gpt-4o-mini"))
            .system_prompt("Return exactly the word: ok")
            .user_text("ok")
            .collect_text()
            .await;

        assert!(result.is_ok(), "OpenAI smoke failed: {result:?}");
    }
}
