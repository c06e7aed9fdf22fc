use std::collections::BTreeMap;

use serde_json::Value;

use crate::ProviderId;
use crate::content::Usage;
use crate::errors::ProviderError;
use crate::provider::RawEvent;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

#[derive(Default)]
pub(crate) struct SseDecoder {
    buf: Vec<u8>,
}

impl SseDecoder {
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some((idx, delim_len)) = find_frame_delimiter(&self.buf) {
            let frame_bytes = self.buf[..idx].to_vec();
            self.buf.drain(..idx + delim_len);
            if let Some(frame) = parse_sse_frame(&frame_bytes) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Parses whatever is left once the body ends without a trailing blank line.
    pub fn finish(&mut self) -> Option<SseFrame> {
        let rest = std::mem::take(&mut self.buf);
        parse_sse_frame(&rest)
    }
}

fn find_frame_delimiter(buf: &[u8]) -> Option<(usize, usize)> {
    let mut i = 0;
    while i + 1 < buf.len() {
        if buf[i] == b'\n' && buf[i + 1] == b'\n' {
            return Some((i, 2));
        }
        if i + 3 < buf.len()
            && buf[i] == b'\r'
            && buf[i + 1] == b'\n'
            && buf[i + 2] == b'\r'
            && buf[i + 3] == b'\n'
        {
            return Some((i, 4));
        }
        i += 1;
    }
    None
}

fn parse_sse_frame(bytes: &[u8]) -> Option<SseFrame> {
    if bytes.is_empty() {
        return None;
    }
    let text = String::from_utf8_lossy(bytes);
    let mut event: Option<String> = None;
    let mut data_lines: Vec<String> = Vec::new();
    for raw_line in text.split('\n') {
        let line = raw_line.trim_end_matches('\r');
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        if let Some(rest) = line.strip_prefix("event:") {
            event = Some(rest.trim_start().to_string());
            continue;
        }
        if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.trim_start().to_string());
        }
    }
    if event.is_none() && data_lines.is_empty() {
        return None;
    }
    Some(SseFrame {
        event,
        data: data_lines.join("\n"),
    })
}

struct PendingCall {
    id: String,
    name: String,
}

/// Maps Chat Completions stream chunks to raw events.
///
/// Tool calls arrive as deltas keyed by `index`; they are completed (in index
/// order) when a chunk carries a `finish_reason`. `Finish` is emitted on
/// `[DONE]` so a trailing usage-only chunk is included.
#[derive(Default)]
pub(crate) struct ChatCompletionMapper {
    calls: BTreeMap<u64, PendingCall>,
    finish_reason: Option<String>,
    usage: Option<Usage>,
    finished: bool,
}

impl ChatCompletionMapper {
    pub fn map_frame(
        &mut self,
        provider: &ProviderId,
        frame: &SseFrame,
    ) -> Result<Vec<RawEvent>, ProviderError> {
        let data = frame.data.trim();
        if data.is_empty() {
            return Ok(Vec::new());
        }
        if data == "[DONE]" {
            return Ok(self.end_of_stream());
        }
        let mut value: Value = serde_json::from_str(data).map_err(|e| {
            ProviderError::protocol(provider.clone(), format!("invalid SSE JSON frame: {e}"))
        })?;
        // some compatible servers send bare error bodies under `event: error`
        if frame.event.as_deref() == Some("error") && value.get("error").is_none() {
            value = serde_json::json!({ "error": value });
        }
        Ok(self.map_chunk(provider, &value))
    }

    pub fn map_chunk(&mut self, provider: &ProviderId, value: &Value) -> Vec<RawEvent> {
        if self.finished {
            return Vec::new();
        }
        if let Some(error) = value.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("OpenAI stream error");
            self.finished = true;
            return vec![RawEvent::Error {
                error: ProviderError::provider(provider.clone(), message, None),
            }];
        }
        if let Some(usage) = value.get("usage").filter(|u| !u.is_null()) {
            self.usage = Some(Usage {
                prompt_tokens: usage
                    .get("prompt_tokens")
                    .and_then(Value::as_u64)
                    .unwrap_or(0),
                completion_tokens: usage
                    .get("completion_tokens")
                    .and_then(Value::as_u64)
                    .unwrap_or(0),
            });
        }

        let mut events = Vec::new();
        let Some(choice) = value
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|choices| choices.first())
        else {
            return events;
        };
        let delta = choice.get("delta").unwrap_or(&Value::Null);
        if let Some(text) = delta.get("content").and_then(Value::as_str)
            && !text.is_empty()
        {
            events.push(RawEvent::TextDelta {
                text: text.to_string(),
            });
        }
        if let Some(tool_calls) = delta.get("tool_calls").and_then(Value::as_array) {
            for tool_call in tool_calls {
                events.push(self.map_tool_call_delta(tool_call));
            }
        }
        if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
            self.finish_reason = Some(reason.to_string());
            for (_, call) in std::mem::take(&mut self.calls) {
                events.push(RawEvent::ToolCallComplete {
                    id: call.id,
                    name: call.name,
                    args: None,
                });
            }
        }
        events
    }

    fn map_tool_call_delta(&mut self, tool_call: &Value) -> RawEvent {
        let index = tool_call.get("index").and_then(Value::as_u64).unwrap_or(0);
        let function = tool_call.get("function").unwrap_or(&Value::Null);
        let name = function
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let args_delta = function
            .get("arguments")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let call = self.calls.entry(index).or_insert_with(|| PendingCall {
            id: tool_call
                .get("id")
                .and_then(Value::as_str)
                .map(ToOwned::to_owned)
                .unwrap_or_else(|| format!("call_{index}")),
            name: String::new(),
        });
        if call.name.is_empty() && !name.is_empty() {
            call.name = name.to_string();
        }
        RawEvent::ToolCallDelta {
            id: call.id.clone(),
            name: name.to_string(),
            args_delta: args_delta.to_string(),
        }
    }

    /// Emits `Finish` once, if the model reported a finish reason.
    pub fn end_of_stream(&mut self) -> Vec<RawEvent> {
        if self.finished || self.finish_reason.is_none() {
            return Vec::new();
        }
        self.finished = true;
        vec![RawEvent::Finish {
            finish_reason: self.finish_reason.take(),
            usage: self.usage.take(),
        }]
    }
}
