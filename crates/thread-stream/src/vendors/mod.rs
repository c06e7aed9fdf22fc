/// OpenAI-compatible Chat Completions integration.
pub mod openai;
