//! Streaming language-model collaborator.
//!
//! The orchestrator consumes tokens over a channel rather than registering
//! callbacks, so cancellation is just dropping the receiver or aborting the
//! consuming task. The default client speaks the OpenAI-compatible
//! `/v1/chat/completions` SSE protocol (`data:` lines, `[DONE]` terminator).

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::ServerConfig;

/// Conversation roles the relay tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One entry of the bounded conversation buffer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Token usage as reported by the provider on stream completion
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct TokenUsage {
    #[serde(rename = "prompt_tokens")]
    pub input_tokens: u64,
    #[serde(rename = "completion_tokens")]
    pub output_tokens: u64,
}

/// Events delivered on the LLM stream channel
#[derive(Debug)]
pub enum LlmEvent {
    /// One incremental text delta
    Token(String),
    /// Stream finished; usage is absent when the provider does not report it
    Done { usage: Option<TokenUsage> },
    /// Stream failed; fatal to the turn
    Error(String),
}

/// Streaming completion collaborator
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Open a streaming completion over the given context. Events arrive on
    /// the returned channel; the stream ends with `Done` or `Error`.
    async fn open_stream(
        &self,
        messages: Vec<ChatMessage>,
        system_prompt: &str,
    ) -> mpsc::Receiver<LlmEvent>;
}

/// Rough token estimate when the provider omits usage: chars / 4.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4)
}

/// OpenAI-compatible streaming chat client
pub struct OpenAiLlm {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    model: String,
    temperature: f64,
}

impl OpenAiLlm {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: config.llm_url.clone(),
            api_key: config.llm_api_key.clone(),
            model: config.llm_model.clone(),
            temperature: config.llm_temperature,
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiLlm {
    async fn open_stream(
        &self,
        messages: Vec<ChatMessage>,
        system_prompt: &str,
    ) -> mpsc::Receiver<LlmEvent> {
        let (tx, rx) = mpsc::channel(64);

        let mut payload_messages = vec![serde_json::json!({
            "role": "system",
            "content": system_prompt,
        })];
        for msg in &messages {
            payload_messages.push(serde_json::json!({
                "role": msg.role,
                "content": msg.content,
            }));
        }

        let body = serde_json::json!({
            "model": self.model,
            "messages": payload_messages,
            "temperature": self.temperature,
            "stream": true,
            "stream_options": {"include_usage": true},
        });

        let mut request = self.client.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        tokio::spawn(async move {
            let response = match request.send().await {
                Ok(r) => r,
                Err(e) => {
                    let _ = tx.send(LlmEvent::Error(format!("request failed: {e}"))).await;
                    return;
                }
            };
            if !response.status().is_success() {
                let _ = tx
                    .send(LlmEvent::Error(format!("API error: {}", response.status())))
                    .await;
                return;
            }

            let mut stream = response.bytes_stream();
            let mut usage: Option<TokenUsage> = None;
            // SSE events can split across network chunks; keep a line buffer.
            let mut pending = String::new();

            while let Some(chunk) = stream.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = tx.send(LlmEvent::Error(format!("stream error: {e}"))).await;
                        return;
                    }
                };
                pending.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(newline) = pending.find('\n') {
                    let line = pending[..newline].trim().to_string();
                    pending.drain(..=newline);

                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    if data == "[DONE]" {
                        let _ = tx.send(LlmEvent::Done { usage }).await;
                        return;
                    }
                    let Ok(json) = serde_json::from_str::<serde_json::Value>(data) else {
                        debug!("Skipping unparseable SSE chunk");
                        continue;
                    };
                    if let Some(delta) = json["choices"][0]["delta"]["content"].as_str() {
                        if tx.send(LlmEvent::Token(delta.to_string())).await.is_err() {
                            // Consumer gone (turn cancelled); stop reading.
                            return;
                        }
                    }
                    if let Some(u) = json.get("usage") {
                        if !u.is_null() {
                            match serde_json::from_value::<TokenUsage>(u.clone()) {
                                Ok(parsed) => usage = Some(parsed),
                                Err(e) => warn!("Unparseable usage block: {}", e),
                            }
                        }
                    }
                }
            }

            // Provider closed without [DONE]; treat as completion.
            let _ = tx.send(LlmEvent::Done { usage }).await;
        });

        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_tokens_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn test_role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::User).unwrap(), "\"user\"");
        assert_eq!(
            serde_json::to_string(&Role::Assistant).unwrap(),
            "\"assistant\""
        );
    }

    #[test]
    fn test_token_usage_parses_provider_field_names() {
        let usage: TokenUsage =
            serde_json::from_str(r#"{"prompt_tokens": 12, "completion_tokens": 34}"#).unwrap();
        assert_eq!(usage.input_tokens, 12);
        assert_eq!(usage.output_tokens, 34);
    }
}
