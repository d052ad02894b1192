//! One-shot speech synthesis collaborator.
//!
//! Each segmented sentence becomes an independent `synthesize` call; calls
//! for different sentences run concurrently and may complete out of order,
//! which the orchestrator's reorder buffer absorbs.

use async_trait::async_trait;

use crate::config::ServerConfig;

#[derive(Debug, Clone, thiserror::Error)]
pub enum TtsError {
    #[error("Request failed: {0}")]
    Request(String),
    #[error("Provider error: {0}")]
    Provider(String),
}

/// Speech synthesis collaborator: text in, linear PCM bytes out.
#[async_trait]
pub trait TtsClient: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, TtsError>;
}

/// REST synthesis client (Deepgram-style `POST /v1/speak`)
pub struct HttpTts {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl HttpTts {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: config.tts_url.clone(),
            api_key: config.tts_api_key.clone(),
        }
    }
}

#[async_trait]
impl TtsClient for HttpTts {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, TtsError> {
        let mut request = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "text": text }));
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Token {key}"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| TtsError::Request(e.to_string()))?;
        if !response.status().is_success() {
            return Err(TtsError::Provider(format!(
                "synthesis returned {}",
                response.status()
            )));
        }
        let audio = response
            .bytes()
            .await
            .map_err(|e| TtsError::Request(e.to_string()))?;
        Ok(audio.to_vec())
    }
}
