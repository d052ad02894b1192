//! Streaming speech-to-text collaborator.
//!
//! A session opens at most one STT stream, lazily on its first valid audio
//! chunk. Audio goes down through the [`SttStream`] handle; transcript events
//! come back on a channel so the ingest pump owns all session mutation.
//! The default transport is a Deepgram-style websocket configured for 16 kHz
//! mono linear PCM with interim results and an utterance-end silence window.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, warn};

use crate::config::ServerConfig;

/// Stream configuration derived from server config
#[derive(Debug, Clone)]
pub struct SttConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub sample_rate: u32,
    pub utterance_end_ms: u32,
}

impl SttConfig {
    pub fn from_server(config: &ServerConfig) -> Self {
        Self {
            url: config.stt_url.clone(),
            api_key: config.stt_api_key.clone(),
            sample_rate: config.stt_sample_rate,
            utterance_end_ms: config.stt_utterance_end_ms,
        }
    }
}

/// Errors from the STT transport
#[derive(Debug, Clone, thiserror::Error)]
pub enum SttError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Send failed: {0}")]
    Send(String),
}

/// Events emitted by a live STT stream
#[derive(Debug, Clone, PartialEq)]
pub enum SttEvent {
    Transcript {
        text: String,
        confidence: f32,
        is_final: bool,
    },
    /// Transient provider error; the session stays open
    Error(String),
    /// Downstream connection ended; a fresh stream may be opened later
    Closed,
}

/// Handle to a live STT stream. Dropping the handle tears the
/// downstream connection down.
pub trait SttStream: Send + Sync {
    /// Forward one audio chunk.
    fn send(&self, audio: Bytes) -> Result<(), SttError>;
    /// Signal end of audio; the provider flushes any pending transcript.
    fn finish(&self);
}

/// Factory for per-session STT streams
#[async_trait]
pub trait SttProvider: Send + Sync {
    async fn open(&self) -> Result<(Box<dyn SttStream>, mpsc::Receiver<SttEvent>), SttError>;
}

enum SttCommand {
    Audio(Bytes),
    Finish,
}

/// Channel-backed handle for the websocket transport
struct WsSttStream {
    commands: mpsc::UnboundedSender<SttCommand>,
}

impl SttStream for WsSttStream {
    fn send(&self, audio: Bytes) -> Result<(), SttError> {
        self.commands
            .send(SttCommand::Audio(audio))
            .map_err(|_| SttError::Send("stream writer gone".to_string()))
    }

    fn finish(&self) {
        let _ = self.commands.send(SttCommand::Finish);
    }
}

/// Deepgram-style websocket STT provider
pub struct DeepgramStt {
    config: SttConfig,
}

impl DeepgramStt {
    pub fn new(config: SttConfig) -> Self {
        Self { config }
    }

    fn stream_url(&self) -> Result<url::Url, SttError> {
        let mut url = url::Url::parse(&self.config.url)
            .map_err(|e| SttError::Configuration(format!("bad STT url: {e}")))?;
        url.query_pairs_mut()
            .append_pair("encoding", "linear16")
            .append_pair("sample_rate", &self.config.sample_rate.to_string())
            .append_pair("channels", "1")
            .append_pair("interim_results", "true")
            .append_pair("punctuate", "true")
            .append_pair(
                "utterance_end_ms",
                &self.config.utterance_end_ms.to_string(),
            );
        Ok(url)
    }
}

#[async_trait]
impl SttProvider for DeepgramStt {
    async fn open(&self) -> Result<(Box<dyn SttStream>, mpsc::Receiver<SttEvent>), SttError> {
        let url = self.stream_url()?;
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| SttError::Configuration(e.to_string()))?;
        if let Some(key) = &self.config.api_key {
            let value = format!("Token {key}")
                .parse()
                .map_err(|_| SttError::Configuration("invalid API key header".to_string()))?;
            request.headers_mut().insert("Authorization", value);
        }

        let (ws, _) = connect_async(request)
            .await
            .map_err(|e| SttError::ConnectionFailed(e.to_string()))?;
        let (mut write, mut read) = ws.split();

        let (command_tx, mut command_rx) = mpsc::unbounded_channel::<SttCommand>();
        let (event_tx, event_rx) = mpsc::channel::<SttEvent>(64);

        // Writer: audio chunks down, CloseStream on finish.
        tokio::spawn(async move {
            while let Some(command) = command_rx.recv().await {
                let result = match command {
                    SttCommand::Audio(audio) => write.send(Message::Binary(audio)).await,
                    SttCommand::Finish => {
                        let frame = r#"{"type":"CloseStream"}"#;
                        let _ = write.send(Message::Text(frame.into())).await;
                        break;
                    }
                };
                if let Err(e) = result {
                    debug!("STT writer ended: {}", e);
                    break;
                }
            }
            let _ = write.close().await;
        });

        // Reader: provider JSON into events.
        tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        if let Some(event) = parse_transcript_frame(&text) {
                            if event_tx.send(event).await.is_err() {
                                return;
                            }
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!("STT stream error: {}", e);
                        let _ = event_tx.send(SttEvent::Error(e.to_string())).await;
                        break;
                    }
                }
            }
            let _ = event_tx.send(SttEvent::Closed).await;
        });

        Ok((Box::new(WsSttStream { commands: command_tx }), event_rx))
    }
}

/// Parse one provider result frame into a transcript event.
/// Returns None for frames that carry no transcript (metadata, keepalives).
fn parse_transcript_frame(text: &str) -> Option<SttEvent> {
    let json: serde_json::Value = serde_json::from_str(text).ok()?;
    if json["type"].as_str() != Some("Results") {
        return None;
    }
    let alternative = &json["channel"]["alternatives"][0];
    let transcript = alternative["transcript"].as_str()?;
    Some(SttEvent::Transcript {
        text: transcript.to_string(),
        confidence: alternative["confidence"].as_f64().unwrap_or(0.0) as f32,
        is_final: json["is_final"].as_bool().unwrap_or(false),
    })
}
