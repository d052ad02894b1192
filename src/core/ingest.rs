//! Audio ingest: the path every binary frame takes.
//!
//! Each accepted chunk is gated on budget and duration, size-checked, and
//! forwarded to the session's STT stream, which is opened lazily on the first
//! valid chunk. Transcript events come back on a channel consumed by a pump
//! task that relays partials to the client and hands final utterances to the
//! orchestrator.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::SessionLimits;
use crate::core::orchestrator::Orchestrator;
use crate::core::session::{Session, SessionState};
use crate::core::stt::{SttEvent, SttProvider};
use crate::core::usage::{BudgetCheck, UsageMeter};
use crate::errors::SessionError;
use crate::handlers::ws::messages::{OutgoingMessage, WsOutbound};

/// 16 kHz mono 16-bit PCM
const BYTES_PER_SECOND: f64 = 32_000.0;
/// Every Nth accepted chunk gets an ack so the client can detect a stall
const ACK_EVERY_CHUNKS: u64 = 20;

pub struct AudioIngest {
    stt_provider: Arc<dyn SttProvider>,
    orchestrator: Arc<Orchestrator>,
    meter: Arc<UsageMeter>,
    limits: SessionLimits,
}

impl AudioIngest {
    pub fn new(
        stt_provider: Arc<dyn SttProvider>,
        orchestrator: Arc<Orchestrator>,
        meter: Arc<UsageMeter>,
        limits: SessionLimits,
    ) -> Self {
        Self {
            stt_provider,
            orchestrator,
            meter,
            limits,
        }
    }

    /// Process one binary audio frame from an authenticated session.
    ///
    /// Fatal errors (budget, duration) come back as `Err` with a close code
    /// attached; recoverable ones (chunk size, STT hiccups) as `Err` without.
    /// The caller decides whether to answer with an error event or tear the
    /// connection down.
    pub async fn handle_chunk(
        &self,
        session: &Arc<Session>,
        chunk: Bytes,
        out: &mpsc::Sender<WsOutbound>,
    ) -> Result<(), SessionError> {
        match self.meter.check(session) {
            BudgetCheck::Ok => {}
            BudgetCheck::Warn { cost } => {
                let _ = out
                    .send(WsOutbound::Event(OutgoingMessage::budget_warning(cost)))
                    .await;
            }
            BudgetCheck::BudgetExceeded { cost, ceiling } => {
                return Err(SessionError::BudgetExceeded { cost, ceiling });
            }
            BudgetCheck::DurationExceeded { elapsed_secs } => {
                return Err(SessionError::DurationExceeded(elapsed_secs));
            }
        }

        if chunk.len() < self.limits.min_chunk_bytes || chunk.len() > self.limits.max_chunk_bytes {
            return Err(SessionError::ChunkSize {
                actual: chunk.len(),
                min: self.limits.min_chunk_bytes,
                max: self.limits.max_chunk_bytes,
            });
        }

        if !session.has_stt().await {
            self.open_stream(session, out).await?;
        }

        let sent = session
            .with_stt(|stream| stream.send(chunk.clone()))
            .await
            .unwrap_or_else(|| Err(crate::core::stt::SttError::Send("no stream".to_string())));
        if let Err(e) = sent {
            // A dead stream is released so the next chunk reopens one.
            session.release_stt().await;
            return Err(SessionError::Stt(e.to_string()));
        }

        self.meter
            .record_stt_seconds(session, chunk.len() as f64 / BYTES_PER_SECOND);
        session.set_state(SessionState::Transcribing);

        let (chunks, total_bytes) = session.count_audio(chunk.len());
        if chunks % ACK_EVERY_CHUNKS == 0 {
            let _ = out
                .send(WsOutbound::Event(OutgoingMessage::AudioReceived {
                    bytes: total_bytes,
                }))
                .await;
        }
        Ok(())
    }

    /// Open the session's STT stream and start its transcript pump.
    async fn open_stream(
        &self,
        session: &Arc<Session>,
        out: &mpsc::Sender<WsOutbound>,
    ) -> Result<(), SessionError> {
        let (stream, events) = self
            .stt_provider
            .open()
            .await
            .map_err(|e| SessionError::Stt(e.to_string()))?;
        session.set_stt(stream).await;
        debug!(session_id = %session.id, "STT stream opened");

        let pump_session = Arc::clone(session);
        let pump_out = out.clone();
        let orchestrator = Arc::clone(&self.orchestrator);
        let handle = tokio::spawn(async move {
            transcript_pump(pump_session, events, pump_out, orchestrator).await;
        });
        session.register_task(handle.abort_handle());
        Ok(())
    }
}

/// Consume one STT stream's events until it closes.
async fn transcript_pump(
    session: Arc<Session>,
    mut events: mpsc::Receiver<SttEvent>,
    out: mpsc::Sender<WsOutbound>,
    orchestrator: Arc<Orchestrator>,
) {
    while let Some(event) = events.recv().await {
        match event {
            SttEvent::Transcript {
                text,
                confidence,
                is_final,
            } => {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let msg = if is_final {
                    OutgoingMessage::FinalTranscript {
                        text: trimmed.to_string(),
                        confidence,
                    }
                } else {
                    OutgoingMessage::PartialTranscript {
                        text: trimmed.to_string(),
                        confidence,
                    }
                };
                if out.send(WsOutbound::Event(msg)).await.is_err() {
                    return;
                }
                if is_final {
                    orchestrator.spawn_turn(
                        Arc::clone(&session),
                        trimmed.to_string(),
                        out.clone(),
                    );
                }
            }
            SttEvent::Error(message) => {
                // Transient; the session and its stream stay up.
                warn!(session_id = %session.id, "STT error: {}", message);
                let err = SessionError::Stt(message);
                if out
                    .send(WsOutbound::Event(OutgoingMessage::error(&err)))
                    .await
                    .is_err()
                {
                    return;
                }
            }
            SttEvent::Closed => {
                debug!(session_id = %session.id, "STT stream closed");
                break;
            }
        }
    }
    // Let the next audio chunk open a fresh stream.
    session.release_stt().await;
}
