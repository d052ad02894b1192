//! Response orchestration: one final transcript in, one spoken answer out.
//!
//! A turn streams LLM tokens, segments them into sentences, fans the
//! sentences out to concurrent TTS calls, and releases the audio strictly in
//! sentence-index order. The turn runs as its own task; every task it spawns
//! registers an abort handle on the session so teardown can cancel the whole
//! pipeline at once. Turns on one session never interleave: each task takes
//! the session's turn gate before touching indices or history, so a user who
//! speaks again mid-answer queues a second turn behind the first.

pub mod reorder;
pub mod segment;

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::core::llm::{ChatMessage, LlmClient, LlmEvent, estimate_tokens};
use crate::core::registry::SessionRegistry;
use crate::core::session::{CloseReason, Session, SessionState};
use crate::core::tts::{TtsClient, TtsError};
use crate::core::usage::{BudgetCheck, UsageMeter};
use crate::errors::SessionError;
use crate::handlers::ws::messages::{OutgoingMessage, WsOutbound};

use reorder::ReorderBuffer;
use segment::{SentenceSplitter, worth_synthesizing};

/// One finished synthesis call, in whatever order it completed
struct TtsDone {
    index: u64,
    text: String,
    started: Instant,
    result: Result<Vec<u8>, TtsError>,
}

pub struct Orchestrator {
    llm: Arc<dyn LlmClient>,
    tts: Arc<dyn TtsClient>,
    meter: Arc<UsageMeter>,
    registry: Arc<SessionRegistry>,
    system_prompt: String,
}

impl Orchestrator {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        tts: Arc<dyn TtsClient>,
        meter: Arc<UsageMeter>,
        registry: Arc<SessionRegistry>,
        config: &ServerConfig,
    ) -> Self {
        Self {
            llm,
            tts,
            meter,
            registry,
            system_prompt: config.llm_system_prompt.clone(),
        }
    }

    /// Start a response turn for a final transcript. Returns immediately;
    /// the turn runs as a session-registered task.
    pub fn spawn_turn(
        self: &Arc<Self>,
        session: Arc<Session>,
        user_text: String,
        out: mpsc::Sender<WsOutbound>,
    ) {
        let orchestrator = Arc::clone(self);
        let task_session = Arc::clone(&session);
        let handle = tokio::spawn(async move {
            orchestrator.run_turn(task_session, user_text, out).await;
        });
        session.register_task(handle.abort_handle());
    }

    async fn run_turn(
        self: Arc<Self>,
        session: Arc<Session>,
        user_text: String,
        out: mpsc::Sender<WsOutbound>,
    ) {
        // Only one turn per session may run; a final transcript that arrives
        // while the assistant is still speaking queues here until the
        // in-flight turn releases the gate.
        let _turn = session.begin_turn().await;
        if session.is_closed() {
            return;
        }

        let turn_started = Instant::now();
        session.push_message(ChatMessage::user(user_text));
        session.set_state(SessionState::Thinking);
        if !emit(&out, OutgoingMessage::AiThinking).await {
            return;
        }

        let history = session.history_snapshot();
        let prompt_chars: usize = self.system_prompt.chars().count()
            + history.iter().map(|m| m.content.chars().count()).sum::<usize>();
        let mut llm_rx = self.llm.open_stream(history, &self.system_prompt).await;

        let (tts_tx, mut tts_rx) = mpsc::channel::<TtsDone>(16);
        let mut splitter = SentenceSplitter::new();
        let mut buffer = ReorderBuffer::new(session.peek_sentence_index());
        // Exclusive upper bound of indices dispatched this turn
        let mut end_index = buffer.next_to_emit();
        let mut full_text = String::new();
        let mut usage = None;
        let mut llm_done = false;
        let mut turn_failed = false;

        loop {
            tokio::select! {
                event = llm_rx.recv(), if !llm_done => match event {
                    Some(LlmEvent::Token(token)) => {
                        full_text.push_str(&token);
                        let chunk = OutgoingMessage::AiResponseChunk {
                            text: token.clone(),
                            full_text: full_text.clone(),
                        };
                        if !emit(&out, chunk).await {
                            return;
                        }
                        for sentence in splitter.push(&token) {
                            if worth_synthesizing(&sentence) {
                                end_index =
                                    self.dispatch_sentence(&session, sentence, &tts_tx) + 1;
                            }
                        }
                    }
                    Some(LlmEvent::Done { usage: reported }) => {
                        llm_done = true;
                        usage = reported;
                        if let Some(rest) = splitter.flush() {
                            if worth_synthesizing(&rest) {
                                end_index = self.dispatch_sentence(&session, rest, &tts_tx) + 1;
                            }
                        }
                    }
                    other => {
                        let message = match other {
                            Some(LlmEvent::Error(message)) => message,
                            _ => "stream ended unexpectedly".to_string(),
                        };
                        warn!(session_id = %session.id, "LLM stream failed: {}", message);
                        let err = SessionError::Llm(message);
                        let _ = emit(&out, OutgoingMessage::error(&err)).await;
                        turn_failed = true;
                        break;
                    }
                },
                done = tts_rx.recv() => {
                    if let Some(done) = done {
                        if !self.handle_completion(&session, &out, &mut buffer, done).await {
                            return;
                        }
                    }
                }
            }

            if llm_done && buffer.is_drained_up_to(end_index) {
                break;
            }
        }

        if !turn_failed {
            self.finish_turn(&session, &out, &full_text, usage, prompt_chars, turn_started)
                .await;
        }
        session.set_state(SessionState::Listening);
    }

    fn dispatch_sentence(
        &self,
        session: &Arc<Session>,
        sentence: String,
        tts_tx: &mpsc::Sender<TtsDone>,
    ) -> u64 {
        let index = session.next_sentence_index();
        debug!(session_id = %session.id, index, "Dispatching sentence to TTS");
        let tts = Arc::clone(&self.tts);
        let tx = tts_tx.clone();
        let handle = tokio::spawn(async move {
            let started = Instant::now();
            let result = tts.synthesize(&sentence).await;
            let _ = tx
                .send(TtsDone {
                    index,
                    text: sentence,
                    started,
                    result,
                })
                .await;
        });
        session.register_task(handle.abort_handle());
        index
    }

    /// Fold one synthesis result into the reorder buffer and emit whatever
    /// became releasable. Returns false when the client channel is gone.
    async fn handle_completion(
        &self,
        session: &Arc<Session>,
        out: &mpsc::Sender<WsOutbound>,
        buffer: &mut ReorderBuffer<(Vec<u8>, String, u64)>,
        done: TtsDone,
    ) -> bool {
        let ready = match done.result {
            Ok(audio) => {
                self.meter
                    .record_tts_chars(session, done.text.chars().count() as u64);
                let latency_ms = done.started.elapsed().as_millis() as u64;
                buffer.insert(done.index, (audio, done.text, latency_ms))
            }
            Err(e) => {
                // One bad sentence is skipped; the rest of the answer plays.
                let err = SessionError::Tts {
                    index: done.index,
                    message: e.to_string(),
                };
                warn!(session_id = %session.id, "{}", err);
                if !emit(out, OutgoingMessage::error(&err)).await {
                    return false;
                }
                buffer.skip(done.index)
            }
        };

        for (index, (audio, text, latency_ms)) in ready {
            session.set_state(SessionState::Speaking);
            let msg = OutgoingMessage::TtsAudio {
                audio,
                text,
                index,
                latency_ms,
            };
            if !emit(out, msg).await {
                return false;
            }
        }
        true
    }

    async fn finish_turn(
        &self,
        session: &Arc<Session>,
        out: &mpsc::Sender<WsOutbound>,
        full_text: &str,
        usage: Option<crate::core::llm::TokenUsage>,
        prompt_chars: usize,
        turn_started: Instant,
    ) {
        let (input_tokens, output_tokens) = match usage {
            Some(u) => (u.input_tokens, u.output_tokens),
            // Provider omitted usage; fall back to a character estimate.
            None => ((prompt_chars as u64).div_ceil(4), estimate_tokens(full_text)),
        };
        self.meter
            .record_llm_tokens(session, input_tokens, output_tokens);

        if !full_text.is_empty() {
            session.push_message(ChatMessage::assistant(full_text.to_string()));
        }

        let latency_ms = turn_started.elapsed().as_millis() as u64;
        info!(
            session_id = %session.id,
            latency_ms,
            cost = session.running_cost(),
            "Turn complete"
        );
        let _ = emit(
            out,
            OutgoingMessage::AiResponseComplete {
                text: full_text.to_string(),
                latency_ms,
            },
        )
        .await;

        // The turn's spend may have pushed the session over a hard limit.
        match self.meter.check(session) {
            BudgetCheck::Ok => {}
            BudgetCheck::Warn { cost } => {
                let _ = emit(out, OutgoingMessage::budget_warning(cost)).await;
            }
            BudgetCheck::BudgetExceeded { cost, ceiling } => {
                let err = SessionError::BudgetExceeded { cost, ceiling };
                self.close_over_limit(session, out, err, CloseReason::BudgetExceeded)
                    .await;
            }
            BudgetCheck::DurationExceeded { elapsed_secs } => {
                let err = SessionError::DurationExceeded(elapsed_secs);
                self.close_over_limit(session, out, err, CloseReason::DurationExceeded)
                    .await;
            }
        }
    }

    async fn close_over_limit(
        &self,
        session: &Arc<Session>,
        out: &mpsc::Sender<WsOutbound>,
        err: SessionError,
        reason: CloseReason,
    ) {
        let _ = emit(out, OutgoingMessage::error(&err)).await;
        if let Some(code) = err.close_code() {
            let _ = out
                .send(WsOutbound::Close {
                    code,
                    reason: err.to_string(),
                })
                .await;
        }
        self.registry.close_session(session, reason).await;
    }
}

async fn emit(out: &mpsc::Sender<WsOutbound>, msg: OutgoingMessage) -> bool {
    out.send(WsOutbound::Event(msg)).await.is_ok()
}
