//! Session record: one client connection's worth of conversational state.
//!
//! All mutable fields sit behind cheap locks or atomics; the websocket
//! controller, the audio ingest pump and the response orchestrator all touch
//! the same record from different tasks, so every mutation goes through these
//! accessors rather than raw field access.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::task::AbortHandle;

use crate::core::llm::ChatMessage;
use crate::core::stt::SttStream;

/// Session lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Initializing,
    Authenticated,
    Listening,
    Transcribing,
    Thinking,
    Speaking,
    Closed,
}

/// Why a session was closed; carried into the persisted summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    ClientDisconnect,
    ExplicitClose,
    IdleTimeout,
    BudgetExceeded,
    DurationExceeded,
    AuthFailed,
    Error,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::ClientDisconnect => "client_disconnect",
            CloseReason::ExplicitClose => "closed",
            CloseReason::IdleTimeout => "idle_timeout",
            CloseReason::BudgetExceeded => "budget_exceeded",
            CloseReason::DurationExceeded => "duration_exceeded",
            CloseReason::AuthFailed => "auth_failed",
            CloseReason::Error => "error",
        }
    }
}

/// Accumulated usage counters and the derived running cost.
#[derive(Debug, Default, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetrics {
    pub stt_seconds: f64,
    pub llm_input_tokens: u64,
    pub llm_output_tokens: u64,
    pub tts_chars: u64,
    pub cost: f64,
}

/// Summary handed to the persistence collaborator on teardown.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    pub user_id: Option<String>,
    pub conversation_id: Option<String>,
    pub start_time: u64,
    pub end_time: u64,
    pub duration_ms: u64,
    pub metrics: UsageMetrics,
    pub final_status: String,
}

/// One live voice session.
pub struct Session {
    pub id: String,
    user_id: RwLock<Option<String>>,
    conversation_id: RwLock<Option<String>>,

    created: Instant,
    created_unix_ms: u64,
    last_activity: RwLock<Instant>,

    state: RwLock<SessionState>,
    history: Mutex<VecDeque<ChatMessage>>,
    max_history: usize,
    metrics: Mutex<UsageMetrics>,

    /// One-shot latch for the 80% budget warning
    budget_warned: AtomicBool,
    /// Set exactly once; guards the teardown path
    closed: AtomicBool,

    /// Strictly increasing sentence index across the whole session
    sentence_seq: AtomicU64,
    /// Accepted audio chunk counter, drives the periodic ack
    chunks_received: AtomicU64,
    /// Total accepted audio bytes, reported in the ack
    audio_bytes: AtomicU64,

    /// Serializes response turns; a final transcript landing mid-turn waits
    /// here, and waiters acquire in arrival order
    turn_gate: tokio::sync::Mutex<()>,

    /// Live STT stream handle, if one is open
    stt: tokio::sync::Mutex<Option<Box<dyn SttStream>>>,
    /// Abort handles for downstream tasks (STT pump, turn, in-flight TTS)
    tasks: Mutex<Vec<AbortHandle>>,
}

impl Session {
    pub fn new(id: String, max_history: usize) -> Self {
        let now = Instant::now();
        let created_unix_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Self {
            id,
            user_id: RwLock::new(None),
            conversation_id: RwLock::new(None),
            created: now,
            created_unix_ms,
            last_activity: RwLock::new(now),
            state: RwLock::new(SessionState::Initializing),
            history: Mutex::new(VecDeque::new()),
            max_history,
            metrics: Mutex::new(UsageMetrics::default()),
            budget_warned: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            sentence_seq: AtomicU64::new(0),
            chunks_received: AtomicU64::new(0),
            audio_bytes: AtomicU64::new(0),
            turn_gate: tokio::sync::Mutex::new(()),
            stt: tokio::sync::Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        }
    }

    // --- identity ---

    pub fn user_id(&self) -> Option<String> {
        self.user_id.read().clone()
    }

    pub fn set_user_id(&self, user_id: String) {
        *self.user_id.write() = Some(user_id);
    }

    pub fn conversation_id(&self) -> Option<String> {
        self.conversation_id.read().clone()
    }

    pub fn set_conversation_id(&self, conversation_id: String) {
        *self.conversation_id.write() = Some(conversation_id);
    }

    // --- activity / timing ---

    /// Record inbound activity; every client message goes through this.
    pub fn touch(&self) {
        *self.last_activity.write() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.read().elapsed()
    }

    pub fn elapsed(&self) -> Duration {
        self.created.elapsed()
    }

    // --- state machine ---

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Transition states. Once closed a session never leaves `Closed`.
    pub fn set_state(&self, next: SessionState) {
        let mut state = self.state.write();
        if *state != SessionState::Closed {
            *state = next;
        }
    }

    /// First call wins; returns false if the session was already closed.
    pub fn mark_closed(&self) -> bool {
        let first = self
            .closed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if first {
            *self.state.write() = SessionState::Closed;
        }
        first
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    // --- conversation buffer ---

    /// Append a message, evicting oldest entries beyond the cap.
    pub fn push_message(&self, message: ChatMessage) {
        let mut history = self.history.lock();
        history.push_back(message);
        while history.len() > self.max_history {
            history.pop_front();
        }
    }

    pub fn history_snapshot(&self) -> Vec<ChatMessage> {
        self.history.lock().iter().cloned().collect()
    }

    pub fn history_len(&self) -> usize {
        self.history.lock().len()
    }

    // --- usage metering (called only through the UsageMeter) ---

    pub(crate) fn with_metrics<R>(&self, f: impl FnOnce(&mut UsageMetrics) -> R) -> R {
        let mut metrics = self.metrics.lock();
        f(&mut metrics)
    }

    pub fn metrics_snapshot(&self) -> UsageMetrics {
        self.metrics.lock().clone()
    }

    pub fn running_cost(&self) -> f64 {
        self.metrics.lock().cost
    }

    /// Returns true exactly once, the first time the warning threshold is hit.
    pub fn warn_budget_once(&self) -> bool {
        self.budget_warned
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    // --- ordering / acks ---

    pub fn next_sentence_index(&self) -> u64 {
        self.sentence_seq.fetch_add(1, Ordering::SeqCst)
    }

    pub fn peek_sentence_index(&self) -> u64 {
        self.sentence_seq.load(Ordering::SeqCst)
    }

    /// Count an accepted audio chunk; returns the running chunk count and
    /// total byte count.
    pub fn count_audio(&self, bytes: usize) -> (u64, u64) {
        let chunks = self.chunks_received.fetch_add(1, Ordering::Relaxed) + 1;
        let total = self.audio_bytes.fetch_add(bytes as u64, Ordering::Relaxed) + bytes as u64;
        (chunks, total)
    }

    /// Take the session's turn slot. At most one response turn runs at a
    /// time; the guard must be held for the whole turn so sentence indices
    /// and the conversation buffer see turns in order.
    pub async fn begin_turn(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.turn_gate.lock().await
    }

    // --- downstream handles ---

    pub async fn set_stt(&self, stream: Box<dyn SttStream>) {
        *self.stt.lock().await = Some(stream);
    }

    pub async fn with_stt<R>(
        &self,
        f: impl FnOnce(&mut Box<dyn SttStream>) -> R,
    ) -> Option<R> {
        let mut guard = self.stt.lock().await;
        guard.as_mut().map(f)
    }

    pub async fn has_stt(&self) -> bool {
        self.stt.lock().await.is_some()
    }

    /// Finish and drop the STT handle, closing the downstream connection.
    pub async fn release_stt(&self) {
        let mut guard = self.stt.lock().await;
        if let Some(stream) = guard.take() {
            stream.finish();
        }
    }

    pub fn register_task(&self, handle: AbortHandle) {
        let mut tasks = self.tasks.lock();
        tasks.retain(|h| !h.is_finished());
        tasks.push(handle);
    }

    /// Best-effort cancellation of everything in flight.
    pub fn abort_tasks(&self) {
        for handle in self.tasks.lock().drain(..) {
            handle.abort();
        }
    }

    // --- summary ---

    pub fn summary(&self, reason: CloseReason) -> SessionSummary {
        let duration_ms = self.created.elapsed().as_millis() as u64;
        SessionSummary {
            session_id: self.id.clone(),
            user_id: self.user_id(),
            conversation_id: self.conversation_id(),
            start_time: self.created_unix_ms,
            end_time: self.created_unix_ms + duration_ms,
            duration_ms,
            metrics: self.metrics_snapshot(),
            final_status: reason.as_str().to_string(),
        }
    }
}
