//! Per-connection session lifecycle.
//!
//! One controller per socket. It owns the optional session handle: nothing
//! exists until a verified `session_start`, and until then any audio frame is
//! rejected fail-closed with an auth close code.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::core::session::{CloseReason, Session, SessionState};
use crate::errors::SessionError;
use crate::state::AppState;

use super::messages::{IncomingMessage, OutgoingMessage, WsOutbound};

/// What the receive loop should do after a message
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Flow {
    Continue,
    Stop(CloseReason),
}

pub struct SessionController {
    state: AppState,
    out: mpsc::Sender<WsOutbound>,
    /// Minted at upgrade time; becomes the session id on `session_start`
    connection_id: String,
    session: Option<Arc<Session>>,
}

impl SessionController {
    pub fn new(state: AppState, out: mpsc::Sender<WsOutbound>, connection_id: String) -> Self {
        Self {
            state,
            out,
            connection_id,
            session: None,
        }
    }

    pub async fn handle_text(&mut self, text: &str) -> Flow {
        let msg = match serde_json::from_str::<IncomingMessage>(text) {
            Ok(msg) => msg,
            Err(e) => {
                let err = SessionError::Internal(format!("unrecognized message: {e}"));
                let _ = self.emit(OutgoingMessage::error(&err)).await;
                return Flow::Continue;
            }
        };

        if let Some(session) = &self.session {
            session.touch();
        }

        match msg {
            IncomingMessage::SessionStart {
                auth_token,
                conversation_id,
            } => self.start_session(&auth_token, conversation_id).await,
            IncomingMessage::Ping => {
                let timestamp = std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_millis() as u64;
                let _ = self.emit(OutgoingMessage::Pong { timestamp }).await;
                Flow::Continue
            }
            IncomingMessage::Close => Flow::Stop(CloseReason::ExplicitClose),
        }
    }

    async fn start_session(&mut self, auth_token: &str, conversation_id: Option<String>) -> Flow {
        if self.session.is_some() {
            // Recoverable: the existing session keeps running.
            let err = SessionError::AlreadyStarted;
            let _ = self.emit(OutgoingMessage::error(&err)).await;
            return Flow::Continue;
        }

        let user = match self.state.verifier.verify(auth_token).await {
            Ok(user) => user,
            Err(err) => {
                warn!("Session start rejected: {}", err);
                self.reject(&err).await;
                return Flow::Stop(CloseReason::AuthFailed);
            }
        };

        if let Err(err) = self.state.concurrency.try_acquire(&user.user_id) {
            warn!(user_id = %user.user_id, "Session start rejected: {}", err);
            self.reject(&err).await;
            return Flow::Stop(CloseReason::Error);
        }

        let session_id = self.connection_id.clone();
        let session = match self.state.registry.create(&session_id) {
            Ok(session) => session,
            Err(err) => {
                self.state.concurrency.release(&user.user_id);
                self.reject(&err).await;
                return Flow::Stop(CloseReason::Error);
            }
        };
        session.set_user_id(user.user_id.clone());
        if let Some(conv) = &conversation_id {
            session.set_conversation_id(conv.clone());
        }
        session.set_state(SessionState::Authenticated);
        session.set_state(SessionState::Listening);
        info!(session_id = %session.id, user_id = %user.user_id, "Session started");

        let started = OutgoingMessage::SessionStarted {
            session_id: session.id.clone(),
            user_id: user.user_id,
            conversation_id,
        };
        self.session = Some(session);
        let _ = self.emit(started).await;
        Flow::Continue
    }

    pub async fn handle_audio(&mut self, chunk: Bytes) -> Flow {
        let Some(session) = self.session.clone() else {
            // Audio before session_start is rejected fail-closed.
            let err = SessionError::AuthRequired;
            self.reject(&err).await;
            return Flow::Stop(CloseReason::AuthFailed);
        };
        if session.is_closed() {
            return Flow::Stop(CloseReason::Error);
        }
        session.touch();

        match self.state.ingest.handle_chunk(&session, chunk, &self.out).await {
            Ok(()) => Flow::Continue,
            Err(err) => {
                let _ = self.emit(OutgoingMessage::error(&err)).await;
                match err.close_code() {
                    Some(code) => {
                        let _ = self
                            .out
                            .send(WsOutbound::Close {
                                code,
                                reason: err.to_string(),
                            })
                            .await;
                        let reason = match err {
                            SessionError::BudgetExceeded { .. } => CloseReason::BudgetExceeded,
                            SessionError::DurationExceeded(_) => CloseReason::DurationExceeded,
                            _ => CloseReason::Error,
                        };
                        self.state.registry.close_session(&session, reason).await;
                        Flow::Stop(reason)
                    }
                    None => Flow::Continue,
                }
            }
        }
    }

    /// Tear down whatever session this connection owns. Safe to call on
    /// every exit path; the registry close is idempotent.
    pub async fn finish(&mut self, reason: CloseReason) {
        if let Some(session) = self.session.take() {
            self.state.registry.close_session(&session, reason).await;
        }
    }

    async fn emit(&self, msg: OutgoingMessage) -> bool {
        self.out.send(WsOutbound::Event(msg)).await.is_ok()
    }

    async fn reject(&self, err: &SessionError) {
        let _ = self.emit(OutgoingMessage::error(err)).await;
        if let Some(code) = err.close_code() {
            let _ = self
                .out
                .send(WsOutbound::Close {
                    code,
                    reason: err.to_string(),
                })
                .await;
        }
    }
}
