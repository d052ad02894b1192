//! Session registry: the one shared map of live sessions.
//!
//! Owns creation, lookup, deletion and the idle sweep. Every path that ends
//! a session — explicit close, disconnect, budget cutoff, idle eviction —
//! funnels through [`SessionRegistry::close_session`] so downstream handles
//! are always released, the user's slot returned, and the summary handed off.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::core::concurrency::UserConcurrency;
use crate::core::persist::{SummarySink, persist_in_background};
use crate::core::session::{CloseReason, Session};
use crate::errors::SessionError;

pub struct SessionRegistry {
    sessions: DashMap<String, Arc<Session>>,
    concurrency: Arc<UserConcurrency>,
    persistence: Arc<dyn SummarySink>,
    max_history: usize,
    idle_timeout: Duration,
    sweep_interval: Duration,
}

impl SessionRegistry {
    pub fn new(
        concurrency: Arc<UserConcurrency>,
        persistence: Arc<dyn SummarySink>,
        max_history: usize,
        idle_timeout: Duration,
        sweep_interval: Duration,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            concurrency,
            persistence,
            max_history,
            idle_timeout,
            sweep_interval,
        }
    }

    /// Create a session under the given id. A duplicate id is a logic error
    /// (connection handlers mint UUIDs), not a user-facing failure.
    pub fn create(&self, session_id: &str) -> Result<Arc<Session>, SessionError> {
        if self.sessions.contains_key(session_id) {
            return Err(SessionError::Internal(format!(
                "session {session_id} already exists"
            )));
        }
        let session = Arc::new(Session::new(session_id.to_string(), self.max_history));
        self.sessions.insert(session_id.to_string(), session.clone());
        debug!(session_id, "Session created");
        Ok(session)
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.get(session_id).map(|s| s.clone())
    }

    pub fn delete(&self, session_id: &str) {
        self.sessions.remove(session_id);
    }

    pub fn list_all(&self) -> Vec<Arc<Session>> {
        self.sessions.iter().map(|e| e.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// The single teardown path. Idempotent: only the first caller runs it.
    ///
    /// Releases the STT handle, aborts in-flight LLM/TTS tasks, returns the
    /// user's concurrency slot, and hands the summary off for persistence
    /// (fire-and-forget) before removing the session from the map.
    pub async fn close_session(&self, session: &Arc<Session>, reason: CloseReason) {
        if !session.mark_closed() {
            return;
        }
        info!(
            session_id = %session.id,
            reason = reason.as_str(),
            cost = session.running_cost(),
            "Closing session"
        );

        session.abort_tasks();
        session.release_stt().await;

        if let Some(user_id) = session.user_id() {
            self.concurrency.release(&user_id);
        }

        persist_in_background(self.persistence.clone(), session.summary(reason));
        self.sessions.remove(&session.id);
    }

    /// Spawn the background idle sweep. Snapshot-then-act: sessions removed
    /// concurrently are simply skipped by the idempotent close.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(registry.sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                registry.sweep_idle().await;
            }
        })
    }

    /// One sweep pass over a snapshot of the registry.
    pub async fn sweep_idle(&self) {
        let snapshot = self.list_all();
        for session in snapshot {
            if session.idle_for() >= self.idle_timeout {
                warn!(
                    session_id = %session.id,
                    idle_secs = session.idle_for().as_secs(),
                    "Evicting idle session"
                );
                self.close_session(&session, CloseReason::IdleTimeout).await;
            }
        }
    }
}
