//! Persistence handoff for finished sessions.
//!
//! Strictly fire-and-forget: teardown must complete whether or not the
//! summary lands, so failures are logged and swallowed here.

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::core::session::SessionSummary;
use crate::errors::SessionError;

/// External persistence collaborator
#[async_trait]
pub trait SummarySink: Send + Sync {
    async fn persist(&self, summary: SessionSummary) -> Result<(), SessionError>;
}

/// POSTs summaries to a configured endpoint
pub struct HttpSummarySink {
    client: reqwest::Client,
    url: String,
}

impl HttpSummarySink {
    pub fn new(url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }
}

#[async_trait]
impl SummarySink for HttpSummarySink {
    async fn persist(&self, summary: SessionSummary) -> Result<(), SessionError> {
        let response = self
            .client
            .post(&self.url)
            .json(&summary)
            .send()
            .await
            .map_err(|e| SessionError::Persistence(e.to_string()))?;
        if !response.status().is_success() {
            return Err(SessionError::Persistence(format!(
                "summary endpoint returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Used when no persistence endpoint is configured
pub struct NoopSummarySink;

#[async_trait]
impl SummarySink for NoopSummarySink {
    async fn persist(&self, summary: SessionSummary) -> Result<(), SessionError> {
        debug!(session_id = %summary.session_id, "No persistence endpoint configured, dropping summary");
        Ok(())
    }
}

/// Spawn the handoff without blocking teardown. Errors are logged only.
pub fn persist_in_background(sink: std::sync::Arc<dyn SummarySink>, summary: SessionSummary) {
    tokio::spawn(async move {
        let session_id = summary.session_id.clone();
        if let Err(e) = sink.persist(summary).await {
            warn!(session_id = %session_id, "Failed to persist session summary: {}", e);
        }
    });
}
