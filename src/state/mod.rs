//! Shared application state handed to every handler.

use std::sync::Arc;

use crate::auth::{HttpTokenVerifier, StaticTokenVerifier, TokenVerifier};
use crate::config::ServerConfig;
use crate::core::llm::{LlmClient, OpenAiLlm};
use crate::core::persist::{HttpSummarySink, NoopSummarySink, SummarySink};
use crate::core::stt::{DeepgramStt, SttConfig, SttProvider};
use crate::core::tts::{HttpTts, TtsClient};
use crate::core::{AudioIngest, Orchestrator, SessionRegistry, UsageMeter, UserConcurrency};

/// Everything the handlers share. Cheap to clone; all fields are `Arc`s.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub registry: Arc<SessionRegistry>,
    pub concurrency: Arc<UserConcurrency>,
    pub meter: Arc<UsageMeter>,
    pub ingest: Arc<AudioIngest>,
    pub verifier: Arc<dyn TokenVerifier>,
}

impl AppState {
    /// Wire up the production collaborators from configuration.
    pub fn new(config: ServerConfig) -> Self {
        let stt: Arc<dyn SttProvider> = Arc::new(DeepgramStt::new(SttConfig::from_server(&config)));
        let llm: Arc<dyn LlmClient> = Arc::new(OpenAiLlm::new(&config));
        let tts: Arc<dyn TtsClient> = Arc::new(HttpTts::new(&config));
        let verifier: Arc<dyn TokenVerifier> = match &config.auth_service_url {
            Some(url) => Arc::new(HttpTokenVerifier::new(url.clone())),
            None => Arc::new(StaticTokenVerifier::new()),
        };
        let sink: Arc<dyn SummarySink> = match &config.persistence_url {
            Some(url) => Arc::new(HttpSummarySink::new(url.clone())),
            None => Arc::new(NoopSummarySink),
        };
        Self::with_collaborators(config, stt, llm, tts, verifier, sink)
    }

    /// Assemble state around explicit collaborators. Production wiring and
    /// tests both come through here.
    pub fn with_collaborators(
        config: ServerConfig,
        stt: Arc<dyn SttProvider>,
        llm: Arc<dyn LlmClient>,
        tts: Arc<dyn TtsClient>,
        verifier: Arc<dyn TokenVerifier>,
        sink: Arc<dyn SummarySink>,
    ) -> Self {
        let concurrency = Arc::new(UserConcurrency::new(config.limits.max_sessions_per_user));
        let registry = Arc::new(SessionRegistry::new(
            concurrency.clone(),
            sink,
            config.limits.max_history_entries,
            config.limits.idle_timeout,
            config.limits.sweep_interval,
        ));
        let meter = Arc::new(UsageMeter::new(config.rates, config.limits));
        let orchestrator = Arc::new(Orchestrator::new(
            llm,
            tts,
            meter.clone(),
            registry.clone(),
            &config,
        ));
        let ingest = Arc::new(AudioIngest::new(
            stt,
            orchestrator,
            meter.clone(),
            config.limits,
        ));
        Self {
            config: Arc::new(config),
            registry,
            concurrency,
            meter,
            ingest,
            verifier,
        }
    }
}
