//! Configuration for the relay server.
//!
//! All settings come from environment variables (with a `.env` file loaded if
//! present). Rates and limits are plain data here so that pricing or tier
//! changes never require code changes.

use std::env;
use std::time::Duration;

/// Per-unit billing rates for the downstream collaborators.
///
/// Costs are computed as:
/// - STT: `seconds / 60 * stt_per_minute`
/// - LLM: `input_tokens / 1e6 * llm_input_per_million + output_tokens / 1e6 * llm_output_per_million`
/// - TTS: `chars / 1e6 * tts_per_million_chars`
#[derive(Debug, Clone, Copy)]
pub struct UsageRates {
    pub stt_per_minute: f64,
    pub llm_input_per_million: f64,
    pub llm_output_per_million: f64,
    pub tts_per_million_chars: f64,
}

impl Default for UsageRates {
    fn default() -> Self {
        Self {
            stt_per_minute: 0.0077,
            llm_input_per_million: 2.50,
            llm_output_per_million: 10.00,
            tts_per_million_chars: 15.00,
        }
    }
}

/// Session limits enforced by the budget checker and the registry sweep.
#[derive(Debug, Clone, Copy)]
pub struct SessionLimits {
    /// Hard cost ceiling per session, in dollars.
    pub budget_ceiling: f64,
    /// Fraction of the ceiling at which the one-time warning fires.
    pub budget_warn_fraction: f64,
    /// Maximum wall-clock duration of a session.
    pub max_duration: Duration,
    /// Inactivity window after which the sweep evicts a session.
    pub idle_timeout: Duration,
    /// Interval between idle sweeps.
    pub sweep_interval: Duration,
    /// Maximum concurrently open sessions per user.
    pub max_sessions_per_user: usize,
    /// Inclusive bounds on a single binary audio frame.
    pub min_chunk_bytes: usize,
    pub max_chunk_bytes: usize,
    /// Conversation buffer cap (user + assistant entries).
    pub max_history_entries: usize,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            budget_ceiling: 1.0,
            budget_warn_fraction: 0.8,
            max_duration: Duration::from_secs(30 * 60),
            idle_timeout: Duration::from_secs(10 * 60),
            sweep_interval: Duration::from_secs(60),
            max_sessions_per_user: 3,
            min_chunk_bytes: 100,
            max_chunk_bytes: 100 * 1024,
            max_history_entries: 10,
        }
    }
}

/// Server configuration loaded from the environment.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,

    // Collaborator endpoints
    pub stt_url: String,
    pub stt_api_key: Option<String>,
    pub llm_url: String,
    pub llm_api_key: Option<String>,
    pub llm_model: String,
    pub llm_system_prompt: String,
    pub llm_temperature: f64,
    pub tts_url: String,
    pub tts_api_key: Option<String>,

    // Identity verification and persistence handoff
    pub auth_service_url: Option<String>,
    pub persistence_url: Option<String>,

    // STT stream settings
    pub stt_sample_rate: u32,
    pub stt_utterance_end_ms: u32,

    pub rates: UsageRates,
    pub limits: SessionLimits,
}

impl ServerConfig {
    /// Load configuration from environment variables, with a `.env` file
    /// applied first if one exists.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let _ = dotenvy::dotenv();

        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("PORT")
            .unwrap_or_else(|_| "3001".to_string())
            .parse::<u16>()
            .map_err(|e| format!("Invalid port number: {e}"))?;

        let stt_url =
            env::var("STT_URL").unwrap_or_else(|_| "wss://api.deepgram.com/v1/listen".to_string());
        let stt_api_key = env::var("STT_API_KEY").ok();
        let llm_url = env::var("LLM_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1/chat/completions".to_string());
        let llm_api_key = env::var("LLM_API_KEY").ok();
        let llm_model = env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
        let llm_system_prompt = env::var("LLM_SYSTEM_PROMPT").unwrap_or_else(|_| {
            "You are a helpful voice assistant. Keep responses short and conversational."
                .to_string()
        });
        let llm_temperature = parse_env_f64("LLM_TEMPERATURE", 0.2)?;
        let tts_url =
            env::var("TTS_URL").unwrap_or_else(|_| "https://api.deepgram.com/v1/speak".to_string());
        let tts_api_key = env::var("TTS_API_KEY").ok();

        let auth_service_url = env::var("AUTH_SERVICE_URL").ok();
        let persistence_url = env::var("PERSISTENCE_URL").ok();

        let stt_sample_rate = parse_env_u64("STT_SAMPLE_RATE", 16_000)? as u32;
        let stt_utterance_end_ms = parse_env_u64("STT_UTTERANCE_END_MS", 500)? as u32;

        let rates = UsageRates {
            stt_per_minute: parse_env_f64("RATE_STT_PER_MINUTE", 0.0077)?,
            llm_input_per_million: parse_env_f64("RATE_LLM_INPUT_PER_MILLION", 2.50)?,
            llm_output_per_million: parse_env_f64("RATE_LLM_OUTPUT_PER_MILLION", 10.00)?,
            tts_per_million_chars: parse_env_f64("RATE_TTS_PER_MILLION_CHARS", 15.00)?,
        };

        let limits = SessionLimits {
            budget_ceiling: parse_env_f64("SESSION_BUDGET_CEILING", 1.0)?,
            budget_warn_fraction: parse_env_f64("SESSION_BUDGET_WARN_FRACTION", 0.8)?,
            max_duration: Duration::from_secs(parse_env_u64("SESSION_MAX_DURATION_SECONDS", 1800)?),
            idle_timeout: Duration::from_secs(parse_env_u64("SESSION_IDLE_TIMEOUT_SECONDS", 600)?),
            sweep_interval: Duration::from_secs(parse_env_u64(
                "SESSION_SWEEP_INTERVAL_SECONDS",
                60,
            )?),
            max_sessions_per_user: parse_env_u64("MAX_SESSIONS_PER_USER", 3)? as usize,
            min_chunk_bytes: parse_env_u64("MIN_CHUNK_BYTES", 100)? as usize,
            max_chunk_bytes: parse_env_u64("MAX_CHUNK_BYTES", 100 * 1024)? as usize,
            max_history_entries: parse_env_u64("MAX_HISTORY_ENTRIES", 10)? as usize,
        };

        let config = Self {
            host,
            port,
            stt_url,
            stt_api_key,
            llm_url,
            llm_api_key,
            llm_model,
            llm_system_prompt,
            llm_temperature,
            tts_url,
            tts_api_key,
            auth_service_url,
            persistence_url,
            stt_sample_rate,
            stt_utterance_end_ms,
            rates,
            limits,
        };
        config.validate()?;
        Ok(config)
    }

    /// Get the server address as a string in "host:port" form.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.limits.min_chunk_bytes > self.limits.max_chunk_bytes {
            return Err(format!(
                "MIN_CHUNK_BYTES ({}) exceeds MAX_CHUNK_BYTES ({})",
                self.limits.min_chunk_bytes, self.limits.max_chunk_bytes
            )
            .into());
        }
        if self.limits.budget_ceiling <= 0.0 {
            return Err("SESSION_BUDGET_CEILING must be positive".into());
        }
        if !(0.0..1.0).contains(&self.limits.budget_warn_fraction) {
            return Err("SESSION_BUDGET_WARN_FRACTION must be in [0, 1)".into());
        }
        if self.limits.max_sessions_per_user == 0 {
            return Err("MAX_SESSIONS_PER_USER must be at least 1".into());
        }
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            stt_url: "wss://api.deepgram.com/v1/listen".to_string(),
            stt_api_key: None,
            llm_url: "https://api.openai.com/v1/chat/completions".to_string(),
            llm_api_key: None,
            llm_model: "gpt-4o-mini".to_string(),
            llm_system_prompt:
                "You are a helpful voice assistant. Keep responses short and conversational."
                    .to_string(),
            llm_temperature: 0.2,
            tts_url: "https://api.deepgram.com/v1/speak".to_string(),
            tts_api_key: None,
            auth_service_url: None,
            persistence_url: None,
            stt_sample_rate: 16_000,
            stt_utterance_end_ms: 500,
            rates: UsageRates::default(),
            limits: SessionLimits::default(),
        }
    }
}

fn parse_env_f64(key: &str, default: f64) -> Result<f64, String> {
    match env::var(key) {
        Ok(v) => v.parse::<f64>().map_err(|e| format!("Invalid {key}: {e}")),
        Err(_) => Ok(default),
    }
}

fn parse_env_u64(key: &str, default: u64) -> Result<u64, String> {
    match env::var(key) {
        Ok(v) => v.parse::<u64>().map_err(|e| format!("Invalid {key}: {e}")),
        Err(_) => Ok(default),
    }
}
