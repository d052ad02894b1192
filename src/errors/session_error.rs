//! Session error taxonomy.
//!
//! Every error a live session can hit maps to a machine-readable code the
//! client distinguishes recoverable errors from terminal ones by, and — for
//! terminal errors — a distinct WebSocket close code.

/// Machine-readable error codes carried in `error` events
pub mod error_codes {
    pub const AUTH_REQUIRED: &str = "AUTH_REQUIRED";
    pub const AUTH_INVALID: &str = "AUTH_INVALID";
    pub const RATE_LIMIT_EXCEEDED: &str = "RATE_LIMIT_EXCEEDED";
    pub const SESSION_ALREADY_STARTED: &str = "SESSION_ALREADY_STARTED";
    pub const CHUNK_SIZE_INVALID: &str = "CHUNK_SIZE_INVALID";
    pub const STT_ERROR: &str = "STT_ERROR";
    pub const LLM_ERROR: &str = "LLM_ERROR";
    pub const TTS_ERROR: &str = "TTS_ERROR";
    pub const BUDGET_EXCEEDED: &str = "BUDGET_EXCEEDED";
    pub const DURATION_EXCEEDED: &str = "DURATION_EXCEEDED";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
}

/// WebSocket close codes for terminal session failures
pub mod close_codes {
    /// Missing or invalid credential
    pub const AUTH: u16 = 4401;
    /// Session budget ceiling reached
    pub const BUDGET_EXCEEDED: u16 = 4402;
    /// Maximum session duration reached
    pub const DURATION_EXCEEDED: u16 = 4408;
    /// Per-user concurrent session cap reached
    pub const RATE_LIMIT: u16 = 4429;
    /// Generic server error
    pub const INTERNAL: u16 = 4500;
}

/// Errors raised while driving a voice session
#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    /// No verified identity yet; audio is rejected fail-closed
    #[error("Authentication required before audio can be processed")]
    AuthRequired,

    /// Credential exchange with the identity service failed
    #[error("Authentication failed: {0}")]
    AuthInvalid(String),

    /// Second `session_start` on a connection whose session is live; the
    /// message is ignored and the existing session keeps running
    #[error("Session already started on this connection")]
    AlreadyStarted,

    /// User already holds the maximum number of open sessions
    #[error("Too many concurrent sessions (limit {0})")]
    RateLimit(usize),

    /// Audio frame outside the configured size bounds
    #[error("Audio chunk of {actual} bytes outside allowed range [{min}, {max}]")]
    ChunkSize {
        actual: usize,
        min: usize,
        max: usize,
    },

    /// Transient speech-to-text failure; the session stays open
    #[error("Speech recognition error: {0}")]
    Stt(String),

    /// Language-model stream failure; fatal to the turn, not the session
    #[error("Language model error: {0}")]
    Llm(String),

    /// Synthesis failure for a single sentence
    #[error("Speech synthesis error for sentence {index}: {message}")]
    Tts { index: u64, message: String },

    /// Running cost reached the session ceiling
    #[error("Session budget of ${ceiling:.2} exceeded (cost ${cost:.4})")]
    BudgetExceeded { cost: f64, ceiling: f64 },

    /// Session ran past the maximum allowed duration
    #[error("Maximum session duration of {0} seconds exceeded")]
    DurationExceeded(u64),

    /// Persistence handoff failure; logged only, never surfaced
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SessionError {
    /// Machine-readable code for `error` events
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::AuthRequired => error_codes::AUTH_REQUIRED,
            SessionError::AuthInvalid(_) => error_codes::AUTH_INVALID,
            SessionError::AlreadyStarted => error_codes::SESSION_ALREADY_STARTED,
            SessionError::RateLimit(_) => error_codes::RATE_LIMIT_EXCEEDED,
            SessionError::ChunkSize { .. } => error_codes::CHUNK_SIZE_INVALID,
            SessionError::Stt(_) => error_codes::STT_ERROR,
            SessionError::Llm(_) => error_codes::LLM_ERROR,
            SessionError::Tts { .. } => error_codes::TTS_ERROR,
            SessionError::BudgetExceeded { .. } => error_codes::BUDGET_EXCEEDED,
            SessionError::DurationExceeded(_) => error_codes::DURATION_EXCEEDED,
            SessionError::Persistence(_) | SessionError::Internal(_) => {
                error_codes::INTERNAL_ERROR
            }
        }
    }

    /// Close code for errors that terminate the connection; `None` for
    /// recoverable errors the session survives.
    pub fn close_code(&self) -> Option<u16> {
        match self {
            SessionError::AuthRequired | SessionError::AuthInvalid(_) => Some(close_codes::AUTH),
            SessionError::RateLimit(_) => Some(close_codes::RATE_LIMIT),
            SessionError::BudgetExceeded { .. } => Some(close_codes::BUDGET_EXCEEDED),
            SessionError::DurationExceeded(_) => Some(close_codes::DURATION_EXCEEDED),
            SessionError::Internal(_) => Some(close_codes::INTERNAL),
            SessionError::AlreadyStarted
            | SessionError::ChunkSize { .. }
            | SessionError::Stt(_)
            | SessionError::Llm(_)
            | SessionError::Tts { .. }
            | SessionError::Persistence(_) => None,
        }
    }

    /// Whether this error closes the whole session
    pub fn is_fatal(&self) -> bool {
        self.close_code().is_some()
    }
}

// Result type alias for convenience
pub type SessionResult<T> = Result<T, SessionError>;
