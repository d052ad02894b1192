pub mod concurrency;
pub mod ingest;
pub mod llm;
pub mod orchestrator;
pub mod persist;
pub mod registry;
pub mod session;
pub mod stt;
pub mod tts;
pub mod usage;

pub use concurrency::UserConcurrency;
pub use ingest::AudioIngest;
pub use orchestrator::Orchestrator;
pub use registry::SessionRegistry;
pub use session::{CloseReason, Session, SessionState};
pub use usage::{BudgetCheck, UsageMeter};
