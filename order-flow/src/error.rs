use thiserror::Error;

/// Errors surfaced by the ordering flow and its collaborators.
///
/// Expected conversational failures (unmatched input, stale catalog
/// references, a product that vanished mid-flow) are NOT errors — they are
/// handled as re-prompts inside the controllers. `InvalidState` is the one
/// variant that indicates corrupted session data; the engine reacts by
/// discarding the session and starting the user fresh.
#[derive(Error, Debug)]
pub enum FlowError {
    #[error("session store error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("interpreter error: {0}")]
    Interpreter(String),

    #[error("invalid session state: {0}")]
    InvalidState(String),
}

pub type Result<T> = std::result::Result<T, FlowError>;
