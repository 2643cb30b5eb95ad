pub mod types;
pub mod prompt;
pub mod client;
pub mod keyword;
pub mod session;

pub use types::*;
pub use prompt::*;
pub use client::*;
pub use keyword::*;
pub use session::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Chat service is not reachable at {0}")]
    Connection(String),

    #[error("Chat service returned error (status {status}): {body}")]
    Api { status: u16, body: String },

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Response parsing error: {0}")]
    ResponseParsing(String),

    #[error("Reply cancelled")]
    Cancelled,

    #[error("Chat session not found: {0}")]
    SessionNotFound(uuid::Uuid),

    #[error("Too many open chat sessions (limit {0})")]
    TooManySessions(usize),

    #[error("Internal lock error")]
    LockPoisoned,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
