//! Model collaborator and tolerant recovery of structured records from its
//! free-text output.

pub mod types;
pub mod prompt;
pub mod literal;
pub mod parser;
pub mod sanitize;
pub mod ollama;
pub mod session;

pub use types::*;
pub use prompt::*;
pub use parser::*;
pub use sanitize::*;
pub use ollama::*;
pub use session::*;

use thiserror::Error;

/// A single model invocation failed.
///
/// Always recoverable at the caller: a failed window is skipped, a failed
/// reduction excludes one patient. Never aborts a batch.
#[derive(Error, Debug)]
pub enum InvocationError {
    #[error("Ollama is not running at {0}")]
    OllamaConnection(String),

    #[error("Ollama returned error (status {status}): {body}")]
    OllamaError { status: u16, body: String },

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Response parsing error: {0}")]
    ResponseParsing(String),

    #[error("Model returned an empty response (blocked or truncated)")]
    EmptyResponse,

    #[error("Model '{0}' is not installed")]
    ModelNotFound(String),

    #[error("Invalid model name: '{0}'")]
    InvalidModelName(String),

    #[error("Only localhost model endpoints are allowed, got '{0}'")]
    NonLocalEndpoint(String),
}
