//! Error types for inbox-digest.
//!
//! Per-cycle and per-message failures stay typed and recoverable; only
//! configuration problems are allowed to abort the process.

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Mailbox error: {0}")]
    Mail(#[from] MailError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),
}

/// Configuration-related errors. The only class that terminates the process.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// IMAP-side errors. All of these are cycle errors: the fetch loop logs
/// them and reconnects, it never takes the process down.
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("TLS setup failed: {0}")]
    Tls(#[from] native_tls::Error),

    #[error("IMAP dial failed: {0}")]
    Dial(String),

    #[error("IMAP login failed: {0}")]
    Login(String),

    #[error("Mailbox select failed: {0}")]
    Select(String),

    #[error("UNSEEN search failed: {0}")]
    Search(String),

    #[error("Message fetch failed: {0}")]
    Fetch(String),

    #[error("Marking message seen failed: {0}")]
    Store(String),
}

/// LLM backend errors, surfaced per message and never fatal.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Backend request failed: {0}")]
    Request(String),

    #[error("Invalid response from backend: {0}")]
    InvalidResponse(String),

    #[error("no response from API")]
    NoChoices,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Summary delivery errors (webhook / reply email).
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("Webhook delivery failed: {0}")]
    Webhook(String),

    #[error("Invalid address {address}: {reason}")]
    Address { address: String, reason: String },

    #[error("SMTP send failed: {0}")]
    Smtp(String),
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
