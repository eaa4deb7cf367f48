//! Typed errors observed at the core boundary. (spec §7)
//!
//! Propagation policy: the pipeline handler never propagates an error
//! upward past the Orchestrator's per-envelope handler. Every variant
//! here is logged where it's produced; only `ConfigError` and
//! unrecoverable task-bootstrap faults terminate the process.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read { path: String, #[source] source: std::io::Error },

    #[error("failed to parse config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("destination {name:?} has both trim_lines and keep_first parser fields set")]
    ConflictingParser { name: String },

    #[error("destination {name:?} parser has trim_front without trim_back or vice versa")]
    IncompleteParser { name: String },

    #[error("required environment variable {0} is missing")]
    MissingRequiredEnv(String),

    #[error("failed to read keyword file {path}: {source}")]
    KeywordFile { path: String, #[source] source: std::io::Error },
}

/// A send attempt failed but is worth retrying (rate-limited or a
/// transport/transient error). Recovered locally by enqueueing to the
/// `RetryQueue`.
#[derive(Debug, Error)]
#[error("transient send failure to {destination}: {reason}")]
pub struct TransientSendFailure {
    pub destination: String,
    pub reason: String,
}

/// A `RetryQueue` item exhausted `MAX_ATTEMPTS`. Logged and dropped; no
/// user-visible alert, no dead-letter queue.
#[derive(Debug, Error)]
#[error("giving up on {destination} after {attempts} attempts: {reason}")]
pub struct PermanentSendFailure {
    pub destination: String,
    pub attempts: u32,
    pub reason: String,
}

/// OCR, attachment read, or media download failed during preprocessing.
/// Recovered locally by continuing with partial information; never
/// fails routing.
#[derive(Debug, Error)]
#[error("preprocessing step {step} failed: {reason}")]
pub struct PreprocessFailure {
    pub step: &'static str,
    pub reason: String,
}

/// Feed parse error or event-subscription hiccup. Logged; the affected
/// source loop continues to its next tick.
#[derive(Debug, Error)]
#[error("source {source_name} failed: {reason}")]
pub struct SourceFailure {
    pub source_name: String,
    pub reason: String,
}

/// A temp-file deletion (or other cleanup step) failed. Logged at
/// warning level and swallowed.
#[derive(Debug, Error)]
#[error("cleanup of {path} failed: {reason}")]
pub struct CleanupFailure {
    pub path: String,
    pub reason: String,
}
