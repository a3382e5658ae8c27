//! Error types for the digest dispatcher.

use std::time::Duration;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Content provider errors.
#[derive(Debug, thiserror::Error)]
pub enum ContentError {
    #[error("Content request for '{topic}' failed: {reason}")]
    RequestFailed { topic: String, reason: String },

    #[error("Content provider unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid content response: {0}")]
    InvalidResponse(String),
}

/// Summarization engine errors.
#[derive(Debug, thiserror::Error)]
pub enum SummaryError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Summarization of '{topic}' timed out after {timeout:?}")]
    Timeout { topic: String, timeout: Duration },

    #[error("Empty summary returned for '{topic}'")]
    Empty { topic: String },

    #[error("Summarization of '{topic}' panicked: {message}")]
    Panicked { topic: String, message: String },
}

/// Delivery provider errors.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Failed to build message: {0}")]
    Build(String),

    #[error("Provider rejected send: {0}")]
    Rejected(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

/// Continuation trigger errors.
#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
    #[error("Continuation trigger is not configured")]
    NotConfigured,

    #[error("Invalid trigger URL: {0}")]
    InvalidUrl(String),

    #[error("No async runtime available to issue the trigger")]
    NoRuntime,
}

/// Fatal errors that abort a run before any recipient is processed.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Recipient store unavailable: {0}")]
    RecipientStore(#[from] DatabaseError),
}

