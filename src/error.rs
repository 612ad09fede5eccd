//! Error types for Decision Deck.

use std::time::Duration;

/// Top-level error type for deck operations.
#[derive(Debug, thiserror::Error)]
pub enum DeckError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Commit side effect failed: {0}")]
    Commit(#[from] CommitError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Unknown provider: {0}")]
    UnknownProvider(String),
}

/// Authentication errors raised by providers (or by the deck when a
/// provider was never authenticated).
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Provider {provider} rejected credentials: {reason}")]
    Rejected { provider: String, reason: String },

    #[error("Redirect required to complete authentication: {url}")]
    RedirectRequired { url: String },

    #[error("Session expired for provider {provider}")]
    Expired { provider: String },

    #[error("Deck has not been authenticated")]
    NotAuthenticated,

    #[error("Invalid redirect response: {0}")]
    InvalidRedirect(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Token store error: {0}")]
    TokenStore(String),

    #[error("Sign-in aborted: {0}")]
    Aborted(String),
}

/// Errors raised while fetching the next page of cards.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Provider {provider} is not ready: {reason}")]
    NotReady { provider: String, reason: String },

    #[error("Provider {provider} rejected the request as unauthorized")]
    Unauthorized { provider: String },

    #[error("Provider {provider} request failed: {reason}")]
    Provider { provider: String, reason: String },

    #[error("Provider {provider} timed out after {timeout:?}")]
    Timeout { provider: String, timeout: Duration },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },
}

/// A provider's per-swipe side effect failed.
#[derive(Debug, thiserror::Error)]
pub enum CommitError {
    #[error("Commit hook for card {card_id} failed on {provider}: {reason}")]
    HookFailed {
        provider: String,
        card_id: String,
        reason: String,
    },
}

/// Result type alias for deck operations.
pub type Result<T> = std::result::Result<T, DeckError>;
