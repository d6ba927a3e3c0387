//! # Sync Error Types
//!
//! Error types for both jobs and the marketplace client.
//!
//! ## Error Categories
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │ Remote (retry)  │  │  Remote (permanent)     │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Transport      │  │  Rejected (4xx)         │ │
//! │  │  MissingCreds   │  │  Timeout        │  │                         │ │
//! │  │  InvalidUrl     │  │  RateLimited    │  │                         │ │
//! │  │                 │  │  Server (5xx)   │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐                             │
//! │  │    Handler      │  │    Database     │                             │
//! │  │                 │  │                 │                             │
//! │  │  Event (core)   │  │  Database       │                             │
//! │  │  OrderNotFound  │  │                 │                             │
//! │  └─────────────────┘  └─────────────────┘                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Only configuration errors abort a run. Everything else is recorded against
//! the event or product being worked on.

use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors raised by the dispatcher, synchronizer and marketplace client.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid configuration value.
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    /// API key, secret or seller id not configured.
    #[error("Marketplace credentials not configured: missing {0}")]
    MissingCredentials(String),

    /// Invalid base URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Remote Errors
    // =========================================================================
    /// Network failure before a response arrived.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Request timed out.
    #[error("Request timed out")]
    Timeout,

    /// HTTP 429 from the marketplace.
    #[error("Rate limited by marketplace")]
    RateLimited,

    /// HTTP 5xx from the marketplace.
    #[error("Marketplace server error {status}: {message}")]
    Server { status: u16, message: String },

    /// HTTP 4xx from the marketplace; retrying the same request won't help.
    #[error("Marketplace rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// Response body could not be decoded.
    #[error("Unexpected marketplace response: {0}")]
    InvalidResponse(String),

    // =========================================================================
    // Handler Errors
    // =========================================================================
    /// Unsupported type or invalid payload.
    #[error(transparent)]
    Event(#[from] mercato_core::CoreError),

    /// A status event arrived for an order that was never created.
    #[error("Remote order not found: {0}")]
    OrderNotFound(String),

    // =========================================================================
    // Database Errors
    // =========================================================================
    #[error("Database error: {0}")]
    Database(#[from] mercato_db::DbError),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SyncError::Timeout
        } else if err.is_decode() {
            SyncError::InvalidResponse(err.to_string())
        } else {
            SyncError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::InvalidResponse(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl SyncError {
    /// Returns true if the same request may succeed if sent again.
    ///
    /// ## Retryable Errors
    /// - Transport failures and timeouts
    /// - 429 rate limiting
    /// - 5xx server errors
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Transport(_)
                | SyncError::Timeout
                | SyncError::RateLimited
                | SyncError::Server { .. }
        )
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::MissingCredentials(_)
                | SyncError::InvalidUrl(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(SyncError::Transport("reset".into()).is_retryable());
        assert!(SyncError::RateLimited.is_retryable());
        assert!(SyncError::Server {
            status: 503,
            message: "unavailable".into()
        }
        .is_retryable());

        assert!(!SyncError::Rejected {
            status: 400,
            message: "bad barcode".into()
        }
        .is_retryable());
        assert!(!SyncError::MissingCredentials("api_key".into()).is_retryable());
    }

    #[test]
    fn test_config_errors() {
        assert!(SyncError::MissingCredentials("seller_id".into()).is_config_error());
        assert!(!SyncError::OrderNotFound("A-1".into()).is_config_error());
    }

    #[test]
    fn test_core_error_passes_through() {
        let err: SyncError = mercato_core::CoreError::UnsupportedEventType("X".into()).into();
        assert_eq!(err.to_string(), "Unsupported event type: X");
    }
}
