//! # Error Types
//!
//! Domain-specific error types for mercato-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  mercato-core errors (this file)                                       │
//! │  ├── CoreError        - Event / order / money rule failures            │
//! │  └── ValidationError  - Payload field failures                         │
//! │                                                                         │
//! │  mercato-db errors (separate crate)                                    │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  mercato-sync errors (separate crate)                                  │
//! │  └── SyncError        - What a job run records and logs                │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → SyncError → error_message column  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Domain rule violations.
///
/// A `CoreError` raised while handling a webhook is stored verbatim in the
/// event's `error_message`, so messages carry the offending value.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Event type string did not match any known type or alias.
    #[error("Unsupported event type: {0}")]
    UnsupportedEventType(String),

    /// Payload is not a JSON document of the expected shape.
    #[error("Invalid payload for {event_type}: {reason}")]
    InvalidPayload { event_type: String, reason: String },

    /// Marketplace order status string is not recognised.
    #[error("Unknown order status: {0}")]
    UnknownOrderStatus(String),

    /// Decimal amount could not be converted to minor units.
    #[error("Invalid money amount '{value}': {reason}")]
    InvalidAmount { value: String, reason: String },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Payload field validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Value must not be negative.
    #[error("{field} must not be negative")]
    Negative { field: String },

    /// Invalid format (e.g., non-numeric price).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

impl ValidationError {
    /// Shorthand for [`ValidationError::Required`].
    pub fn required(field: impl Into<String>) -> Self {
        ValidationError::Required {
            field: field.into(),
        }
    }
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_carry_context() {
        let err = CoreError::UnsupportedEventType("OrderTeleported".into());
        assert_eq!(err.to_string(), "Unsupported event type: OrderTeleported");

        let err: CoreError = ValidationError::required("orderNumber").into();
        assert!(err.to_string().contains("orderNumber is required"));
    }
}
