//! Service-level error taxonomy
//!
//! Lifecycle mutations propagate these to the caller; side channels
//! (push sends, live-store mirrors) log and swallow their own failures
//! instead of surfacing here.

use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Lost a read-then-commit race, e.g. two drivers accepting the same delivery
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },

    #[error("rating must be between 1 and 5, got {0}")]
    InvalidRating(u8),

    /// A stored document failed schema validation on read
    #[error("malformed document {collection}/{id}: {source}")]
    Decode {
        collection: &'static str,
        id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

impl DispatchError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Stable machine-readable code used in NATS error responses
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::InvalidTransition { .. } => "INVALID_STATE",
            Self::InvalidRating(_) => "INVALID_RATING",
            Self::Decode { .. } => "DECODE_ERROR",
            Self::Store(StoreError::NotFound { .. }) => "NOT_FOUND",
            Self::Store(StoreError::PreconditionFailed { .. }) => "CONFLICT",
            Self::Store(StoreError::Backend(_)) => "STORE_ERROR",
            Self::Encode(_) => "INTERNAL_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(DispatchError::not_found("delivery", "x").code(), "NOT_FOUND");
        assert_eq!(DispatchError::Conflict("taken".into()).code(), "CONFLICT");
        assert_eq!(
            DispatchError::InvalidTransition {
                from: "delivered",
                to: "in_transit"
            }
            .code(),
            "INVALID_STATE"
        );
        assert_eq!(DispatchError::InvalidRating(9).code(), "INVALID_RATING");
    }

    #[test]
    fn test_precondition_failures_surface_as_conflict() {
        let err = DispatchError::Store(StoreError::PreconditionFailed {
            collection: "deliveries".into(),
            id: "d1".into(),
            field: "status".into(),
        });
        assert_eq!(err.code(), "CONFLICT");
    }

    #[test]
    fn test_messages_name_the_entity() {
        let err = DispatchError::not_found("driver", "abc");
        assert_eq!(err.to_string(), "driver not found: abc");
    }
}
