//! Error types for Grove.

use thiserror::Error;

/// Result type alias using GroveError.
pub type Result<T> = std::result::Result<T, GroveError>;

/// Errors that can occur in Grove operations.
///
/// Logical no-ops (duplicate key insert, removal of an absent key, quadtree
/// insert outside the root bounds) are reported through return values and
/// never through this type.
#[derive(Debug, Error)]
pub enum GroveError {
    // Value-domain errors
    #[error("invalid range: lower bound {lower} is not below upper bound {upper}")]
    InvalidRange { lower: String, upper: String },

    // Implementation faults
    #[error("stage received unexpected input type, expected {expected}")]
    StageInput { expected: &'static str },

    #[error("internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_range_display() {
        let err = GroveError::InvalidRange {
            lower: "3".to_string(),
            upper: "1".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid range: lower bound 3 is not below upper bound 1"
        );
    }

    #[test]
    fn test_stage_input_display() {
        let err = GroveError::StageInput { expected: "i32" };
        assert_eq!(
            err.to_string(),
            "stage received unexpected input type, expected i32"
        );
    }

    #[test]
    fn test_internal_display() {
        let err = GroveError::Internal("slot emptied behind the worker".to_string());
        assert_eq!(err.to_string(), "internal error: slot emptied behind the worker");
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_ok() -> Result<i32> {
            Ok(7)
        }

        fn returns_err() -> Result<i32> {
            Err(GroveError::Internal("test".to_string()))
        }

        assert!(returns_ok().is_ok());
        assert!(returns_err().is_err());
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<GroveError>();
    }
}
