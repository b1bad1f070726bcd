//! Core error type for FlowIntent.
//!
//! `FlowIntentError` is used throughout the core domain (params, validator,
//! chain engine, value channel). Configuration and lookup errors are returned
//! synchronously to the caller; validation failures travel as
//! [`ValidationError`] values and reach the engine's error callback.

use crate::deeplink::ValidationError;

#[derive(Debug, thiserror::Error)]
pub enum FlowIntentError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Unsupported type '{type_name}' for key: {key}")]
    UnsupportedType { key: String, type_name: String },

    #[error("Lookup error: {0}")]
    Lookup(String),

    #[error("Invalid URI: {0}")]
    InvalidUri(String),

    #[error("Definition error: {0}")]
    Definition(String),

    #[error("Job limit reached: at most {0} jobs may be retained")]
    JobLimit(usize),
}

impl FlowIntentError {
    pub(crate) fn configuration(msg: impl Into<String>) -> Self {
        FlowIntentError::Configuration(msg.into())
    }

    pub(crate) fn unsupported_type(key: &str, type_name: &str) -> Self {
        FlowIntentError::UnsupportedType {
            key: key.to_string(),
            type_name: type_name.to_string(),
        }
    }

    /// True for errors that indicate a programming mistake in chain setup.
    pub fn is_configuration(&self) -> bool {
        matches!(self, FlowIntentError::Configuration(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_type_names_key() {
        let err = FlowIntentError::unsupported_type("count", "uuid");
        let msg = err.to_string();
        assert!(msg.contains("count"));
        assert!(msg.contains("uuid"));
    }
}
