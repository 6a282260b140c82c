//! Error types for the policy engine
//!
//! Load-time failures (bad configuration, unknown types) are fatal and
//! surface before any provider call is made. Runtime provider failures carry
//! the machine-readable error code so call sites can classify them.

use thiserror::Error;

/// Errors raised by the policy engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A filter or action configuration block failed schema validation.
    /// Carries every violation found, not just the first.
    #[error("configuration for '{type_key}' is invalid: {}", violations.join("; "))]
    Schema {
        type_key: String,
        violations: Vec<String>,
    },

    /// A registry lookup missed (typo'd filter/action/resource type).
    #[error("unknown type '{key}' in {registry} (known: {})", known.join(", "))]
    UnknownType {
        registry: String,
        key: String,
        known: Vec<String>,
    },

    /// Two implementations were registered under the same key.
    #[error("duplicate registration of '{key}' in {registry}")]
    DuplicateKey { registry: String, key: String },

    /// A provider API call failed.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Policy file could not be loaded or compiled.
    #[error("policy error: {0}")]
    Policy(String),
}

impl EngineError {
    /// Shorthand for a single-violation schema error.
    pub fn invalid(type_key: &str, violation: impl Into<String>) -> Self {
        EngineError::Schema {
            type_key: type_key.to_string(),
            violations: vec![violation.into()],
        }
    }
}

/// A failed provider API call, carrying the machine-readable error code
/// extracted from the response body.
#[derive(Debug, Error)]
#[error("{service}.{operation} failed ({status}): {code}: {message}")]
pub struct ApiError {
    pub service: String,
    pub operation: String,
    pub status: u16,
    pub code: String,
    pub message: String,
}

impl ApiError {
    /// The provider's error code, e.g. `InvalidDBClusterStateFault`.
    pub fn code(&self) -> &str {
        &self.code
    }
}
