//! Error types for the message data model

use thiserror::Error;

use crate::field::FieldKind;

/// Result alias for fallible message operations.
pub type Result<T> = std::result::Result<T, TypeError>;

/// Errors raised by typed message operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TypeError {
    /// A field was written that has no entry in the type table and the
    /// message policy rejects unknown fields.
    #[error("unknown field: no type mapping found for '{field}'")]
    UnknownField { field: String },

    /// A written or read value did not match the kind the type table
    /// assigns to the field.
    #[error("type mismatch: field '{field}' expects {expected}, got {actual}")]
    TypeMismatch {
        field: String,
        expected: FieldKind,
        actual: FieldKind,
    },

    /// A strict read found no value under the field.
    #[error("field not found: '{field}'")]
    NotFound { field: String },

    /// Invalid construction parameters, raised at setup time.
    #[error("configuration error: {message}")]
    Configuration { message: String },
}

impl TypeError {
    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        TypeError::Configuration {
            message: message.into(),
        }
    }
}
