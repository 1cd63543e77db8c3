//! Error types for schema lookups, row edits and filter decoding.

use thiserror::Error;

use crate::row::RowId;

/// Top-level error type for the filter builder.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Row(#[from] RowError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Encode(#[from] EncodeError),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Lookups against the schema registry and catalog validation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaError {
    #[error("unknown class `{0}`")]
    ClassNotFound(String),

    #[error("unknown attribute `{query_name}` on class `{class}`")]
    AttributeNotFound { class: String, query_name: String },

    #[error("no class declares an attribute named `{0}`")]
    UnknownAttribute(String),

    #[error("attribute `{query_name}` is declared differently on classes {classes:?}; qualify it with a class")]
    AmbiguousAttribute {
        query_name: String,
        classes: Vec<String>,
    },

    #[error("`{0}` is not a legal class under qualification")]
    NotAQualifiableClass(String),

    #[error("invalid schema catalog: {0}")]
    InvalidCatalog(String),
}

/// Rejected row tree edits. A failed edit leaves the tree untouched.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RowError {
    #[error("operator `{operator}` is not legal here; expected one of {allowed:?}")]
    InvalidOperator {
        operator: String,
        allowed: Vec<String>,
    },

    #[error("value `{value}` is not a valid {expected}")]
    InvalidValue { value: String, expected: String },

    #[error("attribute `{attribute}` cannot be chosen at this position on class `{class}`")]
    IllegalAttribute { attribute: String, class: String },

    #[error("structural invariant violated: {0}")]
    StructuralInvariantViolation(String),

    #[error("row {0} does not exist")]
    RowNotFound(RowId),
}

/// Failures while restoring a persisted filter.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    #[error("class `{0}` no longer exists in the schema")]
    UnresolvedClass(String),

    #[error("attribute `{name}` cannot be resolved on class `{class}`")]
    UnresolvedAttribute { class: String, name: String },

    #[error("corrupt or incompatible filter: {0}")]
    CorruptOrIncompatible(String),
}

/// Failures while persisting a filter.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EncodeError {
    #[error("`{0}` cannot be stored; numeric values must be finite")]
    NonFiniteNumber(f64),

    #[error("cannot encode filter: {0}")]
    Serialize(String),
}

impl RowError {
    pub(crate) fn structural(message: impl Into<String>) -> Self {
        RowError::StructuralInvariantViolation(message.into())
    }
}

impl DecodeError {
    pub(crate) fn corrupt(message: impl Into<String>) -> Self {
        DecodeError::CorruptOrIncompatible(message.into())
    }
}
