//! Structured filter builder over a typed, single-inheritance object schema.
//!
//! A [`SchemaRegistry`] describes the classes. A [`RowTree`] is the editable
//! form of one filter. The [`Translator`] converts it to and from the
//! portable [`ExpressionTree`], which [`envelope`] persists as versioned
//! JSON.

pub mod config;
pub mod envelope;
pub mod error;
pub mod expression;
pub mod operators;
pub mod registry;
pub mod row;
pub mod translator;
pub mod types;

pub use config::SchemaConfig;
pub use error::{DecodeError, EncodeError, Error, Result, RowError, SchemaError};
pub use expression::{Expression, ExpressionTree, Literal, Operator};
pub use operators::CollectionOperator;
pub use registry::SchemaRegistry;
pub use row::{RowId, RowShape, RowTree};
pub use translator::Translator;
pub use types::{Attribute, ClassDescription, DeclaredAttribute, SpecialAttribute, Type};
