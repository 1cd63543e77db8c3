//! Collection operators and the attribute operator vocabulary.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::types::Type;

/// How a row combines its children, or, for `Count`, how a to-many
/// attribute is reduced to a number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionOperator {
    /// Displayed as "All".
    And,
    /// Displayed as "Any".
    Or,
    None,
    Count,
}

impl CollectionOperator {
    pub const COMPOUND: [CollectionOperator; 3] =
        [CollectionOperator::And, CollectionOperator::Or, CollectionOperator::None];

    pub const ALL: [CollectionOperator; 4] = [
        CollectionOperator::And,
        CollectionOperator::Or,
        CollectionOperator::None,
        CollectionOperator::Count,
    ];

    /// The grouping operators, in display order.
    pub fn compound_operators() -> &'static [CollectionOperator] {
        &Self::COMPOUND
    }

    /// `And`, `Or` and `None` introduce a nested group of child rows.
    pub fn is_compound(&self) -> bool {
        !matches!(self, CollectionOperator::Count)
    }

    /// The user-facing name.
    pub fn display_name(&self) -> &'static str {
        match self {
            CollectionOperator::And => "All",
            CollectionOperator::Or => "Any",
            CollectionOperator::None => "None",
            CollectionOperator::Count => "Count",
        }
    }
}

impl fmt::Display for CollectionOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for CollectionOperator {
    type Err = String;

    /// Accepts both the user-facing and the logical names.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" | "and" => Ok(CollectionOperator::And),
            "any" | "or" => Ok(CollectionOperator::Or),
            "none" => Ok(CollectionOperator::None),
            "count" => Ok(CollectionOperator::Count),
            other => Err(format!("unknown collection operator `{}`", other)),
        }
    }
}

pub const OPERATOR_EQUALS: &str = "==";
pub const OPERATOR_TRUE: &str = "is true";
pub const OPERATOR_FALSE: &str = "is false";
pub const OPERATOR_IS_NULL: &str = "is null";
pub const OPERATOR_IS_NOT_NULL: &str = "is not null";

/// Numeric and date-time comparisons; also used by `Count`.
pub const OPERATORS_ARITHMETIC: &[&str] = &["==", "!=", "<", "<=", ">", ">="];

/// Comparisons plus regex (`~=`) and case-insensitive regex (`~~=`).
pub const OPERATORS_STRING: &[&str] = &["==", "!=", "<", "<=", ">", ">=", "~=", "~~="];

pub const OPERATORS_BOOLEAN: &[&str] = &[OPERATOR_TRUE, OPERATOR_FALSE];

/// Types a dynamic property can be declared as.
pub const PROP_TYPES: [Type; 5] = [Type::Int32, Type::Float64, Type::Utf8String, Type::DateTime, Type::Boolean];

pub fn is_prop_type(ty: Type) -> bool {
    PROP_TYPES.contains(&ty)
}

/// The operators legal for a primitive value of type `ty`. Non-primitive
/// types have none.
pub fn operators_for_type(ty: Type) -> &'static [&'static str] {
    match ty {
        Type::Boolean => OPERATORS_BOOLEAN,
        Type::Utf8String => OPERATORS_STRING,
        Type::Int16 | Type::Int32 | Type::Float64 | Type::DateTime => OPERATORS_ARITHMETIC,
        Type::Reference
        | Type::ParametersMap
        | Type::PerUserParametersMap
        | Type::PerUserOrCustomReference => &[],
    }
}

/// Whether rows of this value type carry a literal next to the operator.
/// Booleans are fully described by "is true" / "is false".
pub fn takes_value(ty: Type) -> bool {
    ty != Type::Boolean
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compound_classification() {
        assert_eq!(
            CollectionOperator::compound_operators(),
            &[CollectionOperator::And, CollectionOperator::Or, CollectionOperator::None]
        );
        assert!(CollectionOperator::And.is_compound());
        assert!(CollectionOperator::None.is_compound());
        assert!(!CollectionOperator::Count.is_compound());
    }

    #[test]
    fn test_user_facing_names() {
        assert_eq!(CollectionOperator::And.to_string(), "All");
        assert_eq!(CollectionOperator::Or.to_string(), "Any");
        assert_eq!("Any".parse::<CollectionOperator>().unwrap(), CollectionOperator::Or);
        assert_eq!("all".parse::<CollectionOperator>().unwrap(), CollectionOperator::And);
        assert_eq!("count".parse::<CollectionOperator>().unwrap(), CollectionOperator::Count);
        assert!("some".parse::<CollectionOperator>().is_err());
    }

    #[test]
    fn test_operator_sets() {
        assert_eq!(operators_for_type(Type::Boolean)[0], OPERATOR_TRUE);
        assert_eq!(operators_for_type(Type::Int16)[0], OPERATOR_EQUALS);
        assert!(operators_for_type(Type::Utf8String).contains(&"~~="));
        assert!(!operators_for_type(Type::Int32).contains(&"~="));
        assert!(operators_for_type(Type::Reference).is_empty());
    }

    #[test]
    fn test_prop_types() {
        assert!(is_prop_type(Type::Int32));
        assert!(is_prop_type(Type::Boolean));
        assert!(!is_prop_type(Type::Int16));
        assert!(!is_prop_type(Type::Reference));
    }
}
