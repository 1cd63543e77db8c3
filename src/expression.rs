//! The portable expression tree.
//!
//! An [`ExpressionTree`] carries no editing state: no placeholder
//! attributes, no row ids, no flat display order. Attribute paths are
//! plain query-name lists and are only resolved against a schema by the
//! translator.
//!
//! Row kinds map onto operator expressions as follows:
//!
//! ```text
//! group                 and(..) | or(..) | not(or(..))
//! to-many group         and(@path, ..) | or(@path, ..) | not(or(@path, ..))
//! comparison            ==(@path, value)
//! boolean               ==(@path, true|false)
//! count                 >(count(@path), 5)
//! property              ==(myproperty(@prefix, "name", "int32"), 5)
//! null check            isnull(@path) | isnotnull(@path)
//! ```
//!
//! [`FilterNode::classify`] is the single reader of this grammar.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DecodeError;
use crate::operators::{is_prop_type, CollectionOperator};
use crate::types::{PropertyScope, Type};

#[derive(Debug, Clone, PartialEq)]
pub struct ExpressionTree {
    pub class_under_qualification: String,
    pub root: Expression,
}

impl ExpressionTree {
    pub fn new(class_under_qualification: impl Into<String>, root: Expression) -> Self {
        Self {
            class_under_qualification: class_under_qualification.into(),
            root,
        }
    }
}

impl fmt::Display for ExpressionTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.class_under_qualification, self.root)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Operator(OperatorExpression),
    /// An attribute path, as query names from the context class outward.
    Attribute(Vec<String>),
    Value(Literal),
}

impl Expression {
    pub fn operator(operator: Operator, operands: Vec<Expression>) -> Self {
        Expression::Operator(OperatorExpression { operator, operands })
    }

    pub fn attribute<S: AsRef<str>>(path: &[S]) -> Self {
        Expression::Attribute(path.iter().map(|s| s.as_ref().to_string()).collect())
    }

    pub fn as_operator(&self) -> Option<&OperatorExpression> {
        match self {
            Expression::Operator(op) => Some(op),
            _ => None,
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Operator(op) => {
                write!(f, "{}(", op.operator)?;
                for (i, operand) in op.operands.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", operand)?;
                }
                f.write_str(")")
            }
            Expression::Attribute(path) => write!(f, "@{}", path.join(".")),
            Expression::Value(literal) => write!(f, "{}", literal),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OperatorExpression {
    pub operator: Operator,
    pub operands: Vec<Expression>,
}

/// A typed scalar operand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Literal {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::String(s) => write!(f, "{:?}", s),
            Literal::Int(n) => write!(f, "{}", n),
            Literal::Float(x) => write!(f, "{:?}", x),
            Literal::Bool(b) => write!(f, "{}", b),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    And,
    Or,
    Not,
    Eq,
    NotEq,
    Lt,
    Lte,
    Gt,
    Gte,
    /// Regular expression match.
    Matches,
    /// Case-insensitive regular expression match.
    MatchesIgnoreCase,
    Count,
    IsNull,
    IsNotNull,
    MyProperty,
    AnyProperty,
    Parameter,
}

impl Operator {
    pub const ALL: [Operator; 17] = [
        Operator::And,
        Operator::Or,
        Operator::Not,
        Operator::Eq,
        Operator::NotEq,
        Operator::Lt,
        Operator::Lte,
        Operator::Gt,
        Operator::Gte,
        Operator::Matches,
        Operator::MatchesIgnoreCase,
        Operator::Count,
        Operator::IsNull,
        Operator::IsNotNull,
        Operator::MyProperty,
        Operator::AnyProperty,
        Operator::Parameter,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Operator::And => "and",
            Operator::Or => "or",
            Operator::Not => "not",
            Operator::Eq => "==",
            Operator::NotEq => "!=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Matches => "~=",
            Operator::MatchesIgnoreCase => "~~=",
            Operator::Count => "count",
            Operator::IsNull => "isnull",
            Operator::IsNotNull => "isnotnull",
            Operator::MyProperty => "myproperty",
            Operator::AnyProperty => "anyproperty",
            Operator::Parameter => "parameter",
        }
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            Operator::Eq
                | Operator::NotEq
                | Operator::Lt
                | Operator::Lte
                | Operator::Gt
                | Operator::Gte
                | Operator::Matches
                | Operator::MatchesIgnoreCase
        )
    }

    pub fn is_arithmetic(&self) -> bool {
        self.is_comparison() && !matches!(self, Operator::Matches | Operator::MatchesIgnoreCase)
    }

    /// The comparison operator spelled `symbol` in a row.
    pub fn comparison(symbol: &str) -> Option<Operator> {
        symbol.parse().ok().filter(Operator::is_comparison)
    }

    pub fn for_scope(scope: PropertyScope) -> Operator {
        match scope {
            PropertyScope::Mine => Operator::MyProperty,
            PropertyScope::Any => Operator::AnyProperty,
            PropertyScope::Parameter => Operator::Parameter,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Operator {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operator::ALL
            .iter()
            .find(|op| op.name() == s)
            .copied()
            .ok_or_else(|| DecodeError::corrupt(format!("unknown operator `{}`", s)))
    }
}

/// A grammar-checked view of one filter expression.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterNode<'a> {
    /// A group of child filters. `path` is set when the group quantifies
    /// over a to-many attribute.
    Group {
        operator: CollectionOperator,
        path: Option<&'a [String]>,
        children: &'a [Expression],
    },
    Compare {
        operator: Operator,
        path: &'a [String],
        value: &'a Literal,
    },
    Count {
        operator: Operator,
        path: &'a [String],
        value: u32,
    },
    Property {
        scope: PropertyScope,
        /// Path to the property owner; for parameter maps it ends with the
        /// map attribute itself.
        path: &'a [String],
        name: &'a str,
        ty: Type,
        operator: Operator,
        value: &'a Literal,
    },
    NullCheck {
        negated: bool,
        path: &'a [String],
    },
}

impl<'a> FilterNode<'a> {
    /// Match `expression` against the filter grammar.
    pub fn classify(expression: &'a Expression) -> Result<Self, DecodeError> {
        let op = expression
            .as_operator()
            .ok_or_else(|| DecodeError::corrupt(format!("expected an operator expression, found `{}`", expression)))?;

        match op.operator {
            Operator::And => Ok(group(CollectionOperator::And, &op.operands)),
            Operator::Or => Ok(group(CollectionOperator::Or, &op.operands)),
            Operator::Not => match op.operands.as_slice() {
                [Expression::Operator(inner)] if inner.operator == Operator::Or => {
                    Ok(group(CollectionOperator::None, &inner.operands))
                }
                _ => Err(DecodeError::corrupt("`not` must wrap exactly one `or`")),
            },
            Operator::IsNull | Operator::IsNotNull => match op.operands.as_slice() {
                [Expression::Attribute(path)] if !path.is_empty() => Ok(FilterNode::NullCheck {
                    negated: op.operator == Operator::IsNotNull,
                    path: path.as_slice(),
                }),
                _ => Err(DecodeError::corrupt(format!(
                    "`{}` takes a single non-empty attribute path",
                    op.operator
                ))),
            },
            comparison if comparison.is_comparison() => classify_comparison(comparison, &op.operands),
            other => Err(DecodeError::corrupt(format!(
                "`{}` cannot appear as a filter on its own",
                other
            ))),
        }
    }
}

/// A leading attribute operand marks a group over a to-many reference.
fn group(operator: CollectionOperator, operands: &[Expression]) -> FilterNode<'_> {
    match operands.split_first() {
        Some((Expression::Attribute(path), children)) => FilterNode::Group {
            operator,
            path: Some(path.as_slice()),
            children,
        },
        _ => FilterNode::Group {
            operator,
            path: None,
            children: operands,
        },
    }
}

/// `op(subject, literal)`, where the subject is a path, a `count(..)` or a
/// property function.
fn classify_comparison(operator: Operator, operands: &[Expression]) -> Result<FilterNode<'_>, DecodeError> {
    let [subject, Expression::Value(value)] = operands else {
        return Err(DecodeError::corrupt(format!(
            "`{}` takes a subject and a literal value",
            operator
        )));
    };
    if matches!(value, Literal::Bool(_)) && operator != Operator::Eq {
        return Err(DecodeError::corrupt(format!("`{}` cannot compare a boolean", operator)));
    }

    match subject {
        Expression::Attribute(path) if !path.is_empty() => Ok(FilterNode::Compare {
            operator,
            path: path.as_slice(),
            value,
        }),
        Expression::Operator(inner) if inner.operator == Operator::Count => {
            let [Expression::Attribute(path)] = inner.operands.as_slice() else {
                return Err(DecodeError::corrupt("`count` takes a single attribute path"));
            };
            if path.is_empty() || !operator.is_arithmetic() {
                return Err(DecodeError::corrupt(format!("`{}` cannot compare a count", operator)));
            }
            let value = match value {
                Literal::Int(n) => u32::try_from(*n).ok(),
                _ => None,
            }
            .ok_or_else(|| DecodeError::corrupt(format!("count compared against `{}`", value)))?;
            Ok(FilterNode::Count {
                operator,
                path: path.as_slice(),
                value,
            })
        }
        Expression::Operator(inner) => {
            let scope = match inner.operator {
                Operator::MyProperty => PropertyScope::Mine,
                Operator::AnyProperty => PropertyScope::Any,
                Operator::Parameter => PropertyScope::Parameter,
                other => {
                    return Err(DecodeError::corrupt(format!(
                        "`{}` cannot be the subject of a comparison",
                        other
                    )))
                }
            };
            let [Expression::Attribute(path), Expression::Value(Literal::String(name)), Expression::Value(Literal::String(ty))] =
                inner.operands.as_slice()
            else {
                return Err(DecodeError::corrupt(format!(
                    "`{}` takes an attribute path, a property name and a type",
                    inner.operator
                )));
            };
            let ty: Type = ty
                .parse()
                .ok()
                .filter(|ty| is_prop_type(*ty))
                .ok_or_else(|| DecodeError::corrupt(format!("`{}` is not a property type", ty)))?;
            if scope == PropertyScope::Parameter && path.is_empty() {
                return Err(DecodeError::corrupt("`parameter` needs the parameters-map attribute"));
            }
            Ok(FilterNode::Property {
                scope,
                path: path.as_slice(),
                name: name.as_str(),
                ty,
                operator,
                value,
            })
        }
        _ => Err(DecodeError::corrupt(format!(
            "`{}` needs an attribute path as its subject",
            operator
        ))),
    }
}
