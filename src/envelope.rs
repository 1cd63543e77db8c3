//! Versioned JSON envelope for persisted filters.
//!
//! ```json
//! {
//!   "format": "filter-builder/expression",
//!   "version": 1,
//!   "cuq": "Epoch",
//!   "root": {
//!     "kind": "operator", "op": "or", "operands": [
//!       { "kind": "operator", "op": "==", "operands": [
//!         { "kind": "attribute", "path": ["epochGroup", "source", "label"] },
//!         { "kind": "value", "value": { "type": "string", "value": "X123" } }
//!       ] }
//!     ]
//!   }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::error::{DecodeError, EncodeError, Result};
use crate::expression::{Expression, ExpressionTree, FilterNode, Literal};
use crate::registry::SchemaRegistry;
use crate::row::RowTree;
use crate::translator::Translator;

pub const FORMAT: &str = "filter-builder/expression";
pub const VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct WireEnvelope {
    format: String,
    version: u32,
    cuq: String,
    root: WireNode,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum WireNode {
    Operator { op: String, operands: Vec<WireNode> },
    Attribute { path: Vec<String> },
    Value { value: Literal },
}

impl From<&Expression> for WireNode {
    fn from(expression: &Expression) -> Self {
        match expression {
            Expression::Operator(op) => WireNode::Operator {
                op: op.operator.name().to_string(),
                operands: op.operands.iter().map(WireNode::from).collect(),
            },
            Expression::Attribute(path) => WireNode::Attribute { path: path.clone() },
            Expression::Value(literal) => WireNode::Value {
                value: literal.clone(),
            },
        }
    }
}

impl WireNode {
    fn into_expression(self) -> std::result::Result<Expression, DecodeError> {
        match self {
            WireNode::Operator { op, operands } => {
                let operator = op.parse()?;
                let operands = operands
                    .into_iter()
                    .map(WireNode::into_expression)
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(Expression::operator(operator, operands))
            }
            WireNode::Attribute { path } => Ok(Expression::Attribute(path)),
            WireNode::Value { value } => Ok(Expression::Value(value)),
        }
    }
}

/// Encode an expression tree. No schema lookups are made.
///
/// JSON has no NaN or infinity, so a tree holding a non-finite float is
/// refused rather than written as `null`.
pub fn write(tree: &ExpressionTree) -> std::result::Result<Vec<u8>, EncodeError> {
    check_finite(&tree.root)?;
    let envelope = WireEnvelope {
        format: FORMAT.to_string(),
        version: VERSION,
        cuq: tree.class_under_qualification.clone(),
        root: WireNode::from(&tree.root),
    };
    serde_json::to_vec_pretty(&envelope).map_err(|e| EncodeError::Serialize(e.to_string()))
}

fn check_finite(expression: &Expression) -> std::result::Result<(), EncodeError> {
    match expression {
        Expression::Operator(op) => op.operands.iter().try_for_each(check_finite),
        Expression::Value(Literal::Float(x)) if !x.is_finite() => Err(EncodeError::NonFiniteNumber(*x)),
        Expression::Attribute(_) | Expression::Value(_) => Ok(()),
    }
}

/// Decode an expression tree, checking it against the filter grammar.
/// Class and attribute names are left unresolved.
pub fn read(bytes: &[u8]) -> std::result::Result<ExpressionTree, DecodeError> {
    let envelope: WireEnvelope =
        serde_json::from_slice(bytes).map_err(|e| DecodeError::corrupt(e.to_string()))?;

    if envelope.format != FORMAT {
        return Err(DecodeError::corrupt(format!("unexpected format `{}`", envelope.format)));
    }
    if envelope.version != VERSION {
        return Err(DecodeError::corrupt(format!(
            "unsupported version {} (expected {})",
            envelope.version, VERSION
        )));
    }
    if envelope.cuq.is_empty() {
        return Err(DecodeError::corrupt("missing class under qualification"));
    }

    let root = envelope.root.into_expression()?;
    match FilterNode::classify(&root)? {
        FilterNode::Group {
            path: None, children, ..
        } => children.iter().try_for_each(check_grammar)?,
        _ => return Err(DecodeError::corrupt("the root expression must be a plain group")),
    }

    debug!(cuq = %envelope.cuq, bytes = bytes.len(), "envelope decoded");
    Ok(ExpressionTree::new(envelope.cuq, root))
}

fn check_grammar(expression: &Expression) -> std::result::Result<(), DecodeError> {
    if let FilterNode::Group { children, .. } = FilterNode::classify(expression)? {
        children.iter().try_for_each(check_grammar)?;
    }
    Ok(())
}

/// Decode and rebuild the editable row tree against `registry`.
pub fn load(bytes: &[u8], registry: Arc<SchemaRegistry>) -> Result<RowTree> {
    let tree = read(bytes)?;
    Translator::new(registry).to_row_tree(&tree)
}

/// Translate and encode a row tree.
pub fn save(rows: &RowTree) -> Result<Vec<u8>> {
    let tree = Translator::new(rows.registry().clone()).to_expression_tree(rows)?;
    Ok(write(&tree)?)
}
