//! Translator between the editable row tree and the portable expression
//! tree.

use std::sync::Arc;
use tracing::debug;

use crate::error::{DecodeError, Error, Result, RowError};
use crate::expression::{Expression, ExpressionTree, FilterNode, Literal, Operator};
use crate::operators::{CollectionOperator, OPERATOR_FALSE, OPERATOR_TRUE};
use crate::registry::SchemaRegistry;
use crate::row::{AttributeRow, RowContent, RowId, RowShape, RowTree};
use crate::types::{Attribute, Cardinality, PropertyScope, Type};

/// Converts between [`RowTree`] and [`ExpressionTree`] against one schema.
///
/// Both directions are pure: they read their input and build a new tree.
#[derive(Debug, Clone)]
pub struct Translator {
    registry: Arc<SchemaRegistry>,
}

impl Translator {
    pub fn new(registry: Arc<SchemaRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    /// Build the expression form of a row tree.
    ///
    /// Rows that are still incomplete (no attribute chosen, a path ending in
    /// a to-one reference, or an empty numeric value) are rejected.
    pub fn to_expression_tree(&self, rows: &RowTree) -> Result<ExpressionTree> {
        let root = self.row_expression(rows, rows.root())?;
        debug!(rows = rows.len(), cuq = rows.class_under_qualification(), "row tree translated");
        Ok(ExpressionTree::new(rows.class_under_qualification(), root))
    }

    /// Expression for the row `id` and, for compound rows, everything below it.
    fn row_expression(&self, rows: &RowTree, id: RowId) -> Result<Expression> {
        match rows.content(id)? {
            RowContent::Root { operator, .. } | RowContent::Compound { operator } => {
                let children = self.child_expressions(rows, id)?;
                group_expression(*operator, None, children)
            }
            RowContent::Attribute(row) => self.attribute_expression(rows, id, row),
        }
    }

    /// Expressions for the children of `id`, in display order.
    fn child_expressions(&self, rows: &RowTree, id: RowId) -> Result<Vec<Expression>> {
        rows.children(id)?
            .iter()
            .map(|&child| self.row_expression(rows, child))
            .collect()
    }

    /// Encode one attribute row according to its shape.
    fn attribute_expression(&self, rows: &RowTree, id: RowId, row: &AttributeRow) -> Result<Expression> {
        let path = row.path();
        let names = path_expression;

        match row.shape() {
            RowShape::Incomplete => {
                Err(RowError::structural(format!("row {} has no attribute selected", id)).into())
            }
            RowShape::Primitive(ty) => {
                let (operator, literal) = comparison(id, ty, row.attribute_operator(), row.value())?;
                Ok(Expression::operator(operator, vec![names(path), Expression::Value(literal)]))
            }
            RowShape::ToMany => match row.collection_operator() {
                Some(CollectionOperator::Count) => {
                    let operator = comparison_operator(id, row.attribute_operator())?;
                    let count = row
                        .value()
                        .and_then(|v| v.parse::<u32>().ok())
                        .ok_or_else(|| RowError::InvalidValue {
                            value: row.value().unwrap_or_default().to_string(),
                            expected: "count".to_string(),
                        })?;
                    Ok(Expression::operator(
                        operator,
                        vec![
                            Expression::operator(Operator::Count, vec![names(path)]),
                            Expression::Value(Literal::Int(i64::from(count))),
                        ],
                    ))
                }
                Some(operator) => {
                    let children = self.child_expressions(rows, id)?;
                    group_expression(operator, Some(names(path)), children)
                }
                None => Err(RowError::structural(format!("row {} has no collection operator", id)).into()),
            },
            RowShape::Property(scope) => {
                // property functions take the owner object, not the marker
                let owner = match scope {
                    PropertyScope::Parameter => path,
                    PropertyScope::Mine | PropertyScope::Any => &path[..path.len() - 1],
                };
                let ty = row
                    .prop_type()
                    .ok_or_else(|| RowError::structural(format!("row {} has no property type", id)))?;
                let subject = Expression::operator(
                    Operator::for_scope(scope),
                    vec![
                        names(owner),
                        Expression::Value(Literal::String(row.prop_name().unwrap_or_default().to_string())),
                        Expression::Value(Literal::String(ty.as_str().to_string())),
                    ],
                );
                let (operator, literal) = comparison(id, ty, row.attribute_operator(), row.value())?;
                Ok(Expression::operator(operator, vec![subject, Expression::Value(literal)]))
            }
            RowShape::NullCheck { negated } => {
                // the reference being tested is the element before the marker
                let operator = if negated { Operator::IsNotNull } else { Operator::IsNull };
                Ok(Expression::operator(operator, vec![names(&path[..path.len() - 1])]))
            }
        }
    }

    /// Rebuild a row tree from its expression form, resolving every
    /// attribute path against this translator's registry.
    ///
    /// Nothing partial is returned: any unresolved name or grammar error
    /// fails the whole load.
    pub fn to_row_tree(&self, tree: &ExpressionTree) -> Result<RowTree> {
        let cuq = tree.class_under_qualification.as_str();
        if self.registry.class_description(cuq).is_err() {
            return Err(DecodeError::UnresolvedClass(cuq.to_string()).into());
        }
        let mut rows = RowTree::new(self.registry.clone(), cuq)?;

        let FilterNode::Group {
            operator,
            path: None,
            children,
        } = FilterNode::classify(&tree.root)?
        else {
            return Err(DecodeError::corrupt("the root expression must be a plain group").into());
        };
        let root = rows.root();
        rows.set_collection_operator(root, operator)?;
        for child in children {
            self.build_row(&mut rows, root, child)?;
        }

        debug!(rows = rows.len(), cuq, "expression tree translated");
        Ok(rows)
    }

    /// Add the row for `expression` under `parent`.
    ///
    /// A well-formed expression that the schema refuses is reported as
    /// incompatible, never as an editing error.
    fn build_row(&self, rows: &mut RowTree, parent: RowId, expression: &Expression) -> Result<()> {
        self.build_node(rows, parent, expression).map_err(|e| match e {
            Error::Row(e) => DecodeError::corrupt(format!("`{}` does not fit the schema: {}", expression, e)).into(),
            other => other,
        })
    }

    /// Add the row, then set its path and fields from the expression. The
    /// resulting shape must be the one the expression implies.
    fn build_node(&self, rows: &mut RowTree, parent: RowId, expression: &Expression) -> Result<()> {
        match FilterNode::classify(expression)? {
            FilterNode::Group {
                operator,
                path: None,
                children,
            } => {
                let id = rows.add_compound_row(parent, operator)?;
                for child in children {
                    self.build_row(rows, id, child)?;
                }
            }
            FilterNode::Group {
                operator,
                path: Some(names),
                children,
            } => {
                let id = rows.add_attribute_row(parent)?;
                let path = self.resolve(rows, id, names)?;
                rows.set_attribute_path(id, path)?;
                expect_shape(rows, id, expression, |shape| shape == RowShape::ToMany)?;
                rows.set_collection_operator(id, operator)?;
                for child in children {
                    self.build_row(rows, id, child)?;
                }
            }
            FilterNode::Compare { operator, path, value } => {
                let id = rows.add_attribute_row(parent)?;
                let path = self.resolve(rows, id, path)?;
                rows.set_attribute_path(id, path)?;
                let RowShape::Primitive(ty) = rows.shape(id)? else {
                    return Err(mismatch(expression));
                };
                apply_comparison(rows, id, ty, operator, value, expression)?;
            }
            FilterNode::Count { operator, path, value } => {
                let id = rows.add_attribute_row(parent)?;
                let path = self.resolve(rows, id, path)?;
                rows.set_attribute_path(id, path)?;
                expect_shape(rows, id, expression, |shape| shape == RowShape::ToMany)?;
                rows.set_attribute_operator(id, operator.name())?;
                rows.set_attribute_value(id, &value.to_string())?;
            }
            FilterNode::Property {
                scope,
                path,
                name,
                ty,
                operator,
                value,
            } => {
                let id = rows.add_attribute_row(parent)?;
                // the owner path names an object; the marker is appended here
                let mut path = self.resolve(rows, id, path)?;
                match scope {
                    PropertyScope::Mine => path.push(Attribute::MY_PROPERTY),
                    PropertyScope::Any => path.push(Attribute::ANY_PROPERTY),
                    PropertyScope::Parameter => {}
                }
                rows.set_attribute_path(id, path)?;
                expect_shape(rows, id, expression, |shape| shape == RowShape::Property(scope))?;
                rows.set_prop_name(id, name)?;
                rows.set_prop_type(id, ty)?;
                apply_comparison(rows, id, ty, operator, value, expression)?;
            }
            FilterNode::NullCheck { negated, path } => {
                let id = rows.add_attribute_row(parent)?;
                let mut path = self.resolve(rows, id, path)?;
                path.push(if negated { Attribute::IS_NOT_NULL } else { Attribute::IS_NULL });
                rows.set_attribute_path(id, path)?;
            }
        }
        Ok(())
    }

    /// Resolve query names class by class, starting from the row's context
    /// class and following to-one references.
    ///
    /// Every name but the last must be a to-one reference. A name missing
    /// from the class it is looked up in is unresolved; a name that exists
    /// but cannot be navigated makes the expression incompatible.
    fn resolve(&self, rows: &RowTree, id: RowId, names: &[String]) -> Result<Vec<Attribute>> {
        let mut class = rows.context_class(id)?.name().to_string();
        let mut path = Vec::with_capacity(names.len() + 1);
        for (i, name) in names.iter().enumerate() {
            let description = self.registry.class_description(&class)?;
            let attribute = description
                .find_attribute(name)
                .ok_or_else(|| DecodeError::UnresolvedAttribute {
                    class: class.clone(),
                    name: name.clone(),
                })?
                .clone();

            let last = i + 1 == names.len();
            if !last {
                // only to-one references lead somewhere
                match (&attribute.target, attribute.cardinality) {
                    (Some(target), Cardinality::ToOne) => class = target.clone(),
                    _ => return Err(DecodeError::corrupt(format!("`{}` cannot be navigated", name)).into()),
                }
            }
            path.push(Attribute::Declared(attribute));
        }
        Ok(path)
    }
}

/// `@a.b.c` from a resolved path.
fn path_expression(attrs: &[Attribute]) -> Expression {
    Expression::Attribute(attrs.iter().map(|a| a.query_name().to_string()).collect())
}

/// `and(..)` or `or(..)` over `path` (when grouping a to-many reference)
/// followed by the children. None is `not(or(..))`.
fn group_expression(
    operator: CollectionOperator,
    path: Option<Expression>,
    children: Vec<Expression>,
) -> Result<Expression> {
    let operands: Vec<Expression> = path.into_iter().chain(children).collect();
    match operator {
        CollectionOperator::And => Ok(Expression::operator(Operator::And, operands)),
        CollectionOperator::Or => Ok(Expression::operator(Operator::Or, operands)),
        CollectionOperator::None => Ok(Expression::operator(
            Operator::Not,
            vec![Expression::operator(Operator::Or, operands)],
        )),
        CollectionOperator::Count => Err(RowError::structural("count is not a grouping operator").into()),
    }
}

/// The row's operator as a comparison [`Operator`].
fn comparison_operator(id: RowId, operator: Option<&str>) -> Result<Operator> {
    operator
        .and_then(Operator::comparison)
        .ok_or_else(|| RowError::structural(format!("row {} has no comparison operator", id)).into())
}

/// The operator and literal of a typed comparison. Booleans become
/// `== true` / `== false`.
fn comparison(id: RowId, ty: Type, operator: Option<&str>, value: Option<&str>) -> Result<(Operator, Literal)> {
    if ty == Type::Boolean {
        return match operator {
            Some(OPERATOR_TRUE) => Ok((Operator::Eq, Literal::Bool(true))),
            Some(OPERATOR_FALSE) => Ok((Operator::Eq, Literal::Bool(false))),
            _ => Err(RowError::structural(format!("row {} has no boolean operator", id)).into()),
        };
    }

    let operator = comparison_operator(id, operator)?;
    let text = value.unwrap_or_default();
    let invalid = || RowError::InvalidValue {
        value: text.to_string(),
        expected: format!("{} value", ty),
    };
    let literal = match ty {
        Type::Int16 | Type::Int32 => Literal::Int(text.parse().map_err(|_| invalid())?),
        Type::Float64 => Literal::Float(text.parse().map_err(|_| invalid())?),
        _ => Literal::String(text.to_string()),
    };
    Ok((operator, literal))
}

/// Set a row's operator and value from a decoded comparison. The literal
/// must match the attribute type; an integer is accepted for a float64.
fn apply_comparison(
    rows: &mut RowTree,
    id: RowId,
    ty: Type,
    operator: Operator,
    value: &Literal,
    expression: &Expression,
) -> Result<()> {
    let text = match (ty, value) {
        (Type::Boolean, Literal::Bool(b)) => {
            return rows.set_attribute_operator(id, if *b { OPERATOR_TRUE } else { OPERATOR_FALSE });
        }
        (Type::Int16 | Type::Int32, Literal::Int(n)) => n.to_string(),
        (Type::Float64, Literal::Float(x)) => x.to_string(),
        (Type::Float64, Literal::Int(n)) => n.to_string(),
        (Type::Utf8String | Type::DateTime, Literal::String(s)) => s.clone(),
        _ => return Err(mismatch(expression)),
    };
    rows.set_attribute_operator(id, operator.name())?;
    rows.set_attribute_value(id, &text)
}

/// Fail with [`mismatch`] unless the row at `id` has an accepted shape.
fn expect_shape(
    rows: &RowTree,
    id: RowId,
    expression: &Expression,
    accept: impl Fn(RowShape) -> bool,
) -> Result<()> {
    if accept(rows.shape(id)?) {
        Ok(())
    } else {
        Err(mismatch(expression))
    }
}

/// The expression is well formed but names an attribute of another kind.
fn mismatch(expression: &Expression) -> Error {
    DecodeError::corrupt(format!("`{}` does not fit the attribute it names", expression)).into()
}
