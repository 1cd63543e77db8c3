//! The editable row tree.
//!
//! Rows live in an arena owned by [`RowTree`] and are addressed by
//! [`RowId`]. Row 0 is always the root row: it holds the class under
//! qualification and a grouping operator, and can never be removed.
//!
//! Every setter validates before it mutates, so a failed call leaves the
//! tree exactly as it was. Attribute path changes go through one
//! transition table ([`RowShape`]) that decides which fields a row carries
//! and what their defaults are.

use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::error::{Result, RowError, SchemaError};
use crate::operators::{
    is_prop_type, operators_for_type, takes_value, CollectionOperator, OPERATORS_ARITHMETIC,
    OPERATOR_IS_NOT_NULL, OPERATOR_IS_NULL,
};
use crate::registry::SchemaRegistry;
use crate::types::{Attribute, ClassDescription, PropertyScope, SpecialAttribute, Type};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowId(usize);

impl RowId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a row holds.
#[derive(Debug, Clone, PartialEq)]
pub enum RowContent {
    Root {
        class_under_qualification: String,
        operator: CollectionOperator,
    },
    /// A bare grouping row.
    Compound { operator: CollectionOperator },
    Attribute(AttributeRow),
}

static UNSELECTED: Attribute = Attribute::SELECT_ATTRIBUTE;

/// An attribute row: a path from the row's context class to a childmost
/// attribute, plus whichever fields the childmost attribute calls for.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeRow {
    path: Vec<Attribute>,
    collection_operator: Option<CollectionOperator>,
    attribute_operator: Option<String>,
    value: Option<String>,
    prop_name: Option<String>,
    prop_type: Option<Type>,
}

impl AttributeRow {
    fn new() -> Self {
        Self {
            path: vec![Attribute::SELECT_ATTRIBUTE],
            collection_operator: None,
            attribute_operator: None,
            value: None,
            prop_name: None,
            prop_type: None,
        }
    }

    /// The attribute path, from the context class outward.
    pub fn path(&self) -> &[Attribute] {
        &self.path
    }

    /// The last element of the path; it decides the row's shape.
    pub fn childmost(&self) -> &Attribute {
        self.path.last().unwrap_or(&UNSELECTED)
    }

    pub fn shape(&self) -> RowShape {
        RowShape::of(self.childmost())
    }

    /// Set only on to-many rows.
    pub fn collection_operator(&self) -> Option<CollectionOperator> {
        self.collection_operator
    }

    pub fn attribute_operator(&self) -> Option<&str> {
        self.attribute_operator.as_deref()
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    pub fn prop_name(&self) -> Option<&str> {
        self.prop_name.as_deref()
    }

    pub fn prop_type(&self) -> Option<Type> {
        self.prop_type
    }

    /// Position at which the next attribute choice goes: past a trailing
    /// to-one reference, otherwise on the childmost attribute itself.
    fn open_slot(&self) -> usize {
        match self.path.last() {
            Some(last) if last.is_to_one_reference() => self.path.len(),
            Some(_) => self.path.len() - 1,
            None => 0,
        }
    }

    /// A to-many row grouping its children with All, Any or None.
    fn is_compound(&self) -> bool {
        self.shape() == RowShape::ToMany
            && self.collection_operator.is_some_and(|op| op.is_compound())
    }

    /// Re-derive every dependent field from the shape of the childmost
    /// attribute.
    fn reset_for(&mut self, shape: RowShape) {
        self.collection_operator = None;
        self.attribute_operator = None;
        self.value = None;
        self.prop_name = None;
        self.prop_type = None;

        match shape {
            RowShape::Incomplete => {}
            RowShape::Primitive(ty) => {
                self.attribute_operator = operators_for_type(ty).first().map(|op| op.to_string());
                if takes_value(ty) {
                    self.value = Some(String::new());
                }
            }
            RowShape::ToMany => {
                self.collection_operator = Some(CollectionOperator::Count);
                self.attribute_operator = Some(OPERATORS_ARITHMETIC[0].to_string());
                self.value = Some("0".to_string());
            }
            RowShape::Property(_) => {
                self.apply_prop_type(Type::Int32);
                self.prop_name = Some(String::new());
            }
            RowShape::NullCheck { negated } => {
                let op = if negated { OPERATOR_IS_NOT_NULL } else { OPERATOR_IS_NULL };
                self.attribute_operator = Some(op.to_string());
            }
        }
    }

    /// Switch a property row to `ty`, resetting the operator and value to
    /// that type's defaults.
    fn apply_prop_type(&mut self, ty: Type) {
        self.prop_type = Some(ty);
        self.attribute_operator = operators_for_type(ty).first().map(|op| op.to_string());
        self.value = takes_value(ty).then(String::new);
    }
}

/// The state-transition key of an attribute row, derived from its
/// childmost attribute.
///
/// | shape        | collection op | operator            | value | property fields |
/// |--------------|---------------|---------------------|-------|-----------------|
/// | `Incomplete` | -             | -                   | -     | -               |
/// | `Primitive`  | -             | first for the type  | `""` unless boolean | - |
/// | `ToMany`     | `Count`       | `==`                | `"0"` | -               |
/// | `Property`   | -             | `==`                | `""`  | `int32`, `""`   |
/// | `NullCheck`  | -             | `is null` / `is not null` | - | -             |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowShape {
    /// Nothing chosen yet, or a to-one reference waiting for the next hop.
    Incomplete,
    Primitive(Type),
    ToMany,
    Property(PropertyScope),
    NullCheck { negated: bool },
}

impl RowShape {
    /// Shape of a row whose childmost attribute is `childmost`.
    pub fn of(childmost: &Attribute) -> Self {
        match childmost {
            Attribute::Special(SpecialAttribute::SelectAttribute) => RowShape::Incomplete,
            Attribute::Special(SpecialAttribute::IsNull) => RowShape::NullCheck { negated: false },
            Attribute::Special(SpecialAttribute::IsNotNull) => RowShape::NullCheck { negated: true },
            Attribute::Special(SpecialAttribute::MyProperty) => RowShape::Property(PropertyScope::Mine),
            Attribute::Special(SpecialAttribute::AnyProperty) => RowShape::Property(PropertyScope::Any),
            Attribute::Declared(attr) if attr.ty.is_primitive() => RowShape::Primitive(attr.ty),
            Attribute::Declared(attr) if attr.ty.is_parameters_map() => {
                RowShape::Property(PropertyScope::Parameter)
            }
            Attribute::Declared(_) if childmost.is_to_many_reference() => RowShape::ToMany,
            Attribute::Declared(_) => RowShape::Incomplete,
        }
    }
}

#[derive(Debug, Clone)]
struct RowNode {
    parent: Option<RowId>,
    children: Vec<RowId>,
    content: RowContent,
}

/// A recursive, id-free view of a row tree, used to compare trees.
#[derive(Debug, Clone, PartialEq)]
pub struct RowSnapshot {
    pub content: RowContent,
    pub children: Vec<RowSnapshot>,
}

/// The tree of rows a user edits.
///
/// Rows live in an arena indexed by [`RowId`]. Slots freed by a removal are
/// reused by later additions, so the id of a removed row may come back as
/// the id of a new one.
#[derive(Debug, Clone)]
pub struct RowTree {
    registry: Arc<SchemaRegistry>,
    nodes: Vec<Option<RowNode>>,
    // vacated slots, most recently freed last
    free: Vec<RowId>,
}

const ROOT: RowId = RowId(0);

impl RowTree {
    /// A tree with only a root row over `class_under_qualification`, using
    /// the "Any" operator.
    pub fn new(registry: Arc<SchemaRegistry>, class_under_qualification: &str) -> Result<Self> {
        check_cuq(&registry, class_under_qualification)?;
        let root = RowNode {
            parent: None,
            children: Vec::new(),
            content: RowContent::Root {
                class_under_qualification: class_under_qualification.to_string(),
                operator: CollectionOperator::Or,
            },
        };
        Ok(Self {
            registry,
            nodes: vec![Some(root)],
            free: Vec::new(),
        })
    }

    /// A tree rooted at the registry's first possible class under
    /// qualification.
    pub fn with_default_cuq(registry: Arc<SchemaRegistry>) -> Result<Self> {
        let cuq = registry
            .possible_cuqs()
            .first()
            .map(|c| c.name().to_string())
            .ok_or_else(|| SchemaError::InvalidCatalog("no possible classes under qualification".to_string()))?;
        Self::new(registry, &cuq)
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    pub fn root(&self) -> RowId {
        ROOT
    }

    /// The live node at `id`, or `RowNotFound` for a removed or unknown id.
    fn node(&self, id: RowId) -> Result<&RowNode> {
        self.nodes
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or_else(|| RowError::RowNotFound(id).into())
    }

    fn node_mut(&mut self, id: RowId) -> Result<&mut RowNode> {
        self.nodes
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or_else(|| RowError::RowNotFound(id).into())
    }

    fn attribute_row(&self, id: RowId) -> Result<&AttributeRow> {
        match &self.node(id)?.content {
            RowContent::Attribute(row) => Ok(row),
            _ => Err(RowError::structural(format!("row {} is not an attribute row", id)).into()),
        }
    }

    fn attribute_row_mut(&mut self, id: RowId) -> Result<&mut AttributeRow> {
        match &mut self.node_mut(id)?.content {
            RowContent::Attribute(row) => Ok(row),
            _ => Err(RowError::structural(format!("row {} is not an attribute row", id)).into()),
        }
    }

    pub fn content(&self, id: RowId) -> Result<&RowContent> {
        Ok(&self.node(id)?.content)
    }

    pub fn contains(&self, id: RowId) -> bool {
        self.node(id).is_ok()
    }

    /// `None` only for the root.
    pub fn parent(&self, id: RowId) -> Result<Option<RowId>> {
        Ok(self.node(id)?.parent)
    }

    /// Child rows, in display order.
    pub fn children(&self, id: RowId) -> Result<&[RowId]> {
        Ok(&self.node(id)?.children)
    }

    pub fn child(&self, id: RowId, index: usize) -> Result<RowId> {
        self.children(id)?.get(index).copied().ok_or_else(|| {
            RowError::structural(format!("row {} has no child at index {}", id, index)).into()
        })
    }

    /// Number of ancestors; the root is at depth 0.
    pub fn depth(&self, id: RowId) -> Result<usize> {
        let mut depth = 0;
        let mut current = self.node(id)?.parent;
        while let Some(parent) = current {
            depth += 1;
            current = self.node(parent)?.parent;
        }
        Ok(depth)
    }

    /// Every live row in display order (pre-order, root first).
    pub fn rows(&self) -> Vec<RowId> {
        let mut out = Vec::with_capacity(self.len());
        let mut stack = vec![ROOT];
        while let Some(id) = stack.pop() {
            out.push(id);
            if let Ok(node) = self.node(id) {
                stack.extend(node.children.iter().rev().copied());
            }
        }
        out
    }

    /// Number of live rows, the root included.
    pub fn len(&self) -> usize {
        self.nodes.len() - self.free.len()
    }

    /// True when the root holds no filter rows.
    pub fn is_empty(&self) -> bool {
        self.children(ROOT).map(|c| c.is_empty()).unwrap_or(true)
    }

    pub fn class_under_qualification(&self) -> &str {
        match self.node(ROOT).map(|n| &n.content) {
            Ok(RowContent::Root {
                class_under_qualification,
                ..
            }) => class_under_qualification,
            _ => "",
        }
    }

    /// Change the root class. Existing filter rows are discarded, since
    /// their attribute paths belong to the old class.
    pub fn set_class_under_qualification(&mut self, class: &str) -> Result<()> {
        check_cuq(&self.registry, class)?;
        // only the root survives, so the arena shrinks back to one slot
        self.nodes.truncate(1);
        self.free.clear();
        self.node_mut(ROOT)?.children.clear();
        if let RowContent::Root {
            class_under_qualification,
            ..
        } = &mut self.node_mut(ROOT)?.content
        {
            *class_under_qualification = class.to_string();
        }
        debug!(cuq = class, "class under qualification changed");
        Ok(())
    }

    /// True for rows that may hold children: the root, simple compound rows,
    /// and to-many attribute rows using a grouping operator.
    pub fn is_compound_row(&self, id: RowId) -> Result<bool> {
        Ok(match &self.node(id)?.content {
            RowContent::Root { .. } | RowContent::Compound { .. } => true,
            RowContent::Attribute(row) => row.is_compound(),
        })
    }

    /// True for an All/Any/None row that is not tied to an attribute.
    pub fn is_simple_compound_row(&self, id: RowId) -> Result<bool> {
        Ok(matches!(self.node(id)?.content, RowContent::Compound { .. }))
    }

    /// Append an attribute row with nothing selected yet.
    ///
    /// `parent` must be a compound row.
    pub fn add_attribute_row(&mut self, parent: RowId) -> Result<RowId> {
        self.add_child(parent, RowContent::Attribute(AttributeRow::new()))
    }

    /// Append a simple compound row using `operator`, which must be All, Any
    /// or None.
    pub fn add_compound_row(&mut self, parent: RowId, operator: CollectionOperator) -> Result<RowId> {
        if !operator.is_compound() {
            return Err(invalid_collection_operator(operator, CollectionOperator::compound_operators()));
        }
        self.add_child(parent, RowContent::Compound { operator })
    }

    /// Place `content` in a free slot, or a new one, and link it under
    /// `parent`.
    fn add_child(&mut self, parent: RowId, content: RowContent) -> Result<RowId> {
        if !self.is_compound_row(parent)? {
            return Err(RowError::structural(format!("row {} cannot hold child rows", parent)).into());
        }
        let node = RowNode {
            parent: Some(parent),
            children: Vec::new(),
            content,
        };
        let id = match self.free.pop() {
            // free ids always index an existing, vacant slot
            Some(id) => {
                self.nodes[id.0] = Some(node);
                id
            }
            None => {
                self.nodes.push(Some(node));
                RowId(self.nodes.len() - 1)
            }
        };
        self.node_mut(parent)?.children.push(id);
        debug!(row = %id, parent = %parent, "row added");
        Ok(id)
    }

    /// Remove the child at `index` of `parent` together with its subtree.
    pub fn remove_child(&mut self, parent: RowId, index: usize) -> Result<()> {
        let child = self.child(parent, index)?;
        self.node_mut(parent)?.children.remove(index);
        self.drop_subtree(child);
        debug!(row = %child, parent = %parent, "row removed");
        Ok(())
    }

    /// Remove a row and its subtree. The root row cannot be removed.
    pub fn remove_row(&mut self, id: RowId) -> Result<()> {
        let Some(parent) = self.node(id)?.parent else {
            return Err(RowError::structural("the root row cannot be removed").into());
        };
        let index = self
            .children(parent)?
            .iter()
            .position(|&c| c == id)
            .ok_or(RowError::RowNotFound(id))?;
        self.remove_child(parent, index)
    }

    /// Vacate `id` and every row below it. The caller unlinks `id` from its
    /// parent.
    fn drop_subtree(&mut self, id: RowId) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.get_mut(current.0).and_then(Option::take) {
                stack.extend(node.children);
                self.free.push(current);
            }
        }
    }

    /// The class a row's attribute path starts from.
    pub fn context_class(&self, id: RowId) -> Result<&ClassDescription> {
        match self.node(id)?.parent {
            None => Ok(self.registry.class_description(self.class_under_qualification())?),
            Some(parent) => self.child_context_class(parent),
        }
    }

    /// The class that children of `id` start their paths from.
    pub fn child_context_class(&self, id: RowId) -> Result<&ClassDescription> {
        match &self.node(id)?.content {
            RowContent::Root {
                class_under_qualification,
                ..
            } => Ok(self.registry.class_description(class_under_qualification)?),
            RowContent::Compound { .. } => self.context_class(id),
            RowContent::Attribute(row) => match row.childmost().target_class() {
                Some(target) if row.is_compound() => Ok(self.registry.class_description(target)?),
                _ => Err(RowError::structural(format!("row {} cannot hold child rows", id)).into()),
            },
        }
    }

    /// The class offering choices for the row's open path position.
    pub fn parent_class(&self, id: RowId) -> Result<&ClassDescription> {
        let row = self.attribute_row(id)?;
        self.slot_class(id, row.open_slot())
    }

    /// The class reached by following the first `slot` hops of the path.
    pub fn slot_class(&self, id: RowId, slot: usize) -> Result<&ClassDescription> {
        let row = self.attribute_row(id)?;
        let mut class = self.context_class(id)?;
        for attr in row.path.iter().take(slot) {
            let target = attr
                .target_class()
                .filter(|_| attr.is_to_one_reference())
                .ok_or_else(|| RowError::structural(format!("`{}` cannot be navigated", attr.query_name())))?;
            class = self.registry.class_description(target)?;
        }
        Ok(class)
    }

    /// Choices the editor may offer for the row's open path position.
    pub fn selectable_attributes(&self, id: RowId) -> Result<Vec<Attribute>> {
        let row = self.attribute_row(id)?;
        let slot = row.open_slot();
        let class = self.slot_class(id, slot)?;
        Ok(self.registry.selectable_attributes(class.name(), slot)?)
    }

    /// Fails for the root and simple compound rows, which have no path.
    pub fn attribute_path(&self, id: RowId) -> Result<&[Attribute]> {
        Ok(self.attribute_row(id)?.path())
    }

    pub fn childmost_attribute(&self, id: RowId) -> Result<&Attribute> {
        Ok(self.attribute_row(id)?.childmost())
    }

    /// See [`RowShape`] for what each shape implies.
    pub fn shape(&self, id: RowId) -> Result<RowShape> {
        Ok(self.attribute_row(id)?.shape())
    }

    /// The grouping operator of a compound row, or the collection operator
    /// of a to-many attribute row.
    pub fn collection_operator(&self, id: RowId) -> Result<Option<CollectionOperator>> {
        Ok(match &self.node(id)?.content {
            RowContent::Root { operator, .. } | RowContent::Compound { operator } => Some(*operator),
            RowContent::Attribute(row) => row.collection_operator,
        })
    }

    pub fn attribute_operator(&self, id: RowId) -> Result<Option<&str>> {
        Ok(self.attribute_row(id)?.attribute_operator())
    }

    /// `None` when the row has no value field, for example a boolean
    /// comparison or a null check.
    pub fn attribute_value(&self, id: RowId) -> Result<Option<&str>> {
        Ok(self.attribute_row(id)?.value())
    }

    pub fn prop_name(&self, id: RowId) -> Result<Option<&str>> {
        Ok(self.attribute_row(id)?.prop_name())
    }

    pub fn prop_type(&self, id: RowId) -> Result<Option<Type>> {
        Ok(self.attribute_row(id)?.prop_type())
    }

    /// Set the attribute at the row's open position: appended after a
    /// trailing to-one reference, otherwise replacing the childmost one.
    pub fn set_childmost_attribute(&mut self, id: RowId, attribute: Attribute) -> Result<()> {
        let slot = self.attribute_row(id)?.open_slot();
        self.set_attribute_at(id, slot, attribute)
    }

    /// Set the path element at `index` and drop every element after it.
    pub fn set_attribute_at(&mut self, id: RowId, index: usize, attribute: Attribute) -> Result<()> {
        let row = self.attribute_row(id)?;
        if index > row.open_slot() {
            return Err(RowError::structural(format!(
                "path position {} is past the open position {} of row {}",
                index,
                row.open_slot(),
                id
            ))
            .into());
        }
        let mut path: Vec<Attribute> = row.path[..index].to_vec();
        path.push(attribute);
        self.set_attribute_path(id, path)
    }

    /// Replace the whole attribute path, re-deriving the row's dependent
    /// fields from its new childmost attribute.
    pub fn set_attribute_path(&mut self, id: RowId, path: Vec<Attribute>) -> Result<()> {
        let row = self.attribute_row(id)?;
        if row.path == path {
            return Ok(());
        }
        if !self.children(id)?.is_empty() {
            return Err(RowError::structural(format!(
                "row {} has child rows; remove them before changing its attribute path",
                id
            ))
            .into());
        }
        let context = self.context_class(id)?.name().to_string();
        self.validate_path(&context, &path)?;

        // the row is only touched once the new path has been validated

        let shape = RowShape::of(path.last().unwrap_or(&UNSELECTED));
        let row = self.attribute_row_mut(id)?;
        row.path = path;
        row.reset_for(shape);
        debug!(row = %id, ?shape, "attribute path changed");
        Ok(())
    }

    /// Check every element of `path` is selectable at its position, walking
    /// from `context` through to-one references.
    fn validate_path(&self, context: &str, path: &[Attribute]) -> Result<()> {
        if path.is_empty() {
            return Err(RowError::structural("an attribute path needs at least one element").into());
        }
        let mut class = self.registry.class_description(context)?;
        for (slot, attr) in path.iter().enumerate() {
            if !self.registry.is_selectable(class.name(), slot, attr)? {
                return Err(RowError::IllegalAttribute {
                    attribute: attr.query_name().to_string(),
                    class: class.name().to_string(),
                }
                .into());
            }
            if slot + 1 < path.len() {
                let target = attr.target_class().filter(|_| attr.is_to_one_reference()).ok_or_else(|| {
                    RowError::structural(format!(
                        "`{}` is not a to-one reference and must end the path",
                        attr.query_name()
                    ))
                })?;
                class = self.registry.class_description(target)?;
            }
        }
        Ok(())
    }

    /// Change the collection operator of a compound or to-many row.
    ///
    /// Grouping rows take All, Any or None. A to-many row may also switch to
    /// Count, which gives it a comparison operator and a count value, but
    /// only while it has no children.
    pub fn set_collection_operator(&mut self, id: RowId, operator: CollectionOperator) -> Result<()> {
        let has_children = !self.children(id)?.is_empty();
        match &mut self.node_mut(id)?.content {
            RowContent::Root { operator: current, .. } | RowContent::Compound { operator: current } => {
                if !operator.is_compound() {
                    return Err(invalid_collection_operator(operator, CollectionOperator::compound_operators()));
                }
                *current = operator;
            }
            RowContent::Attribute(row) => {
                if row.shape() != RowShape::ToMany {
                    return Err(invalid_collection_operator(operator, &[]));
                }
                if !operator.is_compound() && has_children {
                    return Err(RowError::structural(format!(
                        "row {} has child rows; remove them before switching to Count",
                        id
                    ))
                    .into());
                }
                // grouping rows carry no comparison; Count starts at `== 0`
                if operator.is_compound() {
                    row.attribute_operator = None;
                    row.value = None;
                } else if row.collection_operator != Some(CollectionOperator::Count) {
                    row.attribute_operator = Some(OPERATORS_ARITHMETIC[0].to_string());
                    row.value = Some("0".to_string());
                }
                row.collection_operator = Some(operator);
            }
        }
        debug!(row = %id, %operator, "collection operator changed");
        Ok(())
    }

    /// Operators the row currently accepts.
    pub fn legal_operators(&self, id: RowId) -> Result<Vec<&'static str>> {
        let row = match &self.node(id)?.content {
            RowContent::Attribute(row) => row,
            _ => return Ok(Vec::new()),
        };
        let ops: &[&'static str] = match row.shape() {
            RowShape::Incomplete => &[],
            RowShape::Primitive(ty) => operators_for_type(ty),
            RowShape::ToMany if row.collection_operator == Some(CollectionOperator::Count) => {
                OPERATORS_ARITHMETIC
            }
            RowShape::ToMany => &[],
            RowShape::Property(_) => row.prop_type.map(operators_for_type).unwrap_or(&[]),
            RowShape::NullCheck { negated: false } => &[OPERATOR_IS_NULL],
            RowShape::NullCheck { negated: true } => &[OPERATOR_IS_NOT_NULL],
        };
        Ok(ops.to_vec())
    }

    /// Set the comparison operator. It must be one of [`legal_operators`].
    ///
    /// [`legal_operators`]: RowTree::legal_operators
    pub fn set_attribute_operator(&mut self, id: RowId, operator: &str) -> Result<()> {
        let allowed = self.legal_operators(id)?;
        if !allowed.contains(&operator) {
            return Err(RowError::InvalidOperator {
                operator: operator.to_string(),
                allowed: allowed.iter().map(|s| s.to_string()).collect(),
            }
            .into());
        }
        self.attribute_row_mut(id)?.attribute_operator = Some(operator.to_string());
        debug!(row = %id, operator, "attribute operator changed");
        Ok(())
    }

    /// The kind of literal the row's value field holds, if it has one.
    pub fn value_kind(&self, id: RowId) -> Result<Option<ValueKind>> {
        let row = self.attribute_row(id)?;
        Ok(match row.shape() {
            RowShape::Primitive(ty) if takes_value(ty) => Some(ValueKind::Typed(ty)),
            RowShape::ToMany if row.collection_operator == Some(CollectionOperator::Count) => {
                Some(ValueKind::Count)
            }
            RowShape::Property(_) => row.prop_type.filter(|ty| takes_value(*ty)).map(ValueKind::Typed),
            _ => None,
        })
    }

    /// Set the value field after checking it against the row's
    /// [`ValueKind`]. The empty string clears a typed value.
    pub fn set_attribute_value(&mut self, id: RowId, value: &str) -> Result<()> {
        let kind = self
            .value_kind(id)?
            .ok_or_else(|| RowError::structural(format!("row {} has no value field", id)))?;
        kind.validate(value)?;
        self.attribute_row_mut(id)?.value = Some(value.to_string());
        debug!(row = %id, value, "attribute value changed");
        Ok(())
    }

    /// Change the type of a property row. The operator and value reset to
    /// the new type's defaults.
    pub fn set_prop_type(&mut self, id: RowId, ty: Type) -> Result<()> {
        self.require_property_row(id)?;
        if !is_prop_type(ty) {
            return Err(RowError::InvalidValue {
                value: ty.to_string(),
                expected: "property type".to_string(),
            }
            .into());
        }
        self.attribute_row_mut(id)?.apply_prop_type(ty);
        debug!(row = %id, %ty, "property type changed");
        Ok(())
    }

    /// Name of the property a property row compares. Any string is accepted.
    pub fn set_prop_name(&mut self, id: RowId, name: &str) -> Result<()> {
        self.require_property_row(id)?;
        self.attribute_row_mut(id)?.prop_name = Some(name.to_string());
        Ok(())
    }

    fn require_property_row(&self, id: RowId) -> Result<()> {
        match self.attribute_row(id)?.shape() {
            RowShape::Property(_) => Ok(()),
            _ => Err(RowError::structural(format!("row {} is not a property row", id)).into()),
        }
    }

    /// A recursive copy of the tree for semantic comparison.
    pub fn snapshot(&self) -> RowSnapshot {
        self.snapshot_of(ROOT)
    }

    fn snapshot_of(&self, id: RowId) -> RowSnapshot {
        match self.node(id) {
            Ok(node) => RowSnapshot {
                content: node.content.clone(),
                children: node.children.iter().map(|&c| self.snapshot_of(c)).collect(),
            },
            // Unreachable for ids taken from a live children list.
            Err(_) => RowSnapshot {
                content: RowContent::Compound {
                    operator: CollectionOperator::And,
                },
                children: Vec::new(),
            },
        }
    }
}

/// The literal kinds a value field can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Typed(Type),
    /// A non-negative integer compared against a collection size.
    Count,
}

impl ValueKind {
    /// Empty input is accepted as a cleared field, except for counts.
    pub fn validate(&self, value: &str) -> Result<()> {
        let ok = match self {
            ValueKind::Count => value.parse::<u32>().is_ok(),
            ValueKind::Typed(_) if value.is_empty() => true,
            ValueKind::Typed(Type::Int16) => value.parse::<i16>().is_ok(),
            ValueKind::Typed(Type::Int32) => value.parse::<i32>().is_ok(),
            ValueKind::Typed(Type::Float64) => value.parse::<f64>().is_ok_and(f64::is_finite),
            ValueKind::Typed(_) => true,
        };
        if ok {
            Ok(())
        } else {
            Err(RowError::InvalidValue {
                value: value.to_string(),
                expected: self.to_string(),
            }
            .into())
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueKind::Typed(ty) => write!(f, "{} value", ty),
            ValueKind::Count => f.write_str("count"),
        }
    }
}

/// `class` must exist and be one of the registry's possible roots.
fn check_cuq(registry: &SchemaRegistry, class: &str) -> Result<()> {
    registry.class_description(class)?;
    if !registry.is_possible_cuq(class) {
        return Err(SchemaError::NotAQualifiableClass(class.to_string()).into());
    }
    Ok(())
}

fn invalid_collection_operator(operator: CollectionOperator, allowed: &[CollectionOperator]) -> crate::error::Error {
    RowError::InvalidOperator {
        operator: operator.to_string(),
        allowed: allowed.iter().map(|op| op.to_string()).collect(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::operators::{OPERATOR_FALSE, OPERATOR_TRUE};

    fn tree(cuq: &str) -> RowTree {
        RowTree::new(Arc::new(SchemaRegistry::with_default_catalog().unwrap()), cuq).unwrap()
    }

    fn attr(tree: &RowTree, class: &str, name: &str) -> Attribute {
        Attribute::Declared(tree.registry().attribute_in(class, name).unwrap().clone())
    }

    #[test]
    fn test_new_tree_has_root_only() {
        let t = tree("Epoch");
        assert_eq!(t.len(), 1);
        assert_eq!(t.depth(t.root()).unwrap(), 0);
        assert_eq!(t.class_under_qualification(), "Epoch");
        assert_eq!(t.collection_operator(t.root()).unwrap(), Some(CollectionOperator::Or));
        assert!(t.is_compound_row(t.root()).unwrap());
        assert!(t.is_empty());
    }

    #[test]
    fn test_unknown_or_unqualifiable_cuq() {
        let registry = Arc::new(SchemaRegistry::with_default_catalog().unwrap());
        assert!(matches!(
            RowTree::new(registry.clone(), "Nope"),
            Err(Error::Schema(SchemaError::ClassNotFound(_)))
        ));
        assert!(matches!(
            RowTree::new(registry, "User"),
            Err(Error::Schema(SchemaError::NotAQualifiableClass(_)))
        ));
    }

    #[test]
    fn test_root_cannot_be_removed() {
        let mut t = tree("Epoch");
        let root = t.root();
        assert!(matches!(
            t.remove_row(root),
            Err(Error::Row(RowError::StructuralInvariantViolation(_)))
        ));
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn test_root_only_takes_compound_operators() {
        let mut t = tree("Epoch");
        let root = t.root();
        t.set_collection_operator(root, CollectionOperator::None).unwrap();
        assert_eq!(t.collection_operator(root).unwrap(), Some(CollectionOperator::None));
        assert!(matches!(
            t.set_collection_operator(root, CollectionOperator::Count),
            Err(Error::Row(RowError::InvalidOperator { .. }))
        ));
        assert_eq!(t.collection_operator(root).unwrap(), Some(CollectionOperator::None));
    }

    #[test]
    fn test_new_attribute_row_starts_unselected() {
        let mut t = tree("Epoch");
        let row = t.add_attribute_row(t.root()).unwrap();
        assert_eq!(t.depth(row).unwrap(), 1);
        assert_eq!(t.childmost_attribute(row).unwrap(), &Attribute::SELECT_ATTRIBUTE);
        assert_eq!(t.shape(row).unwrap(), RowShape::Incomplete);
        assert_eq!(t.parent_class(row).unwrap().name(), "Epoch");
        assert!(!t.is_compound_row(row).unwrap());
        assert!(t.add_attribute_row(row).is_err());
    }

    #[test]
    fn test_path_navigation_through_to_one_references() {
        let mut t = tree("Epoch");
        let row = t.add_attribute_row(t.root()).unwrap();

        t.set_childmost_attribute(row, attr(&t, "Epoch", "epochGroup")).unwrap();
        assert_eq!(t.attribute_path(row).unwrap().len(), 1);
        assert_eq!(t.parent_class(row).unwrap().name(), "EpochGroup");

        t.set_childmost_attribute(row, attr(&t, "EpochGroup", "source")).unwrap();
        assert_eq!(t.parent_class(row).unwrap().name(), "Source");

        t.set_childmost_attribute(row, attr(&t, "Source", "label")).unwrap();
        let names: Vec<&str> = t.attribute_path(row).unwrap().iter().map(|a| a.query_name()).collect();
        assert_eq!(names, vec!["epochGroup", "source", "label"]);
        assert_eq!(t.attribute_operator(row).unwrap(), Some("=="));
        assert_eq!(t.attribute_value(row).unwrap(), Some(""));

        // Replacing a leaf keeps the hops in front of it.
        t.set_childmost_attribute(row, attr(&t, "Source", "uuid")).unwrap();
        assert_eq!(t.attribute_path(row).unwrap().len(), 3);
    }

    #[test]
    fn test_trimming_a_segment_drops_the_tail() {
        let mut t = tree("Epoch");
        let row = t.add_attribute_row(t.root()).unwrap();
        t.set_attribute_path(
            row,
            vec![
                attr(&t, "Epoch", "epochGroup"),
                attr(&t, "EpochGroup", "source"),
                attr(&t, "Source", "label"),
            ],
        )
        .unwrap();

        t.set_attribute_at(row, 1, attr(&t, "EpochGroup", "label")).unwrap();
        let names: Vec<&str> = t.attribute_path(row).unwrap().iter().map(|a| a.query_name()).collect();
        assert_eq!(names, vec!["epochGroup", "label"]);

        assert!(t.set_attribute_at(row, 5, Attribute::IS_NULL).is_err());
    }

    #[test]
    fn test_illegal_attribute_is_rejected_without_change() {
        let mut t = tree("Epoch");
        let row = t.add_attribute_row(t.root()).unwrap();
        let label = attr(&t, "Source", "label");
        assert!(matches!(
            t.set_childmost_attribute(row, label),
            Err(Error::Row(RowError::IllegalAttribute { .. }))
        ));
        assert!(matches!(
            t.set_childmost_attribute(row, Attribute::IS_NULL),
            Err(Error::Row(RowError::IllegalAttribute { .. }))
        ));
        assert_eq!(t.childmost_attribute(row).unwrap(), &Attribute::SELECT_ATTRIBUTE);
    }

    #[test]
    fn test_to_many_defaults_to_count() {
        let mut t = tree("Epoch");
        let row = t.add_attribute_row(t.root()).unwrap();
        t.set_childmost_attribute(row, attr(&t, "Epoch", "epochGroup")).unwrap();
        t.set_childmost_attribute(row, attr(&t, "EpochGroup", "epochs")).unwrap();

        assert_eq!(t.shape(row).unwrap(), RowShape::ToMany);
        assert_eq!(t.collection_operator(row).unwrap(), Some(CollectionOperator::Count));
        assert_eq!(t.attribute_operator(row).unwrap(), Some("=="));
        assert_eq!(t.attribute_value(row).unwrap(), Some("0"));
        assert!(!t.is_compound_row(row).unwrap());

        t.set_attribute_operator(row, ">").unwrap();
        t.set_attribute_value(row, "5").unwrap();
        assert!(matches!(
            t.set_attribute_value(row, "-1"),
            Err(Error::Row(RowError::InvalidValue { .. }))
        ));
        assert_eq!(t.attribute_value(row).unwrap(), Some("5"));
    }

    #[test]
    fn test_to_many_group_holds_children_in_target_class() {
        let mut t = tree("Epoch");
        let row = t.add_attribute_row(t.root()).unwrap();
        t.set_childmost_attribute(row, attr(&t, "Epoch", "responses")).unwrap();
        t.set_collection_operator(row, CollectionOperator::And).unwrap();
        assert!(t.is_compound_row(row).unwrap());
        assert_eq!(t.attribute_operator(row).unwrap(), None);
        assert_eq!(t.attribute_value(row).unwrap(), None);

        let child = t.add_attribute_row(row).unwrap();
        assert_eq!(t.depth(child).unwrap(), 2);
        assert_eq!(t.parent_class(child).unwrap().name(), "Response");
        t.set_childmost_attribute(child, attr(&t, "Response", "samplingRate")).unwrap();

        // Switching to Count or re-pathing would orphan the child.
        assert!(t.set_collection_operator(row, CollectionOperator::Count).is_err());
        assert!(t.set_childmost_attribute(row, attr(&t, "Epoch", "stimuli")).is_err());
        assert_eq!(t.collection_operator(row).unwrap(), Some(CollectionOperator::And));

        t.remove_child(row, 0).unwrap();
        t.set_collection_operator(row, CollectionOperator::Count).unwrap();
        assert_eq!(t.attribute_operator(row).unwrap(), Some("=="));
        assert_eq!(t.attribute_value(row).unwrap(), Some("0"));
    }

    #[test]
    fn test_boolean_defaults_to_is_true() {
        let mut t = tree("Epoch");
        let row = t.add_attribute_row(t.root()).unwrap();
        t.set_childmost_attribute(row, attr(&t, "Epoch", "excludeFromAnalysis")).unwrap();
        assert_eq!(t.attribute_operator(row).unwrap(), Some(OPERATOR_TRUE));
        assert_eq!(t.attribute_value(row).unwrap(), None);
        assert!(t.set_attribute_value(row, "true").is_err());
        t.set_attribute_operator(row, OPERATOR_FALSE).unwrap();
        assert!(matches!(
            t.set_attribute_operator(row, "=="),
            Err(Error::Row(RowError::InvalidOperator { .. }))
        ));
        assert_eq!(t.attribute_operator(row).unwrap(), Some(OPERATOR_FALSE));
    }

    #[test]
    fn test_operator_set_follows_type() {
        let mut t = tree("Epoch");
        let row = t.add_attribute_row(t.root()).unwrap();
        t.set_childmost_attribute(row, attr(&t, "Epoch", "protocolID")).unwrap();
        t.set_attribute_operator(row, "~~=").unwrap();

        t.set_childmost_attribute(row, attr(&t, "Epoch", "startTime")).unwrap();
        assert_eq!(t.attribute_operator(row).unwrap(), Some("=="));
        assert!(t.set_attribute_operator(row, "~=").is_err());
    }

    #[test]
    fn test_numeric_values_are_validated() {
        let mut t = tree("AnalysisRecord");
        let row = t.add_attribute_row(t.root()).unwrap();
        t.set_childmost_attribute(row, attr(&t, "AnalysisRecord", "scmRevision")).unwrap();
        t.set_attribute_value(row, "42").unwrap();
        t.set_attribute_value(row, "").unwrap();
        assert!(matches!(
            t.set_attribute_value(row, "forty"),
            Err(Error::Row(RowError::InvalidValue { .. }))
        ));
    }

    #[test]
    fn test_my_property_defaults() {
        let mut t = tree("Epoch");
        let row = t.add_attribute_row(t.root()).unwrap();
        t.set_childmost_attribute(row, Attribute::MY_PROPERTY).unwrap();

        assert_eq!(t.shape(row).unwrap(), RowShape::Property(PropertyScope::Mine));
        assert_eq!(t.prop_type(row).unwrap(), Some(Type::Int32));
        assert_eq!(t.prop_name(row).unwrap(), Some(""));
        assert_eq!(t.attribute_value(row).unwrap(), Some(""));
        assert_eq!(t.legal_operators(row).unwrap(), OPERATORS_ARITHMETIC.to_vec());

        t.set_prop_name(row, "temperature").unwrap();
        t.set_prop_type(row, Type::Boolean).unwrap();
        assert_eq!(t.legal_operators(row).unwrap(), vec![OPERATOR_TRUE, OPERATOR_FALSE]);
        assert_eq!(t.attribute_operator(row).unwrap(), Some(OPERATOR_TRUE));
        assert_eq!(t.attribute_value(row).unwrap(), None);
        assert_eq!(t.value_kind(row).unwrap(), None);
        assert_eq!(t.prop_name(row).unwrap(), Some("temperature"));

        assert!(t.set_prop_type(row, Type::Int16).is_err());
    }

    #[test]
    fn test_leaving_property_clears_property_fields() {
        let mut t = tree("Epoch");
        let row = t.add_attribute_row(t.root()).unwrap();
        t.set_childmost_attribute(row, Attribute::ANY_PROPERTY).unwrap();
        t.set_prop_name(row, "gain").unwrap();
        t.set_childmost_attribute(row, attr(&t, "Epoch", "protocolID")).unwrap();
        assert_eq!(t.prop_name(row).unwrap(), None);
        assert_eq!(t.prop_type(row).unwrap(), None);
        assert!(t.set_prop_name(row, "gain").is_err());
    }

    #[test]
    fn test_parameters_map_is_a_property_row() {
        let mut t = tree("Epoch");
        let row = t.add_attribute_row(t.root()).unwrap();
        t.set_childmost_attribute(row, attr(&t, "Epoch", "protocolParameters")).unwrap();
        assert_eq!(t.shape(row).unwrap(), RowShape::Property(PropertyScope::Parameter));
        assert_eq!(t.prop_type(row).unwrap(), Some(Type::Int32));
    }

    #[test]
    fn test_null_check_after_reference() {
        let mut t = tree("Epoch");
        let row = t.add_attribute_row(t.root()).unwrap();
        t.set_childmost_attribute(row, attr(&t, "Epoch", "nextEpoch")).unwrap();
        t.set_childmost_attribute(row, Attribute::IS_NOT_NULL).unwrap();
        assert_eq!(t.shape(row).unwrap(), RowShape::NullCheck { negated: true });
        assert_eq!(t.attribute_operator(row).unwrap(), Some(OPERATOR_IS_NOT_NULL));
        assert!(t.set_attribute_operator(row, OPERATOR_IS_NULL).is_err());
        assert!(t.set_attribute_value(row, "x").is_err());
    }

    #[test]
    fn test_remove_cascades_to_descendants() {
        let mut t = tree("Epoch");
        let group = t.add_compound_row(t.root(), CollectionOperator::And).unwrap();
        let inner = t.add_compound_row(group, CollectionOperator::Or).unwrap();
        let leaf = t.add_attribute_row(inner).unwrap();
        let sibling = t.add_attribute_row(t.root()).unwrap();
        assert_eq!(t.len(), 5);
        assert_eq!(t.rows(), vec![t.root(), group, inner, leaf, sibling]);
        assert_eq!(t.depth(leaf).unwrap(), 3);
        assert!(t.is_simple_compound_row(group).unwrap());
        assert_eq!(t.context_class(leaf).unwrap().name(), "Epoch");

        t.remove_row(group).unwrap();
        assert_eq!(t.len(), 2);
        assert!(!t.contains(leaf));
        assert!(matches!(t.depth(inner), Err(Error::Row(RowError::RowNotFound(_)))));
        assert_eq!(t.child(t.root(), 0).unwrap(), sibling);
    }

    #[test]
    fn test_removed_slots_are_reused() {
        let mut t = tree("Epoch");
        for _ in 0..50 {
            let group = t.add_compound_row(t.root(), CollectionOperator::And).unwrap();
            t.add_attribute_row(group).unwrap();
            t.remove_row(group).unwrap();
        }
        assert_eq!(t.len(), 1);
        assert_eq!(t.nodes.len(), 3);

        let a = t.add_attribute_row(t.root()).unwrap();
        let b = t.add_attribute_row(t.root()).unwrap();
        assert_eq!(t.nodes.len(), 3);
        assert_eq!(t.len(), 3);
        assert_eq!(t.rows(), vec![t.root(), a, b]);
        assert_eq!(t.parent(b).unwrap(), Some(t.root()));
        assert!(t.children(a).unwrap().is_empty());
    }

    #[test]
    fn test_compound_row_rejects_count() {
        let mut t = tree("Epoch");
        assert!(t.add_compound_row(t.root(), CollectionOperator::Count).is_err());
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn test_changing_cuq_discards_rows() {
        let mut t = tree("Epoch");
        t.add_attribute_row(t.root()).unwrap();
        t.set_class_under_qualification("Source").unwrap();
        assert_eq!(t.class_under_qualification(), "Source");
        assert_eq!(t.len(), 1);
        assert_eq!(t.nodes.len(), 1);
        let row = t.add_attribute_row(t.root()).unwrap();
        assert_eq!(row.index(), 1);
        assert!(t.set_class_under_qualification("Stimulus").is_err());
        assert_eq!(t.class_under_qualification(), "Source");
    }
}
