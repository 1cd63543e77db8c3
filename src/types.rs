//! Value types describing the domain schema.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The value kind of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    #[serde(rename = "boolean")]
    Boolean,
    #[serde(rename = "int16")]
    Int16,
    #[serde(rename = "int32")]
    Int32,
    #[serde(rename = "float64")]
    Float64,
    #[serde(rename = "utf8_string")]
    Utf8String,
    #[serde(rename = "date_time")]
    DateTime,
    #[serde(rename = "reference")]
    Reference,
    /// Untyped key/value bag.
    #[serde(rename = "parameters_map")]
    ParametersMap,
    #[serde(rename = "per_user_parameters_map")]
    PerUserParametersMap,
    /// To-many reference split into "mine" and "all" variants.
    #[serde(rename = "per_user_or_custom_reference")]
    PerUserOrCustomReference,
}

impl Type {
    pub fn as_str(&self) -> &'static str {
        match self {
            Type::Boolean => "boolean",
            Type::Int16 => "int16",
            Type::Int32 => "int32",
            Type::Float64 => "float64",
            Type::Utf8String => "utf8_string",
            Type::DateTime => "date_time",
            Type::Reference => "reference",
            Type::ParametersMap => "parameters_map",
            Type::PerUserParametersMap => "per_user_parameters_map",
            Type::PerUserOrCustomReference => "per_user_or_custom_reference",
        }
    }

    /// Scalar types that take an operator and a literal directly.
    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            Type::Boolean
                | Type::Int16
                | Type::Int32
                | Type::Float64
                | Type::Utf8String
                | Type::DateTime
        )
    }

    /// Types whose attributes point at another class.
    pub fn is_reference(&self) -> bool {
        matches!(self, Type::Reference | Type::PerUserOrCustomReference)
    }

    pub fn is_parameters_map(&self) -> bool {
        matches!(self, Type::ParametersMap | Type::PerUserParametersMap)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Type {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ty = match s {
            "boolean" => Type::Boolean,
            "int16" => Type::Int16,
            "int32" => Type::Int32,
            "float64" => Type::Float64,
            "utf8_string" => Type::Utf8String,
            "date_time" => Type::DateTime,
            "reference" => Type::Reference,
            "parameters_map" => Type::ParametersMap,
            "per_user_parameters_map" => Type::PerUserParametersMap,
            "per_user_or_custom_reference" => Type::PerUserOrCustomReference,
            other => return Err(format!("unknown type `{}`", other)),
        };
        Ok(ty)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    ToOne,
    ToMany,
    #[default]
    NotApplicable,
}

/// An attribute declared on a schema class.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeclaredAttribute {
    /// Stable identifier used in expressions.
    pub query_name: String,
    /// Human label.
    pub display_name: String,
    #[serde(rename = "type")]
    pub ty: Type,
    /// Name of the referenced class, for reference types.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default)]
    pub cardinality: Cardinality,
}

impl DeclaredAttribute {
    pub fn primitive(query_name: &str, display_name: &str, ty: Type) -> Self {
        Self {
            query_name: query_name.to_string(),
            display_name: display_name.to_string(),
            ty,
            target: None,
            cardinality: Cardinality::NotApplicable,
        }
    }

    pub fn reference(
        query_name: &str,
        display_name: &str,
        ty: Type,
        target: &str,
        cardinality: Cardinality,
    ) -> Self {
        Self {
            query_name: query_name.to_string(),
            display_name: display_name.to_string(),
            ty,
            target: Some(target.to_string()),
            cardinality,
        }
    }

    pub fn map(query_name: &str, display_name: &str, ty: Type, cardinality: Cardinality) -> Self {
        Self {
            query_name: query_name.to_string(),
            display_name: display_name.to_string(),
            ty,
            target: None,
            cardinality,
        }
    }
}

/// Sentinel path terminators that no class declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecialAttribute {
    /// Nothing chosen yet.
    SelectAttribute,
    IsNull,
    IsNotNull,
    MyProperty,
    AnyProperty,
}

impl SpecialAttribute {
    pub const ALL: [SpecialAttribute; 5] = [
        SpecialAttribute::SelectAttribute,
        SpecialAttribute::IsNull,
        SpecialAttribute::IsNotNull,
        SpecialAttribute::MyProperty,
        SpecialAttribute::AnyProperty,
    ];

    pub fn query_name(&self) -> &'static str {
        match self {
            SpecialAttribute::SelectAttribute => "select_attribute",
            SpecialAttribute::IsNull => "is_null",
            SpecialAttribute::IsNotNull => "is_not_null",
            SpecialAttribute::MyProperty => "my_property",
            SpecialAttribute::AnyProperty => "any_property",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            SpecialAttribute::SelectAttribute => "Select Attribute",
            SpecialAttribute::IsNull => "is null",
            SpecialAttribute::IsNotNull => "is not null",
            SpecialAttribute::MyProperty => "My Property",
            SpecialAttribute::AnyProperty => "Any Property",
        }
    }

    pub fn from_query_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.query_name() == name)
    }
}

/// Which property bag a dynamic property row reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyScope {
    /// The current user's properties (`MY_PROPERTY`).
    Mine,
    /// Properties set by any user (`ANY_PROPERTY`).
    Any,
    /// A declared parameters-map attribute such as `protocolParameters`.
    Parameter,
}

/// One element of an attribute path: a declared attribute or a sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Attribute {
    Declared(DeclaredAttribute),
    Special(SpecialAttribute),
}

impl Attribute {
    pub const SELECT_ATTRIBUTE: Attribute = Attribute::Special(SpecialAttribute::SelectAttribute);
    pub const IS_NULL: Attribute = Attribute::Special(SpecialAttribute::IsNull);
    pub const IS_NOT_NULL: Attribute = Attribute::Special(SpecialAttribute::IsNotNull);
    pub const MY_PROPERTY: Attribute = Attribute::Special(SpecialAttribute::MyProperty);
    pub const ANY_PROPERTY: Attribute = Attribute::Special(SpecialAttribute::AnyProperty);

    pub fn query_name(&self) -> &str {
        match self {
            Attribute::Declared(attr) => &attr.query_name,
            Attribute::Special(special) => special.query_name(),
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            Attribute::Declared(attr) => &attr.display_name,
            Attribute::Special(special) => special.display_name(),
        }
    }

    /// `None` for special attributes.
    pub fn ty(&self) -> Option<Type> {
        match self {
            Attribute::Declared(attr) => Some(attr.ty),
            Attribute::Special(_) => None,
        }
    }

    pub fn cardinality(&self) -> Cardinality {
        match self {
            Attribute::Declared(attr) => attr.cardinality,
            Attribute::Special(_) => Cardinality::NotApplicable,
        }
    }

    pub fn target_class(&self) -> Option<&str> {
        match self {
            Attribute::Declared(attr) => attr.target.as_deref(),
            Attribute::Special(_) => None,
        }
    }

    pub fn special(&self) -> Option<SpecialAttribute> {
        match self {
            Attribute::Declared(_) => None,
            Attribute::Special(special) => Some(*special),
        }
    }

    pub fn is_special(&self) -> bool {
        matches!(self, Attribute::Special(_))
    }

    pub fn is_primitive(&self) -> bool {
        self.ty().is_some_and(|ty| ty.is_primitive())
    }

    pub fn is_to_one_reference(&self) -> bool {
        self.ty().is_some_and(|ty| ty.is_reference()) && self.cardinality() == Cardinality::ToOne
    }

    pub fn is_to_many_reference(&self) -> bool {
        self.ty().is_some_and(|ty| ty.is_reference()) && self.cardinality() == Cardinality::ToMany
    }
}

impl From<DeclaredAttribute> for Attribute {
    fn from(attr: DeclaredAttribute) -> Self {
        Attribute::Declared(attr)
    }
}

impl From<SpecialAttribute> for Attribute {
    fn from(special: SpecialAttribute) -> Self {
        Attribute::Special(special)
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// A schema class with its directly declared attributes.
///
/// The effective attribute set (own plus inherited) is filled in by the
/// registry when the catalog is loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassDescription {
    name: String,
    parent: Option<String>,
    attributes: Vec<DeclaredAttribute>,
    all_attributes: Vec<DeclaredAttribute>,
}

impl ClassDescription {
    pub(crate) fn new(
        name: String,
        parent: Option<String>,
        attributes: Vec<DeclaredAttribute>,
        all_attributes: Vec<DeclaredAttribute>,
    ) -> Self {
        Self {
            name,
            parent,
            attributes,
            all_attributes,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    /// Attributes declared directly on this class.
    pub fn attributes(&self) -> &[DeclaredAttribute] {
        &self.attributes
    }

    /// Own and inherited attributes; the nearest declaration wins on a
    /// name collision.
    pub fn all_attributes(&self) -> &[DeclaredAttribute] {
        &self.all_attributes
    }

    /// An attribute declared on this class itself.
    pub fn attribute(&self, query_name: &str) -> Option<&DeclaredAttribute> {
        self.attributes.iter().find(|a| a.query_name == query_name)
    }

    /// An attribute declared here or inherited, nearest declaration first.
    pub fn find_attribute(&self, query_name: &str) -> Option<&DeclaredAttribute> {
        self.all_attributes.iter().find(|a| a.query_name == query_name)
    }
}

impl fmt::Display for ClassDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
