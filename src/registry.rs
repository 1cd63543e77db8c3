//! The schema registry: every known class, resolved once from a catalog.
//!
//! A registry is read-only after initialization and is meant to be shared
//! behind an `Arc` by every row tree and translator that works against the
//! same schema.

use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

use crate::config::SchemaConfig;
use crate::error::SchemaError;
use crate::types::{Attribute, Cardinality, ClassDescription, DeclaredAttribute, SpecialAttribute, Type};

#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    classes: Vec<ClassDescription>,
    index: HashMap<String, usize>,
    possible_cuqs: Vec<String>,
    initialized: bool,
}

impl SchemaRegistry {
    /// An empty, uninitialized registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry populated with the built-in catalog.
    ///
    /// Fails only if the built-in catalog itself is inconsistent.
    pub fn with_default_catalog() -> Result<Self, SchemaError> {
        let mut registry = Self::new();
        registry.initialize()?;
        Ok(registry)
    }

    /// Build a registry from a catalog, validating it first.
    pub fn from_config(config: SchemaConfig) -> Result<Self, SchemaError> {
        let mut registry = Self::new();
        registry.load(config)?;
        Ok(registry)
    }

    /// Populate the registry with the built-in catalog. Repeat calls after
    /// the first successful one are no-ops.
    pub fn initialize(&mut self) -> Result<(), SchemaError> {
        if self.initialized {
            return Ok(());
        }
        self.load(SchemaConfig::default())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Validate `config` and replace the registry contents with it.
    fn load(&mut self, config: SchemaConfig) -> Result<(), SchemaError> {
        validate_catalog(&config)?;

        let declared: HashMap<&str, &crate::config::ClassConfig> =
            config.classes.iter().map(|c| (c.name.as_str(), c)).collect();

        let mut classes = Vec::with_capacity(config.classes.len());
        let mut index = HashMap::with_capacity(config.classes.len());
        for class in &config.classes {
            let all_attributes = effective_attributes(&class.name, &declared);
            index.insert(class.name.clone(), classes.len());
            classes.push(ClassDescription::new(
                class.name.clone(),
                class.parent.clone(),
                class.attributes.clone(),
                all_attributes,
            ));
        }

        debug!(
            classes = classes.len(),
            cuqs = config.possible_cuqs.len(),
            "schema registry initialized"
        );

        self.classes = classes;
        self.index = index;
        self.possible_cuqs = config.possible_cuqs;
        self.initialized = true;
        Ok(())
    }

    /// Look up a class by name.
    pub fn class_description(&self, name: &str) -> Result<&ClassDescription, SchemaError> {
        self.index
            .get(name)
            .map(|&i| &self.classes[i])
            .ok_or_else(|| SchemaError::ClassNotFound(name.to_string()))
    }

    pub fn all_class_descriptions(&self) -> &[ClassDescription] {
        &self.classes
    }

    /// Classes legal as the root class under qualification, in catalog order.
    pub fn possible_cuqs(&self) -> Vec<&ClassDescription> {
        self.possible_cuqs
            .iter()
            .filter_map(|name| self.index.get(name).map(|&i| &self.classes[i]))
            .collect()
    }

    pub fn is_possible_cuq(&self, name: &str) -> bool {
        self.possible_cuqs.iter().any(|c| c == name)
    }

    /// Unqualified lookup across every class's declared attributes.
    ///
    /// Query names are not unique across classes. The first declaration in
    /// catalog order is returned only when every class declaring the name
    /// agrees on its definition; otherwise the lookup is ambiguous and the
    /// caller must use [`SchemaRegistry::attribute_in`].
    pub fn attribute(&self, query_name: &str) -> Result<&DeclaredAttribute, SchemaError> {
        let matches: Vec<(&ClassDescription, &DeclaredAttribute)> = self
            .classes
            .iter()
            .filter_map(|c| c.attribute(query_name).map(|a| (c, a)))
            .collect();

        let Some(&(_, first)) = matches.first() else {
            return Err(SchemaError::UnknownAttribute(query_name.to_string()));
        };

        let conflicting = matches.iter().any(|(_, a)| {
            a.ty != first.ty || a.target != first.target || a.cardinality != first.cardinality
        });
        if conflicting {
            let classes: Vec<String> = matches.iter().map(|(c, _)| c.name().to_string()).collect();
            warn!(query_name, ?classes, "ambiguous unqualified attribute lookup");
            return Err(SchemaError::AmbiguousAttribute {
                query_name: query_name.to_string(),
                classes,
            });
        }
        Ok(first)
    }

    /// Class-qualified lookup over the class's own and inherited attributes.
    pub fn attribute_in(&self, class: &str, query_name: &str) -> Result<&DeclaredAttribute, SchemaError> {
        self.class_description(class)?
            .find_attribute(query_name)
            .ok_or_else(|| SchemaError::AttributeNotFound {
                class: class.to_string(),
                query_name: query_name.to_string(),
            })
    }

    /// The choices offered at position `slot` of an attribute path whose
    /// context class is `class`.
    ///
    /// Per-user property maps are offered through `MY_PROPERTY` and
    /// `ANY_PROPERTY` rather than directly. Null checks need at least one
    /// reference hop in front of them.
    pub fn selectable_attributes(&self, class: &str, slot: usize) -> Result<Vec<Attribute>, SchemaError> {
        let description = self.class_description(class)?;

        let mut choices = vec![Attribute::SELECT_ATTRIBUTE];
        choices.extend(
            description
                .all_attributes()
                .iter()
                .filter(|a| a.ty != Type::PerUserParametersMap)
                .cloned()
                .map(Attribute::Declared),
        );
        if slot > 0 {
            choices.push(Attribute::IS_NULL);
            choices.push(Attribute::IS_NOT_NULL);
        }
        choices.push(Attribute::MY_PROPERTY);
        choices.push(Attribute::ANY_PROPERTY);
        Ok(choices)
    }

    /// Whether `attribute` may be chosen at `slot` on `class`.
    pub fn is_selectable(&self, class: &str, slot: usize, attribute: &Attribute) -> Result<bool, SchemaError> {
        let description = self.class_description(class)?;
        let legal = match attribute {
            Attribute::Declared(attr) => {
                attr.ty != Type::PerUserParametersMap
                    && description.find_attribute(&attr.query_name) == Some(attr)
            }
            Attribute::Special(SpecialAttribute::IsNull | SpecialAttribute::IsNotNull) => slot > 0,
            Attribute::Special(_) => true,
        };
        Ok(legal)
    }
}

/// Own attributes layered over the ancestors', nearest declaration winning.
fn effective_attributes(
    class: &str,
    declared: &HashMap<&str, &crate::config::ClassConfig>,
) -> Vec<DeclaredAttribute> {
    let mut chain = Vec::new();
    let mut current = Some(class);
    while let Some(name) = current {
        let Some(config) = declared.get(name) else {
            break;
        };
        chain.push(*config);
        current = config.parent.as_deref();
    }

    let mut result: Vec<DeclaredAttribute> = Vec::new();
    for config in chain.into_iter().rev() {
        for attr in &config.attributes {
            match result.iter_mut().find(|a| a.query_name == attr.query_name) {
                Some(existing) => *existing = attr.clone(),
                None => result.push(attr.clone()),
            }
        }
    }
    result
}

/// Reject a catalog the registry cannot resolve, naming the first problem.
fn validate_catalog(config: &SchemaConfig) -> Result<(), SchemaError> {
    let invalid = |message: String| Err(SchemaError::InvalidCatalog(message));

    // class names first, so later checks can refer to any of them
    let mut names = HashSet::new();
    for class in &config.classes {
        if !names.insert(class.name.as_str()) {
            return invalid(format!("class `{}` is declared twice", class.name));
        }
    }

    for class in &config.classes {
        if let Some(parent) = &class.parent {
            if !names.contains(parent.as_str()) {
                return invalid(format!("class `{}` has unknown parent `{}`", class.name, parent));
            }
        }

        let mut own = HashSet::new();
        for attr in &class.attributes {
            if !own.insert(attr.query_name.as_str()) {
                return invalid(format!(
                    "attribute `{}` is declared twice on `{}`",
                    attr.query_name, class.name
                ));
            }
            if SpecialAttribute::from_query_name(&attr.query_name).is_some() {
                return invalid(format!("attribute name `{}` is reserved", attr.query_name));
            }
            if attr.ty.is_reference() {
                match &attr.target {
                    Some(target) if names.contains(target.as_str()) => {}
                    Some(target) => {
                        return invalid(format!(
                            "`{}.{}` references unknown class `{}`",
                            class.name, attr.query_name, target
                        ))
                    }
                    None => {
                        return invalid(format!(
                            "reference `{}.{}` has no target class",
                            class.name, attr.query_name
                        ))
                    }
                }
                if attr.cardinality == Cardinality::NotApplicable {
                    return invalid(format!(
                        "reference `{}.{}` needs a to_one or to_many cardinality",
                        class.name, attr.query_name
                    ));
                }
            }
        }
    }

    // parent chains must end at a root class
    let by_name: HashMap<&str, Option<&str>> = config
        .classes
        .iter()
        .map(|c| (c.name.as_str(), c.parent.as_deref()))
        .collect();
    for class in &config.classes {
        let mut seen = HashSet::new();
        let mut current = Some(class.name.as_str());
        while let Some(name) = current {
            if !seen.insert(name) {
                return invalid(format!("class `{}` has a cyclic parent chain", class.name));
            }
            current = by_name.get(name).copied().flatten();
        }
    }

    for cuq in &config.possible_cuqs {
        if !names.contains(cuq.as_str()) {
            return invalid(format!("class under qualification `{}` is not declared", cuq));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClassConfig;

    fn class(name: &str, parent: Option<&str>, attributes: Vec<DeclaredAttribute>) -> ClassConfig {
        ClassConfig {
            name: name.to_string(),
            parent: parent.map(String::from),
            attributes,
        }
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let mut registry = SchemaRegistry::new();
        assert!(!registry.is_initialized());
        registry.initialize().unwrap();
        let count = registry.all_class_descriptions().len();
        registry.initialize().unwrap();
        assert_eq!(registry.all_class_descriptions().len(), count);
        assert!(registry.is_initialized());
    }

    #[test]
    fn test_class_lookup() {
        let registry = SchemaRegistry::with_default_catalog().unwrap();
        assert_eq!(registry.class_description("Epoch").unwrap().name(), "Epoch");
        assert_eq!(
            registry.class_description("Nope"),
            Err(SchemaError::ClassNotFound("Nope".to_string()))
        );
    }

    #[test]
    fn test_possible_cuqs_order() {
        let registry = SchemaRegistry::with_default_catalog().unwrap();
        let names: Vec<&str> = registry.possible_cuqs().iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["Epoch", "Source", "AnalysisRecord", "Project", "EpochGroup"]);
        assert!(registry.is_possible_cuq("Source"));
        assert!(!registry.is_possible_cuq("User"));
    }

    #[test]
    fn test_all_attributes_includes_ancestors() {
        let registry = SchemaRegistry::with_default_catalog().unwrap();
        let epoch = registry.class_description("Epoch").unwrap();
        let names: Vec<&str> = epoch.all_attributes().iter().map(|a| a.query_name.as_str()).collect();

        // EntityBase, TaggableEntityBase, TimelineElement and Epoch itself
        for expected in ["owner", "uuid", "keywords", "startTime", "protocolID", "epochGroup"] {
            assert!(names.contains(&expected), "missing {}", expected);
        }
        let unique: HashSet<&str> = names.iter().copied().collect();
        assert_eq!(unique.len(), names.len());
    }

    #[test]
    fn test_nearest_declaration_wins() {
        let config = SchemaConfig {
            classes: vec![
                class(
                    "Base",
                    None,
                    vec![DeclaredAttribute::primitive("notes", "Notes", Type::Utf8String)],
                ),
                class(
                    "Child",
                    Some("Base"),
                    vec![DeclaredAttribute::primitive("notes", "Note Count", Type::Int32)],
                ),
            ],
            possible_cuqs: vec!["Child".to_string()],
        };
        let registry = SchemaRegistry::from_config(config).unwrap();
        let child = registry.class_description("Child").unwrap();
        assert_eq!(child.all_attributes().len(), 1);
        assert_eq!(child.all_attributes()[0].ty, Type::Int32);
        assert_eq!(registry.attribute_in("Base", "notes").unwrap().ty, Type::Utf8String);
    }

    #[test]
    fn test_unqualified_attribute_lookup() {
        let registry = SchemaRegistry::with_default_catalog().unwrap();
        assert_eq!(registry.attribute("protocolID").unwrap().ty, Type::Utf8String);
        assert_eq!(
            registry.attribute("missing"),
            Err(SchemaError::UnknownAttribute("missing".to_string()))
        );
        // `notes` is a string on some classes and a to-many reference on others
        match registry.attribute("notes") {
            Err(SchemaError::AmbiguousAttribute { classes, .. }) => {
                assert!(classes.contains(&"AnnotatableEntityBase".to_string()));
                assert!(classes.contains(&"Resource".to_string()));
            }
            other => panic!("expected ambiguity, got {:?}", other),
        }
        // `label` is declared identically on Source and EpochGroup
        assert_eq!(registry.attribute("label").unwrap().ty, Type::Utf8String);
    }

    #[test]
    fn test_selectable_attributes() {
        let registry = SchemaRegistry::with_default_catalog().unwrap();
        let first = registry.selectable_attributes("Epoch", 0).unwrap();
        assert_eq!(first[0], Attribute::SELECT_ATTRIBUTE);
        assert!(!first.contains(&Attribute::IS_NULL));
        assert!(first.contains(&Attribute::MY_PROPERTY));
        assert!(!first.iter().any(|a| a.query_name() == "myproperties"));

        let nested = registry.selectable_attributes("Source", 1).unwrap();
        assert!(nested.contains(&Attribute::IS_NULL));
        assert!(nested.contains(&Attribute::IS_NOT_NULL));
    }

    #[test]
    fn test_catalog_validation() {
        let dangling = SchemaConfig {
            classes: vec![class(
                "A",
                None,
                vec![DeclaredAttribute::reference("b", "B", Type::Reference, "B", Cardinality::ToOne)],
            )],
            possible_cuqs: vec![],
        };
        assert!(matches!(
            SchemaRegistry::from_config(dangling),
            Err(SchemaError::InvalidCatalog(_))
        ));

        let cyclic = SchemaConfig {
            classes: vec![class("A", Some("B"), vec![]), class("B", Some("A"), vec![])],
            possible_cuqs: vec![],
        };
        assert!(matches!(
            SchemaRegistry::from_config(cyclic),
            Err(SchemaError::InvalidCatalog(_))
        ));

        let unknown_cuq = SchemaConfig {
            classes: vec![class("A", None, vec![])],
            possible_cuqs: vec!["Z".to_string()],
        };
        assert!(matches!(
            SchemaRegistry::from_config(unknown_cuq),
            Err(SchemaError::InvalidCatalog(_))
        ));

        let reserved = SchemaConfig {
            classes: vec![class(
                "A",
                None,
                vec![DeclaredAttribute::primitive("is_null", "x", Type::Boolean)],
            )],
            possible_cuqs: vec![],
        };
        assert!(SchemaRegistry::from_config(reserved).is_err());
    }
}
