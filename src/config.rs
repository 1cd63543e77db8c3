//! Schema catalog configuration, loaded from a JSON file.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::types::{Cardinality, DeclaredAttribute, Type};

/// Catalog file errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file does not exist: {0}")]
    Missing(String),

    #[error("cannot read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("cannot serialize catalog: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// One class entry in the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassConfig {
    pub name: String,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub attributes: Vec<DeclaredAttribute>,
}

/// The full schema catalog: every class, plus the subset usable as the
/// root class under qualification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaConfig {
    pub classes: Vec<ClassConfig>,
    pub possible_cuqs: Vec<String>,
}

impl SchemaConfig {
    /// Load a catalog from a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();

        if !path_ref.exists() {
            return Err(ConfigError::Missing(path_ref.display().to_string()));
        }

        let content = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_ref.display().to_string(),
            source,
        })?;

        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path_ref.display().to_string(),
            source,
        })
    }

    /// Pretty-printed JSON, in the layout `from_json_file` reads.
    pub fn to_json_string(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    pub fn class(&self, name: &str) -> Option<&ClassConfig> {
        self.classes.iter().find(|c| c.name == name)
    }
}

impl Default for SchemaConfig {
    /// The built-in experiment-data catalog.
    fn default() -> Self {
        use Cardinality::{NotApplicable, ToMany, ToOne};
        use Type::*;

        let prim = DeclaredAttribute::primitive;
        let reference = DeclaredAttribute::reference;
        let map = DeclaredAttribute::map;

        let timeline = || {
            vec![
                prim("startTime", "Start Time", DateTime),
                prim("endTime", "End Time", DateTime),
                prim("startTimeZone", "Start Timezone", Utf8String),
                prim("endTimeZone", "End Timezone", Utf8String),
            ]
        };

        let mut timeline_element = timeline();
        timeline_element.extend([
            reference(
                "timelineannotations",
                "All Timeline Annotations",
                PerUserOrCustomReference,
                "TimelineAnnotation",
                ToMany,
            ),
            reference(
                "mytimelineannotations",
                "My Timeline Annotations",
                PerUserOrCustomReference,
                "TimelineAnnotation",
                ToMany,
            ),
        ]);

        let classes = vec![
            class(
                "EntityBase",
                None,
                vec![
                    reference("owner", "Owner", Reference, "User", ToOne),
                    prim("uuid", "UUID", Utf8String),
                    prim("incomplete", "Incomplete", Boolean),
                    map("myproperties", "My Property", PerUserParametersMap, ToMany),
                    map("properties", "Any Property", PerUserParametersMap, ToMany),
                    reference("resources", "Resources", Reference, "Resource", ToMany),
                ],
            ),
            class(
                "TaggableEntityBase",
                Some("EntityBase"),
                vec![
                    reference("mykeywords", "My Keywords", PerUserOrCustomReference, "KeywordTag", ToMany),
                    reference("keywords", "All Keywords", PerUserOrCustomReference, "KeywordTag", ToMany),
                ],
            ),
            class(
                "AnnotatableEntityBase",
                Some("TaggableEntityBase"),
                vec![
                    reference("notes", "All Notes", PerUserOrCustomReference, "Note", ToMany),
                    reference("mynotes", "My Notes", PerUserOrCustomReference, "Note", ToMany),
                ],
            ),
            class("TimelineElement", Some("AnnotatableEntityBase"), timeline_element),
            class(
                "PurposeAndNotesEntity",
                Some("TaggableEntityBase"),
                vec![prim("purpose", "Purpose", Utf8String), prim("notes", "Notes", Utf8String)],
            ),
            class(
                "IOBase",
                Some("TaggableEntityBase"),
                vec![
                    prim("units", "Units", Utf8String),
                    reference("externalDevice", "External Device", Reference, "ExternalDevice", ToOne),
                    map("externalDeviceParameters", "External Device Parameters", ParametersMap, NotApplicable),
                ],
            ),
            class(
                "ResponseBase",
                Some("IOBase"),
                vec![
                    prim("dataType", "Data Type", Int16),
                    prim("byteOrder", "Byte Order", Int16),
                    prim("sampleBytes", "Sample Size (bytes)", Int16),
                ],
            ),
            class(
                "Project",
                Some("PurposeAndNotesEntity"),
                vec![
                    prim("name", "Name", Utf8String),
                    reference("experiments", "Experiments", Reference, "Experiment", ToMany),
                    reference(
                        "myanalysisRecords",
                        "My AnalysisRecords",
                        PerUserOrCustomReference,
                        "AnalysisRecord",
                        ToMany,
                    ),
                    reference(
                        "analysisRecords",
                        "All AnalysisRecords",
                        PerUserOrCustomReference,
                        "AnalysisRecord",
                        ToMany,
                    ),
                ],
            ),
            class(
                "Experiment",
                Some("PurposeAndNotesEntity"),
                vec![
                    reference("project", "Project", Reference, "Project", ToMany),
                    reference("sources", "Sources", Reference, "Source", ToMany),
                    reference("externalDevices", "External Devices", Reference, "ExternalDevice", ToMany),
                    reference("epochGroups", "Epoch Groups", Reference, "EpochGroup", ToMany),
                    prim("curated", "Curated", Boolean),
                ],
            ),
            class(
                "ExternalDevice",
                Some("TaggableEntityBase"),
                vec![
                    prim("name", "Name", Utf8String),
                    prim("manufacturer", "Manufacturer", Utf8String),
                    reference("experiments", "Experiments", Reference, "Experiment", ToMany),
                ],
            ),
            class(
                "Source",
                Some("TaggableEntityBase"),
                vec![
                    prim("label", "Label", Utf8String),
                    reference("experiments", "Experiments", Reference, "Experiment", ToMany),
                    reference("parent", "Parent", Reference, "Source", ToOne),
                    reference("children", "Children", Reference, "Source", ToMany),
                    reference("epochGroups", "Epoch Groups", Reference, "EpochGroup", ToMany),
                    reference(
                        "containing_experiments",
                        "Containing Experiments",
                        PerUserOrCustomReference,
                        "Experiment",
                        ToMany,
                    ),
                ],
            ),
            class(
                "EpochGroup",
                Some("TimelineElement"),
                vec![
                    prim("label", "Label", Utf8String),
                    reference("experiment", "Experiment", Reference, "Experiment", ToOne),
                    reference("source", "Source", Reference, "Source", ToOne),
                    reference("epochs", "Epochs", Reference, "Epoch", ToMany),
                    reference("parent", "Parent", Reference, "EpochGroup", ToOne),
                    reference("children", "Children", Reference, "EpochGroup", ToMany),
                    reference(
                        "eg_containing_experiments",
                        "Containing Experiments",
                        PerUserOrCustomReference,
                        "Experiment",
                        ToMany,
                    ),
                ],
            ),
            class(
                "Epoch",
                Some("TimelineElement"),
                vec![
                    prim("protocolID", "Protocol ID", Utf8String),
                    map("protocolParameters", "Protocol Parameters", ParametersMap, NotApplicable),
                    prim("excludeFromAnalysis", "Exclude from Analysis", Boolean),
                    reference("stimuli", "Stimuli", Reference, "Stimulus", ToMany),
                    reference("responses", "Responses", Reference, "Response", ToMany),
                    reference(
                        "myderivedResponses",
                        "My DerivedResponses",
                        PerUserOrCustomReference,
                        "DerivedResponse",
                        ToMany,
                    ),
                    reference(
                        "derivedResponses",
                        "All DerivedResponses",
                        PerUserOrCustomReference,
                        "DerivedResponse",
                        ToMany,
                    ),
                    reference("epochGroup", "Epoch Group", Reference, "EpochGroup", ToOne),
                    reference("analysisRecords", "Analysis Records", Reference, "AnalysisRecord", ToMany),
                    reference("nextEpoch", "Next Epoch", Reference, "Epoch", ToOne),
                    reference("previousEpoch", "Previous Epoch", Reference, "Epoch", ToOne),
                ],
            ),
            class(
                "Stimulus",
                Some("IOBase"),
                vec![
                    reference("epoch", "Epoch", Reference, "Epoch", ToOne),
                    prim("pluginID", "Plugin ID", Utf8String),
                    map("stimulusParameters", "Stimulus Parameters", ParametersMap, NotApplicable),
                ],
            ),
            class(
                "Response",
                Some("ResponseBase"),
                vec![
                    reference("epoch", "Epoch", Reference, "Epoch", ToOne),
                    prim("samplingRate", "Sampling Rate", Float64),
                    prim("samplingUnits", "Sampling Rate Units", Utf8String),
                ],
            ),
            class(
                "DerivedResponse",
                Some("ResponseBase"),
                vec![
                    reference("epoch", "Epoch", Reference, "Epoch", ToOne),
                    prim("description", "Description", Utf8String),
                    prim("name", "Name", Utf8String),
                    map("derivationParameters", "Derivation Parameters", ParametersMap, NotApplicable),
                ],
            ),
            class("KeywordTag", Some("EntityBase"), vec![prim("tag", "Keyword Tag", Utf8String)]),
            class(
                "Resource",
                Some("TaggableEntityBase"),
                vec![
                    prim("uti", "UTI", Utf8String),
                    prim("notes", "Notes", Utf8String),
                    prim("name", "Name", Utf8String),
                ],
            ),
            class("User", Some("TaggableEntityBase"), vec![prim("userName", "User Name", Utf8String)]),
            class(
                "AnalysisRecord",
                Some("TaggableEntityBase"),
                vec![
                    prim("name", "Name", Utf8String),
                    prim("notes", "Notes", Utf8String),
                    prim("scmRevision", "Source Code Revision", Int32),
                    prim("scmURL", "Source Code Repository URL", Utf8String),
                    prim("entryFunctionName", "Entry Function Name", Utf8String),
                    map("analysisParameters", "Analysis Parameters", ParametersMap, NotApplicable),
                    reference("epochs", "Epochs", Reference, "Epoch", ToMany),
                    reference("project", "Project", Reference, "Project", ToOne),
                ],
            ),
            class("Annotation", Some("TaggableEntityBase"), vec![prim("text", "Text", Utf8String)]),
            class("Note", Some("Annotation"), vec![]),
            class("TimelineAnnotation", Some("Annotation"), timeline()),
        ];

        let possible_cuqs = ["Epoch", "Source", "AnalysisRecord", "Project", "EpochGroup"]
            .into_iter()
            .map(String::from)
            .collect();

        Self {
            classes,
            possible_cuqs,
        }
    }
}

fn class(name: &str, parent: Option<&str>, attributes: Vec<DeclaredAttribute>) -> ClassConfig {
    ClassConfig {
        name: name.to_string(),
        parent: parent.map(String::from),
        attributes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_valid_json_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{
                "classes": [
                    {{ "name": "Base", "attributes": [
                        {{ "query_name": "uuid", "display_name": "UUID", "type": "utf8_string" }}
                    ] }},
                    {{ "name": "Sample", "parent": "Base", "attributes": [
                        {{ "query_name": "owner", "display_name": "Owner", "type": "reference",
                           "target": "Base", "cardinality": "to_one" }}
                    ] }}
                ],
                "possible_cuqs": ["Sample"]
            }}"#
        )
        .unwrap();

        let config = SchemaConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.classes.len(), 2);
        assert_eq!(config.possible_cuqs, vec!["Sample".to_string()]);
        let sample = config.class("Sample").unwrap();
        assert_eq!(sample.parent.as_deref(), Some("Base"));
        assert_eq!(sample.attributes[0].cardinality, Cardinality::ToOne);
    }

    #[test]
    fn test_invalid_json_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "invalid json").unwrap();

        let result = SchemaConfig::from_json_file(file.path());
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_missing_file() {
        let result = SchemaConfig::from_json_file("non_existent_schema.json");
        assert!(matches!(result, Err(ConfigError::Missing(_))));
    }

    #[test]
    fn test_default_config() {
        let config = SchemaConfig::default();
        assert_eq!(config.possible_cuqs[0], "Epoch");
        let epoch = config.class("Epoch").unwrap();
        assert_eq!(epoch.parent.as_deref(), Some("TimelineElement"));
        assert!(epoch.attributes.iter().any(|a| a.query_name == "epochGroup"));
    }

    #[test]
    fn test_default_config_survives_json() {
        let config = SchemaConfig::default();
        let parsed: SchemaConfig = serde_json::from_str(&config.to_json_string().unwrap()).unwrap();
        assert_eq!(parsed, config);
    }
}
