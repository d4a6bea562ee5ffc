//! Technique definitions parsed from Atomic Red Team style YAML.
//!
//! Definitions are immutable once parsed. The source tier a definition came
//! from only affects its provenance tag and base directory.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};

use super::source::Provenance;
use super::CatalogError;

/// A cataloged technique and its ordered atomic tests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TechniqueDefinition {
    /// Technique identifier (`T####` or `T####.###`).
    pub attack_technique: String,
    pub display_name: String,
    #[serde(default)]
    pub atomic_tests: Vec<AtomicTestSpec>,
}

/// One executable simulation of a technique.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AtomicTestSpec {
    pub name: String,
    /// Stable identity used for result correlation.
    #[serde(default, rename = "auto_generated_guid", skip_serializing_if = "Option::is_none")]
    pub guid: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub supported_platforms: Vec<String>,
    #[serde(default)]
    pub input_arguments: IndexMap<String, InputArgumentSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependency_executor_name: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<DependencySpec>,
    pub executor: ExecutorSpec,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub signatures: Vec<String>,
}

/// Declared input argument.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputArgumentSpec {
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_argument_type", rename = "type")]
    pub kind: String,
    /// Default value; may reference other placeholders.
    #[serde(default, deserialize_with = "scalar_as_string")]
    pub default: Option<String>,
}

/// Prerequisite check with an optional install command.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DependencySpec {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub prereq_command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub get_prereq_command: Option<String>,
}

/// How a test is executed.
///
/// `name` stays a string here: an unrecognized executor must fail only the
/// test that declares it, not the parse of the whole technique.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutorSpec {
    pub name: String,
    #[serde(default)]
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleanup_command: Option<String>,
    #[serde(default)]
    pub elevation_required: bool,
    /// Operator instructions for the `manual` executor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<String>,
}

fn default_argument_type() -> String {
    "string".to_string()
}

/// Accept strings, numbers and booleans as argument defaults.
fn scalar_as_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_yaml::Value>::deserialize(deserializer)?;
    match value {
        None | Some(serde_yaml::Value::Null) => Ok(None),
        Some(serde_yaml::Value::String(s)) => Ok(Some(s)),
        Some(serde_yaml::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(serde_yaml::Value::Bool(b)) => Ok(Some(b.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "argument default must be a scalar, got {:?}",
            other
        ))),
    }
}

impl AtomicTestSpec {
    /// Executor used for prerequisite checks; falls back to the main executor.
    pub fn dependency_executor(&self) -> &str {
        match self.dependency_executor_name.as_deref() {
            Some(name) if !name.trim().is_empty() => name,
            _ => &self.executor.name,
        }
    }

    /// Display key: GUID when present, otherwise the name.
    pub fn display_key(&self) -> &str {
        self.guid.as_deref().unwrap_or(&self.name)
    }

    /// Whether the test declares support for `platform` (case-insensitive).
    pub fn supports_platform(&self, platform: &str) -> bool {
        self.supported_platforms
            .iter()
            .any(|p| p.eq_ignore_ascii_case(platform))
    }
}

impl TechniqueDefinition {
    /// Parse a definition from raw YAML bytes.
    pub fn from_yaml(bytes: &[u8]) -> Result<Self, CatalogError> {
        serde_yaml::from_slice(bytes).map_err(|e| CatalogError::Parse(e.to_string()))
    }

    /// Find a test by GUID first, then by name.
    pub fn find_test(&self, name: Option<&str>, guid: Option<&str>) -> Option<(usize, &AtomicTestSpec)> {
        if let Some(guid) = guid.filter(|g| !g.is_empty()) {
            if let Some(found) = self
                .atomic_tests
                .iter()
                .enumerate()
                .find(|(_, t)| t.guid.as_deref().is_some_and(|g| g.eq_ignore_ascii_case(guid)))
            {
                return Some(found);
            }
        }
        let name = name.filter(|n| !n.is_empty())?;
        self.atomic_tests.iter().enumerate().find(|(_, t)| t.name == name)
    }
}

/// A definition together with where it was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedTechnique {
    pub definition: TechniqueDefinition,
    pub provenance: Provenance,
    /// Root substituted for `PathToAtomicsFolder` references.
    pub base_dir: PathBuf,
    /// SHA-256 of the raw definition bytes.
    pub sha256: String,
}

impl LoadedTechnique {
    /// Parse raw bytes obtained from any tier.
    pub fn parse(bytes: &[u8], provenance: Provenance, base_dir: &Path) -> Result<Self, CatalogError> {
        let definition = TechniqueDefinition::from_yaml(bytes)?;
        Ok(Self {
            definition,
            provenance,
            base_dir: base_dir.to_path_buf(),
            sha256: hex::encode(Sha256::digest(bytes)),
        })
    }

    pub fn id(&self) -> &str {
        &self.definition.attack_technique
    }
}
