// src/types/package.rs

//! Package manifest root types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

use crate::types::component::ZarfComponent;

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("Failed to read manifest file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse manifest: {0}")]
    ParseError(#[from] serde_yaml::Error),
}

/// The two manifest kinds. Init configs drive the cluster bootstrap flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PackageKind {
    #[default]
    ZarfPackageConfig,
    ZarfInitConfig,
}

/// Root structure of zarf.yaml
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ZarfPackage {
    pub kind: PackageKind,

    pub metadata: PackageMetadata,

    /// Filled in by the creator at build time, absent in authored manifests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildData>,

    #[serde(default)]
    pub components: Vec<ZarfComponent>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variables: Vec<Variable>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constants: Vec<Constant>,
}

impl ZarfPackage {
    /// Load a manifest from a zarf.yaml path
    pub fn from_file(path: &Path) -> Result<Self, ManifestError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse a manifest from a YAML string
    pub fn parse(content: &str) -> Result<Self, ManifestError> {
        let package: ZarfPackage = serde_yaml::from_str(content)?;
        Ok(package)
    }

    /// Serialize back to YAML
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    pub fn is_init_config(&self) -> bool {
        self.kind == PackageKind::ZarfInitConfig
    }

    /// Architecture the package was (or will be) built for
    pub fn architecture(&self) -> &str {
        if let Some(build) = &self.build {
            if !build.architecture.is_empty() {
                return &build.architecture;
            }
        }
        self.metadata.architecture.as_deref().unwrap_or_default()
    }

    /// Filename stem for the produced archive, e.g.
    /// `zarf-package-hello-amd64-0.0.1`.
    pub fn archive_stem(&self, arch: &str) -> String {
        let prefix = if self.is_init_config() {
            "zarf-init".to_string()
        } else {
            format!("zarf-package-{}", self.metadata.name)
        };
        match &self.metadata.version {
            Some(version) if !version.is_empty() => format!("{prefix}-{arch}-{version}"),
            _ => format!("{prefix}-{arch}"),
        }
    }
}

/// Author-facing package metadata
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PackageMetadata {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,

    /// Connected-development mode: disables all air-gap machinery
    #[serde(default, skip_serializing_if = "is_false")]
    pub yolo: bool,

    /// Store the archive without zstd compression
    #[serde(default, skip_serializing_if = "is_false")]
    pub uncompressed: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// Build-time metadata recorded by the creator
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct BuildData {
    pub version: String,

    pub architecture: String,

    pub timestamp: String,

    pub user: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub terminal: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub flavor: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub migrations: Vec<String>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_non_breaking_version: String,

    /// Component name -> OCI skeleton URL it was imported from
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub oci_imported_components: BTreeMap<String, String>,
}

/// How a variable's value is interpreted during templating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VariableType {
    #[default]
    Raw,
    /// Value is a path whose contents are substituted
    File,
}

/// A deploy-time variable declared by the package author
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Variable {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub prompt: bool,

    #[serde(default, skip_serializing_if = "is_false")]
    pub sensitive: bool,

    #[serde(default, skip_serializing_if = "is_false")]
    pub auto_indent: bool,

    #[serde(default, rename = "type")]
    pub variable_type: VariableType,
}

/// A create-time constant; its value is baked into the package
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Constant {
    pub name: String,

    pub value: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub auto_indent: bool,

    /// Regex the value must match at create time
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pattern: String,
}

/// A variable with its resolved value for the current run
#[derive(Debug, Clone, Default)]
pub struct SetVariable {
    pub name: String,
    pub value: String,
    pub sensitive: bool,
    pub auto_indent: bool,
    pub variable_type: VariableType,
}

impl SetVariable {
    pub fn from_variable(variable: &Variable, value: String) -> Self {
        Self {
            name: variable.name.clone(),
            value,
            sensitive: variable.sensitive,
            auto_indent: variable.auto_indent,
            variable_type: variable.variable_type,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_manifest() {
        let yaml = r#"
kind: ZarfPackageConfig
metadata:
  name: hello
  version: 0.0.1
components:
  - name: c
    required: true
"#;
        let package = ZarfPackage::parse(yaml).unwrap();
        assert_eq!(package.kind, PackageKind::ZarfPackageConfig);
        assert_eq!(package.metadata.name, "hello");
        assert_eq!(package.components.len(), 1);
        assert!(package.components[0].required);
    }

    #[test]
    fn test_init_manifest_kind() {
        let yaml = "kind: ZarfInitConfig\nmetadata:\n  name: init\n";
        let package = ZarfPackage::parse(yaml).unwrap();
        assert!(package.is_init_config());
    }

    #[test]
    fn test_archive_stem() {
        let yaml = "kind: ZarfPackageConfig\nmetadata:\n  name: hello\n  version: 0.0.1\n";
        let package = ZarfPackage::parse(yaml).unwrap();
        assert_eq!(package.archive_stem("amd64"), "zarf-package-hello-amd64-0.0.1");

        let yaml = "kind: ZarfInitConfig\nmetadata:\n  name: init\n  version: 1.0.0\n";
        let package = ZarfPackage::parse(yaml).unwrap();
        assert_eq!(package.archive_stem("arm64"), "zarf-init-arm64-1.0.0");
    }

    #[test]
    fn test_roundtrip_preserves_variables() {
        let yaml = r#"
kind: ZarfPackageConfig
metadata:
  name: vars
variables:
  - name: NGINX_VERSION
    prompt: true
  - name: DB_PASSWORD
    sensitive: true
    autoIndent: true
constants:
  - name: IMAGE_TAG
    value: "1.25"
"#;
        let package = ZarfPackage::parse(yaml).unwrap();
        let out = package.to_yaml().unwrap();
        let reparsed = ZarfPackage::parse(&out).unwrap();
        assert_eq!(reparsed.variables.len(), 2);
        assert!(reparsed.variables[1].sensitive);
        assert!(reparsed.variables[1].auto_indent);
        assert_eq!(reparsed.constants[0].value, "1.25");
    }
}
