// src/types/component.rs

//! Component definitions: the unit of composition within a package

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::package::Variable;

fn is_false(b: &bool) -> bool {
    !*b
}

/// A named bundle of artifacts with lifecycle hooks
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ZarfComponent {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Always deployed, never prompted
    #[serde(default, skip_serializing_if = "is_false")]
    pub required: bool,

    /// Pre-selected when prompting
    #[serde(default, skip_serializing_if = "is_false")]
    pub default: bool,

    /// Deprecated component grouping, kept for manifest compatibility
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub group: String,

    /// Path to a public key used to verify OCI skeleton imports
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cosign_key_path: String,

    #[serde(default, skip_serializing_if = "ZarfComponentOnly::is_empty")]
    pub only: ZarfComponentOnly,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub import: Option<ZarfComponentImport>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<ZarfFile>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub charts: Vec<ZarfChart>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub manifests: Vec<ZarfManifest>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub repos: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data_injections: Vec<DataInjection>,

    #[serde(default, skip_serializing_if = "ZarfComponentActions::is_empty")]
    pub actions: ZarfComponentActions,

    /// Deprecated script hooks, migrated to actions on load
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scripts: Option<DeprecatedScripts>,
}

impl ZarfComponent {
    /// True when the component pulls nothing from outside the manifest
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
            && self.charts.is_empty()
            && self.manifests.is_empty()
            && self.images.is_empty()
            && self.repos.is_empty()
            && self.data_injections.is_empty()
    }
}

/// Restricts where a component may be created or deployed
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ZarfComponentOnly {
    #[serde(default, skip_serializing_if = "String::is_empty", rename = "localOS")]
    pub local_os: String,

    #[serde(default, skip_serializing_if = "ZarfComponentOnlyCluster::is_empty")]
    pub cluster: ZarfComponentOnlyCluster,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub flavor: String,
}

impl ZarfComponentOnly {
    pub fn is_empty(&self) -> bool {
        self.local_os.is_empty() && self.cluster.is_empty() && self.flavor.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ZarfComponentOnlyCluster {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub architecture: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub distros: Vec<String>,
}

impl ZarfComponentOnlyCluster {
    pub fn is_empty(&self) -> bool {
        self.architecture.is_empty() && self.distros.is_empty()
    }
}

/// Pulls a component definition from another package
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ZarfComponentImport {
    /// Name of the component to import when it differs from ours
    #[serde(default, skip_serializing_if = "String::is_empty", rename = "name")]
    pub component_name: String,

    /// Relative path to a directory containing a zarf.yaml
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,

    /// OCI skeleton reference (oci://...)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
}

/// A file to place on the target system
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ZarfFile {
    /// Local path or URL to pull at create time
    pub source: String,

    /// Expected SHA256 of the source
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub shasum: String,

    /// Destination path at deploy time (supports ###ZARF_TEMP###)
    pub target: String,

    #[serde(default, skip_serializing_if = "is_false")]
    pub executable: bool,

    /// Additional symlinks pointed at the target
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub symlinks: Vec<String>,
}

/// A Helm chart to install
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ZarfChart {
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,

    /// Helm repo URL, OCI ref, or git URL ending in .git
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,

    /// Chart path within a git repository
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub git_path: String,

    /// Path to a chart directory on the local filesystem
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub local_path: String,

    pub namespace: String,

    /// Helm release name; falls back to the chart name
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub release_name: String,

    #[serde(default, skip_serializing_if = "is_false")]
    pub no_wait: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values_files: Vec<String>,
}

impl ZarfChart {
    /// Name used for the Helm release
    pub fn release_name(&self) -> &str {
        if self.release_name.is_empty() {
            &self.name
        } else {
            &self.release_name
        }
    }
}

/// Raw Kubernetes manifests, rendered through a synthetic chart at deploy
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ZarfManifest {
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kustomizations: Vec<String>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub no_wait: bool,
}

/// Copies data into a running container once its pod is ready
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DataInjection {
    /// Local folder or file to inject
    pub source: String,

    pub target: ZarfContainerTarget,

    #[serde(default, skip_serializing_if = "is_false")]
    pub compress: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ZarfContainerTarget {
    pub namespace: String,

    /// Pod label selector, e.g. `app=data-loader`
    pub selector: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub container: String,

    pub path: String,
}

/// Lifecycle hook sets
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ZarfComponentActions {
    #[serde(default, skip_serializing_if = "ZarfActionSet::is_empty")]
    pub on_create: ZarfActionSet,

    #[serde(default, skip_serializing_if = "ZarfActionSet::is_empty")]
    pub on_deploy: ZarfActionSet,

    #[serde(default, skip_serializing_if = "ZarfActionSet::is_empty")]
    pub on_remove: ZarfActionSet,
}

impl ZarfComponentActions {
    pub fn is_empty(&self) -> bool {
        self.on_create.is_empty() && self.on_deploy.is_empty() && self.on_remove.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ZarfActionSet {
    #[serde(default, skip_serializing_if = "ActionDefaults::is_empty")]
    pub defaults: ActionDefaults,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub before: Vec<ZarfAction>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub after: Vec<ZarfAction>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_success: Vec<ZarfAction>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_failure: Vec<ZarfAction>,
}

impl ZarfActionSet {
    pub fn is_empty(&self) -> bool {
        self.before.is_empty()
            && self.after.is_empty()
            && self.on_success.is_empty()
            && self.on_failure.is_empty()
    }
}

/// Defaults applied to every action in a set unless overridden
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActionDefaults {
    #[serde(default, skip_serializing_if = "is_false")]
    pub mute: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_total_seconds: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub dir: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
}

impl ActionDefaults {
    pub fn is_empty(&self) -> bool {
        !self.mute
            && self.max_total_seconds.is_none()
            && self.max_retries.is_none()
            && self.dir.is_empty()
            && self.env.is_empty()
    }
}

/// One lifecycle hook: a shell command XOR a wait
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ZarfAction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait: Option<ZarfActionWait>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub mute: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_total_seconds: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub dir: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,

    /// Variables captured from the command's stdout (onDeploy only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub set_variables: Vec<Variable>,

    /// Deprecated singular form, migrated to setVariables on load
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub set_variable: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ZarfActionWait {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<ZarfActionWaitCluster>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<ZarfActionWaitNetwork>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ZarfActionWaitCluster {
    pub kind: String,

    /// Resource name or label selector
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,

    /// Condition to wait for, e.g. `Ready` or `{.status.phase}=Running`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub condition: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ZarfActionWaitNetwork {
    /// One of http, https, tcp
    pub protocol: String,

    pub address: String,

    /// Expected HTTP status code (http/https only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
}

/// Pre-actions script hooks, accepted on load and migrated immediately
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeprecatedScripts {
    #[serde(default, skip_serializing_if = "is_false")]
    pub show_output: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub retry: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prepare: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub before: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub after: Vec<String>,
}

/// Component name -> deprecated group name, tracked for prompt grouping
pub type ComponentGroups = BTreeMap<String, Vec<String>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chart_release_name_fallback() {
        let chart = ZarfChart {
            name: "podinfo".to_string(),
            ..Default::default()
        };
        assert_eq!(chart.release_name(), "podinfo");

        let chart = ZarfChart {
            name: "podinfo".to_string(),
            release_name: "my-release".to_string(),
            ..Default::default()
        };
        assert_eq!(chart.release_name(), "my-release");
    }

    #[test]
    fn test_component_parse_full() {
        let yaml = r#"
name: full
required: true
only:
  localOS: linux
  cluster:
    architecture: amd64
    distros: [k3s]
files:
  - source: ./a.txt
    target: /tmp/a.txt
    shasum: abc123
charts:
  - name: podinfo
    url: https://stefanprodan.github.io/podinfo
    version: 6.4.0
    namespace: podinfo
images:
  - ghcr.io/stefanprodan/podinfo:6.4.0
repos:
  - https://github.com/stefanprodan/podinfo.git
dataInjections:
  - source: ./seed
    target:
      namespace: demo
      selector: app=loader
      path: /data
actions:
  onDeploy:
    before:
      - cmd: echo hello
        setVariables:
          - name: GREETING
"#;
        let component: ZarfComponent = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(component.only.cluster.distros, vec!["k3s"]);
        assert_eq!(component.files[0].shasum, "abc123");
        assert_eq!(component.data_injections[0].target.selector, "app=loader");
        assert_eq!(
            component.actions.on_deploy.before[0].set_variables[0].name,
            "GREETING"
        );
        assert!(!component.is_empty());
    }

    #[test]
    fn test_empty_component() {
        let component = ZarfComponent {
            name: "noop".to_string(),
            ..Default::default()
        };
        assert!(component.is_empty());
        assert!(component.actions.is_empty());
    }
}
