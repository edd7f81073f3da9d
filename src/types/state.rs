// src/types/state.rs

//! Per-cluster state and deployed-package records
//!
//! Both live as opaque secrets in the `zarf` namespace: the state under
//! `zarf-state` key `state`, deployed packages under `zarf-package-<name>`
//! key `data`. Values are JSON.

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::package::ZarfPackage;

/// Default NodePort the in-cluster registry is exposed on
pub const DEFAULT_REGISTRY_NODEPORT: u16 = 31999;

/// Length of generated credentials
const PASSWORD_LENGTH: usize = 48;

/// Tracks how the engine is configured in a cluster
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ZarfState {
    /// True when the engine deployed its own cluster (k3s appliance mode)
    pub zarf_appliance: bool,

    /// Detected distribution of the target cluster
    pub distro: String,

    /// Machine architecture of the cluster nodes
    pub architecture: String,

    #[serde(default)]
    pub storage_class: String,

    #[serde(default)]
    pub agent_tls: GeneratedPki,

    #[serde(default)]
    pub git_server: GitServerInfo,

    #[serde(default)]
    pub registry_info: RegistryInfo,

    #[serde(default)]
    pub artifact_server: ArtifactServerInfo,
}

/// PKI material for the admission agent
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedPki {
    #[serde(default)]
    pub ca: String,

    #[serde(default)]
    pub cert: String,

    #[serde(default)]
    pub key: String,
}

impl GeneratedPki {
    pub fn is_empty(&self) -> bool {
        self.ca.is_empty() && self.cert.is_empty() && self.key.is_empty()
    }
}

/// Git server coordinates and credentials
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GitServerInfo {
    #[serde(default)]
    pub address: String,

    #[serde(default)]
    pub push_username: String,

    #[serde(default)]
    pub push_password: String,

    #[serde(default)]
    pub pull_username: String,

    #[serde(default)]
    pub pull_password: String,

    /// True when the engine deployed the git server itself
    #[serde(default)]
    pub internal_server: bool,
}

impl GitServerInfo {
    /// Fill defaults for an internal git server and generate credentials.
    pub fn fill_in_empty_values(&mut self) {
        if self.address.is_empty() {
            self.address = "http://zarf-gitea-http.zarf.svc.cluster.local:3000".to_string();
            self.internal_server = true;
        }
        if self.push_username.is_empty() {
            self.push_username = "zarf-git-user".to_string();
        }
        if self.pull_username.is_empty() {
            self.pull_username = "zarf-git-read-user".to_string();
        }
        if self.push_password.is_empty() {
            self.push_password = random_password();
        }
        if self.pull_password.is_empty() {
            self.pull_password = random_password();
        }
    }
}

/// Mirror registry coordinates and credentials
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RegistryInfo {
    #[serde(default)]
    pub address: String,

    #[serde(default)]
    pub node_port: u16,

    /// True when the engine deployed the registry itself
    #[serde(default)]
    pub internal_registry: bool,

    #[serde(default)]
    pub push_username: String,

    #[serde(default)]
    pub push_password: String,

    #[serde(default)]
    pub pull_username: String,

    #[serde(default)]
    pub pull_password: String,

    /// htpasswd-style secret seeded into the registry chart
    #[serde(default)]
    pub secret: String,
}

impl RegistryInfo {
    /// Fill defaults for an internal registry and generate credentials.
    pub fn fill_in_empty_values(&mut self) {
        if self.node_port == 0 {
            self.node_port = DEFAULT_REGISTRY_NODEPORT;
        }
        if self.address.is_empty() {
            self.internal_registry = true;
            self.address = format!("127.0.0.1:{}", self.node_port);
        }
        if self.push_username.is_empty() {
            self.push_username = "zarf-push".to_string();
        }
        if self.pull_username.is_empty() {
            self.pull_username = "zarf-pull".to_string();
        }
        if self.push_password.is_empty() {
            self.push_password = random_password();
        }
        if self.pull_password.is_empty() {
            self.pull_password = random_password();
        }
        if self.secret.is_empty() {
            self.secret = random_password();
        }
    }
}

/// Artifact (OCI helm/package) server coordinates
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactServerInfo {
    #[serde(default)]
    pub address: String,

    #[serde(default)]
    pub push_username: String,

    #[serde(default)]
    pub push_token: String,

    #[serde(default)]
    pub internal_server: bool,
}

impl ArtifactServerInfo {
    pub fn fill_in_empty_values(&mut self) {
        if self.address.is_empty() {
            self.address = "http://zarf-gitea-http.zarf.svc.cluster.local:3000/api/packages/zarf-git-user".to_string();
            self.internal_server = true;
        }
        if self.push_username.is_empty() {
            self.push_username = "zarf-git-user".to_string();
        }
    }
}

fn random_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(PASSWORD_LENGTH)
        .map(char::from)
        .collect()
}

/// Record of one installed package
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DeployedPackage {
    pub name: String,

    /// The manifest as it was deployed
    pub data: ZarfPackage,

    pub cli_version: String,

    #[serde(default)]
    pub deployed_components: BTreeMap<String, DeployedComponent>,

    /// Connect strings discovered during deploy, keyed by connect name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub connect_strings: ConnectStrings,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DeployedComponent {
    #[serde(default)]
    pub installed_charts: Vec<InstalledChart>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InstalledChart {
    pub namespace: String,
    pub chart_name: String,
}

/// A named port-forward target discovered from service annotations
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectString {
    pub description: String,

    /// Path appended to the port-forward address
    pub url: String,
}

pub type ConnectStrings = BTreeMap<String, ConnectString>;
