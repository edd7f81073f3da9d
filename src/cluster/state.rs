// src/cluster/state.rs

//! State and deployed-package secrets
//!
//! The cluster state lives in secret `zarf-state` under key `state`;
//! each installed package is recorded in `zarf-package-<name>` under key
//! `data`. Both values are JSON. State writes all funnel through
//! [`Cluster::save_state`], the single serialized writer.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::cluster::{
    Cluster, GIT_SECRET_NAME, IMAGE_PULL_SECRET_NAME, MANAGED_BY_LABEL, ZARF_NAMESPACE,
};
use crate::error::Error;
use crate::retry;
use crate::types::state::{DeployedPackage, RegistryInfo, ZarfState};

/// Name of the state secret
pub const STATE_SECRET_NAME: &str = "zarf-state";

/// Key the JSON state lives under
pub const STATE_SECRET_KEY: &str = "state";

/// Prefix of deployed-package secrets
pub const PACKAGE_SECRET_PREFIX: &str = "zarf-package-";

/// Key the JSON record lives under
pub const PACKAGE_SECRET_KEY: &str = "data";

fn managed_labels() -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(MANAGED_BY_LABEL.0.to_string(), MANAGED_BY_LABEL.1.to_string());
    labels
}

impl Cluster {
    /// Load the cluster state, `None` when the cluster was never initialized.
    pub fn load_state(&self) -> Result<Option<ZarfState>> {
        let Some(data) = self
            .client()
            .get_secret(ZARF_NAMESPACE, STATE_SECRET_NAME)?
        else {
            return Ok(None);
        };
        let raw = data.get(STATE_SECRET_KEY).ok_or_else(|| {
            Error::cluster(format!(
                "secret {STATE_SECRET_NAME} exists but has no {STATE_SECRET_KEY:?} key"
            ))
        })?;
        let state: ZarfState =
            serde_json::from_slice(raw).context("Failed to parse cluster state")?;
        Ok(Some(state))
    }

    /// Load the state, failing with a mitigation hint when it is absent.
    pub fn require_state(&self) -> Result<ZarfState> {
        self.load_state()?.ok_or_else(|| {
            Error::cluster(
                "the cluster has no zarf-state secret; run `zarf init` against it first",
            )
            .into()
        })
    }

    /// Persist the state. Writes are serialized and retried.
    pub fn save_state(&self, state: &ZarfState) -> Result<()> {
        let _guard = self.state_guard();
        let raw = serde_json::to_vec(state).context("Failed to serialize cluster state")?;
        let mut data = BTreeMap::new();
        data.insert(STATE_SECRET_KEY.to_string(), raw);
        let labels = managed_labels();
        retry::with_retry("saving cluster state", self.cancel(), || {
            self.client()
                .upsert_secret(ZARF_NAMESPACE, STATE_SECRET_NAME, &data, &labels)
        })?;
        debug!("cluster state saved");
        Ok(())
    }

    /// Record (or replace) a deployed-package secret.
    pub fn record_package(&self, record: &DeployedPackage) -> Result<()> {
        let raw = serde_json::to_vec(record).context("Failed to serialize package record")?;
        let mut data = BTreeMap::new();
        data.insert(PACKAGE_SECRET_KEY.to_string(), raw);
        let labels = managed_labels();
        let name = format!("{PACKAGE_SECRET_PREFIX}{}", record.name);
        retry::with_retry("recording deployed package", self.cancel(), || {
            self.client()
                .upsert_secret(ZARF_NAMESPACE, &name, &data, &labels)
        })
    }

    pub fn get_deployed_package(&self, package_name: &str) -> Result<Option<DeployedPackage>> {
        let name = format!("{PACKAGE_SECRET_PREFIX}{package_name}");
        let Some(data) = self.client().get_secret(ZARF_NAMESPACE, &name)? else {
            return Ok(None);
        };
        let raw = data
            .get(PACKAGE_SECRET_KEY)
            .ok_or_else(|| Error::cluster(format!("secret {name} has no data key")))?;
        let record = serde_json::from_slice(raw)
            .with_context(|| format!("Failed to parse package record {name}"))?;
        Ok(Some(record))
    }

    pub fn delete_package_record(&self, package_name: &str) -> Result<()> {
        let name = format!("{PACKAGE_SECRET_PREFIX}{package_name}");
        self.client().delete_secret(ZARF_NAMESPACE, &name)
    }

    /// Names of every deployed package.
    pub fn deployed_package_names(&self) -> Result<Vec<String>> {
        Ok(self
            .client()
            .list_secret_names(ZARF_NAMESPACE, PACKAGE_SECRET_PREFIX)?
            .into_iter()
            .filter_map(|s| {
                s.strip_prefix(PACKAGE_SECRET_PREFIX)
                    .map(|name| name.to_string())
            })
            .collect())
    }

    /// Replicate registry and git credentials into every managed namespace
    /// so freshly-rewritten workloads can pull.
    pub fn update_managed_secrets(&self, state: &ZarfState) -> Result<()> {
        let mut namespaces = self
            .client()
            .namespaces_with_label(MANAGED_BY_LABEL.0, MANAGED_BY_LABEL.1)?;
        if !namespaces.iter().any(|ns| ns == ZARF_NAMESPACE) {
            namespaces.push(ZARF_NAMESPACE.to_string());
        }

        let docker_config = docker_config_json(&state.registry_info)?;
        let mut registry_data = BTreeMap::new();
        registry_data.insert(".dockerconfigjson".to_string(), docker_config);

        let mut git_data = BTreeMap::new();
        git_data.insert(
            "username".to_string(),
            state.git_server.pull_username.clone().into_bytes(),
        );
        git_data.insert(
            "password".to_string(),
            state.git_server.pull_password.clone().into_bytes(),
        );

        let labels = managed_labels();
        for namespace in &namespaces {
            self.client().upsert_secret(
                namespace,
                IMAGE_PULL_SECRET_NAME,
                &registry_data,
                &labels,
            )?;
            self.client()
                .upsert_secret(namespace, GIT_SECRET_NAME, &git_data, &labels)?;
        }
        info!(namespaces = namespaces.len(), "managed pull secrets updated");
        Ok(())
    }
}

/// Render a `.dockerconfigjson` payload granting pull access to the mirror.
pub fn docker_config_json(registry: &RegistryInfo) -> Result<Vec<u8>> {
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

    let auth = BASE64.encode(format!(
        "{}:{}",
        registry.pull_username, registry.pull_password
    ));
    let mut auths = serde_json::Map::new();
    auths.insert(
        registry.address.clone(),
        serde_json::json!({ "auth": auth }),
    );
    let config = serde_json::json!({ "auths": auths });
    serde_json::to_vec(&config).context("Failed to encode docker config")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::fake::FakeClusterClient;
    use crate::cluster::ClusterClient;
    use crate::config::CancelToken;
    use std::sync::Arc;

    fn cluster_fixture() -> (Arc<FakeClusterClient>, Cluster) {
        let client = Arc::new(FakeClusterClient::new());
        let cluster = Cluster::new(client.clone(), CancelToken::new());
        (client, cluster)
    }

    #[test]
    fn test_state_roundtrip() {
        let (_client, cluster) = cluster_fixture();
        assert!(cluster.load_state().unwrap().is_none());
        assert!(cluster.require_state().is_err());

        let mut state = ZarfState {
            distro: "kind".to_string(),
            architecture: "amd64".to_string(),
            ..Default::default()
        };
        state.registry_info.fill_in_empty_values();
        cluster.save_state(&state).unwrap();

        let loaded = cluster.require_state().unwrap();
        assert_eq!(loaded.distro, "kind");
        assert_eq!(loaded.registry_info.address, state.registry_info.address);
    }

    #[test]
    fn test_package_records() {
        let (_client, cluster) = cluster_fixture();
        let record = DeployedPackage {
            name: "hello".to_string(),
            cli_version: "0.1.0".to_string(),
            ..Default::default()
        };
        cluster.record_package(&record).unwrap();

        assert_eq!(cluster.deployed_package_names().unwrap(), vec!["hello"]);
        let loaded = cluster.get_deployed_package("hello").unwrap().unwrap();
        assert_eq!(loaded.cli_version, "0.1.0");

        cluster.delete_package_record("hello").unwrap();
        assert!(cluster.get_deployed_package("hello").unwrap().is_none());
        assert!(cluster.deployed_package_names().unwrap().is_empty());
    }

    #[test]
    fn test_docker_config_json() {
        let mut registry = RegistryInfo::default();
        registry.fill_in_empty_values();
        let raw = docker_config_json(&registry).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert!(value["auths"]["127.0.0.1:31999"]["auth"].is_string());
    }

    #[test]
    fn test_managed_secrets_replicated() {
        let (client, cluster) = cluster_fixture();
        client.add_namespace("apps", true);
        client.add_namespace("unmanaged", false);

        let mut state = ZarfState::default();
        state.registry_info.fill_in_empty_values();
        state.git_server.fill_in_empty_values();
        cluster.update_managed_secrets(&state).unwrap();

        assert!(client
            .get_secret("apps", IMAGE_PULL_SECRET_NAME)
            .unwrap()
            .is_some());
        assert!(client
            .get_secret("apps", GIT_SECRET_NAME)
            .unwrap()
            .is_some());
        assert!(client
            .get_secret("unmanaged", IMAGE_PULL_SECRET_NAME)
            .unwrap()
            .is_none());
        assert!(client
            .get_secret(ZARF_NAMESPACE, IMAGE_PULL_SECRET_NAME)
            .unwrap()
            .is_some());
    }
}
