// src/cluster/mod.rs

//! Cluster adapter
//!
//! Kubernetes plumbing itself (API calls, exec streams, port-forwards) is an
//! external collaborator behind the [`ClusterClient`] trait; this module
//! owns everything the engine layers on top: the state secret, deployed
//! package records, image-pull secret management, resource waits, and
//! tunnels to in-cluster services.

pub mod kubectl;
pub mod state;

#[cfg(test)]
pub mod fake;

use anyhow::Result;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::actions::ClusterWaiter;
use crate::config::CancelToken;
use crate::error::Error;
use crate::types::component::ZarfActionWaitCluster;

/// Namespace owned by the engine
pub const ZARF_NAMESPACE: &str = "zarf";

/// Label selecting namespaces the agent and secret sync manage
pub const MANAGED_BY_LABEL: (&str, &str) = ("app.kubernetes.io/managed-by", "zarf");

/// Image pull secret replicated into managed namespaces
pub const IMAGE_PULL_SECRET_NAME: &str = "private-registry";

/// Git credentials secret replicated into managed namespaces
pub const GIT_SECRET_NAME: &str = "private-git-server";

/// Label the agent stamps onto mutated pods
pub const AGENT_PATCHED_LABEL: (&str, &str) = ("zarf-agent", "patched");

/// Annotation (on namespaces or objects) that opts out of agent mutation
pub const AGENT_SKIP_ANNOTATION: &str = "zarf.dev/agent";

/// Default budget waiting for pods to appear and become ready
pub const DEFAULT_POD_WAIT: Duration = Duration::from_secs(90);

/// Default budget waiting for the cluster to answer at all
pub const DEFAULT_CLUSTER_WAIT: Duration = Duration::from_secs(300);

const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// A pod as the engine sees it
#[derive(Debug, Clone)]
pub struct PodInfo {
    pub name: String,
    /// Kubernetes phase string, e.g. `Running`
    pub phase: String,
    pub ready: bool,
    /// The full object for callers that need to inspect details
    pub json: Value,
}

/// An open port-forward to an in-cluster service
pub trait Tunnel: Send {
    /// Local `host:port` the remote endpoint is reachable on
    fn local_address(&self) -> String;
    fn close(&mut self);
}

/// Contract over the Kubernetes API (external collaborator)
pub trait ClusterClient: Send + Sync {
    /// Cheap connectivity probe
    fn reachable(&self) -> Result<()>;

    fn detect_distro(&self) -> Result<String>;

    fn node_architectures(&self) -> Result<Vec<String>>;

    fn default_storage_class(&self) -> Result<String>;

    fn create_namespace(&self, name: &str, labels: &BTreeMap<String, String>) -> Result<()>;

    /// Namespaces carrying the given `key=value` label
    fn namespaces_with_label(&self, key: &str, value: &str) -> Result<Vec<String>>;

    fn get_secret(&self, namespace: &str, name: &str)
        -> Result<Option<BTreeMap<String, Vec<u8>>>>;

    fn upsert_secret(
        &self,
        namespace: &str,
        name: &str,
        data: &BTreeMap<String, Vec<u8>>,
        labels: &BTreeMap<String, String>,
    ) -> Result<()>;

    fn delete_secret(&self, namespace: &str, name: &str) -> Result<()>;

    fn list_secret_names(&self, namespace: &str, prefix: &str) -> Result<Vec<String>>;

    fn upsert_configmap(
        &self,
        namespace: &str,
        name: &str,
        labels: &BTreeMap<String, String>,
        binary_data: &BTreeMap<String, Vec<u8>>,
    ) -> Result<()>;

    fn delete_configmaps_with_label(&self, namespace: &str, key: &str, value: &str) -> Result<()>;

    /// Create or update an arbitrary resource from its JSON form
    fn apply_resource(&self, resource: &Value) -> Result<()>;

    fn delete_resource(&self, kind: &str, namespace: &str, name: &str) -> Result<()>;

    fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<PodInfo>>;

    /// Exec a command in a container, streaming `stdin` in, stdout back
    fn exec_in_pod(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        command: &[String],
        stdin: Option<&[u8]>,
    ) -> Result<Vec<u8>>;

    fn open_tunnel(&self, namespace: &str, service: &str, remote_port: u16)
        -> Result<Box<dyn Tunnel>>;

    /// Evaluate a wait condition like `Ready` or `{.status.phase}=Running`
    /// against a named resource
    fn resource_condition(
        &self,
        kind: &str,
        name: &str,
        namespace: &str,
        condition: &str,
    ) -> Result<bool>;

    /// Find the service carrying the `zarf.dev/connect-name=<name>`
    /// annotation, for `zarf connect`.
    fn find_connect_service(&self, name: &str) -> Result<Option<ConnectTarget>> {
        let _ = name;
        Ok(None)
    }
}

/// A resolved `zarf connect` target
#[derive(Debug, Clone)]
pub struct ConnectTarget {
    pub namespace: String,
    pub service: String,
    pub port: u16,
    /// Path appended to the local forward address
    pub url: String,
}

/// The engine's view of one target cluster
pub struct Cluster {
    client: Arc<dyn ClusterClient>,
    cancel: CancelToken,
    /// serializes every state write
    state_lock: Mutex<()>,
}

impl Cluster {
    pub fn new(client: Arc<dyn ClusterClient>, cancel: CancelToken) -> Self {
        Self {
            client,
            cancel,
            state_lock: Mutex::new(()),
        }
    }

    pub fn client(&self) -> &Arc<dyn ClusterClient> {
        &self.client
    }

    /// Block until the API answers, within `timeout`.
    pub fn wait_for_healthy(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            self.cancel.check()?;
            match self.client.reachable() {
                Ok(()) => return Ok(()),
                Err(err) if Instant::now() + POLL_INTERVAL >= deadline => {
                    return Err(Error::cluster_unreachable(format!(
                        "cluster did not become ready within {}s: {err:#}",
                        timeout.as_secs()
                    ))
                    .into());
                }
                Err(_) => std::thread::sleep(POLL_INTERVAL),
            }
        }
    }

    /// Wait for at least one ready pod matching `selector`, returning the
    /// matches. `filter` can reject pods (e.g. ones missing an injection
    /// marker); rejected pods do not satisfy the wait.
    pub fn wait_for_pods(
        &self,
        namespace: &str,
        selector: &str,
        timeout: Duration,
        filter: impl Fn(&PodInfo) -> bool,
    ) -> Result<Vec<PodInfo>> {
        let deadline = Instant::now() + timeout;
        loop {
            self.cancel.check()?;
            let pods: Vec<PodInfo> = self
                .client
                .list_pods(namespace, selector)?
                .into_iter()
                .filter(|pod| pod.ready && filter(pod))
                .collect();
            if !pods.is_empty() {
                return Ok(pods);
            }
            if Instant::now() + POLL_INTERVAL >= deadline {
                return Err(Error::cluster(format!(
                    "no ready pods matched {selector:?} in {namespace:?} within {}s",
                    timeout.as_secs()
                ))
                .into());
            }
            debug!(namespace, selector, "waiting for pods");
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    /// Verify the cluster architecture matches the package architecture.
    pub fn check_architecture(&self, package_arch: &str) -> Result<()> {
        let architectures = self.client.node_architectures()?;
        if architectures.is_empty() || architectures.iter().any(|a| a == package_arch) {
            return Ok(());
        }
        Err(Error::validation(format!(
            "package architecture {package_arch:?} does not match cluster nodes {architectures:?}"
        ))
        .into())
    }

    /// Ensure the engine namespace exists with its managed-by label.
    pub fn ensure_zarf_namespace(&self) -> Result<()> {
        let mut labels = BTreeMap::new();
        labels.insert(MANAGED_BY_LABEL.0.to_string(), MANAGED_BY_LABEL.1.to_string());
        self.client.create_namespace(ZARF_NAMESPACE, &labels)
    }

    /// Open a tunnel to the in-cluster registry.
    pub fn registry_tunnel(&self, node_port: u16) -> Result<Box<dyn Tunnel>> {
        info!("opening tunnel to the in-cluster registry");
        self.client
            .open_tunnel(ZARF_NAMESPACE, "zarf-docker-registry", node_port)
    }

    /// Open a tunnel to the in-cluster git server.
    pub fn git_tunnel(&self) -> Result<Box<dyn Tunnel>> {
        info!("opening tunnel to the in-cluster git server");
        self.client.open_tunnel(ZARF_NAMESPACE, "zarf-gitea-http", 3000)
    }

    pub(crate) fn state_guard(&self) -> std::sync::MutexGuard<'_, ()> {
        self.state_lock.lock().expect("state lock poisoned")
    }

    pub fn cancel(&self) -> &CancelToken {
        &self.cancel
    }
}

impl ClusterWaiter for Cluster {
    fn condition_met(&self, wait: &ZarfActionWaitCluster) -> Result<bool> {
        let namespace = if wait.namespace.is_empty() {
            "default"
        } else {
            &wait.namespace
        };
        let condition = if wait.condition.is_empty() {
            "exists"
        } else {
            &wait.condition
        };
        self.client
            .resource_condition(&wait.kind, &wait.name, namespace, condition)
    }
}

/// Distro names treated as appliance mode (the engine deployed the cluster)
pub fn is_appliance_distro(distro: &str) -> bool {
    distro == "k3s"
}

#[cfg(test)]
mod tests {
    use super::fake::FakeClusterClient;
    use super::*;

    #[test]
    fn test_wait_for_healthy_immediate() {
        let client = Arc::new(FakeClusterClient::new());
        let cluster = Cluster::new(client, CancelToken::new());
        cluster.wait_for_healthy(Duration::from_secs(1)).unwrap();
    }

    #[test]
    fn test_wait_for_pods_times_out() {
        let client = Arc::new(FakeClusterClient::new());
        let cluster = Cluster::new(client, CancelToken::new());
        let err = cluster
            .wait_for_pods("demo", "app=missing", Duration::from_millis(10), |_| true)
            .unwrap_err();
        assert!(err.to_string().contains("no ready pods"));
    }

    #[test]
    fn test_wait_for_pods_applies_filter() {
        let client = Arc::new(FakeClusterClient::new());
        client.add_pod("demo", "app=loader", "loader-1", true);
        let cluster = Cluster::new(client, CancelToken::new());

        let pods = cluster
            .wait_for_pods("demo", "app=loader", Duration::from_secs(1), |_| true)
            .unwrap();
        assert_eq!(pods[0].name, "loader-1");

        let err = cluster
            .wait_for_pods("demo", "app=loader", Duration::from_millis(10), |_| false)
            .unwrap_err();
        assert!(err.to_string().contains("no ready pods"));
    }

    #[test]
    fn test_architecture_check() {
        let client = Arc::new(FakeClusterClient::new());
        let cluster = Cluster::new(client, CancelToken::new());
        cluster.check_architecture("amd64").unwrap();
        assert!(cluster.check_architecture("s390x").is_err());
    }

    #[test]
    fn test_appliance_detection() {
        assert!(is_appliance_distro("k3s"));
        assert!(!is_appliance_distro("k3d"));
        assert!(!is_appliance_distro("eks"));
    }
}
