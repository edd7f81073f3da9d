// src/cluster/fake.rs

//! In-memory cluster client for unit tests

use anyhow::Result;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::cluster::{ClusterClient, PodInfo, Tunnel};

type SecretKey = (String, String);

#[derive(Default)]
pub struct FakeClusterClient {
    pub secrets: Mutex<BTreeMap<SecretKey, BTreeMap<String, Vec<u8>>>>,
    pub configmaps: Mutex<BTreeMap<SecretKey, BTreeMap<String, Vec<u8>>>>,
    /// (namespace, managed) pairs
    pub namespaces: Mutex<BTreeMap<String, bool>>,
    /// (namespace, selector) -> pods
    pub pods: Mutex<BTreeMap<SecretKey, Vec<PodInfo>>>,
    pub applied: Mutex<Vec<Value>>,
    pub deleted: Mutex<Vec<(String, String, String)>>,
    pub execs: Mutex<Vec<(String, String, Vec<String>)>>,
    pub distro: Mutex<String>,
}

impl FakeClusterClient {
    pub fn new() -> Self {
        Self {
            distro: Mutex::new("kind".to_string()),
            ..Default::default()
        }
    }

    pub fn add_namespace(&self, name: &str, managed: bool) {
        self.namespaces
            .lock()
            .unwrap()
            .insert(name.to_string(), managed);
    }

    pub fn add_pod(&self, namespace: &str, selector: &str, name: &str, ready: bool) {
        self.pods
            .lock()
            .unwrap()
            .entry((namespace.to_string(), selector.to_string()))
            .or_default()
            .push(PodInfo {
                name: name.to_string(),
                phase: if ready { "Running" } else { "Pending" }.to_string(),
                ready,
                json: serde_json::json!({"metadata": {"name": name}}),
            });
    }

    pub fn set_distro(&self, distro: &str) {
        *self.distro.lock().unwrap() = distro.to_string();
    }
}

pub struct FakeTunnel {
    pub address: String,
}

impl Tunnel for FakeTunnel {
    fn local_address(&self) -> String {
        self.address.clone()
    }

    fn close(&mut self) {}
}

impl ClusterClient for FakeClusterClient {
    fn reachable(&self) -> Result<()> {
        Ok(())
    }

    fn detect_distro(&self) -> Result<String> {
        Ok(self.distro.lock().unwrap().clone())
    }

    fn node_architectures(&self) -> Result<Vec<String>> {
        Ok(vec!["amd64".to_string()])
    }

    fn default_storage_class(&self) -> Result<String> {
        Ok("local-path".to_string())
    }

    fn create_namespace(&self, name: &str, labels: &BTreeMap<String, String>) -> Result<()> {
        let managed = labels
            .get(crate::cluster::MANAGED_BY_LABEL.0)
            .map(|v| v == crate::cluster::MANAGED_BY_LABEL.1)
            .unwrap_or(false);
        self.add_namespace(name, managed);
        Ok(())
    }

    fn namespaces_with_label(&self, _key: &str, _value: &str) -> Result<Vec<String>> {
        Ok(self
            .namespaces
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, managed)| **managed)
            .map(|(name, _)| name.clone())
            .collect())
    }

    fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, Vec<u8>>>> {
        Ok(self
            .secrets
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    fn upsert_secret(
        &self,
        namespace: &str,
        name: &str,
        data: &BTreeMap<String, Vec<u8>>,
        _labels: &BTreeMap<String, String>,
    ) -> Result<()> {
        self.secrets
            .lock()
            .unwrap()
            .insert((namespace.to_string(), name.to_string()), data.clone());
        Ok(())
    }

    fn delete_secret(&self, namespace: &str, name: &str) -> Result<()> {
        self.secrets
            .lock()
            .unwrap()
            .remove(&(namespace.to_string(), name.to_string()));
        Ok(())
    }

    fn list_secret_names(&self, namespace: &str, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .secrets
            .lock()
            .unwrap()
            .keys()
            .filter(|(ns, name)| ns == namespace && name.starts_with(prefix))
            .map(|(_, name)| name.clone())
            .collect())
    }

    fn upsert_configmap(
        &self,
        namespace: &str,
        name: &str,
        _labels: &BTreeMap<String, String>,
        binary_data: &BTreeMap<String, Vec<u8>>,
    ) -> Result<()> {
        self.configmaps
            .lock()
            .unwrap()
            .insert((namespace.to_string(), name.to_string()), binary_data.clone());
        Ok(())
    }

    fn delete_configmaps_with_label(&self, namespace: &str, _key: &str, _value: &str) -> Result<()> {
        self.configmaps
            .lock()
            .unwrap()
            .retain(|(ns, _), _| ns != namespace);
        Ok(())
    }

    fn apply_resource(&self, resource: &Value) -> Result<()> {
        self.applied.lock().unwrap().push(resource.clone());
        Ok(())
    }

    fn delete_resource(&self, kind: &str, namespace: &str, name: &str) -> Result<()> {
        self.deleted.lock().unwrap().push((
            kind.to_string(),
            namespace.to_string(),
            name.to_string(),
        ));
        Ok(())
    }

    fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<PodInfo>> {
        Ok(self
            .pods
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), selector.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    fn exec_in_pod(
        &self,
        namespace: &str,
        pod: &str,
        _container: &str,
        command: &[String],
        _stdin: Option<&[u8]>,
    ) -> Result<Vec<u8>> {
        self.execs.lock().unwrap().push((
            namespace.to_string(),
            pod.to_string(),
            command.to_vec(),
        ));
        Ok(Vec::new())
    }

    fn open_tunnel(
        &self,
        _namespace: &str,
        _service: &str,
        remote_port: u16,
    ) -> Result<Box<dyn Tunnel>> {
        Ok(Box::new(FakeTunnel {
            address: format!("127.0.0.1:{remote_port}"),
        }))
    }

    fn resource_condition(
        &self,
        _kind: &str,
        _name: &str,
        _namespace: &str,
        _condition: &str,
    ) -> Result<bool> {
        Ok(true)
    }
}
