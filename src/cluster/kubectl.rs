// src/cluster/kubectl.rs

//! kubectl-backed cluster client
//!
//! The default [`ClusterClient`] drives `kubectl` as a subprocess: get and
//! apply work over JSON, exec streams stdin through, and tunnels ride
//! `kubectl port-forward`. Anything with a kubeconfig can deploy.

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::io::Write;
use std::net::TcpListener;
use std::process::{Child, Command, Stdio};
use tracing::debug;

use crate::cluster::{ClusterClient, PodInfo, Tunnel};
use crate::error::Error;

#[derive(Debug, Default)]
pub struct KubectlClusterClient;

fn kubectl(args: &[&str]) -> Result<String> {
    debug!(?args, "kubectl");
    let output = Command::new("kubectl")
        .args(args)
        .output()
        .map_err(|err| Error::cluster_unreachable(format!("failed to run kubectl: {err}")))?;
    if !output.status.success() {
        anyhow::bail!(
            "kubectl {} failed: {}",
            args.first().unwrap_or(&""),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

fn kubectl_json(args: &[&str]) -> Result<Value> {
    let stdout = kubectl(args)?;
    serde_json::from_str(&stdout).context("kubectl produced invalid JSON")
}

impl ClusterClient for KubectlClusterClient {
    fn reachable(&self) -> Result<()> {
        kubectl(&["get", "--raw", "/healthz"]).map(|_| ())
    }

    fn detect_distro(&self) -> Result<String> {
        let nodes = kubectl_json(&["get", "nodes", "--output", "json"])?;
        let empty = Vec::new();
        let items = nodes["items"].as_array().unwrap_or(&empty);
        for node in items {
            let runtime = node["status"]["nodeInfo"]["containerRuntimeVersion"]
                .as_str()
                .unwrap_or_default();
            let image = node["status"]["nodeInfo"]["osImage"]
                .as_str()
                .unwrap_or_default()
                .to_lowercase();
            let labels = &node["metadata"]["labels"];

            if runtime.contains("k3s") {
                return Ok(if image.contains("k3d") { "k3d" } else { "k3s" }.to_string());
            }
            if labels["kubernetes.io/hostname"]
                .as_str()
                .map(|h| h.contains("kind"))
                .unwrap_or(false)
            {
                return Ok("kind".to_string());
            }
            if labels["eks.amazonaws.com/nodegroup"].is_string() {
                return Ok("eks".to_string());
            }
            if labels["cloud.google.com/gke-nodepool"].is_string() {
                return Ok("gke".to_string());
            }
            if labels["kubernetes.azure.com/cluster"].is_string() {
                return Ok("aks".to_string());
            }
            if labels["rke2.io/node-name"].is_string() {
                return Ok("rke2".to_string());
            }
            if image.contains("docker desktop") {
                return Ok("docker-desktop".to_string());
            }
        }
        Ok("unknown".to_string())
    }

    fn node_architectures(&self) -> Result<Vec<String>> {
        let nodes = kubectl_json(&["get", "nodes", "--output", "json"])?;
        let mut architectures = Vec::new();
        for node in nodes["items"].as_array().unwrap_or(&Vec::new()) {
            if let Some(arch) = node["status"]["nodeInfo"]["architecture"].as_str() {
                if !architectures.iter().any(|a| a == arch) {
                    architectures.push(arch.to_string());
                }
            }
        }
        Ok(architectures)
    }

    fn default_storage_class(&self) -> Result<String> {
        let classes = kubectl_json(&["get", "storageclasses", "--output", "json"])?;
        for class in classes["items"].as_array().unwrap_or(&Vec::new()) {
            let default = class["metadata"]["annotations"]
                ["storageclass.kubernetes.io/is-default-class"]
                .as_str()
                == Some("true");
            if default {
                if let Some(name) = class["metadata"]["name"].as_str() {
                    return Ok(name.to_string());
                }
            }
        }
        Ok(String::new())
    }

    fn create_namespace(&self, name: &str, labels: &BTreeMap<String, String>) -> Result<()> {
        let namespace = json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": {"name": name, "labels": labels},
        });
        self.apply_resource(&namespace)
    }

    fn namespaces_with_label(&self, key: &str, value: &str) -> Result<Vec<String>> {
        let selector = format!("{key}={value}");
        let namespaces = kubectl_json(&[
            "get",
            "namespaces",
            "--selector",
            &selector,
            "--output",
            "json",
        ])?;
        Ok(namespaces["items"]
            .as_array()
            .unwrap_or(&Vec::new())
            .iter()
            .filter_map(|ns| ns["metadata"]["name"].as_str().map(String::from))
            .collect())
    }

    fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, Vec<u8>>>> {
        let result = kubectl_json(&[
            "get", "secret", name, "--namespace", namespace, "--output", "json",
        ]);
        let secret = match result {
            Ok(secret) => secret,
            Err(err) if err.to_string().contains("NotFound") => return Ok(None),
            Err(err) if err.to_string().contains("not found") => return Ok(None),
            Err(err) => return Err(err),
        };

        let mut data = BTreeMap::new();
        if let Some(entries) = secret["data"].as_object() {
            for (key, value) in entries {
                let decoded = BASE64
                    .decode(value.as_str().unwrap_or_default())
                    .map_err(|_| Error::cluster(format!("secret {name} has invalid base64")))?;
                data.insert(key.clone(), decoded);
            }
        }
        Ok(Some(data))
    }

    fn upsert_secret(
        &self,
        namespace: &str,
        name: &str,
        data: &BTreeMap<String, Vec<u8>>,
        labels: &BTreeMap<String, String>,
    ) -> Result<()> {
        let encoded: BTreeMap<String, String> = data
            .iter()
            .map(|(key, value)| (key.clone(), BASE64.encode(value)))
            .collect();
        let secret = json!({
            "apiVersion": "v1",
            "kind": "Secret",
            "type": "Opaque",
            "metadata": {"name": name, "namespace": namespace, "labels": labels},
            "data": encoded,
        });
        self.apply_resource(&secret)
    }

    fn delete_secret(&self, namespace: &str, name: &str) -> Result<()> {
        self.delete_resource("secret", namespace, name)
    }

    fn list_secret_names(&self, namespace: &str, prefix: &str) -> Result<Vec<String>> {
        let secrets = kubectl_json(&[
            "get", "secrets", "--namespace", namespace, "--output", "json",
        ])?;
        Ok(secrets["items"]
            .as_array()
            .unwrap_or(&Vec::new())
            .iter()
            .filter_map(|secret| secret["metadata"]["name"].as_str())
            .filter(|name| name.starts_with(prefix))
            .map(String::from)
            .collect())
    }

    fn upsert_configmap(
        &self,
        namespace: &str,
        name: &str,
        labels: &BTreeMap<String, String>,
        binary_data: &BTreeMap<String, Vec<u8>>,
    ) -> Result<()> {
        let encoded: BTreeMap<String, String> = binary_data
            .iter()
            .map(|(key, value)| (key.clone(), BASE64.encode(value)))
            .collect();
        let configmap = json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": name, "namespace": namespace, "labels": labels},
            "binaryData": encoded,
        });
        self.apply_resource(&configmap)
    }

    fn delete_configmaps_with_label(&self, namespace: &str, key: &str, value: &str) -> Result<()> {
        let selector = format!("{key}={value}");
        kubectl(&[
            "delete",
            "configmaps",
            "--namespace",
            namespace,
            "--selector",
            &selector,
            "--ignore-not-found",
        ])
        .map(|_| ())
    }

    fn apply_resource(&self, resource: &Value) -> Result<()> {
        let mut child = Command::new("kubectl")
            .args(["apply", "--filename", "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| Error::cluster_unreachable(format!("failed to run kubectl: {err}")))?;
        child
            .stdin
            .take()
            .expect("stdin was piped")
            .write_all(serde_json::to_string(resource)?.as_bytes())?;
        let output = child.wait_with_output()?;
        if !output.status.success() {
            anyhow::bail!(
                "kubectl apply failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }

    fn delete_resource(&self, kind: &str, namespace: &str, name: &str) -> Result<()> {
        kubectl(&[
            "delete",
            kind,
            name,
            "--namespace",
            namespace,
            "--ignore-not-found",
        ])
        .map(|_| ())
    }

    fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<PodInfo>> {
        let pods = kubectl_json(&[
            "get", "pods", "--namespace", namespace, "--selector", selector, "--output", "json",
        ])?;
        Ok(pods["items"]
            .as_array()
            .unwrap_or(&Vec::new())
            .iter()
            .map(|pod| {
                let phase = pod["status"]["phase"].as_str().unwrap_or_default();
                let ready = pod["status"]["containerStatuses"]
                    .as_array()
                    .map(|statuses| {
                        !statuses.is_empty()
                            && statuses.iter().all(|s| s["ready"] == Value::Bool(true))
                    })
                    .unwrap_or(false);
                PodInfo {
                    name: pod["metadata"]["name"].as_str().unwrap_or_default().to_string(),
                    phase: phase.to_string(),
                    ready: ready && phase == "Running",
                    json: pod.clone(),
                }
            })
            .collect())
    }

    fn exec_in_pod(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        command: &[String],
        stdin: Option<&[u8]>,
    ) -> Result<Vec<u8>> {
        let mut kubectl_command = Command::new("kubectl");
        kubectl_command.args(["exec", "--stdin", pod, "--namespace", namespace]);
        if !container.is_empty() {
            kubectl_command.args(["--container", container]);
        }
        kubectl_command.arg("--").args(command);

        let mut child = kubectl_command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| Error::cluster_unreachable(format!("failed to run kubectl: {err}")))?;

        if let Some(payload) = stdin {
            child
                .stdin
                .take()
                .expect("stdin was piped")
                .write_all(payload)?;
        }

        let output = child.wait_with_output()?;
        if !output.status.success() {
            anyhow::bail!(
                "exec into {pod} failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(output.stdout)
    }

    fn open_tunnel(
        &self,
        namespace: &str,
        service: &str,
        remote_port: u16,
    ) -> Result<Box<dyn Tunnel>> {
        // grab a free local port, then hand it to port-forward
        let local_port = TcpListener::bind("127.0.0.1:0")
            .and_then(|listener| listener.local_addr())
            .map(|addr| addr.port())
            .map_err(|err| Error::resource(format!("no free local port: {err}")))?;

        let child = Command::new("kubectl")
            .args([
                "port-forward",
                &format!("service/{service}"),
                &format!("{local_port}:{remote_port}"),
                "--namespace",
                namespace,
            ])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|err| Error::cluster_unreachable(format!("failed to run kubectl: {err}")))?;

        // wait for the forward to come up
        let address = format!("127.0.0.1:{local_port}");
        for _ in 0..50 {
            if std::net::TcpStream::connect(&address).is_ok() {
                return Ok(Box::new(KubectlTunnel {
                    address,
                    child: Some(child),
                }));
            }
            std::thread::sleep(std::time::Duration::from_millis(100));
        }
        Err(Error::cluster(format!(
            "port-forward to {service}:{remote_port} never became ready"
        ))
        .into())
    }

    fn find_connect_service(
        &self,
        name: &str,
    ) -> Result<Option<crate::cluster::ConnectTarget>> {
        let services = kubectl_json(&["get", "services", "--all-namespaces", "--output", "json"])?;
        for service in services["items"].as_array().unwrap_or(&Vec::new()) {
            let annotations = &service["metadata"]["annotations"];
            if annotations["zarf.dev/connect-name"].as_str() != Some(name) {
                continue;
            }
            let port = service["spec"]["ports"][0]["port"].as_u64().unwrap_or(80) as u16;
            return Ok(Some(crate::cluster::ConnectTarget {
                namespace: service["metadata"]["namespace"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string(),
                service: service["metadata"]["name"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string(),
                port,
                url: annotations["zarf.dev/connect-url"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string(),
            }));
        }
        Ok(None)
    }

    fn resource_condition(
        &self,
        kind: &str,
        name: &str,
        namespace: &str,
        condition: &str,
    ) -> Result<bool> {
        if condition == "exists" {
            let result = kubectl(&["get", kind, name, "--namespace", namespace]);
            return Ok(result.is_ok());
        }
        if let Some(jsonpath) = condition.strip_prefix('{') {
            // `{.status.phase}=Running` style conditions
            let (path, expected) = jsonpath
                .split_once("}=")
                .ok_or_else(|| Error::validation(format!("invalid condition {condition:?}")))?;
            let output = kubectl(&[
                "get",
                kind,
                name,
                "--namespace",
                namespace,
                "--output",
                &format!("jsonpath={{{path}}}"),
            ])?;
            return Ok(output.trim() == expected);
        }

        let wait = kubectl(&[
            "wait",
            kind,
            name,
            "--namespace",
            namespace,
            &format!("--for=condition={condition}"),
            "--timeout=1s",
        ]);
        Ok(wait.is_ok())
    }
}

struct KubectlTunnel {
    address: String,
    child: Option<Child>,
}

impl Tunnel for KubectlTunnel {
    fn local_address(&self) -> String {
        self.address.clone()
    }

    fn close(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

impl Drop for KubectlTunnel {
    fn drop(&mut self) {
        self.close();
    }
}
