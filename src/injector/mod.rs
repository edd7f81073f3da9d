// src/injector/mod.rs

//! Registry bootstrap ("the injector")
//!
//! An empty cluster has no way to pull the registry image, so the injector
//! smuggles one in through the API server: the seed payload is split into
//! ConfigMap-sized chunks, a minimal pod reassembles them in name-sorted
//! order, verifies the SHA-256, and serves the seed image over a NodePort
//! until the real registry chart is up and seeded. Appliance clusters (k3s)
//! skip all of this and import the image on the host directly.
//!
//! Bootstrap walks a fixed ladder of states; any failure before `Seeded`
//! retries the whole injection, failures after only retry cleanup.

use anyhow::{Context, Result};
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info, warn};

use crate::cluster::{Cluster, DEFAULT_POD_WAIT, ZARF_NAMESPACE};
use crate::error::Error;
use crate::hash::sha256_of_file;
use crate::layout::ComponentPaths;
use crate::retry;
use crate::types::state::ZarfState;

/// Raw bytes per ConfigMap chunk. etcd caps objects at ~1MiB and base64
/// inflates by 4/3, so 512KiB raw leaves headroom for metadata.
pub const CHUNK_SIZE: usize = 512 * 1024;

/// Label selecting every injector payload ConfigMap
pub const PAYLOAD_LABEL: (&str, &str) = ("zarf-injector", "payload");

/// NodePort the bootstrap pod serves the seed image on
pub const INJECTOR_NODE_PORT: u16 = 31999;

/// Name of the bootstrap pod and its service
pub const INJECTOR_NAME: &str = "injector";

/// Image path of the seed registry within the mirror
pub const SEED_IMAGE_PATH: &str = "library/registry:2.8.3";

/// Payload tarball the component ships (injector binary + seed image)
pub const PAYLOAD_TAR: &str = "payload.tgz";

/// Bootstrap ladder
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BootstrapState {
    Absent,
    ChunksUploading,
    InjectorRunning,
    RegistryHealthy,
    Seeded,
    CleaningUp,
    Initialized,
}

impl fmt::Display for BootstrapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Absent => "absent",
            Self::ChunksUploading => "chunks-uploading",
            Self::InjectorRunning => "injector-running",
            Self::RegistryHealthy => "registry-healthy",
            Self::Seeded => "seeded",
            Self::CleaningUp => "cleaning-up",
            Self::Initialized => "initialized",
        };
        write!(f, "{name}")
    }
}

/// Seed image reference inside the mirror, used for `###ZARF_SEED_IMAGE###`.
pub fn seed_image_reference(state: &ZarfState) -> String {
    format!("{}/{}", state.registry_info.address, SEED_IMAGE_PATH)
}

/// Split a payload into ConfigMap-sized chunks. Chunk names sort in upload
/// order so the bootstrap pod can concatenate by name.
pub fn chunk_payload(payload: &[u8]) -> Vec<(String, Vec<u8>)> {
    payload
        .chunks(CHUNK_SIZE)
        .enumerate()
        .map(|(idx, chunk)| (format!("zarf-payload-{idx:03}"), chunk.to_vec()))
        .collect()
}

/// Run the whole injection against a cluster with no pull path. Retries the
/// full ladder on failure since no stage before `Seeded` is durable.
pub fn run_injection(
    cluster: &Cluster,
    component_paths: &ComponentPaths,
    state: &ZarfState,
) -> Result<()> {
    let distro = cluster.client().detect_distro()?;
    if crate::cluster::is_appliance_distro(&distro) {
        info!(distro = %distro, "appliance cluster, importing the seed image on the host");
        return host_import_seed(component_paths);
    }

    let mut bootstrap = BootstrapState::Absent;
    info!(state = %bootstrap, "starting registry bootstrap");

    retry::with_retry("registry injection", cluster.cancel(), || {
        // a failed attempt leaves partial chunks behind; start clean
        cleanup(cluster)?;

        bootstrap = BootstrapState::ChunksUploading;
        debug!(state = %bootstrap, "uploading payload chunks");
        let payload_sha = upload_payload(cluster, component_paths)?;

        bootstrap = BootstrapState::InjectorRunning;
        debug!(state = %bootstrap, "creating the bootstrap pod and service");
        create_injector_pod(cluster, &payload_sha)?;
        create_injector_service(cluster)?;

        cluster.wait_for_pods(
            ZARF_NAMESPACE,
            &format!("app={INJECTOR_NAME}"),
            DEFAULT_POD_WAIT,
            |_| true,
        )?;

        bootstrap = BootstrapState::RegistryHealthy;
        info!(state = %bootstrap, "seed registry is serving");
        Ok(())
    })?;

    info!(seed = %seed_image_reference(state), "seed image available to the registry chart");
    Ok(())
}

/// After the real registry chart is installed and seeded, tear the
/// bootstrap machinery down and persist the state, completing init.
/// Cleanup failures past `Seeded` never rerun the injection.
pub fn finish_seeding(cluster: &Cluster, state: &mut ZarfState) -> Result<()> {
    let mut bootstrap = BootstrapState::Seeded;
    info!(state = %bootstrap, "registry seeded");

    bootstrap = BootstrapState::CleaningUp;
    debug!(state = %bootstrap, "removing bootstrap resources");
    if let Err(err) = retry::with_retry("injector cleanup", cluster.cancel(), || cleanup(cluster))
    {
        warn!("bootstrap cleanup incomplete, leftover resources carry the injector label: {err:#}");
    }

    cluster.save_state(state)?;
    bootstrap = BootstrapState::Initialized;
    info!(state = %bootstrap, "cluster bootstrap complete");
    Ok(())
}

/// Upload the payload tarball as labelled ConfigMap chunks, returning its
/// SHA-256 for the pod to verify after reassembly.
fn upload_payload(cluster: &Cluster, component_paths: &ComponentPaths) -> Result<String> {
    let payload_path = component_paths.files.join(PAYLOAD_TAR);
    let payload = std::fs::read(&payload_path).with_context(|| {
        format!(
            "injector component is missing its payload: {}",
            payload_path.display()
        )
    })?;
    let payload_sha = sha256_of_file(&payload_path)?;

    let labels: BTreeMap<String, String> = [
        (PAYLOAD_LABEL.0.to_string(), PAYLOAD_LABEL.1.to_string()),
    ]
    .into_iter()
    .collect();

    let chunks = chunk_payload(&payload);
    info!(chunks = chunks.len(), sha = %payload_sha, "uploading injector payload");
    for (name, chunk) in chunks {
        cluster.cancel().check()?;
        let mut data = BTreeMap::new();
        data.insert("payload".to_string(), chunk);
        cluster
            .client()
            .upsert_configmap(ZARF_NAMESPACE, &name, &labels, &data)
            .with_context(|| format!("Failed to upload payload chunk {name}"))?;
    }
    Ok(payload_sha)
}

/// The bootstrap pod: a pause container plus the injector binary, which
/// concatenates the name-sorted chunks, verifies the SHA, and serves the
/// seed image over HTTP.
fn create_injector_pod(cluster: &Cluster, payload_sha: &str) -> Result<()> {
    let pod = json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {
            "name": INJECTOR_NAME,
            "namespace": ZARF_NAMESPACE,
            "labels": {
                "app": INJECTOR_NAME,
                PAYLOAD_LABEL.0: PAYLOAD_LABEL.1,
            },
        },
        "spec": {
            "restartPolicy": "Never",
            "containers": [{
                "name": INJECTOR_NAME,
                "image": "registry.k8s.io/pause:3.9",
                "workingDir": "/zarf-init",
                "command": ["/zarf-init/zarf-injector", payload_sha],
                "ports": [{"containerPort": 5000}],
                "readinessProbe": {
                    "httpGet": {"path": "/v2/", "port": 5000},
                    "periodSeconds": 2,
                },
                "resources": {
                    "requests": {"cpu": "500m", "memory": "256Mi"},
                    "limits": {"cpu": "1", "memory": "256Mi"},
                },
            }],
        },
    });
    cluster
        .client()
        .apply_resource(&pod)
        .context("Failed to create the bootstrap pod")
}

fn create_injector_service(cluster: &Cluster) -> Result<()> {
    let service = json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": {
            "name": INJECTOR_NAME,
            "namespace": ZARF_NAMESPACE,
            "labels": { PAYLOAD_LABEL.0: PAYLOAD_LABEL.1 },
        },
        "spec": {
            "type": "NodePort",
            "selector": {"app": INJECTOR_NAME},
            "ports": [{
                "port": 5000,
                "nodePort": INJECTOR_NODE_PORT,
            }],
        },
    });
    cluster
        .client()
        .apply_resource(&service)
        .context("Failed to create the bootstrap service")
}

/// Delete every bootstrap resource; idempotent.
fn cleanup(cluster: &Cluster) -> Result<()> {
    let client = cluster.client();
    client.delete_resource("Pod", ZARF_NAMESPACE, INJECTOR_NAME)?;
    client.delete_resource("Service", ZARF_NAMESPACE, INJECTOR_NAME)?;
    client.delete_configmaps_with_label(ZARF_NAMESPACE, PAYLOAD_LABEL.0, PAYLOAD_LABEL.1)?;
    Ok(())
}

/// Appliance path: the cluster shares our host, so containerd can import
/// the seed image without any network at all.
fn host_import_seed(component_paths: &ComponentPaths) -> Result<()> {
    let seed_tar = component_paths.files.join("seed-image.tar");
    if !seed_tar.exists() {
        return Err(Error::resource(format!(
            "appliance seed image not found at {}",
            seed_tar.display()
        ))
        .into());
    }
    let output = std::process::Command::new("ctr")
        .args(["--namespace", "k8s.io", "images", "import"])
        .arg(&seed_tar)
        .output()
        .map_err(|err| Error::resource(format!("failed to run ctr: {err}")))?;
    if !output.status.success() {
        return Err(Error::resource(format!(
            "ctr images import failed: {}",
            String::from_utf8_lossy(&output.stderr)
        ))
        .into());
    }
    info!("seed image imported into containerd");
    Ok(())
}
