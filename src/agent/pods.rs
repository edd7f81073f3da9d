// src/agent/pods.rs

//! Pod mutation: image rewrites, pull secret, patched label

use anyhow::Result;
use serde_json::{json, Value};
use tracing::debug;

use crate::agent::PatchOperation;
use crate::cluster::{AGENT_PATCHED_LABEL, AGENT_SKIP_ANNOTATION, IMAGE_PULL_SECRET_NAME};
use crate::error::Error;
use crate::transform;
use crate::types::state::ZarfState;

const CONTAINER_LISTS: [&str; 3] = ["initContainers", "ephemeralContainers", "containers"];

/// Rewrite every image in the pod through the mirror, force the pull
/// secret, and stamp the patched label. Pods already patched or explicitly
/// opted out are left untouched.
pub fn mutate_pod(state: &ZarfState, pod: &Value) -> Result<Vec<PatchOperation>> {
    if should_skip(pod) {
        debug!("pod is already patched or opted out, skipping");
        return Ok(Vec::new());
    }

    let registry = &state.registry_info.address;
    let mut patches = Vec::new();

    for list in CONTAINER_LISTS {
        let Some(containers) = pod["spec"][list].as_array() else {
            continue;
        };
        for (index, container) in containers.iter().enumerate() {
            let image = container["image"].as_str().ok_or_else(|| {
                Error::validation(format!("container {index} in {list} has no string image"))
            })?;
            let target = transform::image_transform_host(registry, image)?;
            if target != image {
                patches.push(PatchOperation::replace(
                    format!("/spec/{list}/{index}/image"),
                    Value::from(target),
                ));
            }
        }
    }

    patches.push(PatchOperation::replace(
        "/spec/imagePullSecrets",
        json!([{ "name": IMAGE_PULL_SECRET_NAME }]),
    ));

    if pod["metadata"]["labels"].is_object() {
        patches.push(PatchOperation::add(
            format!("/metadata/labels/{}", AGENT_PATCHED_LABEL.0),
            Value::from(AGENT_PATCHED_LABEL.1),
        ));
    } else {
        patches.push(PatchOperation::add(
            "/metadata/labels",
            json!({ AGENT_PATCHED_LABEL.0: AGENT_PATCHED_LABEL.1 }),
        ));
    }

    Ok(patches)
}

fn should_skip(pod: &Value) -> bool {
    if pod["metadata"]["labels"][AGENT_PATCHED_LABEL.0] == Value::from(AGENT_PATCHED_LABEL.1) {
        return true;
    }
    matches!(
        pod["metadata"]["annotations"][AGENT_SKIP_ANNOTATION].as_str(),
        Some("skip") | Some("ignore")
    ) || matches!(
        pod["metadata"]["labels"][AGENT_SKIP_ANNOTATION].as_str(),
        Some("skip") | Some("ignore")
    )
}
