// src/agent/repos.rs

//! Flux and Argo CD source rewrites
//!
//! GitOps controllers hold their own references to the outside world; these
//! mutations point them at the mirror git server and the replicated
//! credentials secret instead.

use anyhow::Result;
use serde_json::{json, Value};

use crate::agent::PatchOperation;
use crate::cluster::GIT_SECRET_NAME;
use crate::error::Error;
use crate::transform;
use crate::types::state::ZarfState;

/// Rewrite a Flux GitRepository: `spec.url` onto the mirror, credentials to
/// the replicated secret.
pub fn mutate_flux_git_repository(state: &ZarfState, object: &Value) -> Result<Vec<PatchOperation>> {
    let url = spec_url(object)?;
    let mirrored = mirror_git_url(state, url)?;

    Ok(vec![
        PatchOperation::replace("/spec/url", Value::from(mirrored)),
        PatchOperation::replace("/spec/secretRef", json!({ "name": GIT_SECRET_NAME })),
    ])
}

/// Rewrite a Flux HelmRepository onto the mirror git server's OCI endpoint.
pub fn mutate_flux_helm_repository(
    state: &ZarfState,
    object: &Value,
) -> Result<Vec<PatchOperation>> {
    let url = spec_url(object)?;
    // only OCI helm repositories are mirrored; classic index repos are
    // packaged into the deployed charts instead
    if object["spec"]["type"].as_str() != Some("oci") {
        return Ok(Vec::new());
    }
    let reference = url.trim_start_matches("oci://");
    let mirrored = transform::image_transform_host_without_checksum(
        &state.registry_info.address,
        reference,
    )?;
    Ok(vec![
        PatchOperation::replace("/spec/url", Value::from(format!("oci://{mirrored}"))),
        PatchOperation::replace("/spec/secretRef", json!({ "name": GIT_SECRET_NAME })),
    ])
}

/// Rewrite an Argo CD Application's repo sources.
pub fn mutate_argo_application(state: &ZarfState, object: &Value) -> Result<Vec<PatchOperation>> {
    let mut patches = Vec::new();

    if let Some(url) = object["spec"]["source"]["repoURL"].as_str() {
        let mirrored = mirror_git_url(state, url)?;
        patches.push(PatchOperation::replace(
            "/spec/source/repoURL",
            Value::from(mirrored),
        ));
    }

    if let Some(sources) = object["spec"]["sources"].as_array() {
        for (index, source) in sources.iter().enumerate() {
            if let Some(url) = source["repoURL"].as_str() {
                let mirrored = mirror_git_url(state, url)?;
                patches.push(PatchOperation::replace(
                    format!("/spec/sources/{index}/repoURL"),
                    Value::from(mirrored),
                ));
            }
        }
    }

    if patches.is_empty() {
        return Err(Error::validation("application has no repoURL to rewrite").into());
    }
    Ok(patches)
}

/// Rewrite an Argo CD repository secret: url plus mirror credentials.
pub fn mutate_argo_repository(state: &ZarfState, object: &Value) -> Result<Vec<PatchOperation>> {
    let url = object["stringData"]["url"]
        .as_str()
        .ok_or_else(|| Error::validation("repository secret has no stringData.url"))?;
    let mirrored = mirror_git_url(state, url)?;

    Ok(vec![
        PatchOperation::replace("/stringData/url", Value::from(mirrored)),
        PatchOperation::replace(
            "/stringData/username",
            Value::from(state.git_server.pull_username.clone()),
        ),
        PatchOperation::replace(
            "/stringData/password",
            Value::from(state.git_server.pull_password.clone()),
        ),
    ])
}

fn spec_url(object: &Value) -> Result<&str> {
    object["spec"]["url"]
        .as_str()
        .ok_or_else(|| Error::validation("object has no spec.url to rewrite").into())
}

fn mirror_git_url(state: &ZarfState, url: &str) -> Result<String> {
    transform::git_url(
        &state.git_server.address,
        url,
        &state.git_server.push_username,
    )
    .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_fixture() -> ZarfState {
        let mut state = ZarfState::default();
        state.registry_info.fill_in_empty_values();
        state.git_server.fill_in_empty_values();
        state
    }

    #[test]
    fn test_flux_git_repository_rewrite() {
        let state = state_fixture();
        let object = json!({
            "spec": {"url": "https://github.com/stefanprodan/podinfo.git"}
        });
        let patches = mutate_flux_git_repository(&state, &object).unwrap();
        assert_eq!(patches.len(), 2);
        let url = patches[0].value.as_ref().unwrap().as_str().unwrap();
        assert!(url.starts_with(&state.git_server.address));
        assert!(url.contains("/zarf-git-user/podinfo-"));
        assert_eq!(
            patches[1].value,
            Some(json!({"name": "private-git-server"}))
        );
    }

    #[test]
    fn test_flux_helm_repository_non_oci_untouched() {
        let state = state_fixture();
        let object = json!({
            "spec": {"url": "https://stefanprodan.github.io/podinfo"}
        });
        assert!(mutate_flux_helm_repository(&state, &object)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_flux_helm_repository_oci_rewrite() {
        let state = state_fixture();
        let object = json!({
            "spec": {"type": "oci", "url": "oci://ghcr.io/stefanprodan/charts"}
        });
        let patches = mutate_flux_helm_repository(&state, &object).unwrap();
        let url = patches[0].value.as_ref().unwrap().as_str().unwrap();
        assert!(url.starts_with("oci://127.0.0.1:31999/"));
    }

    #[test]
    fn test_argo_application_single_and_multi_source() {
        let state = state_fixture();
        let object = json!({
            "spec": {
                "source": {"repoURL": "https://github.com/org/app.git"},
                "sources": [
                    {"repoURL": "https://github.com/org/lib.git"},
                ]
            }
        });
        let patches = mutate_argo_application(&state, &object).unwrap();
        assert_eq!(patches.len(), 2);
        assert_eq!(patches[0].path, "/spec/source/repoURL");
        assert_eq!(patches[1].path, "/spec/sources/0/repoURL");
    }

    #[test]
    fn test_argo_repository_credentials() {
        let state = state_fixture();
        let object = json!({
            "stringData": {"url": "https://github.com/org/app.git"}
        });
        let patches = mutate_argo_repository(&state, &object).unwrap();
        assert_eq!(patches.len(), 3);
        assert_eq!(
            patches[1].value,
            Some(Value::from(state.git_server.pull_username.clone()))
        );
    }

    #[test]
    fn test_missing_url_is_an_error() {
        let state = state_fixture();
        assert!(mutate_flux_git_repository(&state, &json!({"spec": {}})).is_err());
        assert!(mutate_argo_repository(&state, &json!({})).is_err());
    }
}
