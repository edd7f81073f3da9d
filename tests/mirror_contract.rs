// tests/mirror_contract.rs

//! The mirror rewrite contract shared by the deployer and the admission
//! agent: reference transforms and the pod mutation wire format.

use serde_json::json;
use zarf::agent::{handle_review, AdmissionRequest, AdmissionReview, Mutation, PatchOperation};
use zarf::transform;
use zarf::types::state::ZarfState;

const MIRROR: &str = "127.0.0.1:31999";

#[test]
fn tagged_image_gains_crc_suffix() {
    let out = transform::image_transform_host(MIRROR, "docker.io/library/nginx:1.25").unwrap();
    let crc = crc32fast::hash(b"docker.io/library/nginx");
    assert_eq!(out, format!("{MIRROR}/library/nginx:1.25-zarf-{crc}"));
}

#[test]
fn digest_image_keeps_digest_untouched() {
    let out = transform::image_transform_host(MIRROR, "nginx@sha256:abcd").unwrap();
    assert_eq!(out, format!("{MIRROR}/library/nginx@sha256:abcd"));
}

#[test]
fn transform_untransform_is_identity_for_tag_refs() {
    for original in [
        "docker.io/library/nginx:1.25",
        "docker.io/team/app:v2",
        "docker.io/library/redis:latest",
    ] {
        let mirrored = transform::image_transform_host(MIRROR, original).unwrap();
        let back = transform::image_untransform_host(MIRROR, &mirrored).unwrap();
        assert_eq!(back, original);
    }
}

#[test]
fn pod_admission_review_end_to_end() {
    let mut state = ZarfState::default();
    state.registry_info.fill_in_empty_values();

    let review = AdmissionReview {
        api_version: "admission.k8s.io/v1".to_string(),
        kind: "AdmissionReview".to_string(),
        request: Some(AdmissionRequest {
            uid: "e2e-uid".to_string(),
            namespace: "default".to_string(),
            object: json!({
                "metadata": {"labels": {}},
                "spec": {"containers": [{"image": "nginx"}]}
            }),
        }),
    };

    let response = handle_review(&state, Mutation::Pod, &review);
    assert!(response.response.allowed);
    assert_eq!(response.response.uid, "e2e-uid");

    use base64::Engine;
    let patch_bytes = base64::engine::general_purpose::STANDARD
        .decode(response.response.patch.unwrap())
        .unwrap();
    let patches: Vec<PatchOperation> = serde_json::from_slice(&patch_bytes).unwrap();

    assert_eq!(patches[0].path, "/spec/containers/0/image");
    assert_eq!(
        patches[0].value,
        Some(json!("127.0.0.1:31999/library/nginx:latest-zarf-3793515731"))
    );
    assert_eq!(patches[1].path, "/spec/imagePullSecrets");
    assert_eq!(patches[1].value, Some(json!([{"name": "private-registry"}])));
    assert_eq!(patches[2].path, "/metadata/labels/zarf-agent");
    assert_eq!(patches[2].value, Some(json!("patched")));
}

#[test]
fn patched_pod_is_never_mutated_again() {
    let mut state = ZarfState::default();
    state.registry_info.fill_in_empty_values();

    let review = AdmissionReview {
        api_version: "admission.k8s.io/v1".to_string(),
        kind: "AdmissionReview".to_string(),
        request: Some(AdmissionRequest {
            uid: "uid".to_string(),
            namespace: "default".to_string(),
            object: json!({
                "metadata": {"labels": {"zarf-agent": "patched"}},
                "spec": {"containers": [{"image": "nginx"}]}
            }),
        }),
    };

    let response = handle_review(&state, Mutation::Pod, &review);
    assert!(response.response.allowed);
    use base64::Engine;
    let patch_bytes = base64::engine::general_purpose::STANDARD
        .decode(response.response.patch.unwrap())
        .unwrap();
    let patches: Vec<PatchOperation> = serde_json::from_slice(&patch_bytes).unwrap();
    assert!(patches.is_empty());
}

#[test]
fn git_urls_move_under_the_push_user() {
    let rewritten = transform::git_url(
        "http://zarf-gitea-http.zarf.svc.cluster.local:3000",
        "https://github.com/stefanprodan/podinfo.git",
        "zarf-git-user",
    )
    .unwrap();
    assert!(rewritten
        .starts_with("http://zarf-gitea-http.zarf.svc.cluster.local:3000/zarf-git-user/podinfo-"));

    // the same source always lands on the same mirror name
    let again = transform::git_url(
        "http://zarf-gitea-http.zarf.svc.cluster.local:3000",
        "https://github.com/stefanprodan/podinfo.git",
        "zarf-git-user",
    )
    .unwrap();
    assert_eq!(rewritten, again);
}
