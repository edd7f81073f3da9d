// src/agent/mod.rs

//! Mutating admission agent
//!
//! A small HTTPS server that rewrites workload references at admission time
//! so everything in managed namespaces resolves to the in-cluster mirror.
//! Each endpoint is a mutation variant producing a JSON-Patch list from the
//! shared cluster state; responses follow the AdmissionReview v1 contract.
//! A mutation failure is returned as `allowed=false` and logged, never
//! swallowed.

pub mod pods;
pub mod repos;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

use crate::types::state::ZarfState;

/// Port the agent listens on
pub const AGENT_PORT: u16 = 8443;

/// One JSON-Patch operation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatchOperation {
    pub op: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl PatchOperation {
    pub fn replace(path: impl Into<String>, value: Value) -> Self {
        Self {
            op: "replace".to_string(),
            path: path.into(),
            value: Some(value),
        }
    }

    pub fn add(path: impl Into<String>, value: Value) -> Self {
        Self {
            op: "add".to_string(),
            path: path.into(),
            value: Some(value),
        }
    }
}

/// AdmissionReview v1 request envelope
#[derive(Debug, Clone, Deserialize)]
pub struct AdmissionReview {
    #[serde(rename = "apiVersion", default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    pub request: Option<AdmissionRequest>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdmissionRequest {
    pub uid: String,
    #[serde(default)]
    pub namespace: String,
    pub object: Value,
}

/// AdmissionReview v1 response envelope
#[derive(Debug, Clone, Serialize)]
pub struct AdmissionReviewResponse {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    pub response: AdmissionResponse,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdmissionResponse {
    pub uid: String,
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<AdmissionStatus>,
    #[serde(rename = "patchType", skip_serializing_if = "Option::is_none")]
    pub patch_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdmissionStatus {
    pub message: String,
}

/// Build the allowed response carrying a base64 JSON-Patch.
pub fn patch_response(uid: &str, patches: &[PatchOperation]) -> Result<AdmissionReviewResponse> {
    let body = serde_json::to_vec(patches).context("Failed to encode JSON patch")?;
    Ok(AdmissionReviewResponse {
        api_version: "admission.k8s.io/v1".to_string(),
        kind: "AdmissionReview".to_string(),
        response: AdmissionResponse {
            uid: uid.to_string(),
            allowed: true,
            status: None,
            patch_type: Some("JSONPatch".to_string()),
            patch: Some(BASE64.encode(body)),
        },
    })
}

fn denied_response(uid: &str, message: String) -> AdmissionReviewResponse {
    AdmissionReviewResponse {
        api_version: "admission.k8s.io/v1".to_string(),
        kind: "AdmissionReview".to_string(),
        response: AdmissionResponse {
            uid: uid.to_string(),
            allowed: false,
            status: Some(AdmissionStatus { message }),
            patch_type: None,
            patch: None,
        },
    }
}

/// The mutation variants the agent serves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    Pod,
    FluxGitRepository,
    FluxHelmRepository,
    ArgoApplication,
    ArgoRepository,
}

impl Mutation {
    /// Produce the JSON-Patch for one admission request.
    pub fn mutate(
        &self,
        state: &ZarfState,
        request: &AdmissionRequest,
    ) -> Result<Vec<PatchOperation>> {
        match self {
            Self::Pod => pods::mutate_pod(state, &request.object),
            Self::FluxGitRepository => repos::mutate_flux_git_repository(state, &request.object),
            Self::FluxHelmRepository => repos::mutate_flux_helm_repository(state, &request.object),
            Self::ArgoApplication => repos::mutate_argo_application(state, &request.object),
            Self::ArgoRepository => repos::mutate_argo_repository(state, &request.object),
        }
    }
}

/// Handle one review: mutate, or deny with the error message.
pub fn handle_review(
    state: &ZarfState,
    mutation: Mutation,
    review: &AdmissionReview,
) -> AdmissionReviewResponse {
    let Some(request) = &review.request else {
        return denied_response("", "admission review carried no request".to_string());
    };
    match mutation.mutate(state, request) {
        Ok(patches) => match patch_response(&request.uid, &patches) {
            Ok(response) => response,
            Err(err) => {
                error!("failed to encode patch: {err:#}");
                denied_response(&request.uid, format!("{err:#}"))
            }
        },
        Err(err) => {
            error!(mutation = ?mutation, "mutation failed: {err:#}");
            denied_response(&request.uid, format!("{err:#}"))
        }
    }
}

async fn mutate_handler(
    State(shared): State<Arc<ZarfState>>,
    mutation: Mutation,
    Json(review): Json<AdmissionReview>,
) -> Json<AdmissionReviewResponse> {
    Json(handle_review(&shared, mutation, &review))
}

/// Build the agent router over shared cluster state.
pub fn router(state: Arc<ZarfState>) -> Router {
    Router::new()
        .route(
            "/mutate/pod",
            post(|state: State<Arc<ZarfState>>, body: Json<AdmissionReview>| {
                mutate_handler(state, Mutation::Pod, body)
            }),
        )
        .route(
            "/mutate/flux-gitrepo",
            post(|state: State<Arc<ZarfState>>, body: Json<AdmissionReview>| {
                mutate_handler(state, Mutation::FluxGitRepository, body)
            }),
        )
        .route(
            "/mutate/flux-helmrepo",
            post(|state: State<Arc<ZarfState>>, body: Json<AdmissionReview>| {
                mutate_handler(state, Mutation::FluxHelmRepository, body)
            }),
        )
        .route(
            "/mutate/argocd-application",
            post(|state: State<Arc<ZarfState>>, body: Json<AdmissionReview>| {
                mutate_handler(state, Mutation::ArgoApplication, body)
            }),
        )
        .route(
            "/mutate/argocd-repository",
            post(|state: State<Arc<ZarfState>>, body: Json<AdmissionReview>| {
                mutate_handler(state, Mutation::ArgoRepository, body)
            }),
        )
        .with_state(state)
}

/// Serve the agent over TLS using the certificate material from the state
/// secret. Runs until cancelled by the process.
pub async fn serve(state: ZarfState) -> Result<()> {
    let tls = &state.agent_tls;
    if tls.is_empty() {
        anyhow::bail!("agent TLS material is missing from the cluster state");
    }
    let config = axum_server::tls_rustls::RustlsConfig::from_pem(
        tls.cert.clone().into_bytes(),
        tls.key.clone().into_bytes(),
    )
    .await
    .context("Failed to load agent TLS certificate")?;

    let addr = SocketAddr::from(([0, 0, 0, 0], AGENT_PORT));
    info!(%addr, "admission agent listening");
    let app = router(Arc::new(state));
    axum_server::bind_rustls(addr, config)
        .serve(app.into_make_service())
        .await
        .context("agent server failed")
}
