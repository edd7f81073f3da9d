// src/oci/mod.rs

//! Package transport over the OCI distribution API
//!
//! A package is published as an OCI artifact: every file in the layout is a
//! layer whose `org.opencontainers.image.title` annotation is the relative
//! path. The preferred manifest shape is the artifact manifest; registries
//! that reject it get an image manifest with a synthetic config blob.
//! Skeleton packages (composition-only manifests) are published under a
//! `<version>-skeleton` tag so other packages can import them.

pub mod publish;
pub mod pull;

use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::error::Error as EngineError;

/// Artifact type identifying a package manifest
pub const PACKAGE_ARTIFACT_TYPE: &str = "application/vnd.zarf.package.v1+json";

/// Media type of every package layer
pub const LAYER_MEDIA_TYPE: &str = "application/vnd.zarf.layer.v1.blob";

/// Media type of the synthetic config used in the image-manifest fallback
pub const CONFIG_MEDIA_TYPE: &str = "application/vnd.zarf.config.v1+json";

pub const ARTIFACT_MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.artifact.manifest.v1+json";
pub const IMAGE_MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";

/// Annotation key carrying a layer's relative path
pub const TITLE_ANNOTATION: &str = "org.opencontainers.image.title";
pub const DESCRIPTION_ANNOTATION: &str = "org.opencontainers.image.description";

pub const PACKAGE_NAME_ANNOTATION: &str = "org.zarf.package.name";
pub const PACKAGE_VERSION_ANNOTATION: &str = "org.zarf.package.version";
pub const PACKAGE_ARCH_ANNOTATION: &str = "org.zarf.package.architecture";

/// Architecture recorded for composition-only packages
pub const SKELETON_ARCH: &str = "skeleton";

#[derive(Error, Debug)]
pub enum OciError {
    #[error("invalid OCI reference {0:?}")]
    InvalidReference(String),

    #[error("registry returned {status} for {url}")]
    UnexpectedStatus { status: StatusCode, url: String },

    #[error("digest mismatch for {digest}: got {actual}")]
    DigestMismatch { digest: String, actual: String },
}

/// A parsed `oci://` package reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub registry: String,
    pub repository: String,
    pub tag: String,
}

impl Reference {
    /// Parse `oci://registry/repo[:tag]`.
    pub fn parse(raw: &str) -> Result<Self, OciError> {
        let stripped = raw
            .strip_prefix("oci://")
            .ok_or_else(|| OciError::InvalidReference(raw.to_string()))?;
        let (registry, rest) = stripped
            .split_once('/')
            .ok_or_else(|| OciError::InvalidReference(raw.to_string()))?;
        if registry.is_empty() || rest.is_empty() {
            return Err(OciError::InvalidReference(raw.to_string()));
        }
        let (repository, tag) = match rest.rsplit_once(':') {
            Some((repo, tag)) if !tag.contains('/') => (repo.to_string(), tag.to_string()),
            _ => (rest.to_string(), String::new()),
        };
        Ok(Self {
            registry: registry.to_string(),
            repository,
            tag,
        })
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    pub fn to_url(&self) -> String {
        if self.tag.is_empty() {
            format!("oci://{}/{}", self.registry, self.repository)
        } else {
            format!("oci://{}/{}:{}", self.registry, self.repository, self.tag)
        }
    }
}

/// Content descriptor shared by both manifest shapes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Descriptor {
    #[serde(rename = "mediaType")]
    pub media_type: String,

    pub digest: String,

    pub size: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

impl Descriptor {
    pub fn title(&self) -> Option<&str> {
        self.annotations
            .as_ref()
            .and_then(|a| a.get(TITLE_ANNOTATION))
            .map(String::as_str)
    }
}

/// OCI artifact manifest (preferred)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactManifest {
    #[serde(rename = "mediaType")]
    pub media_type: String,

    #[serde(rename = "artifactType")]
    pub artifact_type: String,

    pub blobs: Vec<Descriptor>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

/// OCI image manifest (fallback)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageManifest {
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,

    #[serde(rename = "mediaType")]
    pub media_type: String,

    pub config: Descriptor,

    pub layers: Vec<Descriptor>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

/// Synthetic config blob for the image-manifest fallback
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigBlob {
    pub architecture: String,

    #[serde(rename = "ociVersion")]
    pub oci_version: String,

    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

/// Either manifest shape, normalized to a layer list
#[derive(Debug, Clone)]
pub enum PackageManifest {
    Artifact(ArtifactManifest),
    Image(ImageManifest),
}

impl PackageManifest {
    pub fn layers(&self) -> &[Descriptor] {
        match self {
            Self::Artifact(m) => &m.blobs,
            Self::Image(m) => &m.layers,
        }
    }

    pub fn annotations(&self) -> Option<&BTreeMap<String, String>> {
        match self {
            Self::Artifact(m) => m.annotations.as_ref(),
            Self::Image(m) => m.annotations.as_ref(),
        }
    }

    /// Find a layer by its title annotation.
    pub fn layer_by_title(&self, title: &str) -> Option<&Descriptor> {
        self.layers().iter().find(|l| l.title() == Some(title))
    }
}

/// Remote registry session for one repository
pub struct OrasRemote {
    pub reference: Reference,
    client: reqwest::Client,
    scheme: &'static str,
    auth: Option<(String, String)>,
    pub concurrency: usize,
}

impl OrasRemote {
    pub fn new(reference: Reference, insecure: bool, concurrency: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(insecure)
            .pool_max_idle_per_host(10)
            .timeout(Duration::from_secs(120))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build registry client")?;
        Ok(Self {
            reference,
            client,
            scheme: if insecure { "http" } else { "https" },
            auth: None,
            concurrency: concurrency.max(1),
        })
    }

    pub fn with_basic_auth(mut self, username: &str, password: &str) -> Self {
        self.auth = Some((username.to_string(), password.to_string()));
        self
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}://{}/v2/{}/{}",
            self.scheme, self.reference.registry, self.reference.repository, path
        )
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth {
            Some((user, pass)) => builder.basic_auth(user, Some(pass)),
            None => builder,
        }
    }

    /// HEAD a blob to check existence.
    pub async fn blob_exists(&self, digest: &str) -> Result<bool> {
        let url = self.url(&format!("blobs/{digest}"));
        let response = self
            .request(self.client.head(&url))
            .send()
            .await
            .map_err(|err| EngineError::network(format!("registry unreachable: {err}")))?;
        Ok(response.status().is_success())
    }

    /// Upload one blob using the two-step upload flow, skipping blobs the
    /// registry already has.
    pub async fn push_blob(&self, digest: &str, data: Vec<u8>) -> Result<()> {
        if self.blob_exists(digest).await? {
            debug!(%digest, "blob already present, skipping");
            return Ok(());
        }

        let start_url = self.url("blobs/uploads/");
        let response = self
            .request(self.client.post(&start_url))
            .send()
            .await
            .map_err(|err| EngineError::network(format!("registry unreachable: {err}")))?;
        if response.status() != StatusCode::ACCEPTED {
            return Err(OciError::UnexpectedStatus {
                status: response.status(),
                url: start_url,
            }
            .into());
        }

        let location = response
            .headers()
            .get("Location")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| EngineError::network("registry upload returned no Location header"))?
            .to_string();

        let separator = if location.contains('?') { '&' } else { '?' };
        let put_url = if location.starts_with("http") {
            format!("{location}{separator}digest={digest}")
        } else {
            format!(
                "{}://{}{location}{separator}digest={digest}",
                self.scheme, self.reference.registry
            )
        };

        let response = self
            .request(self.client.put(&put_url))
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(data)
            .send()
            .await
            .map_err(|err| EngineError::network(format!("blob upload failed: {err}")))?;
        if !response.status().is_success() {
            return Err(OciError::UnexpectedStatus {
                status: response.status(),
                url: put_url,
            }
            .into());
        }
        Ok(())
    }

    /// Download a blob, verifying its digest.
    pub async fn fetch_blob(&self, descriptor: &Descriptor) -> Result<Vec<u8>> {
        let url = self.url(&format!("blobs/{}", descriptor.digest));
        let response = self
            .request(self.client.get(&url))
            .send()
            .await
            .map_err(|err| EngineError::network(format!("registry unreachable: {err}")))?;
        if !response.status().is_success() {
            return Err(OciError::UnexpectedStatus {
                status: response.status(),
                url,
            }
            .into());
        }
        let data = response
            .bytes()
            .await
            .map_err(|err| EngineError::network(format!("blob download failed: {err}")))?
            .to_vec();

        let actual = format!("sha256:{}", crate::hash::sha256_hex(&data));
        if actual != descriptor.digest {
            return Err(EngineError::integrity(
                OciError::DigestMismatch {
                    digest: descriptor.digest.clone(),
                    actual,
                }
                .to_string(),
            )
            .into());
        }
        Ok(data)
    }

    /// PUT a manifest under the given tag with the given media type.
    pub async fn push_manifest(&self, tag: &str, media_type: &str, body: Vec<u8>) -> Result<StatusCode> {
        let url = self.url(&format!("manifests/{tag}"));
        let response = self
            .request(self.client.put(&url))
            .header(CONTENT_TYPE, media_type)
            .body(body)
            .send()
            .await
            .map_err(|err| EngineError::network(format!("manifest upload failed: {err}")))?;
        Ok(response.status())
    }

    /// Fetch and parse the manifest for the session's tag, accepting either
    /// manifest shape.
    pub async fn fetch_manifest(&self) -> Result<PackageManifest> {
        let tag = if self.reference.tag.is_empty() {
            "latest"
        } else {
            self.reference.tag.as_str()
        };
        let url = self.url(&format!("manifests/{tag}"));

        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "application/vnd.oci.artifact.manifest.v1+json, \
                 application/vnd.oci.image.manifest.v1+json",
            ),
        );

        let response = self
            .request(self.client.get(&url))
            .headers(headers)
            .send()
            .await
            .map_err(|err| EngineError::network(format!("registry unreachable: {err}")))?;
        if !response.status().is_success() {
            return Err(OciError::UnexpectedStatus {
                status: response.status(),
                url,
            }
            .into());
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = response
            .bytes()
            .await
            .map_err(|err| EngineError::network(format!("manifest download failed: {err}")))?;

        if content_type.contains("artifact.manifest") {
            let manifest: ArtifactManifest =
                serde_json::from_slice(&body).context("Failed to parse artifact manifest")?;
            Ok(PackageManifest::Artifact(manifest))
        } else {
            let manifest: ImageManifest =
                serde_json::from_slice(&body).context("Failed to parse image manifest")?;
            Ok(PackageManifest::Image(manifest))
        }
    }
}

/// Tag for a package version + architecture, e.g. `0.1.0-amd64` or
/// `0.1.0-skeleton`. `+` is not tag-safe and becomes `-`.
pub fn package_tag(version: &str, arch: &str) -> String {
    format!("{}-{}", version.replace('+', "-"), arch)
}
