// src/oci/publish.rs

//! Publishing a package layout as an OCI artifact

use anyhow::{Context, Result};
use futures::stream::{self, StreamExt, TryStreamExt};
use reqwest::StatusCode;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::hash::sha256_hex;
use crate::layout::PackagePaths;
use crate::oci::{
    ArtifactManifest, ConfigBlob, Descriptor, ImageManifest, OrasRemote,
    ARTIFACT_MANIFEST_MEDIA_TYPE, CONFIG_MEDIA_TYPE, DESCRIPTION_ANNOTATION,
    IMAGE_MANIFEST_MEDIA_TYPE, LAYER_MEDIA_TYPE, PACKAGE_ARCH_ANNOTATION, PACKAGE_ARTIFACT_TYPE,
    PACKAGE_NAME_ANNOTATION, PACKAGE_VERSION_ANNOTATION, TITLE_ANNOTATION,
};
use crate::types::ZarfPackage;

impl OrasRemote {
    /// Publish every file in the layout as a layer, then the manifest.
    /// Layers are pushed with bounded concurrency; the manifest goes last so
    /// a tag never references missing blobs.
    pub async fn publish_package(
        &self,
        paths: &PackagePaths,
        package: &ZarfPackage,
        arch: &str,
    ) -> Result<()> {
        let files = paths.files()?;
        info!(
            layers = files.len(),
            reference = %self.reference.to_url(),
            "publishing package"
        );

        let mut layers = Vec::new();
        for (rel, abs) in &files {
            let data = tokio::fs::read(abs)
                .await
                .with_context(|| format!("Failed to read layer source {}", abs.display()))?;
            let digest = format!("sha256:{}", sha256_hex(&data));
            let mut annotations = BTreeMap::new();
            annotations.insert(TITLE_ANNOTATION.to_string(), rel.clone());
            layers.push((
                Descriptor {
                    media_type: LAYER_MEDIA_TYPE.to_string(),
                    digest,
                    size: data.len() as u64,
                    annotations: Some(annotations),
                },
                data,
            ));
        }

        stream::iter(layers.iter().map(|(descriptor, data)| {
            let digest = descriptor.digest.clone();
            let data = data.clone();
            async move { self.push_blob(&digest, data).await }
        }))
        .buffer_unordered(self.concurrency)
        .try_collect::<Vec<_>>()
        .await?;

        let descriptors: Vec<Descriptor> = layers.into_iter().map(|(d, _)| d).collect();
        let annotations = manifest_annotations(package, arch);
        let tag = if self.reference.tag.is_empty() {
            crate::oci::package_tag(
                package.metadata.version.as_deref().unwrap_or("0.0.0"),
                arch,
            )
        } else {
            self.reference.tag.clone()
        };

        self.push_package_manifest(&tag, descriptors, annotations, arch)
            .await?;
        info!(tag = %tag, "package published");
        Ok(())
    }

    /// Push the artifact manifest, falling back to an image manifest with a
    /// synthetic config when the registry rejects the artifact shape.
    async fn push_package_manifest(
        &self,
        tag: &str,
        layers: Vec<Descriptor>,
        annotations: BTreeMap<String, String>,
        arch: &str,
    ) -> Result<()> {
        let artifact = ArtifactManifest {
            media_type: ARTIFACT_MANIFEST_MEDIA_TYPE.to_string(),
            artifact_type: PACKAGE_ARTIFACT_TYPE.to_string(),
            blobs: layers.clone(),
            annotations: Some(annotations.clone()),
        };
        let body = serde_json::to_vec(&artifact).context("Failed to encode artifact manifest")?;

        let status = self
            .push_manifest(tag, ARTIFACT_MANIFEST_MEDIA_TYPE, body)
            .await?;
        if status.is_success() {
            return Ok(());
        }
        if !status.is_client_error() {
            return Err(crate::oci::OciError::UnexpectedStatus {
                status,
                url: format!("manifests/{tag}"),
            }
            .into());
        }

        warn!(
            %status,
            "registry rejected the artifact manifest, falling back to an image manifest"
        );

        let config = ConfigBlob {
            architecture: arch.to_string(),
            oci_version: "1.0.1".to_string(),
            annotations: annotations
                .iter()
                .filter(|(k, _)| {
                    k.as_str() == TITLE_ANNOTATION || k.as_str() == DESCRIPTION_ANNOTATION
                })
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        };
        let config_bytes = serde_json::to_vec(&config).context("Failed to encode config blob")?;
        let config_digest = format!("sha256:{}", sha256_hex(&config_bytes));
        self.push_blob(&config_digest, config_bytes.clone()).await?;

        let image = ImageManifest {
            schema_version: 2,
            media_type: IMAGE_MANIFEST_MEDIA_TYPE.to_string(),
            config: Descriptor {
                media_type: CONFIG_MEDIA_TYPE.to_string(),
                digest: config_digest,
                size: config_bytes.len() as u64,
                annotations: None,
            },
            layers,
            annotations: Some(annotations),
        };
        let body = serde_json::to_vec(&image).context("Failed to encode image manifest")?;
        let status = self
            .push_manifest(tag, IMAGE_MANIFEST_MEDIA_TYPE, body)
            .await?;
        if status != StatusCode::CREATED && !status.is_success() {
            return Err(crate::oci::OciError::UnexpectedStatus {
                status,
                url: format!("manifests/{tag}"),
            }
            .into());
        }
        debug!("image manifest fallback accepted");
        Ok(())
    }
}

fn manifest_annotations(package: &ZarfPackage, arch: &str) -> BTreeMap<String, String> {
    let mut annotations = BTreeMap::new();
    annotations.insert(
        TITLE_ANNOTATION.to_string(),
        package.metadata.name.clone(),
    );
    if let Some(description) = &package.metadata.description {
        annotations.insert(DESCRIPTION_ANNOTATION.to_string(), description.clone());
    }
    annotations.insert(
        PACKAGE_NAME_ANNOTATION.to_string(),
        package.metadata.name.clone(),
    );
    if let Some(version) = &package.metadata.version {
        annotations.insert(PACKAGE_VERSION_ANNOTATION.to_string(), version.clone());
    }
    annotations.insert(PACKAGE_ARCH_ANNOTATION.to_string(), arch.to_string());
    annotations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PackageMetadata;

    #[test]
    fn test_manifest_annotations() {
        let package = ZarfPackage {
            metadata: PackageMetadata {
                name: "hello".to_string(),
                description: Some("test package".to_string()),
                version: Some("0.0.1".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let annotations = manifest_annotations(&package, "amd64");
        assert_eq!(annotations[PACKAGE_NAME_ANNOTATION], "hello");
        assert_eq!(annotations[PACKAGE_VERSION_ANNOTATION], "0.0.1");
        assert_eq!(annotations[PACKAGE_ARCH_ANNOTATION], "amd64");
        assert_eq!(annotations[TITLE_ANNOTATION], "hello");
        assert_eq!(annotations[DESCRIPTION_ANNOTATION], "test package");
    }
}
