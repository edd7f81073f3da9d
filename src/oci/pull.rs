// src/oci/pull.rs

//! Pulling packages and skeleton manifests from a registry

use anyhow::{Context, Result};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::composer::SkeletonFetcher;
use crate::layout::{CHECKSUMS, COMPONENTS_DIR, IMAGES_DIR, SIGNATURE, ZARF_YAML};
use crate::oci::{Descriptor, OrasRemote, PackageManifest, Reference};
use crate::types::ZarfPackage;

impl OrasRemote {
    /// Pull the package into `destination`, which becomes a normal layout
    /// directory. When `requested_components` is non-empty only the matching
    /// component tarballs are fetched; metadata and image layers always are.
    pub async fn pull_package(
        &self,
        destination: &Path,
        requested_components: &[String],
    ) -> Result<ZarfPackage> {
        let manifest = self.fetch_manifest().await?;
        let package = self.parse_zarf_yaml(&manifest).await?;

        let wanted: Vec<&Descriptor> = manifest
            .layers()
            .iter()
            .filter(|layer| {
                layer_is_wanted(layer, requested_components)
            })
            .collect();

        info!(
            layers = wanted.len(),
            reference = %self.reference.to_url(),
            "pulling package"
        );

        stream::iter(wanted.into_iter().map(|descriptor| async move {
            let data = self.fetch_blob(descriptor).await?;
            let rel = descriptor
                .title()
                .ok_or_else(|| anyhow::anyhow!("layer {} has no title", descriptor.digest))?;
            let path = safe_join(destination, rel)?;
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, data)
                .await
                .with_context(|| format!("Failed to write layer {}", path.display()))?;
            debug!(layer = rel, "layer pulled");
            Ok::<_, anyhow::Error>(())
        }))
        .buffer_unordered(self.concurrency)
        .try_collect::<Vec<_>>()
        .await?;

        Ok(package)
    }

    /// Fetch and parse just the `zarf.yaml` layer.
    pub async fn fetch_zarf_yaml(&self) -> Result<ZarfPackage> {
        let manifest = self.fetch_manifest().await?;
        self.parse_zarf_yaml(&manifest).await
    }

    async fn parse_zarf_yaml(&self, manifest: &PackageManifest) -> Result<ZarfPackage> {
        let descriptor = manifest.layer_by_title(ZARF_YAML).ok_or_else(|| {
            anyhow::anyhow!(
                "artifact {} does not contain a {} layer",
                self.reference.to_url(),
                ZARF_YAML
            )
        })?;
        let data = self.fetch_blob(descriptor).await?;
        let text = String::from_utf8(data).context("zarf.yaml layer is not UTF-8")?;
        ZarfPackage::parse(&text).context("Failed to parse pulled zarf.yaml")
    }
}

fn layer_is_wanted(layer: &Descriptor, requested_components: &[String]) -> bool {
    let Some(title) = layer.title() else {
        return false;
    };
    if requested_components.is_empty() {
        return true;
    }
    // metadata and shared image layers always come along
    if title == ZARF_YAML
        || title == CHECKSUMS
        || title == SIGNATURE
        || title.starts_with(IMAGES_DIR)
        || title == crate::layout::SBOM_TAR
    {
        return true;
    }
    if let Some(rest) = title.strip_prefix(&format!("{COMPONENTS_DIR}/")) {
        let component = rest.trim_end_matches(".tar");
        return requested_components.iter().any(|c| c == component);
    }
    true
}

fn safe_join(base: &Path, rel: &str) -> Result<PathBuf> {
    if rel.split('/').any(|segment| segment == "..") || rel.starts_with('/') {
        anyhow::bail!("layer title {rel:?} escapes the destination directory");
    }
    Ok(base.join(rel))
}

/// Blocking skeleton fetcher used by the composer for `import.url`.
pub struct RemoteSkeletonFetcher {
    insecure: bool,
    concurrency: usize,
}

impl RemoteSkeletonFetcher {
    pub fn new(insecure: bool, concurrency: usize) -> Self {
        Self {
            insecure,
            concurrency,
        }
    }
}

impl SkeletonFetcher for RemoteSkeletonFetcher {
    fn fetch_manifest(&self, url: &str) -> Result<ZarfPackage> {
        let mut reference = Reference::parse(url)?;
        // import urls name the version; skeletons live under its
        // skeleton-architecture tag
        if !reference.tag.is_empty() && !reference.tag.ends_with("-skeleton") {
            reference.tag = format!("{}-{}", reference.tag, crate::oci::SKELETON_ARCH);
        }
        let remote = OrasRemote::new(reference, self.insecure, self.concurrency)?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("Failed to start transport runtime")?;
        runtime.block_on(remote.fetch_zarf_yaml())
    }
}
