// src/creator/differential.rs

//! Differential packages
//!
//! A differential build subtracts everything the reference package already
//! carries: images present at the same pinned reference and repos at the
//! same pinned ref. Unpinned references (floating tags, ref-less repos)
//! always ship because their content may have moved.

use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{info, warn};

use crate::layout::{archive, PackagePaths, ZARF_YAML};
use crate::types::ZarfPackage;

/// Remove artifacts already present in the reference package.
pub fn apply_differential(package: &mut ZarfPackage, reference: &Path) -> Result<()> {
    let reference_pkg = load_reference_package(reference)?;

    let ref_images: BTreeSet<String> = reference_pkg
        .components
        .iter()
        .flat_map(|c| c.images.iter().cloned())
        .collect();
    let ref_repos: BTreeSet<String> = reference_pkg
        .components
        .iter()
        .flat_map(|c| c.repos.iter().cloned())
        .collect();

    let mut removed_images = 0usize;
    let mut removed_repos = 0usize;

    for component in &mut package.components {
        component.images.retain(|image| {
            let duplicate = ref_images.contains(image) && image_is_pinned(image);
            if duplicate {
                removed_images += 1;
            }
            !duplicate
        });
        component.repos.retain(|repo| {
            let duplicate = ref_repos.contains(repo) && repo_is_pinned(repo);
            if duplicate {
                removed_repos += 1;
            }
            !duplicate
        });
    }

    if removed_images == 0 && removed_repos == 0 {
        warn!("differential build removed nothing; the reference shares no pinned artifacts");
    } else {
        info!(
            images = removed_images,
            repos = removed_repos,
            "differential build subtracted reference artifacts"
        );
    }
    Ok(())
}

fn load_reference_package(reference: &Path) -> Result<ZarfPackage> {
    if reference.is_dir() {
        return ZarfPackage::from_file(&reference.join(ZARF_YAML))
            .with_context(|| format!("Failed to read reference package {}", reference.display()));
    }
    let extract_dir = tempfile::tempdir().context("Failed to create extraction dir")?;
    archive::extract_archive(reference, extract_dir.path())
        .with_context(|| format!("Failed to extract reference package {}", reference.display()))?;
    PackagePaths::new(extract_dir.path()).read_package()
}

/// An image counts as pinned with a digest or a non-latest tag.
fn image_is_pinned(image: &str) -> bool {
    if image.contains('@') {
        return true;
    }
    match image.rsplit_once(':') {
        Some((prefix, tag)) => !prefix.is_empty() && !tag.contains('/') && tag != "latest",
        None => false,
    }
}

/// A repo counts as pinned with an explicit `@ref` suffix.
fn repo_is_pinned(repo: &str) -> bool {
    repo.rsplit_once('@')
        .map(|(prefix, _)| prefix.contains("://"))
        .unwrap_or(false)
}
