// src/composer/mod.rs

//! Import chain resolution and component composition
//!
//! A component may import its definition from another package, which may in
//! turn import from a third, forming a chain from the head (the package
//! being built) down to a leaf. Nodes live in an arena `Vec` indexed by
//! position, so prev/next are just offsets. Composition merges tail-first:
//! the leaf is the base and every downstream node overrides it.

use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::Error;
use crate::layout::ZARF_YAML;
use crate::types::deprecated;
use crate::types::{Constant, Variable, ZarfComponent, ZarfPackage};

/// Fetches skeleton manifests for `import.url` references; wired to the OCI
/// transport by the creator, faked in tests.
pub trait SkeletonFetcher {
    fn fetch_manifest(&self, url: &str) -> Result<ZarfPackage>;
}

/// One resolved component definition in the chain
#[derive(Debug, Clone)]
pub struct Node {
    pub component: ZarfComponent,
    /// Index of the component in its origin manifest
    pub index: usize,
    /// Path from the head package dir to this node's package dir
    pub relative_to_head: String,
    /// Variables declared by this node's origin manifest
    pub vars: Vec<Variable>,
    /// Constants declared by this node's origin manifest
    pub consts: Vec<Constant>,
}

impl Node {
    /// Name of the component this node imports, when it imports one.
    pub fn import_name(&self) -> String {
        match &self.component.import {
            Some(import) if !import.component_name.is_empty() => import.component_name.clone(),
            _ => self.component.name.clone(),
        }
    }
}

/// The resolved chain, head first
#[derive(Debug)]
pub struct ImportChain {
    nodes: Vec<Node>,
    /// OCI url of the remote tail, when the chain ends in a skeleton
    remote_url: Option<String>,
}

impl ImportChain {
    /// Resolve the chain starting from `head`, a component of the package
    /// found in `base_dir`.
    pub fn new(
        head: ZarfComponent,
        index: usize,
        arch: &str,
        flavor: &str,
        base_dir: &Path,
        fetcher: Option<&dyn SkeletonFetcher>,
    ) -> Result<Self> {
        if arch.is_empty() {
            return Err(Error::composition(
                "cannot build import chain: architecture must be provided",
            )
            .into());
        }

        let mut chain = ImportChain {
            nodes: vec![Node {
                component: head,
                index,
                relative_to_head: ".".to_string(),
                vars: Vec::new(),
                consts: Vec::new(),
            }],
            remote_url: None,
        };

        // every relative_to_head seen so far, in order, for cycle reporting
        let mut trail = vec![".".to_string()];

        loop {
            let node = chain.nodes.last().expect("chain is never empty");
            let Some(import) = node.component.import.clone() else {
                return Ok(chain);
            };

            let is_local = !import.path.is_empty();
            let is_remote = !import.url.is_empty();
            if is_local == is_remote {
                return Err(Error::validation(format!(
                    "component {:?} must define exactly one of import.path or import.url",
                    node.component.name
                ))
                .into());
            }

            if chain.remote_url.is_some() {
                return Err(Error::composition(
                    "remote components may not import further components",
                )
                .into());
            }

            let name = node.import_name();
            let (package, relative_to_head) = if is_local {
                let relative = join_relative(&node.relative_to_head, &import.path);
                if trail.contains(&relative) {
                    return Err(Error::composition(format!(
                        "circular import chain: {} -> {}",
                        trail.join(" -> "),
                        relative
                    ))
                    .into());
                }
                trail.push(relative.clone());

                let manifest_path = base_dir.join(&relative).join(ZARF_YAML);
                let package = ZarfPackage::from_file(&manifest_path).with_context(|| {
                    format!("Failed to read imported manifest: {}", manifest_path.display())
                })?;
                (package, relative)
            } else {
                let fetcher = fetcher.ok_or_else(|| {
                    Error::composition(format!(
                        "component {:?} imports {:?} but OCI imports are not available here",
                        node.component.name, import.url
                    ))
                })?;
                let package = fetcher
                    .fetch_manifest(&import.url)
                    .with_context(|| format!("Failed to fetch skeleton from {}", import.url))?;
                chain.remote_url = Some(import.url.clone());
                (package, node.relative_to_head.clone())
            };

            let matches: Vec<(usize, &ZarfComponent)> = package
                .components
                .iter()
                .enumerate()
                .filter(|(_, c)| c.name == name && compatible_component(c, arch, flavor))
                .collect();

            let source = if is_local {
                trail.last().cloned().unwrap_or_default()
            } else {
                import.url.clone()
            };
            let (found_index, found) = match matches.as_slice() {
                [] => {
                    return Err(Error::composition(format!(
                        "component {name:?} not found in {source:?}"
                    ))
                    .into())
                }
                [one] => *one,
                _ => {
                    return Err(Error::composition(format!(
                        "multiple components named {name:?} found in {source:?} satisfying {arch:?}"
                    ))
                    .into())
                }
            };

            debug!(component = %name, from = %source, "resolved import");
            chain.nodes.push(Node {
                component: found.clone(),
                index: found_index,
                relative_to_head,
                vars: package.variables.clone(),
                consts: package.constants.clone(),
            });
        }
    }

    pub fn head(&self) -> &Node {
        &self.nodes[0]
    }

    pub fn tail(&self) -> &Node {
        self.nodes.last().expect("chain is never empty")
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// OCI url of the remote tail, when one exists.
    pub fn remote_url(&self) -> Option<&str> {
        self.remote_url.as_deref()
    }

    /// Apply deprecated-field migrations to every node.
    pub fn migrate(&mut self) -> Vec<String> {
        let mut warnings = Vec::new();
        for node in &mut self.nodes {
            let (migrated, w) = deprecated::migrate_component(node.component.clone());
            node.component = migrated;
            warnings.extend(w);
        }
        if !warnings.is_empty() {
            warnings.push(format!(
                "migrations were performed on the import chain of: {:?}",
                self.nodes[0].component.name
            ));
        }
        warnings
    }

    /// Merge the chain into a single component, fixing artifact paths to be
    /// relative to the head and applying downstream overrides.
    pub fn compose(&self) -> Result<ZarfComponent> {
        if self.nodes.len() == 1 {
            return Ok(self.head().component.clone());
        }

        let mut composed = ZarfComponent::default();
        for node in self.nodes.iter().rev() {
            let mut current = node.component.clone();
            current.import = None;
            fix_paths(&mut current, &node.relative_to_head);
            override_metadata(&mut composed, &current);
            override_resources(&mut composed, current);
        }
        Ok(composed)
    }

    /// Merge variables from the chain over `existing`; downstream wins.
    pub fn merge_variables(&self, existing: &[Variable]) -> Vec<Variable> {
        let mut merged: Vec<Variable> = Vec::new();
        for node in self.nodes.iter().rev() {
            for variable in &node.vars {
                if !merged.iter().any(|v| v.name == variable.name) {
                    merged.push(variable.clone());
                }
            }
        }
        let mut result: Vec<Variable> = existing.to_vec();
        for variable in merged {
            if !result.iter().any(|v| v.name == variable.name) {
                result.push(variable);
            }
        }
        result
    }

    /// Merge constants from the chain over `existing`; downstream wins.
    pub fn merge_constants(&self, existing: &[Constant]) -> Vec<Constant> {
        let mut merged: Vec<Constant> = Vec::new();
        for node in self.nodes.iter().rev() {
            for constant in &node.consts {
                if !merged.iter().any(|c| c.name == constant.name) {
                    merged.push(constant.clone());
                }
            }
        }
        let mut result: Vec<Constant> = existing.to_vec();
        for constant in merged {
            if !result.iter().any(|c| c.name == constant.name) {
                result.push(constant);
            }
        }
        result
    }
}

impl fmt::Display for ImportChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.nodes.len() == 1 {
            return write!(
                f,
                "component {:?} imports nothing",
                self.nodes[0].component.name
            );
        }
        for (idx, window) in self.nodes.windows(2).enumerate() {
            let importer = &window[0];
            let import = importer.component.import.as_ref();
            let source = import
                .map(|i| {
                    if i.path.is_empty() {
                        i.url.clone()
                    } else {
                        i.path.clone()
                    }
                })
                .unwrap_or_default();
            if idx == 0 {
                write!(
                    f,
                    "component {:?} imports {:?} in {source}",
                    importer.component.name,
                    importer.import_name()
                )?;
            } else {
                write!(
                    f,
                    ", which imports {:?} in {source}",
                    importer.import_name()
                )?;
            }
        }
        Ok(())
    }
}

/// Whether a component definition satisfies the target arch and flavor.
pub fn compatible_component(component: &ZarfComponent, arch: &str, flavor: &str) -> bool {
    let cluster_arch = &component.only.cluster.architecture;
    let satisfies_arch = cluster_arch.is_empty() || cluster_arch == arch;
    let satisfies_flavor = component.only.flavor.is_empty() || component.only.flavor == flavor;
    satisfies_arch && satisfies_flavor
}

/// Join an import path onto the current relative path, normalizing `.` and
/// `..` without touching the filesystem.
fn join_relative(current: &str, addition: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in current.split('/').chain(addition.split('/')) {
        match segment {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    parts.push("..");
                }
            }
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}

fn prefix_path(relative: &str, value: &mut String) {
    if value.is_empty() || is_url(value) {
        return;
    }
    *value = PathBuf::from(relative)
        .join(value.as_str())
        .to_string_lossy()
        .replace(std::path::MAIN_SEPARATOR, "/");
}

fn is_url(value: &str) -> bool {
    value.contains("://")
}

fn fix_paths(component: &mut ZarfComponent, relative_to_head: &str) {
    if relative_to_head == "." {
        return;
    }
    for file in &mut component.files {
        prefix_path(relative_to_head, &mut file.source);
    }
    for chart in &mut component.charts {
        prefix_path(relative_to_head, &mut chart.local_path);
        for values in &mut chart.values_files {
            prefix_path(relative_to_head, values);
        }
    }
    for manifest in &mut component.manifests {
        for file in &mut manifest.files {
            prefix_path(relative_to_head, file);
        }
        for kustomization in &mut manifest.kustomizations {
            prefix_path(relative_to_head, kustomization);
        }
    }
    for injection in &mut component.data_injections {
        prefix_path(relative_to_head, &mut injection.source);
    }
    if !component.cosign_key_path.is_empty() {
        prefix_path(relative_to_head, &mut component.cosign_key_path);
    }
}

/// Downstream metadata wins whenever it is set.
fn override_metadata(composed: &mut ZarfComponent, downstream: &ZarfComponent) {
    if !downstream.name.is_empty() {
        composed.name = downstream.name.clone();
    }
    if downstream.description.is_some() {
        composed.description = downstream.description.clone();
    }
    if !downstream.group.is_empty() {
        composed.group = downstream.group.clone();
    }
    if !downstream.cosign_key_path.is_empty() {
        composed.cosign_key_path = downstream.cosign_key_path.clone();
    }
    composed.required = downstream.required;
    composed.default = downstream.default;
    if !downstream.only.is_empty() {
        composed.only = downstream.only.clone();
    }
}

/// Merge artifact lists: images/repos concatenate dedup-stable, files and
/// data injections append, charts/manifests replace by name, action lists
/// concatenate.
fn override_resources(composed: &mut ZarfComponent, downstream: ZarfComponent) {
    let mut seen_images: BTreeSet<String> =
        composed.images.iter().cloned().collect();
    for image in downstream.images {
        if seen_images.insert(image.clone()) {
            composed.images.push(image);
        }
    }
    let mut seen_repos: BTreeSet<String> = composed.repos.iter().cloned().collect();
    for repo in downstream.repos {
        if seen_repos.insert(repo.clone()) {
            composed.repos.push(repo);
        }
    }

    composed.files.extend(downstream.files);
    composed.data_injections.extend(downstream.data_injections);

    for chart in downstream.charts {
        match composed.charts.iter_mut().find(|c| c.name == chart.name) {
            Some(existing) => *existing = chart,
            None => composed.charts.push(chart),
        }
    }
    for manifest in downstream.manifests {
        match composed
            .manifests
            .iter_mut()
            .find(|m| m.name == manifest.name)
        {
            Some(existing) => *existing = manifest,
            None => composed.manifests.push(manifest),
        }
    }

    let merge_set = |base: &mut crate::types::ZarfActionSet,
                     addition: crate::types::ZarfActionSet| {
        if !addition.defaults.is_empty() {
            base.defaults = addition.defaults;
        }
        base.before.extend(addition.before);
        base.after.extend(addition.after);
        base.on_success.extend(addition.on_success);
        base.on_failure.extend(addition.on_failure);
    };
    merge_set(&mut composed.actions.on_create, downstream.actions.on_create);
    merge_set(&mut composed.actions.on_deploy, downstream.actions.on_deploy);
    merge_set(&mut composed.actions.on_remove, downstream.actions.on_remove);
}
