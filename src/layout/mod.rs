// src/layout/mod.rs

//! On-disk package layout
//!
//! A package directory always looks like:
//!
//! ```text
//! zarf.yaml
//! zarf.yaml.sig        (optional)
//! checksums.txt
//! components/<name>.tar
//! images/{oci-layout, index.json, blobs/sha256/...}
//! sboms.tar            (optional)
//! ```
//!
//! The layout owns the directory and everything beneath it until archive or
//! publish. `checksums.txt` covers every file except itself and `zarf.yaml`;
//! the package SHA is the SHA-256 of `checksums.txt`.

pub mod archive;
pub mod signing;

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

use crate::error::Error;
use crate::hash::sha256_of_file;
use crate::types::ZarfPackage;

pub const ZARF_YAML: &str = "zarf.yaml";
pub const SIGNATURE: &str = "zarf.yaml.sig";
pub const CHECKSUMS: &str = "checksums.txt";
pub const COMPONENTS_DIR: &str = "components";
pub const IMAGES_DIR: &str = "images";
pub const SBOM_DIR: &str = "sboms";
pub const SBOM_TAR: &str = "sboms.tar";
pub const OCI_LAYOUT: &str = "oci-layout";
pub const INDEX_JSON: &str = "index.json";

/// Oldest build version this engine will load.
pub const LAST_COMPATIBLE_BUILD: &str = "0.25.0";

/// Subdirectories of a component while it is being assembled
pub const COMPONENT_DIRS: [&str; 7] = [
    "temp",
    "files",
    "charts",
    "values",
    "repos",
    "manifests",
    "data",
];

/// Handle to a package directory
#[derive(Debug, Clone)]
pub struct PackagePaths {
    base: PathBuf,
}

/// Subdirectories of one component during create/deploy
#[derive(Debug, Clone)]
pub struct ComponentPaths {
    pub base: PathBuf,
    pub temp: PathBuf,
    pub files: PathBuf,
    pub charts: PathBuf,
    pub values: PathBuf,
    pub repos: PathBuf,
    pub manifests: PathBuf,
    pub data_injections: PathBuf,
}

impl ComponentPaths {
    fn new(base: PathBuf) -> Self {
        Self {
            temp: base.join("temp"),
            files: base.join("files"),
            charts: base.join("charts"),
            values: base.join("values"),
            repos: base.join("repos"),
            manifests: base.join("manifests"),
            data_injections: base.join("data"),
            base,
        }
    }

    /// Create every subdirectory.
    pub fn ensure(&self) -> Result<()> {
        for dir in [
            &self.temp,
            &self.files,
            &self.charts,
            &self.values,
            &self.repos,
            &self.manifests,
            &self.data_injections,
        ] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create component dir: {}", dir.display()))?;
        }
        Ok(())
    }
}

impl PackagePaths {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn zarf_yaml(&self) -> PathBuf {
        self.base.join(ZARF_YAML)
    }

    pub fn signature(&self) -> PathBuf {
        self.base.join(SIGNATURE)
    }

    pub fn checksums(&self) -> PathBuf {
        self.base.join(CHECKSUMS)
    }

    pub fn components_dir(&self) -> PathBuf {
        self.base.join(COMPONENTS_DIR)
    }

    pub fn component_tarball(&self, name: &str) -> PathBuf {
        self.components_dir().join(format!("{name}.tar"))
    }

    pub fn images_dir(&self) -> PathBuf {
        self.base.join(IMAGES_DIR)
    }

    pub fn sbom_dir(&self) -> PathBuf {
        self.base.join(SBOM_DIR)
    }

    pub fn sboms_tar(&self) -> PathBuf {
        self.base.join(SBOM_TAR)
    }

    /// Working directories for one component.
    pub fn component_paths(&self, name: &str) -> ComponentPaths {
        ComponentPaths::new(self.components_dir().join(name))
    }

    /// Read and parse the manifest.
    pub fn read_package(&self) -> Result<ZarfPackage> {
        let path = self.zarf_yaml();
        ZarfPackage::from_file(&path)
            .with_context(|| format!("Failed to load manifest: {}", path.display()))
    }

    /// Write the manifest.
    pub fn write_package(&self, package: &ZarfPackage) -> Result<()> {
        std::fs::create_dir_all(&self.base)?;
        let yaml = package.to_yaml().context("Failed to serialize manifest")?;
        std::fs::write(self.zarf_yaml(), yaml)
            .with_context(|| format!("Failed to write {}", self.zarf_yaml().display()))?;
        Ok(())
    }

    /// Every file in the layout keyed by its slash-separated relative path.
    pub fn files(&self) -> Result<BTreeMap<String, PathBuf>> {
        let mut map = BTreeMap::new();
        for entry in WalkDir::new(&self.base).follow_links(false) {
            let entry = entry.with_context(|| {
                format!("Failed to walk package dir: {}", self.base.display())
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(&self.base)
                .expect("walkdir stays under base")
                .to_string_lossy()
                .replace(std::path::MAIN_SEPARATOR, "/");
            map.insert(rel, entry.path().to_path_buf());
        }
        Ok(map)
    }

    /// Write `checksums.txt` covering every file except itself and the
    /// manifest. Lines are `<sha256><space><relpath>` sorted by path.
    /// Returns the SHA-256 of the checksum file, which is the package SHA.
    pub fn generate_checksums(&self) -> Result<String> {
        let mut lines = Vec::new();
        for (rel, abs) in self.files()? {
            // the signature is written after this file and signs the
            // manifest directly, so neither is covered
            if rel == ZARF_YAML || rel == CHECKSUMS || rel == SIGNATURE {
                continue;
            }
            let sum = sha256_of_file(&abs)
                .with_context(|| format!("Failed to checksum {}", abs.display()))?;
            lines.push(format!("{sum} {rel}"));
        }
        lines.sort();

        let content = if lines.is_empty() {
            String::new()
        } else {
            format!("{}\n", lines.join("\n"))
        };
        std::fs::write(self.checksums(), content)
            .with_context(|| format!("Failed to write {}", self.checksums().display()))?;

        let package_sha = sha256_of_file(&self.checksums())?;
        debug!(sha = %package_sha, "generated package checksums");
        Ok(package_sha)
    }

    /// Recompute every checksum and confirm the file is total: every file in
    /// the layout except `zarf.yaml` and `checksums.txt` appears exactly once.
    pub fn verify_checksums(&self) -> Result<()> {
        self.verify_checksums_with(false)
    }

    /// Like [`Self::verify_checksums`], but `allow_missing` tolerates listed
    /// files that were deliberately not fetched (partial OCI pulls).
    pub fn verify_checksums_with(&self, allow_missing: bool) -> Result<()> {
        let path = self.checksums();
        let content = std::fs::read_to_string(&path)
            .map_err(|_| Error::integrity("package is missing checksums.txt"))?;

        let mut recorded = BTreeMap::new();
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            let (sum, rel) = line
                .split_once(' ')
                .ok_or_else(|| Error::integrity(format!("malformed checksum line: {line:?}")))?;
            if recorded.insert(rel.to_string(), sum.to_string()).is_some() {
                return Err(Error::integrity(format!(
                    "duplicate checksum entry for {rel:?}"
                ))
                .into());
            }
        }

        for (rel, abs) in self.files()? {
            if rel == ZARF_YAML || rel == CHECKSUMS || rel == SIGNATURE {
                continue;
            }
            let expected = recorded.remove(&rel).ok_or_else(|| {
                Error::integrity(format!("file {rel:?} is not covered by checksums.txt"))
            })?;
            let actual = sha256_of_file(&abs)?;
            if actual != expected {
                return Err(Error::integrity(format!(
                    "checksum mismatch for {rel:?}: expected {expected}, got {actual}"
                ))
                .into());
            }
        }

        if !allow_missing {
            if let Some((rel, _)) = recorded.into_iter().next() {
                return Err(
                    Error::integrity(format!("checksums.txt lists missing file {rel:?}")).into(),
                );
            }
        }
        Ok(())
    }

    /// Full verification: checksums plus signature when a public key is
    /// provided. A signed package with no key is an integrity failure.
    pub fn verify(&self, public_key_path: Option<&Path>) -> Result<()> {
        self.verify_with(public_key_path, false)
    }

    /// [`Self::verify`] with tolerance for partial pulls.
    pub fn verify_with(&self, public_key_path: Option<&Path>, allow_missing: bool) -> Result<()> {
        self.verify_checksums_with(allow_missing)?;

        let signed = self.signature().exists();
        match (signed, public_key_path) {
            (true, Some(key)) => signing::verify_package(self, key),
            (true, None) => Err(Error::integrity(
                "package is signed but no public key was provided; pass --key to verify",
            )
            .into()),
            (false, Some(_)) => Err(Error::integrity(
                "a public key was provided but the package is not signed",
            )
            .into()),
            (false, None) => Ok(()),
        }
    }
}

/// Refuse packages built by engines older than the compatibility floor.
pub fn check_build_compatibility(package: &ZarfPackage) -> Result<()> {
    let Some(build) = &package.build else {
        return Ok(());
    };
    let raw = build.version.trim_start_matches('v');
    let Ok(version) = semver::Version::parse(raw) else {
        // development builds carry non-semver versions
        return Ok(());
    };
    let floor = semver::Version::parse(LAST_COMPATIBLE_BUILD).expect("const semver");
    if version < floor {
        return Err(Error::validation(format!(
            "package was built with version {} which is older than the supported floor {}; \
             re-create it with a current engine",
            build.version, LAST_COMPATIBLE_BUILD
        ))
        .into());
    }
    Ok(())
}
