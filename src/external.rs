// src/external.rs

//! Trait seams for external collaborators
//!
//! Helm, the container-image library, git, and SBOM generation are separate
//! tools with their own lifecycles; the engine drives them through these
//! contracts. Tests substitute in-memory fakes, deployments wire real
//! implementations.

use anyhow::Result;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::types::state::ConnectStrings;
use crate::types::ZarfChart;

/// Options for installing or upgrading one Helm release
#[derive(Debug, Clone, Default)]
pub struct HelmReleaseOptions {
    pub release_name: String,
    pub namespace: String,
    /// Path to a chart tgz, or empty when `manifest_files` is used
    pub chart_path: PathBuf,
    /// Templated values files, in order
    pub values_files: Vec<PathBuf>,
    /// Raw manifests rendered through a synthetic chart so release tracking
    /// stays uniform
    pub manifest_files: Vec<PathBuf>,
    /// Skip waiting for resources to become ready
    pub no_wait: bool,
    /// Adopt resources that already exist in the cluster
    pub adopt_existing: bool,
}

/// Result of a Helm release operation
#[derive(Debug, Clone, Default)]
pub struct HelmReleaseResult {
    pub revision: u32,
    /// Connect strings discovered from `zarf.dev/connect-*` service
    /// annotations in the release
    pub connect_strings: ConnectStrings,
}

/// Helm SDK contract (install/upgrade/uninstall with values)
pub trait HelmClient: Send + Sync {
    /// Download a chart from a Helm repository index into `dest`, returning
    /// the packaged tgz path.
    fn download_chart(
        &self,
        repo_url: &str,
        chart: &ZarfChart,
        dest: &Path,
    ) -> Result<PathBuf>;

    /// Package a local chart directory into a tgz in `dest`.
    fn package_chart(&self, chart_dir: &Path, dest: &Path) -> Result<PathBuf>;

    /// Install the release, or upgrade it when it already exists.
    fn install_or_upgrade(&self, options: &HelmReleaseOptions) -> Result<HelmReleaseResult>;

    fn uninstall(&self, release_name: &str, namespace: &str) -> Result<()>;
}

/// Container-image library contract (crane-equivalent)
pub trait ImageClient: Send + Sync {
    /// Pull every reference into a shared OCI layout at `layout_dir`,
    /// returning reference -> digest.
    fn pull(
        &self,
        references: &[String],
        layout_dir: &Path,
        arch: &str,
    ) -> Result<BTreeMap<String, String>>;

    /// Push one image from the layout to a (possibly tunneled) registry.
    fn push(
        &self,
        layout_dir: &Path,
        source_reference: &str,
        target_reference: &str,
        insecure: bool,
    ) -> Result<()>;
}

/// Git contract (clone mirror, push all refs)
pub trait GitClient: Send + Sync {
    /// Mirror-clone `url` (which may carry an `@ref` suffix) into `dest`.
    fn mirror_clone(&self, url: &str, dest: &Path) -> Result<()>;

    /// Push every ref of the mirror at `repo_dir` to `target_url`.
    fn push_all(
        &self,
        repo_dir: &Path,
        target_url: &str,
        username: &str,
        password: &str,
    ) -> Result<()>;
}

/// SBOM generation contract (syft-equivalent)
pub trait SbomCataloger: Send + Sync {
    /// Catalog the given images (from the shared layout) and component
    /// files, writing results under `out_dir`.
    fn catalog(
        &self,
        component_name: &str,
        images: &[String],
        files: &[PathBuf],
        out_dir: &Path,
    ) -> Result<()>;
}

#[cfg(test)]
pub mod fakes {
    //! Recording fakes shared by creator and deployer tests

    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct FakeHelm {
        pub downloads: Mutex<Vec<String>>,
        pub releases: Mutex<Vec<HelmReleaseOptions>>,
        pub uninstalls: Mutex<Vec<(String, String)>>,
    }

    impl HelmClient for FakeHelm {
        fn download_chart(
            &self,
            repo_url: &str,
            chart: &ZarfChart,
            dest: &Path,
        ) -> Result<PathBuf> {
            self.downloads.lock().unwrap().push(repo_url.to_string());
            let path = dest.join(format!("{}-{}.tgz", chart.name, chart.version));
            std::fs::write(&path, b"fake chart")?;
            Ok(path)
        }

        fn package_chart(&self, chart_dir: &Path, dest: &Path) -> Result<PathBuf> {
            let name = chart_dir
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "chart".to_string());
            let path = dest.join(format!("{name}.tgz"));
            std::fs::write(&path, b"fake local chart")?;
            Ok(path)
        }

        fn install_or_upgrade(&self, options: &HelmReleaseOptions) -> Result<HelmReleaseResult> {
            self.releases.lock().unwrap().push(options.clone());
            Ok(HelmReleaseResult {
                revision: 1,
                connect_strings: ConnectStrings::new(),
            })
        }

        fn uninstall(&self, release_name: &str, namespace: &str) -> Result<()> {
            self.uninstalls
                .lock()
                .unwrap()
                .push((release_name.to_string(), namespace.to_string()));
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct FakeImages {
        pub pulled: Mutex<Vec<String>>,
        pub pushed: Mutex<Vec<(String, String)>>,
    }

    impl ImageClient for FakeImages {
        fn pull(
            &self,
            references: &[String],
            layout_dir: &Path,
            _arch: &str,
        ) -> Result<BTreeMap<String, String>> {
            std::fs::create_dir_all(layout_dir)?;
            std::fs::write(layout_dir.join("oci-layout"), b"{\"imageLayoutVersion\":\"1.0.0\"}")?;
            std::fs::write(layout_dir.join("index.json"), b"{\"manifests\":[]}")?;
            let mut digests = BTreeMap::new();
            for (idx, reference) in references.iter().enumerate() {
                self.pulled.lock().unwrap().push(reference.clone());
                digests.insert(reference.clone(), format!("sha256:{idx:064}"));
            }
            Ok(digests)
        }

        fn push(
            &self,
            _layout_dir: &Path,
            source_reference: &str,
            target_reference: &str,
            _insecure: bool,
        ) -> Result<()> {
            self.pushed
                .lock()
                .unwrap()
                .push((source_reference.to_string(), target_reference.to_string()));
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct FakeGit {
        pub cloned: Mutex<Vec<String>>,
        pub pushed: Mutex<Vec<String>>,
        pub fail_pushes: Mutex<u32>,
    }

    impl GitClient for FakeGit {
        fn mirror_clone(&self, url: &str, dest: &Path) -> Result<()> {
            self.cloned.lock().unwrap().push(url.to_string());
            std::fs::create_dir_all(dest)?;
            std::fs::write(dest.join("HEAD"), b"ref: refs/heads/main")?;
            Ok(())
        }

        fn push_all(
            &self,
            _repo_dir: &Path,
            target_url: &str,
            _username: &str,
            _password: &str,
        ) -> Result<()> {
            let mut failures = self.fail_pushes.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                anyhow::bail!("transient git failure");
            }
            self.pushed.lock().unwrap().push(target_url.to_string());
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct FakeSbom {
        pub cataloged: Mutex<Vec<String>>,
        pub fail: Mutex<bool>,
    }

    impl SbomCataloger for FakeSbom {
        fn catalog(
            &self,
            component_name: &str,
            _images: &[String],
            _files: &[PathBuf],
            out_dir: &Path,
        ) -> Result<()> {
            if *self.fail.lock().unwrap() {
                anyhow::bail!("sbom generation failed");
            }
            std::fs::create_dir_all(out_dir)?;
            std::fs::write(
                out_dir.join(format!("{component_name}.json")),
                b"{\"artifacts\":[]}",
            )?;
            self.cataloged.lock().unwrap().push(component_name.to_string());
            Ok(())
        }
    }
}
