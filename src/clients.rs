// src/clients.rs

//! Tool-backed implementations of the external contracts
//!
//! Helm, git, crane, and syft already exist as battle-tested binaries; these
//! implementations drive them as subprocesses. Every invocation captures
//! stderr so failures surface with the tool's own message.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

use crate::error::Error;
use crate::external::{GitClient, HelmClient, HelmReleaseOptions, HelmReleaseResult, ImageClient, SbomCataloger};
use crate::types::state::ConnectStrings;
use crate::types::ZarfChart;

fn run(description: &str, command: &mut Command) -> Result<String> {
    debug!(?command, "running {description}");
    let output = command
        .output()
        .map_err(|err| Error::resource(format!("failed to run {description}: {err}")))?;
    if !output.status.success() {
        anyhow::bail!(
            "{description} failed with code {}: {}",
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Helm CLI (`helm`)
#[derive(Debug, Default)]
pub struct HelmCli;

impl HelmClient for HelmCli {
    fn download_chart(&self, repo_url: &str, chart: &ZarfChart, dest: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dest)?;
        run(
            "helm pull",
            Command::new("helm")
                .args(["pull", &chart.name, "--repo", repo_url, "--version", &chart.version])
                .arg("--destination")
                .arg(dest),
        )?;
        let tgz = dest.join(format!("{}-{}.tgz", chart.name, chart.version));
        if tgz.exists() {
            return Ok(tgz);
        }
        // some charts name their archives differently; take what arrived
        std::fs::read_dir(dest)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .find(|path| path.extension().map(|e| e == "tgz").unwrap_or(false))
            .ok_or_else(|| {
                Error::resource(format!("helm pull produced no chart archive in {}", dest.display()))
                    .into()
            })
    }

    fn package_chart(&self, chart_dir: &Path, dest: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dest)?;
        let stdout = run(
            "helm package",
            Command::new("helm")
                .arg("package")
                .arg(chart_dir)
                .arg("--destination")
                .arg(dest),
        )?;
        // helm prints "Successfully packaged chart and saved it to: <path>"
        let path = stdout
            .rsplit(':')
            .next()
            .map(|s| PathBuf::from(s.trim()))
            .filter(|p| p.exists())
            .ok_or_else(|| Error::resource("helm package reported no output path"))?;
        Ok(path)
    }

    fn install_or_upgrade(&self, options: &HelmReleaseOptions) -> Result<HelmReleaseResult> {
        let mut command = Command::new("helm");
        command
            .args(["upgrade", "--install", &options.release_name])
            .args(["--namespace", &options.namespace, "--create-namespace"]);

        let synthetic_dir;
        if options.manifest_files.is_empty() {
            command.arg(&options.chart_path);
        } else {
            // raw manifests become a synthetic chart so release tracking
            // stays uniform
            synthetic_dir = synthesize_chart(&options.release_name, &options.manifest_files)?;
            command.arg(synthetic_dir.path());
        }

        for values in &options.values_files {
            command.arg("--values").arg(values);
        }
        if !options.no_wait {
            command.arg("--wait");
        }

        run("helm upgrade", &mut command)?;

        let revision = self
            .release_revision(&options.release_name, &options.namespace)
            .unwrap_or(1);
        Ok(HelmReleaseResult {
            revision,
            connect_strings: self
                .connect_strings(&options.namespace)
                .unwrap_or_default(),
        })
    }

    fn uninstall(&self, release_name: &str, namespace: &str) -> Result<()> {
        run(
            "helm uninstall",
            Command::new("helm").args(["uninstall", release_name, "--namespace", namespace]),
        )?;
        Ok(())
    }
}

impl HelmCli {
    fn release_revision(&self, release: &str, namespace: &str) -> Result<u32> {
        let stdout = run(
            "helm status",
            Command::new("helm").args([
                "status",
                release,
                "--namespace",
                namespace,
                "--output",
                "json",
            ]),
        )?;
        let status: serde_json::Value = serde_json::from_str(&stdout)?;
        Ok(status["version"].as_u64().unwrap_or(1) as u32)
    }

    /// Collect `zarf.dev/connect-*` annotations from services in the
    /// release namespace.
    fn connect_strings(&self, namespace: &str) -> Result<ConnectStrings> {
        let stdout = run(
            "kubectl get services",
            Command::new("kubectl").args([
                "get",
                "services",
                "--namespace",
                namespace,
                "--output",
                "json",
            ]),
        )?;
        let services: serde_json::Value = serde_json::from_str(&stdout)?;
        let mut connect = ConnectStrings::new();
        for service in services["items"].as_array().unwrap_or(&Vec::new()) {
            let annotations = &service["metadata"]["annotations"];
            if let Some(name) = annotations["zarf.dev/connect-name"].as_str() {
                connect.insert(
                    name.to_string(),
                    crate::types::state::ConnectString {
                        description: annotations["zarf.dev/connect-description"]
                            .as_str()
                            .unwrap_or_default()
                            .to_string(),
                        url: annotations["zarf.dev/connect-url"]
                            .as_str()
                            .unwrap_or_default()
                            .to_string(),
                    },
                );
            }
        }
        Ok(connect)
    }
}

/// Wrap raw manifests in a minimal chart directory.
fn synthesize_chart(name: &str, manifests: &[PathBuf]) -> Result<tempfile::TempDir> {
    let dir = tempfile::tempdir()?;
    std::fs::write(
        dir.path().join("Chart.yaml"),
        format!(
            "apiVersion: v2\nname: zarf-raw-{name}\nversion: 0.1.0\ndescription: raw manifests for {name}\n"
        ),
    )?;
    let templates = dir.path().join("templates");
    std::fs::create_dir_all(&templates)?;
    for manifest in manifests {
        let file_name = manifest
            .file_name()
            .ok_or_else(|| Error::resource("manifest path has no file name"))?;
        std::fs::copy(manifest, templates.join(file_name))
            .with_context(|| format!("Failed to stage manifest {}", manifest.display()))?;
    }
    Ok(dir)
}

/// Git CLI (`git`)
#[derive(Debug, Default)]
pub struct GitCli;

impl GitClient for GitCli {
    fn mirror_clone(&self, url: &str, dest: &Path) -> Result<()> {
        // a trailing @ref pins the clone to one rev
        let (url, reference) = match url.rsplit_once('@') {
            Some((prefix, reference)) if prefix.contains("://") => {
                (prefix.to_string(), Some(reference.to_string()))
            }
            _ => (url.to_string(), None),
        };

        run(
            "git clone",
            Command::new("git")
                .args(["clone", "--mirror", &url])
                .arg(dest),
        )?;

        if let Some(reference) = reference {
            run(
                "git update-ref",
                Command::new("git")
                    .current_dir(dest)
                    .args(["symbolic-ref", "HEAD", &format!("refs/heads/{reference}")]),
            )
            .or_else(|_| {
                run(
                    "git update HEAD",
                    Command::new("git")
                        .current_dir(dest)
                        .args(["update-ref", "HEAD", &reference]),
                )
            })?;
        }
        Ok(())
    }

    fn push_all(
        &self,
        repo_dir: &Path,
        target_url: &str,
        username: &str,
        password: &str,
    ) -> Result<()> {
        let authed = inject_credentials(target_url, username, password)?;
        run(
            "git push",
            Command::new("git")
                .current_dir(repo_dir)
                .args(["push", "--mirror", &authed]),
        )?;
        Ok(())
    }
}

fn inject_credentials(url: &str, username: &str, password: &str) -> Result<String> {
    let mut parsed = url::Url::parse(url)
        .map_err(|_| Error::network(format!("invalid git target url {url:?}")))?;
    parsed
        .set_username(username)
        .map_err(|_| Error::network("git target url cannot carry a username"))?;
    parsed
        .set_password(Some(password))
        .map_err(|_| Error::network("git target url cannot carry a password"))?;
    Ok(parsed.to_string())
}

/// Image library CLI (`crane`)
#[derive(Debug, Default)]
pub struct CraneCli;

impl ImageClient for CraneCli {
    fn pull(
        &self,
        references: &[String],
        layout_dir: &Path,
        arch: &str,
    ) -> Result<BTreeMap<String, String>> {
        std::fs::create_dir_all(layout_dir)?;
        let mut digests = BTreeMap::new();
        for reference in references {
            run(
                "crane pull",
                Command::new("crane")
                    .args(["pull", reference])
                    .arg(layout_dir)
                    .args(["--format", "oci", "--platform", &format!("linux/{arch}")]),
            )
            .with_context(|| format!("Failed to pull image {reference}"))?;

            let digest = run(
                "crane digest",
                Command::new("crane")
                    .args(["digest", reference, "--platform", &format!("linux/{arch}")]),
            )?;
            digests.insert(reference.clone(), digest.trim().to_string());
        }
        Ok(digests)
    }

    fn push(
        &self,
        layout_dir: &Path,
        source_reference: &str,
        target_reference: &str,
        insecure: bool,
    ) -> Result<()> {
        let mut command = Command::new("crane");
        command
            .args(["push", "--index"])
            .arg(layout_dir)
            .arg(target_reference);
        if insecure {
            command.arg("--insecure");
        }
        run("crane push", &mut command)
            .with_context(|| format!("Failed to push {source_reference} to {target_reference}"))?;
        Ok(())
    }
}

/// SBOM CLI (`syft`)
#[derive(Debug, Default)]
pub struct SyftCli;

impl SbomCataloger for SyftCli {
    fn catalog(
        &self,
        component_name: &str,
        images: &[String],
        files: &[PathBuf],
        out_dir: &Path,
    ) -> Result<()> {
        std::fs::create_dir_all(out_dir)?;
        for (index, image) in images.iter().enumerate() {
            let out = out_dir.join(format!("{component_name}-image-{index}.json"));
            run(
                "syft scan",
                Command::new("syft")
                    .args(["scan", image, "--output"])
                    .arg(format!("syft-json={}", out.display())),
            )?;
        }
        for (index, file) in files.iter().enumerate() {
            let out = out_dir.join(format!("{component_name}-file-{index}.json"));
            run(
                "syft scan",
                Command::new("syft")
                    .arg("scan")
                    .arg(format!("file:{}", file.display()))
                    .args(["--output"])
                    .arg(format!("syft-json={}", out.display())),
            )?;
        }
        Ok(())
    }
}
