// src/creator/mod.rs

//! Package assembly
//!
//! The creator walks a composed manifest and materializes every external
//! artifact into the on-disk layout: charts are packaged, files fetched and
//! checksummed, manifests and kustomizations rendered, repos mirrored, and
//! all images pulled into one shared OCI layout. The result is checksummed,
//! optionally signed, then archived or published.

pub mod differential;

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::composer::{compatible_component, ImportChain, SkeletonFetcher};
use crate::config::{EngineContext, CLI_VERSION, PKG_VAR_ENV_PREFIX};
use crate::error::Error;
use crate::external::{GitClient, HelmClient, ImageClient, SbomCataloger};
use crate::hash::sha256_of_file;
use crate::layout::{archive, signing, PackagePaths, SBOM_DIR};
use crate::template;
use crate::transform;
use crate::types::deprecated;
use crate::types::package::BuildData;
use crate::types::{SetVariable, ZarfComponent, ZarfFile, ZarfPackage};
use crate::validate;

/// User-selected create options
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    /// `--set` values for PKG_VAR / PKG_TMPL templates
    pub set_variables: BTreeMap<String, String>,
    /// Chunk size for split archives; 0 disables splitting
    pub max_package_size_mb: u64,
    pub skip_sbom: bool,
    pub signing_key_path: Option<PathBuf>,
    /// Directory the archive lands in; defaults to the working directory
    pub output_directory: Option<PathBuf>,
    pub flavor: String,
    /// Reference package for a differential build
    pub differential_package: Option<PathBuf>,
}

/// Package assembly driver
pub struct Creator<'a> {
    ctx: &'a EngineContext,
    helm: &'a dyn HelmClient,
    images: &'a dyn ImageClient,
    git: &'a dyn GitClient,
    sbom: &'a dyn SbomCataloger,
    fetcher: Option<&'a dyn SkeletonFetcher>,
}

impl<'a> Creator<'a> {
    pub fn new(
        ctx: &'a EngineContext,
        helm: &'a dyn HelmClient,
        images: &'a dyn ImageClient,
        git: &'a dyn GitClient,
        sbom: &'a dyn SbomCataloger,
        fetcher: Option<&'a dyn SkeletonFetcher>,
    ) -> Self {
        Self {
            ctx,
            helm,
            images,
            git,
            sbom,
            fetcher,
        }
    }

    /// Build the package defined in `base_dir` and archive it. Returns the
    /// final tarball path (the `.part000` header when the archive split).
    pub fn create(&self, base_dir: &Path, options: &CreateOptions) -> Result<PathBuf> {
        let package = ZarfPackage::from_file(&base_dir.join(crate::layout::ZARF_YAML))
            .with_context(|| format!("Failed to load manifest in {}", base_dir.display()))?;

        let arch = self.resolve_architecture(&package);
        let (composed, migrations, oci_imports) =
            self.compose_package(base_dir, package, &arch, &options.flavor)?;

        // template after composition so imported definitions are covered too
        let mut package = composed;
        self.fill_create_templates(&mut package, &options.set_variables, &arch)?;
        validate::validate_package(&package).context("package validation failed")?;

        if let Some(reference) = &options.differential_package {
            differential::apply_differential(&mut package, reference)?;
        }

        let staging = tempfile::Builder::new()
            .prefix("zarf-")
            .tempdir_in(self.ctx.temp_directory())
            .context("Failed to create staging directory")?;
        let paths = PackagePaths::new(staging.path());
        std::fs::create_dir_all(paths.components_dir())?;

        let mut all_images: Vec<String> = Vec::new();
        let mut sbom_inputs: Vec<(String, Vec<String>, Vec<PathBuf>)> = Vec::new();

        for component in &package.components {
            self.ctx.cancel.check()?;
            let files =
                self.assemble_component(&paths, base_dir, component, &options.set_variables)?;
            for image in &component.images {
                if !all_images.contains(image) {
                    all_images.push(image.clone());
                }
            }
            sbom_inputs.push((component.name.clone(), component.images.clone(), files));
        }

        if !all_images.is_empty() {
            info!(count = all_images.len(), "pulling images into the package");
            self.images
                .pull(&all_images, &paths.images_dir(), &arch)
                .context("Failed to pull package images")?;
        }

        if !options.skip_sbom {
            self.catalog_sboms(&paths, &sbom_inputs)?;
        }

        // tar up each assembled component and drop the source tree
        for component in &package.components {
            let dir = paths.components_dir().join(&component.name);
            if dir.exists() {
                if component_dir_is_empty(&dir)? {
                    std::fs::remove_dir_all(&dir)?;
                } else {
                    archive::archive_component(&dir)?;
                }
            }
        }

        package.build = Some(self.build_metadata(&arch, &options.flavor, migrations, oci_imports));
        paths.write_package(&package)?;
        paths.generate_checksums()?;

        if let Some(key) = &options.signing_key_path {
            signing::sign_package(&paths, key)?;
        }

        let output_dir = options
            .output_directory
            .clone()
            .unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&output_dir)?;
        let extension = if package.metadata.uncompressed {
            "tar"
        } else {
            "tar.zst"
        };
        let tarball = output_dir.join(format!("{}.{extension}", package.archive_stem(&arch)));
        archive::archive_package(&paths, &tarball, options.max_package_size_mb)?;

        let final_path = if tarball.exists() {
            tarball
        } else {
            // the archive split; hand back the header chunk
            tarball.with_file_name(format!(
                "{}.part000",
                tarball.file_name().unwrap_or_default().to_string_lossy()
            ))
        };
        info!(package = %final_path.display(), "package created");
        Ok(final_path)
    }

    /// Compose a skeleton: the fully-composed manifest with no artifacts,
    /// suitable for publishing under the skeleton architecture.
    pub fn create_skeleton(&self, base_dir: &Path, destination: &Path) -> Result<ZarfPackage> {
        let package = ZarfPackage::from_file(&base_dir.join(crate::layout::ZARF_YAML))?;
        let arch = crate::oci::SKELETON_ARCH;
        let (mut package, migrations, oci_imports) =
            self.compose_package(base_dir, package, arch, "")?;
        validate::validate_package(&package)?;

        package.build = Some(self.build_metadata(arch, "", migrations, oci_imports));
        let paths = PackagePaths::new(destination);
        paths.write_package(&package)?;
        paths.generate_checksums()?;
        Ok(package)
    }

    fn resolve_architecture(&self, package: &ZarfPackage) -> String {
        package
            .metadata
            .architecture
            .clone()
            .filter(|a| !a.is_empty())
            .unwrap_or_else(|| self.ctx.architecture.clone())
    }

    /// Substitute `PKG_TMPL`/`PKG_VAR` values into the manifest, prompting
    /// for anything missing unless `--confirm` was given.
    fn fill_create_templates(
        &self,
        package: &mut ZarfPackage,
        set_variables: &BTreeMap<String, String>,
        arch: &str,
    ) -> Result<()> {
        let mut merged = self.ctx.config.variable_overrides(PKG_VAR_ENV_PREFIX);
        for (key, value) in set_variables {
            merged.insert(key.to_uppercase(), value.clone());
        }

        let manifest_text = package.to_yaml()?;
        let mut wanted = template::find_placeholders(&manifest_text, "PKG_VAR_");
        wanted.extend(template::find_placeholders(&manifest_text, "PKG_TMPL_"));

        for name in wanted {
            if merged.contains_key(&name) {
                continue;
            }
            if self.ctx.options.confirm {
                return Err(Error::validation(format!(
                    "variable {name:?} must be '--set' when using the '--confirm' flag"
                ))
                .into());
            }
            let value = prompt_for_value(&name)?;
            merged.insert(name, value);
        }

        let sorted: BTreeMap<String, String> = merged.into_iter().collect();
        let map = template::create_time_map(&sorted, arch);
        template::apply_to_package(package, &map)
    }

    /// Resolve every component's import chain and merge variables/constants.
    /// Returns the composed package, migration warnings, and the map of OCI
    /// skeleton imports for build metadata.
    fn compose_package(
        &self,
        base_dir: &Path,
        package: ZarfPackage,
        arch: &str,
        flavor: &str,
    ) -> Result<(ZarfPackage, Vec<String>, BTreeMap<String, String>)> {
        let mut composed = package.clone();
        composed.components = Vec::new();
        let mut warnings = Vec::new();
        let mut oci_imports = BTreeMap::new();

        for (index, component) in package.components.iter().enumerate() {
            if !compatible_component(component, arch, flavor) {
                debug!(component = %component.name, "skipping incompatible component");
                continue;
            }
            let mut chain = ImportChain::new(
                component.clone(),
                index,
                arch,
                flavor,
                base_dir,
                self.fetcher,
            )?;
            warnings.extend(chain.migrate());
            debug!("{chain}");

            if let Some(url) = chain.remote_url() {
                oci_imports.insert(component.name.clone(), url.to_string());
            }

            composed.variables = chain.merge_variables(&composed.variables);
            composed.constants = chain.merge_constants(&composed.constants);
            composed.components.push(chain.compose()?);
        }

        for warning in &warnings {
            warn!("{warning}");
        }
        Ok((composed, warnings, oci_imports))
    }

    /// Materialize one component's artifacts into its layout directories.
    /// Returns the local file paths that feed SBOM cataloging.
    fn assemble_component(
        &self,
        paths: &PackagePaths,
        base_dir: &Path,
        component: &ZarfComponent,
        set_variables: &BTreeMap<String, String>,
    ) -> Result<Vec<PathBuf>> {
        info!(component = %component.name, "assembling component");
        let component_paths = paths.component_paths(&component.name);
        component_paths.ensure()?;

        let mut variables: BTreeMap<String, SetVariable> = set_variables
            .iter()
            .map(|(name, value)| {
                (
                    name.to_uppercase(),
                    SetVariable {
                        name: name.to_uppercase(),
                        value: value.clone(),
                        ..Default::default()
                    },
                )
            })
            .collect();
        let mut runner = crate::actions::ActionRunner::new(
            &mut variables,
            None,
            self.ctx.cancel.clone(),
        );

        let sbom_files = runner.with_lifecycle(&component.actions.on_create, |_| {
            let mut sbom_files = Vec::new();

            for chart in &component.charts {
                self.package_chart(base_dir, chart, &component_paths)?;
            }

            for (index, file) in component.files.iter().enumerate() {
                let path = self.fetch_file(base_dir, file, index, &component_paths.files)?;
                sbom_files.push(path);
            }

            for manifest in &component.manifests {
                for (index, source) in manifest.files.iter().enumerate() {
                    let dest = component_paths
                        .manifests
                        .join(format!("{}-{index}.yaml", manifest.name));
                    copy_or_download(base_dir, source, &dest)?;
                    sbom_files.push(dest);
                }
                for (index, kustomization) in manifest.kustomizations.iter().enumerate() {
                    let dest = component_paths
                        .manifests
                        .join(format!("kustomization-{}-{index}.yaml", manifest.name));
                    build_kustomization(base_dir, kustomization, &dest)?;
                    sbom_files.push(dest);
                }
            }

            for repo in &component.repos {
                let folder = transform::git_url_to_repo_name(repo)?;
                self.git
                    .mirror_clone(repo, &component_paths.repos.join(folder))
                    .with_context(|| format!("Failed to mirror {repo}"))?;
            }

            Ok(sbom_files)
        })?;

        // an empty temp dir never ships
        let _ = std::fs::remove_dir(&component_paths.temp);
        remove_empty_dirs(&component_paths.base)?;
        Ok(sbom_files)
    }

    fn package_chart(
        &self,
        base_dir: &Path,
        chart: &crate::types::ZarfChart,
        component_paths: &crate::layout::ComponentPaths,
    ) -> Result<()> {
        if !chart.url.is_empty() {
            if chart.url.ends_with(".git") {
                // clone at the pinned version and package the chart subdir
                let checkout = tempfile::tempdir_in(self.ctx.temp_directory())?;
                let pinned = format!("{}@{}", chart.url, chart.version);
                self.git
                    .mirror_clone(&pinned, checkout.path())
                    .with_context(|| format!("Failed to clone chart repo {}", chart.url))?;
                let chart_dir = if chart.git_path.is_empty() {
                    checkout.path().to_path_buf()
                } else {
                    checkout.path().join(&chart.git_path)
                };
                self.helm
                    .package_chart(&chart_dir, &component_paths.charts)
                    .with_context(|| format!("Failed to package chart {}", chart.name))?;
            } else {
                self.helm
                    .download_chart(&chart.url, chart, &component_paths.charts)
                    .with_context(|| format!("Failed to download chart {}", chart.name))?;
            }
        } else {
            self.helm
                .package_chart(&base_dir.join(&chart.local_path), &component_paths.charts)
                .with_context(|| format!("Failed to package local chart {}", chart.name))?;
        }

        for (index, values) in chart.values_files.iter().enumerate() {
            let dest = component_paths
                .values
                .join(format!("{}-{index}", chart.name));
            copy_or_download(base_dir, values, &dest)
                .with_context(|| format!("Failed to stage values file {values}"))?;
        }
        Ok(())
    }

    /// Download or copy one file entry, enforce its shasum, and apply the
    /// executable bit.
    fn fetch_file(
        &self,
        base_dir: &Path,
        file: &ZarfFile,
        index: usize,
        files_dir: &Path,
    ) -> Result<PathBuf> {
        let name = Path::new(&file.source)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| format!("file-{index}"));
        let dest_dir = files_dir.join(index.to_string());
        std::fs::create_dir_all(&dest_dir)?;
        let dest = dest_dir.join(name);

        copy_or_download(base_dir, &file.source, &dest)?;

        if !file.shasum.is_empty() {
            let actual = sha256_of_file(&dest)?;
            if actual != file.shasum {
                return Err(Error::integrity(format!(
                    "file {:?} shasum mismatch: expected {}, got {actual}",
                    file.source, file.shasum
                ))
                .into());
            }
        }

        #[cfg(unix)]
        if file.executable {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(&dest)?.permissions();
            perms.set_mode(perms.mode() | 0o111);
            std::fs::set_permissions(&dest, perms)?;
        }
        Ok(dest)
    }

    fn catalog_sboms(
        &self,
        paths: &PackagePaths,
        inputs: &[(String, Vec<String>, Vec<PathBuf>)],
    ) -> Result<()> {
        let sbom_dir = paths.sbom_dir();
        let mut failed = false;

        for (component, images, files) in inputs {
            if images.is_empty() && files.is_empty() {
                continue;
            }
            if let Err(err) = self.sbom.catalog(component, images, files, &sbom_dir) {
                failed = true;
                if self.ctx.options.strict {
                    return Err(err.context("SBOM generation failed in strict mode"));
                }
                warn!(component, "SBOM generation failed: {err:#}");
            }
        }

        if sbom_dir.exists() && !failed {
            let file = std::fs::File::create(paths.sboms_tar())?;
            let mut builder = tar::Builder::new(std::io::BufWriter::new(file));
            builder.append_dir_all(SBOM_DIR, &sbom_dir)?;
            builder.into_inner()?.flush()?;
            std::fs::remove_dir_all(&sbom_dir)?;
        } else if sbom_dir.exists() {
            std::fs::remove_dir_all(&sbom_dir)?;
        }
        Ok(())
    }

    fn build_metadata(
        &self,
        arch: &str,
        flavor: &str,
        migration_warnings: Vec<String>,
        oci_imports: BTreeMap<String, String>,
    ) -> BuildData {
        let migrations = if migration_warnings.is_empty() {
            Vec::new()
        } else {
            deprecated::all_migrations()
                .into_iter()
                .map(String::from)
                .collect()
        };
        BuildData {
            version: CLI_VERSION.to_string(),
            architecture: arch.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            user: std::env::var("USER").unwrap_or_else(|_| "unknown".to_string()),
            terminal: std::env::var("HOSTNAME").unwrap_or_default(),
            flavor: flavor.to_string(),
            migrations,
            last_non_breaking_version: crate::layout::LAST_COMPATIBLE_BUILD.to_string(),
            oci_imported_components: oci_imports,
        }
    }
}

/// Copy a local source (relative to the package dir) or download a URL.
fn copy_or_download(base_dir: &Path, source: &str, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if source.contains("://") {
        let response = reqwest::blocking::get(source)
            .and_then(|r| r.error_for_status())
            .map_err(|err| Error::network(format!("failed to download {source}: {err}")))?;
        let data = response
            .bytes()
            .map_err(|err| Error::network(format!("failed to download {source}: {err}")))?;
        std::fs::write(dest, data)?;
    } else {
        let path = base_dir.join(source);
        std::fs::copy(&path, dest)
            .with_context(|| format!("Failed to copy {}", path.display()))?;
    }
    Ok(())
}

/// Render a kustomization directory to a single manifest. Kustomize has no
/// library binding here, so the standalone binary does the build.
fn build_kustomization(base_dir: &Path, source: &str, dest: &Path) -> Result<()> {
    let dir = base_dir.join(source);
    let output = std::process::Command::new("kustomize")
        .arg("build")
        .arg(&dir)
        .output()
        .map_err(|err| {
            Error::resource(format!(
                "kustomize is required to build {source:?} but could not be run: {err}"
            ))
        })?;
    if !output.status.success() {
        return Err(Error::resource(format!(
            "kustomize build failed for {source:?}: {}",
            String::from_utf8_lossy(&output.stderr)
        ))
        .into());
    }
    std::fs::write(dest, output.stdout)?;
    Ok(())
}

fn component_dir_is_empty(dir: &Path) -> Result<bool> {
    for entry in walkdir::WalkDir::new(dir) {
        if entry?.file_type().is_file() {
            return Ok(false);
        }
    }
    Ok(true)
}

fn remove_empty_dirs(base: &Path) -> Result<()> {
    for subdir in crate::layout::COMPONENT_DIRS {
        let dir = base.join(subdir);
        if dir.is_dir() && std::fs::read_dir(&dir)?.next().is_none() {
            std::fs::remove_dir(&dir)?;
        }
    }
    Ok(())
}

fn prompt_for_value(name: &str) -> Result<String> {
    print!("Provide a value for {name}: ");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin()
        .read_line(&mut line)
        .context("Failed to read variable value")?;
    Ok(line.trim_end_matches('\n').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CommonOptions, EngineConfig};
    use crate::external::fakes::{FakeGit, FakeHelm, FakeImages, FakeSbom};
    use crate::hash::sha256_hex;

    struct Fixture {
        ctx: EngineContext,
        helm: FakeHelm,
        images: FakeImages,
        git: FakeGit,
        sbom: FakeSbom,
    }

    impl Fixture {
        fn new() -> Self {
            let ctx = EngineContext::new(EngineConfig::default())
                .with_options(CommonOptions {
                    confirm: true,
                    ..Default::default()
                })
                .with_architecture("amd64");
            Self {
                ctx,
                helm: FakeHelm::default(),
                images: FakeImages::default(),
                git: FakeGit::default(),
                sbom: FakeSbom::default(),
            }
        }

        fn creator(&self) -> Creator<'_> {
            Creator::new(&self.ctx, &self.helm, &self.images, &self.git, &self.sbom, None)
        }
    }

    fn write_manifest(dir: &Path, yaml: &str) {
        std::fs::write(dir.join("zarf.yaml"), yaml).unwrap();
    }

    #[test]
    fn test_create_minimal_package() {
        let fixture = Fixture::new();
        let base = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();

        std::fs::write(base.path().join("a.txt"), "hi").unwrap();
        let shasum = sha256_hex(b"hi");
        write_manifest(
            base.path(),
            &format!(
                r#"kind: ZarfPackageConfig
metadata:
  name: hello
  version: 0.0.1
components:
  - name: c
    required: true
    files:
      - source: ./a.txt
        target: /tmp/a.txt
        shasum: {shasum}
"#
            ),
        );

        let options = CreateOptions {
            output_directory: Some(out.path().to_path_buf()),
            skip_sbom: true,
            ..Default::default()
        };
        let tarball = fixture.creator().create(base.path(), &options).unwrap();
        assert_eq!(
            tarball.file_name().unwrap().to_string_lossy(),
            "zarf-package-hello-amd64-0.0.1.tar.zst"
        );

        // the archive holds the manifest, checksums, and the component tar
        let extracted = tempfile::tempdir().unwrap();
        archive::extract_archive(&tarball, extracted.path()).unwrap();
        let paths = PackagePaths::new(extracted.path());
        paths.verify_checksums().unwrap();
        assert!(paths.component_tarball("c").exists());

        let built = paths.read_package().unwrap();
        assert_eq!(built.metadata.name, "hello");
        let build = built.build.unwrap();
        assert_eq!(build.architecture, "amd64");
        assert_eq!(build.version, CLI_VERSION);
    }

    #[test]
    fn test_create_bad_shasum_fails() {
        let fixture = Fixture::new();
        let base = tempfile::tempdir().unwrap();
        std::fs::write(base.path().join("a.txt"), "hi").unwrap();
        write_manifest(
            base.path(),
            r#"kind: ZarfPackageConfig
metadata:
  name: hello
components:
  - name: c
    files:
      - source: ./a.txt
        target: /tmp/a.txt
        shasum: deadbeef
"#,
        );
        let err = fixture
            .creator()
            .create(base.path(), &CreateOptions::default())
            .unwrap_err();
        assert!(format!("{err:#}").contains("shasum mismatch"));
    }

    #[test]
    fn test_create_pulls_unique_images() {
        let fixture = Fixture::new();
        let base = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        write_manifest(
            base.path(),
            r#"kind: ZarfPackageConfig
metadata:
  name: imgs
  version: 0.1.0
components:
  - name: one
    images: [nginx:1.25, redis:7]
  - name: two
    images: [nginx:1.25]
"#,
        );
        let options = CreateOptions {
            output_directory: Some(out.path().to_path_buf()),
            skip_sbom: true,
            ..Default::default()
        };
        fixture.creator().create(base.path(), &options).unwrap();
        let pulled = fixture.images.pulled.lock().unwrap();
        assert_eq!(*pulled, vec!["nginx:1.25", "redis:7"]);
    }

    #[test]
    fn test_create_with_import_and_tmpl() {
        let fixture = Fixture::new();
        let base = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();

        let common = base.path().join("common");
        std::fs::create_dir_all(&common).unwrap();
        std::fs::write(common.join("zarf.yaml"),
            "kind: ZarfPackageConfig\nmetadata:\n  name: common\ncomponents:\n  - name: base\n    images: [podinfo:###ZARF_PKG_TMPL_TAG###]\n",
        ).unwrap();
        write_manifest(
            base.path(),
            r#"kind: ZarfPackageConfig
metadata:
  name: app
  version: 0.1.0
components:
  - name: app
    required: true
    import:
      path: common
      name: base
"#,
        );

        let mut set_variables = BTreeMap::new();
        set_variables.insert("TAG".to_string(), "6.4.0".to_string());
        let options = CreateOptions {
            output_directory: Some(out.path().to_path_buf()),
            set_variables,
            skip_sbom: true,
            ..Default::default()
        };
        fixture.creator().create(base.path(), &options).unwrap();
        // compose resolves the import, then templating fills the tag
        let pulled = fixture.images.pulled.lock().unwrap();
        assert_eq!(*pulled, vec!["podinfo:6.4.0"]);
    }

    #[test]
    fn test_missing_tmpl_with_confirm_fails() {
        let fixture = Fixture::new();
        let base = tempfile::tempdir().unwrap();
        write_manifest(
            base.path(),
            "kind: ZarfPackageConfig\nmetadata:\n  name: app\ncomponents:\n  - name: c\n    images: [x:###ZARF_PKG_VAR_TAG###]\n",
        );
        let err = fixture
            .creator()
            .create(base.path(), &CreateOptions::default())
            .unwrap_err();
        assert!(format!("{err:#}").contains("must be '--set'"));
    }

    #[test]
    fn test_sbom_failure_is_warning_unless_strict() {
        let mut fixture = Fixture::new();
        *fixture.sbom.fail.lock().unwrap() = true;
        let base = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        write_manifest(
            base.path(),
            "kind: ZarfPackageConfig\nmetadata:\n  name: app\n  version: 0.1.0\ncomponents:\n  - name: c\n    images: [nginx:1.25]\n",
        );
        let options = CreateOptions {
            output_directory: Some(out.path().to_path_buf()),
            ..Default::default()
        };
        fixture.creator().create(base.path(), &options).unwrap();

        fixture.ctx.options.strict = true;
        let err = fixture
            .creator()
            .create(base.path(), &options)
            .unwrap_err();
        assert!(format!("{err:#}").contains("strict mode"));
    }

    #[test]
    fn test_chart_sources_classified() {
        let fixture = Fixture::new();
        let base = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(base.path().join("local-chart")).unwrap();
        std::fs::write(base.path().join("values.yaml"), "replicas: 1\n").unwrap();
        write_manifest(
            base.path(),
            r#"kind: ZarfPackageConfig
metadata:
  name: charts
  version: 0.1.0
components:
  - name: c
    charts:
      - name: repo-chart
        url: https://charts.example.com
        version: 1.0.0
        namespace: demo
        valuesFiles: [values.yaml]
      - name: git-chart
        url: https://github.com/example/charts.git
        version: 1.0.0
        gitPath: charts/app
        namespace: demo
      - name: local-chart
        localPath: local-chart
        version: 1.0.0
        namespace: demo
"#,
        );
        let options = CreateOptions {
            output_directory: Some(out.path().to_path_buf()),
            skip_sbom: true,
            ..Default::default()
        };
        fixture.creator().create(base.path(), &options).unwrap();
        assert_eq!(
            *fixture.helm.downloads.lock().unwrap(),
            vec!["https://charts.example.com"]
        );
        let cloned = fixture.git.cloned.lock().unwrap();
        assert_eq!(cloned.len(), 1);
        assert!(cloned[0].starts_with("https://github.com/example/charts.git@"));
    }

    #[test]
    fn test_skeleton_contains_no_artifacts() {
        let fixture = Fixture::new();
        let base = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        write_manifest(
            base.path(),
            "kind: ZarfPackageConfig\nmetadata:\n  name: skel\n  version: 0.1.0\ncomponents:\n  - name: c\n    images: [nginx:1.25]\n",
        );
        let package = fixture
            .creator()
            .create_skeleton(base.path(), dest.path())
            .unwrap();
        assert_eq!(package.build.unwrap().architecture, "skeleton");
        assert!(dest.path().join("zarf.yaml").exists());
        assert!(dest.path().join("checksums.txt").exists());
        assert!(!dest.path().join("images").exists());
        assert!(fixture.images.pulled.lock().unwrap().is_empty());
    }
}
