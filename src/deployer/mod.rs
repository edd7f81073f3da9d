// src/deployer/mod.rs

//! Package deployment
//!
//! The deployer loads a package from any source (tarball, split set, OCI
//! reference, directory), verifies it, resolves the component selection, and
//! drives each component through the fixed order: before-actions, files,
//! charts, manifests, images, repos, data injections, after-actions. Every
//! completed component is recorded in the deployed-package secret so a retry
//! or removal knows where it stood.

pub mod remove;

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::cluster::{Cluster, DEFAULT_POD_WAIT};
use crate::config::{EngineContext, CLI_VERSION, VAR_ENV_PREFIX};
use crate::error::Error;
use crate::external::{GitClient, HelmClient, HelmReleaseOptions, ImageClient};
use crate::injector;
use crate::layout::{archive, check_build_compatibility, PackagePaths};
use crate::oci::{OrasRemote, Reference};
use crate::retry;
use crate::template::{self, TemplateMap, TEMP_PLACEHOLDER};
use crate::transform;
use crate::types::deprecated;
use crate::types::state::{
    ConnectStrings, DeployedComponent, DeployedPackage, InstalledChart, ZarfState,
};
use crate::types::{SetVariable, ZarfComponent, ZarfPackage};

/// Where a package comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageSource {
    Tarball(PathBuf),
    /// The `.part000` header of a split archive
    Split(PathBuf),
    OciUrl(String),
    Directory(PathBuf),
}

impl PackageSource {
    /// Classify a user-supplied source string.
    pub fn identify(raw: &str) -> Self {
        if raw.starts_with("oci://") {
            return Self::OciUrl(raw.to_string());
        }
        let path = PathBuf::from(raw);
        if raw.ends_with(".part000") {
            Self::Split(path)
        } else if path.is_dir() {
            Self::Directory(path)
        } else {
            Self::Tarball(path)
        }
    }
}

/// User-selected deploy options
#[derive(Debug, Clone, Default)]
pub struct DeployOptions {
    pub set_variables: BTreeMap<String, String>,
    pub requested_components: Vec<String>,
    pub public_key_path: Option<PathBuf>,
    pub adopt_existing_resources: bool,
}

/// Outcome handed back to the command layer
#[derive(Debug, Default)]
pub struct DeployResult {
    pub connect_strings: ConnectStrings,
    pub deployed_components: Vec<String>,
}

/// Package deployment driver
pub struct Deployer<'a> {
    ctx: &'a EngineContext,
    cluster: Option<&'a Cluster>,
    helm: &'a dyn HelmClient,
    images: &'a dyn ImageClient,
    git: &'a dyn GitClient,
}

impl<'a> Deployer<'a> {
    pub fn new(
        ctx: &'a EngineContext,
        cluster: Option<&'a Cluster>,
        helm: &'a dyn HelmClient,
        images: &'a dyn ImageClient,
        git: &'a dyn GitClient,
    ) -> Self {
        Self {
            ctx,
            cluster,
            helm,
            images,
            git,
        }
    }

    /// Load, verify, and migrate a package into `staging`.
    pub fn load(
        &self,
        source: &PackageSource,
        staging: &Path,
        options: &DeployOptions,
    ) -> Result<(ZarfPackage, PackagePaths)> {
        let mut partial = false;
        let paths = match source {
            PackageSource::Tarball(path) => {
                archive::extract_archive(path, staging)?;
                PackagePaths::new(staging)
            }
            PackageSource::Split(part000) => {
                let tarball = archive::reassemble_split(part000, staging)?;
                let extract_dir = staging.join("package");
                archive::extract_archive(&tarball, &extract_dir)?;
                std::fs::remove_file(&tarball)?;
                PackagePaths::new(extract_dir)
            }
            PackageSource::OciUrl(url) => {
                partial = !options.requested_components.is_empty();
                let reference = Reference::parse(url)?;
                let remote = OrasRemote::new(
                    reference,
                    self.ctx.options.insecure,
                    self.ctx.oci_concurrency(),
                )?;
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .context("Failed to start transport runtime")?;
                runtime.block_on(
                    remote.pull_package(staging, &options.requested_components),
                )?;
                PackagePaths::new(staging)
            }
            PackageSource::Directory(path) => PackagePaths::new(path.clone()),
        };

        paths
            .verify_with(options.public_key_path.as_deref(), partial)
            .context("package verification failed")?;

        let mut package = paths.read_package()?;
        check_build_compatibility(&package)?;

        // migrations come before any further processing
        let mut components = Vec::with_capacity(package.components.len());
        for component in package.components.drain(..) {
            let (migrated, warnings) = deprecated::migrate_component(component);
            for warning in warnings {
                warn!("{warning}");
            }
            components.push(migrated);
        }
        package.components = components;

        Ok((package, paths))
    }

    /// Deploy the selected components in manifest order.
    pub fn deploy(
        &self,
        package: &ZarfPackage,
        paths: &PackagePaths,
        options: &DeployOptions,
    ) -> Result<DeployResult> {
        let selection = self.resolve_selection(package, &options.requested_components)?;
        if selection.is_empty() {
            return Err(Error::validation("no components were selected for deploy").into());
        }

        let mut variables = self.resolve_variables(package, &options.set_variables)?;
        let mut state = self.prepare_state(package)?;

        let mut record = self.initial_record(package)?;
        let mut result = DeployResult::default();

        for component in &selection {
            self.ctx.cancel.check()?;
            info!(component = %component.name, "deploying component");

            let connect_strings = self
                .deploy_component(package, paths, component, &mut variables, &mut state, options)
                .with_context(|| format!("failed to deploy component {:?}", component.name))?;

            result.connect_strings.extend(connect_strings.clone());
            result.deployed_components.push(component.name.clone());

            record
                .deployed_components
                .insert(component.name.clone(), self.component_record(component));
            record.connect_strings.extend(connect_strings);
            if let Some(cluster) = self.cluster {
                cluster.record_package(&record)?;
            }
        }

        Ok(result)
    }

    /// required ∪ default ∪ requested, with group defaults, `only` filters,
    /// and interactive prompting for the rest.
    fn resolve_selection(
        &self,
        package: &ZarfPackage,
        requested: &[String],
    ) -> Result<Vec<ZarfComponent>> {
        for name in requested {
            if !package.components.iter().any(|c| &c.name == name) {
                return Err(Error::validation(format!(
                    "requested component {name:?} does not exist in the package"
                ))
                .into());
            }
        }

        let mut selection = Vec::new();
        let mut chosen_groups: BTreeMap<String, String> = BTreeMap::new();

        for component in &package.components {
            if !self.component_allowed_here(package, component)? {
                debug!(component = %component.name, "filtered by only{{}} rules");
                continue;
            }

            let requested_explicitly = requested.iter().any(|name| name == &component.name);
            let mut include = component.required || component.default || requested_explicitly;

            if !component.group.is_empty() {
                // one component per group; the default or the requested one
                if let Some(winner) = chosen_groups.get(&component.group) {
                    if requested_explicitly {
                        return Err(Error::validation(format!(
                            "cannot select {:?}: component {winner:?} from group {:?} was already selected",
                            component.name, component.group
                        ))
                        .into());
                    }
                    include = false;
                } else if include {
                    chosen_groups.insert(component.group.clone(), component.name.clone());
                }
            } else if !include && !self.ctx.options.confirm {
                include = prompt_yes_no(&format!(
                    "Deploy the optional component {:?}?",
                    component.name
                ))?;
            }

            if include {
                selection.push(component.clone());
            }
        }
        Ok(selection)
    }

    fn component_allowed_here(
        &self,
        package: &ZarfPackage,
        component: &ZarfComponent,
    ) -> Result<bool> {
        let only = &component.only;
        if !only.local_os.is_empty() && only.local_os != std::env::consts::OS {
            return Ok(false);
        }
        if package.metadata.yolo {
            return Ok(true);
        }
        if let Some(cluster) = self.cluster {
            if !only.cluster.architecture.is_empty() {
                if let Err(err) = cluster.check_architecture(&only.cluster.architecture) {
                    debug!("{err:#}");
                    return Ok(false);
                }
            }
            if !only.cluster.distros.is_empty() {
                let distro = cluster.client().detect_distro()?;
                if !only.cluster.distros.iter().any(|d| d == &distro) {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// Merge `--set` values, environment overrides, and declared variables,
    /// prompting where the author asked for it.
    fn resolve_variables(
        &self,
        package: &ZarfPackage,
        set_variables: &BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, SetVariable>> {
        let mut merged = self.ctx.config.variable_overrides(VAR_ENV_PREFIX);
        for (key, value) in set_variables {
            merged.insert(key.to_uppercase(), value.clone());
        }

        let mut variables = BTreeMap::new();
        for (name, value) in &merged {
            variables.insert(
                name.clone(),
                SetVariable {
                    name: name.clone(),
                    value: value.clone(),
                    ..Default::default()
                },
            );
        }

        for declared in &package.variables {
            if let Some(existing) = variables.get_mut(&declared.name) {
                existing.sensitive = declared.sensitive;
                existing.auto_indent = declared.auto_indent;
                existing.variable_type = declared.variable_type;
                continue;
            }
            let value = if declared.prompt && !self.ctx.options.confirm {
                prompt_for_variable(&declared.name, declared.default.as_deref())?
            } else {
                declared.default.clone().unwrap_or_default()
            };
            variables.insert(
                declared.name.clone(),
                SetVariable::from_variable(declared, value),
            );
        }
        Ok(variables)
    }

    /// Load existing state, or initialize it for init packages.
    fn prepare_state(&self, package: &ZarfPackage) -> Result<Option<ZarfState>> {
        let Some(cluster) = self.cluster else {
            if package.metadata.yolo {
                return Ok(None);
            }
            return Err(Error::cluster_unreachable(
                "deploying this package requires a cluster connection",
            )
            .into());
        };

        cluster.wait_for_healthy(crate::cluster::DEFAULT_CLUSTER_WAIT)?;

        if let Some(state) = cluster.load_state()? {
            return Ok(Some(state));
        }
        if !package.is_init_config() {
            return Err(Error::cluster(
                "the cluster has no zarf-state secret; run `zarf init` against it first",
            )
            .into());
        }

        info!("initializing cluster state");
        let client = cluster.client();
        let mut state = ZarfState {
            distro: client.detect_distro()?,
            architecture: client
                .node_architectures()?
                .first()
                .cloned()
                .unwrap_or_else(|| self.ctx.architecture.clone()),
            storage_class: client.default_storage_class()?,
            ..Default::default()
        };
        state.zarf_appliance = crate::cluster::is_appliance_distro(&state.distro);
        state.registry_info.fill_in_empty_values();
        state.git_server.fill_in_empty_values();
        state.artifact_server.fill_in_empty_values();

        cluster.ensure_zarf_namespace()?;
        cluster.save_state(&state)?;
        Ok(Some(state))
    }

    fn initial_record(&self, package: &ZarfPackage) -> Result<DeployedPackage> {
        if let Some(cluster) = self.cluster {
            if let Some(existing) = cluster.get_deployed_package(&package.metadata.name)? {
                return Ok(DeployedPackage {
                    data: package.clone(),
                    cli_version: CLI_VERSION.to_string(),
                    ..existing
                });
            }
        }
        Ok(DeployedPackage {
            name: package.metadata.name.clone(),
            data: package.clone(),
            cli_version: CLI_VERSION.to_string(),
            ..Default::default()
        })
    }

    fn component_record(&self, component: &ZarfComponent) -> DeployedComponent {
        DeployedComponent {
            installed_charts: component
                .charts
                .iter()
                .map(|chart| InstalledChart {
                    namespace: chart.namespace.clone(),
                    chart_name: chart.release_name().to_string(),
                })
                .chain(component.manifests.iter().map(|manifest| InstalledChart {
                    namespace: if manifest.namespace.is_empty() {
                        "default".to_string()
                    } else {
                        manifest.namespace.clone()
                    },
                    chart_name: manifest.name.clone(),
                }))
                .collect(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn deploy_component(
        &self,
        package: &ZarfPackage,
        paths: &PackagePaths,
        component: &ZarfComponent,
        variables: &mut BTreeMap<String, SetVariable>,
        state: &mut Option<ZarfState>,
        options: &DeployOptions,
    ) -> Result<ConnectStrings> {
        let component_paths = paths.component_paths(&component.name);
        let tarball = paths.component_tarball(&component.name);
        if tarball.exists() {
            archive::extract_component(&tarball, &paths.components_dir())?;
        }

        // the injector replaces a normal deploy for its component
        if package.is_init_config() && component.name == "zarf-injector" {
            if let (Some(cluster), Some(state)) = (self.cluster, state.as_ref()) {
                if state.registry_info.internal_registry {
                    injector::run_injection(cluster, &component_paths, state)?;
                } else {
                    info!("external registry configured, skipping the injector");
                }
            }
            return Ok(ConnectStrings::new());
        }

        let template_map = template::deploy_time_map(package, variables, state.as_ref());
        let mut connect_strings = ConnectStrings::new();

        let waiter = self.cluster.map(|c| c as &dyn crate::actions::ClusterWaiter);
        let mut runner =
            crate::actions::ActionRunner::new(variables, waiter, self.ctx.cancel.clone());

        runner.with_lifecycle(&component.actions.on_deploy, |_| {
            self.process_files(component, &component_paths, &template_map)?;

            for chart in &component.charts {
                let release = self.install_chart(chart, &component_paths, &template_map, options)?;
                connect_strings.extend(release.connect_strings);
            }

            for manifest in &component.manifests {
                let release =
                    self.install_manifest(manifest, &component_paths, &template_map, options)?;
                connect_strings.extend(release.connect_strings);
            }

            if !component.images.is_empty() {
                self.push_images(paths, component, state.as_ref())?;
            }

            if !component.repos.is_empty() {
                self.push_repos(&component_paths, component, state.as_ref())?;
            }

            for injection in &component.data_injections {
                self.inject_data(&component_paths, injection)?;
            }
            Ok(())
        })?;

        // seeding done: move the registry from the bootstrap pod to the real
        // chart and tear the injector down
        if package.is_init_config() && component.name == "zarf-seed-registry" {
            if let (Some(cluster), Some(state)) = (self.cluster, state.as_mut()) {
                if state.registry_info.internal_registry {
                    injector::finish_seeding(cluster, state)?;
                }
            }
        }

        Ok(connect_strings)
    }

    fn process_files(
        &self,
        component: &ZarfComponent,
        component_paths: &crate::layout::ComponentPaths,
        template_map: &TemplateMap,
    ) -> Result<()> {
        for (index, file) in component.files.iter().enumerate() {
            let name = Path::new(&file.source)
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| format!("file-{index}"));
            let source = component_paths.files.join(index.to_string()).join(&name);

            // text files get templated in place; binaries are left alone
            if std::fs::read_to_string(&source).is_ok() {
                template::apply_to_file(&source, template_map)?;
            }

            let target = file.target.replace(
                TEMP_PLACEHOLDER,
                &component_paths.temp.to_string_lossy(),
            );
            let target = PathBuf::from(target);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(&source, &target)
                .with_context(|| format!("Failed to place file {}", target.display()))?;

            #[cfg(unix)]
            if file.executable {
                use std::os::unix::fs::PermissionsExt;
                let mut perms = std::fs::metadata(&target)?.permissions();
                perms.set_mode(perms.mode() | 0o111);
                std::fs::set_permissions(&target, perms)?;
            }

            #[cfg(unix)]
            for link in &file.symlinks {
                let link = PathBuf::from(link);
                if let Some(parent) = link.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let _ = std::fs::remove_file(&link);
                std::os::unix::fs::symlink(&target, &link)
                    .with_context(|| format!("Failed to link {}", link.display()))?;
            }
        }
        Ok(())
    }

    fn install_chart(
        &self,
        chart: &crate::types::ZarfChart,
        component_paths: &crate::layout::ComponentPaths,
        template_map: &TemplateMap,
        options: &DeployOptions,
    ) -> Result<crate::external::HelmReleaseResult> {
        let chart_path = find_chart_tgz(&component_paths.charts, &chart.name)?;

        let mut values_files = Vec::new();
        for (index, _) in chart.values_files.iter().enumerate() {
            let values = component_paths
                .values
                .join(format!("{}-{index}", chart.name));
            template::apply_to_file(&values, template_map)?;
            values_files.push(values);
        }

        self.helm
            .install_or_upgrade(&HelmReleaseOptions {
                release_name: chart.release_name().to_string(),
                namespace: chart.namespace.clone(),
                chart_path,
                values_files,
                manifest_files: Vec::new(),
                no_wait: chart.no_wait,
                adopt_existing: options.adopt_existing_resources,
            })
            .with_context(|| format!("Failed to install chart {}", chart.name))
    }

    fn install_manifest(
        &self,
        manifest: &crate::types::ZarfManifest,
        component_paths: &crate::layout::ComponentPaths,
        template_map: &TemplateMap,
        options: &DeployOptions,
    ) -> Result<crate::external::HelmReleaseResult> {
        let mut manifest_files = Vec::new();
        let mut entries: Vec<PathBuf> = std::fs::read_dir(&component_paths.manifests)
            .with_context(|| {
                format!(
                    "component has no manifests directory: {}",
                    component_paths.manifests.display()
                )
            })?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .collect();
        entries.sort();
        for path in entries {
            let name = path.file_name().unwrap_or_default().to_string_lossy();
            if name.starts_with(&format!("{}-", manifest.name))
                || name.starts_with(&format!("kustomization-{}-", manifest.name))
            {
                template::apply_to_file(&path, template_map)?;
                manifest_files.push(path);
            }
        }

        // rendered through a synthetic chart so tracking stays uniform
        self.helm
            .install_or_upgrade(&HelmReleaseOptions {
                release_name: manifest.name.clone(),
                namespace: if manifest.namespace.is_empty() {
                    "default".to_string()
                } else {
                    manifest.namespace.clone()
                },
                chart_path: PathBuf::new(),
                values_files: Vec::new(),
                manifest_files,
                no_wait: manifest.no_wait,
                adopt_existing: options.adopt_existing_resources,
            })
            .with_context(|| format!("Failed to apply manifest {}", manifest.name))
    }

    /// Push a component's images to the mirror, tunneling when the registry
    /// lives in-cluster.
    fn push_images(
        &self,
        paths: &PackagePaths,
        component: &ZarfComponent,
        state: Option<&ZarfState>,
    ) -> Result<()> {
        let Some(state) = state else {
            return Err(Error::cluster("image push requires cluster state").into());
        };
        let registry = &state.registry_info;

        let mut tunnel = None;
        let (push_address, insecure) = if registry.internal_registry {
            let cluster = self
                .cluster
                .ok_or_else(|| Error::cluster("image push requires a cluster connection"))?;
            let opened = cluster.registry_tunnel(registry.node_port)?;
            let address = opened.local_address();
            tunnel = Some(opened);
            (address, true)
        } else {
            (registry.address.clone(), self.ctx.options.insecure)
        };

        for image in &component.images {
            self.ctx.cancel.check()?;
            let target = transform::image_transform_host(&push_address, image)?;
            info!(source = %image, target = %target, "pushing image");
            retry::with_retry("image push", &self.ctx.cancel, || {
                self.images
                    .push(&paths.images_dir(), image, &target, insecure)
            })?;
        }

        if let Some(mut tunnel) = tunnel {
            tunnel.close();
        }
        Ok(())
    }

    /// Push a component's repo mirrors to the git server.
    fn push_repos(
        &self,
        component_paths: &crate::layout::ComponentPaths,
        component: &ZarfComponent,
        state: Option<&ZarfState>,
    ) -> Result<()> {
        let Some(state) = state else {
            return Err(Error::cluster("repo push requires cluster state").into());
        };
        let git_server = &state.git_server;

        let mut tunnel = None;
        let base_url = if git_server.internal_server {
            let cluster = self
                .cluster
                .ok_or_else(|| Error::cluster("repo push requires a cluster connection"))?;
            let opened = cluster.git_tunnel()?;
            let address = format!("http://{}", opened.local_address());
            tunnel = Some(opened);
            address
        } else {
            git_server.address.clone()
        };

        for repo in &component.repos {
            self.ctx.cancel.check()?;
            let folder = transform::git_url_to_repo_name(repo)?;
            let repo_dir = component_paths.repos.join(&folder);
            let target = transform::git_url(&base_url, repo, &git_server.push_username)?;
            info!(source = %repo, target = %target, "pushing repo mirror");
            retry::with_retry("repo push", &self.ctx.cancel, || {
                self.git.push_all(
                    &repo_dir,
                    &target,
                    &git_server.push_username,
                    &git_server.push_password,
                )
            })?;
        }

        if let Some(mut tunnel) = tunnel {
            tunnel.close();
        }
        Ok(())
    }

    /// Wait for the target pods and stream the injection in via exec'd tar.
    fn inject_data(
        &self,
        component_paths: &crate::layout::ComponentPaths,
        injection: &crate::types::DataInjection,
    ) -> Result<()> {
        let cluster = self
            .cluster
            .ok_or_else(|| Error::cluster("data injections require a cluster connection"))?;
        let target = &injection.target;

        let source = component_paths
            .data_injections
            .join(Path::new(&injection.source).file_name().unwrap_or_default());
        let marker = format!("{}{}", template::DATA_INJECTION_MARKER, "complete");

        let mut payload = tar_directory(&source)?;
        let mut marker_payload = tar_marker_file(&marker)?;
        if injection.compress {
            payload = gzip(&payload)?;
            marker_payload = gzip(&marker_payload)?;
        }
        let tar_flags = if injection.compress { "-xzf" } else { "-xf" };

        let pods = cluster.wait_for_pods(
            &target.namespace,
            &target.selector,
            DEFAULT_POD_WAIT,
            |pod| pod.json.to_string().contains(template::DATA_INJECTION_MARKER),
        )?;

        for pod in &pods {
            info!(pod = %pod.name, path = %target.path, "injecting data");
            cluster.client().exec_in_pod(
                &target.namespace,
                &pod.name,
                &target.container,
                &[
                    "tar".to_string(),
                    tar_flags.to_string(),
                    "-".to_string(),
                    "-C".to_string(),
                    target.path.clone(),
                ],
                Some(&payload),
            )?;
            // marker file tells the workload the sync finished
            cluster.client().exec_in_pod(
                &target.namespace,
                &pod.name,
                &target.container,
                &[
                    "tar".to_string(),
                    tar_flags.to_string(),
                    "-".to_string(),
                    "-C".to_string(),
                    target.path.clone(),
                ],
                Some(&marker_payload),
            )?;
        }

        // reduce disk pressure once the injection landed
        let _ = std::fs::remove_dir_all(&source);
        Ok(())
    }
}

fn find_chart_tgz(charts_dir: &Path, chart_name: &str) -> Result<PathBuf> {
    let mut entries: Vec<PathBuf> = std::fs::read_dir(charts_dir)
        .with_context(|| format!("component has no charts directory: {}", charts_dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect();
    entries.sort();
    entries
        .into_iter()
        .find(|path| {
            path.file_name()
                .map(|n| n.to_string_lossy().starts_with(chart_name))
                .unwrap_or(false)
        })
        .ok_or_else(|| {
            Error::resource(format!(
                "chart {chart_name:?} was not found in {}",
                charts_dir.display()
            ))
            .into()
        })
}

fn tar_directory(dir: &Path) -> Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    if dir.is_dir() {
        builder.append_dir_all(".", dir)?;
    } else if dir.is_file() {
        let mut file = std::fs::File::open(dir)?;
        builder.append_file(
            dir.file_name().unwrap_or_default().to_string_lossy().as_ref(),
            &mut file,
        )?;
    } else {
        return Err(Error::resource(format!(
            "data injection source {} does not exist",
            dir.display()
        ))
        .into());
    }
    Ok(builder.into_inner()?)
}

fn gzip(data: &[u8]) -> Result<Vec<u8>> {
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write as _;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn tar_marker_file(marker: &str) -> Result<Vec<u8>> {
    let mut header = tar::Header::new_gnu();
    header.set_size(0);
    header.set_mode(0o644);
    header.set_cksum();
    let mut builder = tar::Builder::new(Vec::new());
    builder.append_data(&mut header, marker, std::io::empty())?;
    Ok(builder.into_inner()?)
}

fn prompt_yes_no(question: &str) -> Result<bool> {
    print!("{question} [y/N] ");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(matches!(line.trim(), "y" | "Y" | "yes"))
}

fn prompt_for_variable(name: &str, default: Option<&str>) -> Result<String> {
    match default {
        Some(default) => print!("Provide a value for {name} [{default}]: "),
        None => print!("Provide a value for {name}: "),
    }
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    let value = line.trim_end_matches('\n');
    if value.is_empty() {
        Ok(default.unwrap_or_default().to_string())
    } else {
        Ok(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::fake::FakeClusterClient;
    use crate::config::{CancelToken, CommonOptions, EngineConfig};
    use crate::external::fakes::{FakeGit, FakeHelm, FakeImages};
    use std::sync::Arc;

    struct Fixture {
        ctx: EngineContext,
        helm: FakeHelm,
        images: FakeImages,
        git: FakeGit,
        client: Arc<FakeClusterClient>,
        cluster: Cluster,
    }

    impl Fixture {
        fn new() -> Self {
            let ctx = EngineContext::new(EngineConfig::default())
                .with_options(CommonOptions {
                    confirm: true,
                    ..Default::default()
                })
                .with_architecture("amd64");
            let client = Arc::new(FakeClusterClient::new());
            let cluster = Cluster::new(client.clone(), CancelToken::new());
            Self {
                ctx,
                helm: FakeHelm::default(),
                images: FakeImages::default(),
                git: FakeGit::default(),
                client,
                cluster,
            }
        }

        fn deployer(&self) -> Deployer<'_> {
            Deployer::new(
                &self.ctx,
                Some(&self.cluster),
                &self.helm,
                &self.images,
                &self.git,
            )
        }

        fn seed_state(&self) {
            let mut state = ZarfState {
                distro: "kind".to_string(),
                architecture: "amd64".to_string(),
                ..Default::default()
            };
            state.registry_info.fill_in_empty_values();
            state.git_server.fill_in_empty_values();
            self.cluster.save_state(&state).unwrap();
        }
    }

    fn staged_package(yaml: &str) -> (tempfile::TempDir, PackagePaths, ZarfPackage) {
        let dir = tempfile::tempdir().unwrap();
        let paths = PackagePaths::new(dir.path());
        std::fs::write(paths.zarf_yaml(), yaml).unwrap();
        std::fs::create_dir_all(paths.components_dir()).unwrap();
        let package = paths.read_package().unwrap();
        (dir, paths, package)
    }

    #[test]
    fn test_source_identification() {
        assert_eq!(
            PackageSource::identify("oci://ghcr.io/x/y:1.0.0"),
            PackageSource::OciUrl("oci://ghcr.io/x/y:1.0.0".to_string())
        );
        assert_eq!(
            PackageSource::identify("pkg.tar.zst.part000"),
            PackageSource::Split(PathBuf::from("pkg.tar.zst.part000"))
        );
        assert_eq!(
            PackageSource::identify("pkg.tar.zst"),
            PackageSource::Tarball(PathBuf::from("pkg.tar.zst"))
        );
    }

    #[test]
    fn test_selection_rules() {
        let fixture = Fixture::new();
        let yaml = r#"kind: ZarfPackageConfig
metadata:
  name: sel
components:
  - name: always
    required: true
  - name: preselected
    default: true
  - name: optional
  - name: asked-for
"#;
        let (_dir, _paths, package) = staged_package(yaml);
        let selection = fixture
            .deployer()
            .resolve_selection(&package, &["asked-for".to_string()])
            .unwrap();
        let names: Vec<&str> = selection.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["always", "preselected", "asked-for"]);
    }

    #[test]
    fn test_selection_unknown_component_rejected() {
        let fixture = Fixture::new();
        let (_dir, _paths, package) = staged_package(
            "kind: ZarfPackageConfig\nmetadata:\n  name: sel\ncomponents:\n  - name: c\n",
        );
        let err = fixture
            .deployer()
            .resolve_selection(&package, &["nope".to_string()])
            .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn test_selection_group_default() {
        let fixture = Fixture::new();
        let yaml = r#"kind: ZarfPackageConfig
metadata:
  name: groups
components:
  - name: k3s
    group: distro
    default: true
  - name: k3d
    group: distro
"#;
        let (_dir, _paths, package) = staged_package(yaml);
        let selection = fixture.deployer().resolve_selection(&package, &[]).unwrap();
        let names: Vec<&str> = selection.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["k3s"]);
    }

    #[test]
    fn test_only_local_os_filter() {
        let fixture = Fixture::new();
        let yaml = r#"kind: ZarfPackageConfig
metadata:
  name: os
components:
  - name: windows-only
    required: true
    only:
      localOS: windows
  - name: everywhere
    required: true
"#;
        let (_dir, _paths, package) = staged_package(yaml);
        let selection = fixture.deployer().resolve_selection(&package, &[]).unwrap();
        let names: Vec<&str> = selection.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["everywhere"]);
    }

    #[test]
    fn test_deploy_component_order_and_record() {
        let fixture = Fixture::new();
        fixture.seed_state();

        let yaml = r#"kind: ZarfPackageConfig
metadata:
  name: order
components:
  - name: app
    required: true
    charts:
      - name: podinfo
        url: https://example.com/charts
        version: 6.4.0
        namespace: podinfo
    images: [nginx:1.25]
    repos: [https://github.com/x/y.git]
"#;
        let (_dir, paths, package) = staged_package(yaml);

        // stage what the creator would have produced
        let component_paths = paths.component_paths("app");
        component_paths.ensure().unwrap();
        std::fs::write(
            component_paths.charts.join("podinfo-6.4.0.tgz"),
            b"chart",
        )
        .unwrap();
        let repo_dir = component_paths
            .repos
            .join(transform::git_url_to_repo_name("https://github.com/x/y.git").unwrap());
        std::fs::create_dir_all(&repo_dir).unwrap();

        let result = fixture
            .deployer()
            .deploy(&package, &paths, &DeployOptions::default())
            .unwrap();
        assert_eq!(result.deployed_components, vec!["app"]);

        // chart installed
        assert_eq!(fixture.helm.releases.lock().unwrap().len(), 1);
        // image pushed through the internal-registry tunnel with a crc tag
        let pushed = fixture.images.pushed.lock().unwrap();
        assert_eq!(pushed.len(), 1);
        assert!(pushed[0].1.contains("-zarf-"), "{}", pushed[0].1);
        // repo pushed to the tunneled git server
        assert_eq!(fixture.git.pushed.lock().unwrap().len(), 1);

        // deployed-package secret records the component and chart
        let record = fixture
            .cluster
            .get_deployed_package("order")
            .unwrap()
            .unwrap();
        assert!(record.deployed_components.contains_key("app"));
        assert_eq!(
            record.deployed_components["app"].installed_charts[0].chart_name,
            "podinfo"
        );
    }

    #[test]
    fn test_deploy_requires_state_for_non_init() {
        let fixture = Fixture::new();
        let (_dir, paths, package) = staged_package(
            "kind: ZarfPackageConfig\nmetadata:\n  name: lost\ncomponents:\n  - name: c\n    required: true\n",
        );
        let err = fixture
            .deployer()
            .deploy(&package, &paths, &DeployOptions::default())
            .unwrap_err();
        assert!(format!("{err:#}").contains("zarf init"));
    }

    #[test]
    fn test_init_deploy_creates_state() {
        let fixture = Fixture::new();
        let (_dir, paths, package) = staged_package(
            "kind: ZarfInitConfig\nmetadata:\n  name: init\ncomponents:\n  - name: c\n    required: true\n",
        );
        fixture
            .deployer()
            .deploy(&package, &paths, &DeployOptions::default())
            .unwrap();
        let state = fixture.cluster.require_state().unwrap();
        assert_eq!(state.distro, "kind");
        assert!(state.registry_info.internal_registry);
        assert!(!state.registry_info.push_password.is_empty());
    }

    #[test]
    fn test_repo_push_retries() {
        let fixture = Fixture::new();
        fixture.seed_state();
        *fixture.git.fail_pushes.lock().unwrap() = 1;

        let yaml = r#"kind: ZarfPackageConfig
metadata:
  name: retry
components:
  - name: repos
    required: true
    repos: [https://github.com/x/y.git]
"#;
        let (_dir, paths, package) = staged_package(yaml);
        let component_paths = paths.component_paths("repos");
        component_paths.ensure().unwrap();
        let repo_dir = component_paths
            .repos
            .join(transform::git_url_to_repo_name("https://github.com/x/y.git").unwrap());
        std::fs::create_dir_all(&repo_dir).unwrap();

        fixture
            .deployer()
            .deploy(&package, &paths, &DeployOptions::default())
            .unwrap();
        assert_eq!(fixture.git.pushed.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_variable_resolution_defaults_and_flags() {
        let fixture = Fixture::new();
        let yaml = r#"kind: ZarfPackageConfig
metadata:
  name: vars
variables:
  - name: WITH_DEFAULT
    default: from-default
  - name: SENSITIVE_SET
    sensitive: true
components:
  - name: c
"#;
        let (_dir, _paths, package) = staged_package(yaml);
        let mut set = BTreeMap::new();
        set.insert("sensitive_set".to_string(), "secret".to_string());
        let variables = fixture
            .deployer()
            .resolve_variables(&package, &set)
            .unwrap();
        assert_eq!(variables["WITH_DEFAULT"].value, "from-default");
        assert_eq!(variables["SENSITIVE_SET"].value, "secret");
        assert!(variables["SENSITIVE_SET"].sensitive);
    }
}
