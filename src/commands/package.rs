// src/commands/package.rs
//! Package lifecycle commands: create, deploy, inspect, publish, pull,
//! remove, list, lint

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use zarf::clients::{CraneCli, GitCli, HelmCli, SyftCli};
use zarf::creator::{CreateOptions, Creator};
use zarf::deployer::{remove::remove_package, DeployOptions, Deployer, PackageSource};
use zarf::layout::{archive, signing, PackagePaths};
use zarf::oci::pull::RemoteSkeletonFetcher;
use zarf::oci::{package_tag, OrasRemote, Reference, SKELETON_ARCH};
use zarf::validate::lint;
use zarf::EngineContext;

use super::{connect_cluster, parse_set_flags};

#[allow(clippy::too_many_arguments)]
pub fn cmd_create(
    ctx: &EngineContext,
    base_dir: &str,
    set: &[String],
    output: Option<&str>,
    max_package_size: u64,
    skip_sbom: bool,
    flavor: &str,
    signing_key: Option<&str>,
    differential: Option<&str>,
) -> Result<()> {
    let helm = HelmCli;
    let images = CraneCli;
    let git = GitCli;
    let sbom = SyftCli;
    let fetcher = RemoteSkeletonFetcher::new(ctx.options.insecure, ctx.oci_concurrency());

    let creator = Creator::new(ctx, &helm, &images, &git, &sbom, Some(&fetcher));
    let options = CreateOptions {
        set_variables: parse_set_flags(set)?,
        max_package_size_mb: max_package_size,
        skip_sbom,
        signing_key_path: signing_key.map(PathBuf::from),
        output_directory: output.map(PathBuf::from),
        flavor: flavor.to_string(),
        differential_package: differential.map(PathBuf::from),
    };

    let progress = zarf::progress::tracker(!ctx.options.confirm, "Assembling package");
    match creator.create(Path::new(base_dir), &options) {
        Ok(tarball) => {
            progress.finish_success(&format!("Package created: {}", tarball.display()));
            Ok(())
        }
        Err(err) => {
            progress.finish_error("Package creation failed");
            Err(err)
        }
    }
}

pub fn cmd_deploy(
    ctx: &EngineContext,
    package: &str,
    set: &[String],
    components: Option<&str>,
    key: Option<&str>,
    adopt_existing_resources: bool,
) -> Result<()> {
    let cluster = connect_cluster(ctx);
    let helm = HelmCli;
    let images = CraneCli;
    let git = GitCli;

    let deployer = Deployer::new(ctx, Some(&cluster), &helm, &images, &git);
    let options = DeployOptions {
        set_variables: parse_set_flags(set)?,
        requested_components: split_components(components),
        public_key_path: key.map(PathBuf::from),
        adopt_existing_resources,
    };

    let staging = tempfile::Builder::new()
        .prefix("zarf-deploy-")
        .tempdir_in(ctx.temp_directory())?;
    let source = PackageSource::identify(package);

    let progress = zarf::progress::tracker(false, "Loading package");
    let (loaded, paths) = deployer.load(&source, staging.path(), &options)?;
    progress.set_message("Deploying components");
    let result = deployer.deploy(&loaded, &paths, &options)?;
    progress.finish_success("Deployment complete");

    println!(
        "Deployed {} component(s) of {}",
        result.deployed_components.len(),
        loaded.metadata.name
    );
    print_connect_table(&result.connect_strings);

    if loaded.is_init_config() {
        print_credentials_table(&cluster)?;
    }
    Ok(())
}

pub fn cmd_inspect(ctx: &EngineContext, package: &str, key: Option<&str>) -> Result<()> {
    let helm = HelmCli;
    let images = CraneCli;
    let git = GitCli;
    let deployer = Deployer::new(ctx, None, &helm, &images, &git);

    let staging = tempfile::Builder::new()
        .prefix("zarf-inspect-")
        .tempdir_in(ctx.temp_directory())?;
    let options = DeployOptions {
        public_key_path: key.map(PathBuf::from),
        ..Default::default()
    };
    let source = PackageSource::identify(package);
    let (loaded, _paths) = deployer.load(&source, staging.path(), &options)?;
    print!("{}", loaded.to_yaml()?);
    Ok(())
}

pub fn cmd_publish(
    ctx: &EngineContext,
    package: &str,
    destination: &str,
    signing_key: Option<&str>,
) -> Result<()> {
    let source = Path::new(package);
    let staging = tempfile::Builder::new()
        .prefix("zarf-publish-")
        .tempdir_in(ctx.temp_directory())?;

    // a definition directory publishes as a skeleton; a built tarball
    // publishes as-is
    let (paths, loaded, arch) = if source.is_dir() {
        let helm = HelmCli;
        let images = CraneCli;
        let git = GitCli;
        let sbom = SyftCli;
        let creator = Creator::new(ctx, &helm, &images, &git, &sbom, None);
        let loaded = creator.create_skeleton(source, staging.path())?;
        let paths = PackagePaths::new(staging.path());
        if let Some(key) = signing_key {
            signing::sign_package(&paths, Path::new(key))?;
            paths.generate_checksums()?;
        }
        (paths, loaded, SKELETON_ARCH.to_string())
    } else {
        archive::extract_archive(source, staging.path())?;
        let paths = PackagePaths::new(staging.path());
        let loaded = paths.read_package()?;
        if let Some(key) = signing_key {
            signing::sign_package(&paths, Path::new(key))?;
            paths.generate_checksums()?;
        }
        let arch = loaded.architecture().to_string();
        (paths, loaded, arch)
    };

    let version = loaded.metadata.version.clone().unwrap_or_default();
    let repository = format!(
        "{}/{}",
        destination.trim_end_matches('/'),
        loaded.metadata.name
    );
    let reference =
        Reference::parse(&repository)?.with_tag(package_tag(&version, &arch));
    let remote = OrasRemote::new(reference, ctx.options.insecure, ctx.oci_concurrency())?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start transport runtime")?;
    runtime.block_on(remote.publish_package(&paths, &loaded, &arch))?;
    println!("Published {}", remote.reference.to_url());
    Ok(())
}

pub fn cmd_pull(ctx: &EngineContext, reference: &str, output: &str) -> Result<()> {
    let parsed = Reference::parse(reference)?;
    let remote = OrasRemote::new(parsed, ctx.options.insecure, ctx.oci_concurrency())?;

    let staging = tempfile::Builder::new()
        .prefix("zarf-pull-")
        .tempdir_in(ctx.temp_directory())?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start transport runtime")?;
    let package = runtime.block_on(remote.pull_package(staging.path(), &[]))?;

    let paths = PackagePaths::new(staging.path());
    paths.verify_checksums()?;

    let arch = package.architecture().to_string();
    let extension = if package.metadata.uncompressed {
        "tar"
    } else {
        "tar.zst"
    };
    std::fs::create_dir_all(output)?;
    let tarball =
        Path::new(output).join(format!("{}.{extension}", package.archive_stem(&arch)));
    archive::archive_package(&paths, &tarball, 0)?;
    println!("Pulled {}", tarball.display());
    Ok(())
}

pub fn cmd_remove(
    ctx: &EngineContext,
    package_name: &str,
    components: Option<&str>,
) -> Result<()> {
    let cluster = connect_cluster(ctx);
    let helm = HelmCli;
    remove_package(
        ctx,
        &cluster,
        &helm,
        package_name,
        &split_components(components),
    )
}

pub fn cmd_list(ctx: &EngineContext) -> Result<()> {
    let cluster = connect_cluster(ctx);
    let names = cluster.deployed_package_names()?;
    if names.is_empty() {
        println!("No packages are deployed to this cluster");
        return Ok(());
    }
    println!("{:<30} {:<12} COMPONENTS", "NAME", "VERSION");
    for name in names {
        if let Some(record) = cluster.get_deployed_package(&name)? {
            let components: Vec<String> =
                record.deployed_components.keys().cloned().collect();
            println!(
                "{:<30} {:<12} {}",
                record.name,
                record.data.metadata.version.as_deref().unwrap_or("-"),
                components.join(", ")
            );
        }
    }
    Ok(())
}

pub fn cmd_lint(_ctx: &EngineContext, base_dir: &str, set: &[String]) -> Result<()> {
    let package = zarf::ZarfPackage::from_file(&Path::new(base_dir).join("zarf.yaml"))?;
    let findings = lint::lint_package(&package, &parse_set_flags(set)?);
    if findings.is_empty() {
        println!("No lint findings");
        return Ok(());
    }
    let mut errors = 0;
    for finding in &findings {
        if finding.severity == lint::Severity::Error {
            errors += 1;
        }
        println!("{finding}");
    }
    if errors > 0 {
        anyhow::bail!("linting found {errors} error(s)");
    }
    Ok(())
}

fn split_components(raw: Option<&str>) -> Vec<String> {
    raw.map(|value| {
        value
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
    .unwrap_or_default()
}

fn print_connect_table(connect: &zarf::types::state::ConnectStrings) {
    if connect.is_empty() {
        return;
    }
    println!("\n{:<20} {:<40} DESCRIPTION", "CONNECT", "URL");
    for (name, string) in connect {
        println!(
            "{:<20} {:<40} {}",
            format!("zarf connect {name}"),
            string.url,
            string.description
        );
    }
}

fn print_credentials_table(cluster: &zarf::cluster::Cluster) -> Result<()> {
    let state = cluster.require_state()?;
    println!("\n{:<20} {:<20} {:<20} CONNECT", "APPLICATION", "USERNAME", "PASSWORD");
    if state.registry_info.internal_registry {
        println!(
            "{:<20} {:<20} {:<20} zarf connect registry",
            "Registry", state.registry_info.push_username, state.registry_info.push_password
        );
    }
    if state.git_server.internal_server {
        println!(
            "{:<20} {:<20} {:<20} zarf connect git",
            "Git", state.git_server.push_username, state.git_server.push_password
        );
        println!(
            "{:<20} {:<20} {:<20} zarf connect git",
            "Git (read-only)",
            state.git_server.pull_username,
            state.git_server.pull_password
        );
    }
    Ok(())
}
