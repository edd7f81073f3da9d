// src/commands/init.rs
//! Cluster bootstrap: find and deploy the init package

use anyhow::Result;
use std::path::PathBuf;
use tracing::info;

use zarf::clients::{CraneCli, GitCli, HelmCli};
use zarf::deployer::{DeployOptions, Deployer, PackageSource};
use zarf::Error;
use zarf::EngineContext;

use super::{connect_cluster, parse_set_flags};

pub fn cmd_init(
    ctx: &EngineContext,
    package: Option<&str>,
    set: &[String],
    components: Option<&str>,
    registry_url: Option<&str>,
    storage_class: Option<&str>,
) -> Result<()> {
    let package_path = match package {
        Some(path) => PathBuf::from(path),
        None => find_init_package(ctx)?,
    };
    info!(package = %package_path.display(), "using init package");

    let cluster = connect_cluster(ctx);

    // external registry and storage class ride in as variables the init
    // components template against
    let mut set_variables = parse_set_flags(set)?;
    if let Some(url) = registry_url {
        set_variables.insert("REGISTRY_URL".to_string(), url.to_string());
    }
    if let Some(class) = storage_class {
        set_variables.insert("STORAGE_CLASS".to_string(), class.to_string());
    }

    let helm = HelmCli;
    let images = CraneCli;
    let git = GitCli;
    let deployer = Deployer::new(ctx, Some(&cluster), &helm, &images, &git);

    let options = DeployOptions {
        set_variables,
        requested_components: components
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default(),
        ..Default::default()
    };

    let staging = tempfile::Builder::new()
        .prefix("zarf-init-")
        .tempdir_in(ctx.temp_directory())?;
    let source = PackageSource::identify(&package_path.to_string_lossy());
    let (loaded, paths) = deployer.load(&source, staging.path(), &options)?;

    if !loaded.is_init_config() {
        return Err(Error::validation(format!(
            "{} is not an init package",
            package_path.display()
        ))
        .into());
    }

    deployer.deploy(&loaded, &paths, &options)?;
    println!("Cluster initialized; workloads will now resolve to the mirror");
    Ok(())
}

/// Look beside the binary, in the working directory, then in the cache for
/// `zarf-init-<arch>-*.tar.zst`.
fn find_init_package(ctx: &EngineContext) -> Result<PathBuf> {
    let prefix = format!("zarf-init-{}-", ctx.architecture);
    let mut candidates: Vec<PathBuf> = Vec::new();

    let mut search_dirs = vec![PathBuf::from(".")];
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            search_dirs.push(dir.to_path_buf());
        }
    }
    search_dirs.push(ctx.cache_directory());

    for dir in search_dirs {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with(&prefix) && name.ends_with(".tar.zst") {
                candidates.push(entry.path());
            }
        }
        if !candidates.is_empty() {
            break;
        }
    }

    candidates.sort();
    candidates.pop().ok_or_else(|| {
        Error::validation(format!(
            "no init package found for {}; pass --package or place \
             {prefix}<version>.tar.zst next to the binary",
            ctx.architecture
        ))
        .into()
    })
}
