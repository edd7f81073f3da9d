// src/commands/mod.rs

//! Command implementations behind the CLI definitions

pub mod agent;
pub mod connect;
pub mod destroy;
pub mod init;
pub mod package;

use anyhow::Result;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::error;
use tracing_subscriber::EnvFilter;

use zarf::cluster::kubectl::KubectlClusterClient;
use zarf::cluster::Cluster;
use zarf::{exit_code_for, CommonOptions, EngineConfig, EngineContext};

/// Initialize tracing from `ZARF_LOG_LEVEL` / `ZARF_LOG_FORMAT`.
pub fn init_logging() {
    let level = std::env::var("ZARF_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let filter = EnvFilter::try_new(&level).unwrap_or_else(|_| EnvFilter::new("info"));

    match std::env::var("ZARF_LOG_FORMAT").as_deref() {
        Ok("json") => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .json()
                .init();
        }
        Ok("dev") => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .pretty()
                .init();
        }
        Ok("none") => {}
        _ => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
}

/// Build the engine context from config file, environment, and CLI flags.
pub fn build_context(
    confirm: bool,
    insecure: bool,
    strict: bool,
    architecture: Option<String>,
) -> Result<EngineContext> {
    let config = EngineConfig::load()?;
    let mut ctx = EngineContext::new(config).with_options(CommonOptions {
        confirm,
        insecure,
        strict,
    });
    if let Some(arch) = architecture {
        ctx = ctx.with_architecture(arch);
    }
    Ok(ctx)
}

/// Connect to the cluster the current kubeconfig points at.
pub fn connect_cluster(ctx: &EngineContext) -> Cluster {
    Cluster::new(Arc::new(KubectlClusterClient), ctx.cancel.clone())
}

/// Parse repeated `--set NAME=VALUE` flags.
pub fn parse_set_flags(flags: &[String]) -> Result<BTreeMap<String, String>> {
    let mut values = BTreeMap::new();
    for flag in flags {
        let (name, value) = flag
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("--set {flag:?} is not in NAME=VALUE form"))?;
        values.insert(name.to_string(), value.to_string());
    }
    Ok(values)
}

/// Report the error and exit with its mapped code.
pub fn fail(err: anyhow::Error) -> ! {
    error!("{err:#}");
    std::process::exit(exit_code_for(&err));
}
