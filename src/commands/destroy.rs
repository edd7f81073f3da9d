// src/commands/destroy.rs
//! Tear the engine's footprint out of a cluster

use anyhow::Result;
use tracing::{info, warn};

use zarf::clients::HelmCli;
use zarf::cluster::ZARF_NAMESPACE;
use zarf::deployer::remove::remove_package;
use zarf::Error;
use zarf::EngineContext;

use super::connect_cluster;

pub fn cmd_destroy(ctx: &EngineContext, confirm_destroy: bool) -> Result<()> {
    if !confirm_destroy {
        return Err(Error::validation(
            "destroy removes every deployed package and the zarf namespace; \
             re-run with --confirm-destroy to proceed",
        )
        .into());
    }

    let cluster = connect_cluster(ctx);
    let helm = HelmCli;

    for name in cluster.deployed_package_names()? {
        info!(package = %name, "removing deployed package");
        if let Err(err) = remove_package(ctx, &cluster, &helm, &name, &[]) {
            warn!(package = %name, "package removal failed, continuing: {err:#}");
        }
    }

    cluster
        .client()
        .delete_resource("namespace", "", ZARF_NAMESPACE)?;
    println!("Cluster footprint removed; the state secret is gone");
    Ok(())
}
