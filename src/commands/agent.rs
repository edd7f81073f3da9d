// src/commands/agent.rs
//! Run the in-cluster mutating admission agent

use anyhow::{Context, Result};

use zarf::EngineContext;

use super::connect_cluster;

pub fn cmd_agent(ctx: &EngineContext) -> Result<()> {
    let cluster = connect_cluster(ctx);
    let state = cluster.require_state()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start agent runtime")?;
    runtime.block_on(zarf::agent::serve(state))
}
