// src/commands/connect.rs
//! Open a named port-forward into the cluster

use anyhow::Result;

use zarf::cluster::ConnectTarget;
use zarf::Error;
use zarf::EngineContext;

use super::connect_cluster;

pub fn cmd_connect(ctx: &EngineContext, name: &str) -> Result<()> {
    let cluster = connect_cluster(ctx);
    let state = cluster.require_state()?;

    // registry and git are built-in targets; anything else comes from
    // service annotations left by deployed charts
    let target = match name {
        "registry" => ConnectTarget {
            namespace: zarf::cluster::ZARF_NAMESPACE.to_string(),
            service: "zarf-docker-registry".to_string(),
            port: state.registry_info.node_port,
            url: String::new(),
        },
        "git" => ConnectTarget {
            namespace: zarf::cluster::ZARF_NAMESPACE.to_string(),
            service: "zarf-gitea-http".to_string(),
            port: 3000,
            url: String::new(),
        },
        other => cluster
            .client()
            .find_connect_service(other)?
            .ok_or_else(|| {
                Error::validation(format!(
                    "no service carries the connect name {other:?}; \
                     run `zarf package list` to see what is deployed"
                ))
            })?,
    };

    let tunnel = cluster
        .client()
        .open_tunnel(&target.namespace, &target.service, target.port)?;
    println!(
        "Connected to {name}: http://{}{}",
        tunnel.local_address(),
        target.url
    );
    println!("Press Ctrl-C to close the tunnel");

    loop {
        ctx.cancel.check()?;
        std::thread::sleep(std::time::Duration::from_secs(1));
    }
}
