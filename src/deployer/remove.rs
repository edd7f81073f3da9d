// src/deployer/remove.rs

//! Package removal
//!
//! Removal is the inverse of deploy: selected components are torn down in
//! reverse manifest order, each uninstalling its Helm releases (charts and
//! synthetic manifest charts alike) newest-first, with onRemove hooks around
//! the work. The deployed-package secret shrinks as components disappear and
//! is deleted once nothing remains.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::cluster::Cluster;
use crate::config::EngineContext;
use crate::error::Error;
use crate::external::HelmClient;
use crate::types::SetVariable;

/// Remove components of a deployed package. An empty `requested` removes
/// everything.
pub fn remove_package(
    ctx: &EngineContext,
    cluster: &Cluster,
    helm: &dyn HelmClient,
    package_name: &str,
    requested: &[String],
) -> Result<()> {
    let mut record = cluster.get_deployed_package(package_name)?.ok_or_else(|| {
        Error::validation(format!(
            "package {package_name:?} is not deployed to this cluster"
        ))
    })?;

    for name in requested {
        if !record.deployed_components.contains_key(name) {
            return Err(Error::validation(format!(
                "component {name:?} is not part of the deployed package {package_name:?}"
            ))
            .into());
        }
    }

    // reverse manifest order so dependents go before their dependencies
    let ordered: Vec<String> = record
        .data
        .components
        .iter()
        .rev()
        .map(|c| c.name.clone())
        .filter(|name| record.deployed_components.contains_key(name))
        .filter(|name| requested.is_empty() || requested.contains(name))
        .collect();

    for component_name in ordered {
        ctx.cancel.check()?;
        info!(component = %component_name, "removing component");

        let component = record
            .data
            .components
            .iter()
            .find(|c| c.name == component_name)
            .cloned()
            .unwrap_or_default();

        let mut variables: BTreeMap<String, SetVariable> = BTreeMap::new();
        let mut runner = crate::actions::ActionRunner::new(
            &mut variables,
            Some(cluster),
            ctx.cancel.clone(),
        );

        let deployed = record
            .deployed_components
            .get(&component_name)
            .cloned()
            .unwrap_or_default();

        runner.with_lifecycle(&component.actions.on_remove, |_| {
            for chart in deployed.installed_charts.iter().rev() {
                if let Err(err) = helm.uninstall(&chart.chart_name, &chart.namespace) {
                    warn!(
                        chart = %chart.chart_name,
                        namespace = %chart.namespace,
                        "failed to uninstall release: {err:#}"
                    );
                }
            }
            Ok(())
        })?;

        record.deployed_components.remove(&component_name);
        if record.deployed_components.is_empty() {
            cluster
                .delete_package_record(package_name)
                .context("Failed to delete the deployed-package secret")?;
        } else {
            cluster.record_package(&record)?;
        }
    }

    info!(package = package_name, "package removal complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::fake::FakeClusterClient;
    use crate::config::{CancelToken, EngineConfig};
    use crate::external::fakes::FakeHelm;
    use crate::types::state::{DeployedComponent, DeployedPackage, InstalledChart};
    use crate::types::{ZarfComponent, ZarfPackage};
    use std::sync::Arc;

    fn deployed_fixture() -> (EngineContext, Cluster, FakeHelm) {
        let ctx = EngineContext::new(EngineConfig::default());
        let cluster = Cluster::new(Arc::new(FakeClusterClient::new()), CancelToken::new());
        (ctx, cluster, FakeHelm::default())
    }

    fn record_with_components(names: &[&str]) -> DeployedPackage {
        let mut record = DeployedPackage {
            name: "app".to_string(),
            cli_version: "0.1.0".to_string(),
            data: ZarfPackage {
                components: names
                    .iter()
                    .map(|name| ZarfComponent {
                        name: name.to_string(),
                        ..Default::default()
                    })
                    .collect(),
                ..Default::default()
            },
            ..Default::default()
        };
        for name in names {
            record.deployed_components.insert(
                name.to_string(),
                DeployedComponent {
                    installed_charts: vec![InstalledChart {
                        namespace: "apps".to_string(),
                        chart_name: format!("{name}-chart"),
                    }],
                },
            );
        }
        record
    }

    #[test]
    fn test_remove_all_deletes_record() {
        let (ctx, cluster, helm) = deployed_fixture();
        cluster
            .record_package(&record_with_components(&["db", "web"]))
            .unwrap();

        remove_package(&ctx, &cluster, &helm, "app", &[]).unwrap();

        // reverse manifest order: web before db
        let uninstalls = helm.uninstalls.lock().unwrap();
        assert_eq!(
            *uninstalls,
            vec![
                ("web-chart".to_string(), "apps".to_string()),
                ("db-chart".to_string(), "apps".to_string()),
            ]
        );
        assert!(cluster.get_deployed_package("app").unwrap().is_none());
    }

    #[test]
    fn test_partial_remove_keeps_record() {
        let (ctx, cluster, helm) = deployed_fixture();
        cluster
            .record_package(&record_with_components(&["db", "web"]))
            .unwrap();

        remove_package(&ctx, &cluster, &helm, "app", &["web".to_string()]).unwrap();

        let record = cluster.get_deployed_package("app").unwrap().unwrap();
        assert!(record.deployed_components.contains_key("db"));
        assert!(!record.deployed_components.contains_key("web"));
        assert_eq!(helm.uninstalls.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_remove_unknown_package_fails() {
        let (ctx, cluster, helm) = deployed_fixture();
        let err = remove_package(&ctx, &cluster, &helm, "ghost", &[]).unwrap_err();
        assert!(err.to_string().contains("not deployed"));
    }

    #[test]
    fn test_remove_unknown_component_fails() {
        let (ctx, cluster, helm) = deployed_fixture();
        cluster
            .record_package(&record_with_components(&["web"]))
            .unwrap();
        let err =
            remove_package(&ctx, &cluster, &helm, "app", &["ghost".to_string()]).unwrap_err();
        assert!(err.to_string().contains("not part of the deployed package"));
    }
}
