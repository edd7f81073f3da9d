// src/validate/mod.rs

//! Manifest validation
//!
//! Structural parsing is serde's job; this module owns the semantic rules:
//! naming, uniqueness, mutually exclusive fields, YOLO restrictions, and the
//! shape of actions. Every violation is collected so authors see the full
//! list at once.

pub mod lint;

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

use crate::error::Error;
use crate::types::component::{ZarfAction, ZarfActionSet, ZarfChart, ZarfComponent, ZarfManifest};
use crate::types::{Constant, PackageKind, Variable, ZarfPackage};

/// Helm chart names are bounded to leave room for release prefixes.
pub const MAX_CHART_NAME_LENGTH: usize = 40;

/// Manifest names share the chart bound.
pub const MAX_MANIFEST_NAME_LENGTH: usize = 40;

fn package_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9-]*$").expect("const regex"))
}

fn variable_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Z0-9_]+$").expect("const regex"))
}

fn dns1035_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-z]([-a-z0-9]*[a-z0-9])?$").expect("const regex"))
}

/// Validate the whole package, returning every violation joined into one
/// error so nothing is fixed piecemeal.
pub fn validate_package(package: &ZarfPackage) -> Result<(), Error> {
    let mut violations = Vec::new();

    if !package_name_pattern().is_match(&package.metadata.name) {
        violations.push(format!(
            "package name {:?} must be lowercase alphanumeric with hyphens and cannot start with a hyphen",
            package.metadata.name
        ));
    }

    if package.kind == PackageKind::ZarfInitConfig && package.metadata.yolo {
        violations.push("init packages cannot be YOLO".to_string());
    }

    if package.metadata.yolo {
        for component in &package.components {
            if !component.images.is_empty() {
                violations.push("OCI images are not allowed in YOLO packages".to_string());
            }
            if !component.repos.is_empty() {
                violations.push("git repos are not allowed in YOLO packages".to_string());
            }
            if !component.only.cluster.architecture.is_empty() {
                violations
                    .push("cluster architecture pinning is not allowed in YOLO packages".to_string());
            }
            if !component.only.cluster.distros.is_empty() {
                violations.push("cluster distros are not allowed in YOLO packages".to_string());
            }
        }
    }

    for variable in &package.variables {
        if let Err(err) = validate_variable(variable) {
            violations.push(err.to_string());
        }
    }
    for constant in &package.constants {
        if let Err(err) = validate_constant(constant) {
            violations.push(err.to_string());
        }
    }

    let mut component_names = BTreeMap::new();
    let mut group_defaults: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut group_members: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for component in &package.components {
        if component_names
            .insert(component.name.clone(), ())
            .is_some()
        {
            violations.push(format!("component name {:?} is not unique", component.name));
        }
        if component.required && component.default {
            violations.push(format!(
                "component {:?} cannot be both required and default",
                component.name
            ));
        }
        if component.required && !component.group.is_empty() {
            violations.push(format!(
                "component {:?} cannot be both required and grouped",
                component.name
            ));
        }
        if !component.group.is_empty() {
            group_members
                .entry(component.group.clone())
                .or_default()
                .push(component.name.clone());
            if component.default {
                group_defaults
                    .entry(component.group.clone())
                    .or_default()
                    .push(component.name.clone());
            }
        }

        violations.extend(validate_component(component));
    }

    for (group, defaults) in &group_defaults {
        if defaults.len() > 1 {
            violations.push(format!(
                "group {:?} has multiple defaults ({:?}, {:?})",
                group, defaults[0], defaults[1]
            ));
        }
    }
    for (group, members) in &group_members {
        if members.len() == 1 {
            violations.push(format!(
                "group {:?} only has one component ({:?})",
                group, members[0]
            ));
        }
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(Error::validation(violations.join("\n")))
    }
}

fn validate_component(component: &ZarfComponent) -> Vec<String> {
    let mut violations = Vec::new();

    if let Some(import) = &component.import {
        let has_path = !import.path.is_empty();
        let has_url = !import.url.is_empty();
        if has_path == has_url {
            violations.push(format!(
                "component {:?} import must define exactly one of path or url",
                component.name
            ));
        }
        if has_url && !import.url.starts_with("oci://") {
            violations.push(format!(
                "component {:?} import url must use the oci:// scheme",
                component.name
            ));
        }
        if has_path && std::path::Path::new(&import.path).is_absolute() {
            violations.push(format!(
                "component {:?} import path must be relative",
                component.name
            ));
        }
    }

    let mut chart_names = BTreeMap::new();
    for chart in &component.charts {
        if chart_names.insert(chart.name.clone(), ()).is_some() {
            violations.push(format!(
                "chart name {:?} is not unique within component {:?}",
                chart.name, component.name
            ));
        }
        violations.extend(validate_chart(chart, &component.name));
    }

    let mut manifest_names = BTreeMap::new();
    for manifest in &component.manifests {
        if manifest_names.insert(manifest.name.clone(), ()).is_some() {
            violations.push(format!(
                "manifest name {:?} is not unique within component {:?}",
                manifest.name, component.name
            ));
        }
        violations.extend(validate_manifest(manifest, &component.name));
    }

    violations.extend(validate_action_set(&component.actions.on_create, "onCreate"));
    violations.extend(validate_action_set(&component.actions.on_deploy, "onDeploy"));
    violations.extend(validate_action_set(&component.actions.on_remove, "onRemove"));

    violations
}

fn validate_chart(chart: &ZarfChart, component: &str) -> Vec<String> {
    let mut violations = Vec::new();

    if chart.name.is_empty() {
        violations.push(format!("component {component:?} has a chart without a name"));
    }
    if chart.name.len() > MAX_CHART_NAME_LENGTH {
        violations.push(format!(
            "chart {:?} exceeds the maximum length of {MAX_CHART_NAME_LENGTH} characters",
            chart.name
        ));
    }
    if chart.namespace.is_empty() {
        violations.push(format!("chart {:?} must include a namespace", chart.name));
    }
    let has_url = !chart.url.is_empty();
    let has_local = !chart.local_path.is_empty();
    if has_url == has_local {
        violations.push(format!(
            "chart {:?} must have exactly one of url or localPath",
            chart.name
        ));
    }
    if chart.version.is_empty() {
        violations.push(format!("chart {:?} must include a chart version", chart.name));
    }
    if !dns1035_pattern().is_match(chart.release_name()) || chart.release_name().len() > 53 {
        violations.push(format!(
            "chart release name {:?} is not a valid helm release name (DNS-1035)",
            chart.release_name()
        ));
    }
    violations
}

fn validate_manifest(manifest: &ZarfManifest, component: &str) -> Vec<String> {
    let mut violations = Vec::new();
    if manifest.name.is_empty() {
        violations.push(format!(
            "component {component:?} has a manifest without a name"
        ));
    }
    if manifest.name.len() > MAX_MANIFEST_NAME_LENGTH {
        violations.push(format!(
            "manifest {:?} exceeds the maximum length of {MAX_MANIFEST_NAME_LENGTH} characters",
            manifest.name
        ));
    }
    if manifest.files.is_empty() && manifest.kustomizations.is_empty() {
        violations.push(format!(
            "manifest {:?} must have at least one file or kustomization",
            manifest.name
        ));
    }
    violations
}

fn validate_action_set(set: &ZarfActionSet, phase: &str) -> Vec<String> {
    let mut violations = Vec::new();
    for action in set
        .before
        .iter()
        .chain(set.after.iter())
        .chain(set.on_success.iter())
        .chain(set.on_failure.iter())
    {
        violations.extend(validate_action(action, phase));
    }
    violations
}

fn validate_action(action: &ZarfAction, phase: &str) -> Vec<String> {
    let mut violations = Vec::new();
    let describe = || {
        action
            .description
            .clone()
            .or_else(|| action.cmd.clone())
            .unwrap_or_else(|| "wait".to_string())
    };

    match (&action.cmd, &action.wait) {
        (Some(_), Some(_)) => violations.push(format!(
            "action {:?} cannot be both a command and a wait action",
            describe()
        )),
        (None, None) => violations.push(format!(
            "action {:?} must define either cmd or wait",
            describe()
        )),
        (None, Some(wait)) => {
            if wait.cluster.is_some() == wait.network.is_some() {
                violations.push(
                    "a single wait action must contain only one of cluster or network".to_string(),
                );
            }
        }
        (Some(_), None) => {}
    }

    if !action.set_variables.is_empty() && phase != "onDeploy" {
        violations.push(format!(
            "action {:?} may only setVariables in onDeploy",
            describe()
        ));
    }
    for variable in &action.set_variables {
        if !variable_name_pattern().is_match(&variable.name) {
            violations.push(format!(
                "setVariables name {:?} must match ^[A-Z0-9_]+$",
                variable.name
            ));
        }
    }
    violations
}

fn validate_variable(variable: &Variable) -> Result<(), Error> {
    if !variable_name_pattern().is_match(&variable.name) {
        return Err(Error::validation(format!(
            "invalid package variable: name {:?} must match ^[A-Z0-9_]+$",
            variable.name
        )));
    }
    Ok(())
}

fn validate_constant(constant: &Constant) -> Result<(), Error> {
    if !variable_name_pattern().is_match(&constant.name) {
        return Err(Error::validation(format!(
            "invalid package constant: name {:?} must match ^[A-Z0-9_]+$",
            constant.name
        )));
    }
    if !constant.pattern.is_empty() {
        let pattern = Regex::new(&constant.pattern).map_err(|err| {
            Error::validation(format!(
                "invalid package constant: pattern for {:?} does not compile: {err}",
                constant.name
            ))
        })?;
        if !pattern.is_match(&constant.value) {
            return Err(Error::validation(format!(
                "invalid package constant: value of {:?} does not match pattern {:?}",
                constant.name, constant.pattern
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::component::{ZarfActionWait, ZarfActionWaitNetwork};
    use crate::types::PackageMetadata;

    fn minimal_package(name: &str) -> ZarfPackage {
        ZarfPackage {
            kind: PackageKind::ZarfPackageConfig,
            metadata: PackageMetadata {
                name: name.to_string(),
                ..Default::default()
            },
            components: vec![ZarfComponent {
                name: "c".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_minimal_package() {
        validate_package(&minimal_package("hello")).unwrap();
    }

    #[test]
    fn test_bad_package_name() {
        assert!(validate_package(&minimal_package("Hello")).is_err());
        assert!(validate_package(&minimal_package("-hello")).is_err());
        assert!(validate_package(&minimal_package("hello_x")).is_err());
    }

    #[test]
    fn test_yolo_init_rejected() {
        let mut package = minimal_package("init");
        package.kind = PackageKind::ZarfInitConfig;
        package.metadata.yolo = true;
        let err = validate_package(&package).unwrap_err();
        assert!(err.to_string().contains("init packages cannot be YOLO"));
    }

    #[test]
    fn test_yolo_restrictions() {
        let mut package = minimal_package("dev");
        package.metadata.yolo = true;
        package.components[0].images = vec!["nginx".to_string()];
        package.components[0].repos = vec!["https://github.com/x/y.git".to_string()];
        package.components[0].only.cluster.architecture = "amd64".to_string();
        let message = validate_package(&package).unwrap_err().to_string();
        assert!(message.contains("OCI images are not allowed"));
        assert!(message.contains("git repos are not allowed"));
        assert!(message.contains("architecture pinning is not allowed"));
    }

    #[test]
    fn test_duplicate_component_names() {
        let mut package = minimal_package("dup");
        package.components.push(package.components[0].clone());
        let err = validate_package(&package).unwrap_err();
        assert!(err.to_string().contains("not unique"));
    }

    #[test]
    fn test_required_and_default_exclusive() {
        let mut package = minimal_package("conflict");
        package.components[0].required = true;
        package.components[0].default = true;
        let err = validate_package(&package).unwrap_err();
        assert!(err.to_string().contains("required and default"));
    }

    #[test]
    fn test_chart_rules() {
        let mut package = minimal_package("charts");
        package.components[0].charts = vec![ZarfChart {
            name: "x".repeat(41),
            version: String::new(),
            url: "https://example.com".to_string(),
            local_path: "./chart".to_string(),
            namespace: String::new(),
            ..Default::default()
        }];
        let message = validate_package(&package).unwrap_err().to_string();
        assert!(message.contains("maximum length of 40"));
        assert!(message.contains("must include a namespace"));
        assert!(message.contains("exactly one of url or localPath"));
        assert!(message.contains("must include a chart version"));
    }

    #[test]
    fn test_release_name_dns1035() {
        let mut package = minimal_package("release");
        package.components[0].charts = vec![ZarfChart {
            name: "ok-chart".to_string(),
            version: "1.0.0".to_string(),
            url: "https://example.com".to_string(),
            namespace: "ns".to_string(),
            release_name: "Bad_Release".to_string(),
            ..Default::default()
        }];
        let err = validate_package(&package).unwrap_err();
        assert!(err.to_string().contains("DNS-1035"));
    }

    #[test]
    fn test_empty_manifest_rejected() {
        let mut package = minimal_package("manifests");
        package.components[0].manifests = vec![ZarfManifest {
            name: "empty".to_string(),
            ..Default::default()
        }];
        let err = validate_package(&package).unwrap_err();
        assert!(err
            .to_string()
            .contains("at least one file or kustomization"));
    }

    #[test]
    fn test_action_cmd_xor_wait() {
        let mut package = minimal_package("actions");
        package.components[0].actions.on_deploy.before = vec![ZarfAction {
            cmd: Some("echo hi".to_string()),
            wait: Some(ZarfActionWait {
                network: Some(ZarfActionWaitNetwork {
                    protocol: "tcp".to_string(),
                    address: "localhost:80".to_string(),
                    code: None,
                }),
                ..Default::default()
            }),
            ..Default::default()
        }];
        let err = validate_package(&package).unwrap_err();
        assert!(err.to_string().contains("cannot be both"));
    }

    #[test]
    fn test_set_variables_only_on_deploy() {
        let mut package = minimal_package("setvars");
        package.components[0].actions.on_create.before = vec![ZarfAction {
            cmd: Some("echo hi".to_string()),
            set_variables: vec![Variable {
                name: "OUT".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        }];
        let err = validate_package(&package).unwrap_err();
        assert!(err.to_string().contains("only setVariables in onDeploy"));
    }

    #[test]
    fn test_constant_pattern() {
        let mut package = minimal_package("consts");
        package.constants = vec![Constant {
            name: "TAG".to_string(),
            value: "latest".to_string(),
            pattern: r"^\d+\.\d+$".to_string(),
            ..Default::default()
        }];
        let err = validate_package(&package).unwrap_err();
        assert!(err.to_string().contains("does not match pattern"));
    }

    #[test]
    fn test_import_exclusivity() {
        let mut package = minimal_package("imports");
        package.components[0].import = Some(crate::types::ZarfComponentImport {
            path: "common".to_string(),
            url: "oci://example/skeleton".to_string(),
            ..Default::default()
        });
        let err = validate_package(&package).unwrap_err();
        assert!(err.to_string().contains("exactly one of path or url"));
    }
}
