// tests/deploy_templating.rs

//! Deploy-time variable substitution over staged values files.

mod common;

use std::collections::BTreeMap;

use zarf::template::{apply_to_file, deploy_time_map};
use zarf::types::state::ZarfState;
use zarf::types::{SetVariable, ZarfPackage};

#[test]
fn set_variable_fills_values_files() {
    let package = ZarfPackage::parse(&common::minimal_manifest("vars")).unwrap();

    let mut variables = BTreeMap::new();
    variables.insert(
        "NGINX_VERSION".to_string(),
        SetVariable {
            name: "NGINX_VERSION".to_string(),
            value: "1.25.0".to_string(),
            ..Default::default()
        },
    );
    let map = deploy_time_map(&package, &variables, None);

    let dir = tempfile::tempdir().unwrap();
    let values = dir.path().join("podinfo-0");
    std::fs::write(
        &values,
        "image:\n  tag: \"###ZARF_PKG_VAR_NGINX_VERSION###\"\nversion: ###ZARF_VAR_NGINX_VERSION###\n",
    )
    .unwrap();

    apply_to_file(&values, &map).unwrap();
    let templated = std::fs::read_to_string(&values).unwrap();
    assert_eq!(templated, "image:\n  tag: \"1.25.0\"\nversion: 1.25.0\n");
    assert!(!templated.contains("###ZARF_"));
}

#[test]
fn runtime_values_come_from_cluster_state() {
    let package = ZarfPackage::parse(&common::minimal_manifest("runtime")).unwrap();
    let mut state = ZarfState {
        storage_class: "local-path".to_string(),
        ..Default::default()
    };
    state.registry_info.fill_in_empty_values();
    state.git_server.fill_in_empty_values();

    let map = deploy_time_map(&package, &BTreeMap::new(), Some(&state));

    let dir = tempfile::tempdir().unwrap();
    let values = dir.path().join("registry-values");
    std::fs::write(
        &values,
        "registry: ###ZARF_REGISTRY###\nstorage: ###ZARF_STORAGE_CLASS###\nnodePort: ###ZARF_REGISTRY_NODEPORT###\n",
    )
    .unwrap();

    apply_to_file(&values, &map).unwrap();
    let templated = std::fs::read_to_string(&values).unwrap();
    assert_eq!(
        templated,
        "registry: 127.0.0.1:31999\nstorage: local-path\nnodePort: 31999\n"
    );
}

#[test]
fn sensitive_values_still_substitute() {
    let package = ZarfPackage::parse(&common::minimal_manifest("secrets")).unwrap();
    let mut variables = BTreeMap::new();
    variables.insert(
        "DB_PASSWORD".to_string(),
        SetVariable {
            name: "DB_PASSWORD".to_string(),
            value: "hunter2".to_string(),
            sensitive: true,
            ..Default::default()
        },
    );
    let map = deploy_time_map(&package, &variables, None);

    let dir = tempfile::tempdir().unwrap();
    let values = dir.path().join("app-0");
    std::fs::write(&values, "password: ###ZARF_VAR_DB_PASSWORD###\n").unwrap();
    apply_to_file(&values, &map).unwrap();
    assert_eq!(
        std::fs::read_to_string(&values).unwrap(),
        "password: hunter2\n"
    );
}
