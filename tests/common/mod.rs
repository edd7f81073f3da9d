// tests/common/mod.rs

//! Shared fixtures for integration tests

use std::path::Path;

/// Write a zarf.yaml into `dir`.
pub fn write_manifest(dir: &Path, yaml: &str) {
    std::fs::create_dir_all(dir).unwrap();
    std::fs::write(dir.join("zarf.yaml"), yaml).unwrap();
}

/// A minimal single-component package definition.
pub fn minimal_manifest(name: &str) -> String {
    format!(
        "kind: ZarfPackageConfig\nmetadata:\n  name: {name}\n  version: 0.0.1\ncomponents:\n  - name: c\n    required: true\n"
    )
}
