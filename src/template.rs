// src/template.rs

//! `###ZARF_*###` placeholder substitution
//!
//! Two surfaces use the same map of template values: the in-memory manifest
//! before create-time lookups (`PKG_TMPL` / `PKG_VAR`), and templated files
//! on disk at deploy time (`VAR` / `CONST` / runtime values). Manifest
//! templating walks the YAML tree and substitutes string leaves rather than
//! regexing over marshalled text, so value types survive untouched.

use anyhow::{Context, Result};
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

use crate::types::state::ZarfState;
use crate::types::{SetVariable, VariableType, ZarfPackage};

/// Start/end sigil for every placeholder
pub const TEMPLATE_PREFIX: &str = "###ZARF_";
pub const TEMPLATE_SUFFIX: &str = "###";

/// Substituted for a component's `###ZARF_TEMP###` in file targets
pub const TEMP_PLACEHOLDER: &str = "###ZARF_TEMP###";

/// Marker a data injection leaves in the target container
pub const DATA_INJECTION_MARKER: &str = ".zarf-injection-";

/// A single substitutable value
#[derive(Debug, Clone, Default)]
pub struct TemplateValue {
    pub value: String,
    pub sensitive: bool,
    pub auto_indent: bool,
    pub variable_type: VariableType,
}

impl TemplateValue {
    pub fn plain(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            ..Default::default()
        }
    }
}

/// Full placeholder (`###ZARF_X###`) -> value
pub type TemplateMap = BTreeMap<String, TemplateValue>;

fn key(name: &str) -> String {
    format!("{TEMPLATE_PREFIX}{name}{TEMPLATE_SUFFIX}")
}

/// Build the create-time map: `PKG_TMPL`/`PKG_VAR` entries plus the package
/// architecture.
pub fn create_time_map(
    set_variables: &BTreeMap<String, String>,
    architecture: &str,
) -> TemplateMap {
    let mut map = TemplateMap::new();
    for (name, value) in set_variables {
        map.insert(
            key(&format!("PKG_VAR_{name}")),
            TemplateValue::plain(value.clone()),
        );
        map.insert(
            key(&format!("PKG_TMPL_{name}")),
            TemplateValue::plain(value.clone()),
        );
    }
    map.insert(key("PKG_ARCH"), TemplateValue::plain(architecture));
    map
}

/// Build the deploy-time map: declared variables, constants, and the runtime
/// values sourced from cluster state.
pub fn deploy_time_map(
    package: &ZarfPackage,
    set_variables: &BTreeMap<String, SetVariable>,
    state: Option<&ZarfState>,
) -> TemplateMap {
    let mut map = TemplateMap::new();

    for variable in set_variables.values() {
        let value = TemplateValue {
            value: variable.value.clone(),
            sensitive: variable.sensitive,
            auto_indent: variable.auto_indent,
            variable_type: variable.variable_type,
        };
        map.insert(key(&format!("VAR_{}", variable.name)), value.clone());
        // values files staged at create keep their PKG_VAR placeholders
        // until deploy, so those resolve here too
        map.insert(key(&format!("PKG_VAR_{}", variable.name)), value);
    }

    for constant in &package.constants {
        map.insert(
            key(&format!("CONST_{}", constant.name)),
            TemplateValue {
                value: constant.value.clone(),
                auto_indent: constant.auto_indent,
                ..Default::default()
            },
        );
    }

    if let Some(state) = state {
        for (name, value, sensitive) in runtime_values(state) {
            map.insert(
                key(&name),
                TemplateValue {
                    value,
                    sensitive,
                    ..Default::default()
                },
            );
        }
    }

    map
}

fn runtime_values(state: &ZarfState) -> Vec<(String, String, bool)> {
    let registry = &state.registry_info;
    let git = &state.git_server;
    vec![
        ("REGISTRY".to_string(), registry.address.clone(), false),
        (
            "REGISTRY_NODEPORT".to_string(),
            registry.node_port.to_string(),
            false,
        ),
        (
            "REGISTRY_AUTH_PUSH".to_string(),
            registry.push_password.clone(),
            true,
        ),
        (
            "REGISTRY_AUTH_PULL".to_string(),
            registry.pull_password.clone(),
            true,
        ),
        ("GIT_PUSH".to_string(), git.push_username.clone(), false),
        ("GIT_AUTH_PUSH".to_string(), git.push_password.clone(), true),
        ("GIT_PULL".to_string(), git.pull_username.clone(), false),
        ("GIT_AUTH_PULL".to_string(), git.pull_password.clone(), true),
        (
            "STORAGE_CLASS".to_string(),
            state.storage_class.clone(),
            false,
        ),
        (
            "SEED_IMAGE".to_string(),
            crate::injector::seed_image_reference(state),
            false,
        ),
        ("AGENT_CA".to_string(), state.agent_tls.ca.clone(), true),
        ("AGENT_CERT".to_string(), state.agent_tls.cert.clone(), true),
        ("AGENT_KEY".to_string(), state.agent_tls.key.clone(), true),
        (
            "DATA_INJECTION_MARKER".to_string(),
            DATA_INJECTION_MARKER.to_string(),
            false,
        ),
    ]
}

/// Scan text for `###ZARF_<prefix><NAME>###` placeholders and return the
/// names found, in order of first appearance.
pub fn find_placeholders(text: &str, prefix: &str) -> Vec<String> {
    let full_prefix = format!("{TEMPLATE_PREFIX}{prefix}");
    let mut names = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find(&full_prefix) {
        let after = &rest[start + full_prefix.len()..];
        if let Some(end) = after.find(TEMPLATE_SUFFIX) {
            let name = &after[..end];
            if !name.is_empty()
                && name
                    .chars()
                    .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
                && !names.iter().any(|n| n == name)
            {
                names.push(name.to_string());
            }
            rest = &after[end + TEMPLATE_SUFFIX.len()..];
        } else {
            break;
        }
    }
    names
}

/// Substitute placeholders in a string, honoring auto-indent: continuation
/// lines of a multiline value are indented to the column where the
/// placeholder started.
pub fn apply_to_text(text: &str, map: &TemplateMap) -> String {
    let mut out = text.to_string();
    for (placeholder, value) in map {
        if !out.contains(placeholder.as_str()) {
            continue;
        }
        debug!(
            placeholder = %placeholder,
            value = %if value.sensitive { "**sanitized**" } else { value.value.as_str() },
            "templating value"
        );
        if value.auto_indent && value.value.contains('\n') {
            out = substitute_indented(&out, placeholder, &value.value);
        } else {
            out = out.replace(placeholder.as_str(), &value.value);
        }
    }
    out
}

fn substitute_indented(text: &str, placeholder: &str, value: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(idx) = rest.find(placeholder) {
        out.push_str(&rest[..idx]);
        let column = out.len() - out.rfind('\n').map(|n| n + 1).unwrap_or(0);
        let indented = value.replace('\n', &format!("\n{}", " ".repeat(column)));
        out.push_str(&indented);
        rest = &rest[idx + placeholder.len()..];
    }
    out.push_str(rest);
    out
}

/// Walk a YAML tree substituting placeholders in every string, both keys
/// and values.
pub fn apply_to_yaml_value(node: &mut Value, map: &TemplateMap) {
    match node {
        Value::String(s) => {
            let replaced = apply_to_text(s, map);
            if replaced != *s {
                *s = replaced;
            }
        }
        Value::Sequence(seq) => {
            for item in seq {
                apply_to_yaml_value(item, map);
            }
        }
        Value::Mapping(mapping) => {
            let entries: Vec<(Value, Value)> = std::mem::take(mapping).into_iter().collect();
            for (mut k, mut v) in entries {
                apply_to_yaml_value(&mut k, map);
                apply_to_yaml_value(&mut v, map);
                mapping.insert(k, v);
            }
        }
        _ => {}
    }
}

/// Re-template the whole package manifest in place.
pub fn apply_to_package(package: &mut ZarfPackage, map: &TemplateMap) -> Result<()> {
    let mut value = serde_yaml::to_value(&*package).context("Failed to serialize manifest")?;
    apply_to_yaml_value(&mut value, map);
    *package = serde_yaml::from_value(value).context("Failed to reload templated manifest")?;
    Ok(())
}

/// Template a file on disk in place. Values of type `file` load their
/// contents from the path they name before substitution.
pub fn apply_to_file(path: &Path, map: &TemplateMap) -> Result<()> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read templated file: {}", path.display()))?;

    let mut resolved = TemplateMap::new();
    for (placeholder, value) in map {
        if !text.contains(placeholder.as_str()) {
            continue;
        }
        let mut value = value.clone();
        if value.variable_type == VariableType::File {
            value.value = std::fs::read_to_string(&value.value).with_context(|| {
                format!("Failed to read file-type variable source: {}", value.value)
            })?;
        }
        resolved.insert(placeholder.clone(), value);
    }

    let templated = apply_to_text(&text, &resolved);
    std::fs::write(path, templated)
        .with_context(|| format!("Failed to write templated file: {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_of(entries: &[(&str, &str)]) -> TemplateMap {
        entries
            .iter()
            .map(|(k, v)| (key(k), TemplateValue::plain(*v)))
            .collect()
    }

    #[test]
    fn test_simple_substitution() {
        let map = map_of(&[("VAR_NGINX_VERSION", "1.25.0")]);
        let out = apply_to_text("image: nginx:###ZARF_VAR_NGINX_VERSION###", &map);
        assert_eq!(out, "image: nginx:1.25.0");
    }

    #[test]
    fn test_find_placeholders() {
        let text = "a ###ZARF_PKG_VAR_ONE### b ###ZARF_PKG_VAR_TWO### c ###ZARF_PKG_VAR_ONE###";
        let names = find_placeholders(text, "PKG_VAR_");
        assert_eq!(names, vec!["ONE", "TWO"]);
    }

    #[test]
    fn test_auto_indent_multiline() {
        let mut map = TemplateMap::new();
        map.insert(
            key("VAR_CERT"),
            TemplateValue {
                value: "line1\nline2\nline3".to_string(),
                auto_indent: true,
                ..Default::default()
            },
        );
        let out = apply_to_text("data:\n  cert: ###ZARF_VAR_CERT###", &map);
        assert_eq!(out, "data:\n  cert: line1\n        line2\n        line3");
    }

    #[test]
    fn test_yaml_walk_preserves_types() {
        let map = map_of(&[("CONST_TAG", "6.4.0")]);
        let mut value: Value =
            serde_yaml::from_str("replicas: 3\nimage: podinfo:###ZARF_CONST_TAG###\n").unwrap();
        apply_to_yaml_value(&mut value, &map);
        assert_eq!(value["replicas"], Value::from(3));
        assert_eq!(value["image"], Value::from("podinfo:6.4.0"));
    }

    #[test]
    fn test_create_time_map_arch() {
        let mut vars = BTreeMap::new();
        vars.insert("FLAVOR".to_string(), "upstream".to_string());
        let map = create_time_map(&vars, "amd64");
        assert_eq!(map[&key("PKG_ARCH")].value, "amd64");
        assert_eq!(map[&key("PKG_TMPL_FLAVOR")].value, "upstream");
        assert_eq!(map[&key("PKG_VAR_FLAVOR")].value, "upstream");
    }

    #[test]
    fn test_file_templating_and_file_variables() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("secret.txt");
        std::fs::write(&source, "s3cr3t").unwrap();

        let target = dir.path().join("values.yaml");
        std::fs::write(&target, "password: ###ZARF_VAR_DB_PASS###\n").unwrap();

        let mut map = TemplateMap::new();
        map.insert(
            key("VAR_DB_PASS"),
            TemplateValue {
                value: source.to_string_lossy().to_string(),
                variable_type: VariableType::File,
                sensitive: true,
                ..Default::default()
            },
        );

        apply_to_file(&target, &map).unwrap();
        let out = std::fs::read_to_string(&target).unwrap();
        assert_eq!(out, "password: s3cr3t\n");
    }
}
