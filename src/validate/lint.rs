// src/validate/lint.rs

//! Lint mode: advisory findings beyond hard validation
//!
//! Lint never fails a build on its own; it aggregates findings so authors
//! can pin references and close templating gaps before shipping.

use std::collections::BTreeMap;
use std::fmt;

use crate::template;
use crate::types::ZarfPackage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// One lint finding tied to a component when one applies
#[derive(Debug, Clone)]
pub struct Finding {
    pub severity: Severity,
    pub component: Option<String>,
    pub message: String,
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.component {
            Some(component) => {
                write!(f, "{}: [{}] {}", self.severity, component, self.message)
            }
            None => write!(f, "{}: {}", self.severity, self.message),
        }
    }
}

/// Lint a composed package. `set_variables` holds the `--set` values the
/// author provided, used to detect unset template variables.
pub fn lint_package(
    package: &ZarfPackage,
    set_variables: &BTreeMap<String, String>,
) -> Vec<Finding> {
    let mut findings = Vec::new();

    for component in &package.components {
        for image in &component.images {
            if !image.contains('@') {
                findings.push(Finding {
                    severity: Severity::Warning,
                    component: Some(component.name.clone()),
                    message: format!("image {image:?} is not pinned to a digest"),
                });
            }
        }
        for repo in &component.repos {
            if !repo_is_pinned(repo) {
                findings.push(Finding {
                    severity: Severity::Warning,
                    component: Some(component.name.clone()),
                    message: format!("repository {repo:?} is not pinned to a ref"),
                });
            }
        }
        if let Some(import) = &component.import {
            for (field, value) in [("import.path", &import.path), ("import.url", &import.url)] {
                if value.contains(template::TEMPLATE_PREFIX) {
                    findings.push(Finding {
                        severity: Severity::Error,
                        component: Some(component.name.clone()),
                        message: format!(
                            "{field} contains a ###ZARF_PKG_TMPL_*### value which is never evaluated"
                        ),
                    });
                }
            }
        }
    }

    // variables referenced by the manifest but neither defaulted nor set
    let manifest_text = package.to_yaml().unwrap_or_default();
    for name in template::find_placeholders(&manifest_text, "PKG_TMPL_") {
        if !set_variables.contains_key(&name) {
            findings.push(Finding {
                severity: Severity::Warning,
                component: None,
                message: format!("package template {name:?} is not set; pass --set {name}=<value>"),
            });
        }
    }

    findings
}

/// A repo reference counts as pinned when it carries an explicit ref after
/// an `@`, e.g. `https://github.com/x/y.git@refs/tags/v1.0.0`.
fn repo_is_pinned(repo: &str) -> bool {
    match repo.rsplit_once('@') {
        Some((prefix, _ref)) => !prefix.is_empty() && prefix.contains("://"),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::component::ZarfComponentImport;
    use crate::types::{PackageMetadata, ZarfComponent};

    fn package_with_component(component: ZarfComponent) -> ZarfPackage {
        ZarfPackage {
            metadata: PackageMetadata {
                name: "lintme".to_string(),
                ..Default::default()
            },
            components: vec![component],
            ..Default::default()
        }
    }

    #[test]
    fn test_unpinned_image_flagged_once() {
        let package = package_with_component(ZarfComponent {
            name: "c".to_string(),
            images: vec![
                "nginx:1.25".to_string(),
                "nginx@sha256:abcd".to_string(),
            ],
            ..Default::default()
        });
        let findings = lint_package(&package, &BTreeMap::new());
        let unpinned: Vec<_> = findings
            .iter()
            .filter(|f| f.message.contains("not pinned to a digest"))
            .collect();
        assert_eq!(unpinned.len(), 1);
        assert!(unpinned[0].message.contains("nginx:1.25"));
    }

    #[test]
    fn test_unpinned_repo_flagged() {
        let package = package_with_component(ZarfComponent {
            name: "c".to_string(),
            repos: vec![
                "https://github.com/x/y.git".to_string(),
                "https://github.com/x/y.git@refs/tags/v1.0.0".to_string(),
            ],
            ..Default::default()
        });
        let findings = lint_package(&package, &BTreeMap::new());
        let unpinned: Vec<_> = findings
            .iter()
            .filter(|f| f.message.contains("not pinned to a ref"))
            .collect();
        assert_eq!(unpinned.len(), 1);
    }

    #[test]
    fn test_template_in_import_is_error() {
        let package = package_with_component(ZarfComponent {
            name: "c".to_string(),
            import: Some(ZarfComponentImport {
                path: "###ZARF_PKG_TMPL_FLAVOR###/common".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        });
        let findings = lint_package(&package, &BTreeMap::new());
        assert!(findings
            .iter()
            .any(|f| f.severity == Severity::Error && f.message.contains("never evaluated")));
    }

    #[test]
    fn test_unset_template_variable_flagged() {
        let package = package_with_component(ZarfComponent {
            name: "c".to_string(),
            images: vec!["nginx:###ZARF_PKG_TMPL_NGINX_VERSION###@sha256:abc".to_string()],
            ..Default::default()
        });
        let findings = lint_package(&package, &BTreeMap::new());
        assert!(findings
            .iter()
            .any(|f| f.message.contains("NGINX_VERSION")));

        let mut set = BTreeMap::new();
        set.insert("NGINX_VERSION".to_string(), "1.25".to_string());
        let findings = lint_package(&package, &set);
        assert!(!findings
            .iter()
            .any(|f| f.message.contains("is not set")));
    }
}
