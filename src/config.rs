// src/config.rs
//! Engine configuration and shared context
//!
//! Configuration is layered: built-in defaults, then the TOML file pointed
//! at by `ZARF_CONFIG`, then environment variables. All engine state travels
//! in an explicit [`EngineContext`] so tests can construct their own.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::Error;

/// Environment variable naming the TOML config file.
pub const CONFIG_ENV: &str = "ZARF_CONFIG";

/// Prefix for create-time package variable overrides.
pub const PKG_VAR_ENV_PREFIX: &str = "ZARF_PKG_VAR_";

/// Prefix for deploy-time variable overrides.
pub const VAR_ENV_PREFIX: &str = "ZARF_VAR_";

/// Prefix for Terraform-style variables exported into action environments.
pub const TF_VAR_ENV_PREFIX: &str = "TF_VAR_";

/// CLI version recorded into build metadata and deployed-package records.
pub const CLI_VERSION: &str = env!("CARGO_PKG_VERSION");

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct EngineConfig {
    /// Package create/deploy settings
    #[serde(default)]
    pub package: PackageSection,

    /// Log settings (overridden by ZARF_LOG_LEVEL / ZARF_LOG_FORMAT)
    #[serde(default)]
    pub log: LogSection,

    /// Pre-set variables applied before prompting
    #[serde(default)]
    pub set_variables: HashMap<String, String>,
}

/// Package operation settings
#[derive(Debug, Deserialize)]
pub struct PackageSection {
    /// Number of concurrent layer operations against remote registries
    #[serde(default = "default_oci_concurrency")]
    pub oci_concurrency: usize,

    /// Directory used to cache images and git repos between creates
    #[serde(default)]
    pub cache_path: Option<PathBuf>,

    /// Staging directory override (defaults to the system temp dir)
    #[serde(default)]
    pub temp_directory: Option<PathBuf>,
}

impl Default for PackageSection {
    fn default() -> Self {
        Self {
            oci_concurrency: default_oci_concurrency(),
            cache_path: None,
            temp_directory: None,
        }
    }
}

fn default_oci_concurrency() -> usize {
    3
}

/// Log settings
#[derive(Debug, Deserialize, Default)]
pub struct LogSection {
    #[serde(default)]
    pub level: Option<String>,

    #[serde(default)]
    pub format: Option<String>,
}

impl EngineConfig {
    /// Load configuration honoring `ZARF_CONFIG`, falling back to defaults
    /// when no file is configured.
    pub fn load() -> Result<Self> {
        match std::env::var(CONFIG_ENV) {
            Ok(path) if !path.is_empty() => Self::from_file(Path::new(&path)),
            _ => Ok(Self::default()),
        }
    }

    /// Parse a TOML config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: EngineConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Collect `ZARF_PKG_VAR_*` / `ZARF_VAR_*` environment overrides merged
    /// over the config file's `set_variables`, keys uppercased.
    pub fn variable_overrides(&self, prefix: &str) -> HashMap<String, String> {
        let mut merged: HashMap<String, String> = self
            .set_variables
            .iter()
            .map(|(k, v)| (k.to_uppercase(), v.clone()))
            .collect();
        for (key, value) in std::env::vars() {
            if let Some(name) = key.strip_prefix(prefix) {
                merged.insert(name.to_uppercase(), value);
            }
        }
        merged
    }
}

/// Cooperative cancellation token propagated into every network and exec
/// call. Cloning shares the underlying flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Error out if cancellation was requested. Called at suspension points.
    pub fn check(&self) -> Result<(), Error> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// User-level preferences shared across commands.
#[derive(Debug, Clone, Default)]
pub struct CommonOptions {
    /// Skip interactive prompts, accepting defaults
    pub confirm: bool,
    /// Allow insecure (plain HTTP) registry and git connections
    pub insecure: bool,
    /// SBOM warnings become hard failures
    pub strict: bool,
}

/// Explicit context passed to every public engine API.
#[derive(Debug, Clone)]
pub struct EngineContext {
    pub config: Arc<EngineConfig>,
    pub options: CommonOptions,
    pub cancel: CancelToken,
    /// Target architecture for package operations (defaults to the host)
    pub architecture: String,
}

impl EngineContext {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config: Arc::new(config),
            options: CommonOptions::default(),
            cancel: CancelToken::new(),
            architecture: host_architecture().to_string(),
        }
    }

    pub fn with_options(mut self, options: CommonOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_architecture(mut self, arch: impl Into<String>) -> Self {
        self.architecture = arch.into();
        self
    }

    /// Staging directory for package assembly, honoring `ZARF_TMP`.
    pub fn temp_directory(&self) -> PathBuf {
        if let Ok(dir) = std::env::var("ZARF_TMP") {
            if !dir.is_empty() {
                return PathBuf::from(dir);
            }
        }
        self.config
            .package
            .temp_directory
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }

    /// Artifact cache directory, honoring `ZARF_CACHE`.
    pub fn cache_directory(&self) -> PathBuf {
        if let Ok(dir) = std::env::var("ZARF_CACHE") {
            if !dir.is_empty() {
                return PathBuf::from(dir);
            }
        }
        self.config
            .package
            .cache_path
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("zarf-cache"))
    }

    pub fn oci_concurrency(&self) -> usize {
        self.config.package.oci_concurrency.max(1)
    }
}

/// Map the compile-time target to the architecture names used in package
/// metadata and image indexes.
pub fn host_architecture() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.package.oci_concurrency, 3);
        assert!(config.set_variables.is_empty());
    }

    #[test]
    fn test_parse_config_file() {
        let toml = r#"
[package]
oci_concurrency = 6
cache_path = "/tmp/zarf-cache"

[log]
level = "debug"

[set_variables]
nginx_version = "1.25.0"
"#;
        let config: EngineConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.package.oci_concurrency, 6);
        assert_eq!(config.log.level.as_deref(), Some("debug"));
        assert_eq!(config.set_variables["nginx_version"], "1.25.0");
    }

    #[test]
    fn test_variable_overrides_uppercase_keys() {
        let mut config = EngineConfig::default();
        config
            .set_variables
            .insert("nginx_version".to_string(), "1.25.0".to_string());
        let merged = config.variable_overrides("ZARF_NO_SUCH_PREFIX_");
        assert_eq!(merged["NGINX_VERSION"], "1.25.0");
    }

    #[test]
    fn test_cancel_token() {
        let token = CancelToken::new();
        assert!(token.check().is_ok());
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
        assert!(matches!(token.check(), Err(Error::Cancelled)));
    }
}
