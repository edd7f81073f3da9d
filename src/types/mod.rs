// src/types/mod.rs

//! Data model shared by every engine component
//!
//! The package manifest (`zarf.yaml`), its components, and the per-cluster
//! state record. Serialized field names follow the established wire format
//! (camelCase YAML/JSON), so these types round-trip manifests written for
//! the original tooling.

pub mod component;
pub mod deprecated;
pub mod package;
pub mod state;

pub use component::{
    ActionDefaults, DataInjection, ZarfAction, ZarfActionSet, ZarfActionWait,
    ZarfActionWaitCluster, ZarfActionWaitNetwork, ZarfChart, ZarfComponent, ZarfComponentActions,
    ZarfComponentImport, ZarfComponentOnly, ZarfComponentOnlyCluster, ZarfContainerTarget,
    ZarfFile, ZarfManifest,
};
pub use package::{
    BuildData, Constant, PackageKind, PackageMetadata, SetVariable, Variable, VariableType,
    ZarfPackage,
};
pub use state::{
    ArtifactServerInfo, ConnectString, ConnectStrings, DeployedComponent, DeployedPackage,
    GeneratedPki, GitServerInfo, InstalledChart, RegistryInfo, ZarfState,
};
