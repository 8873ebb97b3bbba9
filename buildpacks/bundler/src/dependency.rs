use commons::catalog::{CatalogDependency, CatalogError, CatalogMetadata};
use commons::dependency::DependencyInstallError;
use std::path::Path;

/// Finds the catalog release for a requested version
pub(crate) trait DependencyResolver {
    fn resolve(
        &self,
        id: &str,
        constraint: Option<&str>,
        stack: &str,
    ) -> Result<CatalogDependency, CatalogError>;
}

impl DependencyResolver for CatalogMetadata {
    fn resolve(
        &self,
        id: &str,
        constraint: Option<&str>,
        stack: &str,
    ) -> Result<CatalogDependency, CatalogError> {
        CatalogMetadata::resolve(self, id, constraint, stack).cloned()
    }
}

/// Places a resolved release on disk
pub(crate) trait DependencyInstaller {
    fn install(
        &self,
        dependency: &CatalogDependency,
        buildpack_dir: &Path,
        layer_path: &Path,
        platform_dir: &Path,
    ) -> Result<(), DependencyInstallError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct CatalogInstaller;

impl DependencyInstaller for CatalogInstaller {
    fn install(
        &self,
        dependency: &CatalogDependency,
        buildpack_dir: &Path,
        layer_path: &Path,
        platform_dir: &Path,
    ) -> Result<(), DependencyInstallError> {
        commons::dependency::install(dependency, buildpack_dir, layer_path, platform_dir)
    }
}
