use crate::dependency::DependencyInstaller;
use crate::output::gem_path_line;
use crate::sbom::BomEntry;
use crate::shimmer::Shimmer;
use crate::{BundlerBuildpack, BundlerBuildpackError};
use bullet_stream::state::SubBullet;
use bullet_stream::{Print, style};
use commons::catalog::CatalogDependency;
use libcnb::build::BuildContext;
use libcnb::data::layer_name;
use libcnb::generic::GenericMetadata;
use libcnb::layer::{
    CachedLayerDefinition, EmptyLayerCause, InvalidMetadataAction, LayerRef, LayerState,
    RestoredLayerAction, UncachedLayerDefinition,
};
use libcnb::layer_env::{LayerEnv, ModificationBehavior, Scope};
use magic_migrate::{TryMigrate, try_migrate_deserializer_chain};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

type Metadata = BundlerLayerMetadata;

/// What the build plan asked for
#[derive(Debug, Clone, Copy)]
pub(crate) struct BundlerInstall<'a> {
    pub(crate) dependency: &'a CatalogDependency,
    pub(crate) build: bool,
    pub(crate) launch: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub(crate) struct LayerTypes {
    pub(crate) build: bool,
    pub(crate) launch: bool,
    pub(crate) cache: bool,
}

/// The `bundler` layer after this build has finished with it
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct BundlerLayer {
    pub(crate) path: PathBuf,
    pub(crate) types: LayerTypes,
    pub(crate) env: LayerEnv,
    pub(crate) build_bom: Vec<BomEntry>,
    pub(crate) launch_bom: Vec<BomEntry>,
}

/// Installs Bundler into the `bundler` layer unless a previous build already did
///
/// A layer needed at build time is cached between builds and reused while its
/// recorded `dependency-content-hash` matches the dependency checksum. A
/// launch-only layer is not cached, only its `bundler.toml` is restored. When
/// that file still records the same checksum the layer is left untouched so
/// the exporter reuses it from the previous image.
///
/// The checksum is written last. If install or shim fails the layer keeps no
/// hash and the next build installs again.
pub(crate) fn install_bundler<W>(
    context: &BuildContext<BundlerBuildpack>,
    installer: &dyn DependencyInstaller,
    shimmer: &dyn Shimmer,
    request: BundlerInstall<'_>,
    mut bullet: Print<SubBullet<W>>,
) -> libcnb::Result<(Print<SubBullet<W>>, BundlerLayer), BundlerBuildpackError>
where
    W: Write + Send + Sync + 'static,
{
    let checksum = request.dependency.checksum().to_string();

    if request.build {
        let layer_ref = context.cached_layer(
            layer_name!("bundler"),
            CachedLayerDefinition {
                build: true,
                launch: request.launch,
                invalid_metadata_action: &invalid_metadata_action,
                restored_layer_action: &|old: &Metadata, _| restored_layer_action(old, &checksum),
            },
        )?;

        match &layer_ref.state {
            LayerState::Restored { .. } => {
                bullet = bullet.sub_bullet(format!(
                    "Reusing cached layer {}",
                    style::value(layer_ref.path().display().to_string())
                ));
                let layer = bundler_layer(layer_ref.path(), layer_ref.read_env()?, request);
                return Ok((bullet, layer));
            }
            LayerState::Empty { cause } => match cause {
                EmptyLayerCause::NewlyCreated => {}
                EmptyLayerCause::InvalidMetadataAction { cause }
                | EmptyLayerCause::RestoredLayerAction { cause } => {
                    bullet = bullet.sub_bullet(format!("Clearing cache ({cause})"));
                }
            },
        }

        bullet = populate(context, &layer_ref, installer, shimmer, request, bullet)?;
        let layer = bundler_layer(layer_ref.path(), layer_ref.read_env()?, request);
        Ok((bullet, layer))
    } else {
        let layer_path = context.layers_dir.join("bundler");
        match launch_layer_action(&context.layers_dir, &checksum, request.launch) {
            Some((RestoredLayerAction::KeepLayer, _)) => {
                bullet = bullet.sub_bullet(format!(
                    "Reusing layer {}",
                    style::value(layer_path.display().to_string())
                ));
                let env = layer_env(&layer_path);
                return Ok((bullet, bundler_layer(layer_path, env, request)));
            }
            Some((RestoredLayerAction::DeleteLayer, cause)) => {
                bullet = bullet.sub_bullet(format!("Clearing cache ({cause})"));
            }
            None => {}
        }

        let layer_ref = context.uncached_layer(
            layer_name!("bundler"),
            UncachedLayerDefinition {
                build: false,
                launch: request.launch,
            },
        )?;

        bullet = populate(context, &layer_ref, installer, shimmer, request, bullet)?;
        let layer = bundler_layer(layer_ref.path(), layer_ref.read_env()?, request);
        Ok((bullet, layer))
    }
}

/// `bundler.toml` as the platform restores it for a layer that is not cached
#[derive(Deserialize, Debug, Default)]
struct StoredLayer {
    #[serde(default)]
    types: Option<LayerTypes>,
    #[serde(default)]
    metadata: Option<toml::Table>,
}

/// Decides whether the launch-only layer exported by the previous build can stay
///
/// `None` means there is nothing from a previous build to compare against.
fn launch_layer_action(
    layers_dir: &Path,
    checksum: &str,
    launch: bool,
) -> Option<(RestoredLayerAction, String)> {
    let contents = fs_err::read_to_string(layers_dir.join("bundler.toml")).ok()?;
    let Ok(stored) = toml::from_str::<StoredLayer>(&contents) else {
        return Some((
            RestoredLayerAction::DeleteLayer,
            String::from("unreadable layer metadata"),
        ));
    };

    let expected = LayerTypes {
        build: false,
        launch,
        cache: false,
    };
    if stored.types != Some(expected) {
        return Some((
            RestoredLayerAction::DeleteLayer,
            String::from("layer types changed"),
        ));
    }

    let metadata = stored
        .metadata
        .and_then(|table| toml::to_string(&table).ok())
        .unwrap_or_default();
    match Metadata::try_from_str_migrations(&metadata) {
        Some(Ok(old)) => Some(restored_layer_action(&old, checksum)),
        Some(Err(error)) => Some((
            RestoredLayerAction::DeleteLayer,
            format!("error while migrating metadata {error}"),
        )),
        None => Some((
            RestoredLayerAction::DeleteLayer,
            String::from("unknown metadata"),
        )),
    }
}

fn populate<W, MAC, RAC>(
    context: &BuildContext<BundlerBuildpack>,
    layer_ref: &LayerRef<BundlerBuildpack, MAC, RAC>,
    installer: &dyn DependencyInstaller,
    shimmer: &dyn Shimmer,
    request: BundlerInstall<'_>,
    mut bullet: Print<SubBullet<W>>,
) -> libcnb::Result<Print<SubBullet<W>>, BundlerBuildpackError>
where
    W: Write + Send + Sync + 'static,
{
    let dependency = request.dependency;
    let layer_path = layer_ref.path();

    bullet = bullet.sub_bullet("Executing build process");
    let timer = bullet.start_timer(format!(
        "Installing {name} {version}",
        name = dependency.display_name(),
        version = style::value(dependency.version.to_string())
    ));
    installer
        .install(
            dependency,
            &context.buildpack_dir,
            &layer_path,
            &context.platform.root,
        )
        .map_err(BundlerBuildpackError::DependencyInstall)?;
    shimmer
        .shim(&layer_path.join("bin"), &dependency.version.to_string())
        .map_err(BundlerBuildpackError::Shim)?;
    bullet = timer.done();

    layer_ref.write_env(layer_env(&layer_path))?;
    bullet = bullet
        .sub_bullet("Configuring environment")
        .sub_bullet(gem_path_line(&layer_path));

    layer_ref.write_metadata(Metadata {
        dependency_content_hash: dependency.checksum().to_string(),
        built_at: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Nanos, true),
    })?;

    Ok(bullet)
}

fn bundler_layer(path: PathBuf, env: LayerEnv, request: BundlerInstall<'_>) -> BundlerLayer {
    let bom = vec![BomEntry::from(request.dependency)];

    BundlerLayer {
        path,
        types: LayerTypes {
            build: request.build,
            launch: request.launch,
            cache: request.build,
        },
        env,
        build_bom: if request.build { bom.clone() } else { Vec::new() },
        launch_bom: if request.launch { bom } else { Vec::new() },
    }
}

fn layer_env(layer_path: &Path) -> LayerEnv {
    LayerEnv::new()
        .chainable_insert(Scope::All, ModificationBehavior::Delimiter, "GEM_PATH", ":")
        .chainable_insert(
            Scope::All,
            ModificationBehavior::Append,
            "GEM_PATH",
            layer_path,
        )
}

fn restored_layer_action(old: &Metadata, checksum: &str) -> (RestoredLayerAction, String) {
    if old.dependency_content_hash == checksum {
        (
            RestoredLayerAction::KeepLayer,
            String::from("dependency checksum unchanged"),
        )
    } else {
        (
            RestoredLayerAction::DeleteLayer,
            format!(
                "dependency checksum changed from {old} to {checksum}",
                old = old.dependency_content_hash
            ),
        )
    }
}

fn invalid_metadata_action(invalid: &GenericMetadata) -> (InvalidMetadataAction<Metadata>, String) {
    let toml_string = invalid
        .as_ref()
        .and_then(|table| toml::to_string(table).ok())
        .unwrap_or_default();

    match Metadata::try_from_str_migrations(&toml_string) {
        Some(Ok(migrated)) => (
            InvalidMetadataAction::ReplaceMetadata(migrated),
            String::from("migrated metadata"),
        ),
        Some(Err(error)) => (
            InvalidMetadataAction::DeleteLayer,
            format!("error while migrating metadata {error}"),
        ),
        None => (
            InvalidMetadataAction::DeleteLayer,
            String::from("unknown metadata"),
        ),
    }
}

/// Written by releases that stored the checksum as `dependency-sha`
#[derive(Deserialize, Serialize, Debug, Clone, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub(crate) struct BundlerLayerMetadataV1 {
    #[serde(rename = "dependency-sha")]
    pub(crate) dependency_sha: String,
    #[serde(default)]
    pub(crate) built_at: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub(crate) struct BundlerLayerMetadataV2 {
    /// Checksum of the installed dependency, the only value compared between builds
    #[serde(rename = "dependency-content-hash")]
    pub(crate) dependency_content_hash: String,

    /// Informational
    #[serde(default)]
    pub(crate) built_at: String,
}

try_migrate_deserializer_chain!(
    chain: [BundlerLayerMetadataV1, BundlerLayerMetadataV2],
    error: MetadataMigrateError,
    deserializer: toml::Deserializer::new,
);
pub(crate) type BundlerLayerMetadata = BundlerLayerMetadataV2;

#[derive(thiserror::Error, Debug)]
pub(crate) enum MetadataMigrateError {
    #[error("Could not migrate metadata, dependency-sha is empty")]
    EmptyChecksum,
}

impl TryFrom<BundlerLayerMetadataV1> for BundlerLayerMetadataV2 {
    type Error = MetadataMigrateError;

    fn try_from(v1: BundlerLayerMetadataV1) -> Result<Self, Self::Error> {
        if v1.dependency_sha.trim().is_empty() {
            return Err(MetadataMigrateError::EmptyChecksum);
        }

        Ok(Self {
            dependency_content_hash: v1.dependency_sha,
            built_at: v1.built_at.unwrap_or_default(),
        })
    }
}
