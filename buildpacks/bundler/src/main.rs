use bullet_stream::{Print, style};
use commons::catalog::{CatalogDependency, CatalogError, CatalogMetadata};
use commons::dependency::DependencyInstallError;
use config::{BUILDPACK_YML, BundlerConfig};
use dependency::{CatalogInstaller, DependencyResolver};
use layers::bundler_install_layer::{BundlerInstall, install_bundler};
use libcnb::build::{BuildContext, BuildResult, BuildResultBuilder};
use libcnb::data::build_plan::BuildPlanBuilder;
use libcnb::detect::{DetectContext, DetectResult, DetectResultBuilder};
use libcnb::generic::GenericPlatform;
use libcnb::{Env, Platform, buildpack_main};
use plan::{InvalidPlanEntry, VersionRequirement};
use shimmer::{ShimError, VersionShimmer};
use std::io::stdout;
use std::path::{Path, PathBuf};
use stack::StackError;
use version_source::{BuildpackYmlParser, GemfileLockParser, VersionParseError};

mod config;
mod dependency;
mod detect;
mod layers;
mod output;
mod plan;
mod sbom;
mod shimmer;
mod stack;
mod user_errors;
mod version_source;

#[cfg(test)]
use libcnb_test as _;

use clap as _;
use semver as _;
use ureq as _;

struct BundlerBuildpack;

/// Platform env plus the platform root, bindings live under `<root>/bindings`
#[derive(Debug, Clone)]
pub(crate) struct BundlerPlatform {
    env: Env,
    pub(crate) root: PathBuf,
}

impl Platform for BundlerPlatform {
    fn env(&self) -> &Env {
        &self.env
    }

    fn from_path(platform_dir: impl AsRef<Path>) -> std::io::Result<Self> {
        let root = platform_dir.as_ref().to_path_buf();
        let env = GenericPlatform::from_path(&root)?.env().clone();
        Ok(Self { env, root })
    }
}

impl libcnb::Buildpack for BundlerBuildpack {
    type Platform = BundlerPlatform;
    type Metadata = CatalogMetadata;
    type Error = BundlerBuildpackError;

    fn detect(&self, context: DetectContext<Self>) -> libcnb::Result<DetectResult, Self::Error> {
        let config = BundlerConfig::default();
        let env = build_env(context.platform.env());

        let plan = detect::detect(
            &config,
            &[&BuildpackYmlParser, &GemfileLockParser],
            &context.app_dir,
            &env,
        )
        .map_err(BundlerBuildpackError::Detect)?;

        let mut plan_builder = BuildPlanBuilder::new().provides(&plan.provides);
        for requirement in &plan.requires {
            plan_builder = plan_builder.requires(
                requirement
                    .to_require()
                    .map_err(BundlerBuildpackError::BuildPlanMetadata)?,
            );
        }

        DetectResultBuilder::pass()
            .build_plan(plan_builder.build())
            .build()
    }

    fn build(&self, context: BuildContext<Self>) -> libcnb::Result<BuildResult, Self::Error> {
        let config = BundlerConfig::default();
        let env = build_env(context.platform.env());
        let catalog = &context.buildpack_descriptor.metadata;

        let mut bullet = Print::new(stdout()).h2(format!(
            "{name} {version}",
            name = context
                .buildpack_descriptor
                .buildpack
                .name
                .as_deref()
                .unwrap_or("Heroku Bundler"),
            version = context.buildpack_descriptor.buildpack.version
        ));

        let requirements = context
            .buildpack_plan
            .entries
            .iter()
            .map(VersionRequirement::try_from)
            .collect::<Result<Vec<_>, _>>()
            .map_err(BundlerBuildpackError::InvalidPlanEntry)?;
        let (chosen, candidates) =
            plan::resolve(&config.dependency, &requirements, &config.sources);
        let (launch, build) = plan::merge_layer_types(&config.dependency, &requirements);

        let mut section = bullet.bullet("Bundler version");
        section = section.sub_bullet("Candidate version sources (in priority order):");
        for line in output::candidate_lines(&candidates) {
            section = section.sub_bullet(line);
        }

        let stack = stack::stack_id(&context.target, &env)
            .map_err(BundlerBuildpackError::UnknownStack)?;
        let dependency = DependencyResolver::resolve(
            catalog,
            &config.dependency,
            chosen.version(),
            &stack,
        )
        .map_err(BundlerBuildpackError::Catalog)?;

        section = section.sub_bullet(format!(
            "Selected {name} version (using {source}): {version}",
            name = dependency.display_name(),
            source = chosen.version_source().unwrap_or("<unknown>"),
            version = style::value(dependency.version.to_string())
        ));
        if let Some(deprecated) = deprecation_warning(&dependency, chrono::Utc::now()) {
            section = section.sub_bullet(deprecated);
        }
        if chosen.version_source() == Some(BUILDPACK_YML) {
            let next_major = context.buildpack_descriptor.buildpack.version.major + 1;
            section = section
                .sub_bullet(format!(
                    "{warning} Setting the Bundler version through {file} will be deprecated soon in Bundler Buildpack v{next_major}.0.0.",
                    warning = style::important("WARNING:"),
                    file = style::value(BUILDPACK_YML),
                ))
                .sub_bullet(format!(
                    "Please specify the version through the {env_var} environment variable instead.",
                    env_var = style::value(format!("${}", config.env_var)),
                ));
        }
        bullet = section.done();

        let (section, layer) = install_bundler(
            &context,
            &CatalogInstaller,
            &VersionShimmer,
            BundlerInstall {
                dependency: &dependency,
                build,
                launch,
            },
            bullet.bullet("Bundler install"),
        )?;
        bullet = section.done();

        let mut result = BuildResultBuilder::new();
        if let Some(sbom) = sbom::sbom(&layer.build_bom).map_err(BundlerBuildpackError::Sbom)? {
            result = result.build_sbom(sbom);
        }
        if let Some(sbom) = sbom::sbom(&layer.launch_bom).map_err(BundlerBuildpackError::Sbom)? {
            result = result.launch_sbom(sbom);
        }
        bullet.done();

        result.build()
    }

    fn on_error(&self, err: libcnb::Error<Self::Error>) {
        user_errors::on_error(err);
    }
}

/// Process env with user provided platform env layered on top
fn build_env(platform_env: &Env) -> Env {
    let mut env = Env::from_current();
    for (k, v) in platform_env {
        env.insert(k, v);
    }
    env
}

/// Warns once a dependency is past its `deprecation-date`
fn deprecation_warning(
    dependency: &CatalogDependency,
    now: chrono::DateTime<chrono::Utc>,
) -> Option<String> {
    let date = dependency.deprecation_date.as_deref()?;
    let deprecated_on = chrono::DateTime::parse_from_rfc3339(date)
        .map(|datetime| datetime.date_naive())
        .or_else(|_| chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d"))
        .ok()?;

    (deprecated_on <= now.date_naive()).then(|| {
        format!(
            "{warning} {name} {version} reached its deprecation date on {deprecated_on}",
            warning = style::important("WARNING:"),
            name = dependency.display_name(),
            version = dependency.version,
        )
    })
}

#[derive(Debug)]
pub(crate) enum BundlerBuildpackError {
    Detect(VersionParseError),
    BuildPlanMetadata(toml::ser::Error),
    InvalidPlanEntry(InvalidPlanEntry),
    UnknownStack(StackError),
    Catalog(CatalogError),
    DependencyInstall(DependencyInstallError),
    Shim(ShimError),
    Sbom(serde_json::Error),
}

impl From<BundlerBuildpackError> for libcnb::Error<BundlerBuildpackError> {
    fn from(error: BundlerBuildpackError) -> Self {
        libcnb::Error::BuildpackError(error)
    }
}

buildpack_main!(BundlerBuildpack);
