pub(crate) const BUNDLER: &str = "bundler";
pub(crate) const BP_BUNDLER_VERSION: &str = "BP_BUNDLER_VERSION";
pub(crate) const BUILDPACK_YML: &str = "buildpack.yml";
pub(crate) const GEMFILE_LOCK: &str = "Gemfile.lock";

/// Names the dependency this buildpack manages and where versions for it come from
///
/// `sources` is in priority order, highest first. Detection emits requirements in
/// this order and plan resolution prefers earlier sources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BundlerConfig {
    pub(crate) dependency: String,
    pub(crate) env_var: String,
    pub(crate) sources: Vec<String>,
}

impl Default for BundlerConfig {
    fn default() -> Self {
        Self {
            dependency: String::from(BUNDLER),
            env_var: String::from(BP_BUNDLER_VERSION),
            sources: vec![
                String::from(BP_BUNDLER_VERSION),
                String::from(BUILDPACK_YML),
                String::from(GEMFILE_LOCK),
            ],
        }
    }
}
