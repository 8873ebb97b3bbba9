use crate::config::BundlerConfig;
use crate::plan::VersionRequirement;
use crate::version_source::{VersionParseError, VersionParser};
use libcnb::Env;
use std::path::Path;

/// What detection contributes to the build plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DetectedPlan {
    pub(crate) provides: String,
    pub(crate) requires: Vec<VersionRequirement>,
}

/// Collects version requests for the configured dependency
///
/// The environment variable is consulted first, then each parser in order. Every
/// source that yields a version adds one requirement needed at build and launch.
/// The first parse error aborts detection.
pub(crate) fn detect(
    config: &BundlerConfig,
    parsers: &[&dyn VersionParser],
    app_dir: &Path,
    env: &Env,
) -> Result<DetectedPlan, VersionParseError> {
    let mut requires = Vec::new();

    if let Some(version) = env
        .get(&config.env_var)
        .map(|version| version.to_string_lossy().trim().to_string())
        .filter(|version| !version.is_empty())
    {
        requires.push(VersionRequirement::new(
            &config.dependency,
            &config.env_var,
            version,
        ));
    }

    for parser in parsers {
        if let Some(version) = parser.parse_version(&app_dir.join(parser.source()))? {
            requires.push(VersionRequirement::new(
                &config.dependency,
                parser.source(),
                version,
            ));
        }
    }

    Ok(DetectedPlan {
        provides: config.dependency.clone(),
        requires,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version_source::{BuildpackYmlParser, GemfileLockParser};
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;
    use std::path::PathBuf;

    struct FakeParser {
        source: &'static str,
        version: Option<&'static str>,
        fail: bool,
        calls: RefCell<Vec<PathBuf>>,
    }

    impl FakeParser {
        fn new(source: &'static str, version: Option<&'static str>) -> Self {
            Self {
                source,
                version,
                fail: false,
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl VersionParser for FakeParser {
        fn source(&self) -> &str {
            self.source
        }

        fn parse_version(&self, path: &Path) -> Result<Option<String>, VersionParseError> {
            self.calls.borrow_mut().push(path.to_path_buf());
            if self.fail {
                return Err(VersionParseError::InvalidVersion {
                    name: self.source.to_string(),
                    path: path.to_path_buf(),
                    version: String::from("nope"),
                });
            }
            Ok(self.version.map(String::from))
        }
    }

    #[test]
    fn requirements_follow_source_priority() {
        let yml = FakeParser::new("buildpack.yml", Some("2.1.4"));
        let lock = FakeParser::new("Gemfile.lock", Some("1.*.*"));
        let mut env = Env::new();
        env.insert("BP_BUNDLER_VERSION", "2.5.6");

        let plan = detect(
            &BundlerConfig::default(),
            &[&yml, &lock],
            Path::new("/workspace"),
            &env,
        )
        .unwrap();

        assert_eq!(plan.provides, "bundler");
        assert_eq!(
            plan.requires,
            vec![
                VersionRequirement::new("bundler", "BP_BUNDLER_VERSION", "2.5.6"),
                VersionRequirement::new("bundler", "buildpack.yml", "2.1.4"),
                VersionRequirement::new("bundler", "Gemfile.lock", "1.*.*"),
            ]
        );
        assert_eq!(
            yml.calls.borrow().as_slice(),
            &[PathBuf::from("/workspace/buildpack.yml")]
        );
    }

    #[test]
    fn no_sources_still_provides() {
        let yml = FakeParser::new("buildpack.yml", None);
        let mut env = Env::new();
        env.insert("BP_BUNDLER_VERSION", "   ");

        let plan = detect(
            &BundlerConfig::default(),
            &[&yml],
            Path::new("/workspace"),
            &env,
        )
        .unwrap();

        assert_eq!(plan.provides, "bundler");
        assert!(plan.requires.is_empty());
    }

    #[test]
    fn first_parse_error_aborts() {
        let mut yml = FakeParser::new("buildpack.yml", None);
        yml.fail = true;
        let lock = FakeParser::new("Gemfile.lock", Some("2.*.*"));

        let error = detect(
            &BundlerConfig::default(),
            &[&yml, &lock],
            Path::new("/workspace"),
            &Env::new(),
        )
        .unwrap_err();

        assert_eq!(error.source_name(), "buildpack.yml");
        assert!(lock.calls.borrow().is_empty());
    }

    #[test]
    fn reads_real_files() {
        let tmp = tempfile::tempdir().unwrap();
        fs_err::write(
            tmp.path().join("Gemfile.lock"),
            "GEM\n  specs:\n\nBUNDLED WITH\n   2.4.22\n",
        )
        .unwrap();

        let plan = detect(
            &BundlerConfig::default(),
            &[&BuildpackYmlParser, &GemfileLockParser],
            tmp.path(),
            &Env::new(),
        )
        .unwrap();

        assert_eq!(
            plan.requires,
            vec![VersionRequirement::new("bundler", "Gemfile.lock", "2.*.*")]
        );
    }
}
