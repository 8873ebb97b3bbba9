use crate::config::{BUILDPACK_YML, GEMFILE_LOCK};
use regex::Regex;
use serde::Deserialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static LOCKFILE_VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^v?(?P<major>\d+)(?:\.\d+){0,2}(?:[-+][0-9A-Za-z.+-]*)?$").expect("clippy")
});

/// A file in the app that may request a version of the dependency
pub(crate) trait VersionParser {
    /// Name recorded as the requirement's `version-source`, also the file name in the app
    fn source(&self) -> &str;

    /// A missing file is `Ok(None)`, a present but malformed one is an error
    fn parse_version(&self, path: &Path) -> Result<Option<String>, VersionParseError>;
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum VersionParseError {
    #[error("Could not read {name} at {path}: {error}")]
    Read {
        name: String,
        path: PathBuf,
        error: std::io::Error,
    },

    #[error("Could not parse {name} at {path}: {error}")]
    Yaml {
        name: String,
        path: PathBuf,
        error: serde_yaml::Error,
    },

    #[error("Invalid version {version:?} in {name} at {path}")]
    InvalidVersion {
        name: String,
        path: PathBuf,
        version: String,
    },
}

impl VersionParseError {
    pub(crate) fn source_name(&self) -> &str {
        match self {
            VersionParseError::Read { name, .. }
            | VersionParseError::Yaml { name, .. }
            | VersionParseError::InvalidVersion { name, .. } => name,
        }
    }
}

fn read_optional(name: &str, path: &Path) -> Result<Option<String>, VersionParseError> {
    match fs_err::read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
        Err(error) => Err(VersionParseError::Read {
            name: name.to_string(),
            path: path.to_path_buf(),
            error,
        }),
    }
}

/// Reads `bundler.version` from `buildpack.yml`
///
/// ```yaml
/// bundler:
///   version: 2.1.4
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct BuildpackYmlParser;

#[derive(Deserialize, Debug, Default)]
struct BuildpackYml {
    #[serde(default)]
    bundler: Option<BundlerSection>,
}

/// `version` is read as text so `2.10` is not collapsed to the float `2.1`
#[derive(Deserialize, Debug, Default)]
struct BundlerSection {
    #[serde(default)]
    version: Option<String>,
}

impl VersionParser for BuildpackYmlParser {
    fn source(&self) -> &str {
        BUILDPACK_YML
    }

    fn parse_version(&self, path: &Path) -> Result<Option<String>, VersionParseError> {
        let Some(contents) = read_optional(self.source(), path)? else {
            return Ok(None);
        };
        if contents.trim().is_empty() {
            return Ok(None);
        }

        let config: BuildpackYml =
            serde_yaml::from_str(&contents).map_err(|error| VersionParseError::Yaml {
                name: self.source().to_string(),
                path: path.to_path_buf(),
                error,
            })?;

        let version = config.bundler.and_then(|bundler| bundler.version);

        Ok(version
            .map(|version| version.trim().to_string())
            .filter(|version| !version.is_empty()))
    }
}

/// Reads the version after `BUNDLED WITH` in `Gemfile.lock`
///
/// The lockfile records whatever Bundler last wrote it, so only the major
/// version is kept: `2.4.22` requests `2.*.*`.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct GemfileLockParser;

impl VersionParser for GemfileLockParser {
    fn source(&self) -> &str {
        GEMFILE_LOCK
    }

    fn parse_version(&self, path: &Path) -> Result<Option<String>, VersionParseError> {
        let Some(contents) = read_optional(self.source(), path)? else {
            return Ok(None);
        };

        let mut lines = contents.lines();
        while let Some(line) = lines.next() {
            if line.trim() != "BUNDLED WITH" {
                continue;
            }
            let Some(raw) = lines.next().map(str::trim) else {
                return Ok(None);
            };

            return LOCKFILE_VERSION
                .captures(raw)
                .map(|captures| format!("{}.*.*", &captures["major"]))
                .map(Some)
                .ok_or_else(|| VersionParseError::InvalidVersion {
                    name: self.source().to_string(),
                    path: path.to_path_buf(),
                    version: raw.to_string(),
                });
        }

        Ok(None)
    }
}
