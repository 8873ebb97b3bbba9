//! Dependency catalog read from the `[metadata]` table of `buildpack.toml`.
//!
//! ```toml
//! [metadata.default-versions]
//! bundler = "2.*.*"
//!
//! [[metadata.dependencies]]
//! id = "bundler"
//! version = "2.5.6"
//! uri = "https://example.com/bundler-2.5.6.tgz"
//! sha256 = "..."
//! stacks = ["heroku-22", "heroku-24"]
//!
//! [[metadata.dependency-constraints]]
//! id = "bundler"
//! constraint = "2.*"
//! patches = 2
//! ```
//!
//! Version constraints follow the conventions used by catalog authors rather than
//! Cargo's: a bare version such as `2.1.4` means exactly that version, and trailing
//! wildcards like `1.*.*` or `2.0.x` mean "any release in that series".
use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;

/// Matches every stack when listed in a dependency's `stacks`
pub const ANY_STACK: &str = "*";

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct CatalogMetadata {
    #[serde(default)]
    pub default_versions: HashMap<String, String>,
    #[serde(default)]
    pub dependencies: Vec<CatalogDependency>,
    #[serde(default)]
    pub dependency_constraints: Vec<DependencyConstraint>,
}

/// A single installable release
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct CatalogDependency {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub version: Version,
    pub uri: String,
    pub sha256: String,
    #[serde(default)]
    pub stacks: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpe: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purl: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub licenses: Vec<String>,
    #[serde(default)]
    pub strip_components: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deprecation_date: Option<String>,
}

impl CatalogDependency {
    /// Human readable name, falls back to the id
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    /// The expected sha256 hex digest of the artifact
    ///
    /// Some catalogs prefix the value with the algorithm (`sha256:<hex>`).
    #[must_use]
    pub fn checksum(&self) -> &str {
        self.sha256
            .strip_prefix("sha256:")
            .unwrap_or(&self.sha256)
    }

    fn supports_stack(&self, stack: &str) -> bool {
        self.stacks
            .iter()
            .any(|supported| supported == stack || supported == ANY_STACK)
    }
}

/// Tells the catalog update tool which release lines to track
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct DependencyConstraint {
    pub id: String,
    pub constraint: String,
    pub patches: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Invalid version constraint {0:?}: {1}")]
    InvalidConstraint(String, semver::Error),

    #[error(
        "No {id} dependency found matching {constraint} for stack {stack}. Supported versions: {supported}"
    )]
    NoMatch {
        id: String,
        constraint: String,
        stack: String,
        supported: String,
    },
}

/// A parsed version requirement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionConstraint {
    /// No requirement, the highest available version wins
    Any,
    Exact(Version),
    Requirement(VersionReq),
}

impl VersionConstraint {
    #[must_use]
    pub fn matches(&self, version: &Version) -> bool {
        match self {
            VersionConstraint::Any => version.pre.is_empty(),
            VersionConstraint::Exact(exact) => exact == version,
            VersionConstraint::Requirement(req) => req.matches(version),
        }
    }
}

impl FromStr for VersionConstraint {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(version) = Version::parse(trimmed.trim_start_matches('=')) {
            return Ok(VersionConstraint::Exact(version));
        }

        match normalize_wildcards(trimmed) {
            None => Ok(VersionConstraint::Any),
            Some(normalized) => VersionReq::parse(&normalized)
                .map(VersionConstraint::Requirement)
                .map_err(|error| CatalogError::InvalidConstraint(s.to_string(), error)),
        }
    }
}

impl Display for VersionConstraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VersionConstraint::Any => f.write_str("*"),
            VersionConstraint::Exact(version) => write!(f, "={version}"),
            VersionConstraint::Requirement(req) => write!(f, "{req}"),
        }
    }
}

/// Collapses trailing wildcard segments: `1.*.*` and `1.x` become `1.*`, `*` becomes `None`.
///
/// Comparator lists (`>= 1.0, < 2.0`) pass through untouched.
fn normalize_wildcards(constraint: &str) -> Option<String> {
    if constraint.is_empty() {
        return None;
    }
    if constraint.contains([',', '<', '>', '~', '^', ' ']) {
        return Some(constraint.to_string());
    }

    let segments = constraint.split('.').collect::<Vec<_>>();
    let concrete = segments
        .iter()
        .take_while(|segment| !matches!(**segment, "*" | "x" | "X"))
        .copied()
        .collect::<Vec<_>>();

    if concrete.is_empty() {
        None
    } else if concrete.len() == segments.len() {
        // Partial bare versions (`2.3`) pin the series, not a caret range
        if concrete
            .iter()
            .all(|segment| segment.chars().all(|c| c.is_ascii_digit()))
        {
            Some(format!("={constraint}"))
        } else {
            Some(constraint.to_string())
        }
    } else {
        Some(format!("{}.*", concrete.join(".")))
    }
}

impl CatalogMetadata {
    /// Finds the highest version of `id` that satisfies `constraint` on `stack`
    ///
    /// An empty constraint, or the literal `default`, resolves through
    /// `default-versions`. When no default is configured every version is eligible.
    ///
    /// # Errors
    ///
    /// - The constraint (or configured default) cannot be parsed
    /// - No dependency matches
    pub fn resolve(
        &self,
        id: &str,
        constraint: Option<&str>,
        stack: &str,
    ) -> Result<&CatalogDependency, CatalogError> {
        let requested = match constraint.map(str::trim) {
            None | Some("" | "default") => self
                .default_versions
                .get(id)
                .map_or("*", String::as_str),
            Some(value) => value,
        };
        let parsed = requested.parse::<VersionConstraint>()?;

        let candidates = self
            .dependencies
            .iter()
            .filter(|dependency| dependency.id == id && dependency.supports_stack(stack))
            .collect::<Vec<_>>();

        candidates
            .iter()
            .filter(|dependency| parsed.matches(&dependency.version))
            .max_by(|a, b| a.version.cmp(&b.version))
            .copied()
            .ok_or_else(|| CatalogError::NoMatch {
                id: id.to_string(),
                constraint: requested.to_string(),
                stack: stack.to_string(),
                supported: if candidates.is_empty() {
                    String::from("none")
                } else {
                    candidates
                        .iter()
                        .map(|dependency| dependency.version.to_string())
                        .collect::<Vec<_>>()
                        .join(", ")
                },
            })
    }
}
