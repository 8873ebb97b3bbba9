// Enable Clippy lints that are disabled by default.
// https://rust-lang.github.io/rust-clippy/stable/index.html
#![warn(clippy::pedantic)]

use bullet_stream::{Print, style};
use clap::Parser;
use commons::catalog::{CatalogError, CatalogMetadata, VersionConstraint};
use semver::Version;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::exit;

const DEPENDENCY_ID: &str = "bundler";
const DEFAULT_RELEASE_INDEX: &str = "https://rubygems.org/api/v1/versions/bundler.json";
const STACKS: &[&str] = &["heroku-20", "heroku-22", "heroku-24"];
const TARGET: &str = "ubuntu";

/// Update catalog
///
/// Lists Bundler releases newer than what `buildpack.toml` already carries,
/// following its `[[metadata.dependency-constraints]]`, and writes them as JSON.
///
/// Example:
///
/// ```shell
/// $ cargo run --bin update_catalog -- --buildpack-toml buildpacks/bundler/buildpack.toml --output new_versions.json
/// ```
#[derive(Parser, Debug)]
struct Args {
    /// Path to buildpack.toml with existing dependencies
    #[arg(long)]
    buildpack_toml: PathBuf,

    /// File the release metadata JSON is written to
    #[arg(long)]
    output: PathBuf,

    /// Release index to search for new versions
    #[arg(long, default_value = DEFAULT_RELEASE_INDEX)]
    release_index: String,
}

/// An entry of the rubygems versions index
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
struct Release {
    #[serde(rename = "number", default)]
    version: String,
    #[serde(rename = "sha", default)]
    sha256: String,
    #[serde(default)]
    prerelease: bool,
    #[serde(default)]
    licenses: Option<Vec<String>>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
struct ReleaseMetadata {
    id: String,
    name: String,
    version: String,
    stacks: Vec<String>,
    source: String,
    source_checksum: String,
    cpe: String,
    purl: String,
    licenses: Vec<String>,
    target: String,
}

#[derive(Deserialize, Debug)]
struct BuildpackToml {
    #[serde(default)]
    metadata: CatalogMetadata,
}

#[derive(Debug, thiserror::Error)]
enum UpdateError {
    // Boxed to prevent `large_enum_variant` errors since `ureq::Error` is massive.
    #[error("Could not fetch release index {0}: {1}")]
    Request(String, Box<ureq::Error>),

    #[error("Could not read release index response: {0}")]
    Response(std::io::Error),

    #[error("Error parsing release index JSON: {0}")]
    ReleaseJson(serde_json::Error),

    #[error("Release index element {0} missing version")]
    MissingVersion(usize),

    #[error("Release index element {0} missing sha256")]
    MissingChecksum(usize),

    #[error("No valid releases found")]
    NoReleases,

    #[error("Could not read buildpack.toml: {0}")]
    ReadBuildpackToml(std::io::Error),

    #[error("Could not parse buildpack.toml: {0}")]
    ParseBuildpackToml(toml::de::Error),

    #[error(transparent)]
    Constraint(#[from] CatalogError),

    #[error("Could not serialize release metadata: {0}")]
    Serialize(serde_json::Error),

    #[error("Cannot write to {0}: {1}")]
    Write(PathBuf, std::io::Error),
}

fn main() {
    let args = Args::parse();
    let log = Print::new(std::io::stderr()).h2("Update Bundler catalog");

    match run(&args) {
        Ok(metadata) => {
            let mut bullet = log.bullet(format!(
                "Wrote {count} new version(s) to {output}",
                count = metadata.len(),
                output = style::value(args.output.display().to_string())
            ));
            for release in metadata {
                bullet = bullet.sub_bullet(style::value(release.version));
            }
            bullet.done().done();
        }
        Err(error) => {
            log.error(format!("{error}"));
            exit(1);
        }
    }
}

fn run(args: &Args) -> Result<Vec<ReleaseMetadata>, UpdateError> {
    let releases = fetch_releases(&args.release_index)?;
    let catalog = read_catalog(&args.buildpack_toml)?;

    let metadata = find_new_versions(&catalog, &releases, DEPENDENCY_ID)?
        .iter()
        .map(release_metadata)
        .collect::<Vec<_>>();

    let json = serde_json::to_vec(&metadata).map_err(UpdateError::Serialize)?;
    fs_err::write(&args.output, json)
        .map_err(|error| UpdateError::Write(args.output.clone(), error))?;

    Ok(metadata)
}

fn read_catalog(path: &Path) -> Result<CatalogMetadata, UpdateError> {
    let contents = fs_err::read_to_string(path).map_err(UpdateError::ReadBuildpackToml)?;
    toml::from_str::<BuildpackToml>(&contents)
        .map(|buildpack_toml| buildpack_toml.metadata)
        .map_err(UpdateError::ParseBuildpackToml)
}

fn fetch_releases(index: &str) -> Result<Vec<Release>, UpdateError> {
    let body = ureq::get(index)
        .call()
        .map_err(|error| UpdateError::Request(index.to_string(), Box::new(error)))?
        .into_string()
        .map_err(UpdateError::Response)?;

    parse_releases(&body)
}

/// Drops prereleases, every entry must carry a version and checksum
fn parse_releases(json: &str) -> Result<Vec<Release>, UpdateError> {
    let releases = serde_json::from_str::<Vec<Release>>(json)
        .map_err(UpdateError::ReleaseJson)?
        .into_iter()
        .enumerate()
        .map(|(index, release)| {
            if release.version.is_empty() {
                Err(UpdateError::MissingVersion(index))
            } else if release.sha256.is_empty() {
                Err(UpdateError::MissingChecksum(index))
            } else {
                Ok(release)
            }
        })
        .filter(|release| !matches!(release, Ok(release) if release.prerelease))
        .collect::<Result<Vec<_>, _>>()?;

    if releases.is_empty() {
        Err(UpdateError::NoReleases)
    } else {
        Ok(releases)
    }
}

/// For each constraint on `id`, up to `patches` releases newer than the newest
/// matching catalog version, newest first
///
/// Releases that are not valid semver (`2.2.0.rc.2`) are skipped.
fn find_new_versions(
    catalog: &CatalogMetadata,
    releases: &[Release],
    id: &str,
) -> Result<Vec<Release>, CatalogError> {
    let mut new_versions = Vec::new();

    for constraint in catalog
        .dependency_constraints
        .iter()
        .filter(|constraint| constraint.id == id)
    {
        let requirement = constraint.constraint.parse::<VersionConstraint>()?;
        let latest_known = catalog
            .dependencies
            .iter()
            .filter(|dependency| dependency.id == id && requirement.matches(&dependency.version))
            .map(|dependency| dependency.version.clone())
            .max()
            .unwrap_or_else(|| Version::new(0, 0, 0));

        let mut found = releases
            .iter()
            .filter_map(|release| {
                Version::parse(&release.version)
                    .ok()
                    .map(|version| (version, release))
            })
            .filter(|(version, _)| requirement.matches(version) && *version > latest_known)
            .collect::<Vec<_>>();
        found.sort_by(|(a, _), (b, _)| b.cmp(a));

        new_versions.extend(
            found
                .into_iter()
                .take(constraint.patches)
                .map(|(_, release)| release.clone()),
        );
    }

    Ok(new_versions)
}

fn release_metadata(release: &Release) -> ReleaseMetadata {
    let source = format!("https://rubygems.org/downloads/bundler-{}.gem", release.version);

    ReleaseMetadata {
        id: DEPENDENCY_ID.to_string(),
        name: DEPENDENCY_ID.to_string(),
        version: release.version.clone(),
        stacks: STACKS.iter().map(ToString::to_string).collect(),
        cpe: format!(
            "cpe:2.3:a:bundler:bundler:{}:*:*:*:*:ruby:*:*",
            release.version
        ),
        purl: format!(
            "pkg:generic/{DEPENDENCY_ID}@{version}?checksum={checksum}&download_url={source}",
            version = release.version,
            checksum = release.sha256,
        ),
        source,
        source_checksum: release.sha256.clone(),
        licenses: release.licenses.clone().unwrap_or_default(),
        target: TARGET.to_string(),
    }
}
