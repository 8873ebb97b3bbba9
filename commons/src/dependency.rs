use crate::catalog::CatalogDependency;
use flate2::read::GzDecoder;
use libherokubuildpack::digest::sha256;
use std::path::{Component, Path, PathBuf};
use tar::Archive;
use tempfile::NamedTempFile;

const BINDING_TYPE: &str = "dependency-mapping";

#[derive(thiserror::Error, Debug)]
pub enum DependencyInstallError {
    #[error("Could not read dependency mapping bindings in {0}: {1}")]
    CouldNotReadBindings(PathBuf, std::io::Error),

    #[error("Could not open file: {0}")]
    CouldNotOpenFile(std::io::Error),

    #[error("Could not untar: {0}")]
    CouldNotUnpack(std::io::Error),

    #[error("Archive entry escapes the destination directory: {0}")]
    UnsafeArchivePath(PathBuf),

    #[error("Archive entry is a link, links are not extracted: {0}")]
    UnsupportedArchiveLink(PathBuf),

    // Boxed to prevent `large_enum_variant` errors since `ureq::Error` is massive.
    #[error("Download error for {0}: {1}")]
    RequestError(String, Box<ureq::Error>),

    #[error("Could not create file: {0}")]
    CouldNotCreateDestinationFile(std::io::Error),

    #[error("Could not write file: {0}")]
    CouldNotWriteDestinationFile(std::io::Error),

    #[error("Checksum of {uri} failed. Expected {expected} got {actual}")]
    ChecksumFailed {
        uri: String,
        expected: String,
        actual: String,
    },
}

/// Places a catalog dependency into `layer_path`
///
/// The artifact is fetched from a dependency mapping binding when the platform
/// provides one, from the buildpack directory for `file://` URIs, or downloaded.
/// Its sha256 must match the catalog before anything is extracted.
///
/// # Errors
///
/// - Bindings cannot be read
/// - Download or copy fails
/// - Checksum does not match
/// - The archive cannot be extracted
pub fn install(
    dependency: &CatalogDependency,
    buildpack_dir: &Path,
    layer_path: &Path,
    platform_dir: &Path,
) -> Result<(), DependencyInstallError> {
    let uri = mapped_uri(&platform_dir.join("bindings"), dependency.checksum())?
        .unwrap_or_else(|| dependency.uri.clone());

    let artifact =
        NamedTempFile::new().map_err(DependencyInstallError::CouldNotCreateDestinationFile)?;

    fetch(&uri, buildpack_dir, artifact.path())?;

    sha256(artifact.path())
        .map_err(DependencyInstallError::CouldNotOpenFile)
        .and_then(|actual| {
            if actual == dependency.checksum() {
                Ok(())
            } else {
                Err(DependencyInstallError::ChecksumFailed {
                    uri: uri.clone(),
                    expected: dependency.checksum().to_string(),
                    actual,
                })
            }
        })?;

    untar(artifact.path(), layer_path, dependency.strip_components)
}

/// Looks for a binding of type `dependency-mapping` with an entry named after the checksum
fn mapped_uri(bindings_dir: &Path, checksum: &str) -> Result<Option<String>, DependencyInstallError> {
    if !bindings_dir.is_dir() {
        return Ok(None);
    }
    let read_error = |error| DependencyInstallError::CouldNotReadBindings(bindings_dir.to_path_buf(), error);

    let mut bindings = fs_err::read_dir(bindings_dir)
        .map_err(read_error)?
        .map(|entry| entry.map(|entry| entry.path()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(read_error)?;
    bindings.sort();

    for binding in bindings.iter().filter(|path| path.is_dir()) {
        let Ok(kind) = fs_err::read_to_string(binding.join("type")) else {
            continue;
        };
        if kind.trim() != BINDING_TYPE {
            continue;
        }

        let mapping = binding.join(checksum);
        if mapping.is_file() {
            let uri = fs_err::read_to_string(&mapping).map_err(read_error)?;
            return Ok(Some(uri.trim().to_string()));
        }
    }

    Ok(None)
}

fn fetch(uri: &str, buildpack_dir: &Path, destination: &Path) -> Result<(), DependencyInstallError> {
    if let Some(relative) = uri.strip_prefix("file://") {
        let source = buildpack_dir.join(relative.trim_start_matches('/'));
        fs_err::copy(source, destination)
            .map_err(DependencyInstallError::CouldNotWriteDestinationFile)?;
        return Ok(());
    }

    let mut response_reader = ureq::get(uri)
        .call()
        .map_err(|err| DependencyInstallError::RequestError(uri.to_string(), Box::new(err)))?
        .into_reader();

    let mut destination_file = fs_err::File::create(destination)
        .map_err(DependencyInstallError::CouldNotCreateDestinationFile)?;

    std::io::copy(&mut response_reader, &mut destination_file)
        .map_err(DependencyInstallError::CouldNotWriteDestinationFile)?;

    Ok(())
}

fn untar(
    path: &Path,
    destination: &Path,
    strip_components: usize,
) -> Result<(), DependencyInstallError> {
    let file = fs_err::File::open(path).map_err(DependencyInstallError::CouldNotOpenFile)?;
    let mut archive = Archive::new(GzDecoder::new(file));

    for entry in archive
        .entries()
        .map_err(DependencyInstallError::CouldNotUnpack)?
    {
        let mut entry = entry.map_err(DependencyInstallError::CouldNotUnpack)?;
        let entry_path = entry
            .path()
            .map_err(DependencyInstallError::CouldNotUnpack)?
            .into_owned();

        if entry_path
            .components()
            .any(|component| matches!(component, Component::ParentDir | Component::RootDir))
        {
            return Err(DependencyInstallError::UnsafeArchivePath(entry_path));
        }

        // A link could point later entries outside of the destination
        let entry_type = entry.header().entry_type();
        if entry_type.is_symlink() || entry_type.is_hard_link() {
            return Err(DependencyInstallError::UnsupportedArchiveLink(entry_path));
        }

        let stripped = entry_path
            .components()
            .filter(|component| !matches!(component, Component::CurDir))
            .skip(strip_components)
            .collect::<PathBuf>();
        if stripped.as_os_str().is_empty() {
            continue;
        }

        let target = destination.join(stripped);
        if let Some(parent) = target.parent() {
            fs_err::create_dir_all(parent)
                .map_err(DependencyInstallError::CouldNotCreateDestinationFile)?;
        }
        entry
            .unpack(&target)
            .map_err(DependencyInstallError::CouldNotUnpack)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::os::unix::fs::PermissionsExt;

    fn write_tgz(path: &Path, files: &[(&str, &str, u32)]) {
        let file = std::fs::File::create(path).unwrap();
        let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
        for (name, contents, mode) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(contents.len() as u64);
            header.set_mode(*mode);
            header.set_cksum();
            builder
                .append_data(&mut header, name, contents.as_bytes())
                .unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    fn dependency(uri: &str, sha: String, strip_components: usize) -> CatalogDependency {
        CatalogDependency {
            id: String::from("bundler"),
            name: Some(String::from("Bundler")),
            version: semver::Version::new(2, 5, 6),
            uri: uri.to_string(),
            sha256: sha,
            stacks: vec![String::from("*")],
            source: None,
            source_sha256: None,
            cpe: None,
            purl: None,
            licenses: Vec::new(),
            strip_components,
            deprecation_date: None,
        }
    }

    #[test]
    fn installs_vendored_file_uri_with_strip_components() {
        let tmp = tempfile::tempdir().unwrap();
        let buildpack_dir = tmp.path().join("buildpack");
        let layer = tmp.path().join("layer");
        let platform = tmp.path().join("platform");
        std::fs::create_dir_all(buildpack_dir.join("vendor")).unwrap();
        std::fs::create_dir_all(&layer).unwrap();

        let tgz = buildpack_dir.join("vendor").join("bundler.tgz");
        write_tgz(
            &tgz,
            &[
                ("bundler-2.5.6/bin/bundle", "#!/bin/sh\necho bundle\n", 0o755),
                ("bundler-2.5.6/lib/bundler.rb", "module Bundler; end\n", 0o644),
            ],
        );
        let sha = sha256(&tgz).unwrap();

        install(
            &dependency("file:///vendor/bundler.tgz", format!("sha256:{sha}"), 1),
            &buildpack_dir,
            &layer,
            &platform,
        )
        .unwrap();

        let bundle = layer.join("bin").join("bundle");
        assert_eq!(
            std::fs::read_to_string(&bundle).unwrap(),
            "#!/bin/sh\necho bundle\n"
        );
        assert_eq!(
            std::fs::metadata(&bundle).unwrap().permissions().mode() & 0o777,
            0o755
        );
        assert!(layer.join("lib").join("bundler.rb").exists());
    }

    #[test]
    fn checksum_mismatch_extracts_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let layer = tmp.path().join("layer");
        std::fs::create_dir_all(&layer).unwrap();

        let tgz = tmp.path().join("bundler.tgz");
        write_tgz(&tgz, &[("bin/bundle", "bundle", 0o755)]);

        let result = install(
            &dependency("file:///bundler.tgz", String::from("nope"), 0),
            tmp.path(),
            &layer,
            &tmp.path().join("platform"),
        );

        assert!(matches!(
            result,
            Err(DependencyInstallError::ChecksumFailed { .. })
        ));
        assert!(!layer.join("bin").exists());
    }

    #[test]
    fn rejects_link_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let layer = tmp.path().join("layer");
        let outside = tmp.path().join("outside");
        std::fs::create_dir_all(&layer).unwrap();
        std::fs::create_dir_all(&outside).unwrap();

        let tgz = tmp.path().join("bundler.tgz");
        let file = std::fs::File::create(&tgz).unwrap();
        let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
        let mut link = tar::Header::new_gnu();
        link.set_entry_type(tar::EntryType::Symlink);
        link.set_link_name(&outside).unwrap();
        link.set_size(0);
        link.set_mode(0o777);
        builder
            .append_data(&mut link, "lib", std::io::empty())
            .unwrap();
        let mut header = tar::Header::new_gnu();
        header.set_size(4);
        header.set_mode(0o644);
        builder
            .append_data(&mut header, "lib/gem", "gem!".as_bytes())
            .unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        let result = untar(&tgz, &layer, 0);

        assert!(matches!(
            result,
            Err(DependencyInstallError::UnsupportedArchiveLink(path)) if path == Path::new("lib")
        ));
        assert!(!layer.join("lib").exists());
        assert!(!outside.join("gem").exists());
    }

    #[test]
    fn binding_overrides_uri() {
        let tmp = tempfile::tempdir().unwrap();
        let layer = tmp.path().join("layer");
        let buildpack_dir = tmp.path().join("buildpack");
        std::fs::create_dir_all(&layer).unwrap();
        std::fs::create_dir_all(&buildpack_dir).unwrap();

        let tgz = buildpack_dir.join("mirror.tgz");
        write_tgz(&tgz, &[("bin/bundle", "mirrored", 0o755)]);
        let sha = sha256(&tgz).unwrap();

        let binding = tmp.path().join("platform").join("bindings").join("mirror");
        std::fs::create_dir_all(&binding).unwrap();
        std::fs::write(binding.join("type"), "dependency-mapping\n").unwrap();
        std::fs::write(binding.join(&sha), "file:///mirror.tgz\n").unwrap();

        install(
            &dependency("https://invalid.example.com/never-fetched.tgz", sha, 0),
            &buildpack_dir,
            &layer,
            &tmp.path().join("platform"),
        )
        .unwrap();

        assert_eq!(
            std::fs::read_to_string(layer.join("bin").join("bundle")).unwrap(),
            "mirrored"
        );
    }

    #[test]
    fn ignores_bindings_of_other_types() {
        let tmp = tempfile::tempdir().unwrap();
        let binding = tmp.path().join("bindings").join("ca-certs");
        std::fs::create_dir_all(&binding).unwrap();
        std::fs::write(binding.join("type"), "ca-certificates").unwrap();
        std::fs::write(binding.join("abc"), "file:///elsewhere.tgz").unwrap();

        assert_eq!(
            mapped_uri(&tmp.path().join("bindings"), "abc").unwrap(),
            None
        );
        assert_eq!(mapped_uri(&tmp.path().join("missing"), "abc").unwrap(), None);
    }
}
