use std::os::unix::fs::PermissionsExt;
use std::path::Path;

/// Rewrites installed executables so they always run a pinned version
pub(crate) trait Shimmer {
    fn shim(&self, bin_dir: &Path, version: &str) -> Result<(), ShimError>;
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum ShimError {
    #[error("Could not list executables: {0}")]
    ReadDir(std::io::Error),

    #[error("Could not move executable: {0}")]
    Move(std::io::Error),

    #[error("Could not write executable shim: {0}")]
    Write(std::io::Error),
}

/// Bundler switches to whatever version a `Gemfile.lock` was bundled with unless
/// the version is passed as the first argument (`bundle _2.5.6_ install`).
///
/// Each executable `<name>` in the directory is moved to `_<name>` and replaced by
/// a script that calls it with `_<version>_`.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct VersionShimmer;

fn shim_script(original: &Path, version: &str) -> String {
    format!(
        "#!/usr/bin/env sh\nexec {original} _{version}_ \"$@\"\n",
        original = shell_quote(&original.display().to_string())
    )
}

/// Single quotes the value, a quote inside it becomes `'\''`
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

impl Shimmer for VersionShimmer {
    fn shim(&self, bin_dir: &Path, version: &str) -> Result<(), ShimError> {
        if !bin_dir.is_dir() {
            return Ok(());
        }

        // Listed up front, the loop adds `_<name>` files to this directory
        let mut paths = fs_err::read_dir(bin_dir)
            .map_err(ShimError::ReadDir)?
            .map(|entry| entry.map(|entry| entry.path()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(ShimError::ReadDir)?;
        paths.sort();

        for path in paths {
            let metadata = fs_err::metadata(&path).map_err(ShimError::ReadDir)?;
            let permissions = metadata.permissions();
            if metadata.is_dir() || permissions.mode() & 0o111 == 0 {
                continue;
            }
            let Some(name) = path.file_name() else {
                continue;
            };

            let original = bin_dir.join(format!("_{}", name.to_string_lossy()));
            fs_err::rename(&path, &original).map_err(ShimError::Move)?;

            fs_err::write(&path, shim_script(&original, version)).map_err(ShimError::Write)?;
            fs_err::set_permissions(&path, permissions).map_err(ShimError::Write)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_with_mode(path: &Path, contents: &str, mode: u32) {
        std::fs::write(path, contents).unwrap();
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).unwrap();
    }

    fn mode(path: &Path) -> u32 {
        std::fs::metadata(path).unwrap().permissions().mode() & 0o777
    }

    #[test]
    fn shims_executables() {
        let tmp = tempfile::tempdir().unwrap();
        let bin = tmp.path().join("bin");
        std::fs::create_dir_all(bin.join("nested")).unwrap();
        write_with_mode(&bin.join("bundle"), "bundle contents", 0o755);
        write_with_mode(&bin.join("bundler"), "bundler contents", 0o750);
        write_with_mode(&bin.join("README"), "not executable", 0o644);

        VersionShimmer.shim(&bin, "2.5.6").unwrap();

        assert_eq!(
            std::fs::read_to_string(bin.join("_bundle")).unwrap(),
            "bundle contents"
        );
        assert_eq!(mode(&bin.join("_bundle")), 0o755);
        assert_eq!(
            std::fs::read_to_string(bin.join("bundle")).unwrap(),
            format!(
                "#!/usr/bin/env sh\nexec '{}' _2.5.6_ \"$@\"\n",
                bin.join("_bundle").display()
            )
        );
        assert_eq!(mode(&bin.join("bundle")), 0o755);

        assert_eq!(mode(&bin.join("_bundler")), 0o750);
        assert_eq!(mode(&bin.join("bundler")), 0o750);

        assert_eq!(
            std::fs::read_to_string(bin.join("README")).unwrap(),
            "not executable"
        );
        assert!(!bin.join("_README").exists());
        assert!(bin.join("nested").is_dir());
        assert!(!bin.join("_nested").exists());
    }

    #[test]
    fn shim_quotes_paths_with_spaces() {
        let tmp = tempfile::tempdir().unwrap();
        let bin = tmp.path().join("app's layers").join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        write_with_mode(&bin.join("bundle"), "bundle contents", 0o755);

        VersionShimmer.shim(&bin, "2.5.6").unwrap();

        let original = bin.join("_bundle").display().to_string();
        assert_eq!(
            std::fs::read_to_string(bin.join("bundle")).unwrap(),
            format!(
                "#!/usr/bin/env sh\nexec '{}' _2.5.6_ \"$@\"\n",
                original.replace('\'', r"'\''")
            )
        );
        assert!(original.contains("app's layers"));
    }

    #[test]
    fn shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("/layers/bin/_bundle"), "'/layers/bin/_bundle'");
        assert_eq!(shell_quote("/a b/it's"), r"'/a b/it'\''s'");
    }

    #[test]
    fn missing_bin_dir_is_not_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        VersionShimmer
            .shim(&tmp.path().join("bin"), "2.5.6")
            .unwrap();
    }
}
