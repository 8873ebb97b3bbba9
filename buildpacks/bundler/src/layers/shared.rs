/// Takes in a directory and returns a minimal build context for use in testing layer caching behavior
///
/// Each of the layers, app, platform and buildpack directories is created under `from_dir`.
#[cfg(test)]
pub(crate) fn temp_build_context<B: libcnb::Buildpack>(
    from_dir: impl AsRef<std::path::Path>,
) -> libcnb::build::BuildContext<B> {
    let base_dir = from_dir.as_ref().to_path_buf();
    let layers_dir = base_dir.join("layers");
    let app_dir = base_dir.join("app_dir");
    let platform_dir = base_dir.join("platform_dir");
    let buildpack_dir = base_dir.join("buildpack_dir");
    for dir in [&app_dir, &layers_dir, &buildpack_dir, &platform_dir] {
        std::fs::create_dir_all(dir).unwrap();
    }

    let target = libcnb::Target {
        os: String::from("linux"),
        arch: String::from("amd64"),
        arch_variant: None,
        distro_name: String::from("ubuntu"),
        distro_version: String::from("24.04"),
    };
    let buildpack_toml_string = include_str!("../../buildpack.toml");
    let platform =
        <<B as libcnb::Buildpack>::Platform as libcnb::Platform>::from_path(&platform_dir).unwrap();
    let buildpack_descriptor: libcnb::data::buildpack::ComponentBuildpackDescriptor<
        <B as libcnb::Buildpack>::Metadata,
    > = toml::from_str(buildpack_toml_string).unwrap();
    let buildpack_plan = libcnb::data::buildpack_plan::BuildpackPlan {
        entries: Vec::<libcnb::data::buildpack_plan::Entry>::new(),
    };
    let store = None;

    libcnb::build::BuildContext {
        layers_dir,
        app_dir,
        buildpack_dir,
        target,
        platform,
        buildpack_plan,
        buildpack_descriptor,
        store,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BundlerBuildpack;

    #[test]
    fn buildpack_toml_catalog_resolves_default() {
        let tmpdir = tempfile::tempdir().unwrap();
        let context = temp_build_context::<BundlerBuildpack>(tmpdir.path());
        let catalog = &context.buildpack_descriptor.metadata;

        let default = catalog.resolve("bundler", None, "heroku-24").unwrap();
        assert_eq!(default.version.major, 2);
        assert!(
            catalog
                .dependencies
                .iter()
                .filter(|dependency| dependency.id == "bundler" && dependency.version.major == 2)
                .all(|dependency| dependency.version <= default.version)
        );
        assert_eq!(context.platform.root, tmpdir.path().join("platform_dir"));
    }
}
