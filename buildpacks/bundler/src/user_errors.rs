use crate::BundlerBuildpackError;
use bullet_stream::{Print, style};
use indoc::formatdoc;
use std::io::Write;

pub(crate) fn on_error(err: libcnb::Error<BundlerBuildpackError>) {
    log_error(std::io::stdout(), err);
}

fn log_error<W: Write + Send + Sync + 'static>(
    io: W,
    err: libcnb::Error<BundlerBuildpackError>,
) -> W {
    let log = Print::new(io).without_header();
    match cause(err) {
        Cause::OurError(error) => log.error(our_error_message(&error)),
        Cause::FrameworkError(error) => log.error(formatdoc! {"
            Error: heroku/bundler internal buildpack error

            An unexpected internal error was reported by the framework used
            by this buildpack.

            If the issue persists, consider opening an issue on the GitHub
            repository. If you are unable to deploy to Heroku as a result
            of this issue, consider opening a ticket for additional support.

            Details: {error}
        "}),
    }
}

fn our_error_message(error: &BundlerBuildpackError) -> String {
    match error {
        BundlerBuildpackError::Detect(error) => formatdoc! {"
            Error reading {file}

            The Bundler buildpack reads the requested Bundler version from
            {file}, but the file could not be understood.

            Details: {error}
            ",
            file = style::value(error.source_name()),
        },
        BundlerBuildpackError::BuildPlanMetadata(error) => formatdoc! {"
            Error writing the build plan

            The requested Bundler version could not be written to the build plan.

            Details: {error}
        "},
        BundlerBuildpackError::InvalidPlanEntry(error) => formatdoc! {"
            Error reading the build plan

            A buildpack requested {bundler} with metadata that the Bundler
            buildpack does not understand. Expected string values for
            {version} and {version_source} and boolean values for
            {build} and {launch}.

            Details: {error}
            ",
            bundler = style::value("bundler"),
            version = style::value("version"),
            version_source = style::value("version-source"),
            build = style::value("build"),
            launch = style::value("launch"),
        },
        BundlerBuildpackError::UnknownStack(error) => formatdoc! {"
            Error: unsupported operating system

            Bundler is only available for a fixed set of distributions.

            Details: {error}
        "},
        BundlerBuildpackError::Catalog(error) => formatdoc! {"
            Error resolving Bundler version

            No Bundler release in this buildpack matches the requested version.
            To request a specific version set {env_var}, for example:

                {example}

            Details: {error}
            ",
            env_var = style::value("BP_BUNDLER_VERSION"),
            example = style::command("BP_BUNDLER_VERSION=2.5.6"),
        },
        BundlerBuildpackError::DependencyInstall(error) => formatdoc! {"
            Error installing Bundler

            The Bundler package could not be downloaded or extracted. If the
            problem is a network failure, retry the build.

            Details: {error}
        "},
        BundlerBuildpackError::Shim(error) => formatdoc! {"
            Error installing Bundler

            Bundler was installed but its executables could not be pinned to
            the installed version.

            Details: {error}
        "},
        BundlerBuildpackError::Sbom(error) => formatdoc! {"
            Error writing the software bill of materials

            Details: {error}
        "},
    }
}

#[derive(Debug)]
enum Cause {
    OurError(BundlerBuildpackError),
    FrameworkError(libcnb::Error<BundlerBuildpackError>),
}

fn cause(err: libcnb::Error<BundlerBuildpackError>) -> Cause {
    match err {
        libcnb::Error::BuildpackError(err) => Cause::OurError(err),
        err => Cause::FrameworkError(err),
    }
}
