use libcnb::{Env, Target};

const CNB_STACK_ID: &str = "CNB_STACK_ID";

/// Catalog stack names for the distros Bundler is built for
const DISTRO_STACKS: &[(&str, &str, &str)] = &[
    ("ubuntu", "20.04", "heroku-20"),
    ("ubuntu", "22.04", "heroku-22"),
    ("ubuntu", "24.04", "heroku-24"),
];

#[derive(Debug, thiserror::Error)]
pub(crate) enum StackError {
    #[error("No stack is known for {name} {version}. Supported distros: {}", supported_distros())]
    UnsupportedDistro { name: String, version: String },
}

fn supported_distros() -> String {
    DISTRO_STACKS
        .iter()
        .map(|(name, version, _)| format!("{name} {version}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Stack used to filter catalog dependencies
///
/// Platforms that still export `CNB_STACK_ID` decide it, otherwise it comes from the target distro.
pub(crate) fn stack_id(target: &Target, env: &Env) -> Result<String, StackError> {
    if let Some(stack) = env
        .get(CNB_STACK_ID)
        .map(|stack| stack.to_string_lossy().trim().to_string())
        .filter(|stack| !stack.is_empty())
    {
        return Ok(stack);
    }

    DISTRO_STACKS
        .iter()
        .find(|(name, version, _)| *name == target.distro_name && *version == target.distro_version)
        .map(|(_, _, stack)| (*stack).to_string())
        .ok_or_else(|| StackError::UnsupportedDistro {
            name: target.distro_name.clone(),
            version: target.distro_version.clone(),
        })
}
