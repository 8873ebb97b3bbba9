use libcnb::data::build_plan::Require;
use libcnb::data::buildpack_plan::Entry;
use serde::{Deserialize, Serialize};

/// Typed form of the metadata attached to a `[[requires]]` build plan entry
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct RequirementMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) version_source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) version: Option<String>,
    #[serde(default)]
    pub(crate) build: bool,
    #[serde(default)]
    pub(crate) launch: bool,
}

/// One request for a version of a named dependency
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct VersionRequirement {
    pub(crate) name: String,
    pub(crate) metadata: RequirementMetadata,
}

#[derive(Debug, thiserror::Error)]
#[error("Invalid metadata for build plan entry {name}: {error}")]
pub(crate) struct InvalidPlanEntry {
    pub(crate) name: String,
    pub(crate) error: toml::de::Error,
}

impl VersionRequirement {
    pub(crate) fn new(
        name: impl Into<String>,
        version_source: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            metadata: RequirementMetadata {
                version_source: Some(version_source.into()),
                version: Some(version.into()),
                build: true,
                launch: true,
            },
        }
    }

    /// The requested version, `None` when empty or absent
    pub(crate) fn version(&self) -> Option<&str> {
        self.metadata
            .version
            .as_deref()
            .map(str::trim)
            .filter(|version| !version.is_empty())
    }

    pub(crate) fn version_source(&self) -> Option<&str> {
        self.metadata.version_source.as_deref()
    }

    pub(crate) fn to_require(&self) -> Result<Require, toml::ser::Error> {
        let mut require = Require::new(&self.name);
        require.metadata(&self.metadata)?;
        Ok(require)
    }
}

impl TryFrom<&Entry> for VersionRequirement {
    type Error = InvalidPlanEntry;

    fn try_from(entry: &Entry) -> Result<Self, Self::Error> {
        toml::Value::Table(entry.metadata.clone())
            .try_into()
            .map(|metadata| VersionRequirement {
                name: entry.name.clone(),
                metadata,
            })
            .map_err(|error| InvalidPlanEntry {
                name: entry.name.clone(),
                error,
            })
    }
}

/// Picks the requirement that drives installation of `name`
///
/// Earlier entries in `priorities` win. Sources not in the list rank after every
/// listed source, requirements without a version rank last. Ties keep list order.
/// When nothing requests `name` an unconstrained requirement is returned so the
/// catalog default applies.
///
/// The second value holds every requirement for `name` in their original order.
pub(crate) fn resolve<'a>(
    name: &str,
    entries: &'a [VersionRequirement],
    priorities: &[String],
) -> (VersionRequirement, Vec<&'a VersionRequirement>) {
    let candidates = entries
        .iter()
        .filter(|entry| entry.name == name)
        .collect::<Vec<_>>();

    let rank = |entry: &VersionRequirement| -> usize {
        if entry.version().is_none() {
            priorities.len() + 1
        } else {
            entry
                .version_source()
                .and_then(|source| priorities.iter().position(|known| known == source))
                .unwrap_or(priorities.len())
        }
    };

    let chosen = candidates
        .iter()
        .copied()
        .min_by_key(|entry| rank(entry))
        .map_or_else(
            || VersionRequirement {
                name: name.to_string(),
                metadata: RequirementMetadata::default(),
            },
            Clone::clone,
        );

    (chosen, candidates)
}

/// Whether any requirement for `name` needs it at launch and at build, in that order
pub(crate) fn merge_layer_types(name: &str, entries: &[VersionRequirement]) -> (bool, bool) {
    entries
        .iter()
        .filter(|entry| entry.name == name)
        .fold((false, false), |(launch, build), entry| {
            (launch || entry.metadata.launch, build || entry.metadata.build)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn priorities() -> Vec<String> {
        ["BP_BUNDLER_VERSION", "buildpack.yml", "Gemfile.lock"]
            .into_iter()
            .map(String::from)
            .collect()
    }

    fn requirement(source: &str, version: &str) -> VersionRequirement {
        VersionRequirement::new("bundler", source, version)
    }

    #[test]
    fn highest_priority_source_wins_in_any_order() {
        let env = requirement("BP_BUNDLER_VERSION", "2.5.6");
        let yml = requirement("buildpack.yml", "2.4.22");
        let lock = requirement("Gemfile.lock", "1.*.*");

        for entries in [
            vec![env.clone(), yml.clone(), lock.clone()],
            vec![lock.clone(), yml.clone(), env.clone()],
            vec![yml.clone(), env.clone(), lock.clone()],
        ] {
            let (chosen, _) = resolve("bundler", &entries, &priorities());
            assert_eq!(chosen, env);
        }

        let entries = vec![lock.clone(), yml.clone()];
        let (chosen, _) = resolve("bundler", &entries, &priorities());
        assert_eq!(chosen, yml);
    }

    #[test]
    fn candidates_keep_original_order() {
        let entries = vec![
            requirement("Gemfile.lock", "1.*.*"),
            VersionRequirement::new("ruby", "Gemfile.lock", "3.2.2"),
            requirement("BP_BUNDLER_VERSION", "2.5.6"),
        ];
        let (_, candidates) = resolve("bundler", &entries, &priorities());
        assert_eq!(candidates, vec![&entries[0], &entries[2]]);
    }

    #[test]
    fn unknown_sources_rank_after_known_in_list_order() {
        let first = requirement("some-other-buildpack", "2.3.26");
        let second = requirement("another-buildpack", "2.4.22");

        let entries = vec![first.clone(), second.clone()];
        assert_eq!(resolve("bundler", &entries, &priorities()).0, first);

        let lock = requirement("Gemfile.lock", "1.*.*");
        let entries = vec![first, second, lock.clone()];
        assert_eq!(resolve("bundler", &entries, &priorities()).0, lock);
    }

    #[test]
    fn unconstrained_requirement_is_the_fallback() {
        let unconstrained = VersionRequirement {
            name: String::from("bundler"),
            metadata: RequirementMetadata {
                build: true,
                ..RequirementMetadata::default()
            },
        };
        let lock = requirement("Gemfile.lock", "2.*.*");

        let entries = vec![unconstrained.clone(), lock.clone()];
        assert_eq!(resolve("bundler", &entries, &priorities()).0, lock);

        let entries = vec![unconstrained.clone()];
        assert_eq!(resolve("bundler", &entries, &priorities()).0, unconstrained);
    }

    #[test]
    fn nothing_requested_still_resolves() {
        let (chosen, candidates) = resolve("bundler", &[], &priorities());
        assert_eq!(chosen.name, "bundler");
        assert_eq!(chosen.version(), None);
        assert!(candidates.is_empty());
    }

    #[test]
    fn merges_layer_types_across_requesters() {
        let mut build_only = requirement("Gemfile.lock", "2.*.*");
        build_only.metadata.launch = false;
        let mut launch_only = requirement("buildpack.yml", "2.4.22");
        launch_only.metadata.build = false;

        assert_eq!(
            merge_layer_types("bundler", &[build_only.clone(), launch_only]),
            (true, true)
        );
        assert_eq!(merge_layer_types("bundler", &[build_only]), (false, true));
        assert_eq!(merge_layer_types("bundler", &[]), (false, false));
    }

    #[test]
    fn reads_plan_entries() {
        let entry: Entry = toml::from_str(
            r#"
name = "bundler"

[metadata]
version-source = "buildpack.yml"
version = "2.1.4"
build = true
"#,
        )
        .unwrap();

        let requirement = VersionRequirement::try_from(&entry).unwrap();
        assert_eq!(
            requirement.metadata,
            RequirementMetadata {
                version_source: Some(String::from("buildpack.yml")),
                version: Some(String::from("2.1.4")),
                build: true,
                launch: false,
            }
        );
    }

    #[test]
    fn rejects_mistyped_plan_entries() {
        let entry: Entry = toml::from_str(
            r#"
name = "bundler"

[metadata]
build = "yes"
"#,
        )
        .unwrap();

        assert!(VersionRequirement::try_from(&entry).is_err());
    }
}
