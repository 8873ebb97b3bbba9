use crate::plan::VersionRequirement;
use std::path::Path;

/// One line per candidate: `<source> -> "<version>"`, sources padded to the same width
pub(crate) fn candidate_lines(candidates: &[&VersionRequirement]) -> Vec<String> {
    let rows = candidates
        .iter()
        .map(|candidate| {
            (
                candidate.version_source().unwrap_or("<unknown>"),
                candidate.version().unwrap_or("*"),
            )
        })
        .collect::<Vec<_>>();
    let width = rows
        .iter()
        .map(|(source, _)| source.len())
        .max()
        .unwrap_or_default();

    rows.into_iter()
        .map(|(source, version)| format!("{source:<width$} -> \"{version}\""))
        .collect()
}

pub(crate) fn gem_path_line(layer_path: &Path) -> String {
    format!(
        "GEM_PATH -> \"$GEM_PATH:{path}\"",
        path = layer_path.display()
    )
}
