//! Orphan removal.
//!
//! An orphan is a file in the output directory that no artifact record
//! claims: an artifact dropped from the build, a renamed page, a temporary
//! file left by a crash. [`sweep`] deletes everything on disk that is neither
//! in the graph nor protected, then prunes directories left empty.
//!
//! Sweeping only happens on incremental runs. A full rebuild starts by
//! [`clear`]ing the output area, which removes orphans by construction.

use super::ArtifactId;
use super::graph::DependencyGraph;
use std::collections::BTreeSet;
use std::io;
use std::path::Path;
use walkdir::WalkDir;

/// Every regular file under `output_dir`, as output-relative ids.
pub fn outputs_on_disk(output_dir: &Path) -> io::Result<Vec<ArtifactId>> {
    if !output_dir.exists() {
        return Ok(Vec::new());
    }
    let mut found = Vec::new();
    for entry in WalkDir::new(output_dir).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(io::Error::other)?;
        if !entry.file_type().is_file() {
            continue;
        }
        if let Some(id) = relative_id(output_dir, entry.path()) {
            found.push(id);
        }
    }
    Ok(found)
}

fn relative_id(root: &Path, path: &Path) -> Option<ArtifactId> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(ArtifactId::new(parts.join("/")))
}

/// Delete `on_disk − graph.all_outputs() − protected`. Returns what was
/// removed.
pub fn sweep(
    output_dir: &Path,
    on_disk: &[ArtifactId],
    graph: &DependencyGraph,
    protected: &BTreeSet<String>,
) -> io::Result<Vec<ArtifactId>> {
    let tracked = graph.all_outputs();
    let mut removed = Vec::new();
    for id in on_disk {
        if tracked.contains(id) || protected.contains(id.as_str()) {
            continue;
        }
        match std::fs::remove_file(output_dir.join(id.as_str())) {
            Ok(()) => {
                tracing::info!(output = %id, "removed orphan");
                removed.push(id.clone());
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }
    }
    if !removed.is_empty() {
        prune_empty_dirs(output_dir)?;
    }
    Ok(removed)
}

/// Empty the output area except for protected files. Returns how many files
/// were deleted.
pub fn clear(output_dir: &Path, protected: &BTreeSet<String>) -> io::Result<usize> {
    let on_disk = outputs_on_disk(output_dir)?;
    let mut removed = 0;
    for id in &on_disk {
        if protected.contains(id.as_str()) {
            continue;
        }
        std::fs::remove_file(output_dir.join(id.as_str()))?;
        removed += 1;
    }
    prune_empty_dirs(output_dir)?;
    Ok(removed)
}

/// Remove directories under `root` that contain nothing. `root` itself stays.
fn prune_empty_dirs(root: &Path) -> io::Result<()> {
    let dirs: Vec<_> = WalkDir::new(root)
        .min_depth(1)
        .contents_first(true)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_dir())
        .map(|e| e.into_path())
        .collect();
    for dir in dirs {
        if std::fs::read_dir(&dir)?.next().is_none() {
            std::fs::remove_dir(&dir)?;
        }
    }
    Ok(())
}
