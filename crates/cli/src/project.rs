//! Project directory loading

use anyhow::{Context, Result};
use operator_lib::ProjectFiles;
use std::path::Path;
use walkdir::WalkDir;

const SKIPPED_DIRS: &[&str] = &[".git"];

/// Read every file under `root`, keyed by its '/'-separated relative path
pub fn read_project(root: &Path) -> Result<ProjectFiles> {
    let mut files = ProjectFiles::new();

    let walker = WalkDir::new(root).into_iter().filter_entry(|entry| {
        entry.depth() == 0
            || !entry
                .file_name()
                .to_str()
                .map(|name| SKIPPED_DIRS.contains(&name))
                .unwrap_or(false)
    });

    for entry in walker {
        let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(root)
            .with_context(|| format!("{} is outside the project", entry.path().display()))?;
        let key = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        let bytes = std::fs::read(entry.path())
            .with_context(|| format!("Failed to read {}", entry.path().display()))?;
        files.insert(key, bytes);
    }

    Ok(files)
}
