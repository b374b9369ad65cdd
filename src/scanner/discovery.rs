//! Test file discovery under the configured tests directory.

#![allow(missing_docs)]

use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::core::errors::{EntropyError, Result};
use crate::core::paths::normalize_syntactic;

/// Directory names never descended into.
const SKIPPED_DIRS: &[&str] = &["__pycache__", "node_modules", "venv", ".venv", "site-packages"];

/// Discovery settings derived from `Config`.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub tests_dir: PathBuf,
    /// Subtrees skipped entirely (the quarantine directory).
    pub excluded_dirs: Vec<PathBuf>,
    pub max_depth: usize,
}

impl DiscoveryConfig {
    pub fn new(tests_dir: PathBuf) -> Self {
        Self {
            tests_dir,
            excluded_dirs: Vec::new(),
            max_depth: 32,
        }
    }
}

/// Whether a file name follows the pytest `test_*.py` / `*_test.py` convention.
pub fn is_test_file_name(name: &str) -> bool {
    let Some(stem) = name.strip_suffix(".py") else {
        return false;
    };
    stem != "__init__" && (stem.starts_with("test_") || stem.ends_with("_test"))
}

/// Walk `tests_dir` and return every test file, sorted.
///
/// A missing tests directory yields an empty list. Symlinked directories are
/// not followed.
pub fn discover_test_files(config: &DiscoveryConfig) -> Result<Vec<PathBuf>> {
    let excluded: HashSet<PathBuf> = config
        .excluded_dirs
        .iter()
        .map(|dir| normalize_syntactic(dir))
        .collect();

    let mut found = Vec::new();
    let mut stack = vec![(normalize_syntactic(&config.tests_dir), 0usize)];

    while let Some((dir, depth)) = stack.pop() {
        if excluded.contains(&dir) {
            continue;
        }
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound && depth == 0 => return Ok(Vec::new()),
            Err(err)
                if matches!(err.kind(), ErrorKind::NotFound | ErrorKind::PermissionDenied) =>
            {
                continue;
            }
            Err(source) => return Err(EntropyError::io(&dir, source)),
        };

        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with('.') {
                continue;
            }
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            let path = entry.path();
            if file_type.is_dir() {
                if depth < config.max_depth && !SKIPPED_DIRS.contains(&name.as_ref()) {
                    stack.push((path, depth + 1));
                }
            } else if file_type.is_file() && is_test_file_name(&name) {
                found.push(path);
            }
        }
    }

    found.sort();
    Ok(found)
}

/// Keep only the given paths that exist and are readable regular files.
pub fn explicit_test_files(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = paths
        .iter()
        .filter(|path| path.is_file())
        .map(|path| normalize_syntactic(path))
        .collect();
    files.sort();
    files.dedup();
    files
}

/// True when `path` lives under `dir` (syntactically).
pub fn is_within(path: &Path, dir: &Path) -> bool {
    normalize_syntactic(path).starts_with(normalize_syntactic(dir))
}
