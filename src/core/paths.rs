//! Shared path manipulation utilities.

use std::env;
use std::path::{Component, Path, PathBuf};

/// Resolve a path to an absolute, normalized path.
///
/// Existing paths go through `fs::canonicalize` so symlinks resolve. Anything
/// else is joined onto the CWD and `..`/`.` are folded syntactically.
pub fn resolve_absolute_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir().map_or_else(|_| path.to_path_buf(), |cwd| cwd.join(path))
    };

    if let Ok(canonical) = std::fs::canonicalize(&absolute) {
        return canonical;
    }

    normalize_syntactic(&absolute)
}

/// Fold `.` and `..` components without touching the filesystem.
pub fn normalize_syntactic(path: &Path) -> PathBuf {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::Prefix(..) | Component::RootDir | Component::Normal(_) => {
                components.push(component);
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if let Some(Component::Normal(_)) = components.last() {
                    components.pop();
                }
            }
        }
    }
    components.into_iter().collect()
}

/// Path of `path` relative to `root`, rendered with forward slashes.
///
/// Falls back to the full path when `path` lives outside `root`. Used for report
/// rows, manifest matching and log entries so output is stable across machines.
pub fn display_relative(root: &Path, path: &Path) -> String {
    let root = normalize_syntactic(root);
    let path = normalize_syntactic(path);
    let rel = path.strip_prefix(&root).unwrap_or(&path);
    to_slash(rel)
}

/// Relative path leading from directory `base` to `target`.
///
/// Both inputs are folded syntactically first; a shared prefix is stripped and
/// each remaining `base` component becomes `..`.
pub fn relative_to(base: &Path, target: &Path) -> PathBuf {
    let base = normalize_syntactic(base);
    let target = normalize_syntactic(target);
    let base_parts: Vec<Component<'_>> = base.components().collect();
    let target_parts: Vec<Component<'_>> = target.components().collect();

    let shared = base_parts
        .iter()
        .zip(&target_parts)
        .take_while(|(a, b)| a == b)
        .count();

    let mut rel = PathBuf::new();
    for _ in shared..base_parts.len() {
        rel.push("..");
    }
    for part in &target_parts[shared..] {
        rel.push(part.as_os_str());
    }
    rel
}

/// Render a path with `/` separators regardless of platform.
///
/// `..` survives so relative load paths still climb out of their directory.
pub fn to_slash(path: &Path) -> String {
    path.components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            Component::RootDir => Some(String::new()),
            Component::Prefix(prefix) => Some(prefix.as_os_str().to_string_lossy().into_owned()),
            Component::ParentDir => Some("..".to_string()),
            Component::CurDir => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
