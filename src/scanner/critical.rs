//! Critical-paths manifest: test files exempt from DELETE and QUARANTINE.
//!
//! The manifest is JSON, either a plain array of strings or an object with a
//! `"paths"` array. Entries are exact paths (relative to the project root or
//! absolute) or shell-style globs. An entry naming a directory covers everything
//! beneath it. A missing or malformed manifest yields an empty set plus a warning,
//! never a failure.

#![allow(missing_docs)]

use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Deserialize;

use crate::core::errors::{EntropyError, Result};
use crate::core::paths::{display_relative, normalize_syntactic, to_slash};

/// Accepted manifest shapes.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ManifestDoc {
    List(Vec<String>),
    Object { paths: Vec<String> },
}

/// Compiled glob pattern for path matching.
#[derive(Debug, Clone)]
struct GlobPattern {
    original: String,
    compiled: Regex,
}

/// Set of critical test paths, keyed by root-relative slash paths.
#[derive(Debug, Clone)]
pub struct CriticalPaths {
    root: PathBuf,
    exact: HashSet<String>,
    patterns: Vec<GlobPattern>,
}

impl CriticalPaths {
    /// Empty manifest: nothing is critical.
    pub fn empty(root: &Path) -> Self {
        Self {
            root: normalize_syntactic(root),
            exact: HashSet::new(),
            patterns: Vec::new(),
        }
    }

    /// Build from manifest entries. Invalid globs are skipped and returned as warnings.
    pub fn from_entries(root: &Path, entries: &[String]) -> (Self, Vec<EntropyError>) {
        let mut set = Self::empty(root);
        let mut warnings = Vec::new();

        for raw in entries {
            let entry = raw.trim();
            if entry.is_empty() {
                continue;
            }
            let key = set.key_for(Path::new(entry));
            if entry.contains(['*', '?']) {
                match glob_to_regex(&key) {
                    Ok(compiled) => set.patterns.push(GlobPattern {
                        original: entry.to_string(),
                        compiled,
                    }),
                    Err(err) => warnings.push(err),
                }
            } else {
                set.exact.insert(key);
            }
        }

        (set, warnings)
    }

    /// Load the manifest at `manifest`. Never fails; problems come back as warnings.
    pub fn load(root: &Path, manifest: &Path) -> (Self, Vec<EntropyError>) {
        match read_manifest(manifest) {
            Ok(Some(entries)) => Self::from_entries(root, &entries),
            Ok(None) => (
                Self::empty(root),
                vec![EntropyError::MissingConfig {
                    path: manifest.to_path_buf(),
                }],
            ),
            Err(err) => (Self::empty(root), vec![err]),
        }
    }

    /// Whether `path` (absolute or root-relative) is covered by the manifest.
    pub fn is_critical(&self, path: &Path) -> bool {
        self.reason(path).is_some()
    }

    /// Manifest entry protecting `path`, if any.
    pub fn reason(&self, path: &Path) -> Option<String> {
        let key = self.key_for(path);

        let mut current = Some(key.as_str());
        while let Some(candidate) = current {
            if self.exact.contains(candidate) {
                return Some(format!("listed in critical paths: {candidate}"));
            }
            current = candidate.rsplit_once('/').map(|(parent, _)| parent);
        }

        self.patterns
            .iter()
            .find(|pattern| pattern.compiled.is_match(&key))
            .map(|pattern| format!("matches critical pattern: {}", pattern.original))
    }

    pub fn len(&self) -> usize {
        self.exact.len() + self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn key_for(&self, path: &Path) -> String {
        if path.is_absolute() {
            display_relative(&self.root, path)
        } else {
            to_slash(&normalize_syntactic(path))
        }
    }
}

/// `Ok(None)` when the manifest does not exist.
fn read_manifest(path: &Path) -> Result<Option<Vec<String>>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(source) => return Err(EntropyError::io(path, source)),
    };
    let doc: ManifestDoc = serde_json::from_str(&raw).map_err(|err| EntropyError::ConfigParse {
        context: "critical paths manifest",
        details: format!("{}: {err}", path.display()),
    })?;
    Ok(Some(match doc {
        ManifestDoc::List(paths) | ManifestDoc::Object { paths } => paths,
    }))
}

/// Convert a shell-style glob pattern to an anchored regex.
///
/// - `**/` → zero or more leading directories
/// - `**`  → anything, separators included
/// - `*`   → anything except `/`
/// - `?`   → one character except `/`
fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let chars: Vec<char> = pattern.replace('\\', "/").chars().collect();
    let mut regex_str = String::with_capacity(chars.len() * 2);
    regex_str.push('^');

    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' if chars.get(i + 1) == Some(&'*') => {
                if chars.get(i + 2) == Some(&'/') {
                    regex_str.push_str("(?:.*/)?");
                    i += 3;
                } else {
                    regex_str.push_str(".*");
                    i += 2;
                }
            }
            '*' => {
                regex_str.push_str("[^/]*");
                i += 1;
            }
            '?' => {
                regex_str.push_str("[^/]");
                i += 1;
            }
            c => {
                regex_str.push_str(&regex::escape(&c.to_string()));
                i += 1;
            }
        }
    }

    regex_str.push('$');

    Regex::new(&regex_str).map_err(|err| EntropyError::InvalidConfig {
        details: format!("invalid critical path pattern {pattern:?}: {err}"),
    })
}
