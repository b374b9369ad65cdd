//! Literal externalization: move large dict/list literals into JSON sidecars.
//!
//! A rewrite is planned completely in memory first: sidecar contents, one
//! replacement edit per literal and the import injection. Only a fully planned
//! rewrite touches disk. Sidecars are written before the source, and removed
//! again if the source cannot be replaced.

#![allow(missing_docs)]

use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tree_sitter::{Node, Parser};

use crate::core::errors::{EntropyError, Result};
use crate::core::model::LiteralCandidate;
use crate::core::paths::{relative_to, to_slash};
use crate::scanner::literal::{code_children, node_text};

/// Modules the replacement expression needs.
const REQUIRED_IMPORTS: [&str; 2] = ["json", "pathlib"];

// ──────────────────── edits ────────────────────

/// Replace `source[start..end]` with `replacement`. `start == end` inserts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edit {
    pub start: usize,
    pub end: usize,
    pub replacement: String,
}

impl Edit {
    #[must_use]
    pub fn insert(at: usize, text: impl Into<String>) -> Self {
        Self {
            start: at,
            end: at,
            replacement: text.into(),
        }
    }

    fn overlaps(&self, other: &Self) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Apply every edit or none.
///
/// Edits are sorted by descending start offset so earlier offsets stay valid
/// while later spans are rewritten. Overlapping spans, out-of-range spans and
/// spans splitting a UTF-8 character are rejected before anything is applied.
pub fn apply_edits(source: &str, mut edits: Vec<Edit>) -> Result<String> {
    edits.sort_by(|a, b| b.start.cmp(&a.start).then(b.end.cmp(&a.end)));

    for edit in &edits {
        let in_bounds = edit.start <= edit.end
            && edit.end <= source.len()
            && source.is_char_boundary(edit.start)
            && source.is_char_boundary(edit.end);
        if !in_bounds {
            return Err(EntropyError::LiteralEval {
                start: edit.start,
                end: edit.end,
                reason: format!("span outside source of {} bytes", source.len()),
            });
        }
    }
    for pair in edits.windows(2) {
        let (later, earlier) = (&pair[0], &pair[1]);
        if earlier.overlaps(later) {
            return Err(EntropyError::OverlappingEdits {
                first_start: earlier.start,
                first_end: earlier.end,
                second_start: later.start,
                second_end: later.end,
            });
        }
    }

    let mut out = source.to_string();
    for edit in &edits {
        out.replace_range(edit.start..edit.end, &edit.replacement);
    }
    Ok(out)
}

// ──────────────────── planning ────────────────────

/// One JSON file to create next to the fixtures directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sidecar {
    pub path: PathBuf,
    pub contents: String,
}

/// Fully computed rewrite of one test file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionPlan {
    pub test_file: PathBuf,
    pub new_source: String,
    pub sidecars: Vec<Sidecar>,
}

/// Plan externalization of `candidates` out of `source` into `fixtures_dir`.
///
/// `test_file` and `fixtures_dir` should be absolute so the generated relative
/// load path is correct.
pub fn plan_compaction(
    parser: &mut Parser,
    test_file: &Path,
    source: &str,
    candidates: &[LiteralCandidate],
    fixtures_dir: &Path,
) -> Result<CompactionPlan> {
    if candidates.is_empty() {
        return Err(EntropyError::Runtime {
            details: format!("{}: no externalizable literals", test_file.display()),
        });
    }

    let stem = test_file
        .file_stem()
        .map_or_else(|| "fixture".to_string(), |s| s.to_string_lossy().into_owned());
    let test_dir = test_file.parent().unwrap_or_else(|| Path::new(""));

    let mut edits = Vec::with_capacity(candidates.len() + 1);
    let mut sidecars = Vec::with_capacity(candidates.len());
    let mut taken = BTreeSet::new();

    for (ordinal, candidate) in candidates.iter().enumerate() {
        let contents = serde_json::to_string_pretty(&candidate.value)
            .map_err(|e| EntropyError::LiteralEval {
                start: candidate.start,
                end: candidate.end,
                reason: e.to_string(),
            })?
            + "\n";
        let base = candidate
            .symbol
            .as_deref()
            .map_or_else(|| format!("{stem}_literal_{}", ordinal + 1), |symbol| format!("{stem}_{symbol}"));
        let path = sidecar_path(fixtures_dir, &base, &contents, &mut taken);

        let rel = to_slash(&relative_to(test_dir, &path));
        edits.push(Edit {
            start: candidate.start,
            end: candidate.end,
            replacement: load_expression(&rel)?,
        });
        sidecars.push(Sidecar { path, contents });
    }

    if let Some(import) = import_edit(parser, source)? {
        edits.push(import);
    }

    let new_source = apply_edits(source, edits)?;
    Ok(CompactionPlan {
        test_file: test_file.to_path_buf(),
        new_source,
        sidecars,
    })
}

/// Expression loading a sidecar relative to the test module.
pub fn load_expression(relative: &str) -> Result<String> {
    let quoted = serde_json::to_string(relative)?;
    Ok(format!(
        "json.loads(pathlib.Path(__file__).parent.joinpath({quoted}).read_text(encoding=\"utf-8\"))"
    ))
}

/// Pick a sidecar path unique within this plan.
///
/// An existing file with different contents is never overwritten; the name gets
/// a numeric suffix instead.
fn sidecar_path(dir: &Path, base: &str, contents: &str, taken: &mut BTreeSet<PathBuf>) -> PathBuf {
    let mut n = 1usize;
    loop {
        let name = if n == 1 {
            format!("{base}.json")
        } else {
            format!("{base}_{n}.json")
        };
        let path = dir.join(name);
        let reusable = match fs::read_to_string(&path) {
            Ok(existing) => existing == contents,
            Err(_) => !path.exists(),
        };
        if reusable && taken.insert(path.clone()) {
            return path;
        }
        n += 1;
    }
}

// ──────────────────── imports ────────────────────

/// Insertion of whichever of `json` / `pathlib` is not already imported.
///
/// Placed after the leading import block, or after the shebang, encoding
/// comment and module docstring when the file has no imports.
pub fn import_edit(parser: &mut Parser, source: &str) -> Result<Option<Edit>> {
    let tree = parser.parse(source, None).ok_or_else(|| EntropyError::ParseFailure {
        path: PathBuf::new(),
        details: "parser produced no tree".to_string(),
    })?;
    let root = tree.root_node();

    let mut present = BTreeSet::new();
    let mut cursor = root.walk();
    let top_level: Vec<Node<'_>> = root.named_children(&mut cursor).collect();
    for node in &top_level {
        if node.kind() == "import_statement" {
            for child in code_children(*node) {
                if child.kind() == "dotted_name" {
                    present.insert(node_text(child, source).to_string());
                }
            }
        }
    }

    let missing: Vec<&str> = REQUIRED_IMPORTS
        .iter()
        .copied()
        .filter(|module| !present.contains(*module))
        .collect();
    if missing.is_empty() {
        return Ok(None);
    }

    let at = insertion_offset(&top_level, source);
    let mut text = String::new();
    if at > 0 && !source[..at].ends_with('\n') {
        text.push('\n');
    }
    for module in missing {
        text.push_str("import ");
        text.push_str(module);
        text.push('\n');
    }
    Ok(Some(Edit::insert(at, text)))
}

fn insertion_offset(top_level: &[Node<'_>], source: &str) -> usize {
    let mut offset = 0;
    let mut seen_code = false;
    let mut seen_import = false;

    for node in top_level {
        match node.kind() {
            "comment" => {
                if !seen_code {
                    offset = line_end(source, node.end_byte());
                }
            }
            "import_statement" | "import_from_statement" | "future_import_statement" => {
                seen_code = true;
                seen_import = true;
                offset = line_end(source, node.end_byte());
            }
            "expression_statement" if !seen_code && is_docstring(*node) => {
                seen_code = true;
                offset = line_end(source, node.end_byte());
            }
            _ => break,
        }
    }

    if !seen_import && !seen_code {
        return header_end(source, offset);
    }
    offset
}

/// Offset just past the newline ending the line that contains `byte`.
fn line_end(source: &str, byte: usize) -> usize {
    source[byte..]
        .find('\n')
        .map_or(source.len(), |idx| byte + idx + 1)
}

/// Without docstring or imports, skip only leading `#` lines.
fn header_end(source: &str, comment_offset: usize) -> usize {
    let mut offset = 0;
    for line in source.split_inclusive('\n') {
        if offset >= comment_offset || !line.trim_start().starts_with('#') {
            break;
        }
        offset += line.len();
    }
    offset
}

fn is_docstring(node: Node<'_>) -> bool {
    let children = code_children(node);
    children.len() == 1 && matches!(children[0].kind(), "string" | "concatenated_string")
}

// ──────────────────── commit ────────────────────

/// Write sidecars, then atomically replace the test source.
pub fn commit(plan: &CompactionPlan) -> Result<()> {
    let mut written: Vec<&Path> = Vec::with_capacity(plan.sidecars.len());
    let outcome = write_all(plan, &mut written);
    if outcome.is_err() {
        for path in written {
            let _ = fs::remove_file(path);
        }
    }
    outcome
}

fn write_all<'p>(plan: &'p CompactionPlan, written: &mut Vec<&'p Path>) -> Result<()> {
    for sidecar in &plan.sidecars {
        if let Some(parent) = sidecar.path.parent() {
            fs::create_dir_all(parent).map_err(|source| EntropyError::io(parent, source))?;
        }
        let existed = sidecar.path.exists();
        fs::write(&sidecar.path, &sidecar.contents)
            .map_err(|source| EntropyError::io(&sidecar.path, source))?;
        if !existed {
            written.push(&sidecar.path);
        }
    }

    let target = &plan.test_file;
    let dir = target.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::Builder::new()
        .prefix(".entropy-rewrite-")
        .tempfile_in(dir)
        .map_err(|source| EntropyError::io(dir, source))?;
    tmp.write_all(plan.new_source.as_bytes())
        .and_then(|()| tmp.flush())
        .map_err(|source| EntropyError::io(tmp.path(), source))?;
    if let Ok(meta) = fs::metadata(target) {
        let _ = fs::set_permissions(tmp.path(), meta.permissions());
    }
    tmp.persist(target)
        .map_err(|e| EntropyError::io(target, e.error))?;
    Ok(())
}
