//! Unique-coverage attribution across test files.
//!
//! A source line counts toward a test file's unique coverage only when that
//! file is the sole test file covering it. Lines covered by zero or several
//! files count for nobody.

#![allow(missing_docs)]

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use crossbeam_channel as channel;
use parking_lot::Mutex;

use crate::core::config::CoverageStrategy;
use crate::core::errors::{EntropyError, Result};
use crate::core::paths::{display_relative, normalize_syntactic, to_slash};
use crate::coverage::report::{LineContexts, SourceLine};
use crate::coverage::runner::CoverageBackend;
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};

/// Per-test covered lines and the derived unique counts. Read-only after build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoverageMap {
    pub covered: BTreeMap<PathBuf, BTreeSet<SourceLine>>,
    pub unique: BTreeMap<PathBuf, u64>,
}

impl CoverageMap {
    /// Build from per-test line sets (isolated strategy).
    pub fn from_covered(covered: BTreeMap<PathBuf, BTreeSet<SourceLine>>) -> Self {
        let unique = unique_counts(&covered);
        Self { covered, unique }
    }

    /// Unique-coverage count for `test_file`; zero when unknown.
    pub fn unique_for(&self, test_file: &Path) -> u64 {
        self.unique.get(test_file).copied().unwrap_or(0)
    }
}

/// `|cov(t) − ⋃ cov(other)|` for every test file in `covered`.
pub fn unique_counts(covered: &BTreeMap<PathBuf, BTreeSet<SourceLine>>) -> BTreeMap<PathBuf, u64> {
    let mut owners: HashMap<&SourceLine, usize> = HashMap::new();
    for lines in covered.values() {
        for line in lines {
            *owners.entry(line).or_default() += 1;
        }
    }

    covered
        .iter()
        .map(|(test, lines)| {
            let exclusive = lines.iter().filter(|line| owners.get(line) == Some(&1)).count();
            (test.clone(), exclusive as u64)
        })
        .collect()
}

/// Maps coverage context labels back to discovered test files.
///
/// Accepts `pkg.module.function` labels (coverage.py `test_function` contexts)
/// and `path/to/test_x.py::Class::test` node ids, each with an optional
/// `|run`-style phase suffix.
pub struct ContextResolver {
    by_relative: HashMap<String, PathBuf>,
}

impl ContextResolver {
    pub fn new(root: &Path, tests: &[PathBuf]) -> Self {
        let by_relative = tests
            .iter()
            .map(|test| (display_relative(root, test), test.clone()))
            .collect();
        Self { by_relative }
    }

    /// Test file for `context`, or `None` when unresolved or ambiguous.
    pub fn resolve(&self, context: &str) -> Option<&PathBuf> {
        let label = context.split('|').next().unwrap_or("").trim();
        if label.is_empty() {
            return None;
        }

        if let Some((file, _)) = label.split_once("::") {
            let key = to_slash(&normalize_syntactic(Path::new(file)));
            return self.by_relative.get(&key);
        }

        let parts: Vec<&str> = label.split('.').collect();
        let mut matches = (1..=parts.len())
            .filter_map(|len| self.by_relative.get(&format!("{}.py", parts[..len].join("/"))));
        let first = matches.next()?;
        if matches.next().is_some() {
            return None;
        }
        Some(first)
    }
}

/// Attribute context-tagged lines to test files.
///
/// A line with any unresolvable (non-empty) context is skipped entirely, so an
/// unknown contributor can never make another file look like the sole owner.
pub fn attribute_contexts(
    contexts: &LineContexts,
    resolver: &ContextResolver,
    tests: &[PathBuf],
) -> CoverageMap {
    let mut covered: BTreeMap<PathBuf, BTreeSet<SourceLine>> =
        tests.iter().map(|t| (t.clone(), BTreeSet::new())).collect();
    let mut unique: BTreeMap<PathBuf, u64> = tests.iter().map(|t| (t.clone(), 0)).collect();

    'lines: for (line, labels) in contexts {
        let mut owners: BTreeSet<&PathBuf> = BTreeSet::new();
        for label in labels {
            if label.split('|').next().unwrap_or("").trim().is_empty() {
                continue;
            }
            match resolver.resolve(label) {
                Some(test) => {
                    owners.insert(test);
                }
                None => continue 'lines,
            }
        }
        for owner in &owners {
            covered
                .entry((*owner).clone())
                .or_default()
                .insert(line.clone());
        }
        if let [owner] = owners.into_iter().collect::<Vec<_>>().as_slice() {
            *unique.entry((*owner).clone()).or_default() += 1;
        }
    }

    CoverageMap { covered, unique }
}

/// Drives a `CoverageBackend` under the configured strategy. Never fails.
pub struct CoverageEngine<'a> {
    backend: &'a dyn CoverageBackend,
    root: PathBuf,
    strategy: CoverageStrategy,
    parallelism: usize,
    logger: ActivityLoggerHandle,
}

impl<'a> CoverageEngine<'a> {
    pub fn new(
        backend: &'a dyn CoverageBackend,
        root: &Path,
        strategy: CoverageStrategy,
        parallelism: usize,
        logger: ActivityLoggerHandle,
    ) -> Self {
        Self {
            backend,
            root: root.to_path_buf(),
            strategy,
            parallelism: parallelism.max(1),
            logger,
        }
    }

    /// Unique coverage for every test file. Failures degrade to zero and are logged.
    pub fn unique_coverage(&self, tests: &[PathBuf], cancel: &AtomicBool) -> CoverageMap {
        match self.strategy {
            CoverageStrategy::Isolated => self.isolated(tests, cancel),
            CoverageStrategy::Contexts => self.contexts(tests),
        }
    }

    /// Aggregate suite coverage percentage; `None` (logged) when unavailable.
    ///
    /// An empty suite covers nothing. The backend is not invoked for it, since
    /// a test runner without targets would collect the whole project again.
    pub fn aggregate_percent(&self, tests: &[PathBuf]) -> Option<f64> {
        if tests.is_empty() {
            return Some(0.0);
        }
        let measured = scratch_dir().and_then(|dir| self.backend.measure_total(tests, dir.path()));
        match measured {
            Ok(pct) if pct.is_finite() => Some(pct),
            Ok(pct) => {
                self.warn(
                    None,
                    &EntropyError::CoverageTool {
                        context: "coverage totals",
                        details: format!("non-finite percentage {pct}"),
                    },
                );
                None
            }
            Err(err) => {
                self.warn(None, &err);
                None
            }
        }
    }

    fn isolated(&self, tests: &[PathBuf], cancel: &AtomicBool) -> CoverageMap {
        let (job_tx, job_rx) = channel::unbounded::<PathBuf>();
        for test in tests {
            let _ = job_tx.send(test.clone());
        }
        drop(job_tx);

        let results: Mutex<Vec<(PathBuf, Result<BTreeSet<SourceLine>>)>> =
            Mutex::new(Vec::with_capacity(tests.len()));
        let workers = self.parallelism.min(tests.len().max(1));
        thread::scope(|scope| {
            for _ in 0..workers {
                let job_rx = job_rx.clone();
                let results = &results;
                scope.spawn(move || {
                    while let Ok(test) = job_rx.recv() {
                        if cancel.load(Ordering::Relaxed) {
                            results.lock().push((test, Ok(BTreeSet::new())));
                            continue;
                        }
                        // Each invocation owns its scratch directory for its whole lifetime.
                        let measured = scratch_dir()
                            .and_then(|dir| self.backend.measure_file(&test, dir.path()));
                        results.lock().push((test, measured));
                    }
                });
            }
        });

        // Merge only once every worker has finished.
        let mut covered = BTreeMap::new();
        for (test, measured) in results.into_inner() {
            let lines = measured.unwrap_or_else(|err| {
                self.warn(Some(&test), &err);
                BTreeSet::new()
            });
            covered.insert(test, lines);
        }
        CoverageMap::from_covered(covered)
    }

    fn contexts(&self, tests: &[PathBuf]) -> CoverageMap {
        let measured = scratch_dir().and_then(|dir| self.backend.measure_contexts(tests, dir.path()));
        let contexts = measured.unwrap_or_else(|err| {
            self.warn(None, &err);
            LineContexts::new()
        });
        let resolver = ContextResolver::new(&self.root, tests);
        attribute_contexts(&contexts, &resolver, tests)
    }

    fn warn(&self, test: Option<&Path>, err: &EntropyError) {
        self.logger.send(ActivityEvent::warning(
            test.map(|t| display_relative(&self.root, t)),
            err,
        ));
    }
}

fn scratch_dir() -> Result<tempfile::TempDir> {
    tempfile::Builder::new()
        .prefix("entropy-cov-")
        .tempdir()
        .map_err(|source| EntropyError::io(std::env::temp_dir(), source))
}
