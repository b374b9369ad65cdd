//! Configuration system: TOML file + env var overrides + safe defaults.
//!
//! Top-level keys use the camelCase names of the audit's configuration surface
//! (`maxTokenContext`, `vibeCheckCap`, ...). Subprocess and logging knobs live
//! in the `[coverage]`, `[churn]` and `[logging]` tables.

#![allow(missing_docs)]

use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::errors::{EntropyError, Result};

/// File name looked up in the working directory when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "entropy.toml";

/// Full entropy configuration model. Immutable for the duration of a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    pub max_token_context: u64,
    pub max_mock_density: f64,
    /// Informational only: surfaced in the report, never used for action selection.
    pub min_unique_coverage_threshold: u64,
    pub churn_threshold_commits: u32,
    pub churn_window_days: u32,
    pub vibe_check_cap: usize,
    pub coverage_cliff_delta_percent: f64,
    pub execution_mode: ExecutionMode,
    pub quarantine_dir: PathBuf,
    pub fixtures_dir: PathBuf,
    pub critical_paths_file: PathBuf,
    /// Rendered-source size (chars) above which a dict/list literal is externalized.
    pub large_literal_threshold: usize,
    pub tests_dir: PathBuf,
    pub source_dir: PathBuf,
    pub report_file: PathBuf,
    pub coverage: CoverageConfig,
    pub churn: ChurnConfig,
    pub logging: LoggingConfig,
}

/// Whether remediation mutates the working tree or only reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionMode {
    #[default]
    PrSuggestion,
    ReportOnly,
}

/// How per-file unique coverage is attributed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CoverageStrategy {
    /// One suite invocation per test file, each with its own data file.
    #[default]
    Isolated,
    /// One suite invocation with per-line test-function contexts.
    Contexts,
}

/// Report format requested from the coverage tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Json,
    Xml,
}

/// Coverage subprocess settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct CoverageConfig {
    pub strategy: CoverageStrategy,
    pub report_format: ReportFormat,
    pub python_command: String,
    pub timeout_secs: u64,
    /// Concurrent isolated runs. Each run gets its own data directory.
    pub parallelism: usize,
}

/// Version-control history query settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct ChurnConfig {
    pub git_command: String,
    pub timeout_secs: u64,
}

/// Activity log settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct LoggingConfig {
    /// JSONL activity log. `None` writes entries to stderr.
    pub jsonl_path: Option<PathBuf>,
    pub max_size_bytes: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_token_context: 2_000,
            max_mock_density: 0.55,
            min_unique_coverage_threshold: 5,
            churn_threshold_commits: 5,
            churn_window_days: 30,
            vibe_check_cap: 20,
            coverage_cliff_delta_percent: 0.5,
            execution_mode: ExecutionMode::PrSuggestion,
            quarantine_dir: PathBuf::from("tests/quarantine"),
            fixtures_dir: PathBuf::from("tests/fixtures"),
            critical_paths_file: PathBuf::from("critical_paths.json"),
            large_literal_threshold: 1_000,
            tests_dir: PathBuf::from("tests"),
            source_dir: PathBuf::from("src"),
            report_file: PathBuf::from("entropy_report.md"),
            coverage: CoverageConfig::default(),
            churn: ChurnConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for CoverageConfig {
    fn default() -> Self {
        Self {
            strategy: CoverageStrategy::Isolated,
            report_format: ReportFormat::Json,
            python_command: "python".to_string(),
            timeout_secs: 300,
            parallelism: 1,
        }
    }
}

impl Default for ChurnConfig {
    fn default() -> Self {
        Self {
            git_command: "git".to_string(),
            timeout_secs: 10,
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PrSuggestion => write!(f, "PR_SUGGESTION"),
            Self::ReportOnly => write!(f, "REPORT_ONLY"),
        }
    }
}

impl FromStr for ExecutionMode {
    type Err = EntropyError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PR_SUGGESTION" => Ok(Self::PrSuggestion),
            "REPORT_ONLY" => Ok(Self::ReportOnly),
            other => Err(EntropyError::ConfigParse {
                context: "executionMode",
                details: format!("expected PR_SUGGESTION or REPORT_ONLY, got {other:?}"),
            }),
        }
    }
}

impl FromStr for CoverageStrategy {
    type Err = EntropyError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "isolated" => Ok(Self::Isolated),
            "contexts" => Ok(Self::Contexts),
            other => Err(EntropyError::ConfigParse {
                context: "coverage.strategy",
                details: format!("expected isolated or contexts, got {other:?}"),
            }),
        }
    }
}

impl Config {
    /// Default configuration path (project-local).
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathBuf::from(DEFAULT_CONFIG_FILE)
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| EntropyError::Io {
                path: path_buf.clone(),
                source,
            })?;
            toml::from_str::<Self>(&raw)?
        } else if path.is_some() {
            return Err(EntropyError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.apply_env_overrides_from(env_var)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load config, falling back to defaults on any failure.
    ///
    /// Configuration problems never abort a run: the error is handed back so the
    /// caller can log it as a warning.
    pub fn load_or_default(path: Option<&Path>) -> (Self, Option<EntropyError>) {
        match Self::load(path) {
            Ok(cfg) => (cfg, None),
            Err(err) => (Self::default(), Some(err)),
        }
    }

    /// Resolve a configured path against the project root.
    #[must_use]
    pub fn resolve(root: &Path, configured: &Path) -> PathBuf {
        if configured.is_absolute() {
            configured.to_path_buf()
        } else {
            root.join(configured)
        }
    }

    /// Deterministic hash of the effective config for logging.
    ///
    /// FNV-1a over canonical JSON so the value is stable across processes.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        override_parsed(&mut lookup, "ENTROPY_MAX_TOKEN_CONTEXT", &mut self.max_token_context)?;
        override_parsed(&mut lookup, "ENTROPY_MAX_MOCK_DENSITY", &mut self.max_mock_density)?;
        override_parsed(
            &mut lookup,
            "ENTROPY_MIN_UNIQUE_COVERAGE_THRESHOLD",
            &mut self.min_unique_coverage_threshold,
        )?;
        override_parsed(
            &mut lookup,
            "ENTROPY_CHURN_THRESHOLD_COMMITS",
            &mut self.churn_threshold_commits,
        )?;
        override_parsed(&mut lookup, "ENTROPY_CHURN_WINDOW_DAYS", &mut self.churn_window_days)?;
        override_parsed(&mut lookup, "ENTROPY_VIBE_CHECK_CAP", &mut self.vibe_check_cap)?;
        override_parsed(
            &mut lookup,
            "ENTROPY_COVERAGE_CLIFF_DELTA_PERCENT",
            &mut self.coverage_cliff_delta_percent,
        )?;
        override_parsed(
            &mut lookup,
            "ENTROPY_LARGE_LITERAL_THRESHOLD",
            &mut self.large_literal_threshold,
        )?;

        if let Some(raw) = lookup("ENTROPY_EXECUTION_MODE") {
            self.execution_mode = raw.parse()?;
        }
        if let Some(raw) = lookup("ENTROPY_QUARANTINE_DIR") {
            self.quarantine_dir = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("ENTROPY_FIXTURES_DIR") {
            self.fixtures_dir = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("ENTROPY_CRITICAL_PATHS_FILE") {
            self.critical_paths_file = PathBuf::from(raw);
        }

        // coverage
        if let Some(raw) = lookup("ENTROPY_COVERAGE_STRATEGY") {
            self.coverage.strategy = raw.parse()?;
        }
        if let Some(raw) = lookup("ENTROPY_COVERAGE_PYTHON") {
            self.coverage.python_command = raw;
        }
        override_parsed(
            &mut lookup,
            "ENTROPY_COVERAGE_TIMEOUT_SECS",
            &mut self.coverage.timeout_secs,
        )?;
        override_parsed(
            &mut lookup,
            "ENTROPY_COVERAGE_PARALLELISM",
            &mut self.coverage.parallelism,
        )?;

        // churn
        override_parsed(&mut lookup, "ENTROPY_CHURN_TIMEOUT_SECS", &mut self.churn.timeout_secs)?;

        // logging
        if let Some(raw) = lookup("ENTROPY_LOG_JSONL") {
            self.logging.jsonl_path = Some(PathBuf::from(raw));
        }

        Ok(())
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.max_mock_density) {
            return Err(EntropyError::InvalidConfig {
                details: format!(
                    "maxMockDensity must be in [0, 1], got {}",
                    self.max_mock_density
                ),
            });
        }

        if !self.coverage_cliff_delta_percent.is_finite() || self.coverage_cliff_delta_percent < 0.0
        {
            return Err(EntropyError::InvalidConfig {
                details: format!(
                    "coverageCliffDeltaPercent must be a finite value >= 0, got {}",
                    self.coverage_cliff_delta_percent
                ),
            });
        }

        if self.churn_window_days == 0 {
            return Err(EntropyError::InvalidConfig {
                details: "churnWindowDays must be >= 1".to_string(),
            });
        }

        if self.large_literal_threshold == 0 {
            return Err(EntropyError::InvalidConfig {
                details: "largeLiteralThreshold must be >= 1".to_string(),
            });
        }

        if self.coverage.parallelism == 0 {
            return Err(EntropyError::InvalidConfig {
                details: "coverage.parallelism must be >= 1".to_string(),
            });
        }

        if self.coverage.timeout_secs == 0 || self.churn.timeout_secs == 0 {
            return Err(EntropyError::InvalidConfig {
                details: "coverage.timeoutSecs and churn.timeoutSecs must be > 0".to_string(),
            });
        }

        if self.coverage.python_command.trim().is_empty() {
            return Err(EntropyError::InvalidConfig {
                details: "coverage.pythonCommand must not be empty".to_string(),
            });
        }

        if self.quarantine_dir == self.tests_dir {
            return Err(EntropyError::InvalidConfig {
                details: "quarantineDir must differ from testsDir".to_string(),
            });
        }

        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn override_parsed<F, T>(lookup: &mut F, name: &str, slot: &mut T) -> Result<()>
where
    F: FnMut(&str) -> Option<String>,
    T: FromStr,
    T::Err: fmt::Display,
{
    if let Some(raw) = lookup(name) {
        *slot = raw
            .trim()
            .parse::<T>()
            .map_err(|error| EntropyError::ConfigParse {
                context: "env",
                details: format!("{name}={raw:?}: {error}"),
            })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(name, value)| ((*name).to_string(), (*value).to_string()))
            .collect()
    }

    #[test]
    fn default_config_is_valid() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.max_token_context, 2_000);
        assert!((cfg.max_mock_density - 0.55).abs() < f64::EPSILON);
        assert_eq!(cfg.vibe_check_cap, 20);
        assert_eq!(cfg.execution_mode, ExecutionMode::PrSuggestion);
    }

    #[test]
    fn parses_camel_case_keys_and_tables() {
        let raw = r#"
maxTokenContext = 3000
maxMockDensity = 0.4
vibeCheckCap = 5
executionMode = "REPORT_ONLY"
quarantineDir = "tests/held"

[coverage]
strategy = "contexts"
reportFormat = "xml"
timeoutSecs = 60
"#;
        let cfg: Config = toml::from_str(raw).expect("config should parse");
        assert_eq!(cfg.max_token_context, 3_000);
        assert_eq!(cfg.vibe_check_cap, 5);
        assert_eq!(cfg.execution_mode, ExecutionMode::ReportOnly);
        assert_eq!(cfg.quarantine_dir, PathBuf::from("tests/held"));
        assert_eq!(cfg.coverage.strategy, CoverageStrategy::Contexts);
        assert_eq!(cfg.coverage.report_format, ReportFormat::Xml);
        assert_eq!(cfg.coverage.timeout_secs, 60);
        // untouched keys keep their defaults
        assert_eq!(cfg.churn_window_days, 30);
        assert_eq!(cfg.coverage.parallelism, 1);
    }

    #[test]
    fn mock_density_out_of_range_rejected() {
        let cfg = Config {
            max_mock_density: 1.5,
            ..Config::default()
        };
        let err = cfg.validate().expect_err("expected invalid density");
        assert!(err.to_string().contains("maxMockDensity"));
    }

    #[test]
    fn negative_cliff_delta_rejected() {
        let cfg = Config {
            coverage_cliff_delta_percent: -0.1,
            ..Config::default()
        };
        let err = cfg.validate().expect_err("expected invalid delta");
        assert!(err.to_string().contains("coverageCliffDeltaPercent"));
    }

    #[test]
    fn zero_parallelism_rejected() {
        let mut cfg = Config::default();
        cfg.coverage.parallelism = 0;
        let err = cfg.validate().expect_err("expected parallelism error");
        assert!(err.to_string().contains("parallelism"));
    }

    #[test]
    fn env_overrides_apply() {
        let mut cfg = Config::default();
        let overrides = vars(&[
            ("ENTROPY_VIBE_CHECK_CAP", "3"),
            ("ENTROPY_EXECUTION_MODE", "report_only"),
            ("ENTROPY_COVERAGE_STRATEGY", "contexts"),
            ("ENTROPY_MAX_MOCK_DENSITY", "0.25"),
        ]);
        cfg.apply_env_overrides_from(|name| overrides.get(name).cloned())
            .expect("env overrides should parse");

        assert_eq!(cfg.vibe_check_cap, 3);
        assert_eq!(cfg.execution_mode, ExecutionMode::ReportOnly);
        assert_eq!(cfg.coverage.strategy, CoverageStrategy::Contexts);
        assert!((cfg.max_mock_density - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn env_invalid_number_rejected() {
        let mut cfg = Config::default();
        let overrides = vars(&[("ENTROPY_VIBE_CHECK_CAP", "lots")]);
        let err = cfg
            .apply_env_overrides_from(|name| overrides.get(name).cloned())
            .expect_err("invalid number should fail");
        match err {
            EntropyError::ConfigParse { context, details } => {
                assert_eq!(context, "env");
                assert!(details.contains("ENTROPY_VIBE_CHECK_CAP"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn load_returns_error_for_explicit_missing_path() {
        let result = Config::load(Some(Path::new("/nonexistent/entropy/entropy.toml")));
        assert!(matches!(result, Err(EntropyError::MissingConfig { .. })));
    }

    #[test]
    fn load_or_default_falls_back_on_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("entropy.toml");
        fs::write(&path, "maxTokenContext = \"not a number\"").unwrap();

        let (cfg, warning) = Config::load_or_default(Some(&path));
        assert_eq!(cfg, Config::default());
        let warning = warning.expect("malformed config should surface a warning");
        assert_eq!(warning.code(), "ENT-1003");
    }

    #[test]
    fn resolve_keeps_absolute_paths() {
        let root = Path::new("/repo");
        assert_eq!(
            Config::resolve(root, Path::new("tests/quarantine")),
            PathBuf::from("/repo/tests/quarantine")
        );
        assert_eq!(
            Config::resolve(root, Path::new("/elsewhere/fixtures")),
            PathBuf::from("/elsewhere/fixtures")
        );
    }

    #[test]
    fn stable_hash_tracks_changes() {
        let cfg = Config::default();
        let h1 = cfg.stable_hash().expect("hash");
        let h2 = cfg.stable_hash().expect("hash");
        assert_eq!(h1, h2);

        let modified = Config {
            vibe_check_cap: 21,
            ..Config::default()
        };
        assert_ne!(h1, modified.stable_hash().expect("hash"));
    }
}
