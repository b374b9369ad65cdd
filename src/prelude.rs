//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use entropy_audit::prelude::*;
//! ```

// Core
pub use crate::core::config::{Config, CoverageStrategy, ExecutionMode};
pub use crate::core::errors::{EntropyError, Result};
pub use crate::core::model::{Action, LiteralCandidate, RotTag, RotVerdict, TestFileHealth};

// Coverage
pub use crate::coverage::engine::{CoverageEngine, CoverageMap};
pub use crate::coverage::runner::{CoverageBackend, PythonCoverage};

// Scanner
pub use crate::scanner::churn::{ChurnSource, GitChurn, NoChurn};
pub use crate::scanner::critical::CriticalPaths;
pub use crate::scanner::health::{HealthScan, HealthScanner};

// Decision
pub use crate::decision::safety::{CliffCheck, VibeCheck};
pub use crate::decision::verdict::VerdictEngine;

// Remediation
pub use crate::remediation::executor::{ActionOutcome, RemediationExecutor};

// Pipeline
pub use crate::pipeline::{Pipeline, RunOptions, RunOutcome, RunSummary};
