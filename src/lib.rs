#![forbid(unsafe_code)]

//! Entropy: measures the marginal value of each test file in a Python suite,
//! classifies decay, and applies safety-gated remediation.
//!
//! Pipeline stages:
//! 1. **Coverage engine**: lines each test file covers that no other file does
//! 2. **Static health scanner**: size, mock density, tautologies, large literals
//! 3. **Verdict engine**: rot tags, score, and one prioritized action per file
//! 4. **Remediation**: delete, quarantine, or externalize literals to JSON,
//!    gated by the vibe check and the coverage cliff
//!
//! # Library usage
//!
//! ```rust,no_run
//! use entropy_audit::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use entropy_audit::core::config::Config;
//! use entropy_audit::decision::verdict::VerdictEngine;
//! ```

pub mod prelude;

pub mod core;
pub mod coverage;
pub mod decision;
pub mod logger;
pub mod pipeline;
pub mod platform;
pub mod remediation;
pub mod scanner;

#[cfg(test)]
mod test_properties;
