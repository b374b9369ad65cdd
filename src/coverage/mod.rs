//! Coverage measurement and unique-coverage attribution.

pub mod engine;
pub mod report;
pub mod runner;
