//! Test-file analysis: discovery, structural health scan, churn, critical paths.

pub mod churn;
pub mod critical;
pub mod discovery;
pub mod health;
pub mod literal;
pub mod python;
