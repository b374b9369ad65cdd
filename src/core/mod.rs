//! Core types: errors, configuration, the per-run data model, path helpers.

pub mod config;
pub mod errors;
pub mod model;
pub mod paths;
