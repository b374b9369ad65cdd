//! Filesystem remediation: delete, quarantine and literal externalization.

pub mod executor;
pub mod rewrite;
