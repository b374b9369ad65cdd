//! Decision plane: per-file verdicts and the batch safety gate.

pub mod safety;
pub mod verdict;
