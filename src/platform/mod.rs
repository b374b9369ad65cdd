//! OS-facing helpers: subprocess execution with deadlines.

pub mod process;
