//! Utility functions.

pub(crate) mod size;
