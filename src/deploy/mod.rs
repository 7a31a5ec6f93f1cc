//! Deployment chores: reload sentinel and obsolete-file cleanup.

pub mod cleanup;
pub mod sentinel;
