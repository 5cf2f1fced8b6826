//! Rule definition types with serde (YAML/JSON) support.
//!
//! A [`Rule`] is immutable once loaded into a task; edits go through a
//! version bump, which the manager turns into a task restart.

mod rule;

pub use rule::*;

#[cfg(test)]
mod tests;
