//! Shared primitives for the Vigil alerting platform.
//!
//! This crate carries the pieces every other crate needs:
//! - [`labels`]: label sets and stable series fingerprints
//! - [`duration`]: human-readable duration parsing for rule files
//! - [`config`]: environment-driven manager configuration

pub mod config;
pub mod duration;
pub mod labels;

pub use config::{load_dotenv, ManagerConfig};
pub use duration::{format_duration, parse_duration};
pub use labels::{Fingerprint, Labels};
