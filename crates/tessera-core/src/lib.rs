//! Core types for the Tessera versioned-IR compatibility layer.

pub mod error;
pub mod version;

pub use error::{Error, Result};
pub use version::{ConstructKind, Version, VersionBound, VersionRange};
