//! Error types for the compatibility layer.
//!
//! Every variant that names a construct carries its kind, name and declared
//! range alongside the requested version, so callers can render a diagnostic
//! without re-deriving context. All errors are terminal for the operation in
//! progress and recoverable at the caller.

use thiserror::Error;

use crate::version::{ConstructKind, Version, VersionRange};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("malformed version `{text}`: {reason}")]
    MalformedVersion { text: String, reason: String },

    #[error("duplicate {kind} `{name}`: conflicting shape already registered")]
    DuplicateConstruct {
        kind: ConstructKind,
        name: String,
    },

    #[error("unknown {kind} `{name}`")]
    UnknownConstruct {
        kind: ConstructKind,
        name: String,
    },

    #[error("{kind} `{name}` with range {range} is not available at version {target}")]
    VersionRangeViolation {
        kind: ConstructKind,
        name: String,
        range: VersionRange,
        target: Version,
    },

    #[error("{kind} `{name}` has no versioned counterpart and cannot be serialized")]
    UnsupportedForSerialization {
        kind: ConstructKind,
        name: String,
    },

    #[error(
        "{kind} `{name}` from artifact version {artifact_version} is newer than \
         this toolchain supports"
    )]
    UnsupportedConstructVersion {
        kind: ConstructKind,
        name: String,
        artifact_version: Version,
    },

    #[error("{kind} `{name}` with range {range} is no longer supported by this toolchain")]
    DroppedSupport {
        kind: ConstructKind,
        name: String,
        range: VersionRange,
    },

    #[error("{kind} `{name}` instance is malformed: {reason}")]
    MalformedConstruct {
        kind: ConstructKind,
        name: String,
        reason: String,
    },

    #[error("syntax error at byte {position}: expected {expected}")]
    Syntax { position: usize, expected: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostics_name_the_construct() {
        let err = Error::VersionRangeViolation {
            kind: ConstructKind::Attr,
            name: "priority_v1".to_string(),
            range: VersionRange::since(Version::new(1, 2, 0)),
            target: Version::new(1, 1, 0),
        };
        let msg = err.to_string();
        assert!(msg.contains("priority_v1"));
        assert!(msg.contains("1.2.0"));
        assert!(msg.contains("1.1.0"));
    }

    #[test]
    fn test_syntax_error_carries_position() {
        let err = Error::Syntax {
            position: 4,
            expected: "`:`".to_string(),
        };
        assert!(err.to_string().contains("byte 4"));
    }
}
