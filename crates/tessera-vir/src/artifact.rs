//! Versioned artifact container and the end-to-end serialize/load paths.
//!
//! Every encoding carries the declared version first: the text form opens
//! with a `version` header line, and the binary/JSON forms serialize the
//! version field ahead of the ops. Consumers check the header and run the
//! compatibility checker before any construct-level conversion is attempted.

use serde::{Deserialize, Serialize};
use tessera_core::{Error, Result, Version};

use crate::checker;
use crate::dialect::Module;
use crate::downgrade;
use crate::registry::{self, Registry};
use crate::text;
use crate::upgrade;
use crate::versioned::{VersionedOp, CURRENT_VERSION};

/// A serialized program in the versioned dialect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    /// The producer's build version, declared at the root.
    pub version: Version,
    pub ops: Vec<VersionedOp>,
}

impl Artifact {
    pub fn new(version: Version, ops: Vec<VersionedOp>) -> Self {
        Self { version, ops }
    }

    /// The version this consumer should validate against:
    /// `min(producer version, consumer max supported version)`.
    pub fn negotiated_target(&self) -> Version {
        self.version.min(CURRENT_VERSION)
    }

    /// Render the canonical text form.
    pub fn to_text(&self) -> String {
        let mut out = format!("version {}\n", self.version);
        for op in &self.ops {
            out.push_str(&text::print_op(op));
            out.push('\n');
        }
        out
    }

    /// Parse the canonical text form. Exact inverse of `to_text`.
    pub fn parse(input: &str) -> Result<Self> {
        let mut lines = input.split_inclusive('\n');
        let header = lines.next().unwrap_or("");
        let version_text = header
            .strip_prefix("version ")
            .and_then(|rest| rest.strip_suffix('\n'))
            .ok_or(Error::Syntax {
                position: 0,
                expected: "`version <major.minor.patch>` header".to_string(),
            })?;
        let version = Version::parse(version_text)?;

        let mut ops = Vec::new();
        let mut offset = header.len();
        for line in lines {
            let body = line.strip_suffix('\n').ok_or(Error::Syntax {
                position: input.len(),
                expected: "newline-terminated op".to_string(),
            })?;
            // Op parsing reports positions relative to its line; rebase
            // them onto the whole input.
            let op = text::parse_op(body).map_err(|err| match err {
                Error::Syntax { position, expected } => Error::Syntax {
                    position: position + offset,
                    expected,
                },
                other => other,
            })?;
            ops.push(op);
            offset += line.len();
        }
        Ok(Self { version, ops })
    }

    /// Encode as bytes; the version field leads.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }

    /// JSON debug encoding.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Producer path: upgrade a current-dialect module into an artifact tagged
/// with this build's version.
pub fn serialize_module(module: &Module) -> Result<Artifact> {
    upgrade::upgrade_module(module)
}

/// Consumer path: compatibility-check the artifact, then downgrade it into
/// the current dialect. `target` defaults to the negotiated version.
pub fn load(artifact: &Artifact, target: Option<Version>) -> Result<Module> {
    load_with(artifact, target, registry::global())
}

/// `load` against an explicit registry (pinned-version readers, tests).
pub fn load_with(artifact: &Artifact, target: Option<Version>, registry: &Registry) -> Result<Module> {
    let target = target.unwrap_or_else(|| artifact.negotiated_target());
    tracing::debug!(
        "loading artifact version {} at target {}",
        artifact.version,
        target
    );
    checker::validate_artifact(artifact, &target, registry)
        .map_err(|err| classify_too_new(err, artifact))?;
    downgrade::downgrade_artifact(artifact)
}

/// Distinguish "this toolchain is older than the construct" from an
/// ordinary window violation, so tooling can tell "too new" from "too old".
fn classify_too_new(err: Error, artifact: &Artifact) -> Error {
    match err {
        Error::VersionRangeViolation {
            kind, name, range, ..
        } if range.min > CURRENT_VERSION => Error::UnsupportedConstructVersion {
            kind,
            name,
            artifact_version: artifact.version,
        },
        Error::UnknownConstruct { kind, name } if artifact.version > CURRENT_VERSION => {
            Error::UnsupportedConstructVersion {
                kind,
                name,
                artifact_version: artifact.version,
            }
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::ConstructDescriptor;
    use crate::dialect::{Attr, ElementType, Op, Type};
    use crate::versioned::{
        self, AnyType, BroadcastV1, ElementTypeV1, OpaqueConstruct, TensorV1, VersionedType,
    };
    use tessera_core::{ConstructKind, VersionRange};

    fn sample_module() -> Module {
        Module::with_ops(vec![
            Op::Shard {
                input: Type::tensor(vec![4], ElementType::F32),
                sharding: Attr::sharding(Attr::devices(vec![0, 1]), vec![Some("x".to_string())]),
                result: Type::tensor(vec![4], ElementType::F32),
            },
            Op::AllReduce {
                input: Type::tensor(vec![8], ElementType::I64),
                reduce_axes: vec!["x".to_string()],
                result: Type::tensor(vec![8], ElementType::I64),
            },
        ])
    }

    fn tensor_carrier() -> AnyType {
        AnyType::new(VersionedType::Tensor(TensorV1 {
            shape: vec![4],
            element: ElementTypeV1::F32,
        }))
    }

    #[test]
    fn test_serialize_then_load_round_trips() {
        let module = sample_module();
        let artifact = serialize_module(&module).unwrap();
        assert_eq!(artifact.version, CURRENT_VERSION);
        let restored = load(&artifact, None).unwrap();
        assert_eq!(restored, module);
    }

    #[test]
    fn test_text_encoding_round_trips() {
        let artifact = serialize_module(&sample_module()).unwrap();
        let rendered = artifact.to_text();
        assert!(rendered.starts_with("version 1.3.0\n"));
        let reparsed = Artifact::parse(&rendered).unwrap();
        assert_eq!(reparsed, artifact);
        assert_eq!(reparsed.to_text(), rendered);
    }

    #[test]
    fn test_binary_and_json_encodings_round_trip() {
        let artifact = serialize_module(&sample_module()).unwrap();

        let bytes = artifact.to_bytes().unwrap();
        assert_eq!(Artifact::from_bytes(&bytes).unwrap(), artifact);

        let json = artifact.to_json().unwrap();
        assert_eq!(Artifact::from_json(&json).unwrap(), artifact);
    }

    #[test]
    fn test_missing_header_is_rejected() {
        let err = Artifact::parse("token_v1\n").unwrap_err();
        assert!(matches!(err, Error::Syntax { .. }));

        let err = Artifact::parse("version 1.x.0\n").unwrap_err();
        assert!(matches!(err, Error::MalformedVersion { .. }));
    }

    #[test]
    fn test_syntax_position_is_relative_to_the_whole_input() {
        let header = "version 1.3.0\n";
        let good = "all_gather_v1(tensor_v1<8xi64>, axes=[x]) -> tensor_v1<8xi64>\n";
        // `interval_v1[0:4]` is missing its step; the `:` is expected where
        // the closing bracket sits.
        let bad = "shard_v1(tensor_v1<4xf32>, sharding=interval_v1[0:4]) -> tensor_v1<4xf32>\n";
        let input = format!("{header}{good}{bad}");
        let err = Artifact::parse(&input).unwrap_err();
        match err {
            Error::Syntax { position, .. } => {
                let line_start = header.len() + good.len();
                assert!(position > line_start);
                assert!(position < input.len());
                assert_eq!(position, line_start + bad.find(']').unwrap());
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_load_rejects_out_of_window_construct() {
        // priority_v1 needs 1.2.0; pinning the target below that must name it.
        let module = Module::with_ops(vec![Op::Reshard {
            input: Type::tensor(vec![4], ElementType::F32),
            sharding: Attr::sharding(Attr::Priority(1), vec![None]),
            result: Type::tensor(vec![4], ElementType::F32),
        }]);
        let artifact = serialize_module(&module).unwrap();
        let err = load(&artifact, Some(Version::new(1, 1, 0))).unwrap_err();
        match err {
            Error::VersionRangeViolation { name, .. } => assert_eq!(name, "priority_v1"),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_too_new_artifact_is_diagnosed_as_unsupported_version() {
        // A 2.0.0 artifact carrying a construct this 1.3.0 toolchain has
        // never heard of.
        let artifact = Artifact::new(
            Version::new(2, 0, 0),
            vec![VersionedOp::Opaque(OpaqueConstruct {
                kind: ConstructKind::Op,
                name: "all_to_all_v2".to_string(),
                text: "all_to_all_v2(tensor_v1<4xf32>) -> tensor_v1<4xf32>".to_string(),
            })],
        );
        let err = load(&artifact, None).unwrap_err();
        match err {
            Error::UnsupportedConstructVersion {
                name,
                artifact_version,
                ..
            } => {
                assert_eq!(name, "all_to_all_v2");
                assert_eq!(artifact_version, Version::new(2, 0, 0));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_too_new_construct_with_known_descriptor() {
        // A reader that has the 2.x schema manifest but still runs a 1.3.0
        // dialect: the descriptor is known, the window is not satisfiable.
        let mut registry = crate::registry::Registry::new();
        for d in versioned::manifest() {
            registry.register(d).unwrap();
        }
        registry
            .register(ConstructDescriptor::new(
                ConstructKind::Op,
                "all_to_all_v2",
                VersionRange::since(Version::new(2, 0, 0)),
                &[],
                &[],
            ))
            .unwrap();

        let artifact = Artifact::new(
            Version::new(2, 0, 0),
            vec![VersionedOp::Opaque(OpaqueConstruct {
                kind: ConstructKind::Op,
                name: "all_to_all_v2".to_string(),
                text: "all_to_all_v2() -> token_v1".to_string(),
            })],
        );
        let err = load_with(&artifact, None, &registry).unwrap_err();
        assert!(matches!(err, Error::UnsupportedConstructVersion { .. }));
    }

    #[test]
    fn test_dropped_support_surfaces_from_load() {
        // broadcast_v1 is inside its window at 1.1.0 but the mapping is gone.
        let artifact = Artifact::new(
            Version::new(1, 1, 0),
            vec![VersionedOp::Broadcast(BroadcastV1 {
                input: tensor_carrier(),
                result: tensor_carrier(),
            })],
        );
        let err = load(&artifact, None).unwrap_err();
        match err {
            Error::DroppedSupport { name, .. } => assert_eq!(name, "broadcast_v1"),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_opaque_op_survives_a_text_round_trip() {
        let input = "version 2.0.0\nall_to_all_v2(tensor_v1<4xf32>, axes=[x]) -> tensor_v1<4xf32>\n";
        let artifact = Artifact::parse(input).unwrap();
        assert_eq!(artifact.to_text(), input);
    }
}
