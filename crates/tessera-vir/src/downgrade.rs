//! Downgrade conversion: versioned dialect -> current dialect.
//!
//! Runs at deserialization time, after the compatibility check has passed.
//! One match arm per versioned construct, unwrapping generic carriers
//! recursively. Two distinct failure modes keep "too new" and "too old"
//! apart: an opaque construct from a newer schema fails with
//! `UnsupportedConstructVersion`, while a construct whose mapping this
//! toolchain has dropped fails with `DroppedSupport`.

use tessera_core::{ConstructKind, Error, Result, Version};

use crate::artifact::Artifact;
use crate::dialect::{Attr, ElementType, MeshAxis, Module, Op, Type};
use crate::registry;
use crate::versioned::{
    AnyAttr, AnyType, BroadcastV1, ElementTypeV1, FragmentV1, OpaqueConstruct, VersionedAttr,
    VersionedOp, VersionedType, CURRENT_VERSION,
};

/// Lift a whole artifact back into the current dialect.
pub fn downgrade_artifact(artifact: &Artifact) -> Result<Module> {
    let ops = artifact
        .ops
        .iter()
        .map(|op| downgrade_op(op, &artifact.version))
        .collect::<Result<Vec<_>>>()?;
    tracing::debug!("downgraded {} ops from artifact version {}", ops.len(), artifact.version);
    Ok(Module::with_ops(ops))
}

pub fn downgrade_op(op: &VersionedOp, artifact_version: &Version) -> Result<Op> {
    let current = match op {
        VersionedOp::Shard(s) => Op::Shard {
            input: downgrade_type_carrier(&s.input, artifact_version)?,
            sharding: downgrade_attr_carrier(&s.sharding, artifact_version)?,
            result: downgrade_type_carrier(&s.result, artifact_version)?,
        },
        VersionedOp::Reshard(s) => Op::Reshard {
            input: downgrade_type_carrier(&s.input, artifact_version)?,
            sharding: downgrade_attr_carrier(&s.sharding, artifact_version)?,
            result: downgrade_type_carrier(&s.result, artifact_version)?,
        },
        VersionedOp::AllGather(g) => Op::AllGather {
            input: downgrade_type_carrier(&g.input, artifact_version)?,
            gather_axes: g.gather_axes.clone(),
            result: downgrade_type_carrier(&g.result, artifact_version)?,
        },
        VersionedOp::AllReduce(r) => Op::AllReduce {
            input: downgrade_type_carrier(&r.input, artifact_version)?,
            reduce_axes: r.reduce_axes.clone(),
            result: downgrade_type_carrier(&r.result, artifact_version)?,
        },
        VersionedOp::Fragment(f) => downgrade_fragment(f, artifact_version)?,
        VersionedOp::Broadcast(_) => {
            // Still inside its published range, but this toolchain no
            // longer implements the mapping.
            return Err(dropped_support(ConstructKind::Op, BroadcastV1::NAME));
        }
        VersionedOp::Opaque(opaque) => return Err(reject_opaque(opaque, artifact_version)),
    };
    Ok(current)
}

pub fn downgrade_attr(attr: &VersionedAttr, artifact_version: &Version) -> Result<Attr> {
    let current = match attr {
        VersionedAttr::Interval(i) => Attr::Interval {
            start: i.start,
            end: i.end,
            step: i.step,
        },
        VersionedAttr::Devices(d) => Attr::Devices(d.ids.clone()),
        VersionedAttr::Axis(a) => Attr::Axis(MeshAxis::new(a.name.clone(), a.size)),
        VersionedAttr::Mesh(m) => Attr::Mesh(
            m.axes
                .iter()
                .map(|a| MeshAxis::new(a.name.clone(), a.size))
                .collect(),
        ),
        VersionedAttr::Sharding(s) => Attr::Sharding {
            mesh: Box::new(downgrade_attr_carrier(&s.mesh, artifact_version)?),
            dim_axes: s.dim_axes.clone(),
        },
        VersionedAttr::Priority(p) => Attr::Priority(p.value),
        VersionedAttr::Opaque(opaque) => return Err(reject_opaque(opaque, artifact_version)),
    };
    Ok(current)
}

pub fn downgrade_type(ty: &VersionedType, artifact_version: &Version) -> Result<Type> {
    let current = match ty {
        VersionedType::Tensor(t) => Type::Tensor {
            shape: t.shape.clone(),
            element: downgrade_element(t.element),
        },
        VersionedType::Token(_) => Type::Token,
        VersionedType::Tuple(t) => Type::Tuple(
            t.elements
                .iter()
                .map(|e| downgrade_type_carrier(e, artifact_version))
                .collect::<Result<Vec<_>>>()?,
        ),
        VersionedType::Opaque(opaque) => return Err(reject_opaque(opaque, artifact_version)),
    };
    Ok(current)
}

fn downgrade_fragment(fragment: &FragmentV1, artifact_version: &Version) -> Result<Op> {
    fragment.check_segments()?;

    let split = fragment.segment_sizes[0] as usize;
    let inputs = fragment.operands[..split]
        .iter()
        .map(|t| downgrade_type_carrier(t, artifact_version))
        .collect::<Result<Vec<_>>>()?;
    let captures = fragment.operands[split..]
        .iter()
        .map(|t| downgrade_type_carrier(t, artifact_version))
        .collect::<Result<Vec<_>>>()?;

    Ok(Op::Fragment {
        inputs,
        captures,
        mesh: downgrade_attr_carrier(&fragment.mesh, artifact_version)?,
        results: fragment
            .results
            .iter()
            .map(|t| downgrade_type_carrier(t, artifact_version))
            .collect::<Result<Vec<_>>>()?,
    })
}

fn downgrade_element(element: ElementTypeV1) -> ElementType {
    match element {
        ElementTypeV1::F32 => ElementType::F32,
        ElementTypeV1::F64 => ElementType::F64,
        ElementTypeV1::I32 => ElementType::I32,
        ElementTypeV1::I64 => ElementType::I64,
        ElementTypeV1::I1 => ElementType::I1,
    }
}

fn downgrade_attr_carrier(carrier: &AnyAttr, artifact_version: &Version) -> Result<Attr> {
    downgrade_attr(carrier.get(), artifact_version)
}

fn downgrade_type_carrier(carrier: &AnyType, artifact_version: &Version) -> Result<Type> {
    downgrade_type(carrier.get(), artifact_version)
}

fn dropped_support(kind: ConstructKind, name: &str) -> Error {
    let range = registry::global()
        .get(kind, name)
        .map(|d| d.range)
        .unwrap_or_else(|| tessera_core::VersionRange::since(CURRENT_VERSION));
    Error::DroppedSupport {
        kind,
        name: name.to_string(),
        range,
    }
}

fn reject_opaque(opaque: &OpaqueConstruct, artifact_version: &Version) -> Error {
    if *artifact_version > CURRENT_VERSION {
        Error::UnsupportedConstructVersion {
            kind: opaque.kind,
            name: opaque.name.clone(),
            artifact_version: *artifact_version,
        }
    } else {
        Error::UnknownConstruct {
            kind: opaque.kind,
            name: opaque.name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upgrade::{upgrade_module, upgrade_op};
    use crate::versioned::{AnyType, DevicesV1, TensorV1, TokenV1};

    fn tensor_carrier() -> AnyType {
        AnyType::new(VersionedType::Tensor(TensorV1 {
            shape: vec![4],
            element: ElementTypeV1::F32,
        }))
    }

    #[test]
    fn test_round_trip_identity() {
        let module = Module::with_ops(vec![
            Op::Shard {
                input: Type::tensor(vec![2, 4], ElementType::F32),
                sharding: Attr::sharding(
                    Attr::mesh(vec![MeshAxis::new("x", 2), MeshAxis::new("y", 4)]),
                    vec![Some("x".to_string()), None],
                ),
                result: Type::tensor(vec![2, 4], ElementType::F32),
            },
            Op::AllGather {
                input: Type::Tuple(vec![Type::Token, Type::tensor(vec![8], ElementType::I64)]),
                gather_axes: vec!["x".to_string()],
                result: Type::tensor(vec![8], ElementType::I64),
            },
            Op::Fragment {
                inputs: vec![Type::tensor(vec![4], ElementType::F32)],
                captures: vec![Type::Token],
                mesh: Attr::devices(vec![0, 1, 2, 3]),
                results: vec![Type::tensor(vec![4], ElementType::F32)],
            },
        ]);

        let artifact = upgrade_module(&module).unwrap();
        let restored = downgrade_artifact(&artifact).unwrap();
        assert_eq!(restored, module);
    }

    #[test]
    fn test_devices_round_trip() {
        let op = Op::Reshard {
            input: Type::tensor(vec![4], ElementType::F32),
            sharding: Attr::sharding(Attr::devices(vec![0, 1, 2, 3]), vec![None]),
            result: Type::tensor(vec![4], ElementType::F32),
        };
        let versioned = upgrade_op(&op).unwrap();
        let restored = downgrade_op(&versioned, &CURRENT_VERSION).unwrap();
        assert_eq!(restored, op);
    }

    #[test]
    fn test_broadcast_fails_with_dropped_support() {
        let op = VersionedOp::Broadcast(BroadcastV1 {
            input: tensor_carrier(),
            result: tensor_carrier(),
        });
        let err = downgrade_op(&op, &Version::new(1, 1, 0)).unwrap_err();
        match err {
            Error::DroppedSupport { name, range, .. } => {
                assert_eq!(name, "broadcast_v1");
                assert!(range.contains(&Version::new(1, 1, 0)));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_bad_segment_record_blocks_downgrade() {
        let op = VersionedOp::Fragment(FragmentV1 {
            operands: vec![tensor_carrier()],
            segment_sizes: vec![2],
            mesh: AnyAttr::new(VersionedAttr::Devices(DevicesV1 { ids: vec![0] })),
            results: vec![],
        });
        let err = downgrade_op(&op, &CURRENT_VERSION).unwrap_err();
        match err {
            Error::MalformedConstruct { name, .. } => assert_eq!(name, FragmentV1::NAME),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_opaque_from_newer_artifact_is_too_new() {
        let op = VersionedOp::Opaque(OpaqueConstruct {
            kind: ConstructKind::Op,
            name: "all_to_all_v2".to_string(),
            text: "all_to_all_v2() -> token_v1".to_string(),
        });
        let err = downgrade_op(&op, &Version::new(2, 0, 0)).unwrap_err();
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
    fn test_opaque_from_supported_artifact_is_unknown() {
        let ty = VersionedType::Opaque(OpaqueConstruct {
            kind: ConstructKind::Type,
            name: "mystery_v1".to_string(),
            text: "mystery_v1<..>".to_string(),
        });
        let err = downgrade_type(&ty, &Version::new(1, 2, 0)).unwrap_err();
        assert!(matches!(err, Error::UnknownConstruct { .. }));
    }

    #[test]
    fn test_token_needs_its_own_round_trip() {
        let versioned = VersionedType::Token(TokenV1);
        let restored = downgrade_type(&versioned, &CURRENT_VERSION).unwrap();
        assert_eq!(restored, Type::Token);
    }
}
