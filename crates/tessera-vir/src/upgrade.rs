//! Upgrade conversion: current dialect -> versioned dialect.
//!
//! Runs at serialization time. Total over every serializable construct, one
//! match arm per kind; constructs that have not been frozen into a release
//! yet fail with `UnsupportedForSerialization` instead of being dropped. The
//! resulting artifact is stamped with the producer's build version.

use tessera_core::{ConstructKind, Error, Result};

use crate::artifact::Artifact;
use crate::dialect::{Attr, ElementType, Module, Op, Type};
use crate::text;
use crate::versioned::{
    AllGatherV1, AllReduceV1, AnyAttr, AnyType, AxisV1, DevicesV1, ElementTypeV1, FragmentV1,
    IntervalV1, MeshV1, PriorityV1, ReshardV1, ShardV1, ShardingV1, TensorV1, TokenV1, TupleV1,
    VersionedAttr, VersionedOp, VersionedType, CURRENT_VERSION,
};

/// Lower a whole module into a versioned artifact tagged with
/// `CURRENT_VERSION`.
pub fn upgrade_module(module: &Module) -> Result<Artifact> {
    let ops = module
        .ops
        .iter()
        .map(upgrade_op)
        .collect::<Result<Vec<_>>>()?;
    tracing::debug!(
        "upgraded {} ops to versioned dialect at {}",
        ops.len(),
        CURRENT_VERSION
    );
    Ok(Artifact::new(CURRENT_VERSION, ops))
}

pub fn upgrade_op(op: &Op) -> Result<VersionedOp> {
    let versioned = match op {
        Op::Shard {
            input,
            sharding,
            result,
        } => VersionedOp::Shard(ShardV1 {
            input: upgrade_type_carrier(input)?,
            sharding: upgrade_attr_carrier(sharding)?,
            result: upgrade_type_carrier(result)?,
        }),
        Op::Reshard {
            input,
            sharding,
            result,
        } => VersionedOp::Reshard(ReshardV1 {
            input: upgrade_type_carrier(input)?,
            sharding: upgrade_attr_carrier(sharding)?,
            result: upgrade_type_carrier(result)?,
        }),
        Op::AllGather {
            input,
            gather_axes,
            result,
        } => {
            check_axis_names(ConstructKind::Op, AllGatherV1::NAME, gather_axes.iter())?;
            VersionedOp::AllGather(AllGatherV1 {
                input: upgrade_type_carrier(input)?,
                gather_axes: gather_axes.clone(),
                result: upgrade_type_carrier(result)?,
            })
        }
        Op::AllReduce {
            input,
            reduce_axes,
            result,
        } => {
            check_axis_names(ConstructKind::Op, AllReduceV1::NAME, reduce_axes.iter())?;
            VersionedOp::AllReduce(AllReduceV1 {
                input: upgrade_type_carrier(input)?,
                reduce_axes: reduce_axes.clone(),
                result: upgrade_type_carrier(result)?,
            })
        }
        Op::Fragment {
            inputs,
            captures,
            mesh,
            results,
        } => {
            // Operands flatten to one list; the segment record preserves
            // the input/capture split.
            let mut operands = Vec::with_capacity(inputs.len() + captures.len());
            for ty in inputs.iter().chain(captures) {
                operands.push(upgrade_type_carrier(ty)?);
            }
            VersionedOp::Fragment(FragmentV1 {
                operands,
                segment_sizes: vec![inputs.len() as u64, captures.len() as u64],
                mesh: upgrade_attr_carrier(mesh)?,
                results: results
                    .iter()
                    .map(upgrade_type_carrier)
                    .collect::<Result<Vec<_>>>()?,
            })
        }
        Op::CollectivePermute { .. } => {
            tracing::warn!("collective_permute has no versioned counterpart yet");
            return Err(Error::UnsupportedForSerialization {
                kind: ConstructKind::Op,
                name: "collective_permute".to_string(),
            });
        }
    };
    Ok(versioned)
}

pub fn upgrade_attr(attr: &Attr) -> Result<VersionedAttr> {
    let versioned = match attr {
        Attr::Interval { start, end, step } => VersionedAttr::Interval(IntervalV1 {
            start: *start,
            end: *end,
            step: *step,
        }),
        Attr::Devices(ids) => VersionedAttr::Devices(DevicesV1 { ids: ids.clone() }),
        Attr::Axis(axis) => {
            check_axis_names(ConstructKind::Attr, AxisV1::NAME, std::iter::once(&axis.name))?;
            VersionedAttr::Axis(AxisV1 {
                name: axis.name.clone(),
                size: axis.size,
            })
        }
        Attr::Mesh(axes) => {
            check_axis_names(ConstructKind::Attr, MeshV1::NAME, axes.iter().map(|a| &a.name))?;
            VersionedAttr::Mesh(MeshV1 {
                axes: axes
                    .iter()
                    .map(|a| AxisV1 {
                        name: a.name.clone(),
                        size: a.size,
                    })
                    .collect(),
            })
        }
        Attr::Sharding { mesh, dim_axes } => {
            check_axis_names(
                ConstructKind::Attr,
                ShardingV1::NAME,
                dim_axes.iter().flatten(),
            )?;
            VersionedAttr::Sharding(ShardingV1 {
                mesh: upgrade_attr_carrier(mesh)?,
                dim_axes: dim_axes.clone(),
            })
        }
        Attr::Priority(value) => VersionedAttr::Priority(PriorityV1 { value: *value }),
        Attr::Unreduced(_) => {
            tracing::warn!("unreduced has no versioned counterpart yet");
            return Err(Error::UnsupportedForSerialization {
                kind: ConstructKind::Attr,
                name: "unreduced".to_string(),
            });
        }
    };
    Ok(versioned)
}

pub fn upgrade_type(ty: &Type) -> Result<VersionedType> {
    let versioned = match ty {
        Type::Tensor { shape, element } => VersionedType::Tensor(TensorV1 {
            shape: shape.clone(),
            element: upgrade_element(*element),
        }),
        Type::Token => VersionedType::Token(TokenV1),
        Type::Tuple(elements) => VersionedType::Tuple(TupleV1 {
            elements: elements
                .iter()
                .map(upgrade_type_carrier)
                .collect::<Result<Vec<_>>>()?,
        }),
    };
    Ok(versioned)
}

fn upgrade_element(element: ElementType) -> ElementTypeV1 {
    match element {
        ElementType::F32 => ElementTypeV1::F32,
        ElementType::F64 => ElementTypeV1::F64,
        ElementType::I32 => ElementTypeV1::I32,
        ElementType::I64 => ElementTypeV1::I64,
        ElementType::I1 => ElementTypeV1::I1,
    }
}

/// Axis names ride the wire as bare identifier tokens; anything else would
/// print as grammar punctuation and reparse into a different tree.
fn check_axis_names<'a>(
    kind: ConstructKind,
    construct: &str,
    names: impl Iterator<Item = &'a String>,
) -> Result<()> {
    for name in names {
        if !text::is_identifier(name) {
            return Err(Error::MalformedConstruct {
                kind,
                name: construct.to_string(),
                reason: format!("axis name `{}` is not an identifier", name),
            });
        }
    }
    Ok(())
}

fn upgrade_attr_carrier(attr: &Attr) -> Result<AnyAttr> {
    Ok(AnyAttr::new(upgrade_attr(attr)?))
}

fn upgrade_type_carrier(ty: &Type) -> Result<AnyType> {
    Ok(AnyType::new(upgrade_type(ty)?))
}
