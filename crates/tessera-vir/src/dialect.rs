//! The current (rich) Tessera dialect.
//!
//! This is the representation the rest of the toolchain builds and rewrites.
//! It evolves freely between releases; only the upgrade/downgrade converters
//! know how it maps onto the frozen wire dialect. Constructs marked "not yet
//! frozen" exist here but have no versioned counterpart and cannot be
//! serialized yet.

use serde::{Deserialize, Serialize};

/// Scalar element kinds for tensor types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElementType {
    F32,
    F64,
    I32,
    I64,
    I1,
}

/// One named axis of a device mesh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshAxis {
    pub name: String,
    pub size: u64,
}

impl MeshAxis {
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
        }
    }
}

/// Attributes of the current dialect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Attr {
    /// Half-open iteration space `start..end` with a stride.
    Interval { start: i64, end: i64, step: i64 },
    /// A flat set of device ids.
    Devices(Vec<u64>),
    /// A single mesh axis.
    Axis(MeshAxis),
    /// A full device mesh.
    Mesh(Vec<MeshAxis>),
    /// Per-dimension sharding over some mesh-like attribute.
    Sharding {
        mesh: Box<Attr>,
        /// One entry per tensor dimension; `None` means replicated.
        dim_axes: Vec<Option<String>>,
    },
    /// Propagation priority.
    Priority(u64),
    /// Axes along which a value is not yet reduced. Not yet frozen into
    /// the wire schema.
    Unreduced(Vec<String>),
}

impl Attr {
    pub fn interval(start: i64, end: i64, step: i64) -> Self {
        Attr::Interval { start, end, step }
    }

    pub fn devices(ids: impl Into<Vec<u64>>) -> Self {
        Attr::Devices(ids.into())
    }

    pub fn mesh(axes: impl Into<Vec<MeshAxis>>) -> Self {
        Attr::Mesh(axes.into())
    }

    pub fn sharding(mesh: Attr, dim_axes: Vec<Option<String>>) -> Self {
        Attr::Sharding {
            mesh: Box::new(mesh),
            dim_axes,
        }
    }
}

/// Types of the current dialect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Type {
    Tensor {
        shape: Vec<i64>,
        element: ElementType,
    },
    Token,
    Tuple(Vec<Type>),
}

impl Type {
    pub fn tensor(shape: impl Into<Vec<i64>>, element: ElementType) -> Self {
        Type::Tensor {
            shape: shape.into(),
            element,
        }
    }
}

/// Operations of the current dialect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Op {
    /// Attach a sharding to a value.
    Shard {
        input: Type,
        sharding: Attr,
        result: Type,
    },
    /// Re-distribute a value to a new sharding.
    Reshard {
        input: Type,
        sharding: Attr,
        result: Type,
    },
    /// Gather shards along the given mesh axes.
    AllGather {
        input: Type,
        gather_axes: Vec<String>,
        result: Type,
    },
    /// Reduce shards along the given mesh axes.
    AllReduce {
        input: Type,
        reduce_axes: Vec<String>,
        result: Type,
    },
    /// A fragment of computation pinned to a mesh. Operands are explicit
    /// inputs followed by captured values.
    Fragment {
        inputs: Vec<Type>,
        captures: Vec<Type>,
        mesh: Attr,
        results: Vec<Type>,
    },
    /// Pairwise shard exchange. Not yet frozen into the wire schema.
    CollectivePermute {
        source_target: Vec<(u64, u64)>,
        input: Type,
        result: Type,
    },
}

/// A program in the current dialect: an ordered list of ops.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Module {
    pub ops: Vec<Op>,
}

impl Module {
    pub fn new() -> Self {
        Self { ops: Vec::new() }
    }

    pub fn with_ops(ops: Vec<Op>) -> Self {
        Self { ops }
    }

    pub fn add_op(&mut self, op: Op) {
        self.ops.push(op);
    }

    pub fn num_ops(&self) -> usize {
        self.ops.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_construction() {
        let mut module = Module::new();
        assert_eq!(module.num_ops(), 0);

        module.add_op(Op::Shard {
            input: Type::tensor(vec![4], ElementType::F32),
            sharding: Attr::sharding(Attr::devices(vec![0, 1]), vec![Some("x".to_string())]),
            result: Type::tensor(vec![4], ElementType::F32),
        });
        assert_eq!(module.num_ops(), 1);
    }

    #[test]
    fn test_attr_helpers() {
        let mesh = Attr::mesh(vec![MeshAxis::new("x", 2), MeshAxis::new("y", 4)]);
        match &mesh {
            Attr::Mesh(axes) => assert_eq!(axes.len(), 2),
            other => panic!("unexpected attr {:?}", other),
        }
    }
}
