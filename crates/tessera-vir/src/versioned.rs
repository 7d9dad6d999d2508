//! The frozen, append-only versioned dialect.
//!
//! One struct per published construct. A construct's name carries an explicit
//! version suffix (`interval_v1`); if a shape ever needs an incompatible
//! change, a new suffixed construct is added alongside the old one. Nested
//! values that the frozen schema does not name concretely travel inside the
//! generic `AnyAttr`/`AnyType` carriers, which is what keeps the schema
//! append-only: new alternatives slot in without touching existing shapes.

use serde::{Deserialize, Serialize};
use tessera_core::{ConstructKind, Error, Result, Version, VersionRange};

use crate::descriptor::{ConstructDescriptor, FieldKind, FieldSpec, ShapeTrait};

/// The version this toolchain build stamps on every artifact it produces.
pub const CURRENT_VERSION: Version = Version::new(1, 3, 0);

/// The oldest artifact version this toolchain still accepts.
pub const MINIMUM_SUPPORTED_VERSION: Version = Version::new(1, 0, 0);

const V1_0_0: Version = Version::new(1, 0, 0);
const V1_1_0: Version = Version::new(1, 1, 0);
const V1_2_0: Version = Version::new(1, 2, 0);

/// Generic carrier for an arbitrary versioned attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnyAttr(pub Box<VersionedAttr>);

impl AnyAttr {
    pub fn new(attr: VersionedAttr) -> Self {
        Self(Box::new(attr))
    }

    pub fn get(&self) -> &VersionedAttr {
        &self.0
    }
}

/// Generic carrier for an arbitrary versioned type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnyType(pub Box<VersionedType>);

impl AnyType {
    pub fn new(ty: VersionedType) -> Self {
        Self(Box::new(ty))
    }

    pub fn get(&self) -> &VersionedType {
        &self.0
    }
}

/// An unrecognized construct preserved as raw text.
///
/// Produced by the textual decoder for constructs this toolchain does not
/// know; printing reproduces the text byte-for-byte. Validation and
/// downgrade reject opaque nodes explicitly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpaqueConstruct {
    pub kind: ConstructKind,
    pub name: String,
    pub text: String,
}

// ---------------------------------------------------------------------------
// Attributes
// ---------------------------------------------------------------------------

/// `interval_v1[start:end:step]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalV1 {
    pub start: i64,
    pub end: i64,
    pub step: i64,
}

impl IntervalV1 {
    pub const NAME: &'static str = "interval_v1";
}

/// `devices_v1[id, id, ...]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevicesV1 {
    pub ids: Vec<u64>,
}

impl DevicesV1 {
    pub const NAME: &'static str = "devices_v1";
}

/// `axis_v1<name:size>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisV1 {
    pub name: String,
    pub size: u64,
}

impl AxisV1 {
    pub const NAME: &'static str = "axis_v1";
}

/// `mesh_v1<axis_v1<..>, ...>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshV1 {
    pub axes: Vec<AxisV1>,
}

impl MeshV1 {
    pub const NAME: &'static str = "mesh_v1";
}

/// `sharding_v1<mesh=.., dims=[..]>`
///
/// The mesh slot is a generic carrier: a sharding may reference a full
/// `mesh_v1` or a flat `devices_v1`, and future mesh encodings join without
/// changing this shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardingV1 {
    pub mesh: AnyAttr,
    pub dim_axes: Vec<Option<String>>,
}

impl ShardingV1 {
    pub const NAME: &'static str = "sharding_v1";
}

/// `priority_v1<value>` — introduced in 1.2.0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityV1 {
    pub value: u64,
}

impl PriorityV1 {
    pub const NAME: &'static str = "priority_v1";
}

/// Closed sum of every registered versioned attribute, plus the opaque
/// fallback for constructs from a newer schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum VersionedAttr {
    Interval(IntervalV1),
    Devices(DevicesV1),
    Axis(AxisV1),
    Mesh(MeshV1),
    Sharding(ShardingV1),
    Priority(PriorityV1),
    Opaque(OpaqueConstruct),
}

impl VersionedAttr {
    /// Wire name of the construct.
    pub fn name(&self) -> &str {
        match self {
            VersionedAttr::Interval(_) => IntervalV1::NAME,
            VersionedAttr::Devices(_) => DevicesV1::NAME,
            VersionedAttr::Axis(_) => AxisV1::NAME,
            VersionedAttr::Mesh(_) => MeshV1::NAME,
            VersionedAttr::Sharding(_) => ShardingV1::NAME,
            VersionedAttr::Priority(_) => PriorityV1::NAME,
            VersionedAttr::Opaque(o) => &o.name,
        }
    }
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Scalar element kinds of `tensor_v1`. Frozen alongside the construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElementTypeV1 {
    F32,
    F64,
    I32,
    I64,
    I1,
}

impl ElementTypeV1 {
    /// Wire token for this element kind.
    pub fn token(&self) -> &'static str {
        match self {
            ElementTypeV1::F32 => "f32",
            ElementTypeV1::F64 => "f64",
            ElementTypeV1::I32 => "i32",
            ElementTypeV1::I64 => "i64",
            ElementTypeV1::I1 => "i1",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "f32" => Some(ElementTypeV1::F32),
            "f64" => Some(ElementTypeV1::F64),
            "i32" => Some(ElementTypeV1::I32),
            "i64" => Some(ElementTypeV1::I64),
            "i1" => Some(ElementTypeV1::I1),
            _ => None,
        }
    }
}

/// `tensor_v1<2x4xf32>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorV1 {
    pub shape: Vec<i64>,
    pub element: ElementTypeV1,
}

impl TensorV1 {
    pub const NAME: &'static str = "tensor_v1";
}

/// `token_v1` — introduced in 1.1.0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenV1;

impl TokenV1 {
    pub const NAME: &'static str = "token_v1";
}

/// `tuple_v1<type, ...>` — elements travel in generic carriers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TupleV1 {
    pub elements: Vec<AnyType>,
}

impl TupleV1 {
    pub const NAME: &'static str = "tuple_v1";
}

/// Closed sum of every registered versioned type, plus the opaque fallback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum VersionedType {
    Tensor(TensorV1),
    Token(TokenV1),
    Tuple(TupleV1),
    Opaque(OpaqueConstruct),
}

impl VersionedType {
    pub fn name(&self) -> &str {
        match self {
            VersionedType::Tensor(_) => TensorV1::NAME,
            VersionedType::Token(_) => TokenV1::NAME,
            VersionedType::Tuple(_) => TupleV1::NAME,
            VersionedType::Opaque(o) => &o.name,
        }
    }
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// `shard_v1(input, sharding=..) -> result`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardV1 {
    pub input: AnyType,
    pub sharding: AnyAttr,
    pub result: AnyType,
}

impl ShardV1 {
    pub const NAME: &'static str = "shard_v1";
}

/// `reshard_v1(input, sharding=..) -> result`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReshardV1 {
    pub input: AnyType,
    pub sharding: AnyAttr,
    pub result: AnyType,
}

impl ReshardV1 {
    pub const NAME: &'static str = "reshard_v1";
}

/// `all_gather_v1(input, axes=[..]) -> result` — introduced in 1.1.0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllGatherV1 {
    pub input: AnyType,
    pub gather_axes: Vec<String>,
    pub result: AnyType,
}

impl AllGatherV1 {
    pub const NAME: &'static str = "all_gather_v1";
}

/// `all_reduce_v1(input, axes=[..]) -> result` — introduced in 1.2.0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllReduceV1 {
    pub input: AnyType,
    pub reduce_axes: Vec<String>,
    pub result: AnyType,
}

impl AllReduceV1 {
    pub const NAME: &'static str = "all_reduce_v1";
}

/// `fragment_v1(operands=[..], sizes=[..], mesh=..) -> [..]`
///
/// Operands are a single flat list split into two groups (explicit inputs,
/// captured values); `segment_sizes` is the mandatory side record declaring
/// the split. The record must have exactly two entries summing to the
/// operand count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FragmentV1 {
    pub operands: Vec<AnyType>,
    pub segment_sizes: Vec<u64>,
    pub mesh: AnyAttr,
    pub results: Vec<AnyType>,
}

impl FragmentV1 {
    pub const NAME: &'static str = "fragment_v1";

    /// Number of operand groups the side record must describe.
    pub const NUM_SEGMENTS: usize = 2;

    /// Reject a segment record that does not partition the operand list
    /// into exactly [`Self::NUM_SEGMENTS`] groups.
    pub fn check_segments(&self) -> Result<()> {
        let total: u64 = self.segment_sizes.iter().sum();
        if self.segment_sizes.len() != Self::NUM_SEGMENTS || total != self.operands.len() as u64 {
            return Err(Error::MalformedConstruct {
                kind: ConstructKind::Op,
                name: Self::NAME.to_string(),
                reason: format!(
                    "segment sizes {:?} do not describe {} operands",
                    self.segment_sizes,
                    self.operands.len()
                ),
            });
        }
        Ok(())
    }
}

/// `broadcast_v1(input) -> result` — supported in [1.0.0, 1.2.0] only.
///
/// The current dialect no longer has a broadcast op; this shape remains in
/// the schema so old artifacts fail with a named diagnostic instead of a
/// parse error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastV1 {
    pub input: AnyType,
    pub result: AnyType,
}

impl BroadcastV1 {
    pub const NAME: &'static str = "broadcast_v1";
}

/// Closed sum of every registered versioned operation, plus the opaque
/// fallback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum VersionedOp {
    Shard(ShardV1),
    Reshard(ReshardV1),
    AllGather(AllGatherV1),
    AllReduce(AllReduceV1),
    Fragment(FragmentV1),
    Broadcast(BroadcastV1),
    Opaque(OpaqueConstruct),
}

impl VersionedOp {
    pub fn name(&self) -> &str {
        match self {
            VersionedOp::Shard(_) => ShardV1::NAME,
            VersionedOp::Reshard(_) => ReshardV1::NAME,
            VersionedOp::AllGather(_) => AllGatherV1::NAME,
            VersionedOp::AllReduce(_) => AllReduceV1::NAME,
            VersionedOp::Fragment(_) => FragmentV1::NAME,
            VersionedOp::Broadcast(_) => BroadcastV1::NAME,
            VersionedOp::Opaque(o) => &o.name,
        }
    }
}

// ---------------------------------------------------------------------------
// Manifest
// ---------------------------------------------------------------------------

const INTERVAL_FIELDS: &[FieldSpec] = &[
    FieldSpec::new("start", FieldKind::Int),
    FieldSpec::new("end", FieldKind::Int),
    FieldSpec::new("step", FieldKind::Int),
];

const DEVICES_FIELDS: &[FieldSpec] = &[FieldSpec::new("ids", FieldKind::IntList)];

const AXIS_FIELDS: &[FieldSpec] = &[
    FieldSpec::new("name", FieldKind::Ident),
    FieldSpec::new("size", FieldKind::Int),
];

const MESH_FIELDS: &[FieldSpec] = &[FieldSpec::new(
    "axes",
    FieldKind::ConstructList(ConstructKind::Attr, AxisV1::NAME),
)];

const SHARDING_FIELDS: &[FieldSpec] = &[
    FieldSpec::new("mesh", FieldKind::AnyAttr),
    FieldSpec::new("dims", FieldKind::OptIdentList),
];

const PRIORITY_FIELDS: &[FieldSpec] = &[FieldSpec::new("value", FieldKind::Int)];

const TENSOR_FIELDS: &[FieldSpec] = &[
    FieldSpec::new("shape", FieldKind::IntList),
    FieldSpec::new("element", FieldKind::Element),
];

const TUPLE_FIELDS: &[FieldSpec] = &[FieldSpec::new("elements", FieldKind::AnyTypeList)];

const SHARD_FIELDS: &[FieldSpec] = &[
    FieldSpec::new("input", FieldKind::AnyType),
    FieldSpec::new("sharding", FieldKind::AnyAttr),
    FieldSpec::new("result", FieldKind::AnyType),
];

const ALL_GATHER_FIELDS: &[FieldSpec] = &[
    FieldSpec::new("input", FieldKind::AnyType),
    FieldSpec::new("axes", FieldKind::IdentList),
    FieldSpec::new("result", FieldKind::AnyType),
];

const FRAGMENT_FIELDS: &[FieldSpec] = &[
    FieldSpec::new("operands", FieldKind::AnyTypeList),
    FieldSpec::new("sizes", FieldKind::IntList),
    FieldSpec::new("mesh", FieldKind::AnyAttr),
    FieldSpec::new("results", FieldKind::AnyTypeList),
];

const BROADCAST_FIELDS: &[FieldSpec] = &[
    FieldSpec::new("input", FieldKind::AnyType),
    FieldSpec::new("result", FieldKind::AnyType),
];

/// Every construct this toolchain build knows, with its version window.
///
/// Registered once at startup; append-only across releases. History:
/// 1.1.0 added `token_v1` and `all_gather_v1`; 1.2.0 added `priority_v1`
/// and `all_reduce_v1` and was the last release supporting `broadcast_v1`.
pub fn manifest() -> Vec<ConstructDescriptor> {
    use ConstructKind::{Attr, Op, Type};

    vec![
        // Attributes
        ConstructDescriptor::new(
            Attr,
            IntervalV1::NAME,
            VersionRange::since(V1_0_0),
            INTERVAL_FIELDS,
            &[],
        ),
        ConstructDescriptor::new(
            Attr,
            DevicesV1::NAME,
            VersionRange::since(V1_0_0),
            DEVICES_FIELDS,
            &[],
        ),
        ConstructDescriptor::new(
            Attr,
            AxisV1::NAME,
            VersionRange::since(V1_0_0),
            AXIS_FIELDS,
            &[],
        ),
        ConstructDescriptor::new(
            Attr,
            MeshV1::NAME,
            VersionRange::since(V1_0_0),
            MESH_FIELDS,
            &[],
        ),
        ConstructDescriptor::new(
            Attr,
            ShardingV1::NAME,
            VersionRange::since(V1_0_0),
            SHARDING_FIELDS,
            &[],
        ),
        ConstructDescriptor::new(
            Attr,
            PriorityV1::NAME,
            VersionRange::since(V1_2_0),
            PRIORITY_FIELDS,
            &[],
        ),
        // Types
        ConstructDescriptor::new(
            Type,
            TensorV1::NAME,
            VersionRange::since(V1_0_0),
            TENSOR_FIELDS,
            &[],
        ),
        ConstructDescriptor::new(Type, TokenV1::NAME, VersionRange::since(V1_1_0), &[], &[]),
        ConstructDescriptor::new(
            Type,
            TupleV1::NAME,
            VersionRange::since(V1_0_0),
            TUPLE_FIELDS,
            &[],
        ),
        // Operations
        ConstructDescriptor::new(
            Op,
            ShardV1::NAME,
            VersionRange::since(V1_0_0),
            SHARD_FIELDS,
            &[],
        ),
        ConstructDescriptor::new(
            Op,
            ReshardV1::NAME,
            VersionRange::since(V1_0_0),
            SHARD_FIELDS,
            &[],
        ),
        ConstructDescriptor::new(
            Op,
            AllGatherV1::NAME,
            VersionRange::since(V1_1_0),
            ALL_GATHER_FIELDS,
            &[],
        ),
        ConstructDescriptor::new(
            Op,
            AllReduceV1::NAME,
            VersionRange::since(V1_2_0),
            ALL_GATHER_FIELDS,
            &[],
        ),
        ConstructDescriptor::new(
            Op,
            FragmentV1::NAME,
            VersionRange::since(V1_0_0),
            FRAGMENT_FIELDS,
            &[ShapeTrait::SegmentedOperands],
        ),
        ConstructDescriptor::new(
            Op,
            BroadcastV1::NAME,
            VersionRange::between(V1_0_0, V1_2_0),
            BROADCAST_FIELDS,
            &[],
        ),
    ]
}
