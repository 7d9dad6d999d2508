//! Immutable descriptors for versioned constructs.
//!
//! A descriptor records a construct's frozen wire shape: its kind, name,
//! version range, ordered field list and shape-affecting traits. Descriptors
//! are built once at registration and never mutated; once a construct has
//! shipped, only the upper bound of its range may move.

use tessera_core::{ConstructKind, VersionRange};

/// The generic field alphabet of the frozen schema.
///
/// Fields never reference rich current-dialect types; nested values are
/// either named versioned constructs or generic `Any` carriers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// A single integer scalar.
    Int,
    /// A variable-length list of integers.
    IntList,
    /// A bare identifier token (e.g. a mesh axis name).
    Ident,
    /// A list of identifiers.
    IdentList,
    /// A list of optional identifiers (`?` marks an absent entry).
    OptIdentList,
    /// A scalar element-type token.
    Element,
    /// A nested construct with a fixed name.
    Construct(ConstructKind, &'static str),
    /// A list of nested constructs with a fixed name.
    ConstructList(ConstructKind, &'static str),
    /// Generic carrier holding any registered attribute.
    AnyAttr,
    /// Generic carrier holding any registered type.
    AnyType,
    /// A list of generic type carriers.
    AnyTypeList,
}

/// One named field slot in a construct's shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
}

impl FieldSpec {
    pub const fn new(name: &'static str, kind: FieldKind) -> Self {
        Self { name, kind }
    }
}

/// Shape-affecting traits a construct may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeTrait {
    /// Variable-length operand list split into groups; the instance must
    /// carry an explicit segment-size side record.
    SegmentedOperands,
}

/// Frozen description of one versioned operation, attribute or type.
#[derive(Debug, Clone, Copy)]
pub struct ConstructDescriptor {
    pub kind: ConstructKind,
    pub name: &'static str,
    pub range: VersionRange,
    pub fields: &'static [FieldSpec],
    pub traits: &'static [ShapeTrait],
}

impl ConstructDescriptor {
    pub const fn new(
        kind: ConstructKind,
        name: &'static str,
        range: VersionRange,
        fields: &'static [FieldSpec],
        traits: &'static [ShapeTrait],
    ) -> Self {
        Self {
            kind,
            name,
            range,
            fields,
            traits,
        }
    }

    /// True if the two descriptors describe the same wire shape.
    ///
    /// The version range is deliberately excluded: re-registering an
    /// identical shape with an overlapping range is legal, a conflicting
    /// shape under the same name is not.
    pub fn same_shape(&self, other: &ConstructDescriptor) -> bool {
        self.kind == other.kind
            && self.name == other.name
            && self.fields == other.fields
            && self.traits == other.traits
    }

    /// True if the construct declares the given trait.
    pub fn has_trait(&self, t: ShapeTrait) -> bool {
        self.traits.contains(&t)
    }
}
