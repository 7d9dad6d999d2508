//! Versioned IR (VIR) compatibility layer for the Tessera dialect.
//!
//! The current dialect evolves freely; the versioned dialect is frozen and
//! append-only. This crate defines both, plus the machinery between them:
//! - Upgrade: current -> versioned, run at serialization time
//! - Downgrade: versioned -> current, run at deserialization time
//! - Compatibility check: every construct in an artifact must be legal at
//!   the negotiated target version before downgrade is attempted

pub mod artifact;
pub mod checker;
pub mod descriptor;
pub mod dialect;
pub mod downgrade;
pub mod registry;
pub mod text;
pub mod upgrade;
pub mod versioned;

pub use artifact::{load, load_with, serialize_module, Artifact};
pub use checker::validate_artifact;
pub use descriptor::{ConstructDescriptor, FieldKind, FieldSpec, ShapeTrait};
pub use dialect::{Attr, ElementType, MeshAxis, Module, Op, Type};
pub use downgrade::downgrade_artifact;
pub use registry::Registry;
pub use upgrade::upgrade_module;
pub use versioned::{
    AnyAttr, AnyType, VersionedAttr, VersionedOp, VersionedType, CURRENT_VERSION,
    MINIMUM_SUPPORTED_VERSION,
};
