//! Error types, one enum per layer.

use statecast_pack::PackError;
use thiserror::Error;

use crate::meta::TypeId;

/// Errors raised by the [`Store`](crate::Store) and the type registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("stale or unknown container handle")]
    StaleHandle,
    #[error("expected {expected} container, found {found}")]
    WrongKind {
        expected: &'static str,
        found: &'static str,
    },
    #[error("unknown type id {0}")]
    UnknownType(TypeId),
    #[error("type `{0}` is already registered")]
    DuplicateType(String),
    #[error("type `{ty}` has no field `{field}`")]
    UnknownField { ty: String, field: String },
    #[error("field `{field}` of `{ty}` expects {expected}")]
    KindMismatch {
        ty: String,
        field: String,
        expected: String,
    },
    #[error("field `{field}` of `{ty}` is computed and cannot be assigned")]
    ComputedField { ty: String, field: String },
    #[error("index {index} out of bounds for length {len}")]
    IndexOutOfBounds { index: usize, len: usize },
    #[error("set members must be primitive values")]
    NotPrimitive,
    /// Owners and tag targets must be objects.
    #[error("owner must be an object")]
    OwnerType,
    #[error("ownership would form a cycle")]
    OwnerCycle,
    #[error("container is still observed")]
    Observed,
}

/// Errors raised by the tracker and the [`StateTree`](crate::StateTree).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrackError {
    /// A container was linked at a second location in the tree.
    #[error(
        "the same container cannot appear twice in the tree, trying to assign it to `{attempted}`, \
         but it already exists at `{existing}`"
    )]
    Structural { attempted: String, existing: String },
    #[error("cannot track root: {0}")]
    RootTracking(String),
    #[error("no root is tracked")]
    NotTracking,
    #[error("the schema codec is not enabled for this tracker")]
    SchemaDisabled,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Errors raised while encoding or decoding binary patches and snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The local schema does not know a node, field or type the input refers
    /// to. The receiver must resynchronize from a fresh schema snapshot.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),
    #[error("patch path `{0}` cannot be resolved against the schema")]
    UnknownPath(String),
    #[error("invalid opcode {0}")]
    InvalidOpcode(i64),
    #[error("malformed frame: {0}")]
    Malformed(String),
    #[error("{0} unhandled value(s) after the patch payload")]
    TrailingValues(usize),
    #[error(transparent)]
    Pack(#[from] PackError),
}
