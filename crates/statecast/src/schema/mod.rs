//! Schema-driven binary encoding of patches and snapshots.
//!
//! Types and live containers get integer ids in two tables, Types and
//! Nodes. A data patch then addresses its target as `(nodeId, fieldIndex)`
//! and object values drop their key names. The tables themselves change
//! through patches that travel in the same stream with negative opcodes.

mod codec;
mod decoder;
mod map;
mod pack;
mod tables;

pub use codec::{encode_schema_patch, EncodeHints, SchemaCodec};
pub use decoder::SchemaDecoder;
pub use pack::EXT_NODE;
pub use tables::{
    Row, SchemaNode, SchemaTables, SchemaType, Table, NODE_ARRAY, NODE_MAP, NODE_SET, NO_PARENT,
    OP_NODES_ADD, OP_NODES_REMOVE, OP_NODES_REPLACE, OP_TYPES_ADD, OP_TYPES_REMOVE, OP_TYPES_REPLACE,
};
