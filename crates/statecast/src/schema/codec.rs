//! Sender side of the binary codec.

use std::mem;

use serde_json::Value as Json;
use statecast_pack::PackValue;
use tracing::trace;

use super::map::SchemaMap;
use super::pack::{encode_value, payload};
use super::tables::{SchemaNode, SchemaTables, Table, NODE_ARRAY, NODE_MAP, NODE_SET, NO_PARENT};
use crate::error::{CodecError, TrackError};
use crate::meta::{TypeDescriptor, TypeRegistry};
use crate::patch::{split_path, Op, Patch};
use crate::store::ContainerKind;

/// Node ids known to the tracker when it encodes a patch, so the encoder
/// does not have to resolve them from the path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncodeHints {
    /// Container holding the changed key.
    pub parent: Option<u64>,
    /// Node backing the new value.
    pub value: Option<u64>,
    /// Node that backed the old value.
    pub old_value: Option<u64>,
}

/// Keeps the schema in step with the tracker and encodes patches against
/// it.
///
/// Every schema edit is applied to the [`SchemaMap`] first; the patches it
/// yields are applied to a mirror [`SchemaTables`], encoded and queued for
/// the listeners. The mirror therefore always equals what a decoder holds
/// after consuming the queued patches.
pub struct SchemaCodec {
    map: SchemaMap,
    tables: SchemaTables,
    pending: Vec<Patch>,
    deleted: Vec<u64>,
}

impl SchemaCodec {
    /// Creates a codec whose Types table lists every type in `registry`.
    pub fn new(registry: &TypeRegistry) -> Result<Self, TrackError> {
        let mut codec = Self {
            map: SchemaMap::new()?,
            tables: SchemaTables::new(),
            pending: Vec::new(),
            deleted: Vec::new(),
        };
        for desc in registry.iter() {
            codec.on_register_type(desc)?;
        }
        Ok(codec)
    }

    pub fn tables(&self) -> &SchemaTables {
        &self.tables
    }

    /// Schema snapshot for bootstrapping a decoder.
    pub fn schema_snapshot(&self) -> Result<Json, TrackError> {
        self.map.snapshot()
    }

    fn sync(&mut self) -> Result<(), TrackError> {
        for mut patch in self.map.drain() {
            self.tables.apply(&patch)?;
            patch.encoded = Some(encode_schema_patch(&patch)?);
            self.pending.push(patch);
        }
        Ok(())
    }

    /// Schema patches produced since the last call, encoded.
    pub fn take_schema_patches(&mut self) -> Vec<Patch> {
        mem::take(&mut self.pending)
    }

    // ── Tracker hooks ───────────────────────────────────────────────────

    pub fn on_register_type(&mut self, desc: &TypeDescriptor) -> Result<(), TrackError> {
        if self.tables.types.len() > desc.id {
            return Ok(());
        }
        let props: Vec<String> = desc.field_keys().map(str::to_string).collect();
        self.map.add_type(&desc.name, &props)?;
        self.sync()
    }

    pub fn on_create_node(
        &mut self,
        id: u64,
        kind: ContainerKind,
        parent: Option<u64>,
        segment: &str,
        keys: Vec<String>,
    ) -> Result<(), TrackError> {
        let position = match parent {
            Some(parent) => {
                let parent_node = self
                    .tables
                    .node(parent)
                    .ok_or_else(|| CodecError::SchemaMismatch(format!("unknown node {parent}")))?;
                self.tables
                    .field_index(parent_node, segment)
                    .ok_or_else(|| CodecError::UnknownPath(segment.to_string()))?
            }
            None => NO_PARENT,
        };
        let parent = match parent {
            Some(parent) => i64::try_from(parent).map_err(|_| CodecError::Malformed(format!("node id {parent}")))?,
            None => NO_PARENT,
        };
        let kind = match kind {
            ContainerKind::Object(ty) => {
                i64::try_from(ty).map_err(|_| CodecError::Malformed(format!("type id {ty}")))?
            }
            ContainerKind::Array => NODE_ARRAY,
            ContainerKind::Map => NODE_MAP,
            ContainerKind::Set => NODE_SET,
        };
        trace!(node = id, kind, parent, position, "schema node");
        self.map.add_node(&SchemaNode {
            id,
            kind,
            parent,
            position,
            keys,
        })?;
        self.sync()
    }

    /// Appends `key` to a map or set node unless it is already listed.
    pub fn on_map_key(&mut self, node: u64, key: &str) -> Result<(), TrackError> {
        let row = self.row(node)?;
        if self.tables.nodes[row].keys.iter().any(|k| k == key) {
            return Ok(());
        }
        self.map.add_node_key(row, key)?;
        self.sync()
    }

    pub fn on_reindex(&mut self, node: u64, position: usize) -> Result<(), TrackError> {
        let row = self.row(node)?;
        let position = i64::try_from(position).map_err(|_| CodecError::Malformed(format!("position {position}")))?;
        if self.tables.nodes[row].position == position {
            return Ok(());
        }
        self.map.set_node_position(row, position)?;
        self.sync()
    }

    /// Queues a node row for deletion at the end of the current event.
    pub fn on_delete_node(&mut self, node: u64) {
        self.deleted.push(node);
    }

    pub fn flush_deleted(&mut self) -> Result<(), TrackError> {
        for node in mem::take(&mut self.deleted) {
            if let Some(row) = self.tables.row_of(node) {
                self.map.delete_node(row)?;
                self.sync()?;
            }
        }
        Ok(())
    }

    fn row(&self, node: u64) -> Result<usize, CodecError> {
        self.tables
            .row_of(node)
            .ok_or_else(|| CodecError::SchemaMismatch(format!("unknown node {node}")))
    }

    // ── Encoding ────────────────────────────────────────────────────────

    /// Encodes a data patch as `[op, nodeId, fieldIndex, value?, oldValue?]`.
    pub fn encode_patch(&self, patch: &Patch, hints: EncodeHints) -> Result<Vec<u8>, CodecError> {
        let (node, position) = self.resolve(patch, hints.parent)?;
        let child = |hint: Option<u64>| match hint {
            Some(id) => self.tables.node(id),
            None => self.tables.child(node.id, position),
        };
        let id = i64::try_from(node.id).map_err(|_| CodecError::Malformed(format!("node id {}", node.id)))?;
        let mut frame = vec![
            PackValue::Integer(patch.op.code()),
            PackValue::Integer(id),
            PackValue::Integer(position),
        ];
        if patch.op != Op::Remove {
            frame.push(match &patch.value {
                Some(value) => encode_value(&self.tables, child(hints.value), value)?,
                None => PackValue::Undefined,
            });
        }
        if patch.op != Op::Add {
            if let Some(old_value) = &patch.old_value {
                frame.push(encode_value(&self.tables, child(hints.old_value), old_value)?);
            }
        }
        Ok(statecast_pack::encode(&PackValue::Array(frame)))
    }

    /// Node holding the last path segment, and the segment's position in
    /// it. The root itself resolves to position `-1`.
    fn resolve(&self, patch: &Patch, parent: Option<u64>) -> Result<(&SchemaNode, i64), CodecError> {
        let unknown = || CodecError::UnknownPath(patch.path.clone());
        let segments = split_path(&patch.path);
        let Some((last, walk)) = segments.split_last() else {
            return Ok((self.tables.root().ok_or_else(unknown)?, NO_PARENT));
        };
        let node = match parent {
            Some(id) => self.tables.node(id).ok_or_else(unknown)?,
            None => {
                let mut node = self.tables.root().ok_or_else(unknown)?;
                for segment in walk {
                    let position = self.tables.field_index(node, segment).ok_or_else(unknown)?;
                    node = self.tables.child(node.id, position).ok_or_else(unknown)?;
                }
                node
            }
        };
        let position = self.tables.field_index(node, last).ok_or_else(unknown)?;
        Ok((node, position))
    }

    /// Encodes a root snapshot as the root node's payload. A root hidden
    /// from the viewer encodes as `undefined`.
    pub fn encode_snapshot(&self, snapshot: Option<&Json>) -> Result<Vec<u8>, CodecError> {
        let Some(snapshot) = snapshot else {
            return Ok(statecast_pack::encode(&PackValue::Undefined));
        };
        let root = self
            .tables
            .root()
            .ok_or_else(|| CodecError::SchemaMismatch("no root node".into()))?;
        Ok(statecast_pack::encode(&payload(&self.tables, root, snapshot)?))
    }
}

/// Encodes a schema patch as `[op, row, column, value?]`, with column `-1`
/// for whole-row patches.
pub fn encode_schema_patch(patch: &Patch) -> Result<Vec<u8>, CodecError> {
    let unknown = || CodecError::UnknownPath(patch.path.clone());
    let segments = split_path(&patch.path);
    let (table, row, column) = match segments.as_slice() {
        [_, table, row] => (table, row, None),
        [_, table, row, column] => (table, row, Some(column)),
        _ => return Err(unknown()),
    };
    let table = Table::from_name(table).ok_or_else(unknown)?;
    let row: i64 = row.parse().map_err(|_| unknown())?;
    let column: i64 = match column {
        Some(column) => column.parse().map_err(|_| unknown())?,
        None => -1,
    };
    let mut frame = vec![
        PackValue::Integer(table.opcode(patch.op)),
        PackValue::Integer(row),
        PackValue::Integer(column),
    ];
    if patch.op != Op::Remove {
        frame.push(PackValue::from_json_opt(patch.value.as_ref()));
    }
    Ok(statecast_pack::encode(&PackValue::Array(frame)))
}
