//! Receiver side of the binary codec.

use serde_json::Value as Json;
use statecast_pack::PackValue;

use super::pack::{decode_payload, decode_value};
use super::tables::{SchemaTables, Table};
use crate::error::CodecError;
use crate::patch::{join_path, Op, Patch};

/// Rebuilds patches and snapshots from their binary form.
///
/// The decoder holds its own copy of the schema tables and applies schema
/// patches to it as they arrive, so it must see every patch of the stream
/// in order.
#[derive(Debug, Clone, Default)]
pub struct SchemaDecoder {
    tables: SchemaTables,
}

impl SchemaDecoder {
    pub fn new(tables: SchemaTables) -> Self {
        Self { tables }
    }

    /// Bootstraps from a schema snapshot `{ "types": [...], "nodes": [...] }`.
    pub fn from_schema(schema: &Json) -> Result<Self, CodecError> {
        Ok(Self::new(SchemaTables::from_json(schema)?))
    }

    pub fn tables(&self) -> &SchemaTables {
        &self.tables
    }

    /// Decodes one frame. Schema patches update the local tables and are
    /// returned as well.
    pub fn decode_patch(&mut self, data: &[u8]) -> Result<Patch, CodecError> {
        let frame = statecast_pack::decode(data)?
            .into_array()
            .ok_or_else(|| CodecError::Malformed("patch frame must be an array".into()))?;
        let mut frame = frame.into_iter();
        let mut int = |what: &str| {
            frame
                .next()
                .and_then(|v| v.as_i64())
                .ok_or_else(|| CodecError::Malformed(format!("missing {what}")))
        };
        let op = int("opcode")?;
        let target = int("node id")?;
        let position = int("field index")?;
        let values: Vec<PackValue> = frame.collect();

        if op < 0 {
            let (table, op) = Table::from_opcode(op).ok_or(CodecError::InvalidOpcode(op))?;
            let mut path = format!("/_/{}/{target}", table.name());
            if position >= 0 {
                path = format!("{path}/{position}");
            }
            let mut patch = Patch::new(op, path);
            let expected = usize::from(op != Op::Remove);
            check_values(&values, expected, expected)?;
            if let Some(value) = values.into_iter().next() {
                patch.value = value.into_json();
            }
            self.tables.apply(&patch)?;
            return Ok(patch);
        }

        let op = Op::from_code(op).ok_or(CodecError::InvalidOpcode(op))?;
        let id = u64::try_from(target).map_err(|_| CodecError::SchemaMismatch(format!("unknown node {target}")))?;
        let node = self
            .tables
            .node(id)
            .ok_or_else(|| CodecError::SchemaMismatch(format!("unknown node {id}")))?;
        let base = self.tables.node_path(id)?;
        let path = match position {
            -1 => base,
            position => {
                let name = self.tables.field_name(node, position).ok_or_else(|| {
                    CodecError::SchemaMismatch(format!("node {id} has no field {position}"))
                })?;
                join_path(&base, &name)
            }
        };
        let (min, max) = match op {
            Op::Add => (1, 1),
            Op::Replace => (1, 2),
            Op::Remove => (0, 1),
        };
        check_values(&values, min, max)?;
        let mut values = values.into_iter();
        let mut patch = Patch::new(op, path);
        if op != Op::Remove {
            patch.value = self.optional(values.next())?;
        }
        patch.old_value = self.optional(values.next())?;
        Ok(patch)
    }

    fn optional(&self, value: Option<PackValue>) -> Result<Option<Json>, CodecError> {
        match value {
            None | Some(PackValue::Undefined) => Ok(None),
            Some(value) => decode_value(&self.tables, value, 0).map(Some),
        }
    }

    /// Decodes a snapshot produced by
    /// [`SchemaCodec::encode_snapshot`](super::SchemaCodec::encode_snapshot).
    /// `None` if the root was hidden from the viewer.
    pub fn decode_snapshot(&self, data: &[u8]) -> Result<Option<Json>, CodecError> {
        let root = self
            .tables
            .root()
            .ok_or_else(|| CodecError::SchemaMismatch("no root node".into()))?;
        match statecast_pack::decode(data)? {
            PackValue::Undefined => Ok(None),
            payload => decode_payload(&self.tables, root, payload, 0).map(Some),
        }
    }

    /// Path of a node as the decoder knows it.
    pub fn node_path(&self, id: u64) -> Result<String, CodecError> {
        self.tables.node_path(id)
    }
}

fn check_values(values: &[PackValue], min: usize, max: usize) -> Result<(), CodecError> {
    if values.len() > max {
        return Err(CodecError::TrailingValues(values.len() - max));
    }
    if values.len() < min {
        return Err(CodecError::Malformed(format!(
            "expected at least {min} value(s), found {}",
            values.len()
        )));
    }
    Ok(())
}
