//! Types and Nodes tables shared by encoder and decoder.

use serde_json::{json, Value as Json};

use crate::error::CodecError;
use crate::patch::{escape_segment, split_path, Op, Patch};

pub const NODE_ARRAY: i64 = -1;
pub const NODE_MAP: i64 = -2;
pub const NODE_SET: i64 = -3;
/// Parent id and position of the root row.
pub const NO_PARENT: i64 = -1;

/// Schema patch opcodes. Data patches use `0..=2`.
pub const OP_NODES_REMOVE: i64 = -1;
pub const OP_NODES_REPLACE: i64 = -2;
pub const OP_NODES_ADD: i64 = -3;
pub const OP_TYPES_REMOVE: i64 = -4;
pub const OP_TYPES_REPLACE: i64 = -5;
pub const OP_TYPES_ADD: i64 = -6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Types,
    Nodes,
}

impl Table {
    pub fn name(self) -> &'static str {
        match self {
            Table::Types => "types",
            Table::Nodes => "nodes",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "types" => Some(Table::Types),
            "nodes" => Some(Table::Nodes),
            _ => None,
        }
    }

    pub fn opcode(self, op: Op) -> i64 {
        let base = match self {
            Table::Nodes => 0,
            Table::Types => -3,
        };
        base + match op {
            Op::Remove => OP_NODES_REMOVE,
            Op::Replace => OP_NODES_REPLACE,
            Op::Add => OP_NODES_ADD,
        }
    }

    pub fn from_opcode(code: i64) -> Option<(Self, Op)> {
        let (table, code) = match code {
            -3..=-1 => (Table::Nodes, code),
            -6..=-4 => (Table::Types, code + 3),
            _ => return None,
        };
        let op = match code {
            OP_NODES_REMOVE => Op::Remove,
            OP_NODES_REPLACE => Op::Replace,
            _ => Op::Add,
        };
        Some((table, op))
    }
}

/// A row that round-trips through a JSON array.
pub trait Row: Sized {
    fn to_row(&self) -> Vec<Json>;
    fn from_row(row: &[Json]) -> Result<Self, CodecError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaType {
    pub name: String,
    pub props: Vec<String>,
}

impl Row for SchemaType {
    fn to_row(&self) -> Vec<Json> {
        std::iter::once(&self.name)
            .chain(&self.props)
            .map(|s| Json::String(s.clone()))
            .collect()
    }

    fn from_row(row: &[Json]) -> Result<Self, CodecError> {
        let mut strings = row.iter().map(|v| {
            v.as_str()
                .map(str::to_string)
                .ok_or_else(|| CodecError::Malformed(format!("type row entry {v} is not a string")))
        });
        let name = strings
            .next()
            .ok_or_else(|| CodecError::Malformed("empty type row".into()))??;
        Ok(Self {
            name,
            props: strings.collect::<Result<_, _>>()?,
        })
    }
}

/// One live container. `kind` is a type index, or one of [`NODE_ARRAY`],
/// [`NODE_MAP`] and [`NODE_SET`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaNode {
    pub id: u64,
    pub kind: i64,
    pub parent: i64,
    /// Field index, element index or key index in the parent.
    pub position: i64,
    /// Append-only key list of a map or set.
    pub keys: Vec<String>,
}

impl SchemaNode {
    pub fn is_root(&self) -> bool {
        self.parent == NO_PARENT
    }
}

impl Row for SchemaNode {
    fn to_row(&self) -> Vec<Json> {
        let mut row = vec![json!(self.id), json!(self.kind), json!(self.parent), json!(self.position)];
        row.extend(self.keys.iter().map(|k| Json::String(k.clone())));
        row
    }

    fn from_row(row: &[Json]) -> Result<Self, CodecError> {
        let int = |i: usize| {
            row.get(i)
                .and_then(Json::as_i64)
                .ok_or_else(|| CodecError::Malformed(format!("node row column {i} must be an integer")))
        };
        let id = u64::try_from(int(0)?).map_err(|_| CodecError::Malformed("negative node id".into()))?;
        let keys = row
            .iter()
            .skip(4)
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| CodecError::Malformed(format!("node key {v} is not a string")))
            })
            .collect::<Result<_, _>>()?;
        Ok(Self {
            id,
            kind: int(1)?,
            parent: int(2)?,
            position: int(3)?,
            keys,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaTables {
    pub types: Vec<SchemaType>,
    pub nodes: Vec<SchemaNode>,
}

impl SchemaTables {
    pub fn new() -> Self {
        Self::default()
    }

    /// `{ "types": [[name, ...props]], "nodes": [[id, kind, parent, position, ...keys]] }`
    pub fn to_json(&self) -> Json {
        json!({
            "types": self.types.iter().map(Row::to_row).collect::<Vec<_>>(),
            "nodes": self.nodes.iter().map(Row::to_row).collect::<Vec<_>>(),
        })
    }

    pub fn from_json(json: &Json) -> Result<Self, CodecError> {
        fn rows<T: Row>(json: &Json, table: &str) -> Result<Vec<T>, CodecError> {
            let Some(rows) = json.get(table) else {
                return Ok(Vec::new());
            };
            rows.as_array()
                .ok_or_else(|| CodecError::Malformed(format!("`{table}` must be an array")))?
                .iter()
                .map(|row| match row.as_array() {
                    Some(row) => T::from_row(row),
                    None => Err(CodecError::Malformed(format!("`{table}` rows must be arrays"))),
                })
                .collect()
        }
        Ok(Self {
            types: rows(json, "types")?,
            nodes: rows(json, "nodes")?,
        })
    }

    // ── Lookups ─────────────────────────────────────────────────────────

    pub fn type_props(&self, kind: i64) -> Option<&[String]> {
        let index = usize::try_from(kind).ok()?;
        self.types.get(index).map(|t| t.props.as_slice())
    }

    pub fn node(&self, id: u64) -> Option<&SchemaNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn row_of(&self, id: u64) -> Option<usize> {
        self.nodes.iter().position(|n| n.id == id)
    }

    pub fn root(&self) -> Option<&SchemaNode> {
        self.nodes.iter().find(|n| n.is_root())
    }

    /// Position of `segment` inside `node`: field index, element index or
    /// key index.
    pub fn field_index(&self, node: &SchemaNode, segment: &str) -> Option<i64> {
        let position = match node.kind {
            NODE_ARRAY => return segment.parse().ok(),
            NODE_MAP | NODE_SET => node.keys.iter().position(|k| k == segment),
            kind => self.type_props(kind)?.iter().position(|p| p == segment),
        };
        position.and_then(|p| i64::try_from(p).ok())
    }

    /// Inverse of [`field_index`](Self::field_index).
    pub fn field_name(&self, node: &SchemaNode, position: i64) -> Option<String> {
        let index = usize::try_from(position).ok()?;
        match node.kind {
            NODE_ARRAY => Some(index.to_string()),
            NODE_MAP | NODE_SET => node.keys.get(index).cloned(),
            kind => self.type_props(kind)?.get(index).cloned(),
        }
    }

    /// Child of `parent` at `position`. If a removed child is still pending
    /// deletion, the newest node wins.
    pub fn child(&self, parent: u64, position: i64) -> Option<&SchemaNode> {
        let parent = i64::try_from(parent).ok()?;
        self.nodes
            .iter()
            .filter(|n| n.parent == parent && n.position == position)
            .max_by_key(|n| n.id)
    }

    /// JSON Pointer of a node, `""` for the root.
    pub fn node_path(&self, id: u64) -> Result<String, CodecError> {
        let mut segments = Vec::new();
        let mut node = self.node(id).ok_or_else(|| unknown_node(id))?;
        while !node.is_root() {
            let parent_id = u64::try_from(node.parent).map_err(|_| unknown_node(id))?;
            let parent = self.node(parent_id).ok_or_else(|| unknown_node(parent_id))?;
            let segment = self
                .field_name(parent, node.position)
                .ok_or_else(|| CodecError::SchemaMismatch(format!("node {} has no field {}", parent.id, node.position)))?;
            segments.push(segment);
            if segments.len() > self.nodes.len() {
                return Err(CodecError::SchemaMismatch(format!("node {id} has a cyclic parent chain")));
            }
            node = parent;
        }
        Ok(segments
            .iter()
            .rev()
            .map(|s| format!("/{}", escape_segment(s)))
            .collect())
    }

    // ── Schema patches ──────────────────────────────────────────────────

    /// Applies a schema patch addressed as `/_/{types|nodes}/{row}[/{column}]`.
    pub fn apply(&mut self, patch: &Patch) -> Result<(), CodecError> {
        let segments = split_path(&patch.path);
        let (table, row, column) = match segments.as_slice() {
            [root, table, row] if root == "_" => (table, row, None),
            [root, table, row, column] if root == "_" => (table, row, Some(column)),
            _ => return Err(CodecError::UnknownPath(patch.path.clone())),
        };
        let table = Table::from_name(table).ok_or_else(|| CodecError::UnknownPath(patch.path.clone()))?;
        let row: usize = row.parse().map_err(|_| CodecError::UnknownPath(patch.path.clone()))?;
        let column = column
            .map(|c| c.parse::<usize>())
            .transpose()
            .map_err(|_| CodecError::UnknownPath(patch.path.clone()))?;
        match table {
            Table::Types => apply_row(&mut self.types, patch, row, column),
            Table::Nodes => apply_row(&mut self.nodes, patch, row, column),
        }
    }
}

fn unknown_node(id: u64) -> CodecError {
    CodecError::SchemaMismatch(format!("unknown node {id}"))
}

fn insert_at<T>(items: &mut Vec<T>, index: usize, item: T) -> Result<(), CodecError> {
    if index > items.len() {
        return Err(CodecError::Malformed(format!("insert at {index} past length {}", items.len())));
    }
    items.insert(index, item);
    Ok(())
}

fn apply_row<T: Row>(rows: &mut Vec<T>, patch: &Patch, row: usize, column: Option<usize>) -> Result<(), CodecError> {
    let missing_value = || CodecError::Malformed(format!("schema patch at {} has no value", patch.path));
    let missing_row = || CodecError::SchemaMismatch(format!("no schema row at {}", patch.path));
    let Some(column) = column else {
        let parse = || match patch.value.as_ref().and_then(Json::as_array) {
            Some(row) => T::from_row(row),
            None => Err(missing_value()),
        };
        return match patch.op {
            Op::Add => insert_at(rows, row, parse()?),
            Op::Replace => {
                *rows.get_mut(row).ok_or_else(missing_row)? = parse()?;
                Ok(())
            }
            Op::Remove => {
                if row >= rows.len() {
                    return Err(missing_row());
                }
                rows.remove(row);
                Ok(())
            }
        };
    };
    let target = rows.get_mut(row).ok_or_else(missing_row)?;
    let mut cells = target.to_row();
    match patch.op {
        Op::Add => insert_at(&mut cells, column, patch.value.clone().ok_or_else(missing_value)?)?,
        Op::Replace => {
            *cells.get_mut(column).ok_or_else(missing_row)? = patch.value.clone().ok_or_else(missing_value)?;
        }
        Op::Remove => {
            if column >= cells.len() {
                return Err(missing_row());
            }
            cells.remove(column);
        }
    }
    *target = T::from_row(&cells)?;
    Ok(())
}
