//! Schema tables held in a tracked tree of their own.
//!
//! Rows live as arrays inside a `Schema` object, so every schema edit comes
//! out of the ordinary tracker as a patch. The patches are buffered by a spy
//! listener and drained with a `/_` prefix.

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::Value as Json;

use super::tables::SchemaNode;
use crate::error::{CodecError, StoreError, TrackError};
use crate::meta::{FieldKind, TypeDef};
use crate::options::{PatchOptions, SnapshotOptions, TrackerOptions};
use crate::patch::Patch;
use crate::tracker::Disposer;
use crate::tree::StateTree;
use crate::value::{Handle, Value};

pub(crate) struct SchemaMap {
    tree: StateTree,
    types: Handle,
    nodes: Handle,
    buffer: Rc<RefCell<Vec<Patch>>>,
    _listener: Disposer,
}

impl SchemaMap {
    pub fn new() -> Result<Self, TrackError> {
        let mut tree = StateTree::new();
        let rows = FieldKind::array_of(FieldKind::array_of(FieldKind::Any));
        let schema = tree.register(TypeDef::new("Schema").field("types", rows.clone()).field("nodes", rows))?;
        let root = tree.create_object(schema)?;
        let types = tree.create_array(Vec::new())?;
        let nodes = tree.create_array(Vec::new())?;
        tree.set_field(root, "types", types)?;
        tree.set_field(root, "nodes", nodes)?;
        tree.track(root, TrackerOptions::default())?;

        let buffer = Rc::new(RefCell::new(Vec::new()));
        let sink = buffer.clone();
        let listener = tree.on_patch(
            move |patch, _, _| sink.borrow_mut().push(patch.clone()),
            PatchOptions::default().spy(),
        )?;
        Ok(Self {
            tree,
            types,
            nodes,
            buffer,
            _listener: listener,
        })
    }

    fn row(&self, index: usize) -> Result<Handle, TrackError> {
        let rows = self.tree.store().elements(self.nodes)?;
        rows.get(index)
            .and_then(Value::handle)
            .ok_or_else(|| {
                StoreError::IndexOutOfBounds {
                    index,
                    len: rows.len(),
                }
                .into()
            })
    }

    pub fn add_type(&mut self, name: &str, props: &[String]) -> Result<(), TrackError> {
        let cells = std::iter::once(name)
            .chain(props.iter().map(String::as_str))
            .map(Value::from)
            .collect();
        let row = self.tree.create_array(cells)?;
        self.tree.push(self.types, row)
    }

    pub fn add_node(&mut self, node: &SchemaNode) -> Result<(), TrackError> {
        let id = i64::try_from(node.id).map_err(|_| CodecError::Malformed(format!("node id {}", node.id)))?;
        let mut cells = vec![
            Value::Int(id),
            Value::Int(node.kind),
            Value::Int(node.parent),
            Value::Int(node.position),
        ];
        cells.extend(node.keys.iter().map(|k| Value::from(k.as_str())));
        let row = self.tree.create_array(cells)?;
        self.tree.push(self.nodes, row)
    }

    pub fn add_node_key(&mut self, row: usize, key: &str) -> Result<(), TrackError> {
        let row = self.row(row)?;
        self.tree.push(row, key)
    }

    pub fn set_node_position(&mut self, row: usize, position: i64) -> Result<(), TrackError> {
        let row = self.row(row)?;
        self.tree.set_index(row, 3, position)
    }

    pub fn delete_node(&mut self, row: usize) -> Result<(), TrackError> {
        let handle = self.row(row)?;
        self.tree.splice(self.nodes, row, 1, Vec::new())?;
        self.tree.remove(handle)
    }

    /// Schema patches produced since the last drain.
    pub fn drain(&mut self) -> Vec<Patch> {
        self.buffer
            .borrow_mut()
            .drain(..)
            .map(|mut patch| {
                patch.path = format!("/_{}", patch.path);
                patch
            })
            .collect()
    }

    /// `{ "types": [...], "nodes": [...] }`
    pub fn snapshot(&self) -> Result<Json, TrackError> {
        Ok(self
            .tree
            .snapshot(&SnapshotOptions::default().spy())?
            .unwrap_or(Json::Null))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::Op;
    use serde_json::json;

    #[test]
    fn edits_come_out_as_prefixed_patches() {
        let mut map = SchemaMap::new().expect("schema map");
        map.add_type("Root", &["a".to_string()]).expect("type");
        map.add_node(&SchemaNode {
            id: 0,
            kind: -2,
            parent: -1,
            position: -1,
            keys: Vec::new(),
        })
        .expect("node");
        let live = map.tree.store().container_count();
        map.add_node_key(0, "k").expect("key");
        map.set_node_position(0, 4).expect("position");

        let patches = map.drain();
        let summary: Vec<(Op, &str)> = patches.iter().map(|p| (p.op, p.path.as_str())).collect();
        assert_eq!(
            summary,
            vec![
                (Op::Add, "/_/types/0"),
                (Op::Add, "/_/nodes/0"),
                (Op::Add, "/_/nodes/0/4"),
                (Op::Replace, "/_/nodes/0/3"),
            ]
        );
        assert_eq!(patches[0].value, Some(json!(["Root", "a"])));
        assert!(map.drain().is_empty());

        map.delete_node(0).expect("delete");
        assert_eq!(map.drain()[0].path, "/_/nodes/0");
        assert_eq!(map.tree.store().container_count(), live - 1);
        assert_eq!(map.snapshot().expect("snapshot"), json!({ "types": [["Root", "a"]], "nodes": [] }));
    }
}
