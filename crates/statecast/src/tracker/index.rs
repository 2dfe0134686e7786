//! Shadow index of the observed tree.

use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;

use crate::meta::FieldDescriptor;
use crate::patch::join_path;
use crate::store::{ContainerKind, Subscription};
use crate::value::Handle;

/// Bookkeeping for one observed container.
#[derive(Debug)]
pub struct TrackedNode {
    pub id: u64,
    /// `None` only for the root.
    pub parent: Option<Handle>,
    /// Key or index under which the parent holds this node.
    pub segment: String,
    pub kind: ContainerKind,
    /// Declared fields, for object nodes.
    pub fields: Option<Rc<[FieldDescriptor]>>,
    /// The node's own type is private.
    pub private: bool,
    /// The parent links this node through a private field.
    pub via_hidden_field: bool,
    /// Private by type, by link or by inheritance from the parent.
    pub hidden: bool,
    /// Effective tags of an object node.
    pub tags: Option<BTreeSet<String>>,
    /// The root became this object's owner when it entered the tree.
    pub implicit_owner: bool,
    pub(crate) subscription: Option<Subscription>,
}

impl TrackedNode {
    pub fn field(&self, key: &str) -> Option<&FieldDescriptor> {
        self.fields.as_ref()?.iter().find(|f| f.key == key)
    }

    pub fn field_hidden(&self, key: &str) -> bool {
        self.field(key).is_some_and(|f| f.hidden)
    }

    pub fn has_hidden_fields(&self) -> bool {
        self.fields.as_ref().is_some_and(|fields| fields.iter().any(|f| f.hidden))
    }

    pub fn is_object(&self) -> bool {
        matches!(self.kind, ContainerKind::Object(_))
    }
}

#[derive(Debug, Default)]
pub(crate) struct NodeIndex {
    nodes: HashMap<Handle, TrackedNode>,
    last_id: u64,
}

impl NodeIndex {
    /// Next node id. Ids are never handed out twice.
    pub fn next_id(&mut self) -> u64 {
        let id = self.last_id;
        self.last_id += 1;
        id
    }

    /// Ids below this one have been handed out.
    pub fn issued(&self) -> u64 {
        self.last_id
    }

    pub fn get(&self, h: Handle) -> Option<&TrackedNode> {
        self.nodes.get(&h)
    }

    pub fn get_mut(&mut self, h: Handle) -> Option<&mut TrackedNode> {
        self.nodes.get_mut(&h)
    }

    pub fn contains(&self, h: Handle) -> bool {
        self.nodes.contains_key(&h)
    }

    pub fn insert(&mut self, h: Handle, node: TrackedNode) {
        self.nodes.insert(h, node);
    }

    pub fn remove(&mut self, h: Handle) -> Option<TrackedNode> {
        self.nodes.remove(&h)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// JSON Pointer of a node, `""` for the root.
    pub fn path_of(&self, h: Handle) -> String {
        let mut segments = Vec::new();
        let mut current = self.nodes.get(&h);
        while let Some(node) = current {
            let Some(parent) = node.parent else { break };
            segments.push(node.segment.as_str());
            current = self.nodes.get(&parent);
        }
        segments
            .into_iter()
            .rev()
            .fold(String::new(), |path, segment| join_path(&path, segment))
    }

    /// Pointer of `segment` under `parent`, or of the root when there is no
    /// parent.
    pub fn child_path(&self, parent: Option<Handle>, segment: &str) -> String {
        match parent {
            Some(parent) => join_path(&self.path_of(parent), segment),
            None => String::new(),
        }
    }

    pub fn depth(&self, h: Handle) -> usize {
        let mut depth = 0;
        let mut current = self.nodes.get(&h).and_then(|n| n.parent);
        while let Some(parent) = current {
            depth += 1;
            current = self.nodes.get(&parent).and_then(|n| n.parent);
        }
        depth
    }

    /// Tags governing `h`: its own for objects, otherwise those of the
    /// nearest object ancestor.
    pub fn tags_of(&self, h: Handle) -> BTreeSet<String> {
        let mut current = self.nodes.get(&h);
        while let Some(node) = current {
            if let Some(tags) = &node.tags {
                return tags.clone();
            }
            current = node.parent.and_then(|p| self.nodes.get(&p));
        }
        BTreeSet::new()
    }

    /// `h` followed by its tree ancestors up to the root.
    pub fn ancestry(&self, h: Handle) -> impl Iterator<Item = Handle> + '_ {
        std::iter::successors(Some(h), move |h| self.nodes.get(h).and_then(|n| n.parent))
    }
}
