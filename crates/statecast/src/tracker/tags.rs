//! Visibility transitions caused by tag and owner changes.

use std::rc::Rc;

use tracing::debug;

use super::listener::Listener;
use super::Tracker;
use crate::error::TrackError;
use crate::patch::{join_path, Op, Patch};
use crate::schema::EncodeHints;
use crate::snapshot::snapshot;
use crate::store::{ContainerKind, Store, TagsChange};
use crate::value::{Handle, Value};

impl Tracker {
    /// Emits the patches that make each listener's view match the new
    /// effective tags. Ancestors are handled before descendants, and a
    /// container already covered by a patch in this pass is not patched
    /// again.
    pub fn on_tags_changed(&mut self, store: &Store, changes: Vec<TagsChange>) -> Result<(), TrackError> {
        self.patched.clear();
        let mut changes: Vec<TagsChange> = changes
            .into_iter()
            .filter(|c| self.index.contains(c.object))
            .collect();
        if changes.is_empty() {
            return Ok(());
        }
        for change in &changes {
            if let Some(node) = self.index.get_mut(change.object) {
                node.tags = Some(change.new.clone());
            }
        }
        changes.sort_by_key(|c| self.index.depth(c.object));
        debug!(objects = changes.len(), "tag pass");

        let listeners = self.active_listeners();
        for change in &changes {
            self.tag_transition(store, &listeners, change)?;
        }
        self.patched.clear();
        Ok(())
    }

    /// True if `h`, a tree ancestor or an owner of `h` was patched for
    /// this listener earlier in the pass.
    fn already_patched(&self, store: &Store, listener: u64, h: Handle) -> bool {
        let Some(patched) = self.patched.get(&listener) else {
            return false;
        };
        self.index.ancestry(h).any(|a| patched.contains(&a))
            || patched.iter().any(|p| store.is_owned_by(h, *p).is_ok_and(|owned| owned))
    }

    fn tag_transition(
        &mut self,
        store: &Store,
        listeners: &[Rc<Listener>],
        change: &TagsChange,
    ) -> Result<(), TrackError> {
        let h = change.object;
        let Some(node) = self.index.get(h) else {
            return Ok(());
        };
        if !node.private && !node.has_hidden_fields() {
            return Ok(());
        }
        let (id, private, parent, via_hidden_field) = (node.id, node.private, node.parent, node.via_hidden_field);
        let hidden_fields: Vec<String> = node
            .fields
            .iter()
            .flat_map(|fields| fields.iter())
            .filter(|f| f.hidden)
            .map(|f| f.key.clone())
            .collect();
        let parent_id = parent.and_then(|p| self.index.get(p)).map(|n| n.id);
        let map_parent = parent
            .and_then(|p| self.index.get(p))
            .is_some_and(|n| n.kind == ContainerKind::Map);
        let path = self.index.path_of(h);

        for listener in listeners {
            if listener.spy || self.already_patched(store, listener.id, h) {
                continue;
            }
            if let Some(parent) = parent {
                if !self.location_visible(listener, parent) {
                    continue;
                }
                if via_hidden_field && !listener.can_see(&self.index.tags_of(parent)) {
                    continue;
                }
            }
            let was = listener.can_see(&change.old);
            let now = listener.can_see(&change.new);
            if was == now {
                continue;
            }
            let op = match now {
                true => Op::Add,
                false => Op::Remove,
            };

            let mut targets = Vec::new();
            if private {
                let op = match map_parent && self.options.private_map_value_patch {
                    true => op,
                    false => Op::Replace,
                };
                let value = Value::Ref(h);
                let patch = self.visibility_patch(store, listener, change, op, path.clone(), &value, now, was);
                self.send(listener, patch, h, parent_id, Some(id))?;
                targets.push(h);
            } else {
                for key in &hidden_fields {
                    let Ok(Some(value)) = store.field(h, key) else {
                        continue;
                    };
                    let patch =
                        self.visibility_patch(store, listener, change, op, join_path(&path, key), value, now, was);
                    let value_id = self.node_id(value);
                    self.send(listener, patch, h, Some(id), value_id)?;
                    targets.extend(value.handle());
                }
            }
            self.patched.entry(listener.id).or_default().extend(targets);
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn visibility_patch(
        &self,
        store: &Store,
        listener: &Listener,
        change: &TagsChange,
        op: Op,
        path: String,
        value: &Value,
        now: bool,
        was: bool,
    ) -> Patch {
        let params = listener.params();
        let mut patch = Patch::new(op, path);
        if now {
            patch.value = snapshot(store, value, params);
        }
        if was && listener.reversible && op != Op::Add {
            patch.old_value = snapshot(store, value, params.with_object_tags(&change.old));
        }
        patch
    }

    fn send(
        &self,
        listener: &Listener,
        mut patch: Patch,
        object: Handle,
        parent: Option<u64>,
        value: Option<u64>,
    ) -> Result<(), TrackError> {
        let hints = EncodeHints {
            parent,
            value: patch.value.as_ref().and(value),
            old_value: patch.old_value.as_ref().and(value),
        };
        self.encode(&mut patch, hints)?;
        listener.dispatch(&patch, Some(object), self.root);
        Ok(())
    }
}
