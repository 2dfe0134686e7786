//! Turns store changes into listener patches.

use std::rc::Rc;

use tracing::trace;

use super::listener::Listener;
use super::{TrackedNode, Tracker};
use crate::error::TrackError;
use crate::patch::{join_path, Op, Patch};
use crate::schema::EncodeHints;
use crate::snapshot::snapshot;
use crate::store::{Change, ContainerKind, Store};
use crate::value::{Handle, Value};

/// What a listener must be able to see for a patch to reach it.
#[derive(Clone, Copy)]
enum Gate<'a> {
    /// Array elements: only the array's own location counts, so positions
    /// stay consistent for every listener.
    Location,
    /// A keyed entry, optionally backed by a private node that must be
    /// visible as well.
    Entry(Option<&'a TrackedNode>),
}

struct Emit<'a> {
    op: Op,
    path: String,
    object: Handle,
    key: &'a str,
    value: Option<&'a Value>,
    old_value: Option<&'a Value>,
    gate: Gate<'a>,
    hints: EncodeHints,
}

impl Tracker {
    /// Applies one store change to the index and dispatches the resulting
    /// patches. Changes on containers outside the tree are ignored.
    pub fn process(&mut self, store: &mut Store, change: Change) -> Result<(), TrackError> {
        if !self.index.contains(change.object()) {
            return Ok(());
        }
        let listeners = self.active_listeners();
        self.event_floor = self.index.issued();
        self.pending_tags.clear();
        match change {
            Change::Add { object, name, value } => self.on_add(store, &listeners, object, &name, &value)?,
            Change::Update {
                object,
                name,
                value,
                old_value,
            } => self.on_update(store, &listeners, object, &name, &value, &old_value)?,
            Change::Delete {
                object,
                name,
                old_value,
            } => self.on_delete(store, &listeners, object, &name, &old_value)?,
            Change::Splice {
                object,
                index,
                removed,
                added,
            } => self.on_splice(store, &listeners, object, index, &removed, &added)?,
        }
        self.release_owners(store);
        let pending = std::mem::take(&mut self.pending_tags);
        self.on_tags_changed(store, pending)?;
        self.finish_event(&listeners)
    }

    /// Flushes deferred schema node deletions after the data patches.
    fn finish_event(&mut self, listeners: &[Rc<Listener>]) -> Result<(), TrackError> {
        if let Some(codec) = self.codec.as_mut() {
            codec.flush_deleted()?;
        }
        self.forward_schema(listeners);
        Ok(())
    }

    /// Returns `(is_computed)` for a declared key, `None` for a key objects
    /// of this type do not declare.
    fn declared(&self, object: Handle, key: &str) -> Option<bool> {
        let node = self.index.get(object)?;
        match node.kind {
            ContainerKind::Object(_) => node.field(key).map(|f| f.is_computed()),
            _ => Some(false),
        }
    }

    fn on_add(
        &mut self,
        store: &mut Store,
        listeners: &[Rc<Listener>],
        object: Handle,
        key: &str,
        value: &Value,
    ) -> Result<(), TrackError> {
        let Some(computed) = self.declared(object, key) else {
            trace!(key, "undeclared key ignored");
            return Ok(());
        };
        let Some((parent_id, kind)) = self.index.get(object).map(|n| (n.id, n.kind)) else {
            return Ok(());
        };
        if kind.is_keyed() {
            if let Some(codec) = self.codec.as_mut() {
                codec.on_map_key(parent_id, key)?;
            }
        }
        if !computed {
            self.observe(store, value, Some(object), key)?;
        }
        self.forward_schema(listeners);

        let entry = value.handle().and_then(|h| self.index.get(h));
        let gate = match kind {
            ContainerKind::Array => Gate::Location,
            _ => Gate::Entry(entry),
        };
        self.emit(
            store,
            listeners,
            Emit {
                op: Op::Add,
                path: join_path(&self.index.path_of(object), key),
                object,
                key,
                value: Some(value),
                old_value: None,
                gate,
                hints: EncodeHints {
                    parent: Some(parent_id),
                    value: entry.map(|n| n.id),
                    old_value: None,
                },
            },
        )
    }

    fn on_update(
        &mut self,
        store: &mut Store,
        listeners: &[Rc<Listener>],
        object: Handle,
        key: &str,
        value: &Value,
        old_value: &Value,
    ) -> Result<(), TrackError> {
        let Some(computed) = self.declared(object, key) else {
            trace!(key, "undeclared key ignored");
            return Ok(());
        };
        let Some((parent_id, kind)) = self.index.get(object).map(|n| (n.id, n.kind)) else {
            return Ok(());
        };
        let removed = match computed {
            true => None,
            false => {
                let removed = self.unobserve(store, old_value, Some(object));
                self.observe(store, value, Some(object), key)?;
                removed
            }
        };
        self.forward_schema(listeners);

        let gate = match kind {
            ContainerKind::Array => Gate::Location,
            _ => Gate::Entry(None),
        };
        self.emit(
            store,
            listeners,
            Emit {
                op: Op::Replace,
                path: join_path(&self.index.path_of(object), key),
                object,
                key,
                value: Some(value),
                old_value: Some(old_value),
                gate,
                hints: EncodeHints {
                    parent: Some(parent_id),
                    value: self.node_id(value),
                    old_value: removed.map(|n| n.id),
                },
            },
        )
    }

    fn on_delete(
        &mut self,
        store: &mut Store,
        listeners: &[Rc<Listener>],
        object: Handle,
        key: &str,
        old_value: &Value,
    ) -> Result<(), TrackError> {
        let Some(computed) = self.declared(object, key) else {
            trace!(key, "undeclared key ignored");
            return Ok(());
        };
        let Some(parent_id) = self.index.get(object).map(|n| n.id) else {
            return Ok(());
        };
        let removed = match computed {
            true => None,
            false => self.unobserve(store, old_value, Some(object)),
        };
        self.forward_schema(listeners);

        self.emit(
            store,
            listeners,
            Emit {
                op: Op::Remove,
                path: join_path(&self.index.path_of(object), key),
                object,
                key,
                value: None,
                old_value: Some(old_value),
                gate: Gate::Entry(removed.as_ref()),
                hints: EncodeHints {
                    parent: Some(parent_id),
                    value: None,
                    old_value: removed.as_ref().map(|n| n.id),
                },
            },
        )
    }

    fn on_splice(
        &mut self,
        store: &mut Store,
        listeners: &[Rc<Listener>],
        object: Handle,
        index: usize,
        removed: &[Value],
        added: &[Value],
    ) -> Result<(), TrackError> {
        let Some(parent_id) = self.index.get(object).map(|n| n.id) else {
            return Ok(());
        };
        let removed_ids: Vec<Option<u64>> = removed
            .iter()
            .map(|v| self.unobserve(store, v, Some(object)).map(|n| n.id))
            .collect();
        for (i, value) in added.iter().enumerate() {
            self.observe(store, value, Some(object), &(index + i).to_string())?;
        }
        self.forward_schema(listeners);

        let base = self.index.path_of(object);
        let at = index.to_string();
        for (old_value, old_id) in removed.iter().zip(removed_ids) {
            self.emit(
                store,
                listeners,
                Emit {
                    op: Op::Remove,
                    path: join_path(&base, &at),
                    object,
                    key: &at,
                    value: None,
                    old_value: Some(old_value),
                    gate: Gate::Location,
                    hints: EncodeHints {
                        parent: Some(parent_id),
                        value: None,
                        old_value: old_id,
                    },
                },
            )?;
        }
        for (i, value) in added.iter().enumerate() {
            let key = (index + i).to_string();
            self.emit(
                store,
                listeners,
                Emit {
                    op: Op::Add,
                    path: join_path(&base, &key),
                    object,
                    key: &key,
                    value: Some(value),
                    old_value: None,
                    gate: Gate::Location,
                    hints: EncodeHints {
                        parent: Some(parent_id),
                        value: self.node_id(value),
                        old_value: None,
                    },
                },
            )?;
        }
        if removed.len() != added.len() {
            self.reindex(store, object, index + added.len())?;
        }
        Ok(())
    }

    /// Renumbers tracked elements from `from` on after their positions
    /// shifted.
    fn reindex(&mut self, store: &Store, array: Handle, from: usize) -> Result<(), TrackError> {
        let elements = store.elements(array)?;
        for (position, element) in elements.iter().enumerate().skip(from) {
            let Some(node) = element.handle().and_then(|h| self.index.get_mut(h)) else {
                continue;
            };
            let segment = position.to_string();
            if node.segment == segment {
                continue;
            }
            node.segment = segment;
            let id = node.id;
            if let Some(codec) = self.codec.as_mut() {
                codec.on_reindex(id, position)?;
            }
        }
        Ok(())
    }

    fn admitted(&self, listener: &Listener, emit: &Emit<'_>) -> bool {
        if !listener.admits(emit.op) {
            return false;
        }
        if listener.spy {
            return true;
        }
        match emit.gate {
            Gate::Location => self.location_visible(listener, emit.object),
            Gate::Entry(entry) => {
                self.field_visible(listener, emit.object, emit.key)
                    && self.location_visible(listener, emit.object)
                    && entry.map_or(true, |node| {
                        !node.private || node.tags.as_ref().is_some_and(|tags| listener.can_see(tags))
                    })
            }
        }
    }

    fn emit(&self, store: &Store, listeners: &[Rc<Listener>], emit: Emit<'_>) -> Result<(), TrackError> {
        for listener in listeners {
            if !self.admitted(listener, &emit) {
                continue;
            }
            let params = listener.params();
            let mut patch = Patch::new(emit.op, emit.path.clone())
                .with_value(emit.value.and_then(|v| snapshot(store, v, params)));
            if listener.reversible && emit.op != Op::Add {
                patch.old_value = emit.old_value.and_then(|v| snapshot(store, v, params));
            }
            self.encode(&mut patch, emit.hints)?;
            listener.dispatch(&patch, Some(emit.object), self.root);
        }
        Ok(())
    }
}
