//! Tree observation engine.
//!
//! A [`Tracker`] walks the tree below its root, subscribes to every
//! container it finds and keeps a [`TrackedNode`] per container. Store
//! changes handed to [`Tracker::process`] are turned into patches, filtered
//! per listener by tag visibility and, with the schema codec enabled,
//! encoded to binary before dispatch.

mod index;
mod listener;
mod process;
mod tags;

use std::collections::HashMap;
use std::rc::Rc;

use serde_json::Value as Json;
use tracing::{debug, trace};

pub use index::TrackedNode;
pub use listener::{Disposer, PatchHandler};

use crate::error::{StoreError, TrackError};
use crate::meta::TypeId;
use crate::options::{PatchOptions, SnapshotOptions, TrackerOptions};
use crate::patch::{join_path, Patch};
use crate::schema::{EncodeHints, SchemaCodec};
use crate::snapshot::{snapshot, SnapshotParams};
use crate::store::{ContainerKind, Store, TagsChange};
use crate::value::{Handle, Value};
use index::NodeIndex;
use listener::Listener;

pub struct Tracker {
    root: Handle,
    index: NodeIndex,
    listeners: Vec<Rc<Listener>>,
    next_listener_id: u64,
    options: TrackerOptions,
    codec: Option<Box<SchemaCodec>>,
    /// Containers already patched per listener in the current tag pass.
    patched: HashMap<u64, Vec<Handle>>,
    /// Nodes with lower ids were tracked before the current event.
    event_floor: u64,
    /// Owner changes on already tracked objects, replayed as a tag pass
    /// once the event's data patches are out.
    pending_tags: Vec<TagsChange>,
    /// Objects that left the tree while owned by the root implicitly.
    released: Vec<Handle>,
}

impl Tracker {
    /// Starts tracking the tree below `root`.
    ///
    /// The root must be an object without an owner. Every object found
    /// below it that has no owner yet is owned by the root.
    pub fn new(store: &mut Store, root: Handle, options: TrackerOptions) -> Result<Self, TrackError> {
        match store.kind(root)? {
            ContainerKind::Object(_) => {}
            other => {
                return Err(TrackError::RootTracking(format!(
                    "root must be an object, found {}",
                    other.name()
                )))
            }
        }
        if store.owner(root)?.is_some() {
            return Err(TrackError::RootTracking("root already has an owner".into()));
        }
        let codec = match options.schema {
            true => Some(Box::new(SchemaCodec::new(store.registry())?)),
            false => None,
        };
        let mut tracker = Self {
            root,
            index: NodeIndex::default(),
            listeners: Vec::new(),
            next_listener_id: 1,
            options,
            codec,
            patched: HashMap::new(),
            event_floor: 0,
            pending_tags: Vec::new(),
            released: Vec::new(),
        };
        tracker.check_subtree(store, &Value::Ref(root), String::new(), &[], &mut HashMap::new())?;
        tracker.observe(store, &Value::Ref(root), None, "")?;
        if let Some(codec) = tracker.codec.as_mut() {
            // Nobody is listening yet; late joiners start from a schema snapshot.
            codec.take_schema_patches();
        }
        debug!(nodes = tracker.index.len(), schema = tracker.options.schema, "tracking root");
        Ok(tracker)
    }

    pub fn root(&self) -> Handle {
        self.root
    }

    pub fn options(&self) -> &TrackerOptions {
        &self.options
    }

    pub fn node(&self, h: Handle) -> Option<&TrackedNode> {
        self.index.get(h)
    }

    pub fn is_tracked(&self, h: Handle) -> bool {
        self.index.contains(h)
    }

    pub fn node_count(&self) -> usize {
        self.index.len()
    }

    /// JSON Pointer of a tracked container.
    pub fn path_of(&self, h: Handle) -> Option<String> {
        self.index.contains(h).then(|| self.index.path_of(h))
    }

    pub fn codec(&self) -> Option<&SchemaCodec> {
        self.codec.as_deref()
    }

    pub fn snapshot(&self, store: &Store, options: &SnapshotOptions) -> Option<Json> {
        let params = SnapshotParams {
            tags: &options.tags,
            spy: options.spy,
            object_tags: None,
        };
        snapshot(store, &Value::Ref(self.root), params)
    }

    // ── Listeners ───────────────────────────────────────────────────────

    pub fn on_patch<F>(&mut self, handler: F, options: PatchOptions) -> Disposer
    where
        F: FnMut(&Patch, Option<Handle>, Handle) + 'static,
    {
        let id = self.next_listener_id;
        self.next_listener_id = self.next_listener_id.saturating_add(1);
        let reversible = options.reversible.unwrap_or(self.options.reversible);
        let (listener, disposer) = Listener::new(
            id,
            Box::new(handler),
            options.tags,
            options.filter,
            reversible,
            options.spy,
        );
        debug!(listener = id, spy = options.spy, reversible, "listener registered");
        self.listeners.push(Rc::new(listener));
        disposer
    }

    /// Listeners for one event, in registration order. Disposed ones are
    /// dropped here, so a disposal during dispatch applies from the next
    /// event on.
    fn active_listeners(&mut self) -> Vec<Rc<Listener>> {
        self.listeners.retain(|l| l.is_active());
        self.listeners.clone()
    }

    /// Releases every subscription and deactivates all listeners.
    pub fn dispose(mut self, store: &mut Store) {
        self.unobserve(store, &Value::Ref(self.root), None);
        self.release_owners(store);
        for listener in &self.listeners {
            listener.deactivate();
        }
        debug!("tracker disposed");
    }

    // ── Types ───────────────────────────────────────────────────────────

    /// Announces a type registered after tracking started.
    pub fn register_type(&mut self, store: &Store, ty: TypeId) -> Result<(), TrackError> {
        let Some(codec) = self.codec.as_mut() else {
            return Ok(());
        };
        let desc = store.registry().get(ty).ok_or(StoreError::UnknownType(ty))?;
        codec.on_register_type(desc)?;
        let listeners = self.active_listeners();
        self.forward_schema(&listeners);
        Ok(())
    }

    // ── Placement checks ────────────────────────────────────────────────

    /// Fails if linking `value` at `segment` of `parent` would place a
    /// tracked container, or any container below `value`, at a second
    /// location. The container currently held at that location is about to
    /// be released, so its subtree may be linked again.
    pub fn check_link(&self, store: &Store, value: &Value, parent: Handle, segment: &str) -> Result<(), TrackError> {
        let Some(h) = value.handle() else {
            return Ok(());
        };
        if !self.index.contains(parent) {
            return Ok(());
        }
        if self
            .index
            .get(h)
            .is_some_and(|n| n.parent == Some(parent) && n.segment == segment)
        {
            return Ok(());
        }
        let released: Vec<Handle> = current_child(store, parent, segment).into_iter().collect();
        self.check_subtree(
            store,
            value,
            self.index.child_path(Some(parent), segment),
            &released,
            &mut HashMap::new(),
        )
    }

    /// Like [`check_link`](Self::check_link) for the items of a splice.
    /// Elements removed by the same splice may be inserted again.
    pub fn check_splice(
        &self,
        store: &Store,
        array: Handle,
        index: usize,
        delete_count: usize,
        items: &[Value],
    ) -> Result<(), TrackError> {
        if !self.index.contains(array) {
            return Ok(());
        }
        let elements = store.elements(array)?;
        let end = index.saturating_add(delete_count).min(elements.len());
        let released: Vec<Handle> = elements
            .get(index..end)
            .unwrap_or_default()
            .iter()
            .filter_map(Value::handle)
            .collect();
        let mut seen = HashMap::new();
        for (i, item) in items.iter().enumerate() {
            let attempted = self.index.child_path(Some(array), &(index + i).to_string());
            self.check_subtree(store, item, attempted, &released, &mut seen)?;
        }
        Ok(())
    }

    /// Walks the containers reachable from `value` as if it were linked at
    /// `attempted`. A container may appear only once, and a tracked one
    /// only if it sits below one of `released`.
    fn check_subtree(
        &self,
        store: &Store,
        value: &Value,
        attempted: String,
        released: &[Handle],
        seen: &mut HashMap<Handle, String>,
    ) -> Result<(), TrackError> {
        let Some(h) = value.handle().filter(|h| store.contains(*h)) else {
            return Ok(());
        };
        if let Some(existing) = seen.get(&h) {
            return Err(TrackError::Structural {
                attempted,
                existing: existing.clone(),
            });
        }
        if self.index.contains(h) && !self.index.ancestry(h).any(|a| released.contains(&a)) {
            return Err(TrackError::Structural {
                attempted,
                existing: self.index.path_of(h),
            });
        }
        seen.insert(h, attempted.clone());
        for (key, child) in store.entries_of(h)? {
            self.check_subtree(store, &child, join_path(&attempted, &key), released, seen)?;
        }
        Ok(())
    }

    fn structural(&self, h: Handle, parent: Option<Handle>, segment: &str) -> TrackError {
        TrackError::Structural {
            attempted: self.index.child_path(parent, segment),
            existing: self.index.path_of(h),
        }
    }

    // ── Observation ─────────────────────────────────────────────────────

    /// Starts tracking `value` at `segment` of `parent` and everything below
    /// it. Primitives and already tracked containers at the same location
    /// are passed through.
    pub(crate) fn observe(
        &mut self,
        store: &mut Store,
        value: &Value,
        parent: Option<Handle>,
        segment: &str,
    ) -> Result<Option<Handle>, TrackError> {
        let Some(h) = value.handle().filter(|h| store.contains(*h)) else {
            return Ok(None);
        };
        if let Some(node) = self.index.get(h) {
            if node.parent == parent && node.segment == segment {
                return Ok(Some(h));
            }
            return Err(self.structural(h, parent, segment));
        }

        let kind = store.kind(h)?;
        let parent_node = parent.and_then(|p| self.index.get(p));
        let parent_hidden = parent_node.is_some_and(|n| n.hidden);
        let via_hidden_field = parent_node.is_some_and(|n| n.field_hidden(segment));
        let parent_id = parent_node.map(|n| n.id);

        let (fields, private, tags, implicit_owner) = match kind {
            ContainerKind::Object(ty) => {
                let implicit_owner = self.adopt(store, h)?;
                let desc = store.registry().get(ty).ok_or(StoreError::UnknownType(ty))?;
                (Some(desc.fields.clone()), desc.hidden, Some(store.tags(h)?), implicit_owner)
            }
            _ => (None, false, None, false),
        };

        let subscription = store.observe(h)?;
        let id = self.index.next_id();
        trace!(node = id, kind = kind.name(), segment, "observe");
        self.index.insert(
            h,
            TrackedNode {
                id,
                parent,
                segment: segment.to_string(),
                kind,
                fields,
                private,
                via_hidden_field,
                hidden: private || via_hidden_field || parent_hidden,
                tags,
                implicit_owner,
                subscription: Some(subscription),
            },
        );

        let entries = store.entries_of(h)?;
        if let Some(codec) = self.codec.as_mut() {
            let keys = match kind.is_keyed() {
                true => entries.iter().map(|(k, _)| k.clone()).collect(),
                false => Vec::new(),
            };
            codec.on_create_node(id, kind, parent_id, segment, keys)?;
        }
        for (key, child) in entries {
            self.observe(store, &child, Some(h), &key)?;
        }
        Ok(Some(h))
    }

    /// Stops tracking `value` and everything below it, if it is tracked as a
    /// child of `parent`.
    pub(crate) fn unobserve(&mut self, store: &mut Store, value: &Value, parent: Option<Handle>) -> Option<TrackedNode> {
        let h = value.handle()?;
        if self.index.get(h)?.parent != parent {
            return None;
        }
        let mut node = self.index.remove(h)?;
        if let Some(subscription) = node.subscription.take() {
            store.unobserve(subscription);
        }
        if let Some(codec) = self.codec.as_mut() {
            codec.on_delete_node(node.id);
        }
        if node.implicit_owner {
            self.released.push(h);
        }
        trace!(node = node.id, segment = %node.segment, "unobserve");
        if let Ok(entries) = store.entries_of(h) {
            for (_, child) in entries {
                self.unobserve(store, &child, Some(h));
            }
        }
        Some(node)
    }

    /// Makes the root the owner of an unowned object entering the tree.
    /// Returns whether the root owns `h` implicitly.
    fn adopt(&mut self, store: &mut Store, h: Handle) -> Result<bool, TrackError> {
        if h == self.root {
            return Ok(false);
        }
        match store.owner(h)? {
            Some(owner) => {
                // Moved within one event: the release is still pending.
                let before = self.released.len();
                self.released.retain(|r| *r != h);
                Ok(owner == self.root && self.released.len() != before)
            }
            None => {
                for change in store.set_owner(h, Some(self.root))? {
                    let Some(node) = self.index.get_mut(change.object) else {
                        continue;
                    };
                    node.tags = Some(change.new.clone());
                    if node.id < self.event_floor {
                        self.pending_tags.push(change);
                    }
                }
                Ok(true)
            }
        }
    }

    /// Drops the implicit root ownership of objects that left the tree.
    /// Tag changes of objects still tracked are queued for the tag pass.
    fn release_owners(&mut self, store: &mut Store) {
        for h in std::mem::take(&mut self.released) {
            if self.index.contains(h) || !store.owner(h).is_ok_and(|o| o == Some(self.root)) {
                continue;
            }
            match store.set_owner(h, None) {
                Ok(changes) => self.pending_tags.extend(changes),
                Err(err) => debug!(%err, "owner release failed"),
            }
        }
    }

    // ── Visibility ──────────────────────────────────────────────────────

    /// True if every privacy boundary between the root and `h` is visible
    /// to the listener.
    fn location_visible(&self, listener: &Listener, h: Handle) -> bool {
        if listener.spy {
            return true;
        }
        for h in self.index.ancestry(h) {
            let Some(node) = self.index.get(h) else { break };
            if !node.hidden {
                break;
            }
            if node.private && !listener.can_see(&self.index.tags_of(h)) {
                return false;
            }
            if let Some(parent) = node.parent.filter(|_| node.via_hidden_field) {
                if !listener.can_see(&self.index.tags_of(parent)) {
                    return false;
                }
            }
        }
        true
    }

    /// True unless `key` is a private field of `parent` whose tags the
    /// listener does not meet.
    fn field_visible(&self, listener: &Listener, parent: Handle, key: &str) -> bool {
        listener.spy
            || !self.index.get(parent).is_some_and(|n| n.field_hidden(key))
            || listener.can_see(&self.index.tags_of(parent))
    }

    // ── Schema plumbing ─────────────────────────────────────────────────

    fn forward_schema(&mut self, listeners: &[Rc<Listener>]) {
        let Some(codec) = self.codec.as_mut() else {
            return;
        };
        for patch in codec.take_schema_patches() {
            for listener in listeners {
                listener.dispatch(&patch, None, self.root);
            }
        }
    }

    fn encode(&self, patch: &mut Patch, hints: EncodeHints) -> Result<(), TrackError> {
        if let Some(codec) = &self.codec {
            patch.encoded = Some(codec.encode_patch(patch, hints)?);
        }
        Ok(())
    }

    fn node_id(&self, value: &Value) -> Option<u64> {
        value.handle().and_then(|h| self.index.get(h)).map(|n| n.id)
    }
}

/// Container currently linked at `segment` of `parent`.
fn current_child(store: &Store, parent: Handle, segment: &str) -> Option<Handle> {
    let value = match store.kind(parent).ok()? {
        ContainerKind::Object(_) => store.field(parent, segment).ok()??,
        ContainerKind::Array => store.elements(parent).ok()?.get(segment.parse::<usize>().ok()?)?,
        ContainerKind::Map => store.map_get(parent, segment).ok()??,
        ContainerKind::Set => return None,
    };
    value.handle()
}
