//! Store and tracker behind one mutation API.

use serde_json::Value as Json;
use tracing::debug;

use crate::error::TrackError;
use crate::meta::{TypeDef, TypeId};
use crate::options::{PatchOptions, SnapshotOptions, TrackerOptions};
use crate::patch::Patch;
use crate::schema::SchemaDecoder;
use crate::store::{Change, Store};
use crate::tracker::{Disposer, Tracker};
use crate::value::{Handle, Value};

/// A [`Store`] plus an optional [`Tracker`] on one of its objects.
///
/// Every mutation goes through here so that the resulting change reaches
/// the tracker, and computed fields are refreshed afterwards. Listeners
/// only get shared references, so they cannot mutate the tree while a
/// patch is being dispatched.
#[derive(Default)]
pub struct StateTree {
    store: Store,
    tracker: Option<Tracker>,
}

impl StateTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn tracker(&self) -> Option<&Tracker> {
        self.tracker.as_ref()
    }

    fn tracking(&self) -> Result<&Tracker, TrackError> {
        self.tracker.as_ref().ok_or(TrackError::NotTracking)
    }

    pub fn register(&mut self, def: TypeDef) -> Result<TypeId, TrackError> {
        let ty = self.store.register(def)?;
        if let Some(tracker) = self.tracker.as_mut() {
            tracker.register_type(&self.store, ty)?;
        }
        Ok(ty)
    }

    // ── Creation ────────────────────────────────────────────────────────

    pub fn create_object(&mut self, ty: TypeId) -> Result<Handle, TrackError> {
        Ok(self.store.create_object(ty)?)
    }

    pub fn create_array(&mut self, values: Vec<Value>) -> Result<Handle, TrackError> {
        Ok(self.store.create_array(values)?)
    }

    pub fn create_map<K, I>(&mut self, entries: I) -> Result<Handle, TrackError>
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Ok(self.store.create_map(entries)?)
    }

    pub fn create_set<I>(&mut self, members: I) -> Result<Handle, TrackError>
    where
        I: IntoIterator<Item = Value>,
    {
        Ok(self.store.create_set(members)?)
    }

    // ── Mutations ───────────────────────────────────────────────────────

    fn check_link(&self, value: &Value, parent: Handle, segment: &str) -> Result<(), TrackError> {
        match &self.tracker {
            Some(tracker) => tracker.check_link(&self.store, value, parent, segment),
            None => Ok(()),
        }
    }

    /// Hands a change to the tracker, then refreshes computed fields.
    fn apply(&mut self, change: Option<Change>) -> Result<(), TrackError> {
        if let (Some(change), Some(tracker)) = (change, self.tracker.as_mut()) {
            tracker.process(&mut self.store, change)?;
        }
        for change in self.store.refresh_computed() {
            if let Some(tracker) = self.tracker.as_mut() {
                tracker.process(&mut self.store, change)?;
            }
        }
        Ok(())
    }

    pub fn set_field(&mut self, object: Handle, name: &str, value: impl Into<Value>) -> Result<(), TrackError> {
        let value = value.into();
        self.check_link(&value, object, name)?;
        let change = self.store.set_field(object, name, value)?;
        self.apply(change)
    }

    pub fn unset_field(&mut self, object: Handle, name: &str) -> Result<(), TrackError> {
        let change = self.store.unset_field(object, name)?;
        self.apply(change)
    }

    pub fn set_index(&mut self, array: Handle, index: usize, value: impl Into<Value>) -> Result<(), TrackError> {
        let value = value.into();
        self.check_link(&value, array, &index.to_string())?;
        let change = self.store.set_index(array, index, value)?;
        self.apply(change)
    }

    pub fn splice(
        &mut self,
        array: Handle,
        index: usize,
        delete_count: usize,
        items: Vec<Value>,
    ) -> Result<(), TrackError> {
        if let Some(tracker) = &self.tracker {
            tracker.check_splice(&self.store, array, index, delete_count, &items)?;
        }
        let change = self.store.splice(array, index, delete_count, items)?;
        self.apply(change)
    }

    pub fn push(&mut self, array: Handle, value: impl Into<Value>) -> Result<(), TrackError> {
        let len = self.store.elements(array)?.len();
        self.splice(array, len, 0, vec![value.into()])
    }

    /// Removes and returns the last element.
    pub fn pop(&mut self, array: Handle) -> Result<Option<Value>, TrackError> {
        let last = self.store.elements(array)?.last().cloned();
        let change = self.store.pop(array)?;
        self.apply(change)?;
        Ok(last)
    }

    pub fn map_set(&mut self, map: Handle, key: &str, value: impl Into<Value>) -> Result<(), TrackError> {
        let value = value.into();
        self.check_link(&value, map, key)?;
        let change = self.store.map_set(map, key, value)?;
        self.apply(change)
    }

    pub fn map_delete(&mut self, map: Handle, key: &str) -> Result<(), TrackError> {
        let change = self.store.map_delete(map, key)?;
        self.apply(change)
    }

    pub fn set_add(&mut self, set: Handle, member: impl Into<Value>) -> Result<(), TrackError> {
        let change = self.store.set_add(set, member.into())?;
        self.apply(change)
    }

    pub fn set_delete(&mut self, set: Handle, member: impl Into<Value>) -> Result<(), TrackError> {
        let change = self.store.set_delete(set, &member.into())?;
        self.apply(change)
    }

    /// Frees a container outside the tracked tree. Handles to it go stale.
    pub fn remove(&mut self, container: Handle) -> Result<(), TrackError> {
        let changes = self.store.remove(container)?;
        if let Some(tracker) = self.tracker.as_mut() {
            tracker.on_tags_changed(&self.store, changes)?;
        }
        Ok(())
    }

    // ── Ownership and tags ──────────────────────────────────────────────

    pub fn add_tag(&mut self, object: Handle, tag: &str) -> Result<(), TrackError> {
        self.add_tags(object, [tag])
    }

    pub fn add_tags<I, S>(&mut self, object: Handle, tags: I) -> Result<(), TrackError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let changes = self.store.add_tags(object, tags)?;
        if let Some(tracker) = self.tracker.as_mut() {
            tracker.on_tags_changed(&self.store, changes)?;
        }
        self.apply(None)
    }

    pub fn delete_tag(&mut self, object: Handle, tag: &str) -> Result<(), TrackError> {
        let changes = self.store.delete_tag(object, tag)?;
        if let Some(tracker) = self.tracker.as_mut() {
            tracker.on_tags_changed(&self.store, changes)?;
        }
        self.apply(None)
    }

    /// Moves `object` under a new owner, from which it inherits tags.
    pub fn set_owner(&mut self, object: Handle, owner: Option<Handle>) -> Result<(), TrackError> {
        let changes = self.store.set_owner(object, owner)?;
        if let Some(tracker) = self.tracker.as_mut() {
            tracker.on_tags_changed(&self.store, changes)?;
        }
        self.apply(None)
    }

    // ── Tracking ────────────────────────────────────────────────────────

    /// Starts tracking `root`. Tracking the current root again is a no-op.
    pub fn track(&mut self, root: Handle, options: TrackerOptions) -> Result<(), TrackError> {
        if let Some(tracker) = &self.tracker {
            return match tracker.root() == root {
                true => Ok(()),
                false => Err(TrackError::RootTracking("another root is already tracked".into())),
            };
        }
        self.tracker = Some(Tracker::new(&mut self.store, root, options)?);
        Ok(())
    }

    /// Stops tracking and disposes every listener.
    pub fn untrack(&mut self) {
        if let Some(tracker) = self.tracker.take() {
            tracker.dispose(&mut self.store);
            debug!("untracked");
        }
    }

    pub fn on_patch<F>(&mut self, handler: F, options: PatchOptions) -> Result<Disposer, TrackError>
    where
        F: FnMut(&Patch, Option<Handle>, Handle) + 'static,
    {
        let tracker = self.tracker.as_mut().ok_or(TrackError::NotTracking)?;
        Ok(tracker.on_patch(handler, options))
    }

    /// Snapshot of the tracked tree. `None` if the root itself is private
    /// and invisible with these options.
    pub fn snapshot(&self, options: &SnapshotOptions) -> Result<Option<Json>, TrackError> {
        Ok(self.tracking()?.snapshot(&self.store, options))
    }

    /// Current schema tables as `{ "types": [...], "nodes": [...] }`.
    pub fn schema_snapshot(&self) -> Result<Json, TrackError> {
        let codec = self.tracking()?.codec().ok_or(TrackError::SchemaDisabled)?;
        codec.schema_snapshot()
    }

    /// Binary snapshot of the tree as seen with `options`.
    pub fn encode_snapshot(&self, options: &SnapshotOptions) -> Result<Vec<u8>, TrackError> {
        let tracker = self.tracking()?;
        let codec = tracker.codec().ok_or(TrackError::SchemaDisabled)?;
        let snapshot = tracker.snapshot(&self.store, options);
        Ok(codec.encode_snapshot(snapshot.as_ref())?)
    }

    /// Decoder bootstrapped with the current schema.
    pub fn decoder(&self) -> Result<SchemaDecoder, TrackError> {
        let codec = self.tracking()?.codec().ok_or(TrackError::SchemaDisabled)?;
        Ok(SchemaDecoder::new(codec.tables().clone()))
    }
}
