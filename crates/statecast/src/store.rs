//! Arena of observable containers.
//!
//! The store holds typed objects, arrays, maps and sets behind generational
//! [`Handle`]s. Mutations on a container that has at least one live
//! [`Subscription`] return a [`Change`] describing what happened; the caller
//! forwards it to whoever observes the container. Objects additionally carry
//! an ownership admin record (owner, own tags, owned children) from which
//! their effective tags are derived.

use std::collections::BTreeSet;

use indexmap::{IndexMap, IndexSet};
use slotmap::SlotMap;
use tracing::warn;

use crate::error::StoreError;
use crate::meta::{FieldKind, TypeDef, TypeDescriptor, TypeId, TypeRegistry};
use crate::value::{Handle, Value};

/// Upper bound on computed-field refresh rounds per mutation.
const MAX_REFRESH_ROUNDS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    Object(TypeId),
    Array,
    Map,
    Set,
}

impl ContainerKind {
    pub fn name(&self) -> &'static str {
        match self {
            ContainerKind::Object(_) => "object",
            ContainerKind::Array => "array",
            ContainerKind::Map => "map",
            ContainerKind::Set => "set",
        }
    }

    pub fn is_keyed(&self) -> bool {
        matches!(self, ContainerKind::Map | ContainerKind::Set)
    }
}

/// A mutation on an observed container.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    /// A key appeared: first write of an object field, a new map key or set
    /// member.
    Add {
        object: Handle,
        name: String,
        value: Value,
    },
    /// An existing key or array slot got a different value.
    Update {
        object: Handle,
        name: String,
        value: Value,
        old_value: Value,
    },
    Delete {
        object: Handle,
        name: String,
        old_value: Value,
    },
    /// `removed` were taken out at `index` and `added` inserted there.
    Splice {
        object: Handle,
        index: usize,
        removed: Vec<Value>,
        added: Vec<Value>,
    },
}

impl Change {
    pub fn object(&self) -> Handle {
        match self {
            Change::Add { object, .. }
            | Change::Update { object, .. }
            | Change::Delete { object, .. }
            | Change::Splice { object, .. } => *object,
        }
    }
}

/// Effective tags of one object before and after an admin mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagsChange {
    pub object: Handle,
    pub old: BTreeSet<String>,
    pub new: BTreeSet<String>,
}

/// Observation token. Consumed by [`Store::unobserve`], so it can only be
/// released once.
#[derive(Debug)]
#[must_use]
pub struct Subscription {
    handle: Handle,
}

impl Subscription {
    pub fn handle(&self) -> Handle {
        self.handle
    }
}

#[derive(Debug, Clone)]
struct ObjectData {
    ty: TypeId,
    fields: Vec<Option<Value>>,
    extras: IndexMap<String, Value>,
    owner: Option<Handle>,
    owned: Vec<Handle>,
    tags: BTreeSet<String>,
}

#[derive(Debug, Clone)]
enum Body {
    Object(ObjectData),
    Array(Vec<Value>),
    Map(IndexMap<String, Value>),
    Set(IndexMap<String, Value>),
}

#[derive(Debug, Clone)]
struct Container {
    body: Body,
    observers: usize,
}

impl Container {
    fn kind(&self) -> ContainerKind {
        match &self.body {
            Body::Object(obj) => ContainerKind::Object(obj.ty),
            Body::Array(_) => ContainerKind::Array,
            Body::Map(_) => ContainerKind::Map,
            Body::Set(_) => ContainerKind::Set,
        }
    }

    fn observed(&self) -> bool {
        self.observers > 0
    }
}

fn wrong_kind(expected: &'static str, found: &Container) -> StoreError {
    StoreError::WrongKind {
        expected,
        found: found.kind().name(),
    }
}

#[derive(Debug, Default)]
pub struct Store {
    registry: TypeRegistry,
    containers: SlotMap<Handle, Container>,
    /// Objects whose type has computed fields.
    computed: IndexSet<Handle>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn register(&mut self, def: TypeDef) -> Result<TypeId, StoreError> {
        self.registry.register(def)
    }

    // ── Creation ────────────────────────────────────────────────────────

    /// Creates an object with every stored field unset and computed fields
    /// evaluated once.
    pub fn create_object(&mut self, ty: TypeId) -> Result<Handle, StoreError> {
        let desc = self.registry.get(ty).ok_or(StoreError::UnknownType(ty))?;
        let fields = vec![None; desc.fields.len()];
        let computed: Vec<usize> = desc
            .fields
            .iter()
            .enumerate()
            .filter(|(_, f)| f.is_computed())
            .map(|(i, _)| i)
            .collect();
        let h = self.insert(Body::Object(ObjectData {
            ty,
            fields,
            extras: IndexMap::new(),
            owner: None,
            owned: Vec::new(),
            tags: BTreeSet::new(),
        }));
        if !computed.is_empty() {
            self.computed.insert(h);
        }
        for index in computed {
            let value = self.compute(h, ty, index);
            if let Some(Body::Object(obj)) = self.containers.get_mut(h).map(|c| &mut c.body) {
                obj.fields[index] = value;
            }
        }
        Ok(h)
    }

    pub fn create_array(&mut self, values: Vec<Value>) -> Result<Handle, StoreError> {
        self.check_refs(&values)?;
        Ok(self.insert(Body::Array(values)))
    }

    pub fn create_map<K, I>(&mut self, entries: I) -> Result<Handle, StoreError>
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let map: IndexMap<String, Value> = entries.into_iter().map(|(k, v)| (k.into(), v)).collect();
        for value in map.values() {
            self.check_ref(value)?;
        }
        Ok(self.insert(Body::Map(map)))
    }

    pub fn create_set<I>(&mut self, members: I) -> Result<Handle, StoreError>
    where
        I: IntoIterator<Item = Value>,
    {
        let mut set = IndexMap::new();
        for member in members {
            let key = member.member_key().ok_or(StoreError::NotPrimitive)?;
            set.entry(key).or_insert(member);
        }
        Ok(self.insert(Body::Set(set)))
    }

    fn insert(&mut self, body: Body) -> Handle {
        self.containers.insert(Container { body, observers: 0 })
    }

    /// Frees a container that nothing observes. Objects it owned lose their
    /// owner; the returned changes describe their new tags. Values still
    /// referring to `h` read as stale afterwards.
    pub fn remove(&mut self, h: Handle) -> Result<Vec<TagsChange>, StoreError> {
        let c = self.container(h)?;
        if c.observed() {
            return Err(StoreError::Observed);
        }
        let owned = match &c.body {
            Body::Object(obj) => Some(obj.owned.clone()),
            _ => None,
        };
        let mut changes = Vec::new();
        if let Some(owned) = owned {
            for o in owned {
                changes.extend(self.set_owner(o, None)?);
            }
            self.set_owner(h, None)?;
        }
        self.containers.remove(h);
        self.computed.shift_remove(&h);
        Ok(changes)
    }

    fn check_ref(&self, value: &Value) -> Result<(), StoreError> {
        match value.handle() {
            Some(h) if !self.containers.contains_key(h) => Err(StoreError::StaleHandle),
            _ => Ok(()),
        }
    }

    fn check_refs(&self, values: &[Value]) -> Result<(), StoreError> {
        values.iter().try_for_each(|v| self.check_ref(v))
    }

    // ── Reads ───────────────────────────────────────────────────────────

    fn container(&self, h: Handle) -> Result<&Container, StoreError> {
        self.containers.get(h).ok_or(StoreError::StaleHandle)
    }

    fn container_mut(&mut self, h: Handle) -> Result<&mut Container, StoreError> {
        self.containers.get_mut(h).ok_or(StoreError::StaleHandle)
    }

    fn object(&self, h: Handle) -> Result<&ObjectData, StoreError> {
        match &self.container(h)?.body {
            Body::Object(obj) => Ok(obj),
            _ => Err(StoreError::OwnerType),
        }
    }

    fn object_mut(&mut self, h: Handle) -> Result<&mut ObjectData, StoreError> {
        match &mut self.container_mut(h)?.body {
            Body::Object(obj) => Ok(obj),
            _ => Err(StoreError::OwnerType),
        }
    }

    pub fn contains(&self, h: Handle) -> bool {
        self.containers.contains_key(h)
    }

    /// Number of live containers.
    pub fn container_count(&self) -> usize {
        self.containers.len()
    }

    pub fn kind(&self, h: Handle) -> Result<ContainerKind, StoreError> {
        Ok(self.container(h)?.kind())
    }

    /// True if `value` links to a live container.
    pub fn is_container(&self, value: &Value) -> bool {
        value.handle().is_some_and(|h| self.contains(h))
    }

    pub fn is_observed(&self, h: Handle) -> bool {
        self.containers.get(h).is_some_and(Container::observed)
    }

    /// Descriptor of an object's type. `None` for other containers.
    pub fn meta_of(&self, h: Handle) -> Option<&TypeDescriptor> {
        match self.kind(h).ok()? {
            ContainerKind::Object(ty) => self.registry.get(ty),
            _ => None,
        }
    }

    fn descriptor(&self, ty: TypeId) -> Result<&TypeDescriptor, StoreError> {
        self.registry.get(ty).ok_or(StoreError::UnknownType(ty))
    }

    /// Reads a declared, computed or observable-only field.
    pub fn field(&self, h: Handle, name: &str) -> Result<Option<&Value>, StoreError> {
        let c = self.container(h)?;
        let Body::Object(obj) = &c.body else {
            return Err(wrong_kind("object", c));
        };
        let desc = self.descriptor(obj.ty)?;
        match desc.field_index(name) {
            Some(index) => Ok(obj.fields[index].as_ref()),
            None => Ok(obj.extras.get(name)),
        }
    }

    /// Declared field values in declaration order, computed ones included.
    pub fn object_fields(&self, h: Handle) -> Result<(&TypeDescriptor, &[Option<Value>]), StoreError> {
        let c = self.container(h)?;
        let Body::Object(obj) = &c.body else {
            return Err(wrong_kind("object", c));
        };
        Ok((self.descriptor(obj.ty)?, &obj.fields))
    }

    pub fn elements(&self, h: Handle) -> Result<&[Value], StoreError> {
        let c = self.container(h)?;
        match &c.body {
            Body::Array(items) => Ok(items),
            _ => Err(wrong_kind("array", c)),
        }
    }

    /// Entries of a map.
    pub fn entries(&self, h: Handle) -> Result<&IndexMap<String, Value>, StoreError> {
        let c = self.container(h)?;
        match &c.body {
            Body::Map(map) => Ok(map),
            _ => Err(wrong_kind("map", c)),
        }
    }

    pub fn map_get(&self, h: Handle, key: &str) -> Result<Option<&Value>, StoreError> {
        Ok(self.entries(h)?.get(key))
    }

    /// Members of a set keyed by [`Value::member_key`].
    pub fn members(&self, h: Handle) -> Result<&IndexMap<String, Value>, StoreError> {
        let c = self.container(h)?;
        match &c.body {
            Body::Set(set) => Ok(set),
            _ => Err(wrong_kind("set", c)),
        }
    }

    pub fn set_has(&self, h: Handle, member: &Value) -> Result<bool, StoreError> {
        let key = member.member_key().ok_or(StoreError::NotPrimitive)?;
        Ok(self.members(h)?.contains_key(&key))
    }

    pub fn len(&self, h: Handle) -> Result<usize, StoreError> {
        Ok(match &self.container(h)?.body {
            Body::Object(obj) => obj.fields.iter().filter(|f| f.is_some()).count(),
            Body::Array(items) => items.len(),
            Body::Map(map) | Body::Set(map) => map.len(),
        })
    }

    /// Current children used for recursive discovery: set stored fields of
    /// an object (computed and observable-only fields excluded), array
    /// elements by index, map entries and set members by key.
    pub fn entries_of(&self, h: Handle) -> Result<Vec<(String, Value)>, StoreError> {
        Ok(match &self.container(h)?.body {
            Body::Object(obj) => {
                let desc = self.descriptor(obj.ty)?;
                desc.fields
                    .iter()
                    .zip(&obj.fields)
                    .filter(|(f, _)| !f.is_computed())
                    .filter_map(|(f, v)| v.as_ref().map(|v| (f.key.clone(), v.clone())))
                    .collect()
            }
            Body::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, v)| (i.to_string(), v.clone()))
                .collect(),
            Body::Map(map) | Body::Set(map) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        })
    }

    // ── Subscriptions ───────────────────────────────────────────────────

    pub fn observe(&mut self, h: Handle) -> Result<Subscription, StoreError> {
        self.container_mut(h)?.observers += 1;
        Ok(Subscription { handle: h })
    }

    pub fn unobserve(&mut self, subscription: Subscription) {
        if let Some(c) = self.containers.get_mut(subscription.handle) {
            c.observers = c.observers.saturating_sub(1);
        }
    }

    // ── Object mutations ────────────────────────────────────────────────

    fn admits(&self, kind: &FieldKind, value: &Value) -> bool {
        match (kind, value) {
            (_, Value::Null) | (FieldKind::Any, _) => true,
            (FieldKind::String, Value::Str(_)) => true,
            (FieldKind::Number, Value::Int(_) | Value::Float(_)) => true,
            (FieldKind::Boolean, Value::Bool(_)) => true,
            (FieldKind::Object(ty), Value::Ref(h)) => {
                matches!(self.kind(*h), Ok(ContainerKind::Object(actual)) if self.registry.is_a(actual, *ty))
            }
            (FieldKind::Array(_), Value::Ref(h)) => matches!(self.kind(*h), Ok(ContainerKind::Array)),
            (FieldKind::Map(_), Value::Ref(h)) => matches!(self.kind(*h), Ok(ContainerKind::Map)),
            (FieldKind::Set(_), Value::Ref(h)) => matches!(self.kind(*h), Ok(ContainerKind::Set)),
            _ => false,
        }
    }

    /// Writes a field. The first write of a field is an `Add`, later ones
    /// are `Update`s; writing the current value changes nothing.
    pub fn set_field(&mut self, h: Handle, name: &str, value: Value) -> Result<Option<Change>, StoreError> {
        self.check_ref(&value)?;
        let ty = match self.kind(h)? {
            ContainerKind::Object(ty) => ty,
            other => {
                return Err(StoreError::WrongKind {
                    expected: "object",
                    found: other.name(),
                })
            }
        };
        let desc = self.descriptor(ty)?;
        let slot = match desc.field_index(name) {
            Some(index) => {
                let field = &desc.fields[index];
                if field.is_computed() {
                    return Err(StoreError::ComputedField {
                        ty: desc.name.clone(),
                        field: name.to_string(),
                    });
                }
                if !self.admits(&field.kind, &value) {
                    return Err(StoreError::KindMismatch {
                        ty: desc.name.clone(),
                        field: name.to_string(),
                        expected: field.kind.to_string(),
                    });
                }
                Some(index)
            }
            None if desc.observables.iter().any(|k| k == name) => None,
            None => {
                return Err(StoreError::UnknownField {
                    ty: desc.name.clone(),
                    field: name.to_string(),
                })
            }
        };
        let c = self.container_mut(h)?;
        let observed = c.observed();
        let Body::Object(obj) = &mut c.body else {
            return Ok(None);
        };
        let old = match slot {
            Some(index) => obj.fields[index].replace(value.clone()),
            None => obj.extras.insert(name.to_string(), value.clone()),
        };
        if old.as_ref() == Some(&value) || !observed {
            return Ok(None);
        }
        let name = name.to_string();
        Ok(Some(match old {
            Some(old_value) => Change::Update {
                object: h,
                name,
                value,
                old_value,
            },
            None => Change::Add {
                object: h,
                name,
                value,
            },
        }))
    }

    pub fn unset_field(&mut self, h: Handle, name: &str) -> Result<Option<Change>, StoreError> {
        let slot = {
            let (desc, _) = self.object_fields(h)?;
            match desc.field_index(name) {
                Some(index) if desc.fields[index].is_computed() => {
                    return Err(StoreError::ComputedField {
                        ty: desc.name.clone(),
                        field: name.to_string(),
                    })
                }
                Some(index) => Some(index),
                None if desc.observables.iter().any(|k| k == name) => None,
                None => {
                    return Err(StoreError::UnknownField {
                        ty: desc.name.clone(),
                        field: name.to_string(),
                    })
                }
            }
        };
        let c = self.container_mut(h)?;
        let observed = c.observed();
        let Body::Object(obj) = &mut c.body else {
            return Ok(None);
        };
        let old = match slot {
            Some(index) => obj.fields[index].take(),
            None => obj.extras.shift_remove(name),
        };
        Ok(match old {
            Some(old_value) if observed => Some(Change::Delete {
                object: h,
                name: name.to_string(),
                old_value,
            }),
            _ => None,
        })
    }

    // ── Array mutations ─────────────────────────────────────────────────

    /// Replaces the element at `index`.
    pub fn set_index(&mut self, h: Handle, index: usize, value: Value) -> Result<Option<Change>, StoreError> {
        self.check_ref(&value)?;
        let c = self.container_mut(h)?;
        let observed = c.observed();
        let Body::Array(items) = &mut c.body else {
            return Err(wrong_kind("array", c));
        };
        let len = items.len();
        let slot = items
            .get_mut(index)
            .ok_or(StoreError::IndexOutOfBounds { index, len })?;
        if *slot == value {
            return Ok(None);
        }
        let old_value = std::mem::replace(slot, value.clone());
        Ok(observed.then(|| Change::Update {
            object: h,
            name: index.to_string(),
            value,
            old_value,
        }))
    }

    /// Removes up to `delete_count` elements at `index` and inserts `items`
    /// in their place.
    pub fn splice(
        &mut self,
        h: Handle,
        index: usize,
        delete_count: usize,
        items: Vec<Value>,
    ) -> Result<Option<Change>, StoreError> {
        self.check_refs(&items)?;
        let c = self.container_mut(h)?;
        let observed = c.observed();
        let Body::Array(elements) = &mut c.body else {
            return Err(wrong_kind("array", c));
        };
        let len = elements.len();
        if index > len {
            return Err(StoreError::IndexOutOfBounds { index, len });
        }
        let end = index + delete_count.min(len - index);
        let removed: Vec<Value> = elements.splice(index..end, items.iter().cloned()).collect();
        if !observed || (removed.is_empty() && items.is_empty()) {
            return Ok(None);
        }
        Ok(Some(Change::Splice {
            object: h,
            index,
            removed,
            added: items,
        }))
    }

    pub fn push(&mut self, h: Handle, value: Value) -> Result<Option<Change>, StoreError> {
        let len = self.elements(h)?.len();
        self.splice(h, len, 0, vec![value])
    }

    pub fn pop(&mut self, h: Handle) -> Result<Option<Change>, StoreError> {
        match self.elements(h)?.len() {
            0 => Ok(None),
            len => self.splice(h, len - 1, 1, Vec::new()),
        }
    }

    // ── Map and set mutations ───────────────────────────────────────────

    pub fn map_set(&mut self, h: Handle, key: &str, value: Value) -> Result<Option<Change>, StoreError> {
        self.check_ref(&value)?;
        let c = self.container_mut(h)?;
        let observed = c.observed();
        let Body::Map(map) = &mut c.body else {
            return Err(wrong_kind("map", c));
        };
        let old = map.insert(key.to_string(), value.clone());
        if old.as_ref() == Some(&value) || !observed {
            return Ok(None);
        }
        let name = key.to_string();
        Ok(Some(match old {
            Some(old_value) => Change::Update {
                object: h,
                name,
                value,
                old_value,
            },
            None => Change::Add {
                object: h,
                name,
                value,
            },
        }))
    }

    pub fn map_delete(&mut self, h: Handle, key: &str) -> Result<Option<Change>, StoreError> {
        let c = self.container_mut(h)?;
        let observed = c.observed();
        let Body::Map(map) = &mut c.body else {
            return Err(wrong_kind("map", c));
        };
        Ok(match map.shift_remove(key) {
            Some(old_value) if observed => Some(Change::Delete {
                object: h,
                name: key.to_string(),
                old_value,
            }),
            _ => None,
        })
    }

    pub fn set_add(&mut self, h: Handle, member: Value) -> Result<Option<Change>, StoreError> {
        let key = member.member_key().ok_or(StoreError::NotPrimitive)?;
        let c = self.container_mut(h)?;
        let observed = c.observed();
        let Body::Set(set) = &mut c.body else {
            return Err(wrong_kind("set", c));
        };
        if set.contains_key(&key) {
            return Ok(None);
        }
        set.insert(key.clone(), member.clone());
        Ok(observed.then(|| Change::Add {
            object: h,
            name: key,
            value: member,
        }))
    }

    pub fn set_delete(&mut self, h: Handle, member: &Value) -> Result<Option<Change>, StoreError> {
        let key = member.member_key().ok_or(StoreError::NotPrimitive)?;
        let c = self.container_mut(h)?;
        let observed = c.observed();
        let Body::Set(set) = &mut c.body else {
            return Err(wrong_kind("set", c));
        };
        Ok(match set.shift_remove(&key) {
            Some(old_value) if observed => Some(Change::Delete {
                object: h,
                name: key,
                old_value,
            }),
            _ => None,
        })
    }

    // ── Computed fields ─────────────────────────────────────────────────

    fn compute(&self, h: Handle, ty: TypeId, index: usize) -> Option<Value> {
        let field = self.registry.get(ty)?.fields.get(index)?;
        let compute = field.computed.as_ref()?;
        Some(compute(self, h))
    }

    /// Re-evaluates the computed fields of every object that has some and
    /// returns the changes for observed objects whose computed values moved.
    pub fn refresh_computed(&mut self) -> Vec<Change> {
        let mut changes = Vec::new();
        for round in 0.. {
            if round == MAX_REFRESH_ROUNDS {
                warn!("computed fields did not settle after {MAX_REFRESH_ROUNDS} rounds");
                break;
            }
            let mut pending = Vec::new();
            for &h in &self.computed {
                let Some(Body::Object(obj)) = self.containers.get(h).map(|c| &c.body) else {
                    continue;
                };
                let Some(desc) = self.registry.get(obj.ty) else {
                    continue;
                };
                for (index, field) in desc.fields.iter().enumerate() {
                    let Some(compute) = &field.computed else {
                        continue;
                    };
                    let value = compute(self, h);
                    if obj.fields[index].as_ref() != Some(&value) {
                        pending.push((h, index, field.key.clone(), value));
                    }
                }
            }
            if pending.is_empty() {
                break;
            }
            for (h, index, name, value) in pending {
                let Some(c) = self.containers.get_mut(h) else {
                    continue;
                };
                let observed = c.observed();
                let Body::Object(obj) = &mut c.body else {
                    continue;
                };
                let old = obj.fields[index].replace(value.clone());
                if !observed {
                    continue;
                }
                changes.push(match old {
                    Some(old_value) => Change::Update {
                        object: h,
                        name,
                        value,
                        old_value,
                    },
                    None => Change::Add {
                        object: h,
                        name,
                        value,
                    },
                });
            }
        }
        changes
    }

    // ── Ownership and tags ──────────────────────────────────────────────

    pub fn owner(&self, h: Handle) -> Result<Option<Handle>, StoreError> {
        Ok(self.object(h)?.owner)
    }

    pub fn own_tags(&self, h: Handle) -> Result<&BTreeSet<String>, StoreError> {
        Ok(&self.object(h)?.tags)
    }

    /// True if `owner` appears on the owner chain of `h`.
    pub fn is_owned_by(&self, h: Handle, owner: Handle) -> Result<bool, StoreError> {
        let mut current = self.object(h)?.owner;
        while let Some(o) = current {
            if o == owner {
                return Ok(true);
            }
            current = self.object(o)?.owner;
        }
        Ok(false)
    }

    /// Own tags united with the effective tags of the owner chain.
    pub fn tags(&self, h: Handle) -> Result<BTreeSet<String>, StoreError> {
        let mut tags = BTreeSet::new();
        let mut current = Some(h);
        while let Some(h) = current {
            let obj = self.object(h)?;
            tags.extend(obj.tags.iter().cloned());
            current = obj.owner;
        }
        Ok(tags)
    }

    /// Objects owned by `h`, transitively, in owner-first pre-order.
    pub fn owned_subtree(&self, h: Handle) -> Result<Vec<Handle>, StoreError> {
        let mut out = Vec::new();
        let mut stack = vec![h];
        while let Some(h) = stack.pop() {
            out.push(h);
            stack.extend(self.object(h)?.owned.iter().rev().copied());
        }
        Ok(out)
    }

    fn tag_pass<F>(&mut self, h: Handle, mutate: F) -> Result<Vec<TagsChange>, StoreError>
    where
        F: FnOnce(&mut Self) -> Result<(), StoreError>,
    {
        let subtree = self.owned_subtree(h)?;
        let before = subtree
            .iter()
            .map(|h| self.tags(*h))
            .collect::<Result<Vec<_>, _>>()?;
        mutate(self)?;
        let mut changes = Vec::new();
        for (object, old) in subtree.into_iter().zip(before) {
            let new = self.tags(object)?;
            if new != old {
                changes.push(TagsChange { object, old, new });
            }
        }
        Ok(changes)
    }

    pub fn add_tags<I, S>(&mut self, h: Handle, tags: I) -> Result<Vec<TagsChange>, StoreError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tags: Vec<String> = tags.into_iter().map(Into::into).collect();
        self.tag_pass(h, |store| {
            store.object_mut(h)?.tags.extend(tags);
            Ok(())
        })
    }

    pub fn delete_tag(&mut self, h: Handle, tag: &str) -> Result<Vec<TagsChange>, StoreError> {
        self.tag_pass(h, |store| {
            store.object_mut(h)?.tags.remove(tag);
            Ok(())
        })
    }

    /// Moves `h` under a new owner (or detaches it with `None`).
    pub fn set_owner(&mut self, h: Handle, owner: Option<Handle>) -> Result<Vec<TagsChange>, StoreError> {
        let previous = self.object(h)?.owner;
        if previous == owner {
            return Ok(Vec::new());
        }
        if let Some(owner) = owner {
            let mut current = Some(owner);
            while let Some(o) = current {
                if o == h {
                    return Err(StoreError::OwnerCycle);
                }
                current = self.object(o)?.owner;
            }
        }
        self.tag_pass(h, |store| {
            if let Some(previous) = previous {
                store.object_mut(previous)?.owned.retain(|o| *o != h);
            }
            if let Some(owner) = owner {
                store.object_mut(owner)?.owned.push(h);
            }
            store.object_mut(h)?.owner = owner;
            Ok(())
        })
    }
}
