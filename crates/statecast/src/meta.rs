//! Field descriptor registry.
//!
//! Types are declared with the [`TypeDef`] builder and registered once in a
//! [`TypeRegistry`]. Registration order fixes the type id, and a type's
//! field list never changes afterwards.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use serde_json::{json, Map, Value as Json};

use crate::error::StoreError;
use crate::store::Store;
use crate::value::{Handle, Value};

/// Index of a registered type, assigned in registration order.
pub type TypeId = usize;

/// Computes a derived field from the current state of the store.
pub type ComputeFn = Rc<dyn Fn(&Store, Handle) -> Value>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    Any,
    String,
    Number,
    Boolean,
    Object(TypeId),
    Array(Box<FieldKind>),
    Map(Box<FieldKind>),
    Set(Box<FieldKind>),
}

impl FieldKind {
    pub fn array_of(kind: FieldKind) -> Self {
        FieldKind::Array(Box::new(kind))
    }

    pub fn map_of(kind: FieldKind) -> Self {
        FieldKind::Map(Box::new(kind))
    }

    pub fn set_of(kind: FieldKind) -> Self {
        FieldKind::Set(Box::new(kind))
    }

    fn describe(&self, registry: &TypeRegistry) -> Json {
        let name = |ty: TypeId| {
            registry
                .get(ty)
                .map_or_else(|| format!("#{ty}"), |d| d.name.clone())
        };
        match self {
            FieldKind::Any => json!("any"),
            FieldKind::String => json!("string"),
            FieldKind::Number => json!("number"),
            FieldKind::Boolean => json!("boolean"),
            FieldKind::Object(ty) => json!(name(*ty)),
            FieldKind::Array(items) => json!({ "type": "array", "items": items.describe(registry) }),
            FieldKind::Map(items) => json!({ "type": "map", "items": items.describe(registry) }),
            FieldKind::Set(items) => json!({ "type": "set", "items": items.describe(registry) }),
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKind::Any => f.write_str("any value"),
            FieldKind::String => f.write_str("a string"),
            FieldKind::Number => f.write_str("a number"),
            FieldKind::Boolean => f.write_str("a boolean"),
            FieldKind::Object(ty) => write!(f, "an object of type #{ty}"),
            FieldKind::Array(_) => f.write_str("an array"),
            FieldKind::Map(_) => f.write_str("a map"),
            FieldKind::Set(_) => f.write_str("a set"),
        }
    }
}

/// One declared field of a type.
#[derive(Clone)]
pub struct FieldDescriptor {
    pub key: String,
    pub kind: FieldKind,
    /// Visible only to listeners whose tags meet the object's tags.
    pub hidden: bool,
    /// Derived fields are recomputed after every mutation and cannot be
    /// assigned.
    pub computed: Option<ComputeFn>,
}

impl FieldDescriptor {
    pub fn is_computed(&self) -> bool {
        self.computed.is_some()
    }
}

impl fmt::Debug for FieldDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("key", &self.key)
            .field("kind", &self.kind)
            .field("hidden", &self.hidden)
            .field("computed", &self.is_computed())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct TypeDescriptor {
    pub id: TypeId,
    pub name: String,
    /// Instances are private as a whole.
    pub hidden: bool,
    pub parent: Option<TypeId>,
    pub fields: Rc<[FieldDescriptor]>,
    /// Fields that can be written but never produce patches.
    pub observables: Vec<String>,
}

impl TypeDescriptor {
    pub fn field_index(&self, key: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.key == key)
    }

    pub fn field(&self, key: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.key == key)
    }

    pub fn field_keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.key.as_str())
    }

    pub fn has_hidden_fields(&self) -> bool {
        self.fields.iter().any(|f| f.hidden)
    }
}

/// Builder for a [`TypeDescriptor`].
///
/// ```
/// use statecast::{FieldKind, TypeDef, TypeRegistry};
///
/// let mut registry = TypeRegistry::new();
/// let card = registry
///     .register(TypeDef::new("Card").private().field("face", FieldKind::Number))
///     .unwrap();
/// assert_eq!(registry.get(card).map(|d| d.hidden), Some(true));
/// ```
#[derive(Clone)]
pub struct TypeDef {
    name: String,
    hidden: Option<bool>,
    parent: Option<TypeId>,
    fields: Vec<FieldDescriptor>,
    observables: Vec<String>,
}

impl TypeDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hidden: None,
            parent: None,
            fields: Vec::new(),
            observables: Vec::new(),
        }
    }

    fn push(mut self, key: impl Into<String>, kind: FieldKind, hidden: bool, computed: Option<ComputeFn>) -> Self {
        let key = key.into();
        let desc = FieldDescriptor {
            key: key.clone(),
            kind,
            hidden,
            computed,
        };
        match self.fields.iter_mut().find(|f| f.key == key) {
            Some(existing) => *existing = desc,
            None => self.fields.push(desc),
        }
        self
    }

    pub fn field(self, key: impl Into<String>, kind: FieldKind) -> Self {
        self.push(key, kind, false, None)
    }

    pub fn private_field(self, key: impl Into<String>, kind: FieldKind) -> Self {
        self.push(key, kind, true, None)
    }

    pub fn computed<F>(self, key: impl Into<String>, compute: F) -> Self
    where
        F: Fn(&Store, Handle) -> Value + 'static,
    {
        self.push(key, FieldKind::Any, false, Some(Rc::new(compute)))
    }

    pub fn private_computed<F>(self, key: impl Into<String>, compute: F) -> Self
    where
        F: Fn(&Store, Handle) -> Value + 'static,
    {
        self.push(key, FieldKind::Any, true, Some(Rc::new(compute)))
    }

    /// Declares a writable field that is stored but never tracked.
    pub fn observable(mut self, key: impl Into<String>) -> Self {
        self.observables.push(key.into());
        self
    }

    /// Inherits the fields (first, in order) and privacy of `parent`.
    pub fn extends(mut self, parent: TypeId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn private(mut self) -> Self {
        self.hidden = Some(true);
        self
    }

    pub fn public(mut self) -> Self {
        self.hidden = Some(false);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    types: Vec<TypeDescriptor>,
    by_name: HashMap<String, TypeId>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, def: TypeDef) -> Result<TypeId, StoreError> {
        if self.by_name.contains_key(&def.name) {
            return Err(StoreError::DuplicateType(def.name));
        }
        let (mut fields, mut observables, inherited_hidden) = match def.parent {
            Some(parent) => {
                let parent = self.get(parent).ok_or(StoreError::UnknownType(parent))?;
                (parent.fields.to_vec(), parent.observables.clone(), parent.hidden)
            }
            None => (Vec::new(), Vec::new(), false),
        };
        for field in def.fields {
            match fields.iter_mut().find(|f| f.key == field.key) {
                Some(existing) => *existing = field,
                None => fields.push(field),
            }
        }
        for key in def.observables {
            if !observables.contains(&key) {
                observables.push(key);
            }
        }
        let id = self.types.len();
        self.by_name.insert(def.name.clone(), id);
        self.types.push(TypeDescriptor {
            id,
            name: def.name,
            hidden: def.hidden.unwrap_or(inherited_hidden),
            parent: def.parent,
            fields: fields.into(),
            observables,
        });
        Ok(id)
    }

    pub fn get(&self, id: TypeId) -> Option<&TypeDescriptor> {
        self.types.get(id)
    }

    pub fn by_name(&self, name: &str) -> Option<&TypeDescriptor> {
        self.by_name.get(name).and_then(|id| self.types.get(*id))
    }

    pub fn fields_of(&self, id: TypeId) -> Option<Rc<[FieldDescriptor]>> {
        self.get(id).map(|d| d.fields.clone())
    }

    /// True if `ty` is `ancestor` or derives from it.
    pub fn is_a(&self, ty: TypeId, ancestor: TypeId) -> bool {
        let mut current = Some(ty);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.get(id).and_then(|d| d.parent);
        }
        false
    }

    pub fn iter(&self) -> impl Iterator<Item = &TypeDescriptor> {
        self.types.iter()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// JSON description of every type: index, parent, field order and kinds.
    pub fn describe(&self) -> Json {
        let mut out = Map::new();
        for desc in &self.types {
            let mut schema = Map::new();
            for field in desc.fields.iter() {
                schema.insert(field.key.clone(), field.kind.describe(self));
            }
            let parent = desc
                .parent
                .and_then(|p| self.get(p))
                .map(|p| Json::String(p.name.clone()))
                .unwrap_or(Json::Null);
            out.insert(
                desc.name.clone(),
                json!({
                    "index": desc.id,
                    "parent": parent,
                    "props": desc.field_keys().collect::<Vec<_>>(),
                    "schema": schema,
                }),
            );
        }
        Json::Object(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extends_keeps_parent_fields_first() {
        let mut registry = TypeRegistry::new();
        let base = registry
            .register(
                TypeDef::new("Base")
                    .field("a", FieldKind::Any)
                    .private_field("b", FieldKind::Any),
            )
            .expect("register base");
        let derived = registry
            .register(TypeDef::new("Derived").extends(base).private().field("c", FieldKind::Number))
            .expect("register derived");
        let desc = registry.get(derived).expect("derived");
        assert_eq!(desc.field_keys().collect::<Vec<_>>(), vec!["a", "b", "c"]);
        assert!(desc.hidden);
        assert!(registry.is_a(derived, base));
        assert!(!registry.is_a(base, derived));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut registry = TypeRegistry::new();
        registry.register(TypeDef::new("A")).expect("first");
        assert_eq!(
            registry.register(TypeDef::new("A")),
            Err(StoreError::DuplicateType("A".into()))
        );
    }

    #[test]
    fn describe_lists_props_in_order() {
        let mut registry = TypeRegistry::new();
        let item = registry.register(TypeDef::new("Item")).expect("item");
        registry
            .register(
                TypeDef::new("Bag")
                    .field("items", FieldKind::array_of(FieldKind::Object(item)))
                    .field("count", FieldKind::Number),
            )
            .expect("bag");
        let described = registry.describe();
        assert_eq!(described["Bag"]["index"], json!(1));
        assert_eq!(described["Bag"]["props"], json!(["items", "count"]));
        assert_eq!(
            described["Bag"]["schema"]["items"],
            json!({ "type": "array", "items": "Item" })
        );
    }
}
