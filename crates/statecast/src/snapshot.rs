//! Plain-data views of a subtree, filtered by listener tags.

use std::collections::BTreeSet;

use serde_json::{Map, Value as Json};

use crate::store::{ContainerKind, Store};
use crate::value::{Handle, Value};

#[derive(Debug, Clone, Copy)]
pub struct SnapshotParams<'a> {
    /// Tags of the viewer.
    pub tags: &'a BTreeSet<String>,
    /// See everything regardless of tags.
    pub spy: bool,
    /// Evaluate every object in the subtree as if it carried these tags,
    /// used to reconstruct what a viewer saw before a tag change.
    pub object_tags: Option<&'a BTreeSet<String>>,
}

impl<'a> SnapshotParams<'a> {
    pub fn new(tags: &'a BTreeSet<String>) -> Self {
        Self {
            tags,
            spy: false,
            object_tags: None,
        }
    }

    pub fn spy(tags: &'a BTreeSet<String>) -> Self {
        Self {
            tags,
            spy: true,
            object_tags: None,
        }
    }

    pub fn with_object_tags(mut self, tags: &'a BTreeSet<String>) -> Self {
        self.object_tags = Some(tags);
        self
    }
}

pub fn intersects(a: &BTreeSet<String>, b: &BTreeSet<String>) -> bool {
    a.iter().any(|tag| b.contains(tag))
}

/// Snapshot of `value` as seen with `params`. `None` means the value is
/// undefined for this viewer: a private object it cannot see, or a dangling
/// link.
pub fn snapshot(store: &Store, value: &Value, params: SnapshotParams<'_>) -> Option<Json> {
    match value {
        Value::Ref(h) => snapshot_container(store, *h, params),
        primitive => primitive.to_json(),
    }
}

fn snapshot_container(store: &Store, h: Handle, params: SnapshotParams<'_>) -> Option<Json> {
    match store.kind(h).ok()? {
        ContainerKind::Object(_) => snapshot_object(store, h, params),
        ContainerKind::Array => {
            let items = store.elements(h).ok()?;
            Some(Json::Array(
                items
                    .iter()
                    .map(|item| snapshot(store, item, params).unwrap_or(Json::Null))
                    .collect(),
            ))
        }
        ContainerKind::Map => {
            let mut out = Map::new();
            for (key, item) in store.entries(h).ok()? {
                if let Some(json) = snapshot(store, item, params) {
                    out.insert(key.clone(), json);
                }
            }
            Some(Json::Object(out))
        }
        ContainerKind::Set => Some(Json::Array(
            store
                .members(h)
                .ok()?
                .values()
                .filter_map(Value::to_json)
                .collect(),
        )),
    }
}

fn snapshot_object(store: &Store, h: Handle, params: SnapshotParams<'_>) -> Option<Json> {
    let (desc, values) = store.object_fields(h).ok()?;
    let visible = params.spy
        || match params.object_tags {
            Some(tags) => intersects(params.tags, tags),
            None => store.tags(h).is_ok_and(|tags| intersects(params.tags, &tags)),
        };
    if desc.hidden && !visible {
        return None;
    }
    let mut out = Map::new();
    for (field, value) in desc.fields.iter().zip(values) {
        if field.hidden && !visible {
            continue;
        }
        if let Some(json) = value.as_ref().and_then(|v| snapshot(store, v, params)) {
            out.insert(field.key.clone(), json);
        }
    }
    Some(Json::Object(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::{FieldKind, TypeDef};
    use serde_json::json;

    fn tags(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn private_fields_need_matching_tags() {
        let mut store = Store::new();
        let ty = store
            .register(
                TypeDef::new("Hand")
                    .field("count", FieldKind::Number)
                    .private_field("cards", FieldKind::Any),
            )
            .expect("register");
        let h = store.create_object(ty).expect("object");
        store.set_field(h, "count", 2.into()).expect("count");
        store.set_field(h, "cards", "AK".into()).expect("cards");
        store.add_tags(h, ["p1"]).expect("tag");

        let stranger = tags(&["p2"]);
        let owner = tags(&["p1"]);
        assert_eq!(
            snapshot(&store, &h.into(), SnapshotParams::new(&stranger)),
            Some(json!({ "count": 2 }))
        );
        assert_eq!(
            snapshot(&store, &h.into(), SnapshotParams::new(&owner)),
            Some(json!({ "count": 2, "cards": "AK" }))
        );
        assert_eq!(
            snapshot(&store, &h.into(), SnapshotParams::spy(&stranger)),
            Some(json!({ "count": 2, "cards": "AK" }))
        );
        let old = tags(&["p2"]);
        assert_eq!(
            snapshot(&store, &h.into(), SnapshotParams::new(&stranger).with_object_tags(&old)),
            Some(json!({ "count": 2, "cards": "AK" }))
        );
    }

    #[test]
    fn hidden_objects_vanish_from_maps_and_null_in_arrays() {
        let mut store = Store::new();
        let secret = store
            .register(TypeDef::new("Secret").private().field("v", FieldKind::Number))
            .expect("register");
        let s = store.create_object(secret).expect("secret");
        store.set_field(s, "v", 1.into()).expect("v");
        let map = store.create_map([("s", Value::Ref(s)), ("n", Value::Int(3))]).expect("map");
        let s2 = store.create_object(secret).expect("secret 2");
        let arr = store.create_array(vec![s2.into(), "x".into()]).expect("array");

        let none = BTreeSet::new();
        assert_eq!(
            snapshot(&store, &map.into(), SnapshotParams::new(&none)),
            Some(json!({ "n": 3 }))
        );
        assert_eq!(
            snapshot(&store, &arr.into(), SnapshotParams::new(&none)),
            Some(json!([null, "x"]))
        );
        assert_eq!(snapshot(&store, &s.into(), SnapshotParams::new(&none)), None);
    }

    #[test]
    fn sets_snapshot_as_arrays() {
        let mut store = Store::new();
        let set = store.create_set(vec!["a".into(), 1.into()]).expect("set");
        let none = BTreeSet::new();
        assert_eq!(
            snapshot(&store, &set.into(), SnapshotParams::new(&none)),
            Some(json!(["a", 1]))
        );
    }
}
