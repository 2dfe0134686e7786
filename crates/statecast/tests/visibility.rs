mod common;

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use common::{add, record, remove, replace, take};
use serde_json::json;
use statecast::{
    Disposer, FieldKind, Op, Patch, PatchOptions, SnapshotOptions, StateTree, TrackerOptions, TypeDef, Value,
};

#[test]
fn private_fields_follow_tags() {
    let mut tree = StateTree::new();
    let game = tree
        .register(
            TypeDef::new("Game")
                .field("title", FieldKind::String)
                .private_field("secret", FieldKind::Any),
        )
        .expect("register");
    let root = tree.create_object(game).expect("root");
    tree.track(root, TrackerOptions::default()).expect("track");
    let public = record(&mut tree, PatchOptions::default());
    let insider = record(&mut tree, PatchOptions::default().tag("1"));
    let spy = record(&mut tree, PatchOptions::default().spy());

    tree.add_tag(root, "1").expect("tag");
    tree.set_field(root, "title", "t").expect("title");
    tree.set_field(root, "secret", 42).expect("secret");
    tree.delete_tag(root, "1").expect("untag");

    assert_eq!(take(&public), vec![add("/title", json!("t"))]);
    assert_eq!(
        take(&insider),
        vec![add("/title", json!("t")), add("/secret", json!(42)), remove("/secret")]
    );
    assert_eq!(take(&spy), vec![add("/title", json!("t")), add("/secret", json!(42))]);

    let seen = tree
        .snapshot(&SnapshotOptions::default().tags(["1"]))
        .expect("snapshot");
    assert_eq!(seen, Some(json!({ "title": "t" })));
    let everything = tree.snapshot(&SnapshotOptions::default().spy()).expect("snapshot");
    assert_eq!(everything, Some(json!({ "title": "t", "secret": 42 })));
}

#[test]
fn computed_fields_respect_privacy() {
    let mut tree = StateTree::new();
    let counter = tree
        .register(
            TypeDef::new("Counter")
                .field("n", FieldKind::Number)
                .computed("comp", |store, h| match store.field(h, "n") {
                    Ok(Some(Value::Int(n))) => Value::Int(n * 2),
                    _ => Value::Null,
                })
                .private_computed("pcomp", |store, h| match store.field(h, "n") {
                    Ok(Some(Value::Int(n))) => Value::Int(n * 3),
                    _ => Value::Null,
                }),
        )
        .expect("register");
    let root = tree.create_object(counter).expect("root");
    tree.add_tag(root, "1").expect("tag");
    tree.track(root, TrackerOptions::default()).expect("track");
    let public = record(&mut tree, PatchOptions::default());
    let insider = record(&mut tree, PatchOptions::default().tag("1"));

    tree.set_field(root, "n", 2).expect("n");

    assert_eq!(
        take(&public),
        vec![add("/n", json!(2)), replace("/comp", json!(4))]
    );
    assert_eq!(
        take(&insider),
        vec![add("/n", json!(2)), replace("/comp", json!(4)), replace("/pcomp", json!(6))]
    );
    assert!(tree.set_field(root, "comp", 1).is_err());
}

#[test]
fn private_objects_in_arrays_keep_positions() {
    let mut tree = StateTree::new();
    let card = tree
        .register(TypeDef::new("Card").private().field("face", FieldKind::Number))
        .expect("card");
    let hand = tree
        .register(TypeDef::new("Hand").field("cards", FieldKind::array_of(FieldKind::Object(card))))
        .expect("hand");
    let root = tree.create_object(hand).expect("root");
    let cards = tree.create_array(Vec::new()).expect("cards");
    tree.set_field(root, "cards", cards).expect("link");
    tree.add_tag(root, "1").expect("tag");
    tree.track(root, TrackerOptions::default()).expect("track");
    let public = record(&mut tree, PatchOptions::default());
    let insider = record(&mut tree, PatchOptions::default().tag("1"));

    let c1 = tree.create_object(card).expect("c1");
    tree.set_field(c1, "face", 7).expect("face");
    tree.push(cards, c1).expect("push");
    tree.set_field(c1, "face", 8).expect("face again");

    assert_eq!(take(&public), vec![Patch::new(Op::Add, "/cards/0")]);
    assert_eq!(
        take(&insider),
        vec![add("/cards/0", json!({ "face": 7 })), replace("/cards/0/face", json!(8))]
    );
    assert_eq!(
        tree.snapshot(&SnapshotOptions::default()).expect("snapshot"),
        Some(json!({ "cards": [null] }))
    );
}

fn map_value_becomes_visible(private_map_value_patch: bool) -> Vec<Patch> {
    let mut tree = StateTree::new();
    let secret = tree
        .register(TypeDef::new("Secret").private().field("v", FieldKind::Number))
        .expect("secret");
    let holder = tree
        .register(TypeDef::new("Holder").field("m", FieldKind::map_of(FieldKind::Any)))
        .expect("holder");
    let root = tree.create_object(holder).expect("root");
    let m = tree.create_map(Vec::<(String, Value)>::new()).expect("map");
    tree.set_field(root, "m", m).expect("link");
    let options = TrackerOptions::default().private_map_value_patch(private_map_value_patch);
    tree.track(root, options).expect("track");
    let listener = record(&mut tree, PatchOptions::default().tag("1"));

    let s = tree.create_object(secret).expect("s");
    tree.set_field(s, "v", 1).expect("v");
    tree.map_set(m, "private", s).expect("map set");
    assert!(take(&listener).is_empty());
    assert_eq!(
        tree.snapshot(&SnapshotOptions::default().tags(["1"])).expect("snapshot"),
        Some(json!({ "m": {} }))
    );

    tree.add_tag(root, "1").expect("tag");
    take(&listener)
}

#[test]
fn map_value_is_replaced_when_tags_arrive() {
    assert_eq!(
        map_value_becomes_visible(false),
        vec![replace("/m/private", json!({ "v": 1 }))]
    );
}

#[test]
fn map_value_is_added_in_map_value_mode() {
    assert_eq!(
        map_value_becomes_visible(true),
        vec![add("/m/private", json!({ "v": 1 }))]
    );
}

#[test]
fn reparenting_moves_private_fields_between_clients() {
    let mut tree = StateTree::new();
    let client = tree
        .register(TypeDef::new("Client").field("name", FieldKind::String))
        .expect("client");
    let data = tree
        .register(TypeDef::new("DataObject").private_field("data", FieldKind::Any))
        .expect("data");
    let game = tree
        .register(
            TypeDef::new("Game")
                .field("clients", FieldKind::array_of(FieldKind::Object(client)))
                .field("item", FieldKind::Object(data)),
        )
        .expect("game");

    let a = tree.create_object(client).expect("a");
    let b = tree.create_object(client).expect("b");
    tree.add_tag(a, "1").expect("tag a");
    tree.add_tag(b, "2").expect("tag b");
    let o = tree.create_object(data).expect("o");
    tree.set_field(o, "data", "x").expect("data");
    tree.set_owner(o, Some(a)).expect("owner a");
    let root = tree.create_object(game).expect("root");
    let clients = tree.create_array(vec![a.into(), b.into()]).expect("clients");
    tree.set_field(root, "clients", clients).expect("clients");
    tree.set_field(root, "item", o).expect("item");
    tree.track(root, TrackerOptions::default()).expect("track");
    let first = record(&mut tree, PatchOptions::default().tag("1"));
    let second = record(&mut tree, PatchOptions::default().tag("2"));

    tree.set_owner(o, Some(b)).expect("owner b");

    assert_eq!(take(&first), vec![remove("/item/data")]);
    assert_eq!(take(&second), vec![add("/item/data", json!("x"))]);
    assert_eq!(tree.store().owner(o), Ok(Some(b)));
}

#[test]
fn reversible_listeners_get_old_values() {
    let mut tree = StateTree::new();
    let ty = tree
        .register(TypeDef::new("Doc").field("title", FieldKind::String))
        .expect("register");
    let root = tree.create_object(ty).expect("root");
    tree.track(root, TrackerOptions::default()).expect("track");
    let reversible = record(&mut tree, PatchOptions::default().reversible(true));
    let plain = record(&mut tree, PatchOptions::default());

    tree.set_field(root, "title", "a").expect("a");
    tree.set_field(root, "title", "b").expect("b");
    tree.unset_field(root, "title").expect("unset");

    assert_eq!(
        take(&reversible),
        vec![
            add("/title", json!("a")),
            replace("/title", json!("b")).with_old_value(Some(json!("a"))),
            remove("/title").with_old_value(Some(json!("b"))),
        ]
    );
    assert_eq!(
        take(&plain),
        vec![add("/title", json!("a")), replace("/title", json!("b")), remove("/title")]
    );
}

#[test]
fn tracker_default_reversibility_applies_to_listeners() {
    let mut tree = StateTree::new();
    let ty = tree
        .register(TypeDef::new("Doc").field("n", FieldKind::Number))
        .expect("register");
    let root = tree.create_object(ty).expect("root");
    tree.set_field(root, "n", 1).expect("n");
    tree.track(root, TrackerOptions::default().reversible(true)).expect("track");
    let inherits = record(&mut tree, PatchOptions::default());
    let opts_out = record(&mut tree, PatchOptions::default().reversible(false));

    tree.set_field(root, "n", 2).expect("n");

    assert_eq!(
        take(&inherits),
        vec![replace("/n", json!(2)).with_old_value(Some(json!(1)))]
    );
    assert_eq!(take(&opts_out), vec![replace("/n", json!(2))]);
}

#[test]
fn tag_changes_are_idempotent() {
    let mut tree = StateTree::new();
    let ty = tree
        .register(TypeDef::new("Vault").private_field("secret", FieldKind::String))
        .expect("register");
    let root = tree.create_object(ty).expect("root");
    tree.set_field(root, "secret", "s").expect("secret");
    tree.track(root, TrackerOptions::default()).expect("track");
    let listener = record(&mut tree, PatchOptions::default().tag("1"));

    tree.add_tag(root, "1").expect("tag");
    tree.add_tag(root, "1").expect("tag again");
    tree.delete_tag(root, "2").expect("absent tag");
    tree.delete_tag(root, "1").expect("untag");
    tree.delete_tag(root, "1").expect("untag again");

    assert_eq!(take(&listener), vec![add("/secret", json!("s")), remove("/secret")]);
}

#[test]
fn disposal_during_dispatch_applies_to_next_event() {
    let mut tree = StateTree::new();
    let ty = tree
        .register(TypeDef::new("Doc").field("n", FieldKind::Number))
        .expect("register");
    let root = tree.create_object(ty).expect("root");
    tree.track(root, TrackerOptions::default()).expect("track");

    let slot: Rc<RefCell<Option<Disposer>>> = Rc::default();
    let calls = Rc::new(Cell::new(0));
    let (target, counter) = (slot.clone(), calls.clone());
    tree.on_patch(
        move |_, _, _| {
            counter.set(counter.get() + 1);
            if let Some(disposer) = target.borrow().as_ref() {
                disposer.dispose();
            }
        },
        PatchOptions::default(),
    )
    .expect("first");
    let later: common::Log = Rc::default();
    let sink = later.clone();
    let disposer = tree
        .on_patch(move |patch, _, _| sink.borrow_mut().push(patch.clone()), PatchOptions::default())
        .expect("second");
    *slot.borrow_mut() = Some(disposer.clone());

    tree.set_field(root, "n", 1).expect("first event");
    tree.set_field(root, "n", 2).expect("second event");

    assert_eq!(calls.get(), 2);
    assert_eq!(take(&later), vec![add("/n", json!(1))]);
    assert!(!disposer.is_active());
}

#[test]
fn op_filters_limit_delivery() {
    let mut tree = StateTree::new();
    let ty = tree
        .register(TypeDef::new("Doc").field("n", FieldKind::Number))
        .expect("register");
    let root = tree.create_object(ty).expect("root");
    tree.track(root, TrackerOptions::default()).expect("track");
    let removals = record(&mut tree, PatchOptions::default().only(Op::Remove));

    tree.set_field(root, "n", 1).expect("add");
    tree.set_field(root, "n", 2).expect("replace");
    tree.unset_field(root, "n").expect("remove");

    assert_eq!(take(&removals), vec![remove("/n")]);
}

#[test]
fn handlers_receive_container_and_root() {
    let mut tree = StateTree::new();
    let item = tree
        .register(TypeDef::new("Item").field("name", FieldKind::String))
        .expect("item");
    let doc = tree
        .register(TypeDef::new("Doc").field("item", FieldKind::Object(item)))
        .expect("doc");
    let root = tree.create_object(doc).expect("root");
    let child = tree.create_object(item).expect("child");
    tree.set_field(root, "item", child).expect("link");
    tree.track(root, TrackerOptions::default()).expect("track");

    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    tree.on_patch(
        move |patch, object, root| sink.borrow_mut().push((patch.path.clone(), object, root)),
        PatchOptions::default(),
    )
    .expect("listener");
    tree.set_field(child, "name", "n").expect("name");

    assert_eq!(*seen.borrow(), vec![("/item/name".to_string(), Some(child), root)]);
}

#[test]
fn implicit_ownership_changes_reach_listeners() {
    let mut tree = StateTree::new();
    let card = tree
        .register(TypeDef::new("Card").private_field("data", FieldKind::Any))
        .expect("card");
    let seat = tree.register(TypeDef::new("Seat")).expect("seat");
    let table = tree
        .register(
            TypeDef::new("Table")
                .field("x", FieldKind::Object(seat))
                .field("y", FieldKind::Object(card)),
        )
        .expect("table");
    let root = tree.create_object(table).expect("root");
    tree.add_tag(root, "r").expect("tag");
    let x = tree.create_object(seat).expect("x");
    let y = tree.create_object(card).expect("y");
    tree.set_field(y, "data", "secret").expect("data");
    tree.set_owner(y, Some(x)).expect("owner");
    tree.set_field(root, "y", y).expect("y");
    tree.track(root, TrackerOptions::default()).expect("track");
    let member = record(&mut tree, PatchOptions::default().tag("r"));
    let view = SnapshotOptions::default().tags(["r"]);
    assert_eq!(tree.snapshot(&view).expect("snapshot"), Some(json!({ "y": {} })));

    // x enters the tree and picks up the root's tags, and so does y.
    tree.set_field(root, "x", x).expect("x");
    assert_eq!(
        take(&member),
        vec![add("/x", json!({})), add("/y/data", json!("secret"))]
    );
    assert_eq!(
        tree.snapshot(&view).expect("snapshot"),
        Some(json!({ "x": {}, "y": { "data": "secret" } }))
    );

    tree.unset_field(root, "x").expect("unset");
    assert_eq!(take(&member), vec![remove("/x"), remove("/y/data")]);
    assert_eq!(tree.snapshot(&view).expect("snapshot"), Some(json!({ "y": {} })));
    assert_eq!(tree.store().owner(x), Ok(None));
}
