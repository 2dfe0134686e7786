mod common;

use common::{record, Log};
use proptest::prelude::*;
use serde_json::json;
use statecast::{
    CodecError, FieldKind, Handle, Op, PatchOptions, SchemaDecoder, SnapshotOptions, StateTree, TrackError,
    TrackerOptions, TypeDef, TypeId, Value,
};
use statecast_pack::{PackError, PackValue, MAX_DEPTH};

struct Session {
    tree: StateTree,
    item: TypeId,
    root: Handle,
    items: Handle,
}

fn session() -> Session {
    let mut tree = StateTree::new();
    let item = tree
        .register(TypeDef::new("Item").field("name", FieldKind::String))
        .expect("item");
    let doc = tree
        .register(
            TypeDef::new("Doc")
                .field("title", FieldKind::String)
                .private_field("secret", FieldKind::Any)
                .field("items", FieldKind::array_of(FieldKind::Object(item)))
                .field("m", FieldKind::map_of(FieldKind::Any))
                .field("s", FieldKind::set_of(FieldKind::String)),
        )
        .expect("doc");
    let root = tree.create_object(doc).expect("root");
    let items = tree.create_array(Vec::new()).expect("items");
    tree.set_field(root, "items", items).expect("items");
    tree.track(root, TrackerOptions::default().schema(true)).expect("track");
    Session { tree, item, root, items }
}

fn named(tree: &mut StateTree, ty: TypeId, name: &str) -> Handle {
    let h = tree.create_object(ty).expect("object");
    tree.set_field(h, "name", name).expect("name");
    h
}

/// Decodes every recorded patch and checks it against the original.
fn replay(decoder: &mut SchemaDecoder, log: &Log) {
    for patch in log.borrow().iter() {
        let encoded = patch.encoded.as_deref().expect("encoded patch");
        let decoded = decoder.decode_patch(encoded).expect("decode");
        assert_eq!(decoded, patch.without_encoding(), "patch at {}", patch.path);
    }
}

fn frame(values: Vec<PackValue>) -> Vec<u8> {
    statecast_pack::encode(&PackValue::Array(values))
}

#[test]
fn decoders_reproduce_every_patch() {
    let Session {
        mut tree,
        item,
        root,
        items,
    } = session();
    let mut spy_decoder = tree.decoder().expect("decoder");
    let mut tagged_decoder = tree.decoder().expect("decoder");
    let spy = record(&mut tree, PatchOptions::default().spy().reversible(true));
    let tagged = record(&mut tree, PatchOptions::default().tag("1").reversible(true));

    tree.set_field(root, "title", "t").expect("title");
    tree.add_tag(root, "1").expect("tag");
    tree.set_field(root, "secret", "s").expect("secret");

    let a = named(&mut tree, item, "A");
    let b = named(&mut tree, item, "B");
    let c = named(&mut tree, item, "C");
    tree.splice(items, 0, 0, vec![a.into(), b.into(), c.into()]).expect("fill");
    tree.splice(items, 0, 1, Vec::new()).expect("shift");
    let d = named(&mut tree, item, "D");
    tree.push(items, d).expect("push");
    tree.set_field(b, "name", "B2").expect("rename");

    let m = tree.create_map([("x", Value::Int(1))]).expect("map");
    tree.set_field(root, "m", m).expect("m");
    tree.map_set(m, "y/z", 2).expect("map set");
    tree.map_delete(m, "x").expect("map delete");

    let s = tree.create_set([Value::from("a")]).expect("set");
    tree.set_field(root, "s", s).expect("s");
    tree.set_add(s, "b").expect("set add");
    tree.set_delete(s, "a").expect("set delete");

    tree.delete_tag(root, "1").expect("untag");
    tree.unset_field(root, "title").expect("unset");
    let e = named(&mut tree, item, "E");
    let fresh = tree.create_array(vec![e.into()]).expect("fresh");
    tree.set_field(root, "items", fresh).expect("swap items");

    assert!(spy.borrow().iter().any(|p| p.path.starts_with("/_/nodes")));
    assert!(tagged.borrow().iter().any(|p| p.path == "/secret" && p.op == Op::Remove));
    replay(&mut spy_decoder, &spy);
    replay(&mut tagged_decoder, &tagged);

    let current = tree.decoder().expect("decoder");
    assert_eq!(spy_decoder.tables(), current.tables());
    assert_eq!(tagged_decoder.tables(), current.tables());
    assert!(!tree.tracker().expect("tracker").is_tracked(c));
}

#[test]
fn snapshots_round_trip_through_the_schema() {
    let Session {
        mut tree,
        item,
        root,
        items,
    } = session();
    tree.set_field(root, "title", "t").expect("title");
    tree.set_field(root, "secret", 7).expect("secret");
    tree.add_tag(root, "1").expect("tag");
    let a = named(&mut tree, item, "A");
    tree.push(items, a).expect("push");
    let m = tree.create_map([("k", Value::from("v"))]).expect("map");
    tree.set_field(root, "m", m).expect("m");

    let schema = tree.schema_snapshot().expect("schema");
    let decoder = SchemaDecoder::from_schema(&schema).expect("bootstrap");
    assert_eq!(decoder.tables(), tree.decoder().expect("decoder").tables());

    for options in [
        SnapshotOptions::default(),
        SnapshotOptions::default().tags(["1"]),
        SnapshotOptions::default().spy(),
    ] {
        let bytes = tree.encode_snapshot(&options).expect("encode");
        let expected = tree.snapshot(&options).expect("snapshot");
        assert_eq!(decoder.decode_snapshot(&bytes).expect("decode"), expected);
    }
    assert_eq!(
        tree.snapshot(&SnapshotOptions::default()).expect("snapshot"),
        Some(json!({ "title": "t", "items": [{ "name": "A" }], "m": { "k": "v" } }))
    );
}

#[test]
fn types_registered_later_extend_the_schema() {
    let mut tree = StateTree::new();
    tree.register(TypeDef::new("A").field("x", FieldKind::Number))
        .expect("a");
    let b = tree
        .register(TypeDef::new("B").field("y", FieldKind::Any))
        .expect("b");
    let root = tree.create_object(b).expect("root");
    tree.track(root, TrackerOptions::default().schema(true)).expect("track");
    let mut decoder = tree.decoder().expect("decoder");
    let log = record(&mut tree, PatchOptions::default());

    let r = tree
        .register(TypeDef::new("R").field("z", FieldKind::String))
        .expect("r");
    let child = tree.create_object(r).expect("child");
    tree.set_field(child, "z", "deep").expect("z");
    tree.set_field(root, "y", child).expect("y");

    let patches = log.borrow().clone();
    assert_eq!(patches[0].op, Op::Add);
    assert_eq!(patches[0].path, "/_/types/2");
    assert_eq!(patches[0].value, Some(json!(["R", "z"])));
    replay(&mut decoder, &log);
    assert_eq!(
        tree.schema_snapshot().expect("schema")["types"],
        json!([["A", "x"], ["B", "y"], ["R", "z"]])
    );
    assert_eq!(patches.last().map(|p| p.value.clone()), Some(Some(json!({ "z": "deep" }))));
}

#[test]
fn malformed_frames_are_rejected() {
    let Session { tree, .. } = session();
    let mut decoder = tree.decoder().expect("decoder");
    let root = decoder.tables().root().expect("root").id as i64;

    let trailing = frame(vec![
        PackValue::Integer(0),
        PackValue::Integer(root),
        PackValue::Integer(0),
        PackValue::Integer(1),
        PackValue::Integer(2),
    ]);
    assert_eq!(decoder.decode_patch(&trailing), Err(CodecError::TrailingValues(1)));

    let unknown = frame(vec![
        PackValue::Integer(0),
        PackValue::Integer(999),
        PackValue::Integer(0),
        PackValue::Integer(1),
    ]);
    assert!(matches!(decoder.decode_patch(&unknown), Err(CodecError::SchemaMismatch(_))));

    let mut extra = frame(vec![PackValue::Integer(2), PackValue::Integer(root), PackValue::Integer(0)]);
    let valid = decoder.decode_patch(&extra).expect("valid removal");
    assert_eq!(valid.path, "/title");
    extra.push(0xc0);
    assert_eq!(
        decoder.decode_patch(&extra),
        Err(CodecError::Pack(PackError::TrailingBytes(1)))
    );

    let opcode = frame(vec![PackValue::Integer(7), PackValue::Integer(root), PackValue::Integer(0)]);
    assert_eq!(decoder.decode_patch(&opcode), Err(CodecError::InvalidOpcode(7)));
}

#[test]
fn codec_requires_the_schema_option() {
    let mut tree = StateTree::new();
    let ty = tree.register(TypeDef::new("Plain")).expect("register");
    let root = tree.create_object(ty).expect("root");
    tree.track(root, TrackerOptions::default()).expect("track");
    assert!(matches!(tree.decoder(), Err(TrackError::SchemaDisabled)));
    assert!(matches!(
        tree.encode_snapshot(&SnapshotOptions::default()),
        Err(TrackError::SchemaDisabled)
    ));
}

#[test]
fn nested_node_extensions_are_bounded() {
    let Session { tree, .. } = session();
    let mut decoder = tree.decoder().expect("decoder");
    let root = decoder.tables().root().expect("root").id as i64;

    let mut value = PackValue::Null;
    for _ in 0..2_000 {
        let wrapped = statecast_pack::encode(&PackValue::Array(vec![
            PackValue::Integer(root),
            PackValue::Array(vec![value]),
        ]));
        value = PackValue::Extension(1, wrapped);
    }
    let nested = frame(vec![
        PackValue::Integer(0),
        PackValue::Integer(root),
        PackValue::Integer(0),
        value,
    ]);
    assert_eq!(
        decoder.decode_patch(&nested),
        Err(CodecError::Pack(PackError::TooDeep(MAX_DEPTH)))
    );
}

#[test]
fn hidden_roots_encode_as_undefined() {
    let mut tree = StateTree::new();
    let vault = tree
        .register(TypeDef::new("Vault").field("gold", FieldKind::Number).private())
        .expect("vault");
    let root = tree.create_object(vault).expect("root");
    tree.set_field(root, "gold", 3).expect("gold");
    tree.add_tag(root, "owner").expect("tag");
    tree.track(root, TrackerOptions::default().schema(true)).expect("track");
    let decoder = tree.decoder().expect("decoder");

    let hidden = tree
        .encode_snapshot(&SnapshotOptions::default())
        .expect("hidden root");
    assert_eq!(hidden, vec![0xc1]);
    assert_eq!(decoder.decode_snapshot(&hidden), Ok(None));

    let shown = tree
        .encode_snapshot(&SnapshotOptions::default().tags(["owner"]))
        .expect("visible root");
    assert_eq!(decoder.decode_snapshot(&shown), Ok(Some(json!({ "gold": 3 }))));
}

const KEYS: [&str; 3] = ["a", "b/c", "~d"];

#[derive(Debug, Clone)]
enum Step {
    Title(String),
    Secret(i64),
    Push(String),
    Shift,
    Rename(String),
    MapSet(usize, i64),
    MapDelete(usize),
    SetAdd(usize),
    SetDelete(usize),
    Tag,
    Untag,
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        "[a-z]{0,6}".prop_map(Step::Title),
        any::<i64>().prop_map(Step::Secret),
        "[a-z]{1,6}".prop_map(Step::Push),
        Just(Step::Shift),
        "[a-z]{1,6}".prop_map(Step::Rename),
        (0..KEYS.len(), any::<i64>()).prop_map(|(k, v)| Step::MapSet(k, v)),
        (0..KEYS.len()).prop_map(Step::MapDelete),
        (0..KEYS.len()).prop_map(Step::SetAdd),
        (0..KEYS.len()).prop_map(Step::SetDelete),
        Just(Step::Tag),
        Just(Step::Untag),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 48, .. ProptestConfig::default() })]

    #[test]
    fn every_patch_stream_decodes(steps in proptest::collection::vec(step(), 1..40)) {
        let Session {
            mut tree,
            item,
            root,
            items,
        } = session();
        let m = tree.create_map(Vec::<(String, Value)>::new()).expect("map");
        let s = tree.create_set(Vec::new()).expect("set");
        tree.set_field(root, "m", m).expect("m");
        tree.set_field(root, "s", s).expect("s");

        let mut decoders = Vec::new();
        for options in [
            PatchOptions::default().spy().reversible(true),
            PatchOptions::default().tag("1").reversible(true),
            PatchOptions::default(),
        ] {
            let decoder = tree.decoder().expect("decoder");
            decoders.push((decoder, record(&mut tree, options)));
        }

        for step in steps {
            let first = tree.store().elements(items).expect("items").first().and_then(Value::handle);
            let applied = match step {
                Step::Title(title) => tree.set_field(root, "title", title),
                Step::Secret(n) => tree.set_field(root, "secret", n),
                Step::Push(name) => {
                    let h = named(&mut tree, item, &name);
                    tree.push(items, h)
                }
                Step::Shift => tree.splice(items, 0, 1, Vec::new()),
                Step::Rename(name) => match first {
                    Some(h) => tree.set_field(h, "name", name),
                    None => Ok(()),
                },
                Step::MapSet(k, v) => tree.map_set(m, KEYS[k], v),
                Step::MapDelete(k) => tree.map_delete(m, KEYS[k]),
                Step::SetAdd(k) => tree.set_add(s, KEYS[k]),
                Step::SetDelete(k) => tree.set_delete(s, KEYS[k]),
                Step::Tag => tree.add_tag(root, "1"),
                Step::Untag => tree.delete_tag(root, "1"),
            };
            applied.expect("step");
        }

        let current = tree.decoder().expect("decoder");
        for (decoder, log) in &mut decoders {
            replay(decoder, log);
            prop_assert_eq!(decoder.tables(), current.tables());
        }
    }
}
