//! Change tracking for trees of mutable objects.
//!
//! A [`StateTree`] owns an arena [`Store`] of typed objects, arrays, maps and
//! sets. Once a root object is tracked, every mutation is turned into a
//! JSON-Patch-like [`Patch`] and delivered to listeners, each of which only
//! sees the private data its tags unlock. With the schema codec enabled,
//! every patch also carries a compact binary encoding that addresses nodes
//! and fields by integer ids instead of string paths.
//!
//! ```
//! use statecast::{FieldKind, PatchOptions, StateTree, TrackerOptions, TypeDef};
//! use std::{cell::RefCell, rc::Rc};
//!
//! let mut tree = StateTree::new();
//! let player = tree
//!     .register(TypeDef::new("Player").field("name", FieldKind::String).private_field("hand", FieldKind::Any))
//!     .unwrap();
//! let root = tree.create_object(player).unwrap();
//! tree.track(root, TrackerOptions::default()).unwrap();
//!
//! let seen = Rc::new(RefCell::new(Vec::new()));
//! let sink = seen.clone();
//! tree.on_patch(move |patch, _, _| sink.borrow_mut().push(patch.path.clone()), PatchOptions::default())
//!     .unwrap();
//!
//! tree.set_field(root, "name", "ann").unwrap();
//! tree.set_field(root, "hand", 3).unwrap();
//! assert_eq!(*seen.borrow(), vec!["/name".to_string()]);
//! ```

pub mod error;
pub mod meta;
pub mod options;
pub mod patch;
pub mod schema;
pub mod snapshot;
pub mod store;
pub mod tracker;
mod tree;
pub mod value;

pub use error::{CodecError, StoreError, TrackError};
pub use meta::{FieldDescriptor, FieldKind, TypeDef, TypeDescriptor, TypeId, TypeRegistry};
pub use options::{PatchOptions, SnapshotOptions, TrackerOptions};
pub use patch::{Op, Patch};
pub use schema::{EncodeHints, SchemaCodec, SchemaDecoder, SchemaTables};
pub use snapshot::{snapshot, SnapshotParams};
pub use store::{Change, ContainerKind, Store, Subscription, TagsChange};
pub use tracker::{Disposer, PatchHandler, TrackedNode, Tracker};
pub use tree::StateTree;
pub use value::{Handle, Value};
