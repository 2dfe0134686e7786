//! Patch listener registrations.

use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use std::rc::Rc;

use tracing::trace;

use crate::patch::{Op, Patch};
use crate::snapshot::{intersects, SnapshotParams};
use crate::value::Handle;

/// Receives `(patch, mutated container, root)`. The container is `None` for
/// schema patches.
pub type PatchHandler = Box<dyn FnMut(&Patch, Option<Handle>, Handle)>;

pub(crate) struct Listener {
    pub id: u64,
    handler: RefCell<PatchHandler>,
    pub tags: BTreeSet<String>,
    filter: BTreeSet<Op>,
    pub reversible: bool,
    pub spy: bool,
    active: Rc<Cell<bool>>,
}

impl Listener {
    pub fn new(
        id: u64,
        handler: PatchHandler,
        tags: BTreeSet<String>,
        filter: BTreeSet<Op>,
        reversible: bool,
        spy: bool,
    ) -> (Self, Disposer) {
        let active = Rc::new(Cell::new(true));
        let listener = Self {
            id,
            handler: RefCell::new(handler),
            tags,
            filter,
            reversible,
            spy,
            active: active.clone(),
        };
        (listener, Disposer { active })
    }

    pub fn is_active(&self) -> bool {
        self.active.get()
    }

    pub fn deactivate(&self) {
        self.active.set(false);
    }

    pub fn admits(&self, op: Op) -> bool {
        self.filter.is_empty() || self.filter.contains(&op)
    }

    /// True if a spy or if the listener's tags meet `tags`.
    pub fn can_see(&self, tags: &BTreeSet<String>) -> bool {
        self.spy || intersects(&self.tags, tags)
    }

    pub fn params(&self) -> SnapshotParams<'_> {
        SnapshotParams {
            tags: &self.tags,
            spy: self.spy,
            object_tags: None,
        }
    }

    pub fn dispatch(&self, patch: &Patch, object: Option<Handle>, root: Handle) {
        trace!(listener = self.id, op = %patch.op, path = %patch.path, "dispatch");
        match self.handler.try_borrow_mut() {
            Ok(mut handler) => handler(patch, object, root),
            Err(_) => trace!(listener = self.id, "handler busy, patch skipped"),
        }
    }
}

/// Cancels a listener registration.
///
/// Disposal takes effect from the next event; an event already being
/// dispatched still reaches the listener.
#[derive(Debug, Clone)]
pub struct Disposer {
    active: Rc<Cell<bool>>,
}

impl Disposer {
    pub fn dispose(&self) {
        self.active.set(false);
    }

    pub fn is_active(&self) -> bool {
        self.active.get()
    }
}
