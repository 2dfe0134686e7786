#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;

use statecast::{Op, Patch, PatchOptions, StateTree};

pub type Log = Rc<RefCell<Vec<Patch>>>;

/// Registers a listener that appends every patch it receives to a log.
pub fn record(tree: &mut StateTree, options: PatchOptions) -> Log {
    let log: Log = Rc::default();
    let sink = log.clone();
    tree.on_patch(move |patch, _, _| sink.borrow_mut().push(patch.clone()), options)
        .expect("tracking");
    log
}

/// Drains a log, dropping binary encodings and schema patches.
pub fn take(log: &Log) -> Vec<Patch> {
    log.borrow_mut()
        .drain(..)
        .filter(|p| !p.path.starts_with("/_/"))
        .map(|p| p.without_encoding())
        .collect()
}

pub fn summary(patches: &[Patch]) -> Vec<(Op, String)> {
    patches.iter().map(|p| (p.op, p.path.clone())).collect()
}

pub fn tags(list: &[&str]) -> BTreeSet<String> {
    list.iter().map(|t| t.to_string()).collect()
}

pub fn add(path: &str, value: serde_json::Value) -> Patch {
    Patch::new(Op::Add, path).with_value(Some(value))
}

pub fn replace(path: &str, value: serde_json::Value) -> Patch {
    Patch::new(Op::Replace, path).with_value(Some(value))
}

pub fn remove(path: &str) -> Patch {
    Patch::new(Op::Remove, path)
}
