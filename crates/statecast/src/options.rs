//! Tracker, listener and snapshot options.
//!
//! All options deserialize with defaults for every missing key, so hosts
//! can keep them in their own JSON or TOML configuration.

use std::collections::BTreeSet;

use serde::Deserialize;

use crate::patch::Op;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TrackerOptions {
    /// Default for listeners that do not choose: attach `oldValue` to
    /// replace and remove patches.
    pub reversible: bool,
    /// When a private object held in a map becomes visible or invisible,
    /// emit `add`/`remove` at its key instead of `replace`.
    pub private_map_value_patch: bool,
    /// Maintain the schema tables and attach binary encodings to patches.
    pub schema: bool,
}

impl TrackerOptions {
    pub fn reversible(mut self, reversible: bool) -> Self {
        self.reversible = reversible;
        self
    }

    pub fn private_map_value_patch(mut self, enabled: bool) -> Self {
        self.private_map_value_patch = enabled;
        self
    }

    pub fn schema(mut self, enabled: bool) -> Self {
        self.schema = enabled;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PatchOptions {
    pub tags: BTreeSet<String>,
    /// Operations to deliver. Empty means all.
    pub filter: BTreeSet<Op>,
    /// Overrides [`TrackerOptions::reversible`].
    pub reversible: Option<bool>,
    /// Receive every patch with full visibility.
    pub spy: bool,
}

impl PatchOptions {
    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn tag(self, tag: impl Into<String>) -> Self {
        self.tags([tag.into()])
    }

    pub fn only(mut self, op: Op) -> Self {
        self.filter.insert(op);
        self
    }

    pub fn reversible(mut self, reversible: bool) -> Self {
        self.reversible = Some(reversible);
        self
    }

    pub fn spy(mut self) -> Self {
        self.spy = true;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SnapshotOptions {
    pub tags: BTreeSet<String>,
    pub spy: bool,
}

impl SnapshotOptions {
    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn spy(mut self) -> Self {
        self.spy = true;
        self
    }
}
