//! JSON-Patch-like change records and JSON Pointer helpers.

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as Json;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Op {
    Add,
    Replace,
    Remove,
}

impl Op {
    pub fn as_str(&self) -> &'static str {
        match self {
            Op::Add => "add",
            Op::Replace => "replace",
            Op::Remove => "remove",
        }
    }

    /// Wire code of a data patch.
    pub fn code(self) -> i64 {
        match self {
            Op::Add => 0,
            Op::Replace => 1,
            Op::Remove => 2,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Op::Add),
            1 => Some(Op::Replace),
            2 => Some(Op::Remove),
            _ => None,
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One change as delivered to a listener.
///
/// `value` is absent for removals and when the new value is invisible to
/// the listener. `old_value` is only filled for reversible listeners.
/// `encoded` holds the binary form when the schema codec is enabled and is
/// never serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    pub op: Op,
    pub path: String,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present"
    )]
    pub value: Option<Json>,
    #[serde(
        default,
        rename = "oldValue",
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present"
    )]
    pub old_value: Option<Json>,
    #[serde(skip)]
    pub encoded: Option<Vec<u8>>,
}

/// Keeps an explicit `null` as `Some(Null)` instead of folding it into
/// `None`.
fn present<'de, D>(deserializer: D) -> Result<Option<Json>, D::Error>
where
    D: Deserializer<'de>,
{
    Json::deserialize(deserializer).map(Some)
}

impl Patch {
    pub fn new(op: Op, path: impl Into<String>) -> Self {
        Self {
            op,
            path: path.into(),
            value: None,
            old_value: None,
            encoded: None,
        }
    }

    pub fn with_value(mut self, value: Option<Json>) -> Self {
        self.value = value;
        self
    }

    pub fn with_old_value(mut self, old_value: Option<Json>) -> Self {
        self.old_value = old_value;
        self
    }

    /// Copy without the binary form, for comparing decoded patches.
    pub fn without_encoding(&self) -> Patch {
        Patch {
            encoded: None,
            ..self.clone()
        }
    }
}

/// Escapes a path segment per RFC 6901.
pub fn escape_segment(segment: &str) -> Cow<'_, str> {
    if segment.contains(['~', '/']) {
        Cow::Owned(segment.replace('~', "~0").replace('/', "~1"))
    } else {
        Cow::Borrowed(segment)
    }
}

pub fn unescape_segment(segment: &str) -> Cow<'_, str> {
    if segment.contains('~') {
        Cow::Owned(segment.replace("~1", "/").replace("~0", "~"))
    } else {
        Cow::Borrowed(segment)
    }
}

/// Splits a pointer into unescaped segments. `""` and `"/"` both address
/// the root.
pub fn split_path(path: &str) -> Vec<String> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    if trimmed.is_empty() {
        return Vec::new();
    }
    trimmed
        .split('/')
        .map(|s| unescape_segment(s).into_owned())
        .collect()
}

/// Appends one escaped segment to a pointer.
pub fn join_path(base: &str, segment: &str) -> String {
    let mut out = String::with_capacity(base.len() + segment.len() + 1);
    out.push_str(base.strip_suffix('/').unwrap_or(base));
    out.push('/');
    out.push_str(&escape_segment(segment));
    out
}
