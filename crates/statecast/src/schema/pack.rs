//! Node-aware value encoding.
//!
//! A value backed by a schema node travels as extension [`EXT_NODE`]
//! wrapping `[nodeId, payload]`. The payload drops key names: objects
//! become arrays in declared field order, maps arrays in node key order,
//! with `undefined` marking absent entries. Anything else is plain
//! MessagePack.

use serde_json::{Map, Value as Json};
use statecast_pack::{PackError, PackValue, MAX_DEPTH};

use super::tables::{SchemaNode, SchemaTables, NODE_ARRAY, NODE_MAP, NODE_SET};
use crate::error::CodecError;

pub const EXT_NODE: i8 = 1;

fn shape(node: &SchemaNode, expected: &str) -> CodecError {
    CodecError::SchemaMismatch(format!("node {} expects {expected}", node.id))
}

/// Encodes `json`, tagging it with `node` when it is a container.
pub(crate) fn encode_value(
    tables: &SchemaTables,
    node: Option<&SchemaNode>,
    json: &Json,
) -> Result<PackValue, CodecError> {
    match (node, json) {
        (Some(node), Json::Object(_) | Json::Array(_)) => {
            let id = i64::try_from(node.id).map_err(|_| CodecError::Malformed(format!("node id {}", node.id)))?;
            let frame = PackValue::Array(vec![PackValue::Integer(id), payload(tables, node, json)?]);
            Ok(PackValue::Extension(EXT_NODE, statecast_pack::encode(&frame)))
        }
        _ => Ok(PackValue::from(json.clone())),
    }
}

fn entry(tables: &SchemaTables, parent: &SchemaNode, position: usize, json: Option<&Json>) -> Result<PackValue, CodecError> {
    let Some(json) = json else {
        return Ok(PackValue::Undefined);
    };
    let child = i64::try_from(position)
        .ok()
        .and_then(|position| tables.child(parent.id, position));
    encode_value(tables, child, json)
}

/// Key-less form of a container snapshot.
pub(crate) fn payload(tables: &SchemaTables, node: &SchemaNode, json: &Json) -> Result<PackValue, CodecError> {
    let items = match node.kind {
        NODE_ARRAY => {
            let items = json.as_array().ok_or_else(|| shape(node, "an array"))?;
            items
                .iter()
                .enumerate()
                .map(|(i, v)| entry(tables, node, i, Some(v)))
                .collect::<Result<_, _>>()?
        }
        NODE_MAP => {
            let map = json.as_object().ok_or_else(|| shape(node, "a map"))?;
            if let Some(key) = map.keys().find(|k| !node.keys.contains(k)) {
                return Err(CodecError::SchemaMismatch(format!("node {} has no key `{key}`", node.id)));
            }
            node.keys
                .iter()
                .enumerate()
                .map(|(i, key)| entry(tables, node, i, map.get(key)))
                .collect::<Result<_, _>>()?
        }
        NODE_SET => return Ok(PackValue::from(json.clone())),
        kind => {
            let props = tables
                .type_props(kind)
                .ok_or_else(|| CodecError::SchemaMismatch(format!("unknown type {kind}")))?;
            let object = json.as_object().ok_or_else(|| shape(node, "an object"))?;
            props
                .iter()
                .enumerate()
                .map(|(i, prop)| entry(tables, node, i, object.get(prop)))
                .collect::<Result<_, _>>()?
        }
    };
    Ok(PackValue::Array(items))
}

/// One nesting level down, counting node extensions as levels too.
fn deeper(depth: usize) -> Result<usize, CodecError> {
    match depth < MAX_DEPTH {
        true => Ok(depth + 1),
        false => Err(PackError::TooDeep(MAX_DEPTH).into()),
    }
}

/// Decodes a value found `depth` levels down, expanding node extensions.
/// `undefined` array items become `null` and undefined object entries are
/// dropped.
pub(crate) fn decode_value(tables: &SchemaTables, value: PackValue, depth: usize) -> Result<Json, CodecError> {
    let depth = deeper(depth)?;
    match value {
        PackValue::Extension(EXT_NODE, data) => {
            let frame = statecast_pack::decode(&data)?
                .into_array()
                .ok_or_else(|| CodecError::Malformed("node extension must wrap an array".into()))?;
            let [id, payload]: [PackValue; 2] = frame
                .try_into()
                .map_err(|_| CodecError::Malformed("node extension must hold [id, payload]".into()))?;
            let id = id
                .as_i64()
                .and_then(|id| u64::try_from(id).ok())
                .ok_or_else(|| CodecError::Malformed("node id must be a non-negative integer".into()))?;
            let node = tables
                .node(id)
                .ok_or_else(|| CodecError::SchemaMismatch(format!("unknown node {id}")))?;
            decode_payload(tables, node, payload, depth)
        }
        PackValue::Array(items) => Ok(Json::Array(
            items
                .into_iter()
                .map(|item| decode_value(tables, item, depth))
                .collect::<Result<_, _>>()?,
        )),
        PackValue::Object(pairs) => {
            let mut map = Map::with_capacity(pairs.len());
            for (key, item) in pairs {
                if !item.is_undefined() {
                    map.insert(key, decode_value(tables, item, depth)?);
                }
            }
            Ok(Json::Object(map))
        }
        other => Ok(Json::from(other)),
    }
}

/// Inverse of [`payload`].
pub(crate) fn decode_payload(
    tables: &SchemaTables,
    node: &SchemaNode,
    payload: PackValue,
    depth: usize,
) -> Result<Json, CodecError> {
    if node.kind == NODE_SET || node.kind == NODE_ARRAY {
        return decode_value(tables, payload, depth);
    }
    let items = payload.into_array().ok_or_else(|| shape(node, "an array payload"))?;
    let names: &[String] = match node.kind {
        NODE_MAP => &node.keys,
        kind => tables
            .type_props(kind)
            .ok_or_else(|| CodecError::SchemaMismatch(format!("unknown type {kind}")))?,
    };
    if items.len() > names.len() {
        return Err(CodecError::SchemaMismatch(format!(
            "node {} has {} fields, payload has {}",
            node.id,
            names.len(),
            items.len()
        )));
    }
    let mut map = Map::with_capacity(items.len());
    for (name, item) in names.iter().zip(items) {
        if !item.is_undefined() {
            map.insert(name.clone(), decode_value(tables, item, depth)?);
        }
    }
    Ok(Json::Object(map))
}
