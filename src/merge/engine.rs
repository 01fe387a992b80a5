//! Additive structural merge over JSON trees
//!
//! The merge only ever adds data: new properties and new array items are
//! copied in from the source, but values already present in the destination
//! are never overwritten. This is what lets regenerated reference content be
//! folded into a hand-translated file without losing edits.

use serde_json::{Map, Value};

use super::identity::identity_of;

/// Merge `source` into `destination` additively. Returns whether the
/// destination changed, which callers use for write-avoidance and reporting.
///
/// Scalars and mismatched shapes are left alone: the destination is
/// authoritative, and reference data occasionally changes shape across game
/// versions, so a mismatch is not an error.
pub fn additive_merge(destination: &mut Value, source: &Value) -> bool {
    match (destination, source) {
        (Value::Object(dest), Value::Object(src)) => merge_objects(dest, src),
        (Value::Array(dest), Value::Array(src)) => merge_arrays(dest, src),
        _ => false,
    }
}

fn merge_objects(dest: &mut Map<String, Value>, src: &Map<String, Value>) -> bool {
    let mut changed = false;
    for (key, src_value) in src {
        match dest.get_mut(key) {
            None => {
                dest.insert(key.clone(), src_value.clone());
                changed = true;
            }
            Some(dest_value) => {
                changed |= additive_merge(dest_value, src_value);
            }
        }
    }
    changed
}

fn merge_arrays(dest: &mut Vec<Value>, src: &[Value]) -> bool {
    let mut changed = false;
    for item in src {
        match find_match(dest, item) {
            Some(index) => {
                changed |= additive_merge(&mut dest[index], item);
            }
            None => {
                dest.push(item.clone());
                changed = true;
            }
        }
    }
    changed
}

/// Locate the destination item corresponding to a source item.
///
/// Identified objects match by identity key; everything else falls back to a
/// deep-equality membership test. Duplicate identities resolve to the first
/// match, so later source records sharing an id are treated as already
/// present.
fn find_match(dest: &[Value], item: &Value) -> Option<usize> {
    if let Value::Object(record) = item
        && let Some(id) = identity_of(record)
    {
        return dest.iter().position(|candidate| {
            matches!(candidate, Value::Object(c) if identity_of(c).as_deref() == Some(id.as_str()))
        });
    }
    dest.iter().position(|candidate| candidate == item)
}
