//! Logical identity extraction for localization records

use serde_json::{Map, Value};

/// Candidate identity keys, probed in order. `id` comes first because it is
/// the most stable cross-version key in the game data; descriptive names are
/// only consulted when no identifier exists.
const IDENTITY_KEYS: [&str; 9] = [
    "id", "ID", "Id", "name", "Name", "key", "Key", "guid", "GUID",
];

/// Return the logical identity of a record, if it carries one.
///
/// The first present, non-null candidate key wins. Values are rendered to
/// their string form so that `5` and `"5"` match across files that disagree
/// on the id type.
pub fn identity_of(record: &Map<String, Value>) -> Option<String> {
    for key in IDENTITY_KEYS {
        match record.get(key) {
            None | Some(Value::Null) => continue,
            Some(Value::String(s)) => return Some(s.clone()),
            Some(other) => return Some(other.to_string()),
        }
    }
    None
}
