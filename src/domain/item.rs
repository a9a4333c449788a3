/// Normalized item shape returned by every store
///
/// An item is a free-form JSON object. Stores add bookkeeping fields:
/// - `_id`: identity of the record
/// - `_version`: engine-side version (Elasticsearch)
/// - `_score`: relevance score (search results only)
use serde_json::{Map, Value};

/// Free-form record
pub type Item = Map<String, Value>;

/// Reserved bookkeeping field names
pub const ID_FIELD: &str = "_id";
pub const VERSION_FIELD: &str = "_version";
pub const SCORE_FIELD: &str = "_score";

/// Get the `_id` of an item
pub fn item_id(item: &Item) -> Option<&str> {
    item.get(ID_FIELD).and_then(|v| v.as_str())
}

/// Get the `_version` of an item
pub fn item_version(item: &Item) -> Option<i64> {
    item.get(VERSION_FIELD).and_then(|v| v.as_i64())
}

/// Attach `_id` (and the store's identity field when it is not `_id`)
pub fn with_id(mut item: Item, id_name: &str, id: &str) -> Item {
    item.insert(id_name.to_string(), Value::String(id.to_string()));
    item.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
    item
}

/// Drop bookkeeping fields before persisting
pub fn strip_reserved(mut item: Item) -> Item {
    item.remove(ID_FIELD);
    item.remove(VERSION_FIELD);
    item.remove(SCORE_FIELD);
    item
}

/// Convert a JSON value into an item (non-objects are rejected)
pub fn as_item(value: Value) -> Option<Item> {
    match value {
        Value::Object(map) => Some(map),
        _ => None,
    }
}
