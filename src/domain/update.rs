/// Update and increment semantics for in-memory stores
///
/// Mirrors what the engines do server-side:
/// - plain fields overwrite
/// - numeric increments add, initialising absent fields to the amount
/// - array increments append, initialising absent fields to the array
/// - incrementing a text or object field is rejected
/// - a field may not be both updated and incremented in one call
use serde_json::{Number, Value};

use super::error_reason::ErrorReason;
use super::item::Item;

/// Field name to increment amount (number) or values to append (array)
pub type Increments = Item;

/// Reject a field that appears in both `updates` and `increments`
pub fn check_overlap(updates: Option<&Item>, increments: Option<&Increments>) -> Result<(), ErrorReason> {
    let (Some(updates), Some(increments)) = (updates, increments) else {
        return Ok(());
    };
    match updates.keys().find(|key| increments.contains_key(*key)) {
        Some(key) => Err(ErrorReason::illegal_argument(format!(
            "field [{key}] is both updated and incremented"
        ))),
        None => Ok(()),
    }
}

/// Apply `updates` then `increments` to `target`
///
/// Every increment is validated before anything is written, so a rejected
/// call leaves the target untouched.
pub fn apply_update(
    target: &mut Item,
    updates: Option<&Item>,
    increments: Option<&Increments>,
) -> Result<(), ErrorReason> {
    check_overlap(updates, increments)?;

    let mut staged: Vec<(String, Value)> = Vec::new();
    if let Some(increments) = increments {
        for (key, amount) in increments {
            staged.push((key.clone(), increment_value(key, target.get(key), amount)?));
        }
    }

    if let Some(updates) = updates {
        for (key, value) in updates {
            target.insert(key.clone(), value.clone());
        }
    }
    for (key, value) in staged {
        target.insert(key, value);
    }
    Ok(())
}

/// Compute the incremented value of a single field
pub fn increment_value(key: &str, current: Option<&Value>, amount: &Value) -> Result<Value, ErrorReason> {
    match (current, amount) {
        (None | Some(Value::Null), Value::Number(_) | Value::Array(_)) => Ok(amount.clone()),
        (Some(Value::Number(a)), Value::Number(b)) => add_numbers(key, a, b),
        (Some(Value::Array(existing)), Value::Array(more)) => {
            let mut joined = existing.clone();
            joined.extend(more.iter().cloned());
            Ok(Value::Array(joined))
        }
        (Some(Value::Object(_)), _) => Err(ErrorReason::mapper_parsing(format!(
            "failed to parse field [{key}] of type [object]"
        ))),
        (Some(Value::String(_)), _) => Err(ErrorReason::illegal_argument(format!(
            "cannot increment text field [{key}]"
        ))),
        (Some(existing), Value::Number(_) | Value::Array(_)) => Err(ErrorReason::illegal_argument(format!(
            "cannot increment field [{key}] holding {existing}"
        ))),
        (_, other) => Err(ErrorReason::illegal_argument(format!(
            "increment of [{key}] must be a number or an array, got {other}"
        ))),
    }
}

fn add_numbers(key: &str, a: &Number, b: &Number) -> Result<Value, ErrorReason> {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return x
            .checked_add(y)
            .map(Value::from)
            .ok_or_else(|| ErrorReason::illegal_argument(format!("overflow on field [{key}]")));
    }
    let sum = a.as_f64().unwrap_or_default() + b.as_f64().unwrap_or_default();
    Number::from_f64(sum)
        .map(Value::Number)
        .ok_or_else(|| ErrorReason::illegal_argument(format!("invalid number on field [{key}]")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error_reason::labels;
    use crate::domain::item::as_item;
    use serde_json::json;

    fn item(value: Value) -> Item {
        as_item(value).unwrap()
    }

    #[test]
    fn test_increment_absent_field_initialises() {
        let mut target = item(json!({"name": "A0"}));
        apply_update(&mut target, None, Some(&item(json!({"count": 0})))).unwrap();
        assert_eq!(target["count"], json!(0));
    }

    #[test]
    fn test_increment_round_trip() {
        let mut target = item(json!({}));
        apply_update(&mut target, None, Some(&item(json!({"slot": 1})))).unwrap();
        apply_update(&mut target, None, Some(&item(json!({"slot": -2})))).unwrap();
        assert_eq!(target["slot"], json!(-1));
    }

    #[test]
    fn test_increment_float() {
        let mut target = item(json!({"ratio": 0.5}));
        apply_update(&mut target, None, Some(&item(json!({"ratio": 1})))).unwrap();
        assert_eq!(target["ratio"], json!(1.5));
    }

    #[test]
    fn test_array_increment_appends() {
        let mut target = item(json!({"tags": ["a"]}));
        apply_update(&mut target, None, Some(&item(json!({"tags": ["b", "c"]})))).unwrap();
        assert_eq!(target["tags"], json!(["a", "b", "c"]));

        let mut empty = item(json!({}));
        apply_update(&mut empty, None, Some(&item(json!({"tags": ["x"]})))).unwrap();
        assert_eq!(empty["tags"], json!(["x"]));
    }

    #[test]
    fn test_updates_and_increments_together() {
        let mut target = item(json!({"name": "old", "count": 2}));
        apply_update(
            &mut target,
            Some(&item(json!({"name": "new"}))),
            Some(&item(json!({"count": 3}))),
        )
        .unwrap();
        assert_eq!(Value::Object(target), json!({"name": "new", "count": 5}));
    }

    #[test]
    fn test_field_both_updated_and_incremented_is_rejected() {
        let mut target = item(json!({"count": 2}));
        let err = apply_update(
            &mut target,
            Some(&item(json!({"count": 10, "name": "x"}))),
            Some(&item(json!({"count": 1}))),
        )
        .unwrap_err();
        assert!(err.is(labels::ILLEGAL_ARGUMENT));
        assert_eq!(err.message, "400 ILLEGAL ARGUMENT - field [count] is both updated and incremented");
        assert_eq!(Value::Object(target), json!({"count": 2}));
    }

    #[test]
    fn test_increment_text_field_is_illegal_argument() {
        let mut target = item(json!({"name": "A0"}));
        let err = apply_update(&mut target, None, Some(&item(json!({"name": 1})))).unwrap_err();
        assert!(err.is(labels::ILLEGAL_ARGUMENT));
        assert_eq!(target["name"], json!("A0"));
    }

    #[test]
    fn test_increment_object_field_is_mapper_parsing() {
        let mut target = item(json!({"meta": {"a": 1}}));
        let err = apply_update(&mut target, None, Some(&item(json!({"meta": 1})))).unwrap_err();
        assert!(err.has_prefix("400 MAPPER PARSING"));
    }

    #[test]
    fn test_rejected_increment_writes_nothing() {
        let mut target = item(json!({"count": 1, "name": "x"}));
        let increments = item(json!({"count": 1, "name": 1}));
        assert!(apply_update(&mut target, Some(&item(json!({"other": true}))), Some(&increments)).is_err());
        assert_eq!(Value::Object(target), json!({"count": 1, "name": "x"}));
    }

    #[test]
    fn test_invalid_increment_amount() {
        let err = increment_value("a", None, &json!("1")).unwrap_err();
        assert!(err.is(labels::ILLEGAL_ARGUMENT));
    }
}
