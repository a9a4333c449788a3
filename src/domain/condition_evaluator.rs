/// In-memory evaluation of filter conditions
///
/// Used by the in-memory stores so that they answer the same filters the
/// DynamoDB and Elasticsearch backends do.
use std::cmp::Ordering;

use serde_json::Value;

use super::condition::{Comparator, Condition, StringOperator};
use super::item::Item;

/// Condition evaluator
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    /// Check if an item satisfies the condition
    ///
    /// - empty AND holds, empty OR does not
    /// - `Between` is inclusive on both bounds
    /// - a `null` attribute counts as present
    pub fn matches(item: &Item, condition: &Condition) -> bool {
        match condition {
            Condition::And(children) => children.iter().all(|c| Self::matches(item, c)),
            Condition::Or(children) => children.iter().any(|c| Self::matches(item, c)),
            Condition::Not(child) => !Self::matches(item, child),
            Condition::Existence { key, exists } => item.contains_key(key) == *exists,
            Condition::Comparison {
                key,
                comparator,
                value,
            } => Self::compare_field(item.get(key), *comparator, value),
            Condition::Between { key, from, to } => match item.get(key) {
                Some(actual) => {
                    matches!(Self::order(actual, from), Some(Ordering::Greater | Ordering::Equal))
                        && matches!(Self::order(actual, to), Some(Ordering::Less | Ordering::Equal))
                }
                None => false,
            },
            Condition::StringMatch {
                key,
                operator,
                value,
            } => Self::string_match(item.get(key), *operator, value),
        }
    }

    /// Check if an item satisfies an optional condition (None matches everything)
    pub fn matches_opt(item: &Item, condition: Option<&Condition>) -> bool {
        condition.is_none_or(|c| Self::matches(item, c))
    }

    fn compare_field(actual: Option<&Value>, comparator: Comparator, expected: &Value) -> bool {
        match comparator {
            // `!=` is `NOT (a = b)`, so a missing field satisfies it
            Comparator::Eq => actual.is_some_and(|a| Self::equals(a, expected)),
            Comparator::Ne => !actual.is_some_and(|a| Self::equals(a, expected)),
            Comparator::Lt => Self::ordered(actual, expected, |o| o == Ordering::Less),
            Comparator::Le => Self::ordered(actual, expected, |o| o != Ordering::Greater),
            Comparator::Gt => Self::ordered(actual, expected, |o| o == Ordering::Greater),
            Comparator::Ge => Self::ordered(actual, expected, |o| o != Ordering::Less),
        }
    }

    fn ordered(actual: Option<&Value>, expected: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
        actual
            .and_then(|a| Self::order(a, expected))
            .is_some_and(accept)
    }

    fn equals(a: &Value, b: &Value) -> bool {
        match (a, b) {
            (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
            _ => a == b,
        }
    }

    /// Order two values of the same scalar type; mixed types are incomparable
    fn order(a: &Value, b: &Value) -> Option<Ordering> {
        match (a, b) {
            (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
            (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
            (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
            _ => None,
        }
    }

    fn string_match(actual: Option<&Value>, operator: StringOperator, expected: &Value) -> bool {
        match (operator, actual) {
            (StringOperator::BeginsWith, Some(Value::String(s))) => {
                expected.as_str().is_some_and(|prefix| s.starts_with(prefix))
            }
            (StringOperator::Contains, Some(Value::String(s))) => {
                expected.as_str().is_some_and(|part| s.contains(part))
            }
            (StringOperator::Contains, Some(Value::Array(items))) => {
                items.iter().any(|v| Self::equals(v, expected))
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::item::as_item;
    use serde_json::json;

    fn item(value: Value) -> Item {
        as_item(value).unwrap()
    }

    #[test]
    fn test_comparison() {
        let it = item(json!({"n": 10, "s": "abc"}));
        assert!(ConditionEvaluator::matches(&it, &Condition::eq("n", 10)));
        assert!(ConditionEvaluator::matches(&it, &Condition::eq("n", 10.0)));
        assert!(!ConditionEvaluator::matches(&it, &Condition::eq("n", "10")));
        assert!(ConditionEvaluator::matches(&it, &Condition::lt("n", 11)));
        assert!(ConditionEvaluator::matches(&it, &Condition::le("n", 10)));
        assert!(!ConditionEvaluator::matches(&it, &Condition::gt("n", 10)));
        assert!(ConditionEvaluator::matches(&it, &Condition::ge("n", 10)));
        assert!(ConditionEvaluator::matches(&it, &Condition::gt("s", "abb")));
        assert!(!ConditionEvaluator::matches(&it, &Condition::gt("missing", 1)));
    }

    #[test]
    fn test_not_equal_is_negated_equal() {
        let with = item(json!({"type": "A"}));
        let other = item(json!({"type": "B"}));
        let without = item(json!({}));
        let ne = Condition::ne("type", "A");
        let not_eq = Condition::negate(Condition::eq("type", "A"));
        for it in [&with, &other, &without] {
            assert_eq!(ConditionEvaluator::matches(it, &ne), ConditionEvaluator::matches(it, &not_eq));
        }
        assert!(ConditionEvaluator::matches(&without, &ne));
    }

    #[test]
    fn test_between_is_inclusive() {
        let between = Condition::between("x", 1000000, 3000000);
        for (x, expected) in [(999999, false), (1000000, true), (2000000, true), (3000000, true), (3000001, false)] {
            assert_eq!(ConditionEvaluator::matches(&item(json!({"x": x})), &between), expected, "x={x}");
        }
    }

    #[test]
    fn test_existence() {
        let it = item(json!({"a": null}));
        assert!(ConditionEvaluator::matches(&it, &Condition::exists("a")));
        assert!(ConditionEvaluator::matches(&it, &Condition::not_exists("b")));
        assert!(!ConditionEvaluator::matches(&it, &Condition::exists("b")));
    }

    #[test]
    fn test_string_match() {
        let it = item(json!({"name": "lemon-core", "tags": ["a", "b"]}));
        assert!(ConditionEvaluator::matches(&it, &Condition::begins_with("name", "lemon")));
        assert!(!ConditionEvaluator::matches(&it, &Condition::begins_with("name", "core")));
        assert!(ConditionEvaluator::matches(&it, &Condition::contains("name", "on-co")));
        assert!(ConditionEvaluator::matches(&it, &Condition::contains("tags", "b")));
        assert!(!ConditionEvaluator::matches(&it, &Condition::contains("tags", "c")));
    }

    #[test]
    fn test_empty_combinators() {
        let it = item(json!({}));
        assert!(ConditionEvaluator::matches(&it, &Condition::and(vec![])));
        assert!(!ConditionEvaluator::matches(&it, &Condition::or(vec![])));
        assert!(ConditionEvaluator::matches_opt(&it, None));
    }
}
