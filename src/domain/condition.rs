/// Filter condition AST shared by the DynamoDB and Elasticsearch compilers
///
/// The JSON filter language is a small recursive grammar:
/// - `[c1, c2, ...]`: all children must hold (AND)
/// - `{"or": [c1, c2, ...]}`: any child must hold (OR)
/// - `{"not": c}`: negation of a single child
/// - `{"key", "comparator", "value"}`: comparison
/// - `{"key", "from", "to"}`: inclusive range
/// - `{"key", "exists"}`: attribute presence
/// - `{"key", "operator", "value"}`: string match (`begins_with` / `contains`)
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Map, Value};
use thiserror::Error;

/// Errors raised while parsing the JSON filter language
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConditionError {
    /// The node is neither an object nor an array
    #[error("condition must be an object or an array: {0}")]
    InvalidShape(String),
    /// A leaf condition has no usable key
    #[error("condition key must be a non-empty string")]
    MissingKey,
    /// Unsupported comparator
    #[error("unknown comparator: {0}")]
    UnknownComparator(String),
    /// Unsupported string operator
    #[error("unknown string operator: {0}")]
    UnknownOperator(String),
    /// `or` was not given an array
    #[error("`or` must be an array of conditions")]
    InvalidOr,
    /// `exists` was not given a boolean
    #[error("`exists` must be a boolean")]
    InvalidExists,
    /// Object with a key but without any recognised condition field
    #[error("unrecognized condition: {0}")]
    Unrecognized(String),
}

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Comparator {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "=" => Some(Comparator::Eq),
            "!=" => Some(Comparator::Ne),
            "<" => Some(Comparator::Lt),
            "<=" => Some(Comparator::Le),
            ">" => Some(Comparator::Gt),
            ">=" => Some(Comparator::Ge),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Comparator::Eq => "=",
            Comparator::Ne => "!=",
            Comparator::Lt => "<",
            Comparator::Le => "<=",
            Comparator::Gt => ">",
            Comparator::Ge => ">=",
        }
    }
}

/// String matching operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringOperator {
    BeginsWith,
    Contains,
}

impl StringOperator {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "begins_with" => Some(StringOperator::BeginsWith),
            "contains" => Some(StringOperator::Contains),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StringOperator::BeginsWith => "begins_with",
            StringOperator::Contains => "contains",
        }
    }
}

/// A filter condition
///
/// Leaf variants reference exactly one key. `And`/`Or`/`Not` nest recursively;
/// being an owned tree it cannot contain cycles.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Comparison {
        key: String,
        comparator: Comparator,
        value: Value,
    },
    /// Inclusive on both bounds
    Between { key: String, from: Value, to: Value },
    Existence { key: String, exists: bool },
    StringMatch {
        key: String,
        operator: StringOperator,
        value: Value,
    },
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
}

impl Condition {
    pub fn eq(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(key, Comparator::Eq, value)
    }

    pub fn ne(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(key, Comparator::Ne, value)
    }

    pub fn lt(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(key, Comparator::Lt, value)
    }

    pub fn le(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(key, Comparator::Le, value)
    }

    pub fn gt(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(key, Comparator::Gt, value)
    }

    pub fn ge(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(key, Comparator::Ge, value)
    }

    pub fn compare(key: impl Into<String>, comparator: Comparator, value: impl Into<Value>) -> Self {
        Condition::Comparison {
            key: key.into(),
            comparator,
            value: value.into(),
        }
    }

    pub fn between(key: impl Into<String>, from: impl Into<Value>, to: impl Into<Value>) -> Self {
        Condition::Between {
            key: key.into(),
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn exists(key: impl Into<String>) -> Self {
        Condition::Existence {
            key: key.into(),
            exists: true,
        }
    }

    pub fn not_exists(key: impl Into<String>) -> Self {
        Condition::Existence {
            key: key.into(),
            exists: false,
        }
    }

    pub fn begins_with(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Condition::StringMatch {
            key: key.into(),
            operator: StringOperator::BeginsWith,
            value: value.into(),
        }
    }

    pub fn contains(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Condition::StringMatch {
            key: key.into(),
            operator: StringOperator::Contains,
            value: value.into(),
        }
    }

    pub fn and(children: Vec<Condition>) -> Self {
        Condition::And(children)
    }

    pub fn or(children: Vec<Condition>) -> Self {
        Condition::Or(children)
    }

    pub fn negate(child: Condition) -> Self {
        Condition::Not(Box::new(child))
    }

    /// Parse the JSON filter language
    pub fn from_value(value: &Value) -> Result<Self, ConditionError> {
        match value {
            Value::Array(items) => items
                .iter()
                .map(Self::from_value)
                .collect::<Result<Vec<_>, _>>()
                .map(Condition::And),
            Value::Object(obj) => Self::from_object(obj),
            other => Err(ConditionError::InvalidShape(other.to_string())),
        }
    }

    fn from_object(obj: &Map<String, Value>) -> Result<Self, ConditionError> {
        if let Some(or) = obj.get("or") {
            let items = or.as_array().ok_or(ConditionError::InvalidOr)?;
            return items
                .iter()
                .map(Self::from_value)
                .collect::<Result<Vec<_>, _>>()
                .map(Condition::Or);
        }

        if let Some(not) = obj.get("not") {
            return Ok(Condition::Not(Box::new(Self::from_value(not)?)));
        }

        let key = obj
            .get("key")
            .and_then(|k| k.as_str())
            .filter(|k| !k.is_empty())
            .ok_or(ConditionError::MissingKey)?
            .to_string();
        let value = obj.get("value").cloned().unwrap_or(Value::Null);

        if let Some(comparator) = obj.get("comparator") {
            let text = comparator.as_str().unwrap_or_default();
            let comparator = Comparator::parse(text)
                .ok_or_else(|| ConditionError::UnknownComparator(comparator.to_string()))?;
            return Ok(Condition::Comparison {
                key,
                comparator,
                value,
            });
        }

        if let (Some(from), Some(to)) = (obj.get("from"), obj.get("to")) {
            return Ok(Condition::Between {
                key,
                from: from.clone(),
                to: to.clone(),
            });
        }

        if let Some(exists) = obj.get("exists") {
            let exists = exists.as_bool().ok_or(ConditionError::InvalidExists)?;
            return Ok(Condition::Existence { key, exists });
        }

        if let Some(operator) = obj.get("operator") {
            let text = operator.as_str().unwrap_or_default();
            let operator = StringOperator::parse(text)
                .ok_or_else(|| ConditionError::UnknownOperator(operator.to_string()))?;
            return Ok(Condition::StringMatch {
                key,
                operator,
                value,
            });
        }

        Err(ConditionError::Unrecognized(Value::Object(obj.clone()).to_string()))
    }

    /// Render back into the JSON filter language
    pub fn to_value(&self) -> Value {
        match self {
            Condition::Comparison {
                key,
                comparator,
                value,
            } => json!({ "key": key, "comparator": comparator.as_str(), "value": value }),
            Condition::Between { key, from, to } => json!({ "key": key, "from": from, "to": to }),
            Condition::Existence { key, exists } => json!({ "key": key, "exists": exists }),
            Condition::StringMatch {
                key,
                operator,
                value,
            } => json!({ "key": key, "operator": operator.as_str(), "value": value }),
            Condition::And(children) => Value::Array(children.iter().map(|c| c.to_value()).collect()),
            Condition::Or(children) => {
                json!({ "or": children.iter().map(|c| c.to_value()).collect::<Vec<_>>() })
            }
            Condition::Not(child) => json!({ "not": child.to_value() }),
        }
    }
}

/// A condition with empty combinators folded into constants
///
/// An empty AND always holds and an empty OR never does. Constants are
/// propagated upwards so that only [`Folded::Always`] / [`Folded::Never`]
/// can appear at the root, never inside a combinator.
#[derive(Debug, PartialEq)]
pub enum Folded<'a> {
    Always,
    Never,
    Leaf(&'a Condition),
    And(Vec<Folded<'a>>),
    Or(Vec<Folded<'a>>),
    Not(Box<Folded<'a>>),
}

impl Condition {
    /// Fold empty combinators away
    pub fn fold(&self) -> Folded<'_> {
        match self {
            Condition::And(children) => {
                let mut parts = Vec::with_capacity(children.len());
                for child in children {
                    match child.fold() {
                        Folded::Always => {}
                        Folded::Never => return Folded::Never,
                        other => parts.push(other),
                    }
                }
                match parts.len() {
                    0 => Folded::Always,
                    1 => parts.remove(0),
                    _ => Folded::And(parts),
                }
            }
            Condition::Or(children) => {
                let mut parts = Vec::with_capacity(children.len());
                for child in children {
                    match child.fold() {
                        Folded::Never => {}
                        Folded::Always => return Folded::Always,
                        other => parts.push(other),
                    }
                }
                match parts.len() {
                    0 => Folded::Never,
                    1 => parts.remove(0),
                    _ => Folded::Or(parts),
                }
            }
            Condition::Not(child) => match child.fold() {
                Folded::Always => Folded::Never,
                Folded::Never => Folded::Always,
                other => Folded::Not(Box::new(other)),
            },
            leaf => Folded::Leaf(leaf),
        }
    }
}

impl<'de> Deserialize<'de> for Condition {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Condition::from_value(&value).map_err(serde::de::Error::custom)
    }
}

impl Serialize for Condition {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_value().serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fold_constants() {
        assert_eq!(Condition::and(vec![]).fold(), Folded::Always);
        assert_eq!(Condition::or(vec![]).fold(), Folded::Never);
        assert_eq!(Condition::negate(Condition::or(vec![])).fold(), Folded::Always);

        let leaf = Condition::eq("a", 1);
        let nested = Condition::and(vec![Condition::and(vec![]), leaf.clone()]);
        assert_eq!(nested.fold(), Folded::Leaf(&leaf));

        let short = Condition::and(vec![leaf.clone(), Condition::or(vec![])]);
        assert_eq!(short.fold(), Folded::Never);
    }

    #[test]
    fn test_parse_comparison() {
        let condition = Condition::from_value(&json!({"key": "type", "comparator": "=", "value": "A"})).unwrap();
        assert_eq!(condition, Condition::eq("type", "A"));
    }

    #[test]
    fn test_parse_each_comparator() {
        for (text, expected) in [
            ("=", Comparator::Eq),
            ("!=", Comparator::Ne),
            ("<", Comparator::Lt),
            ("<=", Comparator::Le),
            (">", Comparator::Gt),
            (">=", Comparator::Ge),
        ] {
            let condition =
                Condition::from_value(&json!({"key": "n", "comparator": text, "value": 1})).unwrap();
            assert_eq!(condition, Condition::compare("n", expected, 1));
        }
    }

    #[test]
    fn test_parse_between() {
        let condition =
            Condition::from_value(&json!({"key": "x", "from": 1000000, "to": 3000000})).unwrap();
        assert_eq!(condition, Condition::between("x", 1000000, 3000000));
    }

    #[test]
    fn test_parse_existence_both_ways() {
        let exists = Condition::from_value(&json!({"key": "name", "exists": true})).unwrap();
        let missing = Condition::from_value(&json!({"key": "name", "exists": false})).unwrap();
        assert_eq!(exists, Condition::exists("name"));
        assert_eq!(missing, Condition::not_exists("name"));
    }

    #[test]
    fn test_parse_string_match() {
        let condition =
            Condition::from_value(&json!({"key": "name", "operator": "begins_with", "value": "lem"})).unwrap();
        assert_eq!(condition, Condition::begins_with("name", "lem"));
    }

    #[test]
    fn test_parse_nested_combinators() {
        let input = json!([
            {"key": "type", "comparator": "=", "value": "user"},
            {"or": [
                {"key": "age", "comparator": ">", "value": 20},
                {"not": {"key": "deleted", "exists": true}}
            ]}
        ]);
        let condition = Condition::from_value(&input).unwrap();
        assert_eq!(
            condition,
            Condition::and(vec![
                Condition::eq("type", "user"),
                Condition::or(vec![
                    Condition::gt("age", 20),
                    Condition::negate(Condition::exists("deleted")),
                ]),
            ])
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            Condition::from_value(&json!("text")),
            Err(ConditionError::InvalidShape("\"text\"".to_string()))
        );
        assert_eq!(
            Condition::from_value(&json!({"comparator": "=", "value": 1})),
            Err(ConditionError::MissingKey)
        );
        assert!(matches!(
            Condition::from_value(&json!({"key": "a", "comparator": "~", "value": 1})),
            Err(ConditionError::UnknownComparator(_))
        ));
        assert!(matches!(
            Condition::from_value(&json!({"key": "a", "operator": "ends_with", "value": "x"})),
            Err(ConditionError::UnknownOperator(_))
        ));
        assert_eq!(
            Condition::from_value(&json!({"or": {"key": "a", "exists": true}})),
            Err(ConditionError::InvalidOr)
        );
        assert_eq!(
            Condition::from_value(&json!({"key": "a", "exists": "yes"})),
            Err(ConditionError::InvalidExists)
        );
        assert!(matches!(
            Condition::from_value(&json!({"key": "a"})),
            Err(ConditionError::Unrecognized(_))
        ));
    }

    #[test]
    fn test_serde_uses_filter_language() {
        let input = json!({"or": [{"key": "a", "comparator": "<=", "value": 3}, {"key": "b", "exists": false}]});
        let condition: Condition = serde_json::from_value(input.clone()).unwrap();
        assert_eq!(serde_json::to_value(&condition).unwrap(), input);
    }
}
