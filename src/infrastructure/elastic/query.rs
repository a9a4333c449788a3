// QueryBuilder - フィルター条件をQuery DSLに変換
//
// DynamoDBのFilterCompilerと同じCondition木を入力とし、
// bool queryを組み立てる。スコア計算が不要なためAND条件はfilter句を使う。

use serde_json::{json, Value};

use crate::domain::{Comparator, Condition, Folded, StringOperator};

/// フィルター条件からQuery DSLへの変換
///
/// # 変換ルール
/// - AND: bool.filter
/// - OR: bool.should + minimum_should_match: 1
/// - NOT / `!=`: bool.must_not
/// - `=`: term、`<`/`<=`/`>`/`>=`: range
/// - between: range（gte/lte）
/// - exists: exists（falseはmust_notで否定）
/// - begins_with: prefix、contains: wildcard `*v*`
/// - 空のAND: match_all、空のOR: match_none
pub struct QueryBuilder;

impl QueryBuilder {
    /// 条件なしはmatch_all
    pub fn build(condition: Option<&Condition>) -> Value {
        let Some(condition) = condition else {
            return json!({ "match_all": {} });
        };
        Self::emit(&condition.fold())
    }

    fn emit(folded: &Folded<'_>) -> Value {
        match folded {
            Folded::Always => json!({ "match_all": {} }),
            Folded::Never => json!({ "match_none": {} }),
            Folded::And(parts) => {
                let clauses: Vec<Value> = parts.iter().map(Self::emit).collect();
                json!({ "bool": { "filter": clauses } })
            }
            Folded::Or(parts) => {
                let clauses: Vec<Value> = parts.iter().map(Self::emit).collect();
                json!({ "bool": { "should": clauses, "minimum_should_match": 1 } })
            }
            Folded::Not(inner) => must_not(Self::emit(inner)),
            Folded::Leaf(condition) => Self::emit_leaf(condition),
        }
    }

    fn emit_leaf(condition: &Condition) -> Value {
        match condition {
            Condition::Comparison {
                key,
                comparator,
                value,
            } => match comparator {
                Comparator::Eq => json!({ "term": { key.as_str(): value } }),
                Comparator::Ne => must_not(json!({ "term": { key.as_str(): value } })),
                Comparator::Lt => json!({ "range": { key.as_str(): { "lt": value } } }),
                Comparator::Le => json!({ "range": { key.as_str(): { "lte": value } } }),
                Comparator::Gt => json!({ "range": { key.as_str(): { "gt": value } } }),
                Comparator::Ge => json!({ "range": { key.as_str(): { "gte": value } } }),
            },
            Condition::Between { key, from, to } => {
                json!({ "range": { key.as_str(): { "gte": from, "lte": to } } })
            }
            Condition::Existence { key, exists } => {
                let clause = json!({ "exists": { "field": key } });
                if *exists { clause } else { must_not(clause) }
            }
            Condition::StringMatch {
                key,
                operator,
                value,
            } => {
                let text = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                match operator {
                    StringOperator::BeginsWith => json!({ "prefix": { key.as_str(): text } }),
                    StringOperator::Contains => {
                        json!({ "wildcard": { key.as_str(): format!("*{}*", escape_wildcard(&text)) } })
                    }
                }
            }
            // 結合子はfoldで分解済み
            Condition::And(_) | Condition::Or(_) | Condition::Not(_) => json!({ "match_all": {} }),
        }
    }
}

fn must_not(clause: Value) -> Value {
    json!({ "bool": { "must_not": [clause] } })
}

/// wildcardの特殊文字をエスケープ
fn escape_wildcard(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '*' | '?' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
