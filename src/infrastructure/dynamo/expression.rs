// FilterCompiler - フィルター条件をDynamoDB FilterExpressionに変換
//
// Condition木から以下の3つを生成する:
// - プレースホルダーを使ったブール式文字列
// - 属性名エイリアス表（#name -> 実フィールド名）
// - 属性値エイリアス表（:value -> リテラル値）
//
// DynamoDBは未使用のプレースホルダーをエラーにするため、
// 定数畳み込み（`Condition::fold`）を済ませてから式を出力する。

use std::collections::{BTreeMap, HashMap};

use aws_sdk_dynamodb::types::AttributeValue;
use serde_json::Value;

use crate::domain::{Comparator, Condition, Folded, StringOperator};

/// プレースホルダー表
///
/// 名前エイリアスはフィールド名ごとに1つ、値エイリアスは同一フィールドで
/// 再利用されるたびに `_<n>` の連番を付与する。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExpressionContext {
    /// #token -> フィールド名
    names: BTreeMap<String, String>,
    /// フィールド名 -> #token
    name_tokens: BTreeMap<String, String>,
    /// :token -> 値
    values: BTreeMap<String, Value>,
    /// フィールド名ごとの値プレースホルダー連番
    counters: BTreeMap<String, usize>,
}

impl ExpressionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// フィールド名のエイリアスを取得（未登録なら登録）
    pub fn name(&mut self, key: &str) -> String {
        if let Some(token) = self.name_tokens.get(key) {
            return token.clone();
        }

        let base = format!("#{}", normalize(key));
        let mut token = base.clone();
        let mut n = 0;
        while self.names.contains_key(&token) {
            n += 1;
            token = format!("{base}_{n}");
        }

        self.names.insert(token.clone(), key.to_string());
        self.name_tokens.insert(key.to_string(), token.clone());
        token
    }

    /// 値のエイリアスを登録
    pub fn value(&mut self, key: &str, value: &Value) -> String {
        let base = format!(":{}", normalize(key));
        loop {
            let counter = self.counters.entry(key.to_string()).or_insert(0);
            let token = match *counter {
                0 => base.clone(),
                n => format!("{base}_{n}"),
            };
            *counter += 1;

            if !self.values.contains_key(&token) {
                self.values.insert(token.clone(), value.clone());
                return token;
            }
        }
    }

    /// 式の中で共有する定数値を登録（同じ値なら既存のエイリアスを再利用）
    pub fn shared_value(&mut self, token: &str, value: Value) -> String {
        let mut candidate = token.to_string();
        let mut n = 0;
        loop {
            match self.values.get(&candidate) {
                Some(existing) if *existing == value => return candidate,
                Some(_) => {
                    n += 1;
                    candidate = format!("{token}_{n}");
                }
                None => {
                    self.values.insert(candidate.clone(), value);
                    return candidate;
                }
            }
        }
    }

    pub fn names(&self) -> &BTreeMap<String, String> {
        &self.names
    }

    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty() && self.values.is_empty()
    }

    /// SDKに渡す形式（ExpressionAttributeNames）
    pub fn attribute_names(&self) -> Option<HashMap<String, String>> {
        if self.names.is_empty() {
            return None;
        }
        Some(self.names.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    /// SDKに渡す形式（ExpressionAttributeValues）
    pub fn attribute_values(&self) -> Result<Option<HashMap<String, AttributeValue>>, serde_dynamo::Error> {
        if self.values.is_empty() {
            return Ok(None);
        }
        self.values
            .iter()
            .map(|(k, v)| Ok((k.clone(), serde_dynamo::to_attribute_value(v)?)))
            .collect::<Result<HashMap<_, _>, _>>()
            .map(Some)
    }
}

/// プレースホルダーに使えない文字を `_` に置換
fn normalize(key: &str) -> String {
    let normalized: String = key
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if normalized.is_empty() {
        "_".to_string()
    } else {
        normalized
    }
}

/// フィルター変換結果
#[derive(Debug, Clone, PartialEq)]
pub enum CompiledFilter {
    /// 常に真（FilterExpressionを付けない）
    Always,
    /// 常に偽（リクエスト不要）
    Never,
    /// FilterExpression
    Expression {
        expression: String,
        context: ExpressionContext,
    },
}

impl CompiledFilter {
    /// 式文字列（Expressionの場合のみ）
    pub fn expression(&self) -> Option<&str> {
        match self {
            CompiledFilter::Expression { expression, .. } => Some(expression),
            _ => None,
        }
    }

    /// プレースホルダー表（Expressionの場合のみ）
    pub fn context(&self) -> Option<&ExpressionContext> {
        match self {
            CompiledFilter::Expression { context, .. } => Some(context),
            _ => None,
        }
    }
}

/// フィルター条件からFilterExpressionへの変換
///
/// # 変換ルール
/// - 配列（AND）: ` AND ` で結合し括弧で囲む
/// - `or`: ` OR ` で結合し括弧で囲む
/// - `not`: `NOT (...)`
/// - `!=`: `NOT (#k = :v)`（ネイティブの `<>` は使わない）
/// - between: `#k BETWEEN :a AND :b`（両端を含む）
/// - exists: `attribute_exists(#k)` / `attribute_not_exists(#k)`
/// - 空のAND: 常に真、空のOR: 常に偽
pub struct FilterCompiler;

impl FilterCompiler {
    /// 新しいプレースホルダー表でコンパイル
    pub fn compile(condition: &Condition) -> CompiledFilter {
        Self::compile_with(condition, ExpressionContext::new())
    }

    /// 既存のプレースホルダー表に追加する形でコンパイル（KeyConditionと併用する場合）
    pub fn compile_with(condition: &Condition, mut context: ExpressionContext) -> CompiledFilter {
        match condition.fold() {
            Folded::Always => CompiledFilter::Always,
            Folded::Never => CompiledFilter::Never,
            folded => {
                let expression = Self::emit(&folded, &mut context);
                CompiledFilter::Expression { expression, context }
            }
        }
    }

    fn emit(folded: &Folded<'_>, ctx: &mut ExpressionContext) -> String {
        match folded {
            Folded::And(parts) => Self::join(parts, " AND ", ctx),
            Folded::Or(parts) => Self::join(parts, " OR ", ctx),
            Folded::Not(inner) => format!("NOT {}", wrap(Self::emit(inner, ctx))),
            Folded::Leaf(condition) => Self::emit_leaf(condition, ctx),
            // fold後のトップレベル以外には現れない
            Folded::Always | Folded::Never => String::new(),
        }
    }

    fn join(parts: &[Folded<'_>], separator: &str, ctx: &mut ExpressionContext) -> String {
        let emitted: Vec<String> = parts.iter().map(|p| Self::emit(p, ctx)).collect();
        format!("({})", emitted.join(separator))
    }

    fn emit_leaf(condition: &Condition, ctx: &mut ExpressionContext) -> String {
        match condition {
            Condition::Comparison {
                key,
                comparator,
                value,
            } => {
                let name = ctx.name(key);
                let token = ctx.value(key, value);
                match comparator {
                    Comparator::Ne => format!("NOT ({name} = {token})"),
                    other => format!("{name} {} {token}", other.as_str()),
                }
            }
            Condition::Between { key, from, to } => {
                let name = ctx.name(key);
                let low = ctx.value(key, from);
                let high = ctx.value(key, to);
                format!("{name} BETWEEN {low} AND {high}")
            }
            Condition::Existence { key, exists } => {
                let name = ctx.name(key);
                if *exists {
                    format!("attribute_exists({name})")
                } else {
                    format!("attribute_not_exists({name})")
                }
            }
            Condition::StringMatch {
                key,
                operator,
                value,
            } => {
                let name = ctx.name(key);
                let token = ctx.value(key, value);
                match operator {
                    StringOperator::BeginsWith => format!("begins_with({name}, {token})"),
                    StringOperator::Contains => format!("contains({name}, {token})"),
                }
            }
            // 結合子はfoldで分解済み
            Condition::And(_) | Condition::Or(_) | Condition::Not(_) => String::new(),
        }
    }
}

/// 括弧で囲まれていない式を囲む
fn wrap(expression: String) -> String {
    if expression.starts_with('(') {
        expression
    } else {
        format!("({expression})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn expression_of(condition: &Condition) -> (String, ExpressionContext) {
        match FilterCompiler::compile(condition) {
            CompiledFilter::Expression { expression, context } => (expression, context),
            other => panic!("expected expression, got {:?}", other),
        }
    }

    #[test]
    fn test_comparison() {
        let (expr, ctx) = expression_of(&Condition::eq("type", "user"));
        assert_eq!(expr, "#type = :type");
        assert_eq!(ctx.names().get("#type").unwrap(), "type");
        assert_eq!(ctx.values().get(":type").unwrap(), &json!("user"));

        let (expr, _) = expression_of(&Condition::ge("age", 20));
        assert_eq!(expr, "#age >= :age");
    }

    #[test]
    fn test_not_equal_matches_negated_equal() {
        let (ne, ne_ctx) = expression_of(&Condition::ne("type", "A"));
        let (not_eq, not_eq_ctx) = expression_of(&Condition::negate(Condition::eq("type", "A")));
        assert_eq!(ne, "NOT (#type = :type)");
        assert_eq!(ne, not_eq);
        assert_eq!(ne_ctx, not_eq_ctx);
    }

    #[test]
    fn test_between_inclusive() {
        let (expr, ctx) = expression_of(&Condition::between("x", 1000000, 3000000));
        assert_eq!(expr, "#x BETWEEN :x AND :x_1");
        assert_eq!(ctx.values().get(":x").unwrap(), &json!(1000000));
        assert_eq!(ctx.values().get(":x_1").unwrap(), &json!(3000000));
    }

    #[test]
    fn test_existence_keeps_both_spellings() {
        let (exists, _) = expression_of(&Condition::exists("name"));
        let (missing, ctx) = expression_of(&Condition::not_exists("name"));
        assert_eq!(exists, "attribute_exists(#name)");
        assert_eq!(missing, "attribute_not_exists(#name)");
        assert!(ctx.values().is_empty());
    }

    #[test]
    fn test_string_match() {
        let (expr, _) = expression_of(&Condition::begins_with("name", "lem"));
        assert_eq!(expr, "begins_with(#name, :name)");
        let (expr, _) = expression_of(&Condition::contains("tags", "a"));
        assert_eq!(expr, "contains(#tags, :tags)");
    }

    #[test]
    fn test_nested_combinators_and_reused_key() {
        let condition = Condition::and(vec![
            Condition::eq("type", "user"),
            Condition::or(vec![
                Condition::gt("age", 20),
                Condition::lt("age", 10),
            ]),
            Condition::negate(Condition::exists("deleted")),
        ]);
        let (expr, ctx) = expression_of(&condition);
        assert_eq!(
            expr,
            "(#type = :type AND (#age > :age OR #age < :age_1) AND NOT (attribute_exists(#deleted)))"
        );
        assert_eq!(ctx.names().len(), 3);
        assert_eq!(ctx.values().len(), 3);
    }

    #[test]
    fn test_compile_is_deterministic() {
        let condition = Condition::from_value(&json!([
            {"key": "a-b", "comparator": "=", "value": 1},
            {"or": [{"key": "a-b", "from": 1, "to": 2}, {"key": "c.d", "operator": "contains", "value": "x"}]}
        ]))
        .unwrap();
        assert_eq!(FilterCompiler::compile(&condition), FilterCompiler::compile(&condition));
    }

    #[test]
    fn test_placeholder_collision_between_keys() {
        // "a-b" と "a_b" は同じ正規化名になる
        let condition = Condition::and(vec![Condition::eq("a-b", 1), Condition::eq("a_b", 2)]);
        let (expr, ctx) = expression_of(&condition);
        assert_eq!(expr, "(#a_b = :a_b AND #a_b_1 = :a_b_1)");
        assert_eq!(ctx.names().get("#a_b").unwrap(), "a-b");
        assert_eq!(ctx.names().get("#a_b_1").unwrap(), "a_b");
        assert_eq!(ctx.values().get(":a_b").unwrap(), &json!(1));
        assert_eq!(ctx.values().get(":a_b_1").unwrap(), &json!(2));
    }

    #[test]
    fn test_empty_combinators_fold() {
        assert_eq!(FilterCompiler::compile(&Condition::and(vec![])), CompiledFilter::Always);
        assert_eq!(FilterCompiler::compile(&Condition::or(vec![])), CompiledFilter::Never);
        assert_eq!(
            FilterCompiler::compile(&Condition::negate(Condition::and(vec![]))),
            CompiledFilter::Never
        );
        assert_eq!(
            FilterCompiler::compile(&Condition::or(vec![Condition::eq("a", 1), Condition::and(vec![])])),
            CompiledFilter::Always
        );
        assert_eq!(
            FilterCompiler::compile(&Condition::and(vec![Condition::eq("a", 1), Condition::or(vec![])])),
            CompiledFilter::Never
        );
    }

    #[test]
    fn test_folding_leaves_no_unused_placeholders() {
        let condition = Condition::and(vec![
            Condition::and(vec![]),
            Condition::eq("a", 1),
            Condition::or(vec![Condition::or(vec![]), Condition::eq("b", 2)]),
        ]);
        let (expr, ctx) = expression_of(&condition);
        assert_eq!(expr, "(#a = :a AND #b = :b)");
        assert_eq!(ctx.values().len(), 2);
    }

    #[test]
    fn test_shared_value_reuse() {
        let mut ctx = ExpressionContext::new();
        let first = ctx.shared_value(":_empty_list", json!([]));
        let second = ctx.shared_value(":_empty_list", json!([]));
        assert_eq!(first, second);
        let other = ctx.shared_value(":_empty_list", json!([1]));
        assert_eq!(other, ":_empty_list_1");
    }

    #[test]
    fn test_attribute_maps_for_sdk() {
        let (_, ctx) = expression_of(&Condition::eq("n", 3));
        let names = ctx.attribute_names().unwrap();
        assert_eq!(names.get("#n").unwrap(), "n");
        let values = ctx.attribute_values().unwrap().unwrap();
        assert_eq!(values.get(":n").unwrap(), &AttributeValue::N("3".to_string()));
        assert!(ExpressionContext::new().attribute_values().unwrap().is_none());
    }
}
