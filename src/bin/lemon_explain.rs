/// フィルター条件・更新内容の変換結果を表示するコマンド
///
/// DynamoDBのFilterExpression/UpdateExpressionと、
/// Elasticsearchのクエリ/Painlessスクリプトを確認できる。
///
/// # 使い方
/// ```bash
/// # フィルター条件（引数または標準入力）
/// cargo run --bin lemon-explain -- filter '[{"key":"type","comparator":"=","value":"A"}]'
/// echo '{"or":[...]}' | cargo run --bin lemon-explain -- filter
///
/// # 更新内容とインクリメント
/// cargo run --bin lemon-explain -- update --updates '{"name":"x"}' --increments '{"count":1}'
/// ```
use std::io::Read;

use clap::{Parser, Subcommand};
use lemon_core::domain::item::as_item;
use lemon_core::domain::{Condition, ConditionError, ErrorReason, Item};
use lemon_core::infrastructure::dynamo::{CompiledFilter, ExpressionContext, FilterCompiler, UpdateCompiler, UpdateExpressionError};
use lemon_core::infrastructure::elastic::{QueryBuilder, UpdateScript};
use serde_json::{json, Value};
use thiserror::Error;

/// コマンドライン引数
#[derive(Parser, Debug)]
#[command(name = "lemon-explain")]
#[command(about = "フィルター条件・更新内容をDynamoDB/Elasticsearchの形式に変換して表示")]
struct CliArgs {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// フィルター条件をFilterExpressionとクエリDSLに変換
    Filter {
        /// フィルター条件（JSON）。省略時は標準入力から読む
        filter: Option<String>,
    },
    /// 更新内容をUpdateExpressionとPainlessスクリプトに変換
    Update {
        /// 上書きするフィールド（JSONオブジェクト）
        #[arg(long, short = 'u')]
        updates: Option<String>,

        /// 加算・追記するフィールド（JSONオブジェクト）
        #[arg(long, short = 'i')]
        increments: Option<String>,

        /// パーティションキー名
        #[arg(long, default_value = "id")]
        id_name: String,

        /// Elasticsearch側をupsertとして生成
        #[arg(long)]
        upsert: bool,
    },
}

/// コマンドのエラー型
#[derive(Debug, Error)]
enum ExplainError {
    #[error("入力の読み込みに失敗: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSONのパースに失敗: {0}")]
    Json(#[from] serde_json::Error),

    #[error("フィルター条件が不正: {0}")]
    Condition(#[from] ConditionError),

    #[error("JSONオブジェクトが必要: {0}")]
    NotObject(String),

    #[error(transparent)]
    Update(#[from] UpdateExpressionError),

    #[error(transparent)]
    Reason(#[from] ErrorReason),
}

fn main() -> Result<(), ExplainError> {
    let args = CliArgs::parse();
    let output = match args.command {
        Command::Filter { filter } => explain_filter(&read_input(filter)?)?,
        Command::Update {
            updates,
            increments,
            id_name,
            upsert,
        } => explain_update(updates.as_deref(), increments.as_deref(), &id_name, upsert)?,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// 引数がなければ標準入力を読む
fn read_input(arg: Option<String>) -> Result<String, ExplainError> {
    match arg {
        Some(text) => Ok(text),
        None => {
            let mut text = String::new();
            std::io::stdin().read_to_string(&mut text)?;
            Ok(text)
        }
    }
}

fn context_json(context: &ExpressionContext) -> Value {
    json!({
        "ExpressionAttributeNames": context.names(),
        "ExpressionAttributeValues": context.values(),
    })
}

fn explain_filter(text: &str) -> Result<Value, ExplainError> {
    let condition = Condition::from_value(&serde_json::from_str(text)?)?;

    let dynamo = match FilterCompiler::compile(&condition) {
        CompiledFilter::Always => json!("always"),
        CompiledFilter::Never => json!("never"),
        CompiledFilter::Expression { expression, context } => {
            let mut value = context_json(&context);
            value["FilterExpression"] = Value::String(expression);
            value
        }
    };

    Ok(json!({
        "dynamo": dynamo,
        "elastic": { "query": QueryBuilder::build(Some(&condition)) },
    }))
}

fn parse_object(text: Option<&str>) -> Result<Option<Item>, ExplainError> {
    text.map(|text| {
        let value: Value = serde_json::from_str(text)?;
        as_item(value).ok_or_else(|| ExplainError::NotObject(text.to_string()))
    })
    .transpose()
}

fn explain_update(
    updates: Option<&str>,
    increments: Option<&str>,
    id_name: &str,
    upsert: bool,
) -> Result<Value, ExplainError> {
    let updates = parse_object(updates)?;
    let increments = parse_object(increments)?;

    let compiled = UpdateCompiler::compile(id_name, None, updates.as_ref(), increments.as_ref())?;
    let mut dynamo = context_json(&compiled.context);
    dynamo["UpdateExpression"] = Value::String(compiled.expression);

    let elastic = UpdateScript::build(updates.as_ref(), increments.as_ref(), upsert)?;
    Ok(json!({ "dynamo": dynamo, "elastic": elastic }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explain_filter() {
        let output = explain_filter(r#"{"key":"type","comparator":"=","value":"A"}"#).unwrap();
        assert_eq!(output["dynamo"]["FilterExpression"], json!("#type = :type"));
        assert_eq!(output["dynamo"]["ExpressionAttributeValues"][":type"], json!("A"));
        assert_eq!(output["elastic"]["query"]["term"]["type"], json!("A"));
    }

    #[test]
    fn test_explain_filter_never() {
        let output = explain_filter(r#"{"or":[]}"#).unwrap();
        assert_eq!(output["dynamo"], json!("never"));
    }

    #[test]
    fn test_explain_update() {
        let output = explain_update(Some(r#"{"name":"x"}"#), Some(r#"{"count":1}"#), "id", false).unwrap();
        assert_eq!(output["dynamo"]["UpdateExpression"], json!("SET #name = :name ADD #count :count"));
        assert_eq!(output["elastic"]["script"]["lang"], json!("painless"));
    }

    #[test]
    fn test_explain_update_requires_object() {
        let err = explain_update(Some("[1]"), None, "id", false).unwrap_err();
        assert!(matches!(err, ExplainError::NotObject(_)));
    }
}
