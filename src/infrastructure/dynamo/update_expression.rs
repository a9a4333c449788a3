// UpdateCompiler - 更新内容をDynamoDB UpdateExpressionに変換
//
// - 通常フィールド: `SET #k = :k`
// - 数値インクリメント: `ADD #k :k`（未設定フィールドは加算値で初期化される）
// - 配列インクリメント: `SET #k = list_append(if_not_exists(#k, :_empty_list), :k)`
// - キー属性（id/sort）は更新対象から除外

use serde_json::Value;
use thiserror::Error;

use super::expression::ExpressionContext;
use crate::domain::{ErrorReason, Increments, Item};

/// 空配列の共有プレースホルダー
const EMPTY_LIST: &str = ":_empty_list";

/// UpdateExpression生成のエラー型
#[derive(Debug, Clone, PartialEq, Error)]
pub enum UpdateExpressionError {
    /// 更新内容が空
    #[error("empty update: nothing to set or increment")]
    Empty,

    /// 数値・配列以外のインクリメント
    #[error("increment of [{0}] must be a number or an array")]
    InvalidIncrement(String),

    /// 同じフィールドを更新とインクリメントの両方で指定
    #[error("field [{0}] is both updated and incremented")]
    Overlap(String),
}

impl From<UpdateExpressionError> for ErrorReason {
    fn from(e: UpdateExpressionError) -> Self {
        ErrorReason::illegal_argument(e.to_string())
    }
}

/// コンパイル済みUpdateExpression
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateExpression {
    pub expression: String,
    pub context: ExpressionContext,
}

/// 更新内容のコンパイラ
pub struct UpdateCompiler;

impl UpdateCompiler {
    /// 更新内容とインクリメントからUpdateExpressionを生成
    ///
    /// # Arguments
    /// * `id_name` - パーティションキー名（更新対象外）
    /// * `sort_name` - ソートキー名（更新対象外）
    /// * `updates` - 上書きするフィールド
    /// * `increments` - 加算（数値）または追記（配列）するフィールド
    pub fn compile(
        id_name: &str,
        sort_name: Option<&str>,
        updates: Option<&Item>,
        increments: Option<&Increments>,
    ) -> Result<UpdateExpression, UpdateExpressionError> {
        let is_key = |k: &str| k == id_name || Some(k) == sort_name;

        let mut ctx = ExpressionContext::new();
        let mut sets: Vec<String> = Vec::new();
        let mut adds: Vec<String> = Vec::new();

        if let Some(updates) = updates {
            for (key, value) in updates.iter().filter(|(k, _)| !is_key(k)) {
                if increments.is_some_and(|inc| inc.contains_key(key)) {
                    return Err(UpdateExpressionError::Overlap(key.clone()));
                }
                let name = ctx.name(key);
                let token = ctx.value(key, value);
                sets.push(format!("{name} = {token}"));
            }
        }

        if let Some(increments) = increments {
            for (key, amount) in increments.iter().filter(|(k, _)| !is_key(k)) {
                match amount {
                    Value::Number(_) => {
                        let name = ctx.name(key);
                        let token = ctx.value(key, amount);
                        adds.push(format!("{name} {token}"));
                    }
                    Value::Array(_) => {
                        let name = ctx.name(key);
                        let token = ctx.value(key, amount);
                        let empty = ctx.shared_value(EMPTY_LIST, Value::Array(vec![]));
                        sets.push(format!("{name} = list_append(if_not_exists({name}, {empty}), {token})"));
                    }
                    _ => return Err(UpdateExpressionError::InvalidIncrement(key.clone())),
                }
            }
        }

        let mut clauses: Vec<String> = Vec::new();
        if !sets.is_empty() {
            clauses.push(format!("SET {}", sets.join(", ")));
        }
        if !adds.is_empty() {
            clauses.push(format!("ADD {}", adds.join(", ")));
        }
        if clauses.is_empty() {
            return Err(UpdateExpressionError::Empty);
        }

        Ok(UpdateExpression {
            expression: clauses.join(" "),
            context: ctx,
        })
    }
}
