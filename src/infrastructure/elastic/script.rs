// UpdateScript - 更新内容を_updateリクエストボディに変換
//
// - インクリメントなし: `{doc}`（upsert時は`doc_as_upsert`）
// - インクリメントあり: Painlessスクリプト
//   - 未設定フィールドは加算値で初期化
//   - 配列は`addAll`、数値は`+=`
// - upsert時は`upsert`に更新内容とインクリメントを合成した初期ドキュメントを付与
// - 同じフィールドの更新とインクリメントの併用は不可

use serde_json::{json, Value};

use crate::domain::{check_overlap, ErrorReason, Increments, Item};

/// _updateリクエストボディの生成
pub struct UpdateScript;

impl UpdateScript {
    /// 更新ボディを組み立てる
    ///
    /// # Arguments
    /// * `updates` - 上書きするフィールド
    /// * `increments` - 加算（数値）または追記（配列）するフィールド
    /// * `upsert` - ドキュメントが存在しない場合に作成するか
    pub fn build(updates: Option<&Item>, increments: Option<&Increments>, upsert: bool) -> Result<Value, ErrorReason> {
        let empty = Item::new();
        let updates = updates.unwrap_or(&empty);
        let increments = increments.filter(|i| !i.is_empty());

        check_overlap(Some(updates), increments)?;

        let Some(increments) = increments else {
            if updates.is_empty() {
                return Err(ErrorReason::illegal_argument("empty update: nothing to set or increment"));
            }
            let mut body = json!({ "doc": updates });
            if upsert {
                body["doc_as_upsert"] = Value::Bool(true);
            }
            return Ok(body);
        };

        let mut lines: Vec<String> = Vec::new();
        for key in updates.keys() {
            let field = quote(key);
            lines.push(format!("ctx._source[{field}] = params.item[{field}];"));
        }
        for (key, amount) in increments {
            let field = quote(key);
            let apply = match amount {
                Value::Array(_) => format!("ctx._source[{field}].addAll(params.increments[{field}]);"),
                Value::Number(_) => format!("ctx._source[{field}] += params.increments[{field}];"),
                other => {
                    return Err(ErrorReason::illegal_argument(format!(
                        "increment of [{key}] must be a number or an array, got {other}"
                    )));
                }
            };
            lines.push(format!(
                "if (ctx._source[{field}] == null) {{ ctx._source[{field}] = params.increments[{field}]; }} else {{ {apply} }}"
            ));
        }

        let mut body = json!({
            "script": {
                "source": lines.join("\n"),
                "lang": "painless",
                "params": { "item": updates, "increments": increments }
            }
        });
        if upsert {
            let mut initial = updates.clone();
            for (key, amount) in increments {
                initial.insert(key.clone(), amount.clone());
            }
            body["upsert"] = Value::Object(initial);
        }
        Ok(body)
    }
}

/// Painlessの文字列リテラル
fn quote(key: &str) -> String {
    format!("'{}'", key.replace('\\', "\\\\").replace('\'', "\\'"))
}
