/// SQSイベントアダプター
///
/// `Records[].body`をJSONとして解釈し、`messageAttributes.callback`と共に
/// `SqsHandler`を呼び出す。失敗したレコードは部分バッチ応答として返す。
use std::sync::Arc;

use async_trait::async_trait;
use aws_lambda_events::event::sqs::{BatchItemFailure, SqsBatchResponse, SqsEvent, SqsMessage};
use lambda_runtime::{service_fn, Error, LambdaEvent};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::application::sns_handler::parse_json_or_string;
use crate::domain::ErrorReason;

/// コールバック先を指定するメッセージ属性名
pub const CALLBACK_ATTRIBUTE: &str = "callback";

/// SQSメッセージを処理するハンドラー
#[async_trait]
pub trait SqsHandler: Send + Sync {
    /// 1件のSQSメッセージを処理
    ///
    /// # 引数
    /// * `message` - JSONとして解釈したbody（解釈できなければ文字列）
    /// * `callback` - `callback`属性の値
    async fn handle(&self, message: Value, callback: Option<&str>) -> Result<(), ErrorReason>;
}

/// SQSイベントをハンドラー呼び出しに変換するアダプター
pub struct SqsAdapter<H>
where
    H: SqsHandler,
{
    handler: H,
}

impl<H> SqsAdapter<H>
where
    H: SqsHandler + 'static,
{
    pub fn new(handler: H) -> Self {
        Self { handler }
    }

    /// SQSイベントを処理し、失敗したメッセージIDを返す
    pub async fn handle_event(&self, event: SqsEvent) -> Result<Vec<String>, ErrorReason> {
        info!(record_count = event.records.len(), "SQSイベントを受信");

        let mut failures = Vec::new();
        for record in event.records {
            let message = record.body.as_deref().map(parse_json_or_string).unwrap_or(Value::Null);
            let callback = callback_of(&record);

            if let Err(e) = self.handler.handle(message, callback).await {
                error!(error = %e, message_id = ?record.message_id, "SQSメッセージ処理失敗");
                match record.message_id {
                    Some(id) if !id.is_empty() => failures.push(id),
                    // 再試行対象を特定できないためバッチ全体を失敗させる
                    _ => return Err(e),
                }
            }
        }

        if !failures.is_empty() {
            warn!(failure_count = failures.len(), "一部のSQSメッセージが失敗");
        }
        Ok(failures)
    }

    /// Lambdaランタイムに接続して実行
    pub async fn run(self) -> Result<(), Error> {
        let adapter = Arc::new(self);
        lambda_runtime::run(service_fn(move |event: LambdaEvent<SqsEvent>| {
            let adapter = Arc::clone(&adapter);
            async move {
                let failures = adapter.handle_event(event.payload).await?;
                Ok::<SqsBatchResponse, Error>(batch_response(failures))
            }
        }))
        .await
    }
}

/// `messageAttributes.callback`の文字列値を取得
fn callback_of(record: &SqsMessage) -> Option<&str> {
    record
        .message_attributes
        .get(CALLBACK_ATTRIBUTE)
        .and_then(|attr| attr.string_value.as_deref())
}

/// 失敗したメッセージIDから部分バッチ応答を作成
pub fn batch_response(failures: Vec<String>) -> SqsBatchResponse {
    let mut response = SqsBatchResponse::default();
    response.batch_item_failures = failures
        .into_iter()
        .map(|id| {
            let mut failure = BatchItemFailure::default();
            failure.item_identifier = id;
            failure
        })
        .collect();
    response
}
