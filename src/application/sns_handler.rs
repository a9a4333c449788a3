/// SNSイベントアダプター
///
/// `Records[].Sns.Message`をJSONとして解釈し（失敗時は文字列のまま）、
/// レコードごとに`SnsHandler`を呼び出す。
use std::sync::Arc;

use async_trait::async_trait;
use aws_lambda_events::event::sns::SnsEvent;
use lambda_runtime::{service_fn, Error, LambdaEvent};
use serde_json::Value;
use tracing::{error, info};

use crate::domain::ErrorReason;

/// SNSメッセージを処理するハンドラー
#[async_trait]
pub trait SnsHandler: Send + Sync {
    /// 1件のSNSメッセージを処理
    ///
    /// # 引数
    /// * `subject` - SNSのSubject（未指定ならNone）
    /// * `message` - JSONとして解釈したメッセージ（解釈できなければ文字列）
    async fn handle(&self, subject: Option<&str>, message: Value) -> Result<Value, ErrorReason>;
}

/// 文字列をJSONとして解釈し、失敗した場合は文字列値を返す
pub fn parse_json_or_string(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// SNSイベントをハンドラー呼び出しに変換するアダプター
pub struct SnsAdapter<H>
where
    H: SnsHandler,
{
    handler: H,
}

impl<H> SnsAdapter<H>
where
    H: SnsHandler + 'static,
{
    pub fn new(handler: H) -> Self {
        Self { handler }
    }

    /// SNSイベントを処理してレコードごとの結果を返す
    ///
    /// いずれかのレコードが失敗した場合はそのエラーを返す（Lambdaの再試行対象）。
    pub async fn handle_event(&self, event: SnsEvent) -> Result<Vec<Value>, ErrorReason> {
        info!(record_count = event.records.len(), "SNSイベントを受信");

        let mut results = Vec::with_capacity(event.records.len());
        for record in event.records {
            let sns = record.sns;
            let subject = sns.subject.as_deref();
            let message = parse_json_or_string(&sns.message);

            let result = self.handler.handle(subject, message).await.inspect_err(|e| {
                error!(error = %e, subject = subject, message_id = %sns.message_id, "SNSメッセージ処理失敗");
            })?;
            results.push(result);
        }
        Ok(results)
    }

    /// Lambdaランタイムに接続して実行
    pub async fn run(self) -> Result<(), Error> {
        let adapter = Arc::new(self);
        lambda_runtime::run(service_fn(move |event: LambdaEvent<SnsEvent>| {
            let adapter = Arc::clone(&adapter);
            async move {
                let results = adapter.handle_event(event.payload).await?;
                Ok::<Value, Error>(Value::Array(results))
            }
        }))
        .await
    }
}
