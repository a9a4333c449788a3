/// DynamoDBのアイテム操作サービス
///
/// JSONアイテムとAttributeValueの相互変換は`serde_dynamo`で行う。
/// `prepare_*`はリクエスト内容のみを組み立てる純粋関数（ユニットテスト用）。
use std::collections::HashMap;

use aws_sdk_dynamodb::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_dynamodb::types::{AttributeValue, ReturnValue};
use aws_sdk_dynamodb::Client as DynamoDbClient;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, Span};

use super::config::{DynamoConfig, DynamoOption, KeyType};
use super::update_expression::{UpdateCompiler, UpdateExpressionError};
use crate::domain::item::{strip_reserved, ID_FIELD};
use crate::domain::{ErrorReason, Increments, Item};
use crate::infrastructure::logging::service_span;

/// DynamoDB操作のエラー型
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DynamoError {
    /// 正規化済みのエラー（404 NOT FOUND 等）
    #[error(transparent)]
    Reason(#[from] ErrorReason),

    /// DynamoDBへの書き込みに失敗
    #[error("Write error: {0}")]
    WriteError(String),

    /// DynamoDBからの読み取りに失敗
    #[error("Read error: {0}")]
    ReadError(String),

    /// データのシリアライズ/デシリアライズに失敗
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// 更新内容が不正
    #[error(transparent)]
    InvalidUpdate(#[from] UpdateExpressionError),
}

impl From<serde_dynamo::Error> for DynamoError {
    fn from(e: serde_dynamo::Error) -> Self {
        DynamoError::SerializationError(e.to_string())
    }
}

impl From<DynamoError> for ErrorReason {
    fn from(e: DynamoError) -> Self {
        match e {
            DynamoError::Reason(reason) => reason,
            DynamoError::InvalidUpdate(e) => e.into(),
            DynamoError::SerializationError(message) => ErrorReason::mapper_parsing(message),
            DynamoError::WriteError(message) | DynamoError::ReadError(message) => request_failure(message),
        }
    }
}

/// 入力内容を理由にDynamoDBが拒否した場合のエラーコード
const VALIDATION_EXCEPTION: &str = "ValidationException";

/// 書き込み/読み込みの失敗を正規化
///
/// 型の不一致（文字列属性へのADD等）は400 MAPPER PARSING、その他の入力不正は
/// 400 ILLEGAL ARGUMENT、それ以外は500 DYNAMO。
fn request_failure(message: String) -> ErrorReason {
    if !message.contains(VALIDATION_EXCEPTION) {
        return ErrorReason::new(500, "DYNAMO", message);
    }
    let lower = message.to_lowercase();
    if lower.contains("data type") || lower.contains("operand type") {
        ErrorReason::mapper_parsing(message)
    } else {
        ErrorReason::illegal_argument(message)
    }
}

/// SDKエラーを「コード: メッセージ」形式の文字列にする
///
/// サービスエラーでない場合（通信失敗等）は原因を含めた表示にフォールバック。
pub(super) fn sdk_error_message<E, R>(err: &SdkError<E, R>) -> String
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    match err.as_service_error().and_then(|e| e.code().map(|code| (code, e.message()))) {
        Some((code, Some(message))) => format!("{code}: {message}"),
        Some((code, None)) => code.to_string(),
        None => DisplayErrorContext(err).to_string(),
    }
}

/// 送信前のUpdateItemリクエスト内容
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedUpdate {
    pub key: HashMap<String, AttributeValue>,
    pub update_expression: String,
    pub names: Option<HashMap<String, String>>,
    pub values: Option<HashMap<String, AttributeValue>>,
}

/// DynamoDBテーブルに対するアイテム操作
#[derive(Debug, Clone)]
pub struct DynamoService {
    /// DynamoDBクライアント
    pub(super) client: DynamoDbClient,
    /// テーブル定義
    pub(super) option: DynamoOption,
    /// ログ出力用スパン
    pub(super) span: Span,
}

impl DynamoService {
    /// 新しいDynamoServiceを作成
    pub fn new(client: DynamoDbClient, option: DynamoOption) -> Self {
        let span = service_span("dynamo", &option.table_name);
        Self { client, option, span }
    }

    /// 設定から作成
    pub fn from_config(config: DynamoConfig) -> Self {
        let (client, option) = config.into_parts();
        Self::new(client, option)
    }

    /// ログ出力用スパンを差し替える
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn option(&self) -> &DynamoOption {
        &self.option
    }

    /// キー値をキー型に合わせたAttributeValueに変換
    pub(super) fn key_value(name: &str, kind: KeyType, value: &Value) -> Result<AttributeValue, DynamoError> {
        match (kind, value) {
            (KeyType::String, Value::String(s)) => Ok(AttributeValue::S(s.clone())),
            (KeyType::String, Value::Number(n)) => Ok(AttributeValue::S(n.to_string())),
            (KeyType::Number, Value::Number(n)) => Ok(AttributeValue::N(n.to_string())),
            (KeyType::Number, Value::String(s)) if s.trim().parse::<f64>().is_ok() => {
                Ok(AttributeValue::N(s.trim().to_string()))
            }
            _ => Err(ErrorReason::illegal_argument(format!("invalid key [{name}]: {value}")).into()),
        }
    }

    /// 主キーを組み立てる
    ///
    /// ソートキーを持つテーブルでは`sort`が必須。
    pub fn prepare_item_key(&self, id: &str, sort: Option<&Value>) -> Result<HashMap<String, AttributeValue>, DynamoError> {
        if id.is_empty() {
            return Err(ErrorReason::illegal_argument("@id is required").into());
        }

        let mut key = HashMap::new();
        key.insert(
            self.option.id_name.clone(),
            Self::key_value(&self.option.id_name, self.option.id_type, &Value::String(id.to_string()))?,
        );

        match (&self.option.sort_name, sort) {
            (Some(sort_name), Some(sort)) => {
                key.insert(sort_name.clone(), Self::key_value(sort_name, self.option.sort_type, sort)?);
            }
            (Some(sort_name), None) => {
                return Err(ErrorReason::illegal_argument(format!("@{sort_name} is required")).into());
            }
            (None, _) => {}
        }
        Ok(key)
    }

    /// PutItem用のアイテムを組み立てる（予約フィールドを除外しキーを上書き）
    pub fn prepare_save_item(&self, id: &str, item: &Item) -> Result<HashMap<String, AttributeValue>, DynamoError> {
        let sort = self
            .option
            .sort_name
            .as_deref()
            .and_then(|name| item.get(name));
        let key = self.prepare_item_key(id, sort)?;

        let mut attributes: HashMap<String, AttributeValue> = serde_dynamo::to_item(strip_reserved(item.clone()))?;
        attributes.extend(key);
        Ok(attributes)
    }

    /// UpdateItemリクエストを組み立てる
    pub fn prepare_update_item(
        &self,
        id: &str,
        sort: Option<&Value>,
        updates: Option<&Item>,
        increments: Option<&Increments>,
    ) -> Result<PreparedUpdate, DynamoError> {
        let key = self.prepare_item_key(id, sort)?;
        let updates = updates.map(|u| strip_reserved(u.clone()));
        let compiled = UpdateCompiler::compile(
            &self.option.id_name,
            self.option.sort_name.as_deref(),
            updates.as_ref(),
            increments,
        )?;

        Ok(PreparedUpdate {
            key,
            update_expression: compiled.expression,
            names: compiled.context.attribute_names(),
            values: compiled.context.attribute_values()?,
        })
    }

    /// DynamoDBのアイテムを正規化（`_id`を付与）
    pub(super) fn normalize(&self, raw: HashMap<String, AttributeValue>) -> Result<Item, DynamoError> {
        let mut item: Item = serde_dynamo::from_item(raw)?;
        let id = match item.get(&self.option.id_name) {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };
        if let Some(id) = id {
            item.insert(ID_FIELD.to_string(), Value::String(id));
        }
        Ok(item)
    }

    /// アイテムを保存（上書き）
    pub async fn save_item(&self, id: &str, item: &Item) -> Result<Item, DynamoError> {
        let attributes = self.prepare_save_item(id, item)?;
        debug!(parent: &self.span, id = id, "アイテム保存");

        self.client
            .put_item()
            .table_name(&self.option.table_name)
            .set_item(Some(attributes.clone()))
            .send()
            .await
            .map_err(|e| DynamoError::WriteError(sdk_error_message(&e)))?;

        self.normalize(attributes)
    }

    /// アイテムを読み込み（存在しなければ404 NOT FOUND）
    pub async fn read_item(&self, id: &str, sort: Option<&Value>) -> Result<Item, DynamoError> {
        let key = self.prepare_item_key(id, sort)?;
        debug!(parent: &self.span, id = id, "アイテム読み込み");

        let result = self
            .client
            .get_item()
            .table_name(&self.option.table_name)
            .set_key(Some(key))
            .send()
            .await
            .map_err(|e| DynamoError::ReadError(sdk_error_message(&e)))?;

        match result.item {
            Some(raw) => self.normalize(raw),
            None => Err(ErrorReason::not_found(format!("{}:{id}", self.option.id_name)).into()),
        }
    }

    /// アイテムを更新し、更新後の全属性を返す
    ///
    /// 存在しないアイテムは作成される。インクリメント対象が未設定なら加算値で初期化。
    pub async fn update_item(
        &self,
        id: &str,
        sort: Option<&Value>,
        updates: Option<&Item>,
        increments: Option<&Increments>,
    ) -> Result<Item, DynamoError> {
        let prepared = self.prepare_update_item(id, sort, updates, increments)?;
        debug!(parent: &self.span, id = id, expression = %prepared.update_expression, "アイテム更新");

        let result = self
            .client
            .update_item()
            .table_name(&self.option.table_name)
            .set_key(Some(prepared.key))
            .update_expression(prepared.update_expression)
            .set_expression_attribute_names(prepared.names)
            .set_expression_attribute_values(prepared.values)
            .return_values(ReturnValue::AllNew)
            .send()
            .await
            .map_err(|e| DynamoError::WriteError(sdk_error_message(&e)))?;

        match result.attributes {
            Some(raw) => self.normalize(raw),
            None => Err(ErrorReason::not_found(format!("{}:{id}", self.option.id_name)).into()),
        }
    }

    /// アイテムを削除し、削除前の属性を返す（存在しなければ404 NOT FOUND）
    pub async fn delete_item(&self, id: &str, sort: Option<&Value>) -> Result<Item, DynamoError> {
        let key = self.prepare_item_key(id, sort)?;
        debug!(parent: &self.span, id = id, "アイテム削除");

        let result = self
            .client
            .delete_item()
            .table_name(&self.option.table_name)
            .set_key(Some(key))
            .return_values(ReturnValue::AllOld)
            .send()
            .await
            .map_err(|e| DynamoError::WriteError(sdk_error_message(&e)))?;

        match result.attributes {
            Some(raw) => self.normalize(raw),
            None => Err(ErrorReason::not_found(format!("{}:{id}", self.option.id_name)).into()),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::item::as_item;
    use serde_json::json;

    pub(crate) async fn service(option: DynamoOption) -> DynamoService {
        let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        DynamoService::new(DynamoDbClient::new(&aws_config), option)
    }

    fn item(value: Value) -> Item {
        as_item(value).unwrap()
    }

    // ==================== エラー型 ====================

    #[test]
    fn test_dynamo_error_display() {
        let error = DynamoError::WriteError("conditional check failed".to_string());
        assert_eq!(error.to_string(), "Write error: conditional check failed");

        let error: DynamoError = ErrorReason::not_found("id:A0").into();
        assert_eq!(error.to_string(), "404 NOT FOUND - id:A0");
    }

    #[test]
    fn test_dynamo_error_into_reason() {
        let reason: ErrorReason = DynamoError::SerializationError("bad".to_string()).into();
        assert!(reason.has_prefix("400 MAPPER PARSING"));
        let reason: ErrorReason = DynamoError::ReadError("down".to_string()).into();
        assert_eq!(reason.message, "500 DYNAMO - down");
    }

    #[test]
    fn test_validation_type_mismatch_into_mapper_parsing() {
        // 文字列属性へのADDはDynamoDBが型不一致として拒否する
        let error = DynamoError::WriteError(
            "ValidationException: An operand in the update expression has an incorrect data type".to_string(),
        );
        let reason: ErrorReason = error.into();
        assert_eq!(reason.status, 400);
        assert!(reason.has_prefix("400 MAPPER PARSING"));
        assert!(reason.message.contains("incorrect data type"));
    }

    #[test]
    fn test_validation_other_into_illegal_argument() {
        let error = DynamoError::WriteError(
            "ValidationException: The provided key element does not match the schema".to_string(),
        );
        let reason: ErrorReason = error.into();
        assert!(reason.has_prefix("400 ILLEGAL ARGUMENT"));

        let error = DynamoError::ReadError("ValidationException: Invalid UpdateExpression: Incorrect operand type for operator or function".to_string());
        let reason: ErrorReason = error.into();
        assert!(reason.has_prefix("400 MAPPER PARSING"));
    }

    #[test]
    fn test_transport_failure_stays_internal() {
        let error = DynamoError::WriteError("dispatch failure: io error: connection refused".to_string());
        let reason: ErrorReason = error.into();
        assert_eq!(reason.status, 500);
        assert!(reason.has_prefix("500 DYNAMO"));
    }

    // ==================== 構築 ====================

    #[tokio::test]
    async fn test_from_config_keeps_option() {
        let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let config = DynamoConfig::new(DynamoDbClient::new(&aws_config), DynamoOption::new("Items", "id"));
        let svc = DynamoService::from_config(config);
        assert_eq!(svc.option().table_name, "Items");
        assert_eq!(svc.option().id_name, "id");
    }

    #[tokio::test]
    async fn test_with_span_replaces_logging_span() {
        let _default = tracing::subscriber::set_default(tracing_subscriber::registry());

        let svc = service(DynamoOption::new("Items", "id")).await;
        assert_eq!(svc.span.metadata().map(|m| m.name()), Some("service"));

        let span = tracing::info_span!("request", request_id = "r-1");
        let svc = svc.with_span(span.clone());
        assert_eq!(svc.span.id(), span.id());
        assert_eq!(svc.span.metadata().map(|m| m.name()), Some("request"));
    }

    // ==================== キー ====================

    #[test]
    fn test_key_value_types() {
        assert_eq!(
            DynamoService::key_value("id", KeyType::String, &json!("A0")).unwrap(),
            AttributeValue::S("A0".to_string())
        );
        assert_eq!(
            DynamoService::key_value("id", KeyType::Number, &json!("12")).unwrap(),
            AttributeValue::N("12".to_string())
        );
        assert_eq!(
            DynamoService::key_value("id", KeyType::Number, &json!(3)).unwrap(),
            AttributeValue::N("3".to_string())
        );
        assert!(DynamoService::key_value("id", KeyType::Number, &json!("abc")).is_err());
        assert!(DynamoService::key_value("id", KeyType::String, &json!(null)).is_err());
    }

    #[tokio::test]
    async fn test_prepare_item_key() {
        let svc = service(DynamoOption::new("TestTable", "id")).await;
        let key = svc.prepare_item_key("A0", None).unwrap();
        assert_eq!(key.get("id").unwrap(), &AttributeValue::S("A0".to_string()));
        assert_eq!(key.len(), 1);
        assert!(svc.prepare_item_key("", None).is_err());
    }

    #[tokio::test]
    async fn test_prepare_item_key_requires_sort() {
        let svc = service(DynamoOption::new("TestTable", "pk").with_sort("sk", KeyType::Number)).await;
        let key = svc.prepare_item_key("A0", Some(&json!(1))).unwrap();
        assert_eq!(key.get("sk").unwrap(), &AttributeValue::N("1".to_string()));

        let err = svc.prepare_item_key("A0", None).unwrap_err();
        assert_eq!(err.to_string(), "400 ILLEGAL ARGUMENT - @sk is required");
    }

    // ==================== リクエスト組み立て ====================

    #[tokio::test]
    async fn test_prepare_save_item() {
        let svc = service(DynamoOption::new("TestTable", "id")).await;
        let attributes = svc
            .prepare_save_item("A0", &item(json!({"_id": "X", "_version": 2, "name": "lemon", "count": 1})))
            .unwrap();

        assert_eq!(attributes.get("id").unwrap(), &AttributeValue::S("A0".to_string()));
        assert_eq!(attributes.get("name").unwrap(), &AttributeValue::S("lemon".to_string()));
        assert_eq!(attributes.get("count").unwrap(), &AttributeValue::N("1".to_string()));
        assert!(!attributes.contains_key("_id"));
        assert!(!attributes.contains_key("_version"));
    }

    #[tokio::test]
    async fn test_prepare_update_item() {
        let svc = service(DynamoOption::new("TestTable", "id")).await;
        let prepared = svc
            .prepare_update_item("A0", None, Some(&item(json!({"id": "B", "name": "x"}))), Some(&item(json!({"count": 0}))))
            .unwrap();

        assert_eq!(prepared.update_expression, "SET #name = :name ADD #count :count");
        let names = prepared.names.unwrap();
        assert_eq!(names.get("#count").unwrap(), "count");
        let values = prepared.values.unwrap();
        assert_eq!(values.get(":count").unwrap(), &AttributeValue::N("0".to_string()));
        assert_eq!(prepared.key.get("id").unwrap(), &AttributeValue::S("A0".to_string()));
    }

    #[tokio::test]
    async fn test_prepare_update_item_empty() {
        let svc = service(DynamoOption::new("TestTable", "id")).await;
        let err = svc.prepare_update_item("A0", None, Some(&item(json!({"_id": "A0"}))), None).unwrap_err();
        assert_eq!(err, DynamoError::InvalidUpdate(UpdateExpressionError::Empty));
    }

    #[tokio::test]
    async fn test_normalize_adds_id() {
        let svc = service(DynamoOption::new("TestTable", "id").with_id_type(KeyType::Number)).await;
        let mut raw = HashMap::new();
        raw.insert("id".to_string(), AttributeValue::N("7".to_string()));
        raw.insert("name".to_string(), AttributeValue::S("lemon".to_string()));

        let normalized = svc.normalize(raw).unwrap();
        assert_eq!(normalized.get("_id").unwrap(), &json!("7"));
        assert_eq!(normalized.get("name").unwrap(), &json!("lemon"));
    }

    // ==================== 実DynamoDB（要AWS認証情報） ====================

    #[tokio::test]
    #[ignore]
    async fn test_item_lifecycle_against_dynamodb() {
        let table = std::env::var("TEST_DYNAMO_TABLE").unwrap_or_else(|_| "TestTable".to_string());
        let svc = service(DynamoOption::new(table, "id")).await;

        let saved = svc.save_item("A0", &item(json!({"type": "test"}))).await.unwrap();
        assert_eq!(saved.get("_id").unwrap(), &json!("A0"));

        let updated = svc.update_item("A0", None, None, Some(&item(json!({"count": 0})))).await.unwrap();
        assert_eq!(updated.get("count").unwrap(), &json!(0));

        let updated = svc.update_item("A0", None, None, Some(&item(json!({"count": 2})))).await.unwrap();
        assert_eq!(updated.get("count").unwrap(), &json!(2));

        svc.delete_item("A0", None).await.unwrap();
        let err = svc.read_item("A0", None).await.unwrap_err();
        assert!(err.to_string().starts_with("404 NOT FOUND"));
    }
}
