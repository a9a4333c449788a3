/// DynamoDB接続設定
///
/// テーブル名・キー定義（`DynamoOption`）とクライアントをまとめる。
/// 生成後は変更しない。
use aws_sdk_dynamodb::Client as DynamoDbClient;
use thiserror::Error;

use crate::infrastructure::environ::{Environ, EnvironError};

/// DynamoDB設定のエラー型
#[derive(Debug, Error)]
pub enum DynamoConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid key type: {0}")]
    InvalidKeyType(String),
}

impl From<EnvironError> for DynamoConfigError {
    fn from(e: EnvironError) -> Self {
        match e {
            EnvironError::MissingVar(key) => DynamoConfigError::MissingEnvVar(key),
            other => DynamoConfigError::MissingEnvVar(other.to_string()),
        }
    }
}

/// キー属性の型
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum KeyType {
    /// 文字列（S）
    #[default]
    String,
    /// 数値（N）
    Number,
}

impl KeyType {
    /// `S` / `N`（小文字・`string`/`number`も可）を解析
    pub fn parse(value: &str) -> Result<Self, DynamoConfigError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "s" | "string" => Ok(KeyType::String),
            "n" | "number" => Ok(KeyType::Number),
            _ => Err(DynamoConfigError::InvalidKeyType(value.to_string())),
        }
    }
}

/// テーブル定義
///
/// 環境変数:
/// - DYNAMO_TABLE: テーブル名（必須）
/// - DYNAMO_ID_NAME: パーティションキー名（デフォルト: id）
/// - DYNAMO_ID_TYPE: パーティションキー型（デフォルト: S）
/// - DYNAMO_SORT_NAME: ソートキー名（任意）
/// - DYNAMO_SORT_TYPE: ソートキー型（デフォルト: S）
#[derive(Debug, Clone, PartialEq)]
pub struct DynamoOption {
    pub table_name: String,
    pub id_name: String,
    pub id_type: KeyType,
    pub sort_name: Option<String>,
    pub sort_type: KeyType,
}

impl DynamoOption {
    pub const DEFAULT_ID_NAME: &'static str = "id";

    /// 文字列パーティションキーのみのテーブル定義
    pub fn new(table_name: impl Into<String>, id_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            id_name: id_name.into(),
            id_type: KeyType::String,
            sort_name: None,
            sort_type: KeyType::String,
        }
    }

    /// パーティションキーの型を指定
    pub fn with_id_type(mut self, id_type: KeyType) -> Self {
        self.id_type = id_type;
        self
    }

    /// ソートキーを指定
    pub fn with_sort(mut self, sort_name: impl Into<String>, sort_type: KeyType) -> Self {
        self.sort_name = Some(sort_name.into());
        self.sort_type = sort_type;
        self
    }

    /// 環境設定からテーブル定義を作成
    pub fn from_environ(environ: &Environ) -> Result<Self, DynamoConfigError> {
        let table_name = environ.require("DYNAMO_TABLE")?.to_string();
        let id_name = environ.get_or("DYNAMO_ID_NAME", Self::DEFAULT_ID_NAME);
        let id_type = environ.get("DYNAMO_ID_TYPE").map(KeyType::parse).transpose()?.unwrap_or_default();

        let mut option = Self::new(table_name, id_name).with_id_type(id_type);
        if let Some(sort_name) = environ.get("DYNAMO_SORT_NAME").filter(|s| !s.is_empty()) {
            let sort_type = environ.get("DYNAMO_SORT_TYPE").map(KeyType::parse).transpose()?.unwrap_or_default();
            option = option.with_sort(sort_name, sort_type);
        }
        Ok(option)
    }

    /// キー属性かどうか
    pub fn is_key(&self, name: &str) -> bool {
        name == self.id_name || self.sort_name.as_deref() == Some(name)
    }
}

/// クライアントとテーブル定義を持つDynamoDB設定
#[derive(Debug, Clone)]
pub struct DynamoConfig {
    /// DynamoDBクライアントインスタンス
    client: DynamoDbClient,
    /// テーブル定義
    option: DynamoOption,
}

impl DynamoConfig {
    /// AWS設定と環境設定から作成
    ///
    /// `DYNAMO_ENDPOINT` が設定されていればローカルDynamoDB等に接続する。
    pub async fn from_environ(environ: &Environ) -> Result<Self, DynamoConfigError> {
        let option = DynamoOption::from_environ(environ)?;

        // 環境からAWS設定を読み込み（認証情報、リージョンなど）
        let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let client = match environ.get("DYNAMO_ENDPOINT").filter(|s| !s.is_empty()) {
            Some(endpoint) => {
                let conf = aws_sdk_dynamodb::config::Builder::from(&aws_config)
                    .endpoint_url(endpoint)
                    .build();
                DynamoDbClient::from_conf(conf)
            }
            None => DynamoDbClient::new(&aws_config),
        };

        Ok(Self { client, option })
    }

    /// 明示的な値で作成（テスト用）
    pub fn new(client: DynamoDbClient, option: DynamoOption) -> Self {
        Self { client, option }
    }

    pub fn client(&self) -> &DynamoDbClient {
        &self.client
    }

    pub fn option(&self) -> &DynamoOption {
        &self.option
    }

    pub fn into_parts(self) -> (DynamoDbClient, DynamoOption) {
        (self.client, self.option)
    }
}
