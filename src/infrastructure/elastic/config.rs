// Elasticsearch/OpenSearch接続設定
//
// エンドポイント・インデックス名・エンジンバージョンを保持する。
// バージョン文字列は生成時に一度だけ解析し、以降は変更しない。

use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::domain::{parse_version, ParsedVersion, VersionParseError};
use crate::infrastructure::environ::{Environ, EnvironError};

/// Elastic設定のエラー型
#[derive(Debug, Error)]
pub enum ElasticConfigError {
    /// 環境変数が欠落
    #[error("環境変数が設定されていません: {0}")]
    MissingEnvVar(String),

    /// エンドポイントURLが無効
    #[error("無効なエンドポイントURL: {0}")]
    InvalidEndpoint(String),

    /// バージョン文字列が無効
    #[error(transparent)]
    InvalidVersion(#[from] VersionParseError),

    /// 設定値が不正
    #[error("設定値が不正です: {0}")]
    InvalidValue(String),
}

impl From<EnvironError> for ElasticConfigError {
    fn from(e: EnvironError) -> Self {
        match e {
            EnvironError::MissingVar(key) => ElasticConfigError::MissingEnvVar(key),
            other => ElasticConfigError::InvalidValue(other.to_string()),
        }
    }
}

/// インデックス設定
///
/// 環境変数:
/// - ES_ENDPOINT: エンドポイントURL（必須）
/// - ES_INDEX: インデックス名（必須）
/// - ES_ID_NAME: IDフィールド名（デフォルト: $id）
/// - ES_DOCTYPE: ドキュメントタイプ（デフォルト: _doc、ES6のみ使用）
/// - ES_VERSION: エンジンバージョン（デフォルト: 6.8）
/// - ES_TIMEOUT: リクエストタイムアウト（ミリ秒、デフォルト: 30000）
#[derive(Debug, Clone, PartialEq)]
pub struct ElasticOption {
    endpoint: String,
    index_name: String,
    id_name: String,
    doc_type: String,
    version: ParsedVersion,
    timeout: Duration,
}

impl ElasticOption {
    pub const DEFAULT_ID_NAME: &'static str = "$id";
    pub const DEFAULT_DOC_TYPE: &'static str = "_doc";
    pub const DEFAULT_VERSION: &'static str = "6.8";
    pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

    /// デフォルト値で作成
    pub fn new(endpoint: impl Into<String>, index_name: impl Into<String>) -> Result<Self, ElasticConfigError> {
        let endpoint = endpoint.into();
        Self::validate_endpoint(&endpoint)?;
        Ok(Self {
            endpoint,
            index_name: index_name.into(),
            id_name: Self::DEFAULT_ID_NAME.to_string(),
            doc_type: Self::DEFAULT_DOC_TYPE.to_string(),
            version: parse_version(Self::DEFAULT_VERSION)?,
            timeout: Duration::from_millis(Self::DEFAULT_TIMEOUT_MS),
        })
    }

    /// エンジンバージョンを指定
    pub fn with_version(mut self, version: &str) -> Result<Self, ElasticConfigError> {
        self.version = parse_version(version)?;
        Ok(self)
    }

    pub fn with_id_name(mut self, id_name: impl Into<String>) -> Self {
        self.id_name = id_name.into();
        self
    }

    pub fn with_doc_type(mut self, doc_type: impl Into<String>) -> Self {
        self.doc_type = doc_type.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// 環境設定から作成
    pub fn from_environ(environ: &Environ) -> Result<Self, ElasticConfigError> {
        let endpoint = environ.require("ES_ENDPOINT")?;
        let index_name = environ.require("ES_INDEX")?;
        let timeout = environ.get_u64("ES_TIMEOUT")?.unwrap_or(Self::DEFAULT_TIMEOUT_MS);

        Ok(Self::new(endpoint, index_name)?
            .with_version(&environ.get_or("ES_VERSION", Self::DEFAULT_VERSION))?
            .with_id_name(environ.get_or("ES_ID_NAME", Self::DEFAULT_ID_NAME))
            .with_doc_type(environ.get_or("ES_DOCTYPE", Self::DEFAULT_DOC_TYPE))
            .with_timeout(Duration::from_millis(timeout)))
    }

    /// エンドポイントURLのバリデーション
    fn validate_endpoint(endpoint: &str) -> Result<(), ElasticConfigError> {
        let url = Url::parse(endpoint)
            .map_err(|e| ElasticConfigError::InvalidEndpoint(format!("{}: {}", endpoint, e)))?;

        if url.scheme() != "https" && url.scheme() != "http" {
            return Err(ElasticConfigError::InvalidEndpoint(format!(
                "{}: スキームはhttpまたはhttpsである必要があります",
                endpoint
            )));
        }
        Ok(())
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    pub fn id_name(&self) -> &str {
        &self.id_name
    }

    pub fn doc_type(&self) -> &str {
        &self.doc_type
    }

    pub fn version(&self) -> &ParsedVersion {
        &self.version
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// AWSのマネージドドメインかどうか（SigV4署名が必要）
    pub fn is_aws_domain(&self) -> bool {
        Url::parse(&self.endpoint)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.ends_with(".amazonaws.com")))
            .unwrap_or(false)
    }
}
