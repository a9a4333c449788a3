// Elasticsearch/OpenSearchクライアント
//
// AWSのマネージドドメインにはSigV4署名付きで、それ以外（ローカル等）には
// 署名なしで接続する。バージョンごとにパスが異なるため、リクエストは
// メソッド・パス・ボディの組として組み立ててから送信する。

use std::time::Duration;

use opensearch::http::headers::HeaderMap;
use opensearch::http::request::JsonBody;
use opensearch::http::transport::{SingleNodeConnectionPool, TransportBuilder};
use opensearch::http::Method;
use opensearch::OpenSearch;
use serde_json::Value;
use thiserror::Error;
use tracing::{error, info};
use url::Url;

use super::config::ElasticOption;
use crate::domain::ErrorReason;

/// クライアント構築エラー
#[derive(Debug, Error)]
pub enum ElasticClientError {
    /// エンドポイントURLのパースに失敗
    #[error("エンドポイントURLのパースに失敗: {0}")]
    UrlParseError(#[from] url::ParseError),

    /// トランスポート構築に失敗
    #[error("トランスポート構築に失敗: {0}")]
    TransportBuildError(String),

    /// AWS認証エラー
    #[error("AWS認証エラー: {0}")]
    AwsAuthError(String),
}

/// HTTPメソッド
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Put,
    Post,
    Delete,
    Head,
}

impl HttpMethod {
    fn to_method(self) -> Method {
        match self {
            HttpMethod::Get => Method::Get,
            HttpMethod::Put => Method::Put,
            HttpMethod::Post => Method::Post,
            HttpMethod::Delete => Method::Delete,
            HttpMethod::Head => Method::Head,
        }
    }
}

/// 送信前のリクエスト
#[derive(Debug, Clone, PartialEq)]
pub struct ElasticRequest {
    pub method: HttpMethod,
    pub path: String,
    pub params: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ElasticRequest {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            params: Vec::new(),
            body: None,
        }
    }

    pub fn param(mut self, key: &str, value: impl Into<String>) -> Self {
        self.params.push((key.to_string(), value.into()));
        self
    }

    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// レスポンス（ステータスとJSONボディ）
#[derive(Debug, Clone, PartialEq)]
pub struct ElasticResponse {
    pub status: u16,
    pub body: Value,
}

/// Elasticsearch/OpenSearchクライアント
#[derive(Debug, Clone)]
pub struct ElasticClient {
    client: OpenSearch,
    timeout: Duration,
}

impl ElasticClient {
    /// 設定からクライアントを作成
    pub async fn new(option: &ElasticOption) -> Result<Self, ElasticClientError> {
        info!(
            endpoint = option.endpoint(),
            index_name = option.index_name(),
            version = %option.version(),
            "Elasticクライアントを初期化中"
        );

        let url = Url::parse(option.endpoint())?;
        let conn_pool = SingleNodeConnectionPool::new(url);

        let builder = TransportBuilder::new(conn_pool).timeout(option.timeout());
        let builder = if option.is_aws_domain() {
            // AWS設定を読み込み（Lambda環境ではIAMロールから自動取得）
            let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
            builder
                .auth(
                    aws_config
                        .clone()
                        .try_into()
                        .map_err(|e| ElasticClientError::AwsAuthError(format!("{:?}", e)))?,
                )
                .service_name("es")
        } else {
            builder
        };

        let transport = builder.build().map_err(|e| {
            error!(error = %e, "Elasticトランスポート構築に失敗");
            ElasticClientError::TransportBuildError(e.to_string())
        })?;

        Ok(Self {
            client: OpenSearch::new(transport),
            timeout: option.timeout(),
        })
    }

    /// 内部クライアントへの参照を取得
    pub fn client(&self) -> &OpenSearch {
        &self.client
    }

    /// リクエストを送信
    ///
    /// 4xx/5xxは`ErrorReason`に正規化して返す。
    pub async fn send(&self, request: &ElasticRequest) -> Result<ElasticResponse, ErrorReason> {
        let params = (!request.params.is_empty()).then_some(&request.params);
        let body = request.body.clone().map(JsonBody::new);

        let response = self
            .client
            .send(
                request.method.to_method(),
                &request.path,
                HeaderMap::new(),
                params,
                body,
                Some(self.timeout),
            )
            .await
            .map_err(|e| {
                error!(error = %e, path = %request.path, "Elasticリクエストに失敗");
                transport_error(&e)
            })?;

        let status = response.status_code().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| ErrorReason::new(500, "TRANSPORT", format!("レスポンス取得エラー: {}", e)))?;

        if status >= 400 {
            return Err(error_of(status, &text));
        }

        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text)
                .map_err(|e| ErrorReason::new(500, "DESERIALIZATION", format!("レスポンスパースエラー: {}", e)))?
        };
        Ok(ElasticResponse { status, body })
    }
}

/// トランスポート層のエラーを正規化
fn transport_error(e: &opensearch::Error) -> ErrorReason {
    if e.is_timeout() {
        ErrorReason::timeout(e.to_string())
    } else {
        ErrorReason::new(503, "TRANSPORT", e.to_string())
    }
}

/// エラーレスポンスを正規化（認識できない形式はステータスのみで分類）
pub(super) fn error_of(status: u16, body: &str) -> ErrorReason {
    ErrorReason::from_response(status, body).unwrap_or_else(|| match status {
        404 => ErrorReason::not_found(body.to_string()),
        408 | 504 => ErrorReason::timeout(body.to_string()),
        _ => ErrorReason::new(status, "UNKNOWN", body.to_string()),
    })
}
