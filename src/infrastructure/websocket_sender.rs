/// API Gateway Management APIを使用したWebSocketメッセージ送信
///
/// WebSocketアダプターの応答とサーバー発のリクエストはJSONとして接続に送る。
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use aws_sdk_apigatewaymanagement::{primitives::Blob, Client as ApiGatewayManagementClient};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::ErrorReason;

/// WebSocket送信操作のエラー型
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SendError {
    /// 接続が切断された（API Gatewayからの410 GONE）
    #[error("Connection is gone")]
    ConnectionGone,

    /// ネットワークまたはサービスエラー
    #[error("Network error: {0}")]
    NetworkError(String),

    /// メッセージシリアライズエラー
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<SendError> for ErrorReason {
    fn from(e: SendError) -> Self {
        match e {
            SendError::ConnectionGone => ErrorReason::new(410, "GONE", "connection is gone"),
            SendError::NetworkError(message) => ErrorReason::new(503, "NETWORK", message),
            SendError::SerializationError(message) => ErrorReason::mapper_parsing(message),
        }
    }
}

/// WebSocketメッセージ送信用トレイト
///
/// このトレイトはWebSocket送信機能を抽象化し、
/// 異なる実装を可能にします（実際のAPI Gatewayクライアント、インメモリ）。
#[async_trait]
pub trait WebSocketSender: Send + Sync {
    /// 特定の接続にメッセージを送信
    ///
    /// # 引数
    /// * `connection_id` - API Gateway接続ID
    /// * `message` - 送信するメッセージ（JSON文字列）
    async fn send(&self, connection_id: &str, message: &str) -> Result<(), SendError>;

    /// JSONペイロードを送信
    async fn post(&self, connection_id: &str, payload: &Value) -> Result<(), SendError> {
        let message = serde_json::to_string(payload).map_err(|e| SendError::SerializationError(e.to_string()))?;
        self.send(connection_id, &message).await
    }
}

/// API Gateway Management API WebSocket送信実装
#[derive(Debug, Clone)]
pub struct ApiGatewayWebSocketSender {
    /// API Gateway Management APIクライアント
    client: ApiGatewayManagementClient,
}

impl ApiGatewayWebSocketSender {
    /// 指定されたエンドポイントURLで新しいApiGatewayWebSocketSenderを作成
    ///
    /// # 引数
    /// * `endpoint_url` - API Gateway Management APIエンドポイントURL
    ///   (例: "https://{api-id}.execute-api.{region}.amazonaws.com/{stage}")
    pub async fn new(endpoint_url: &str) -> Self {
        let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let client = ApiGatewayManagementClient::from_conf(
            aws_sdk_apigatewaymanagement::config::Builder::from(&aws_config)
                .endpoint_url(endpoint_url)
                .build(),
        );
        Self { client }
    }

    /// 事前設定されたクライアントで作成
    pub fn with_client(client: ApiGatewayManagementClient) -> Self {
        Self { client }
    }

    /// API GatewayリクエストコンテキストからエンドポイントURLを構築
    pub fn build_endpoint_url(domain_name: &str, stage: &str) -> String {
        format!("https://{domain_name}/{stage}")
    }
}

#[async_trait]
impl WebSocketSender for ApiGatewayWebSocketSender {
    async fn send(&self, connection_id: &str, message: &str) -> Result<(), SendError> {
        let data = Blob::new(message.as_bytes().to_vec());
        debug!(connection_id = connection_id, size = message.len(), "WebSocketメッセージ送信");

        match self
            .client
            .post_to_connection()
            .connection_id(connection_id)
            .data(data)
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(err) => {
                let service_error = err.into_service_error();

                // エラーが410 GONE（接続切断）かチェック
                if service_error.is_gone_exception() {
                    warn!(connection_id = connection_id, "接続が切断済み");
                    return Err(SendError::ConnectionGone);
                }

                Err(SendError::NetworkError(service_error.to_string()))
            }
        }
    }
}

/// 送信内容を記録するインメモリ実装
///
/// `gone`に登録した接続への送信は`ConnectionGone`になる。
#[derive(Debug, Clone, Default)]
pub struct DummyWebSocketSender {
    /// 送信されたメッセージ: (connection_id, message)
    sent: Arc<Mutex<Vec<(String, String)>>>,
    /// 切断済みとして扱う接続
    gone: Arc<Mutex<Vec<String>>>,
}

impl DummyWebSocketSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// 切断済みの接続を登録
    pub fn mark_gone(&self, connection_id: &str) {
        self.gone
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(connection_id.to_string());
    }

    /// 送信されたメッセージ一覧
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// 送信されたメッセージをJSONとして取得
    pub fn sent_json(&self) -> Vec<(String, Value)> {
        self.sent()
            .into_iter()
            .filter_map(|(id, message)| serde_json::from_str(&message).ok().map(|v| (id, v)))
            .collect()
    }
}

#[async_trait]
impl WebSocketSender for DummyWebSocketSender {
    async fn send(&self, connection_id: &str, message: &str) -> Result<(), SendError> {
        let gone = self
            .gone
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .any(|c| c == connection_id);
        if gone {
            return Err(SendError::ConnectionGone);
        }
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((connection_id.to_string(), message.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // ==================== エラー型 ====================

    #[test]
    fn test_send_error_connection_gone_display() {
        let error = SendError::ConnectionGone;
        assert_eq!(error.to_string(), "Connection is gone");
    }

    #[test]
    fn test_send_error_network_error_display() {
        let error = SendError::NetworkError("timeout".to_string());
        assert_eq!(error.to_string(), "Network error: timeout");
    }

    #[test]
    fn test_send_error_into_reason() {
        let reason: ErrorReason = SendError::ConnectionGone.into();
        assert_eq!(reason.message, "410 GONE - connection is gone");
        let reason: ErrorReason = SendError::SerializationError("bad".to_string()).into();
        assert!(reason.has_prefix("400 MAPPER PARSING"));
    }

    #[test]
    fn test_build_endpoint_url() {
        assert_eq!(
            ApiGatewayWebSocketSender::build_endpoint_url("abc.execute-api.ap-northeast-2.amazonaws.com", "prod"),
            "https://abc.execute-api.ap-northeast-2.amazonaws.com/prod"
        );
    }

    // ==================== インメモリ送信 ====================

    #[tokio::test]
    async fn test_dummy_sender_records_messages() {
        let sender = DummyWebSocketSender::new();
        sender.post("conn-1", &json!({"hello": "world"})).await.unwrap();
        sender.send("conn-2", "plain").await.unwrap();

        assert_eq!(sender.sent().len(), 2);
        let json_messages = sender.sent_json();
        assert_eq!(json_messages, vec![("conn-1".to_string(), json!({"hello": "world"}))]);
    }

    #[tokio::test]
    async fn test_dummy_sender_gone_connection() {
        let sender = DummyWebSocketSender::new();
        sender.mark_gone("conn-1");
        assert_eq!(sender.send("conn-1", "x").await, Err(SendError::ConnectionGone));
        assert!(sender.sent().is_empty());
    }

    #[tokio::test]
    #[ignore = "AWS認証情報が必要なため統合テストで実行"]
    async fn test_api_gateway_sender_gone() {
        let endpoint = std::env::var("TEST_WSS_ENDPOINT").unwrap_or_default();
        let sender = ApiGatewayWebSocketSender::new(&endpoint).await;
        let result = sender.send("nonexistent-connection", "{}").await;
        assert!(result.is_err());
    }
}
