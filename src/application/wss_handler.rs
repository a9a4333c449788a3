/// WebSocketイベントアダプター
///
/// API Gateway WebSocketの`requestContext.eventType`で処理を振り分ける。
/// - `$wsc-request-id`付きのメッセージはクライアントからのリクエストで、
///   応答に同じIDを付けて接続に返す
/// - `$wss-request-id`付きのメッセージはサーバー発リクエストへの応答
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use lambda_runtime::{service_fn, Error, LambdaEvent};
use serde_json::{json, Map, Value};
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};

use crate::application::sns_handler::parse_json_or_string;
use crate::domain::ErrorReason;
use crate::infrastructure::websocket_sender::{ApiGatewayWebSocketSender, WebSocketSender};

/// クライアント発リクエストのIDフィールド
pub const CLIENT_REQUEST_ID: &str = "$wsc-request-id";
/// サーバー発リクエストのIDフィールド
pub const SERVER_REQUEST_ID: &str = "$wss-request-id";

/// WebSocketイベント種別
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebSocketEventType {
    Connect,
    Disconnect,
    Message,
}

impl WebSocketEventType {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "CONNECT" => Some(Self::Connect),
            "DISCONNECT" => Some(Self::Disconnect),
            "MESSAGE" => Some(Self::Message),
            _ => None,
        }
    }
}

/// requestContextから取り出した接続情報
#[derive(Debug, Clone, PartialEq)]
pub struct WebSocketContext {
    pub connection_id: String,
    pub event_type: WebSocketEventType,
    pub route_key: Option<String>,
    pub domain_name: Option<String>,
    pub stage: Option<String>,
}

impl WebSocketContext {
    /// API Gateway WebSocketイベントから作成
    pub fn from_event(event: &Value) -> Result<Self, ErrorReason> {
        let ctx = event
            .get("requestContext")
            .ok_or_else(|| ErrorReason::illegal_argument("requestContext is required"))?;
        let text = |key: &str| ctx.get(key).and_then(|v| v.as_str()).map(str::to_string);

        let connection_id = text("connectionId")
            .ok_or_else(|| ErrorReason::illegal_argument("requestContext.connectionId is required"))?;
        let event_type = text("eventType")
            .ok_or_else(|| ErrorReason::illegal_argument("requestContext.eventType is required"))?;
        let event_type = WebSocketEventType::parse(&event_type)
            .ok_or_else(|| ErrorReason::illegal_argument(format!("eventType:{event_type}")))?;

        Ok(Self {
            connection_id,
            event_type,
            route_key: text("routeKey"),
            domain_name: text("domainName"),
            stage: text("stage"),
        })
    }

    /// API Gateway Management APIのエンドポイントURL
    pub fn endpoint_url(&self) -> Option<String> {
        match (&self.domain_name, &self.stage) {
            (Some(domain), Some(stage)) => Some(ApiGatewayWebSocketSender::build_endpoint_url(domain, stage)),
            _ => None,
        }
    }
}

/// WebSocketイベントを処理するハンドラー
#[async_trait]
pub trait WebSocketHandler: Send + Sync {
    /// 接続
    async fn connect(&self, ctx: &WebSocketContext) -> Result<(), ErrorReason>;

    /// 切断
    async fn disconnect(&self, ctx: &WebSocketContext) -> Result<(), ErrorReason>;

    /// メッセージ受信（Someを返すと応答本文になる）
    async fn message(&self, ctx: &WebSocketContext, body: Value) -> Result<Option<Value>, ErrorReason>;

    /// サーバー発リクエストへの応答を受信
    async fn reply(&self, ctx: &WebSocketContext, request_id: &str, body: Value) -> Result<(), ErrorReason> {
        debug!(connection_id = %ctx.connection_id, request_id = request_id, body = %body, "応答を破棄");
        Ok(())
    }
}

/// オブジェクトから指定フィールドを取り出す
fn take_request_id(body: &mut Value, field: &str) -> Option<String> {
    let id = body.as_object_mut()?.remove(field)?;
    match id {
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

/// API Gatewayへの応答
fn response(status: u16, body: impl Into<String>) -> Value {
    json!({ "statusCode": status, "body": body.into() })
}

/// WebSocketイベントをハンドラー呼び出しに変換するアダプター
pub struct WebSocketAdapter<H>
where
    H: WebSocketHandler,
{
    handler: H,
    /// 応答送信に使う送信者（未設定なら最初のイベントのエンドポイントから作成）
    sender: OnceCell<Arc<dyn WebSocketSender>>,
}

impl<H> WebSocketAdapter<H>
where
    H: WebSocketHandler + 'static,
{
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            sender: OnceCell::new(),
        }
    }

    /// 送信者を指定して作成
    pub fn with_sender(handler: H, sender: Arc<dyn WebSocketSender>) -> Self {
        Self {
            handler,
            sender: OnceCell::new_with(Some(sender)),
        }
    }

    async fn sender(&self, ctx: &WebSocketContext) -> Result<&Arc<dyn WebSocketSender>, ErrorReason> {
        self.sender
            .get_or_try_init(|| async {
                let endpoint = ctx
                    .endpoint_url()
                    .ok_or_else(|| ErrorReason::illegal_argument("requestContext.domainName/stage is required"))?;
                info!(endpoint = %endpoint, "WebSocket送信者を初期化");
                let sender: Arc<dyn WebSocketSender> = Arc::new(ApiGatewayWebSocketSender::new(&endpoint).await);
                Ok::<_, ErrorReason>(sender)
            })
            .await
    }

    /// API Gateway WebSocketイベントを処理
    ///
    /// # 戻り値
    /// * `{statusCode, body}`形式の応答（ハンドラーのエラーはステータスに変換）
    pub async fn handle_event(&self, event: &Value) -> Value {
        let ctx = match WebSocketContext::from_event(event) {
            Ok(ctx) => ctx,
            Err(e) => {
                warn!(error = %e, "不正なWebSocketイベント");
                return response(e.status, e.message);
            }
        };

        let result = match ctx.event_type {
            WebSocketEventType::Connect => self.handler.connect(&ctx).await.map(|_| None),
            WebSocketEventType::Disconnect => self.handler.disconnect(&ctx).await.map(|_| None),
            WebSocketEventType::Message => self.on_message(&ctx, event).await,
        };

        match result {
            Ok(Some(body)) => response(200, body.to_string()),
            Ok(None) => response(200, "OK"),
            Err(e) => {
                error!(error = %e, connection_id = %ctx.connection_id, "WebSocketイベント処理失敗");
                response(e.status, e.message)
            }
        }
    }

    async fn on_message(&self, ctx: &WebSocketContext, event: &Value) -> Result<Option<Value>, ErrorReason> {
        let mut body = event
            .get("body")
            .and_then(|b| b.as_str())
            .map(parse_json_or_string)
            .unwrap_or(Value::Null);

        if let Some(request_id) = take_request_id(&mut body, SERVER_REQUEST_ID) {
            self.handler.reply(ctx, &request_id, body).await?;
            return Ok(None);
        }

        let Some(request_id) = take_request_id(&mut body, CLIENT_REQUEST_ID) else {
            return self.handler.message(ctx, body).await;
        };

        // クライアントリクエストの応答は同じIDを付けて接続に送る
        let mut reply = Map::new();
        reply.insert(CLIENT_REQUEST_ID.to_string(), Value::String(request_id));
        match self.handler.message(ctx, body).await {
            Ok(result) => reply.insert("data".to_string(), result.unwrap_or(Value::Null)),
            Err(e) => reply.insert("error".to_string(), Value::String(e.message)),
        };
        let reply = Value::Object(reply);
        self.sender(ctx).await?.post(&ctx.connection_id, &reply).await?;
        Ok(None)
    }

    /// Lambdaランタイムに接続して実行
    pub async fn run(self) -> Result<(), Error> {
        let adapter = Arc::new(self);
        lambda_runtime::run(service_fn(move |event: LambdaEvent<Value>| {
            let adapter = Arc::clone(&adapter);
            async move { Ok::<Value, Error>(adapter.handle_event(&event.payload).await) }
        }))
        .await
    }
}

/// サーバーから接続へのメッセージ送信
pub struct WebSocketBroker {
    sender: Arc<dyn WebSocketSender>,
    sequence: AtomicU64,
}

impl WebSocketBroker {
    pub fn new(sender: Arc<dyn WebSocketSender>) -> Self {
        Self {
            sender,
            sequence: AtomicU64::new(0),
        }
    }

    /// 新しいリクエストIDを発行（`<epoch-millis>-<sequence>`）
    pub fn next_request_id(&self) -> String {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) % 10_000;
        format!("{}-{sequence:04}", chrono::Utc::now().timestamp_millis())
    }

    /// 応答を期待しないメッセージを送信
    pub async fn send(&self, connection_id: &str, payload: &Value) -> Result<(), ErrorReason> {
        Ok(self.sender.post(connection_id, payload).await?)
    }

    /// `$wss-request-id`を付けてリクエストを送信し、そのIDを返す
    ///
    /// 応答は`WebSocketHandler::reply`で受け取る。
    pub async fn request(&self, connection_id: &str, payload: Value) -> Result<String, ErrorReason> {
        let Value::Object(mut body) = payload else {
            return Err(ErrorReason::illegal_argument("payload must be an object"));
        };
        let request_id = self.next_request_id();
        body.insert(SERVER_REQUEST_ID.to_string(), Value::String(request_id.clone()));
        self.send(connection_id, &Value::Object(body)).await?;
        debug!(connection_id = connection_id, request_id = %request_id, "サーバーリクエスト送信");
        Ok(request_id)
    }
}

impl std::fmt::Debug for WebSocketBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketBroker")
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}
