/// API Gateway（RESTプロキシ）イベントアダプター
///
/// HTTPメソッドとパスパラメーター（`id`, `cmd`）からモードを決め、
/// `WebHandler`を呼び出す。エラーは`ErrorReason`のステータスで応答する。
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use lambda_runtime::{service_fn, Error, LambdaEvent};
use serde_json::{json, Map, Value};
use tracing::{error, info};

use crate::application::sns_handler::parse_json_or_string;
use crate::domain::ErrorReason;

/// リクエストモード
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebMode {
    List,
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl WebMode {
    /// HTTPメソッドとIDの有無からモードを決定
    ///
    /// IDなしのGETは`LIST`。
    pub fn resolve(method: &str, has_id: bool) -> Option<Self> {
        match method.to_ascii_uppercase().as_str() {
            "GET" if has_id => Some(Self::Get),
            "GET" => Some(Self::List),
            "POST" => Some(Self::Post),
            "PUT" => Some(Self::Put),
            "PATCH" => Some(Self::Patch),
            "DELETE" => Some(Self::Delete),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::List => "LIST",
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for WebMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// ハンドラーに渡すリクエスト
#[derive(Debug, Clone, PartialEq)]
pub struct WebRequest {
    pub mode: WebMode,
    pub id: Option<String>,
    pub cmd: Option<String>,
    pub query: BTreeMap<String, String>,
    pub body: Option<Value>,
    /// 元のrequestContext
    pub context: Value,
}

impl WebRequest {
    /// API Gatewayプロキシイベントから作成
    pub fn from_event(event: &Value) -> Result<Self, ErrorReason> {
        let method = event
            .get("httpMethod")
            .and_then(|m| m.as_str())
            .ok_or_else(|| ErrorReason::illegal_argument("httpMethod is required"))?;

        let param = |key: &str| {
            event
                .get("pathParameters")
                .and_then(|p| p.get(key))
                .and_then(|v| v.as_str())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        let id = param("id");
        let cmd = param("cmd");

        let mode = WebMode::resolve(method, id.is_some())
            .ok_or_else(|| ErrorReason::new(405, "METHOD NOT ALLOWED", format!("method:{method}")))?;

        let query = event
            .get("queryStringParameters")
            .and_then(|q| q.as_object())
            .map(|q| {
                q.iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            mode,
            id,
            cmd,
            query,
            body: parse_body(event)?,
            context: event.get("requestContext").cloned().unwrap_or(Value::Null),
        })
    }
}

/// ヘッダーを大文字小文字を区別せずに取得
fn header<'a>(event: &'a Value, name: &str) -> Option<&'a str> {
    event
        .get("headers")
        .and_then(|h| h.as_object())?
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .and_then(|(_, v)| v.as_str())
}

/// base64エンコードされたボディをUTF-8文字列に復号
fn decode_base64_body(raw: &str) -> Result<String, ErrorReason> {
    let bytes = STANDARD
        .decode(raw.trim())
        .map_err(|e| ErrorReason::illegal_argument(format!("invalid base64 body: {e}")))?;
    String::from_utf8(bytes).map_err(|e| ErrorReason::illegal_argument(format!("body is not UTF-8: {e}")))
}

/// リクエストボディを解釈
///
/// `isBase64Encoded`なら復号してから、フォーム形式はオブジェクトに、
/// それ以外はJSON（失敗時は文字列）として扱う。
fn parse_body(event: &Value) -> Result<Option<Value>, ErrorReason> {
    let Some(raw) = event.get("body").and_then(|b| b.as_str()) else {
        return Ok(None);
    };
    let raw: Cow<'_, str> = if event.get("isBase64Encoded").and_then(|v| v.as_bool()).unwrap_or(false) {
        Cow::Owned(decode_base64_body(raw)?)
    } else {
        Cow::Borrowed(raw)
    };
    if raw.is_empty() {
        return Ok(None);
    }
    let is_form = header(event, "content-type")
        .map(|ct| ct.starts_with("application/x-www-form-urlencoded"))
        .unwrap_or(false);
    if is_form {
        let form: Map<String, Value> = url::form_urlencoded::parse(raw.as_bytes())
            .map(|(k, v)| (k.into_owned(), Value::String(v.into_owned())))
            .collect();
        return Ok(Some(Value::Object(form)));
    }
    Ok(Some(parse_json_or_string(&raw)))
}

/// HTTPステータスコード（4xx/5xx以外は500）
pub fn status_of(reason: &ErrorReason) -> u16 {
    match reason.status {
        400..=599 => reason.status,
        _ => 500,
    }
}

/// Webリクエストを処理するハンドラー
#[async_trait]
pub trait WebHandler: Send + Sync {
    async fn handle(&self, request: &WebRequest) -> Result<Value, ErrorReason>;
}

fn response(status: u16, body: String) -> Value {
    json!({
        "statusCode": status,
        "headers": { "Content-Type": "application/json; charset=utf-8" },
        "isBase64Encoded": false,
        "body": body,
    })
}

/// API Gatewayプロキシイベントをハンドラー呼び出しに変換するアダプター
pub struct WebAdapter<H>
where
    H: WebHandler,
{
    handler: H,
}

impl<H> WebAdapter<H>
where
    H: WebHandler + 'static,
{
    pub fn new(handler: H) -> Self {
        Self { handler }
    }

    /// プロキシイベントを処理して`{statusCode, headers, body}`を返す
    pub async fn handle_event(&self, event: &Value) -> Value {
        let result = match WebRequest::from_event(event) {
            Ok(request) => {
                info!(
                    mode = %request.mode,
                    id = request.id.as_deref().unwrap_or(""),
                    cmd = request.cmd.as_deref().unwrap_or(""),
                    "Webリクエスト受信"
                );
                self.handler.handle(&request).await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(body) => response(200, body.to_string()),
            Err(e) => {
                let status = status_of(&e);
                error!(error = %e, status = status, "Webリクエスト処理失敗");
                response(status, json!({ "error": e.message }).to_string())
            }
        }
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
