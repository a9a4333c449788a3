// アプリケーション層モジュール
//
// AWS Lambdaのイベント形式（SNS/SQS/WebSocket/API Gateway）を
// ハンドラー呼び出しに変換するアダプター。
pub mod sns_handler;
pub mod sqs_handler;
pub mod web_handler;
pub mod wss_handler;

// 再エクスポート
pub use sns_handler::{parse_json_or_string, SnsAdapter, SnsHandler};
pub use sqs_handler::{batch_response, SqsAdapter, SqsHandler, CALLBACK_ATTRIBUTE};
pub use web_handler::{status_of, WebAdapter, WebHandler, WebMode, WebRequest};
pub use wss_handler::{
    WebSocketAdapter, WebSocketBroker, WebSocketContext, WebSocketEventType, WebSocketHandler, CLIENT_REQUEST_ID,
    SERVER_REQUEST_ID,
};
