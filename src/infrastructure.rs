// Infrastructure layer modules
pub mod dummy_storage_service;
pub mod dynamo;
pub mod elastic;
pub mod environ;
pub mod logging;
pub mod storage_service;
pub mod websocket_sender;

// Re-exports
pub use dummy_storage_service::DummyStorageService;
pub use environ::{Environ, EnvironError};
pub use logging::{init_logging, service_span};
pub use storage_service::{filter_fields, DynamoStorageService, StorageService};
pub use websocket_sender::{ApiGatewayWebSocketSender, DummyWebSocketSender, SendError, WebSocketSender};
