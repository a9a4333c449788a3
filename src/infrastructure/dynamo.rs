// DynamoDB関連のインフラストラクチャ実装
//
// テーブルへのアイテム操作（save/read/update/delete）とScan/Queryを提供する。
// フィルター条件と更新内容はそれぞれプレースホルダー付きの式に変換して送信する。

mod config;
mod expression;
mod scan;
mod service;
mod update_expression;

// 再エクスポート
pub use config::{DynamoConfig, DynamoConfigError, DynamoOption, KeyType};
pub use expression::{CompiledFilter, ExpressionContext, FilterCompiler};
pub use scan::{PreparedScan, QueryRequest, ScanPage, ScanRequest};
pub use service::{DynamoError, DynamoService, PreparedUpdate};
pub use update_expression::{UpdateCompiler, UpdateExpression, UpdateExpressionError};
