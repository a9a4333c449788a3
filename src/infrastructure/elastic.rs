// Elasticsearch/OpenSearch関連のインフラストラクチャ実装
//
// インデックス操作（作成・削除・CRUD・検索）を1つのインターフェースで提供する。
// 実クライアント版はバージョンに応じてパスを切り替え、インメモリ版はテストで使う。

mod client;
mod config;
mod dummy;
mod index_service;
mod query;
mod retry;
mod script;
mod service;

// 再エクスポート
pub use client::{ElasticClient, ElasticClientError, ElasticRequest, ElasticResponse, HttpMethod};
pub use config::{ElasticConfigError, ElasticOption};
pub use dummy::DummyElasticService;
pub use index_service::{ElasticIndexService, IndexInfo, IndexSettings, SearchPage, SearchResult};
pub use query::QueryBuilder;
pub use retry::{retry_on, SEARCH_RETRY_ATTEMPTS, SEARCH_RETRY_INTERVAL};
pub use script::UpdateScript;
pub use service::ElasticService;
