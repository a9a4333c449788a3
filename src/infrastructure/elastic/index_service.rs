// ElasticIndexService - インデックス操作の共通インターフェース
//
// 実クライアント版（ElasticService）とインメモリ版（DummyElasticService）が実装する。
// エラーはすべて`ErrorReason`に正規化して返す。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::config::ElasticOption;
use super::retry::{retry_on, SEARCH_RETRY_ATTEMPTS, SEARCH_RETRY_INTERVAL};
use crate::domain::{labels, Condition, ErrorReason, Increments, Item};

/// インデックス作成時の設定
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSettings {
    pub shards: u32,
    pub replicas: u32,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self { shards: 4, replicas: 1 }
    }
}

/// インデックス作成・削除の結果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexInfo {
    pub index: String,
    pub acknowledged: bool,
}

/// 検索ページ指定
///
/// `search_after`が指定されている場合は`from`より優先される。
#[derive(Debug, Clone, PartialEq)]
pub struct SearchPage {
    pub size: usize,
    pub from: usize,
    pub search_after: Option<Vec<Value>>,
}

impl Default for SearchPage {
    fn default() -> Self {
        Self {
            size: 10,
            from: 0,
            search_after: None,
        }
    }
}

/// 検索結果
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchResult {
    /// 条件に一致した総件数
    pub total: u64,
    /// ページ内のアイテム（`_id`付き）
    pub list: Vec<Item>,
    /// 次ページ取得用のソート値（最後のヒット）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last: Option<Vec<Value>>,
}

/// インデックス操作のインターフェース
#[async_trait]
pub trait ElasticIndexService: Send + Sync {
    /// インデックス設定
    fn option(&self) -> &ElasticOption;

    /// インデックスを作成（既存なら400 RESOURCE ALREADY EXISTS）
    async fn create_index(&self, settings: IndexSettings) -> Result<IndexInfo, ErrorReason>;

    /// インデックスを削除（存在しなければ404）
    async fn destroy_index(&self) -> Result<IndexInfo, ErrorReason>;

    /// インデックスの設定とマッピングを取得
    async fn describe(&self) -> Result<Value, ErrorReason>;

    /// IDを指定して保存（既存ならupdate_itemにフォールバック）
    async fn save_item(&self, id: &str, item: &Item) -> Result<Item, ErrorReason>;

    /// IDを自動採番して保存
    async fn push_item(&self, item: &Item) -> Result<Item, ErrorReason>;

    /// 読み込み（存在しなければ404 NOT FOUND）
    async fn read_item(&self, id: &str) -> Result<Item, ErrorReason>;

    /// 既存ドキュメントの更新とインクリメント
    async fn update_item(
        &self,
        id: &str,
        updates: Option<&Item>,
        increments: Option<&Increments>,
    ) -> Result<Item, ErrorReason>;

    /// 更新とインクリメント（存在しなければ作成）
    async fn upsert_item(
        &self,
        id: &str,
        updates: Option<&Item>,
        increments: Option<&Increments>,
    ) -> Result<Item, ErrorReason>;

    /// 削除（存在しなければ404 NOT FOUND）
    async fn delete_item(&self, id: &str) -> Result<Item, ErrorReason>;

    /// 1ページ分検索
    async fn search(&self, condition: Option<&Condition>, page: &SearchPage) -> Result<SearchResult, ErrorReason>;

    /// 全件検索
    ///
    /// `search_after`でページを辿る。各ページは500 TIMEOUTのとき一定間隔でリトライする。
    async fn search_all(&self, condition: Option<&Condition>, page_size: usize) -> Result<Vec<Item>, ErrorReason> {
        let page_size = page_size.max(1);
        let mut items: Vec<Item> = Vec::new();
        let mut search_after: Option<Vec<Value>> = None;

        loop {
            let page = SearchPage {
                size: page_size,
                from: 0,
                search_after: search_after.take(),
            };
            let page = &page;
            let result = retry_on(labels::TIMEOUT, SEARCH_RETRY_ATTEMPTS, SEARCH_RETRY_INTERVAL, move || {
                self.search(condition, page)
            })
            .await?;

            let count = result.list.len();
            items.extend(result.list);
            debug!(count = count, total = result.total, fetched = items.len(), "検索ページを取得");

            match result.last {
                Some(last) if count >= page_size => search_after = Some(last),
                _ => break,
            }
        }
        Ok(items)
    }
}
