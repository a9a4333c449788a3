// ElasticService - 実クライアントによるElasticIndexService実装
//
// エンジンバージョンによってパスとボディの形が変わる:
// - ES6: `/{index}/{type}/{id}` のタイプ付きパス、マッピングはタイプでラップ、総件数は数値
// - ES7以降/OpenSearch: `/{index}/_doc/{id}` 等のタイプなしパス、総件数は`{value}`
//
// リクエストは`prepare_*`で組み立て、レスポンスは`parse_*`で正規化する。

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info, warn, Span};
use uuid::Uuid;

use super::client::{ElasticClient, ElasticClientError, ElasticRequest, HttpMethod};
use super::config::ElasticOption;
use super::index_service::{ElasticIndexService, IndexInfo, IndexSettings, SearchPage, SearchResult};
use super::query::QueryBuilder;
use super::script::UpdateScript;
use crate::domain::item::{strip_reserved, ID_FIELD, SCORE_FIELD, VERSION_FIELD};
use crate::domain::{labels, Condition, ErrorReason, Increments, Item};
use crate::infrastructure::logging::service_span;

/// 実クライアントによるインデックス操作
#[derive(Debug, Clone)]
pub struct ElasticService {
    client: ElasticClient,
    option: ElasticOption,
    span: Span,
}

impl ElasticService {
    /// 設定からクライアントを作成してサービスを作る
    pub async fn new(option: ElasticOption) -> Result<Self, ElasticClientError> {
        let client = ElasticClient::new(&option).await?;
        Ok(Self::with_client(client, option))
    }

    /// 既存のクライアントで作成
    pub fn with_client(client: ElasticClient, option: ElasticOption) -> Self {
        let span = service_span("elastic", option.index_name());
        let version = option.version();
        if version.is_old_es71() {
            debug!(parent: &span, version = %version, "ES7.1互換モード");
        }
        Self { client, option, span }
    }

    /// ログ出力用スパンを差し替える
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    fn typed(&self) -> bool {
        self.option.version().uses_doc_type()
    }

    fn index(&self) -> String {
        encode(self.option.index_name())
    }

    /// ドキュメントのパス
    ///
    /// `action`は`_create`/`_update`。
    pub fn doc_path(&self, id: &str, action: Option<&str>) -> String {
        let index = self.index();
        let id = encode(id);
        match (self.typed(), action) {
            (true, Some(action)) => format!("/{index}/{}/{id}/{action}", encode(self.option.doc_type())),
            (true, None) => format!("/{index}/{}/{id}", encode(self.option.doc_type())),
            (false, Some(action)) => format!("/{index}/{action}/{id}"),
            (false, None) => format!("/{index}/_doc/{id}"),
        }
    }

    pub fn prepare_create_index(&self, settings: IndexSettings) -> ElasticRequest {
        let mut properties = serde_json::Map::new();
        properties.insert(self.option.id_name().to_string(), json!({ "type": "keyword" }));

        let mappings = json!({
            "dynamic_templates": [{
                "strings": {
                    "match_mapping_type": "string",
                    "mapping": { "type": "keyword", "ignore_above": 256 }
                }
            }],
            "properties": properties
        });
        let mappings = if self.typed() {
            let mut wrapped = serde_json::Map::new();
            wrapped.insert(self.option.doc_type().to_string(), mappings);
            Value::Object(wrapped)
        } else {
            mappings
        };

        ElasticRequest::new(HttpMethod::Put, format!("/{}", self.index())).body(json!({
            "settings": {
                "number_of_shards": settings.shards,
                "number_of_replicas": settings.replicas
            },
            "mappings": mappings
        }))
    }

    pub fn prepare_destroy_index(&self) -> ElasticRequest {
        ElasticRequest::new(HttpMethod::Delete, format!("/{}", self.index()))
    }

    pub fn prepare_describe(&self) -> ElasticRequest {
        ElasticRequest::new(HttpMethod::Get, format!("/{}", self.index()))
    }

    /// 保存用ドキュメント（予約フィールドを除きIDフィールドを設定）
    fn document(&self, id: &str, item: &Item) -> Item {
        let mut doc = strip_reserved(item.clone());
        doc.insert(self.option.id_name().to_string(), Value::String(id.to_string()));
        doc
    }

    pub fn prepare_save_item(&self, id: &str, item: &Item) -> ElasticRequest {
        ElasticRequest::new(HttpMethod::Put, self.doc_path(id, Some("_create")))
            .body(Value::Object(self.document(id, item)))
    }

    /// IDを採番して作成リクエストを組み立てる
    ///
    /// 検索のソートキーがIDフィールドのため、サーバー採番ではなくクライアント側で
    /// 採番したIDをボディにも含めて`_create`する。
    pub fn prepare_push_item(&self, item: &Item) -> (String, ElasticRequest) {
        let id = Uuid::new_v4().to_string();
        let request = self.prepare_save_item(&id, item);
        (id, request)
    }

    pub fn prepare_read_item(&self, id: &str) -> ElasticRequest {
        ElasticRequest::new(HttpMethod::Get, self.doc_path(id, None))
    }

    pub fn prepare_update_item(
        &self,
        id: &str,
        updates: Option<&Item>,
        increments: Option<&Increments>,
        upsert: bool,
    ) -> Result<ElasticRequest, ErrorReason> {
        let updates = updates.map(|u| strip_reserved(u.clone()));
        let mut updates = updates.filter(|u| !u.is_empty());
        if upsert {
            // 作成される場合に備えてIDフィールドを含める
            updates
                .get_or_insert_with(Item::new)
                .insert(self.option.id_name().to_string(), Value::String(id.to_string()));
        }
        let body = UpdateScript::build(updates.as_ref(), increments, upsert)?;
        Ok(ElasticRequest::new(HttpMethod::Post, self.doc_path(id, Some("_update")))
            .param("_source", "true")
            .body(body))
    }

    pub fn prepare_delete_item(&self, id: &str) -> ElasticRequest {
        ElasticRequest::new(HttpMethod::Delete, self.doc_path(id, None))
    }

    /// 検索リクエスト（IDフィールド昇順でソート）
    pub fn prepare_search(&self, condition: Option<&Condition>, page: &SearchPage) -> ElasticRequest {
        let mut body = json!({
            "query": QueryBuilder::build(condition),
            "size": page.size,
            "sort": [{ self.option.id_name(): "asc" }]
        });
        match &page.search_after {
            Some(after) => body["search_after"] = json!(after),
            None if page.from > 0 => body["from"] = json!(page.from),
            None => {}
        }
        if !self.typed() {
            body["track_total_hits"] = Value::Bool(true);
        }
        ElasticRequest::new(HttpMethod::Post, format!("/{}/_search", self.index())).body(body)
    }

    /// 検索レスポンスを正規化
    pub fn parse_search(&self, body: &Value) -> SearchResult {
        let hits = &body["hits"];
        // ES6は数値、ES7以降は{value, relation}
        let total = match &hits["total"] {
            Value::Number(n) => n.as_u64().unwrap_or_default(),
            Value::Object(o) => o.get("value").and_then(|v| v.as_u64()).unwrap_or_default(),
            _ => 0,
        };

        let raw = hits["hits"].as_array().cloned().unwrap_or_default();
        let last = raw
            .last()
            .and_then(|hit| hit.get("sort"))
            .and_then(|sort| sort.as_array())
            .cloned();
        let list = raw
            .iter()
            .map(|hit| {
                let mut item = hit["_source"].as_object().cloned().unwrap_or_default();
                if let Some(id) = hit.get("_id") {
                    item.insert(ID_FIELD.to_string(), id.clone());
                }
                if let Some(score) = hit.get("_score").filter(|s| s.is_number()) {
                    item.insert(SCORE_FIELD.to_string(), score.clone());
                }
                item
            })
            .collect();

        SearchResult { total, list, last }
    }

    /// 書き込み系レスポンス（`_id`/`_version`）をアイテムに合成
    fn with_meta(mut item: Item, body: &Value) -> Item {
        if let Some(id) = body.get("_id") {
            item.insert(ID_FIELD.to_string(), id.clone());
        }
        if let Some(version) = body.get("_version") {
            item.insert(VERSION_FIELD.to_string(), version.clone());
        }
        item
    }

    /// GETレスポンスを正規化
    pub fn parse_document(body: &Value) -> Result<Item, ErrorReason> {
        if body.get("found").and_then(|f| f.as_bool()) == Some(false) {
            let id = body.get("_id").and_then(|i| i.as_str()).unwrap_or_default();
            return Err(ErrorReason::not_found(format!("id:{id}")));
        }
        let source = body["_source"].as_object().cloned().unwrap_or_default();
        Ok(Self::with_meta(source, body))
    }

    /// _updateレスポンスを正規化（`get._source`があれば全体を返す）
    pub fn parse_update(body: &Value, updates: Option<&Item>) -> Item {
        let item = match body.pointer("/get/_source").and_then(|s| s.as_object()) {
            Some(source) => source.clone(),
            None => updates.cloned().unwrap_or_default(),
        };
        Self::with_meta(item, body)
    }

    async fn update(
        &self,
        id: &str,
        updates: Option<&Item>,
        increments: Option<&Increments>,
        upsert: bool,
    ) -> Result<Item, ErrorReason> {
        let request = self.prepare_update_item(id, updates, increments, upsert)?;
        debug!(parent: &self.span, id = id, upsert = upsert, "ドキュメント更新");
        let response = self.client.send(&request).await?;
        Ok(Self::parse_update(&response.body, updates))
    }
}

#[async_trait]
impl ElasticIndexService for ElasticService {
    fn option(&self) -> &ElasticOption {
        &self.option
    }

    async fn create_index(&self, settings: IndexSettings) -> Result<IndexInfo, ErrorReason> {
        info!(parent: &self.span, shards = settings.shards, replicas = settings.replicas, "インデックス作成");
        let response = self.client.send(&self.prepare_create_index(settings)).await?;
        Ok(IndexInfo {
            index: self.option.index_name().to_string(),
            acknowledged: response.body["acknowledged"].as_bool().unwrap_or(false),
        })
    }

    async fn destroy_index(&self) -> Result<IndexInfo, ErrorReason> {
        info!(parent: &self.span, "インデックス削除");
        let response = self.client.send(&self.prepare_destroy_index()).await?;
        Ok(IndexInfo {
            index: self.option.index_name().to_string(),
            acknowledged: response.body["acknowledged"].as_bool().unwrap_or(false),
        })
    }

    async fn describe(&self) -> Result<Value, ErrorReason> {
        let response = self.client.send(&self.prepare_describe()).await?;
        let body = response.body;
        Ok(body.get(self.option.index_name()).cloned().unwrap_or(body))
    }

    async fn save_item(&self, id: &str, item: &Item) -> Result<Item, ErrorReason> {
        let request = self.prepare_save_item(id, item);
        debug!(parent: &self.span, id = id, "ドキュメント保存");
        match self.client.send(&request).await {
            Ok(response) => {
                let doc = self.document(id, item);
                Ok(Self::with_meta(doc, &response.body))
            }
            Err(e) if e.is(labels::VERSION_CONFLICT_ENGINE) => {
                warn!(parent: &self.span, id = id, "既存ドキュメントのため更新にフォールバック");
                self.update(id, Some(item), None, false).await
            }
            Err(e) => Err(e),
        }
    }

    async fn push_item(&self, item: &Item) -> Result<Item, ErrorReason> {
        let (id, request) = self.prepare_push_item(item);
        debug!(parent: &self.span, id = %id, "ドキュメント追加");
        let response = self.client.send(&request).await?;
        Ok(Self::with_meta(self.document(&id, item), &response.body))
    }

    async fn read_item(&self, id: &str) -> Result<Item, ErrorReason> {
        let response = self.client.send(&self.prepare_read_item(id)).await?;
        Self::parse_document(&response.body)
    }

    async fn update_item(
        &self,
        id: &str,
        updates: Option<&Item>,
        increments: Option<&Increments>,
    ) -> Result<Item, ErrorReason> {
        self.update(id, updates, increments, false).await
    }

    async fn upsert_item(
        &self,
        id: &str,
        updates: Option<&Item>,
        increments: Option<&Increments>,
    ) -> Result<Item, ErrorReason> {
        self.update(id, updates, increments, true).await
    }

    async fn delete_item(&self, id: &str) -> Result<Item, ErrorReason> {
        debug!(parent: &self.span, id = id, "ドキュメント削除");
        let response = self.client.send(&self.prepare_delete_item(id)).await?;
        Ok(Self::with_meta(Item::new(), &response.body))
    }

    async fn search(&self, condition: Option<&Condition>, page: &SearchPage) -> Result<SearchResult, ErrorReason> {
        let request = self.prepare_search(condition, page);
        debug!(parent: &self.span, size = page.size, "検索");
        let response = self.client.send(&request).await?;
        Ok(self.parse_search(&response.body))
    }
}

/// パスセグメントのエンコード
fn encode(segment: &str) -> String {
    url::form_urlencoded::byte_serialize(segment.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}
