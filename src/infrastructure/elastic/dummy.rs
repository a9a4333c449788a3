// DummyElasticService - インメモリのElasticIndexService実装
//
// 実クラスタと同じ振る舞いをテスト用に再現する:
// - `_version`は書き込みごとに加算
// - インクリメントは実際に加算・追記し、不正な対象はMAPPER PARSING/ILLEGAL ARGUMENT
// - 存在しないドキュメントは404、既存インデックスの作成は400
// - 検索は条件評価器で絞り込み、IDフィールド昇順で返す

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, Span};

use super::config::ElasticOption;
use super::index_service::{ElasticIndexService, IndexInfo, IndexSettings, SearchPage, SearchResult};
use crate::domain::item::{strip_reserved, ID_FIELD, VERSION_FIELD};
use crate::domain::{apply_update, Condition, ConditionEvaluator, ErrorReason, Increments, Item};
use crate::infrastructure::logging::service_span;

/// 保存済みドキュメント
#[derive(Debug, Clone)]
struct Stored {
    source: Item,
    version: i64,
}

#[derive(Debug, Default)]
struct State {
    created: bool,
    settings: Option<IndexSettings>,
    docs: BTreeMap<String, Stored>,
    sequence: u64,
}

/// インメモリのインデックス
#[derive(Debug, Clone)]
pub struct DummyElasticService {
    option: ElasticOption,
    state: Arc<Mutex<State>>,
    span: Span,
}

impl DummyElasticService {
    pub fn new(option: ElasticOption) -> Self {
        let span = service_span("elastic-dummy", option.index_name());
        Self {
            option,
            state: Arc::new(Mutex::new(State::default())),
            span,
        }
    }

    /// 初期データを投入（インデックス作成済みとして扱う）
    pub fn with_items<I>(self, items: I) -> Self
    where
        I: IntoIterator<Item = (String, Item)>,
    {
        {
            let mut state = self.lock();
            state.created = true;
            for (id, item) in items {
                let source = self.document(&id, &item);
                state.docs.insert(id, Stored { source, version: 1 });
            }
        }
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// 保存件数
    pub fn len(&self) -> usize {
        self.lock().docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // 他スレッドのpanicで汚染されても状態自体は整合している
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn document(&self, id: &str, item: &Item) -> Item {
        let mut doc = strip_reserved(item.clone());
        doc.insert(self.option.id_name().to_string(), Value::String(id.to_string()));
        doc
    }

    fn output(id: &str, stored: &Stored) -> Item {
        let mut item = stored.source.clone();
        item.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
        item.insert(VERSION_FIELD.to_string(), json!(stored.version));
        item
    }

    fn missing(&self, id: &str) -> ErrorReason {
        ErrorReason::new(
            404,
            "DOCUMENT MISSING",
            format!("[{}][{id}]: document missing", self.option.doc_type()),
        )
    }

    fn update(
        &self,
        id: &str,
        updates: Option<&Item>,
        increments: Option<&Increments>,
        upsert: bool,
    ) -> Result<Item, ErrorReason> {
        let updates = updates.map(|u| strip_reserved(u.clone()));
        let has_updates = updates.as_ref().is_some_and(|u| !u.is_empty());
        let has_increments = increments.is_some_and(|i| !i.is_empty());
        if !has_updates && !has_increments {
            return Err(ErrorReason::illegal_argument("empty update: nothing to set or increment"));
        }

        let mut state = self.lock();
        state.created = true;
        let (mut source, version) = match state.docs.get(id) {
            Some(stored) => (stored.source.clone(), stored.version + 1),
            None if upsert => (self.document(id, &Item::new()), 1),
            None => return Err(self.missing(id)),
        };

        apply_update(&mut source, updates.as_ref(), increments)?;
        let stored = Stored { source, version };
        let output = Self::output(id, &stored);
        state.docs.insert(id.to_string(), stored);
        Ok(output)
    }

    fn sort_key(&self, id: &str, stored: &Stored) -> String {
        match stored.source.get(self.option.id_name()) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => id.to_string(),
        }
    }
}

#[async_trait]
impl ElasticIndexService for DummyElasticService {
    fn option(&self) -> &ElasticOption {
        &self.option
    }

    async fn create_index(&self, settings: IndexSettings) -> Result<IndexInfo, ErrorReason> {
        let mut state = self.lock();
        if state.created {
            return Err(ErrorReason::resource_already_exists(format!(
                "index [{}] already exists",
                self.option.index_name()
            )));
        }
        state.created = true;
        state.settings = Some(settings);
        Ok(IndexInfo {
            index: self.option.index_name().to_string(),
            acknowledged: true,
        })
    }

    async fn destroy_index(&self) -> Result<IndexInfo, ErrorReason> {
        let mut state = self.lock();
        if !state.created {
            return Err(ErrorReason::new(
                404,
                "INDEX NOT FOUND",
                format!("no such index [{}]", self.option.index_name()),
            ));
        }
        *state = State::default();
        Ok(IndexInfo {
            index: self.option.index_name().to_string(),
            acknowledged: true,
        })
    }

    async fn describe(&self) -> Result<Value, ErrorReason> {
        let state = self.lock();
        if !state.created {
            return Err(ErrorReason::new(
                404,
                "INDEX NOT FOUND",
                format!("no such index [{}]", self.option.index_name()),
            ));
        }
        let settings = state.settings.unwrap_or_default();
        Ok(json!({
            "settings": { "index": {
                "number_of_shards": settings.shards.to_string(),
                "number_of_replicas": settings.replicas.to_string()
            }},
            "mappings": { "properties": { self.option.id_name(): { "type": "keyword" } } },
            "docs": state.docs.len()
        }))
    }

    async fn save_item(&self, id: &str, item: &Item) -> Result<Item, ErrorReason> {
        {
            let mut state = self.lock();
            if !state.docs.contains_key(id) {
                state.created = true;
                let stored = Stored {
                    source: self.document(id, item),
                    version: 1,
                };
                let output = Self::output(id, &stored);
                state.docs.insert(id.to_string(), stored);
                debug!(parent: &self.span, id = id, "ドキュメント保存");
                return Ok(output);
            }
        }
        // 既存ドキュメントは更新にフォールバック
        self.update(id, Some(item), None, false)
    }

    async fn push_item(&self, item: &Item) -> Result<Item, ErrorReason> {
        let id = {
            let mut state = self.lock();
            state.sequence += 1;
            format!("{:020}", state.sequence)
        };
        self.save_item(&id, item).await
    }

    async fn read_item(&self, id: &str) -> Result<Item, ErrorReason> {
        let state = self.lock();
        state
            .docs
            .get(id)
            .map(|stored| Self::output(id, stored))
            .ok_or_else(|| ErrorReason::not_found(format!("id:{id}")))
    }

    async fn update_item(
        &self,
        id: &str,
        updates: Option<&Item>,
        increments: Option<&Increments>,
    ) -> Result<Item, ErrorReason> {
        self.update(id, updates, increments, false)
    }

    async fn upsert_item(
        &self,
        id: &str,
        updates: Option<&Item>,
        increments: Option<&Increments>,
    ) -> Result<Item, ErrorReason> {
        self.update(id, updates, increments, true)
    }

    async fn delete_item(&self, id: &str) -> Result<Item, ErrorReason> {
        let mut state = self.lock();
        let stored = state
            .docs
            .remove(id)
            .ok_or_else(|| ErrorReason::not_found(format!("id:{id}")))?;
        let mut item = Item::new();
        item.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
        item.insert(VERSION_FIELD.to_string(), json!(stored.version + 1));
        Ok(item)
    }

    async fn search(&self, condition: Option<&Condition>, page: &SearchPage) -> Result<SearchResult, ErrorReason> {
        let state = self.lock();
        let mut matched: Vec<(String, Item)> = state
            .docs
            .iter()
            .filter(|(_, stored)| ConditionEvaluator::matches_opt(&stored.source, condition))
            .map(|(id, stored)| (self.sort_key(id, stored), Self::output(id, stored)))
            .collect();
        matched.sort_by(|a, b| a.0.cmp(&b.0));
        let total = matched.len() as u64;

        let after = page
            .search_after
            .as_ref()
            .and_then(|a| a.first())
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            });
        let start = match after {
            Some(after) => matched.partition_point(|(key, _)| key.as_str() <= after.as_str()),
            None => page.from,
        };

        let window: Vec<(String, Item)> = matched.into_iter().skip(start).take(page.size).collect();
        let last = window.last().map(|(key, _)| vec![Value::String(key.clone())]);
        Ok(SearchResult {
            total,
            list: window.into_iter().map(|(_, item)| item).collect(),
            last,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::item::as_item;
    use crate::domain::labels;

    fn service() -> DummyElasticService {
        DummyElasticService::new(ElasticOption::new("http://localhost:9200", "test-v1").unwrap())
    }

    fn item(value: Value) -> Item {
        as_item(value).unwrap()
    }

    // ==================== ログ ====================

    #[test]
    fn test_with_span_replaces_logging_span() {
        let _default = tracing::subscriber::set_default(tracing_subscriber::registry());

        let svc = service();
        assert_eq!(svc.span.metadata().map(|m| m.name()), Some("service"));

        let span = tracing::info_span!("request", request_id = "r-1");
        let svc = svc.with_span(span.clone());
        assert_eq!(svc.span.id(), span.id());
        assert_eq!(svc.span.metadata().map(|m| m.name()), Some("request"));
    }

    // ==================== インデックス ====================

    #[tokio::test]
    async fn test_create_index_twice() {
        let svc = service();
        assert!(svc.create_index(IndexSettings::default()).await.unwrap().acknowledged);
        let err = svc.create_index(IndexSettings::default()).await.unwrap_err();
        assert!(err.has_prefix("400 RESOURCE ALREADY EXISTS"));

        svc.destroy_index().await.unwrap();
        let err = svc.destroy_index().await.unwrap_err();
        assert!(err.has_prefix("404 INDEX NOT FOUND"));
    }

    #[tokio::test]
    async fn test_describe() {
        let svc = service();
        assert!(svc.describe().await.is_err());
        svc.create_index(IndexSettings { shards: 2, replicas: 0 }).await.unwrap();
        let described = svc.describe().await.unwrap();
        assert_eq!(described["settings"]["index"]["number_of_shards"], json!("2"));
    }

    // ==================== CRUD ====================

    #[tokio::test]
    async fn test_save_read_and_version() {
        let svc = service();
        let saved = svc.save_item("A0", &item(json!({"type": "test"}))).await.unwrap();
        assert_eq!(saved["_id"], json!("A0"));
        assert_eq!(saved["$id"], json!("A0"));
        assert_eq!(saved["_version"], json!(1));

        // 既存IDの保存は更新になり、フィールドはマージされる
        let saved = svc.save_item("A0", &item(json!({"name": "lemon"}))).await.unwrap();
        assert_eq!(saved["_version"], json!(2));
        assert_eq!(saved["type"], json!("test"));
        assert_eq!(saved["name"], json!("lemon"));

        let read = svc.read_item("A0").await.unwrap();
        assert_eq!(read, saved);
    }

    #[tokio::test]
    async fn test_read_missing() {
        let err = service().read_item("A0").await.unwrap_err();
        assert_eq!(err.message, "404 NOT FOUND - id:A0");
    }

    #[tokio::test]
    async fn test_push_item_assigns_id() {
        let svc = service();
        let first = svc.push_item(&item(json!({"n": 1}))).await.unwrap();
        let second = svc.push_item(&item(json!({"n": 2}))).await.unwrap();
        assert_ne!(first["_id"], second["_id"]);
        assert_eq!(svc.len(), 2);
    }

    #[tokio::test]
    async fn test_increment_initialises_field() {
        let svc = service();
        svc.save_item("A0", &item(json!({"type": "test"}))).await.unwrap();
        let updated = svc.update_item("A0", None, Some(&item(json!({"count": 0})))).await.unwrap();
        assert_eq!(updated["count"], json!(0));
    }

    #[tokio::test]
    async fn test_increment_round_trip() {
        let svc = service();
        svc.save_item("A0", &Item::new()).await.unwrap();
        svc.update_item("A0", None, Some(&item(json!({"slot": 1})))).await.unwrap();
        let updated = svc.update_item("A0", None, Some(&item(json!({"slot": -2})))).await.unwrap();
        assert_eq!(updated["slot"], json!(-1));
        assert_eq!(updated["_version"], json!(3));
    }

    #[tokio::test]
    async fn test_invalid_increment_targets() {
        let svc = service();
        svc.save_item("A0", &item(json!({"name": "x", "meta": {"a": 1}}))).await.unwrap();

        let err = svc.update_item("A0", None, Some(&item(json!({"name": 1})))).await.unwrap_err();
        assert!(err.is(labels::ILLEGAL_ARGUMENT));
        let err = svc.update_item("A0", None, Some(&item(json!({"meta": 1})))).await.unwrap_err();
        assert!(err.is(labels::MAPPER_PARSING));

        // 失敗した更新はバージョンを進めない
        assert_eq!(svc.read_item("A0").await.unwrap()["_version"], json!(1));
    }

    #[tokio::test]
    async fn test_update_missing_and_upsert() {
        let svc = service();
        let err = svc.update_item("A0", Some(&item(json!({"a": 1}))), None).await.unwrap_err();
        assert!(err.has_prefix("404 DOCUMENT MISSING"));

        let created = svc
            .upsert_item("A0", Some(&item(json!({"a": 1}))), Some(&item(json!({"tags": ["x"]}))))
            .await
            .unwrap();
        assert_eq!(created["a"], json!(1));
        assert_eq!(created["tags"], json!(["x"]));
        assert_eq!(created["$id"], json!("A0"));
    }

    #[tokio::test]
    async fn test_delete() {
        let svc = service();
        svc.save_item("A0", &Item::new()).await.unwrap();
        let deleted = svc.delete_item("A0").await.unwrap();
        assert_eq!(deleted["_id"], json!("A0"));
        assert!(svc.delete_item("A0").await.unwrap_err().is(labels::NOT_FOUND));
        assert!(svc.is_empty());
    }

    // ==================== 検索 ====================

    fn seeded() -> DummyElasticService {
        service().with_items((0..25).map(|i| {
            let kind = if i % 2 == 0 { "even" } else { "odd" };
            (format!("A{:02}", i), item(json!({"n": i, "kind": kind})))
        }))
    }

    #[tokio::test]
    async fn test_search_filters_and_pages() {
        let svc = seeded();
        let result = svc
            .search(Some(&Condition::eq("kind", "even")), &SearchPage { size: 5, from: 0, search_after: None })
            .await
            .unwrap();
        assert_eq!(result.total, 13);
        assert_eq!(result.list.len(), 5);
        assert_eq!(result.list[0]["_id"], json!("A00"));
        assert_eq!(result.last, Some(vec![json!("A08")]));

        let next = svc
            .search(Some(&Condition::eq("kind", "even")), &SearchPage { size: 5, from: 0, search_after: result.last })
            .await
            .unwrap();
        assert_eq!(next.list[0]["_id"], json!("A10"));
    }

    #[tokio::test]
    async fn test_search_between_and_empty_or() {
        let svc = seeded();
        let result = svc.search(Some(&Condition::between("n", 3, 5)), &SearchPage::default()).await.unwrap();
        assert_eq!(result.total, 3);

        let none = svc.search(Some(&Condition::or(vec![])), &SearchPage::default()).await.unwrap();
        assert_eq!(none.total, 0);
    }

    #[tokio::test]
    async fn test_search_all_follows_pages() {
        let svc = seeded();
        let all = svc.search_all(None, 7).await.unwrap();
        assert_eq!(all.len(), 25);

        let odd = svc.search_all(Some(&Condition::eq("kind", "odd")), 5).await.unwrap();
        assert_eq!(odd.len(), 12);
        assert!(odd.iter().all(|i| i["kind"] == json!("odd")));
    }
}
