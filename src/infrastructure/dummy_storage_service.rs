/// インメモリのStorageService実装
///
/// テストやローカル実行で使う。インクリメントは実際に加算・追記する。
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::item::{strip_reserved, ID_FIELD};
use crate::domain::{apply_update, ErrorReason, Increments, Item};
use crate::infrastructure::storage_service::{filter_fields, StorageService};

#[derive(Debug, Clone)]
pub struct DummyStorageService {
    id_name: String,
    fields: Vec<String>,
    /// 保存されたアイテム: id -> item
    items: Arc<Mutex<BTreeMap<String, Item>>>,
}

impl DummyStorageService {
    pub fn new(id_name: impl Into<String>) -> Self {
        Self {
            id_name: id_name.into(),
            fields: Vec::new(),
            items: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    /// 保存を許可するフィールドを指定
    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// 初期データを投入
    pub fn with_items<I>(self, items: I) -> Self
    where
        I: IntoIterator<Item = (String, Item)>,
    {
        {
            let mut stored = self.lock();
            for (id, item) in items {
                let value = self.stored(&id, &item);
                stored.insert(id, value);
            }
        }
        self
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Item>> {
        self.items.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn stored(&self, id: &str, item: &Item) -> Item {
        let mut value = filter_fields(item, &self.fields, &self.id_name);
        value.insert(self.id_name.clone(), Value::String(id.to_string()));
        value
    }

    fn output(id: &str, item: &Item) -> Item {
        let mut item = item.clone();
        item.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
        item
    }

    fn modify(&self, id: &str, updates: Option<&Item>, increments: Option<&Increments>) -> Result<Item, ErrorReason> {
        let updates = updates.map(|u| filter_fields(u, &self.fields, &self.id_name));
        let increments = increments.map(|i| filter_fields(i, &self.fields, &self.id_name));

        let mut items = self.lock();
        // DynamoDBのUpdateItemと同じく存在しなければ作成
        let mut target = items
            .get(id)
            .cloned()
            .unwrap_or_else(|| self.stored(id, &Item::new()));
        apply_update(&mut target, updates.as_ref(), increments.as_ref())?;
        target.insert(self.id_name.clone(), Value::String(id.to_string()));
        let output = Self::output(id, &target);
        items.insert(id.to_string(), target);
        Ok(output)
    }
}

#[async_trait]
impl StorageService for DummyStorageService {
    fn id_name(&self) -> &str {
        &self.id_name
    }

    async fn read(&self, id: &str) -> Result<Item, ErrorReason> {
        self.lock()
            .get(id)
            .map(|item| Self::output(id, item))
            .ok_or_else(|| ErrorReason::not_found(format!("{}:{id}", self.id_name)))
    }

    async fn save(&self, id: &str, item: &Item) -> Result<Item, ErrorReason> {
        let value = self.stored(id, &strip_reserved(item.clone()));
        let output = Self::output(id, &value);
        self.lock().insert(id.to_string(), value);
        Ok(output)
    }

    async fn update(&self, id: &str, updates: &Item, increments: Option<&Increments>) -> Result<Item, ErrorReason> {
        self.modify(id, Some(updates), increments)
    }

    async fn increment(&self, id: &str, increments: &Increments, updates: Option<&Item>) -> Result<Item, ErrorReason> {
        self.modify(id, updates, Some(increments))
    }

    async fn delete(&self, id: &str) -> Result<Item, ErrorReason> {
        self.lock()
            .remove(id)
            .map(|item| Self::output(id, &item))
            .ok_or_else(|| ErrorReason::not_found(format!("{}:{id}", self.id_name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::item::as_item;
    use crate::domain::labels;
    use serde_json::json;

    fn item(value: Value) -> Item {
        as_item(value).unwrap()
    }

    #[tokio::test]
    async fn test_save_and_read() {
        let storage = DummyStorageService::new("id");
        let saved = storage.save("A0", &item(json!({"name": "lemon"}))).await.unwrap();
        assert_eq!(saved, item(json!({"id": "A0", "name": "lemon", "_id": "A0"})));
        assert_eq!(storage.read("A0").await.unwrap(), saved);
    }

    #[tokio::test]
    async fn test_read_missing() {
        let err = DummyStorageService::new("id").read("A0").await.unwrap_err();
        assert_eq!(err.message, "404 NOT FOUND - id:A0");
    }

    #[tokio::test]
    async fn test_read_or_create() {
        let storage = DummyStorageService::new("id").with_fields(["name"]);
        let created = storage
            .read_or_create("A0", &item(json!({"name": "a", "other": true})))
            .await
            .unwrap();
        assert_eq!(created, item(json!({"id": "A0", "name": "a", "_id": "A0"})));

        // 既存なら読み込みのみ
        let again = storage.read_or_create("A0", &item(json!({"name": "b"}))).await.unwrap();
        assert_eq!(again["name"], json!("a"));
    }

    #[tokio::test]
    async fn test_increment_and_update() {
        let storage = DummyStorageService::new("id").with_items([("A0".to_string(), item(json!({"count": 1})))]);
        let updated = storage.increment("A0", &item(json!({"count": 2})), None).await.unwrap();
        assert_eq!(updated["count"], json!(3));

        let updated = storage
            .update("A0", &item(json!({"name": "x"})), Some(&item(json!({"count": -3}))))
            .await
            .unwrap();
        assert_eq!(updated["count"], json!(0));
        assert_eq!(updated["name"], json!("x"));
    }

    #[tokio::test]
    async fn test_increment_creates_missing() {
        let storage = DummyStorageService::new("id");
        let created = storage.increment("N0", &item(json!({"count": 0})), None).await.unwrap();
        assert_eq!(created["count"], json!(0));
        assert_eq!(created["id"], json!("N0"));
    }

    #[tokio::test]
    async fn test_invalid_increment_rejected() {
        let storage = DummyStorageService::new("id").with_items([("A0".to_string(), item(json!({"name": "x"})))]);
        let err = storage.increment("A0", &item(json!({"name": 1})), None).await.unwrap_err();
        assert!(err.is(labels::ILLEGAL_ARGUMENT));
    }

    #[tokio::test]
    async fn test_delete() {
        let storage = DummyStorageService::new("id");
        storage.save("A0", &Item::new()).await.unwrap();
        let deleted = storage.delete("A0").await.unwrap();
        assert_eq!(deleted["_id"], json!("A0"));
        assert!(storage.delete("A0").await.unwrap_err().is(labels::NOT_FOUND));
    }
}
