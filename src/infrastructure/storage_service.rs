/// キー指定のストレージサービス
///
/// DynamoDBテーブルを単純なキーバリューストアとして扱う。
/// 保存時は許可されたフィールドのみを書き込む。
use async_trait::async_trait;
use tracing::debug;

use crate::domain::item::strip_reserved;
use crate::domain::{labels, ErrorReason, Increments, Item};
use crate::infrastructure::dynamo::DynamoService;

/// ストレージ操作のインターフェース
///
/// このトレイトはストレージ機能を抽象化し、
/// 異なる実装を可能にします（実際のDynamoDB、テスト用インメモリ）。
#[async_trait]
pub trait StorageService: Send + Sync {
    /// IDフィールド名
    fn id_name(&self) -> &str;

    /// 読み込み（存在しなければ404 NOT FOUND）
    async fn read(&self, id: &str) -> Result<Item, ErrorReason>;

    /// 読み込み（存在しなければ`model`で作成）
    async fn read_or_create(&self, id: &str, model: &Item) -> Result<Item, ErrorReason> {
        match self.read(id).await {
            Err(e) if e.is(labels::NOT_FOUND) => {
                debug!(id = id, "存在しないため作成");
                self.save(id, model).await
            }
            other => other,
        }
    }

    /// 保存（上書き）
    async fn save(&self, id: &str, item: &Item) -> Result<Item, ErrorReason>;

    /// フィールドの更新（インクリメントも同時に指定可能）
    async fn update(&self, id: &str, updates: &Item, increments: Option<&Increments>) -> Result<Item, ErrorReason>;

    /// インクリメント（更新も同時に指定可能）
    async fn increment(&self, id: &str, increments: &Increments, updates: Option<&Item>) -> Result<Item, ErrorReason>;

    /// 削除して削除前の値を返す（存在しなければ404 NOT FOUND）
    async fn delete(&self, id: &str) -> Result<Item, ErrorReason>;
}

/// 許可フィールドのみを残す
///
/// `fields`が空の場合はすべて許可。IDフィールドは常に残す。
pub fn filter_fields(item: &Item, fields: &[String], id_name: &str) -> Item {
    let item = strip_reserved(item.clone());
    if fields.is_empty() {
        return item;
    }
    item.into_iter()
        .filter(|(k, _)| k == id_name || fields.iter().any(|f| f == k))
        .collect()
}

/// StorageServiceのDynamoDB実装
#[derive(Debug, Clone)]
pub struct DynamoStorageService {
    /// DynamoDBサービス
    dynamo: DynamoService,
    /// 保存を許可するフィールド
    fields: Vec<String>,
}

impl DynamoStorageService {
    /// 新しいDynamoStorageServiceを作成
    ///
    /// # 引数
    /// * `dynamo` - テーブルに紐づいたDynamoDBサービス
    /// * `fields` - 保存を許可するフィールド（空ならすべて）
    pub fn new<I, S>(dynamo: DynamoService, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            dynamo,
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    fn filter(&self, item: &Item) -> Item {
        filter_fields(item, &self.fields, self.id_name())
    }
}

#[async_trait]
impl StorageService for DynamoStorageService {
    fn id_name(&self) -> &str {
        &self.dynamo.option().id_name
    }

    async fn read(&self, id: &str) -> Result<Item, ErrorReason> {
        Ok(self.dynamo.read_item(id, None).await?)
    }

    async fn save(&self, id: &str, item: &Item) -> Result<Item, ErrorReason> {
        Ok(self.dynamo.save_item(id, &self.filter(item)).await?)
    }

    async fn update(&self, id: &str, updates: &Item, increments: Option<&Increments>) -> Result<Item, ErrorReason> {
        let updates = self.filter(updates);
        let increments = increments.map(|i| self.filter(i));
        Ok(self
            .dynamo
            .update_item(id, None, Some(&updates), increments.as_ref())
            .await?)
    }

    async fn increment(&self, id: &str, increments: &Increments, updates: Option<&Item>) -> Result<Item, ErrorReason> {
        let increments = self.filter(increments);
        let updates = updates.map(|u| self.filter(u));
        Ok(self
            .dynamo
            .update_item(id, None, updates.as_ref(), Some(&increments))
            .await?)
    }

    async fn delete(&self, id: &str) -> Result<Item, ErrorReason> {
        Ok(self.dynamo.delete_item(id, None).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::item::as_item;
    use crate::infrastructure::dynamo::DynamoOption;
    use aws_sdk_dynamodb::Client as DynamoDbClient;
    use serde_json::{json, Value};

    fn item(value: Value) -> Item {
        as_item(value).unwrap()
    }

    #[test]
    fn test_filter_fields_whitelist() {
        let source = item(json!({"id": "A0", "name": "x", "secret": "y", "_id": "A0"}));
        let fields = vec!["name".to_string()];
        assert_eq!(filter_fields(&source, &fields, "id"), item(json!({"id": "A0", "name": "x"})));
    }

    #[test]
    fn test_filter_fields_empty_allows_all() {
        let source = item(json!({"name": "x", "secret": "y", "_version": 3}));
        assert_eq!(filter_fields(&source, &[], "id"), item(json!({"name": "x", "secret": "y"})));
    }

    #[tokio::test]
    async fn test_dynamo_storage_id_name() {
        let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let dynamo = DynamoService::new(DynamoDbClient::new(&aws_config), DynamoOption::new("TestTable", "pk"));
        let storage = DynamoStorageService::new(dynamo, ["name", "count"]);
        assert_eq!(storage.id_name(), "pk");
        assert_eq!(storage.fields(), &["name".to_string(), "count".to_string()]);
    }

    #[tokio::test]
    #[ignore = "DynamoDBが必要なため統合テストで実行"]
    async fn test_read_or_create_against_dynamodb() {
        let table = std::env::var("TEST_DYNAMO_TABLE").unwrap_or_else(|_| "TestTable".to_string());
        let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let dynamo = DynamoService::new(DynamoDbClient::new(&aws_config), DynamoOption::new(table, "id"));
        let storage = DynamoStorageService::new(dynamo, ["name", "count"]);

        let _ = storage.delete("S0").await;
        let created = storage.read_or_create("S0", &item(json!({"name": "s", "other": 1}))).await.unwrap();
        assert!(created.get("other").is_none());
        let incremented = storage.increment("S0", &item(json!({"count": 2})), None).await.unwrap();
        assert_eq!(incremented["count"], json!(2));
        storage.delete("S0").await.unwrap();
    }
}
