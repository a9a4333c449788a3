/// DynamoDBのScan/Query
///
/// フィルター条件は`FilterCompiler`でFilterExpressionに変換する。
/// 常に偽のフィルターはリクエストを送らず空ページを返す。
use std::collections::HashMap;

use aws_sdk_dynamodb::types::AttributeValue;
use serde_json::Value;
use tracing::debug;

use super::expression::{CompiledFilter, ExpressionContext, FilterCompiler};
use super::service::{sdk_error_message, DynamoError, DynamoService};
use crate::domain::{Condition, ErrorReason, Item};

/// Scanリクエスト
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanRequest {
    pub filter: Option<Condition>,
    pub limit: Option<i32>,
    pub exclusive_start_key: Option<HashMap<String, AttributeValue>>,
}

impl ScanRequest {
    pub fn with_filter(filter: Condition) -> Self {
        Self {
            filter: Some(filter),
            ..Default::default()
        }
    }
}

/// Queryリクエスト
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryRequest {
    /// パーティションキーの値
    pub partition: String,
    pub filter: Option<Condition>,
    pub limit: Option<i32>,
    /// ソートキーの降順
    pub descending: bool,
    pub exclusive_start_key: Option<HashMap<String, AttributeValue>>,
}

/// 1ページ分の結果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanPage {
    pub items: Vec<Item>,
    pub last_evaluated_key: Option<HashMap<String, AttributeValue>>,
}

/// 送信前のScan/Queryリクエスト内容
///
/// `None`の場合はフィルターが常に偽でリクエスト不要。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreparedScan {
    pub key_condition_expression: Option<String>,
    pub filter_expression: Option<String>,
    pub names: Option<HashMap<String, String>>,
    pub values: Option<HashMap<String, AttributeValue>>,
}

impl PreparedScan {
    fn from_parts(
        key_condition_expression: Option<String>,
        filter_expression: Option<String>,
        context: &ExpressionContext,
    ) -> Result<Self, DynamoError> {
        Ok(Self {
            key_condition_expression,
            filter_expression,
            names: context.attribute_names(),
            values: context.attribute_values()?,
        })
    }
}

impl DynamoService {
    /// Scanリクエストを組み立てる
    pub fn prepare_scan(&self, filter: Option<&Condition>) -> Result<Option<PreparedScan>, DynamoError> {
        let compiled = match filter {
            Some(filter) => FilterCompiler::compile(filter),
            None => CompiledFilter::Always,
        };

        match compiled {
            CompiledFilter::Never => Ok(None),
            CompiledFilter::Always => Ok(Some(PreparedScan::default())),
            CompiledFilter::Expression { expression, context } => {
                PreparedScan::from_parts(None, Some(expression), &context).map(Some)
            }
        }
    }

    /// Queryリクエストを組み立てる（`#pk = :pk` にフィルターを合成）
    pub fn prepare_query(&self, partition: &str, filter: Option<&Condition>) -> Result<Option<PreparedScan>, DynamoError> {
        let mut context = ExpressionContext::new();
        let name = context.name(&self.option.id_name);
        let token = context.value(&self.option.id_name, &Value::String(partition.to_string()));
        let key_condition = format!("{name} = {token}");

        let compiled = match filter {
            Some(filter) => FilterCompiler::compile_with(filter, context.clone()),
            None => CompiledFilter::Always,
        };

        match compiled {
            CompiledFilter::Never => Ok(None),
            CompiledFilter::Always => PreparedScan::from_parts(Some(key_condition), None, &context).map(Some),
            CompiledFilter::Expression { expression, context } => {
                PreparedScan::from_parts(Some(key_condition), Some(expression), &context).map(Some)
            }
        }
    }

    fn normalize_all(&self, raw: Option<Vec<HashMap<String, AttributeValue>>>) -> Result<Vec<Item>, DynamoError> {
        raw.unwrap_or_default()
            .into_iter()
            .map(|item| self.normalize(item))
            .collect()
    }

    /// 1ページ分Scan
    pub async fn scan(&self, request: &ScanRequest) -> Result<ScanPage, DynamoError> {
        let Some(prepared) = self.prepare_scan(request.filter.as_ref())? else {
            debug!(parent: &self.span, "フィルターが常に偽のためScanをスキップ");
            return Ok(ScanPage::default());
        };
        debug!(parent: &self.span, filter = ?prepared.filter_expression, limit = ?request.limit, "Scan");

        let result = self
            .client
            .scan()
            .table_name(&self.option.table_name)
            .set_filter_expression(prepared.filter_expression)
            .set_expression_attribute_names(prepared.names)
            .set_expression_attribute_values(prepared.values)
            .set_limit(request.limit)
            .set_exclusive_start_key(request.exclusive_start_key.clone())
            .send()
            .await
            .map_err(|e| DynamoError::ReadError(sdk_error_message(&e)))?;

        Ok(ScanPage {
            items: self.normalize_all(result.items)?,
            last_evaluated_key: result.last_evaluated_key,
        })
    }

    /// LastEvaluatedKeyがなくなるまでScan
    pub async fn scan_all(&self, filter: Option<&Condition>) -> Result<Vec<Item>, DynamoError> {
        let mut request = ScanRequest {
            filter: filter.cloned(),
            ..Default::default()
        };
        let mut items = Vec::new();
        loop {
            let page = self.scan(&request).await?;
            items.extend(page.items);
            match page.last_evaluated_key {
                Some(key) if !key.is_empty() => request.exclusive_start_key = Some(key),
                _ => break,
            }
        }
        debug!(parent: &self.span, count = items.len(), "Scan完了");
        Ok(items)
    }

    /// パーティションキーでQuery
    pub async fn query(&self, request: &QueryRequest) -> Result<ScanPage, DynamoError> {
        if request.partition.is_empty() {
            return Err(ErrorReason::illegal_argument("@partition is required").into());
        }
        let Some(prepared) = self.prepare_query(&request.partition, request.filter.as_ref())? else {
            return Ok(ScanPage::default());
        };
        debug!(parent: &self.span, partition = %request.partition, filter = ?prepared.filter_expression, "Query");

        let result = self
            .client
            .query()
            .table_name(&self.option.table_name)
            .set_key_condition_expression(prepared.key_condition_expression)
            .set_filter_expression(prepared.filter_expression)
            .set_expression_attribute_names(prepared.names)
            .set_expression_attribute_values(prepared.values)
            .set_limit(request.limit)
            .scan_index_forward(!request.descending)
            .set_exclusive_start_key(request.exclusive_start_key.clone())
            .send()
            .await
            .map_err(|e| DynamoError::ReadError(sdk_error_message(&e)))?;

        Ok(ScanPage {
            items: self.normalize_all(result.items)?,
            last_evaluated_key: result.last_evaluated_key,
        })
    }
}
