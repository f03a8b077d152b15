//! Notion database as a record store
//!
//! Pages are created under one database. The database is expected to carry a
//! `unique_id` property whose number Notion assigns atomically on create.

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::debug;

use crate::config::NotionConfig;
use crate::storage::{
    CreatedRecord, Filter, Properties, PropertyValue, QueryPage, RecordStore, StoreError,
    StoreResult, StoredRecord,
};

const NOTION_VERSION: &str = "2022-06-28";
const PAGE_SIZE: u32 = 100;

pub struct NotionRecordStore {
    client: Client,
    api_url: String,
    token: String,
    database_id: String,
    unique_id_property: String,
}

impl NotionRecordStore {
    pub fn new(config: &NotionConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("qrscan/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("failed to build HTTP client for Notion")?;

        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            database_id: config.database_id.clone(),
            unique_id_property: config.unique_id_property.clone(),
        })
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .bearer_auth(&self.token)
            .header("Notion-Version", NOTION_VERSION)
    }

    /// Send a request and decode the JSON body of a success response
    async fn send(&self, builder: RequestBuilder) -> StoreResult<Value> {
        let response = self.authorized(builder).send().await.map_err(transport_error)?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| StoreError::Malformed(e.to_string()))
    }

    fn page_to_record(&self, page: &Value) -> StoreResult<StoredRecord> {
        let id = page
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| StoreError::Malformed("page without id".to_string()))?
            .to_string();

        let raw = page.get("properties").and_then(Value::as_object);
        let unique_id = raw.and_then(|props| unique_id_of(props.get(&self.unique_id_property)?));
        let properties = raw.map(from_notion_properties).unwrap_or_default();

        Ok(StoredRecord {
            id,
            unique_id,
            properties,
        })
    }
}

fn transport_error(e: reqwest::Error) -> StoreError {
    if e.is_timeout() {
        StoreError::Timeout
    } else {
        StoreError::Transport(e.to_string())
    }
}

fn rich_text(content: &str) -> Value {
    json!([{ "text": { "content": content } }])
}

/// Render typed properties in Notion's page property format
pub fn to_notion_properties(properties: &Properties) -> Value {
    let mut out = Map::new();
    for (name, value) in properties {
        let rendered = match value {
            PropertyValue::Title(s) => json!({ "title": rich_text(s) }),
            PropertyValue::Text(s) => json!({ "rich_text": rich_text(s) }),
            PropertyValue::Date(s) => json!({ "date": { "start": s } }),
            // Select option names may not contain commas
            PropertyValue::Select(s) => json!({ "select": { "name": s.replace(',', " ") } }),
            PropertyValue::Number(n) => json!({ "number": n }),
            PropertyValue::Url(s) if s.is_empty() => json!({ "url": Value::Null }),
            PropertyValue::Url(s) => json!({ "url": s }),
        };
        out.insert(name.clone(), rendered);
    }
    Value::Object(out)
}

fn plain_text(items: Option<&Value>) -> String {
    items
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    item.get("plain_text")
                        .or_else(|| item.pointer("/text/content"))
                        .and_then(Value::as_str)
                })
                .collect::<String>()
        })
        .unwrap_or_default()
}

/// Parse Notion page properties back into typed values; unknown types are skipped
pub fn from_notion_properties(raw: &Map<String, Value>) -> Properties {
    let mut properties = Properties::new();
    for (name, prop) in raw {
        let kind = prop.get("type").and_then(Value::as_str).unwrap_or_default();
        let value = match kind {
            "title" => Some(PropertyValue::Title(plain_text(prop.get("title")))),
            "rich_text" => Some(PropertyValue::Text(plain_text(prop.get("rich_text")))),
            "date" => prop
                .pointer("/date/start")
                .and_then(Value::as_str)
                .map(|s| PropertyValue::Date(s.to_string())),
            "select" => prop
                .pointer("/select/name")
                .and_then(Value::as_str)
                .map(|s| PropertyValue::Select(s.to_string())),
            "number" => prop
                .get("number")
                .and_then(Value::as_f64)
                .map(PropertyValue::Number),
            "url" => Some(PropertyValue::Url(
                prop.get("url")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            )),
            _ => None,
        };
        if let Some(value) = value {
            properties.insert(name.clone(), value);
        }
    }
    properties
}

fn unique_id_of(prop: &Value) -> Option<u64> {
    prop.pointer("/unique_id/number").and_then(Value::as_u64)
}

pub fn to_notion_filter(filter: &Filter) -> Value {
    match filter {
        Filter::TextEquals { property, value } => {
            json!({ "property": property, "rich_text": { "equals": value } })
        }
    }
}

#[async_trait]
impl RecordStore for NotionRecordStore {
    fn name(&self) -> &'static str {
        "notion"
    }

    async fn create(&self, properties: &Properties) -> StoreResult<CreatedRecord> {
        let body = json!({
            "parent": { "database_id": self.database_id },
            "properties": to_notion_properties(properties),
        });

        let page = self
            .send(self.client.post(format!("{}/v1/pages", self.api_url)).json(&body))
            .await?;
        let record = self.page_to_record(&page)?;
        debug!(page_id = %record.id, unique_id = ?record.unique_id, "created Notion page");

        Ok(CreatedRecord {
            id: record.id,
            unique_id: record.unique_id,
        })
    }

    async fn patch(&self, id: &str, properties: &Properties) -> StoreResult<()> {
        let body = json!({ "properties": to_notion_properties(properties) });
        self.send(
            self.client
                .patch(format!("{}/v1/pages/{}", self.api_url, id))
                .json(&body),
        )
        .await?;
        Ok(())
    }

    async fn retrieve(&self, id: &str) -> StoreResult<Option<StoredRecord>> {
        let result = self
            .send(self.client.get(format!("{}/v1/pages/{}", self.api_url, id)))
            .await;

        match result {
            Ok(page) => Ok(Some(self.page_to_record(&page)?)),
            Err(StoreError::Status { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn query(&self, filter: &Filter, cursor: Option<&str>) -> StoreResult<QueryPage> {
        let mut body = json!({
            "filter": to_notion_filter(filter),
            "page_size": PAGE_SIZE,
        });
        if let Some(cursor) = cursor {
            body["start_cursor"] = json!(cursor);
        }

        let response = self
            .send(
                self.client
                    .post(format!(
                        "{}/v1/databases/{}/query",
                        self.api_url, self.database_id
                    ))
                    .json(&body),
            )
            .await?;

        let records = response
            .get("results")
            .and_then(Value::as_array)
            .ok_or_else(|| StoreError::Malformed("query response without results".to_string()))?
            .iter()
            .map(|page| self.page_to_record(page))
            .collect::<StoreResult<Vec<_>>>()?;

        let has_more = response
            .get("has_more")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let next_cursor = if has_more {
            response
                .get("next_cursor")
                .and_then(Value::as_str)
                .map(str::to_string)
        } else {
            None
        };

        Ok(QueryPage {
            records,
            next_cursor,
        })
    }
}
