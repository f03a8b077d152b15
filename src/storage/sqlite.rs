use crate::storage::{
    CreatedRecord, Filter, Properties, QueryPage, RecordStore, StoreError, StoreResult,
    StoredRecord,
};
use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;

const PAGE_SIZE: i64 = 100;

/// Record store backed by a single SQLite table of JSON documents
pub struct SqliteRecordStore {
    pool: Arc<SqlitePool>,
}

impl SqliteRecordStore {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        // Every connection to `:memory:` opens its own database
        let max_connections = if database_url.contains(":memory:") {
            1
        } else {
            max_connections
        };

        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    pub async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scan_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                created_at INTEGER NOT NULL,
                properties TEXT NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    fn parse_id(id: &str) -> StoreResult<i64> {
        id.parse::<i64>()
            .map_err(|_| StoreError::Malformed(format!("invalid record id '{id}'")))
    }

    fn row_to_record(id: i64, properties: &str) -> StoreResult<StoredRecord> {
        let properties: Properties = serde_json::from_str(properties)
            .map_err(|e| StoreError::Malformed(format!("record {id}: {e}")))?;
        Ok(StoredRecord {
            id: id.to_string(),
            unique_id: u64::try_from(id).ok(),
            properties,
        })
    }
}

fn db_error(e: sqlx::Error) -> StoreError {
    StoreError::Other(e.into())
}

/// JSON path to a property's value, e.g. `$."QR Version".value`
fn value_path(property: &str) -> String {
    format!("$.\"{}\".value", property.replace('"', ""))
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn create(&self, properties: &Properties) -> StoreResult<CreatedRecord> {
        let json =
            serde_json::to_string(properties).map_err(|e| StoreError::Other(e.into()))?;
        let created_at = chrono::Utc::now().timestamp_millis();

        let result = sqlx::query("INSERT INTO scan_records (created_at, properties) VALUES (?, ?)")
            .bind(created_at)
            .bind(json)
            .execute(self.pool.as_ref())
            .await
            .map_err(db_error)?;

        let id = result.last_insert_rowid();
        Ok(CreatedRecord {
            id: id.to_string(),
            unique_id: u64::try_from(id).ok(),
        })
    }

    async fn patch(&self, id: &str, properties: &Properties) -> StoreResult<()> {
        let key = Self::parse_id(id)?;
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let row = sqlx::query("SELECT properties FROM scan_records WHERE id = ?")
            .bind(key)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_error)?
            .ok_or_else(|| StoreError::Status {
                status: 404,
                body: format!("record {id} not found"),
            })?;

        let stored: String = row.try_get("properties").map_err(db_error)?;
        let mut merged: Properties = serde_json::from_str(&stored)
            .map_err(|e| StoreError::Malformed(format!("record {id}: {e}")))?;
        merged.extend(properties.iter().map(|(k, v)| (k.clone(), v.clone())));
        let json = serde_json::to_string(&merged).map_err(|e| StoreError::Other(e.into()))?;

        sqlx::query("UPDATE scan_records SET properties = ? WHERE id = ?")
            .bind(json)
            .bind(key)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;
        Ok(())
    }

    async fn retrieve(&self, id: &str) -> StoreResult<Option<StoredRecord>> {
        let key = Self::parse_id(id)?;
        let row = sqlx::query("SELECT id, properties FROM scan_records WHERE id = ?")
            .bind(key)
            .fetch_optional(self.pool.as_ref())
            .await
            .map_err(db_error)?;

        match row {
            Some(row) => {
                let id: i64 = row.try_get("id").map_err(db_error)?;
                let properties: String = row.try_get("properties").map_err(db_error)?;
                Ok(Some(Self::row_to_record(id, &properties)?))
            }
            None => Ok(None),
        }
    }

    async fn query(&self, filter: &Filter, cursor: Option<&str>) -> StoreResult<QueryPage> {
        let after = cursor.map(Self::parse_id).transpose()?.unwrap_or(0);

        let rows = sqlx::query(
            r#"
            SELECT id, properties FROM scan_records
            WHERE id > ? AND json_extract(properties, ?) = ?
            ORDER BY id ASC
            LIMIT ?
            "#,
        )
        .bind(after)
        .bind(value_path(filter.property()))
        .bind(filter.value())
        .bind(PAGE_SIZE + 1)
        .fetch_all(self.pool.as_ref())
        .await
        .map_err(db_error)?;

        let has_more = rows.len() as i64 > PAGE_SIZE;
        let mut records = Vec::with_capacity(rows.len());
        for row in rows.iter().take(PAGE_SIZE as usize) {
            let id: i64 = row.try_get("id").map_err(db_error)?;
            let properties: String = row.try_get("properties").map_err(db_error)?;
            records.push(Self::row_to_record(id, &properties)?);
        }

        let next_cursor = if has_more {
            records.last().map(|r| r.id.clone())
        } else {
            None
        };

        Ok(QueryPage {
            records,
            next_cursor,
        })
    }
}
