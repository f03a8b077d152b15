pub mod memory;
pub mod notion;
pub mod sqlite;
pub mod trait_def;

pub use memory::MemoryRecordStore;
pub use notion::NotionRecordStore;
pub use sqlite::SqliteRecordStore;
pub use trait_def::{
    CreatedRecord, Filter, Properties, PropertyValue, QueryPage, RecordStore, StoreError,
    StoreResult, StoredRecord,
};

use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use crate::config::RecordStoreConfig;

/// Build the configured record store; `None` means recording is disabled
pub async fn from_config(config: &RecordStoreConfig) -> Result<Option<Arc<dyn RecordStore>>> {
    let store: Arc<dyn RecordStore> = match config {
        RecordStoreConfig::Notion(notion) => {
            info!("Using Notion record store (database {})", notion.database_id);
            Arc::new(NotionRecordStore::new(notion)?)
        }
        RecordStoreConfig::Sqlite { url } => {
            info!("Using SQLite record store: {}", url);
            let store = SqliteRecordStore::new(url, 5).await?;
            store.init().await?;
            Arc::new(store)
        }
        RecordStoreConfig::Memory => {
            info!("Using in-memory record store");
            Arc::new(MemoryRecordStore::new())
        }
        RecordStoreConfig::None => return Ok(None),
    };
    Ok(Some(store))
}
