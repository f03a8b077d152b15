//! In-process record store
//!
//! Used for local development and tests. Ids are assigned from an atomic
//! counter, so the store-assigned identity is exact.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::storage::{
    CreatedRecord, Filter, Properties, QueryPage, RecordStore, StoreError, StoreResult,
    StoredRecord,
};

const DEFAULT_PAGE_SIZE: usize = 100;

/// Number of calls made per operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub create: usize,
    pub patch: usize,
    pub retrieve: usize,
    pub query: usize,
}

impl CallCounts {
    pub fn total(&self) -> usize {
        self.create + self.patch + self.retrieve + self.query
    }
}

pub struct MemoryRecordStore {
    records: DashMap<u64, Properties>,
    next_id: AtomicU64,
    page_size: usize,
    /// When false, `create` leaves `unique_id` empty, like a store whose
    /// numbering is only visible on a later read
    inline_unique_id: bool,
    creates: AtomicUsize,
    patches: AtomicUsize,
    retrieves: AtomicUsize,
    queries: AtomicUsize,
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            next_id: AtomicU64::new(1),
            page_size: DEFAULT_PAGE_SIZE,
            inline_unique_id: true,
            creates: AtomicUsize::new(0),
            patches: AtomicUsize::new(0),
            retrieves: AtomicUsize::new(0),
            queries: AtomicUsize::new(0),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_inline_unique_id(mut self, inline: bool) -> Self {
        self.inline_unique_id = inline;
        self
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn calls(&self) -> CallCounts {
        CallCounts {
            create: self.creates.load(Ordering::Relaxed),
            patch: self.patches.load(Ordering::Relaxed),
            retrieve: self.retrieves.load(Ordering::Relaxed),
            query: self.queries.load(Ordering::Relaxed),
        }
    }

    /// Snapshot of every record, ordered by id
    pub fn records(&self) -> Vec<StoredRecord> {
        let mut records: Vec<StoredRecord> = self
            .records
            .iter()
            .map(|entry| to_stored(*entry.key(), entry.value().clone()))
            .collect();
        records.sort_by_key(|r| r.unique_id);
        records
    }

    fn parse_id(id: &str) -> StoreResult<u64> {
        id.parse::<u64>()
            .map_err(|_| StoreError::Malformed(format!("invalid record id '{id}'")))
    }
}

fn to_stored(id: u64, properties: Properties) -> StoredRecord {
    StoredRecord {
        id: id.to_string(),
        unique_id: Some(id),
        properties,
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn create(&self, properties: &Properties) -> StoreResult<CreatedRecord> {
        self.creates.fetch_add(1, Ordering::Relaxed);
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.records.insert(id, properties.clone());

        Ok(CreatedRecord {
            id: id.to_string(),
            unique_id: self.inline_unique_id.then_some(id),
        })
    }

    async fn patch(&self, id: &str, properties: &Properties) -> StoreResult<()> {
        self.patches.fetch_add(1, Ordering::Relaxed);
        let key = Self::parse_id(id)?;
        let mut record = self.records.get_mut(&key).ok_or_else(|| StoreError::Status {
            status: 404,
            body: format!("record {id} not found"),
        })?;
        for (name, value) in properties {
            record.insert(name.clone(), value.clone());
        }
        Ok(())
    }

    async fn retrieve(&self, id: &str) -> StoreResult<Option<StoredRecord>> {
        self.retrieves.fetch_add(1, Ordering::Relaxed);
        let key = Self::parse_id(id)?;
        Ok(self
            .records
            .get(&key)
            .map(|entry| to_stored(key, entry.value().clone())))
    }

    async fn query(&self, filter: &Filter, cursor: Option<&str>) -> StoreResult<QueryPage> {
        self.queries.fetch_add(1, Ordering::Relaxed);
        let after = cursor.map(Self::parse_id).transpose()?.unwrap_or(0);

        let mut matching: Vec<(u64, Properties)> = self
            .records
            .iter()
            .filter(|entry| *entry.key() > after && filter.matches(entry.value()))
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        matching.sort_by_key(|(id, _)| *id);

        let has_more = matching.len() > self.page_size;
        matching.truncate(self.page_size);
        let next_cursor = if has_more {
            matching.last().map(|(id, _)| id.to_string())
        } else {
            None
        };

        Ok(QueryPage {
            records: matching
                .into_iter()
                .map(|(id, properties)| to_stored(id, properties))
                .collect(),
            next_cursor,
        })
    }
}
