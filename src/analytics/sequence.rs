//! Per-campaign display ordinals
//!
//! Two strategies, chosen per deployment:
//!
//! - `Count`: count the campaign's records (excluding the one just created)
//!   and add one. Sequential scans get 1, 2, 3, ... per campaign; concurrent
//!   scans of the same campaign may share an ordinal.
//! - `StoreId`: use the number the store assigns atomically on create,
//!   reading the record back once if the create response lacked it. Unique,
//!   but shared across campaigns so not contiguous within one.
//!
//! Any failure yields `None`; the caller keeps the provisional name.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::analytics::recorder::fields;
use crate::config::SequenceStrategy;
use crate::models::TrackingParams;
use crate::storage::{CreatedRecord, Filter, RecordStore, StoreError, StoreResult};

/// Placeholder shown until the ordinal is known
pub const PROVISIONAL_MARK: &str = "—";

/// Upper bound on pages walked while counting
const MAX_COUNT_PAGES: usize = 1_000;

/// Zero-pad to width 3; wider numbers are left as they are
pub fn pad_ordinal(ordinal: u64) -> String {
    format!("{ordinal:03}")
}

fn compose(tracking: &TrackingParams, middle: &str) -> String {
    let title = tracking.campaign_title();
    if tracking.qr_id.is_empty() {
        format!("{title} / {middle}")
    } else {
        format!("{title} / {middle} / {}", tracking.qr_id)
    }
}

/// `"<Campaign Title> / — [/ <qrId>]"`
pub fn provisional_name(tracking: &TrackingParams) -> String {
    compose(tracking, PROVISIONAL_MARK)
}

/// `"<Campaign Title> / 007 [/ <qrId>]"`
pub fn display_name(tracking: &TrackingParams, ordinal: u64) -> String {
    compose(tracking, &pad_ordinal(ordinal))
}

/// Count a campaign's records, skipping `exclude_id`
///
/// Follows cursors until the store stops returning one or repeats the last
/// one, and gives up after `MAX_COUNT_PAGES` pages.
pub async fn count_campaign_records(
    store: &dyn RecordStore,
    campaign: &str,
    exclude_id: Option<&str>,
) -> StoreResult<u64> {
    let filter = Filter::text_equals(fields::CAMPAIGN, campaign);
    let mut cursor: Option<String> = None;
    let mut total: u64 = 0;

    for _ in 0..MAX_COUNT_PAGES {
        let page = store.query(&filter, cursor.as_deref()).await?;
        total += page
            .records
            .iter()
            .filter(|r| Some(r.id.as_str()) != exclude_id)
            .count() as u64;

        match page.next_cursor {
            Some(next) if cursor.as_deref() != Some(next.as_str()) => cursor = Some(next),
            _ => return Ok(total),
        }
    }

    Err(StoreError::Malformed(format!(
        "campaign '{campaign}' spans more than {MAX_COUNT_PAGES} pages"
    )))
}

pub struct SequenceAssigner {
    store: Arc<dyn RecordStore>,
    strategy: SequenceStrategy,
}

impl SequenceAssigner {
    pub fn new(store: Arc<dyn RecordStore>, strategy: SequenceStrategy) -> Self {
        Self { store, strategy }
    }

    /// Ordinal for a freshly created record, if one can be determined
    pub async fn assign(&self, campaign: &str, created: &CreatedRecord) -> Option<u64> {
        match self.strategy {
            SequenceStrategy::Count => self.count_then_increment(campaign, created).await,
            SequenceStrategy::StoreId => self.store_assigned(created).await,
        }
    }

    async fn count_then_increment(&self, campaign: &str, created: &CreatedRecord) -> Option<u64> {
        // The new record may or may not be visible yet
        match count_campaign_records(self.store.as_ref(), campaign, Some(&created.id)).await {
            Ok(others) => Some(others + 1),
            Err(e) => {
                warn!(campaign, store = self.store.name(), error = %e, "failed to count campaign records");
                None
            }
        }
    }

    async fn store_assigned(&self, created: &CreatedRecord) -> Option<u64> {
        if let Some(id) = created.unique_id {
            return Some(id);
        }

        // Read-after-write may lag: exactly one retry, no polling
        match self.store.retrieve(&created.id).await {
            Ok(Some(record)) => {
                if record.unique_id.is_none() {
                    debug!(record_id = %created.id, "store has not assigned a unique id yet");
                }
                record.unique_id
            }
            Ok(None) => {
                debug!(record_id = %created.id, "created record not visible on read-back");
                None
            }
            Err(e) => {
                warn!(record_id = %created.id, store = self.store.name(), error = %e, "failed to read back created record");
                None
            }
        }
    }
}
