//! Scan event recording
//!
//! One create per scan, then at most one patch once the ordinal is known.
//! Store failures are logged here and never leave this module.

use chrono::{DateTime, SecondsFormat, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::analytics::sequence::{display_name, provisional_name, SequenceAssigner};
use crate::config::SequenceStrategy;
use crate::models::{ClientProfile, Destination, ScanEvent, TrackingParams};
use crate::storage::{CreatedRecord, Properties, PropertyValue, RecordStore};

/// Property names of a scan document
pub mod fields {
    pub const NAME: &str = "Name";
    pub const TIMESTAMP: &str = "Timestamp";
    pub const EPOCH: &str = "Epoch";
    pub const OS: &str = "OS";
    pub const BROWSER: &str = "Browser";
    pub const DEVICE: &str = "Device";
    pub const DESTINATION: &str = "Destination";
    pub const IP: &str = "IP";
    pub const COUNTRY: &str = "Country";
    pub const REGION: &str = "Region";
    pub const CITY: &str = "City";
    pub const TIMEZONE: &str = "Timezone";
    pub const CAMPAIGN: &str = "Campaign";
    pub const QR: &str = "QR";
    pub const QR_VERSION: &str = "QR Version";
    pub const USER_AGENT: &str = "User Agent";
    pub const REFERRER: &str = "Referrer";
    pub const URL: &str = "URL";
    pub const SEQUENCE: &str = "Sequence";
}

/// Rich text fields are capped well below the store's limit
pub const USER_AGENT_MAX_CHARS: usize = 500;

const UNKNOWN: &str = "unknown";

/// Request metadata that is not part of the client profile
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    pub user_agent: String,
    pub referrer: String,
    pub request_url: String,
}

/// Assemble the event for one scan, named provisionally
pub fn build_event(
    profile: ClientProfile,
    tracking: TrackingParams,
    destination: Destination,
    meta: RequestMeta,
    now: DateTime<Utc>,
) -> ScanEvent {
    ScanEvent {
        display_name: provisional_name(&tracking),
        timestamp: now.to_rfc3339_opts(SecondsFormat::Millis, true),
        epoch_millis: now.timestamp_millis(),
        profile,
        tracking,
        sequence_number: None,
        referrer: meta.referrer,
        request_url: meta.request_url,
        user_agent: crate::analytics::user_agent::truncate_chars(
            &meta.user_agent,
            USER_AGENT_MAX_CHARS,
        ),
        destination,
    }
}

fn or_unknown(value: &str) -> String {
    if value.trim().is_empty() {
        UNKNOWN.to_string()
    } else {
        value.to_string()
    }
}

/// Typed document properties for an event
pub fn event_properties(event: &ScanEvent) -> Properties {
    let profile = &event.profile;
    let tracking = &event.tracking;

    let mut props = Properties::new();
    let mut put = |name: &str, value: PropertyValue| {
        props.insert(name.to_string(), value);
    };

    put(fields::NAME, PropertyValue::Title(event.display_name.clone()));
    put(fields::TIMESTAMP, PropertyValue::Date(event.timestamp.clone()));
    put(fields::EPOCH, PropertyValue::Number(event.epoch_millis as f64));
    put(fields::OS, PropertyValue::Select(profile.os.to_string()));
    put(fields::BROWSER, PropertyValue::Select(profile.browser.to_string()));
    put(fields::DEVICE, PropertyValue::Select(profile.device.clone()));
    put(
        fields::DESTINATION,
        PropertyValue::Select(event.destination.store_kind.as_str().to_string()),
    );
    put(fields::IP, PropertyValue::Text(profile.ip_anonymized.clone()));
    put(fields::COUNTRY, PropertyValue::Text(or_unknown(&profile.country)));
    put(fields::REGION, PropertyValue::Text(or_unknown(&profile.region)));
    put(fields::CITY, PropertyValue::Text(or_unknown(&profile.city)));
    put(fields::TIMEZONE, PropertyValue::Text(profile.timezone.clone()));
    put(fields::CAMPAIGN, PropertyValue::Text(tracking.campaign.clone()));
    put(fields::QR, PropertyValue::Text(tracking.qr_id.clone()));
    put(fields::QR_VERSION, PropertyValue::Text(tracking.qr_version.clone()));
    put(fields::USER_AGENT, PropertyValue::Text(event.user_agent.clone()));
    if !event.referrer.is_empty() {
        put(fields::REFERRER, PropertyValue::Url(event.referrer.clone()));
    }
    if !event.request_url.is_empty() {
        put(fields::URL, PropertyValue::Url(event.request_url.clone()));
    }
    if let Some(ordinal) = event.sequence_number {
        put(fields::SEQUENCE, PropertyValue::Number(ordinal as f64));
    }

    props
}

/// What happened to one event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// The create call failed; nothing was stored
    CreateFailed,
    /// Stored; `ordinal` is set when the title was patched successfully
    Recorded {
        record_id: String,
        ordinal: Option<u64>,
    },
}

/// A stored scan whose title is still provisional
#[derive(Debug)]
pub struct CreatedScan {
    event: ScanEvent,
    record: CreatedRecord,
}

impl CreatedScan {
    pub fn record_id(&self) -> &str {
        &self.record.id
    }
}

pub struct EventRecorder {
    store: Arc<dyn RecordStore>,
    sequence: SequenceAssigner,
}

impl EventRecorder {
    pub fn new(store: Arc<dyn RecordStore>, strategy: SequenceStrategy) -> Self {
        let sequence = SequenceAssigner::new(Arc::clone(&store), strategy);
        Self { store, sequence }
    }

    pub fn store_name(&self) -> &'static str {
        self.store.name()
    }

    /// Create, sequence and patch; never fails
    pub async fn record(&self, event: ScanEvent) -> RecordOutcome {
        match self.create(event).await {
            Some(created) => self.finish(created).await,
            None => RecordOutcome::CreateFailed,
        }
    }

    /// Store the event under its provisional name; `None` when the create fails
    pub async fn create(&self, event: ScanEvent) -> Option<CreatedScan> {
        match self.store.create(&event_properties(&event)).await {
            Ok(record) => Some(CreatedScan { event, record }),
            Err(e) => {
                warn!(
                    store = self.store.name(),
                    campaign = %event.tracking.campaign,
                    error = %e,
                    "failed to record scan event"
                );
                None
            }
        }
    }

    /// Resolve the ordinal and patch the final title, at most one patch
    pub async fn finish(&self, created: CreatedScan) -> RecordOutcome {
        let CreatedScan { mut event, record } = created;

        let Some(ordinal) = self
            .sequence
            .assign(&event.tracking.campaign, &record)
            .await
        else {
            debug!(record_id = %record.id, "scan recorded without ordinal");
            return RecordOutcome::Recorded {
                record_id: record.id,
                ordinal: None,
            };
        };

        event.sequence_number = Some(ordinal);
        event.display_name = display_name(&event.tracking, ordinal);

        let mut update = Properties::new();
        update.insert(
            fields::NAME.to_string(),
            PropertyValue::Title(event.display_name.clone()),
        );
        update.insert(fields::SEQUENCE.to_string(), PropertyValue::Number(ordinal as f64));

        match self.store.patch(&record.id, &update).await {
            Ok(()) => {
                debug!(record_id = %record.id, name = %event.display_name, "scan recorded");
                RecordOutcome::Recorded {
                    record_id: record.id,
                    ordinal: Some(ordinal),
                }
            }
            Err(e) => {
                warn!(
                    store = self.store.name(),
                    record_id = %record.id,
                    error = %e,
                    "failed to patch scan title, keeping provisional name"
                );
                RecordOutcome::Recorded {
                    record_id: record.id,
                    ordinal: None,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Browser, Os, StoreKind};
    use crate::storage::{
        Filter, MemoryRecordStore, QueryPage, StoreError, StoreResult, StoredRecord,
    };
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Memory store whose query or patch calls time out
    struct FlakyStore {
        inner: MemoryRecordStore,
        fail_query: bool,
        fail_patch: bool,
        queries: AtomicUsize,
        patches: AtomicUsize,
    }

    impl FlakyStore {
        fn new(fail_query: bool, fail_patch: bool) -> Self {
            Self {
                inner: MemoryRecordStore::new(),
                fail_query,
                fail_patch,
                queries: AtomicUsize::new(0),
                patches: AtomicUsize::new(0),
            }
        }

        fn title(&self, id: &str) -> Option<String> {
            self.inner
                .records()
                .into_iter()
                .find(|r| r.id == id)
                .and_then(|r| r.properties.get(fields::NAME).cloned())
                .and_then(|v| v.as_text().map(str::to_string))
        }
    }

    #[async_trait]
    impl RecordStore for FlakyStore {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn create(&self, properties: &Properties) -> StoreResult<CreatedRecord> {
            self.inner.create(properties).await
        }

        async fn patch(&self, id: &str, properties: &Properties) -> StoreResult<()> {
            self.patches.fetch_add(1, Ordering::SeqCst);
            if self.fail_patch {
                return Err(StoreError::Timeout);
            }
            self.inner.patch(id, properties).await
        }

        async fn retrieve(&self, id: &str) -> StoreResult<Option<StoredRecord>> {
            self.inner.retrieve(id).await
        }

        async fn query(&self, filter: &Filter, cursor: Option<&str>) -> StoreResult<QueryPage> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            if self.fail_query {
                return Err(StoreError::Timeout);
            }
            self.inner.query(filter, cursor).await
        }
    }

    fn sample_event(campaign: &str, ua: &str) -> ScanEvent {
        let profile = ClientProfile {
            os: Os::Ios,
            browser: Browser::Safari,
            device: "iPhone".to_string(),
            ip_anonymized: "203.0.113.0/24".to_string(),
            country: "ES".to_string(),
            region: String::new(),
            city: "Madrid".to_string(),
            timezone: "Europe/Madrid".to_string(),
        };
        let destination = Destination {
            target: "https://apps.apple.com/app/id1".to_string(),
            store_kind: StoreKind::Appstore,
        };
        let meta = RequestMeta {
            user_agent: ua.to_string(),
            referrer: String::new(),
            request_url: "https://scan.example.com/?c=spring".to_string(),
        };
        let now = Utc.with_ymd_and_hms(2025, 3, 14, 9, 26, 53).unwrap();
        build_event(
            profile,
            TrackingParams::new(Some(campaign), None, None),
            destination,
            meta,
            now,
        )
    }

    #[test]
    fn test_build_event() {
        let long_ua = "x".repeat(USER_AGENT_MAX_CHARS + 100);
        let event = sample_event("spring", &long_ua);

        assert_eq!(event.display_name, "Spring / —");
        assert_eq!(event.timestamp, "2025-03-14T09:26:53.000Z");
        assert_eq!(event.epoch_millis, 1_741_944_413_000);
        assert_eq!(event.user_agent.chars().count(), USER_AGENT_MAX_CHARS);
        assert_eq!(event.sequence_number, None);
    }

    #[test]
    fn test_event_properties() {
        let event = sample_event("spring", "ua");
        let props = event_properties(&event);

        let text = |name: &str| props.get(name).and_then(PropertyValue::as_text);
        assert_eq!(text(fields::OS), Some("ios"));
        assert_eq!(text(fields::DESTINATION), Some("appstore"));
        assert_eq!(text(fields::REGION), Some("unknown"));
        assert_eq!(text(fields::CITY), Some("Madrid"));
        assert_eq!(text(fields::CAMPAIGN), Some("spring"));
        assert_eq!(text(fields::QR_VERSION), Some("1"));
        assert!(!props.contains_key(fields::REFERRER));
        assert!(!props.contains_key(fields::SEQUENCE));
        assert_eq!(
            props.get(fields::NAME),
            Some(&PropertyValue::Title("Spring / —".to_string()))
        );
    }

    #[tokio::test]
    async fn test_record_patches_title() {
        let store = Arc::new(MemoryRecordStore::new());
        let recorder = EventRecorder::new(store.clone(), SequenceStrategy::Count);

        let outcome = recorder.record(sample_event("spring", "ua")).await;
        assert_eq!(
            outcome,
            RecordOutcome::Recorded {
                record_id: "1".to_string(),
                ordinal: Some(1)
            }
        );

        let stored = store.retrieve("1").await.unwrap().unwrap();
        assert_eq!(
            stored.properties.get(fields::NAME),
            Some(&PropertyValue::Title("Spring / 001".to_string()))
        );
        assert_eq!(
            stored.properties.get(fields::SEQUENCE),
            Some(&PropertyValue::Number(1.0))
        );
        assert_eq!(store.calls().create, 1);
        assert_eq!(store.calls().patch, 1);
    }

    #[tokio::test]
    async fn test_query_failure_keeps_provisional_name() {
        let store = Arc::new(FlakyStore::new(true, false));
        let recorder = EventRecorder::new(store.clone(), SequenceStrategy::Count);

        let outcome = recorder.record(sample_event("spring", "ua")).await;
        assert_eq!(
            outcome,
            RecordOutcome::Recorded {
                record_id: "1".to_string(),
                ordinal: None
            }
        );
        assert_eq!(store.title("1").as_deref(), Some("Spring / —"));
        assert_eq!(store.inner.calls().create, 1);
        // No retry and no patch without an ordinal
        assert_eq!(store.queries.load(Ordering::SeqCst), 1);
        assert_eq!(store.patches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_patch_failure_keeps_provisional_name() {
        let store = Arc::new(FlakyStore::new(false, true));
        let recorder = EventRecorder::new(store.clone(), SequenceStrategy::Count);

        let outcome = recorder.record(sample_event("spring", "ua")).await;
        assert_eq!(
            outcome,
            RecordOutcome::Recorded {
                record_id: "1".to_string(),
                ordinal: None
            }
        );
        assert_eq!(store.title("1").as_deref(), Some("Spring / —"));
        assert_eq!(store.inner.calls().create, 1);
        assert_eq!(store.queries.load(Ordering::SeqCst), 1);
        assert_eq!(store.patches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_create_then_finish() {
        let store = Arc::new(MemoryRecordStore::new());
        let recorder = EventRecorder::new(store.clone(), SequenceStrategy::Count);

        let created = recorder.create(sample_event("spring", "ua")).await.unwrap();
        assert_eq!(created.record_id(), "1");
        assert_eq!(store.calls().query, 0);
        assert_eq!(store.calls().patch, 0);

        let outcome = recorder.finish(created).await;
        assert_eq!(
            outcome,
            RecordOutcome::Recorded {
                record_id: "1".to_string(),
                ordinal: Some(1)
            }
        );
        assert_eq!(store.calls().patch, 1);
    }
}
