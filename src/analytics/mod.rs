//! Scan analytics
//!
//! Classification of the scanning client, the geo fallback chain, per-campaign
//! sequence numbers and the event recorder that writes to the record store.
//! Nothing in here can change the outcome of a redirect.

pub mod classifier;
pub mod geo_headers;
pub mod geo_resolver;
pub mod geoip;
pub mod ip_extractor;
pub mod models;
pub mod recorder;
pub mod sequence;
pub mod user_agent;

pub use classifier::{classify_headers, Classification, ClientClassifier};
pub use geo_resolver::{GeoProvider, GeoResolver, HttpGeoProvider};
pub use geoip::GeoIpService;
pub use ip_extractor::{anonymize_ip, extract_client_ip};
pub use models::GeoLocation;
pub use recorder::{EventRecorder, RecordOutcome, RequestMeta};
pub use sequence::{pad_ordinal, SequenceAssigner};
