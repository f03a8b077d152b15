//! Geo fallback chain
//!
//! Edge headers are the first tier and are read by the classifier. When they
//! leave city or region empty and the client address is public, this module
//! tries a local MaxMind database and then up to two HTTP providers. The HTTP
//! providers share one latency budget; when it runs out the in-flight request
//! is dropped and the scan proceeds with what is known.

use async_trait::async_trait;
use moka::future::Cache;
use reqwest::Client;
use serde_json::Value;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::analytics::geoip::GeoIpService;
use crate::analytics::ip_extractor::is_public_ip;
use crate::analytics::models::GeoLocation;
use crate::config::GeoConfig;

const GEO_CACHE_TTL_SECS: u64 = 15 * 60;
const GEO_CACHE_MAX_CAPACITY: u64 = 10_000;

#[derive(Debug, Error)]
pub enum GeoLookupError {
    #[error("geo request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("geo provider returned status {0}")]
    Status(u16),
    #[error("geo provider reported failure: {0}")]
    Rejected(String),
}

/// One external IP geolocation source
#[async_trait]
pub trait GeoProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn lookup(&self, ip: IpAddr) -> Result<GeoLocation, GeoLookupError>;
}

/// JSON-over-HTTP provider; `url_template` contains an `{ip}` placeholder
///
/// Understands both the ipapi.co and the ip-api.com response shapes.
pub struct HttpGeoProvider {
    name: String,
    url_template: String,
    client: Client,
}

impl HttpGeoProvider {
    pub fn new(name: impl Into<String>, url_template: impl Into<String>, client: Client) -> Self {
        Self {
            name: name.into(),
            url_template: url_template.into(),
            client,
        }
    }
}

fn string_field(json: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| json.get(*k))
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|v| !v.is_empty())
        .map(str::to_string)
}

/// Parse a provider response body
pub fn parse_geo_response(json: &Value) -> Result<GeoLocation, GeoLookupError> {
    // ip-api.com: {"status": "fail", "message": ...}
    if json.get("status").and_then(Value::as_str) == Some("fail") {
        let message = string_field(json, &["message"]).unwrap_or_default();
        return Err(GeoLookupError::Rejected(message));
    }
    // ipapi.co: {"error": true, "reason": ...}
    if json.get("error").and_then(Value::as_bool) == Some(true) {
        let reason = string_field(json, &["reason", "message"]).unwrap_or_default();
        return Err(GeoLookupError::Rejected(reason));
    }

    Ok(GeoLocation {
        country: string_field(json, &["country_code", "countryCode"]),
        region: string_field(json, &["regionName", "region"]),
        city: string_field(json, &["city"]),
        timezone: string_field(json, &["timezone"]),
    })
}

#[async_trait]
impl GeoProvider for HttpGeoProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn lookup(&self, ip: IpAddr) -> Result<GeoLocation, GeoLookupError> {
        let url = self.url_template.replace("{ip}", &ip.to_string());
        let response = self.client.get(&url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(GeoLookupError::Status(status.as_u16()));
        }

        let json: Value = response.json().await?;
        parse_geo_response(&json)
    }
}

pub struct GeoResolver {
    enabled: bool,
    local: Option<GeoIpService>,
    providers: Vec<Arc<dyn GeoProvider>>,
    budget: Duration,
    /// IP → external result, including definite misses
    cache: Cache<IpAddr, Option<GeoLocation>>,
}

impl GeoResolver {
    pub fn new(
        local: Option<GeoIpService>,
        providers: Vec<Arc<dyn GeoProvider>>,
        budget: Duration,
    ) -> Self {
        let cache = Cache::builder()
            .time_to_live(Duration::from_secs(GEO_CACHE_TTL_SECS))
            .max_capacity(GEO_CACHE_MAX_CAPACITY)
            .build();

        Self {
            enabled: true,
            local,
            providers,
            budget,
            cache,
        }
    }

    /// Resolver that only ever returns the edge-provided values
    pub fn disabled() -> Self {
        let mut resolver = Self::new(None, Vec::new(), Duration::ZERO);
        resolver.enabled = false;
        resolver
    }

    pub fn from_config(config: &GeoConfig) -> anyhow::Result<Self> {
        if !config.fallback_enabled {
            info!("GeoIP fallback disabled, using edge headers only");
            return Ok(Self::disabled());
        }

        let local = match config.geoip_db_path.as_deref() {
            Some(path) => match GeoIpService::new(path) {
                Ok(service) => {
                    info!("GeoIP: Using MaxMind database at {}", path);
                    Some(service)
                }
                Err(e) => {
                    warn!("GeoIP: {:#}, continuing without a local database", e);
                    None
                }
            },
            None => None,
        };

        let budget = Duration::from_millis(config.timeout_ms);
        let client = Client::builder()
            .user_agent(concat!("qrscan/", env!("CARGO_PKG_VERSION")))
            .timeout(budget)
            .build()?;

        let mut providers: Vec<Arc<dyn GeoProvider>> = Vec::new();
        if let Some(url) = &config.primary_url {
            providers.push(Arc::new(HttpGeoProvider::new("primary", url, client.clone())));
        }
        if let Some(url) = &config.secondary_url {
            providers.push(Arc::new(HttpGeoProvider::new("secondary", url, client)));
        }

        info!(
            "GeoIP fallback: local database {}, {} external provider(s), {}ms budget",
            if local.is_some() { "enabled" } else { "disabled" },
            providers.len(),
            config.timeout_ms
        );

        Ok(Self::new(local, providers, budget))
    }

    /// Fill in missing geo fields for `ip`; never fails
    pub async fn resolve(&self, ip: Option<IpAddr>, known: GeoLocation) -> GeoLocation {
        let mut geo = known;
        if !self.enabled || !geo.is_incomplete() {
            return geo;
        }

        let Some(ip) = ip.filter(|ip| is_public_ip(*ip)) else {
            return geo;
        };

        if let Some(local) = &self.local {
            geo.merge_missing(local.lookup(ip));
            if !geo.is_incomplete() {
                return geo;
            }
        }

        if self.providers.is_empty() {
            return geo;
        }

        let external = self
            .cache
            .optionally_get_with(ip, self.lookup_external(ip))
            .await
            .flatten();
        if let Some(found) = external {
            geo.merge_missing(found);
        }
        geo
    }

    /// Try providers in order within one shared budget
    ///
    /// `Some(None)` is a definite miss and gets cached like a hit. Timeouts
    /// and transport or status failures return `None` and are retried on the
    /// next scan from the same address.
    async fn lookup_external(&self, ip: IpAddr) -> Option<Option<GeoLocation>> {
        let chain = async {
            let mut rejected = false;
            for provider in &self.providers {
                match provider.lookup(ip).await {
                    Ok(found) => {
                        debug!(provider = provider.name(), %ip, "geo lookup succeeded");
                        return Some(Some(found));
                    }
                    Err(e) => {
                        rejected |= matches!(e, GeoLookupError::Rejected(_));
                        debug!(provider = provider.name(), %ip, error = %e, "geo lookup failed");
                    }
                }
            }
            rejected.then_some(None)
        };

        match tokio::time::timeout(self.budget, chain).await {
            Ok(result) => result,
            Err(_) => {
                warn!(%ip, budget_ms = self.budget.as_millis() as u64, "geo lookup timed out");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeProvider {
        delay: Duration,
        result: Option<GeoLocation>,
        /// Fail with this HTTP status instead of rejecting
        status: Option<u16>,
        calls: AtomicUsize,
    }

    impl FakeProvider {
        fn new(delay_ms: u64, result: Option<GeoLocation>) -> Arc<Self> {
            Arc::new(Self {
                delay: Duration::from_millis(delay_ms),
                result,
                status: None,
                calls: AtomicUsize::new(0),
            })
        }

        fn unavailable() -> Arc<Self> {
            Arc::new(Self {
                delay: Duration::ZERO,
                result: None,
                status: Some(503),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl GeoProvider for FakeProvider {
        fn name(&self) -> &str {
            "fake"
        }

        async fn lookup(&self, _ip: IpAddr) -> Result<GeoLocation, GeoLookupError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if let Some(status) = self.status {
                return Err(GeoLookupError::Status(status));
            }
            self.result
                .clone()
                .ok_or_else(|| GeoLookupError::Rejected("no data".to_string()))
        }
    }

    fn madrid() -> GeoLocation {
        GeoLocation {
            country: Some("ES".to_string()),
            region: Some("Madrid".to_string()),
            city: Some("Madrid".to_string()),
            timezone: Some("Europe/Madrid".to_string()),
        }
    }

    fn public_ip() -> Option<IpAddr> {
        "81.2.69.160".parse().ok()
    }

    #[tokio::test]
    async fn test_fills_missing_fields_only() {
        let provider = FakeProvider::new(0, Some(madrid()));
        let resolver = GeoResolver::new(
            None,
            vec![provider.clone() as Arc<dyn GeoProvider>],
            Duration::from_millis(500),
        );

        let known = GeoLocation {
            country: Some("PT".to_string()),
            city: Some("Lisboa".to_string()),
            ..Default::default()
        };
        let geo = resolver.resolve(public_ip(), known).await;

        assert_eq!(geo.country.as_deref(), Some("PT"));
        assert_eq!(geo.city.as_deref(), Some("Lisboa"));
        assert_eq!(geo.region.as_deref(), Some("Madrid"));
        assert_eq!(geo.timezone.as_deref(), Some("Europe/Madrid"));
    }

    #[tokio::test]
    async fn test_complete_location_skips_lookup() {
        let provider = FakeProvider::new(0, Some(madrid()));
        let resolver = GeoResolver::new(
            None,
            vec![provider.clone() as Arc<dyn GeoProvider>],
            Duration::from_millis(500),
        );

        let geo = resolver.resolve(public_ip(), madrid()).await;
        assert_eq!(geo, madrid());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_private_addresses_are_never_looked_up() {
        let provider = FakeProvider::new(0, Some(madrid()));
        let resolver = GeoResolver::new(
            None,
            vec![provider.clone() as Arc<dyn GeoProvider>],
            Duration::from_millis(500),
        );

        for ip in ["10.0.0.7", "192.168.1.20", "127.0.0.1", "::1"] {
            let geo = resolver
                .resolve(ip.parse().ok(), GeoLocation::default())
                .await;
            assert_eq!(geo, GeoLocation::default());
        }
        let geo = resolver.resolve(None, GeoLocation::default()).await;
        assert_eq!(geo, GeoLocation::default());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_secondary_used_when_primary_fails() {
        let primary = FakeProvider::new(0, None);
        let secondary = FakeProvider::new(0, Some(madrid()));
        let resolver = GeoResolver::new(
            None,
            vec![
                primary.clone() as Arc<dyn GeoProvider>,
                secondary.clone() as Arc<dyn GeoProvider>,
            ],
            Duration::from_millis(500),
        );

        let geo = resolver.resolve(public_ip(), GeoLocation::default()).await;
        assert_eq!(geo, madrid());
        assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
        assert_eq!(secondary.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_secondary_skipped_when_primary_succeeds() {
        let primary = FakeProvider::new(0, Some(madrid()));
        let secondary = FakeProvider::new(0, Some(GeoLocation::default()));
        let resolver = GeoResolver::new(
            None,
            vec![
                primary.clone() as Arc<dyn GeoProvider>,
                secondary.clone() as Arc<dyn GeoProvider>,
            ],
            Duration::from_millis(500),
        );

        resolver.resolve(public_ip(), GeoLocation::default()).await;
        assert_eq!(secondary.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_budget_is_enforced() {
        let slow = FakeProvider::new(5_000, Some(madrid()));
        let resolver = GeoResolver::new(
            None,
            vec![slow.clone() as Arc<dyn GeoProvider>],
            Duration::from_millis(50),
        );

        let started = std::time::Instant::now();
        let known = GeoLocation {
            country: Some("ES".to_string()),
            ..Default::default()
        };
        let geo = resolver.resolve(public_ip(), known.clone()).await;

        assert_eq!(geo, known);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_results_are_cached_per_ip() {
        let provider = FakeProvider::new(0, Some(madrid()));
        let resolver = GeoResolver::new(
            None,
            vec![provider.clone() as Arc<dyn GeoProvider>],
            Duration::from_millis(500),
        );

        resolver.resolve(public_ip(), GeoLocation::default()).await;
        resolver.resolve(public_ip(), GeoLocation::default()).await;
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeouts_are_not_cached() {
        let slow = FakeProvider::new(5_000, Some(madrid()));
        let resolver = GeoResolver::new(
            None,
            vec![slow.clone() as Arc<dyn GeoProvider>],
            Duration::from_millis(50),
        );

        resolver.resolve(public_ip(), GeoLocation::default()).await;
        resolver.resolve(public_ip(), GeoLocation::default()).await;
        assert_eq!(slow.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unavailable_providers_are_retried() {
        let provider = FakeProvider::unavailable();
        let resolver = GeoResolver::new(
            None,
            vec![provider.clone() as Arc<dyn GeoProvider>],
            Duration::from_millis(500),
        );

        resolver.resolve(public_ip(), GeoLocation::default()).await;
        resolver.resolve(public_ip(), GeoLocation::default()).await;
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_rejections_are_cached() {
        let provider = FakeProvider::new(0, None);
        let resolver = GeoResolver::new(
            None,
            vec![provider.clone() as Arc<dyn GeoProvider>],
            Duration::from_millis(500),
        );

        let first = resolver.resolve(public_ip(), GeoLocation::default()).await;
        let second = resolver.resolve(public_ip(), GeoLocation::default()).await;
        assert_eq!(first, GeoLocation::default());
        assert_eq!(second, GeoLocation::default());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_disabled_resolver_returns_known() {
        let resolver = GeoResolver::disabled();
        let geo = resolver.resolve(public_ip(), GeoLocation::default()).await;
        assert_eq!(geo, GeoLocation::default());
    }

    #[test]
    fn test_parse_ipapi_co_response() {
        let body = json!({
            "ip": "81.2.69.160",
            "city": "London",
            "region": "England",
            "region_code": "ENG",
            "country_code": "GB",
            "timezone": "Europe/London"
        });
        let geo = parse_geo_response(&body).unwrap();
        assert_eq!(geo.country.as_deref(), Some("GB"));
        assert_eq!(geo.region.as_deref(), Some("England"));
        assert_eq!(geo.city.as_deref(), Some("London"));
        assert_eq!(geo.timezone.as_deref(), Some("Europe/London"));
    }

    #[test]
    fn test_parse_ip_api_com_response() {
        let body = json!({
            "status": "success",
            "countryCode": "ES",
            "region": "MD",
            "regionName": "Madrid",
            "city": "Madrid",
            "timezone": "Europe/Madrid"
        });
        let geo = parse_geo_response(&body).unwrap();
        assert_eq!(geo.country.as_deref(), Some("ES"));
        assert_eq!(geo.region.as_deref(), Some("Madrid"));
    }

    #[test]
    fn test_parse_failure_responses() {
        assert!(parse_geo_response(&json!({"status": "fail", "message": "reserved range"})).is_err());
        assert!(parse_geo_response(&json!({"error": true, "reason": "RateLimited"})).is_err());
    }
}
