//! Request classification: headers in, `ClientProfile` out

use axum::http::{header, HeaderMap};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;

use crate::analytics::geo_headers::{
    read_geo_headers, CITY_HEADERS, COUNTRY_HEADERS, REGION_HEADERS, TIMEZONE_HEADERS,
};
use crate::analytics::geo_resolver::GeoResolver;
use crate::analytics::ip_extractor::{anonymize, extract_client_ip};
use crate::analytics::models::GeoLocation;
use crate::analytics::user_agent::{detect_browser, detect_device, detect_os};
use crate::models::ClientProfile;

/// Headers reported back in debug responses
const CONSULTED_HEADERS: &[&str] = &["user-agent", "referer", "x-forwarded-for", "x-real-ip"];

#[derive(Debug, Clone)]
pub struct Classification {
    pub profile: ClientProfile,
    /// Full client address, only used for geo lookup and never recorded
    pub client_ip: Option<IpAddr>,
}

pub fn user_agent(headers: &HeaderMap) -> &str {
    headers
        .get(header::USER_AGENT)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("")
}

/// Header-only classification; never fails and never touches the network
pub fn classify_headers(headers: &HeaderMap, socket_addr: Option<IpAddr>) -> Classification {
    let ua = user_agent(headers);
    let client_ip = extract_client_ip(headers, socket_addr);
    let geo = read_geo_headers(headers);

    Classification {
        profile: profile_from(ua, client_ip, geo),
        client_ip,
    }
}

fn profile_from(ua: &str, client_ip: Option<IpAddr>, geo: GeoLocation) -> ClientProfile {
    ClientProfile {
        os: detect_os(ua),
        browser: detect_browser(ua),
        device: detect_device(ua),
        ip_anonymized: client_ip.map(anonymize).unwrap_or_default(),
        country: geo.country.unwrap_or_default(),
        region: geo.region.unwrap_or_default(),
        city: geo.city.unwrap_or_default(),
        timezone: geo.timezone.unwrap_or_default(),
    }
}

fn geo_of(profile: &ClientProfile) -> GeoLocation {
    let some = |s: &str| Some(s.to_string()).filter(|v| !v.is_empty());
    GeoLocation {
        country: some(&profile.country),
        region: some(&profile.region),
        city: some(&profile.city),
        timezone: some(&profile.timezone),
    }
}

/// Values of every header the classifier looks at, for diagnostics
pub fn consulted_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    CONSULTED_HEADERS
        .iter()
        .chain(COUNTRY_HEADERS)
        .chain(REGION_HEADERS)
        .chain(CITY_HEADERS)
        .chain(TIMEZONE_HEADERS)
        .filter_map(|name| {
            headers
                .get(*name)
                .and_then(|h| h.to_str().ok())
                .map(|v| (name.to_string(), v.to_string()))
        })
        .collect()
}

/// Header classification followed by the geo fallback chain
pub struct ClientClassifier {
    resolver: Arc<GeoResolver>,
}

impl ClientClassifier {
    pub fn new(resolver: Arc<GeoResolver>) -> Self {
        Self { resolver }
    }

    pub async fn classify(&self, headers: &HeaderMap, socket_addr: Option<IpAddr>) -> Classification {
        self.enrich(classify_headers(headers, socket_addr)).await
    }

    /// Run the geo fallback chain on a header-only classification
    pub async fn enrich(&self, mut classification: Classification) -> Classification {
        if classification.profile.needs_geo() {
            let known = geo_of(&classification.profile);
            let geo = self.resolver.resolve(classification.client_ip, known).await;

            let profile = &mut classification.profile;
            profile.country = geo.country.unwrap_or_default();
            profile.region = geo.region.unwrap_or_default();
            profile.city = geo.city.unwrap_or_default();
            profile.timezone = geo.timezone.unwrap_or_default();
        }

        classification
    }
}
