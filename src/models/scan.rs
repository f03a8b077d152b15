use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_CAMPAIGN: &str = "default";
pub const DEFAULT_QR_VERSION: &str = "1";

/// Client operating system family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Os {
    Ios,
    Android,
    Other,
}

impl Os {
    pub fn as_str(&self) -> &'static str {
        match self {
            Os::Ios => "ios",
            Os::Android => "android",
            Os::Other => "other",
        }
    }
}

impl fmt::Display for Os {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Browser {
    Chrome,
    Safari,
    Firefox,
    Edge,
    Opera,
    Samsung,
    Other,
}

impl Browser {
    pub fn as_str(&self) -> &'static str {
        match self {
            Browser::Chrome => "chrome",
            Browser::Safari => "safari",
            Browser::Firefox => "firefox",
            Browser::Edge => "edge",
            Browser::Opera => "opera",
            Browser::Samsung => "samsung",
            Browser::Other => "other",
        }
    }
}

impl fmt::Display for Browser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attributes derived from one request's headers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientProfile {
    pub os: Os,
    pub browser: Browser,
    pub device: String,
    /// Truncated network prefix, e.g. `203.0.113.0/24`
    pub ip_anonymized: String,
    pub country: String,
    pub region: String,
    pub city: String,
    pub timezone: String,
}

impl ClientProfile {
    /// Whether the geo fallback chain has anything left to fill in
    pub fn needs_geo(&self) -> bool {
        self.city.is_empty() || self.region.is_empty()
    }
}

/// Tracking parameters carried in the scanned URL's query string
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingParams {
    /// Lower-cased campaign slug
    pub campaign: String,
    pub qr_id: String,
    pub qr_version: String,
}

impl Default for TrackingParams {
    fn default() -> Self {
        Self {
            campaign: DEFAULT_CAMPAIGN.to_string(),
            qr_id: String::new(),
            qr_version: DEFAULT_QR_VERSION.to_string(),
        }
    }
}

impl TrackingParams {
    pub fn new(campaign: Option<&str>, qr_id: Option<&str>, qr_version: Option<&str>) -> Self {
        let campaign = campaign
            .map(|c| c.trim().to_lowercase())
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| DEFAULT_CAMPAIGN.to_string());
        let qr_id = qr_id.map(|q| q.trim().to_string()).unwrap_or_default();
        let qr_version = qr_version
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_QR_VERSION.to_string());

        Self {
            campaign,
            qr_id,
            qr_version,
        }
    }

    /// Human-friendly campaign name: `summer-promo` becomes `Summer Promo`
    pub fn campaign_title(&self) -> String {
        self.campaign
            .split(|c: char| c == '-' || c == '_' || c.is_whitespace())
            .filter(|word| !word.is_empty())
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Which store a destination points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Appstore,
    Playstore,
    Fallback,
}

impl StoreKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreKind::Appstore => "appstore",
            StoreKind::Playstore => "playstore",
            StoreKind::Fallback => "fallback",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    pub target: String,
    pub store_kind: StoreKind,
}

/// One analytics record describing a single redirect decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanEvent {
    pub display_name: String,
    /// RFC 3339 UTC timestamp
    pub timestamp: String,
    pub epoch_millis: i64,
    pub profile: ClientProfile,
    pub tracking: TrackingParams,
    pub sequence_number: Option<u64>,
    pub referrer: String,
    pub request_url: String,
    /// User-Agent truncated to the store's field budget
    pub user_agent: String,
    pub destination: Destination,
}
