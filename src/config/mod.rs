use anyhow::Context;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub redirect_server: ServerConfig,
    pub destinations: DestinationConfig,
    pub cache_policy: CachePolicy,
    pub logging_mode: LoggingMode,
    pub sequence_strategy: SequenceStrategy,
    pub record_store: RecordStoreConfig,
    pub geo: GeoConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationConfig {
    pub ios_url: String,
    pub android_url: String,
    pub fallback_url: String,
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self {
            ios_url: "https://apps.apple.com/".to_string(),
            android_url: "https://play.google.com/store/apps".to_string(),
            fallback_url: "https://example.com/".to_string(),
        }
    }
}

/// Cache headers attached to every redirect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CachePolicy {
    /// `Cache-Control: no-store`, every scan reaches the server
    NoStore,
    /// `Cache-Control: private, max-age=N`, absorbs immediate re-scans
    Private { max_age_secs: u64 },
}

impl CachePolicy {
    pub fn header_value(&self) -> String {
        match self {
            CachePolicy::NoStore => "no-store".to_string(),
            CachePolicy::Private { max_age_secs } => format!("private, max-age={max_age_secs}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoggingMode {
    /// Spawn the recorder and respond immediately
    Background,
    /// Await the recorder before responding
    Durable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SequenceStrategy {
    /// Count records of the campaign and add one
    Count,
    /// Use the store's own unique number
    StoreId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum RecordStoreConfig {
    Notion(NotionConfig),
    Sqlite { url: String },
    Memory,
    /// Recording disabled; redirects still work
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotionConfig {
    pub api_url: String,
    pub token: String,
    pub database_id: String,
    /// Name of the database's `unique_id` property
    pub unique_id_property: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoConfig {
    pub fallback_enabled: bool,
    /// Overall budget shared by all external providers
    pub timeout_ms: u64,
    pub primary_url: Option<String>,
    pub secondary_url: Option<String>,
    pub geoip_db_path: Option<String>,
}

impl GeoConfig {
    pub const DEFAULT_PRIMARY_URL: &'static str = "https://ipapi.co/{ip}/json/";
    pub const DEFAULT_SECONDARY_URL: &'static str =
        "http://ip-api.com/json/{ip}?fields=status,countryCode,region,regionName,city,timezone";

    const fn default_timeout_ms() -> u64 {
        700
    }

    /// No external lookups, no local database
    pub fn disabled() -> Self {
        Self {
            fallback_enabled: false,
            timeout_ms: Self::default_timeout_ms(),
            primary_url: None,
            secondary_url: None,
            geoip_db_path: None,
        }
    }
}

impl Config {
    const DEFAULT_CACHE_MAX_AGE_SECS: u64 = 60;
    const DEFAULT_STORE_TIMEOUT_MS: u64 = 5000;

    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key lookup; `from_env` passes the process environment
    pub fn from_lookup<F>(get: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get_or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let redirect_host = get_or("REDIRECT_HOST", "127.0.0.1");
        let redirect_port = get_or("REDIRECT_PORT", "3000")
            .parse::<u16>()
            .context("REDIRECT_PORT must be a valid port number")?;

        let defaults = DestinationConfig::default();
        let destinations = DestinationConfig {
            ios_url: get("IOS_URL").unwrap_or(defaults.ios_url),
            android_url: get("ANDROID_URL").unwrap_or(defaults.android_url),
            fallback_url: get("FALLBACK_URL").unwrap_or(defaults.fallback_url),
        };

        let cache_policy = match get_or("CACHE_POLICY", "no-store").to_lowercase().as_str() {
            "private" => {
                let max_age_secs = get("CACHE_MAX_AGE_SECS")
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(Self::DEFAULT_CACHE_MAX_AGE_SECS);
                CachePolicy::Private { max_age_secs }
            }
            "no-store" | "nostore" => CachePolicy::NoStore,
            other => {
                tracing::warn!(
                    "Unknown CACHE_POLICY '{other}', falling back to 'no-store'. Supported values: no-store, private"
                );
                CachePolicy::NoStore
            }
        };

        let logging_mode = match get_or("LOGGING_MODE", "background").to_lowercase().as_str() {
            "durable" | "sync" => LoggingMode::Durable,
            "background" | "async" => LoggingMode::Background,
            other => {
                tracing::warn!(
                    "Unknown LOGGING_MODE '{other}', falling back to 'background'. Supported values: background, durable"
                );
                LoggingMode::Background
            }
        };

        let sequence_strategy = match get_or("SEQUENCE_STRATEGY", "count")
            .to_lowercase()
            .as_str()
        {
            "count" => SequenceStrategy::Count,
            "store-id" | "store_id" => SequenceStrategy::StoreId,
            other => {
                tracing::warn!(
                    "Unknown SEQUENCE_STRATEGY '{other}', falling back to 'count'. Supported values: count, store-id"
                );
                SequenceStrategy::Count
            }
        };

        let store_timeout_ms = get("STORE_TIMEOUT_MS")
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(Self::DEFAULT_STORE_TIMEOUT_MS);

        let record_store = match get_or("RECORD_STORE", "notion").to_lowercase().as_str() {
            "notion" => match (
                get("NOTION_TOKEN").filter(|v| !v.is_empty()),
                get("NOTION_DB_ID").filter(|v| !v.is_empty()),
            ) {
                (Some(token), Some(database_id)) => RecordStoreConfig::Notion(NotionConfig {
                    api_url: get_or("NOTION_API_URL", "https://api.notion.com"),
                    token,
                    database_id,
                    unique_id_property: get_or("NOTION_UNIQUE_ID_PROPERTY", "ID"),
                    timeout_ms: store_timeout_ms,
                }),
                _ => {
                    tracing::warn!(
                        "NOTION_TOKEN or NOTION_DB_ID is not set, scan recording is disabled"
                    );
                    RecordStoreConfig::None
                }
            },
            "sqlite" => RecordStoreConfig::Sqlite {
                url: get_or("DATABASE_URL", "sqlite://./scans.db"),
            },
            "memory" => RecordStoreConfig::Memory,
            "none" | "off" => RecordStoreConfig::None,
            other => {
                tracing::warn!(
                    "Unknown RECORD_STORE '{other}', scan recording is disabled. Supported values: notion, sqlite, memory, none"
                );
                RecordStoreConfig::None
            }
        };

        let fallback_enabled = get("GEO_FALLBACK_ENABLED")
            .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
            .unwrap_or(true);

        let geo = GeoConfig {
            fallback_enabled,
            timeout_ms: get("GEO_TIMEOUT_MS")
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or_else(GeoConfig::default_timeout_ms),
            primary_url: Some(
                get("GEO_PRIMARY_URL").unwrap_or_else(|| GeoConfig::DEFAULT_PRIMARY_URL.to_string()),
            )
            .filter(|v| !v.is_empty()),
            secondary_url: Some(
                get("GEO_SECONDARY_URL")
                    .unwrap_or_else(|| GeoConfig::DEFAULT_SECONDARY_URL.to_string()),
            )
            .filter(|v| !v.is_empty()),
            geoip_db_path: get("GEOIP_DB_PATH").filter(|v| !v.is_empty()),
        };

        Ok(Config {
            redirect_server: ServerConfig {
                host: redirect_host,
                port: redirect_port,
            },
            destinations,
            cache_policy,
            logging_mode,
            sequence_strategy,
            record_store,
            geo,
        })
    }
}
