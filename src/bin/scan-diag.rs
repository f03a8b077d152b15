use anyhow::{Context, Result};
use axum::http::{HeaderMap, HeaderValue};
use chrono::{SecondsFormat, Utc};
use clap::{Parser, Subcommand};
use qrscan::analytics::classify_headers;
use qrscan::analytics::recorder::fields;
use qrscan::analytics::sequence::count_campaign_records;
use qrscan::config::Config;
use qrscan::storage::{self, Properties, PropertyValue, RecordStore};
use serde::Serialize;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "scan-diag")]
#[command(about = "Diagnostics for the scan redirect service", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the record store configuration and write one test record
    Check,
    /// Count recorded scans of a campaign
    Count {
        /// Campaign slug (the `c` query parameter)
        campaign: String,
    },
    /// Classify a User-Agent string the way the redirect handler does
    Classify {
        /// User-Agent header value
        user_agent: String,
    },
}

#[derive(Serialize)]
struct CheckReport {
    ok: bool,
    configured: bool,
    store: Option<&'static str>,
    created_id: Option<String>,
    error: Option<String>,
}

fn diag_properties() -> Properties {
    let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    let text = |s: &str| PropertyValue::Text(s.to_string());

    let mut props = Properties::new();
    props.insert(fields::NAME.into(), PropertyValue::Title(format!("Diag - {now}")));
    props.insert(fields::TIMESTAMP.into(), PropertyValue::Date(now));
    props.insert(fields::OS.into(), PropertyValue::Select("other".into()));
    props.insert(fields::COUNTRY.into(), text("diag"));
    props.insert(fields::CAMPAIGN.into(), text("diag"));
    props.insert(fields::QR_VERSION.into(), text("1"));
    props
}

async fn check(store: Option<Arc<dyn RecordStore>>) -> CheckReport {
    let Some(store) = store else {
        return CheckReport {
            ok: false,
            configured: false,
            store: None,
            created_id: None,
            error: Some("no record store configured".to_string()),
        };
    };

    match store.create(&diag_properties()).await {
        Ok(created) => CheckReport {
            ok: true,
            configured: true,
            store: Some(store.name()),
            created_id: Some(created.id),
            error: None,
        },
        Err(e) => CheckReport {
            ok: false,
            configured: true,
            store: Some(store.name()),
            created_id: None,
            error: Some(e.to_string()),
        },
    }
}

async fn count(store: &dyn RecordStore, campaign: &str) -> Result<u64> {
    count_campaign_records(store, &campaign.to_lowercase(), None)
        .await
        .with_context(|| format!("failed to count campaign '{campaign}'"))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Commands::Check => {
            let store = storage::from_config(&config.record_store).await?;
            let report = check(store).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Count { campaign } => {
            let store = storage::from_config(&config.record_store)
                .await?
                .context("no record store configured")?;
            let total = count(store.as_ref(), &campaign).await?;
            println!("✓ Campaign '{}' has {} recorded scan(s)", campaign, total);
        }
        Commands::Classify { user_agent } => {
            let mut headers = HeaderMap::new();
            headers.insert(
                "user-agent",
                HeaderValue::from_str(&user_agent).context("User-Agent is not a valid header value")?,
            );
            let classification = classify_headers(&headers, None);
            println!("{}", serde_json::to_string_pretty(&classification.profile)?);
        }
    }

    Ok(())
}
