use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use qrscan::analytics::{ClientClassifier, EventRecorder, GeoResolver};
use qrscan::config::{Config, LoggingMode};
use qrscan::redirect::{self, ScanState};
use qrscan::storage;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load configuration
    let config = Config::from_env()?;
    info!("Loaded configuration");

    // Initialize record store
    let store = storage::from_config(&config.record_store)
        .await
        .context("failed to initialize record store")?;

    let recorder = match store {
        Some(store) => {
            info!(
                "📝 Recording scans to {} ({:?} sequence, {:?} logging)",
                store.name(),
                config.sequence_strategy,
                config.logging_mode
            );
            if config.logging_mode == LoggingMode::Background {
                info!("   - Scan titles are patched after the redirect; in-flight patches are lost on exit");
            }
            Some(EventRecorder::new(store, config.sequence_strategy))
        }
        None => {
            warn!("🔕 No record store configured - scans are redirected but not recorded");
            None
        }
    };

    // Initialize geo fallback chain
    let resolver = Arc::new(GeoResolver::from_config(&config.geo)?);

    let state = Arc::new(ScanState {
        destinations: config.destinations.clone(),
        cache_policy: config.cache_policy,
        logging_mode: config.logging_mode,
        classifier: ClientClassifier::new(resolver),
        recorder,
    });

    info!(
        "🎯 Destinations: ios={}, android={}, fallback={}",
        config.destinations.ios_url, config.destinations.android_url, config.destinations.fallback_url
    );
    info!("🗄️  Cache-Control: {}", config.cache_policy.header_value());

    let router = redirect::create_redirect_router(state);

    // Start redirect server
    let redirect_addr = format!(
        "{}:{}",
        config.redirect_server.host, config.redirect_server.port
    );
    let listener = tokio::net::TcpListener::bind(&redirect_addr)
        .await
        .with_context(|| format!("failed to bind {redirect_addr}"))?;
    info!("🚀 Scan redirect server listening on http://{}", redirect_addr);

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
