use axum::{
    body::Body,
    extract::{rejection::QueryRejection, ConnectInfo, OriginalUri, Query, State},
    http::{
        header::{self, HeaderMap, HeaderValue},
        Extensions, StatusCode,
    },
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error};

use super::destination::{select_destination, ForcedTarget};
use crate::analytics::classifier::{self, consulted_headers, Classification, ClientClassifier};
use crate::analytics::recorder::{build_event, CreatedScan, EventRecorder, RequestMeta};
use crate::config::{CachePolicy, DestinationConfig, LoggingMode};
use crate::models::{ClientProfile, Destination, Os, TrackingParams};

pub struct ScanState {
    pub destinations: DestinationConfig,
    pub cache_policy: CachePolicy,
    pub logging_mode: LoggingMode,
    pub classifier: ClientClassifier,
    /// `None` when no record store is configured
    pub recorder: Option<EventRecorder>,
}

#[derive(Debug, Default)]
pub struct ScanQuery {
    /// Campaign
    pub c: Option<String>,
    /// QR id
    pub q: Option<String>,
    /// QR version
    pub v: Option<String>,
    /// Destination override: ios, android or fallback
    pub os: Option<String>,
    pub debug: Option<String>,
}

impl ScanQuery {
    /// Build from raw pairs; the first occurrence of a repeated key wins
    pub fn from_pairs(pairs: Vec<(String, String)>) -> Self {
        let mut query = ScanQuery::default();
        for (key, value) in pairs {
            let slot = match key.as_str() {
                "c" => &mut query.c,
                "q" => &mut query.q,
                "v" => &mut query.v,
                "os" => &mut query.os,
                "debug" => &mut query.debug,
                _ => continue,
            };
            slot.get_or_insert(value);
        }
        query
    }

    fn tracking(&self) -> TrackingParams {
        TrackingParams::new(self.c.as_deref(), self.q.as_deref(), self.v.as_deref())
    }

    fn forced(&self) -> Option<ForcedTarget> {
        self.os.as_deref().and_then(ForcedTarget::parse)
    }

    fn is_debug(&self) -> bool {
        matches!(
            self.debug.as_deref().map(str::trim),
            Some("1") | Some("true")
        )
    }
}

/// Diagnostic payload returned for `debug=1`
#[derive(Debug, Serialize)]
pub struct DebugReport {
    pub os: Os,
    pub browser: String,
    pub device: String,
    pub ip_anonymized: String,
    pub target: String,
    pub store_kind: String,
    pub forced_os: Option<Os>,
    pub profile: ClientProfile,
    pub tracking: TrackingParams,
    pub headers: BTreeMap<String, String>,
    pub recording: bool,
}

fn request_url(headers: &HeaderMap, uri: &axum::http::Uri) -> String {
    let host = headers
        .get("x-forwarded-host")
        .or_else(|| headers.get(header::HOST))
        .and_then(|h| h.to_str().ok())
        .unwrap_or("");
    if host.is_empty() {
        return uri.to_string();
    }
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|h| h.to_str().ok())
        .unwrap_or("http");
    let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
    format!("{scheme}://{host}{path}")
}

fn header_str(headers: &HeaderMap, name: header::HeaderName) -> String {
    headers
        .get(name)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("")
        .to_string()
}

/// Route a scan to its store, recording it on the side
pub async fn scan_redirect(
    State(state): State<Arc<ScanState>>,
    query: Result<Query<Vec<(String, String)>>, QueryRejection>,
    OriginalUri(uri): OriginalUri,
    extensions: Extensions,
    headers: HeaderMap,
) -> Response {
    let received_at = Utc::now();
    let query = match query {
        Ok(Query(pairs)) => ScanQuery::from_pairs(pairs),
        Err(rejection) => {
            debug!(error = %rejection, "unparseable scan query, using defaults");
            ScanQuery::default()
        }
    };

    let socket_ip = extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let tracking = query.tracking();
    let forced = query.forced();

    if query.is_debug() {
        let classification = state.classifier.classify(&headers, socket_ip).await;
        return debug_response(&state, &query, classification, tracking, &headers);
    }

    let classification = classifier::classify_headers(&headers, socket_ip);
    let destination = select_destination(&state.destinations, classification.profile.os, forced);

    let meta = RequestMeta {
        user_agent: classifier::user_agent(&headers).to_string(),
        referrer: header_str(&headers, header::REFERER),
        request_url: request_url(&headers, &uri),
    };
    let campaign = tracking.campaign.clone();
    let scan = PendingScan {
        classification,
        tracking,
        destination: destination.clone(),
        meta,
        received_at,
    };

    match state.logging_mode {
        // Only the create is awaited; sequencing and the patch run after the response
        LoggingMode::Durable => {
            if let Some(created) = create_scan(&state, scan).await {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    finish_scan(&state, created).await;
                });
            }
        }
        LoggingMode::Background => {
            let state = Arc::clone(&state);
            tokio::spawn(async move {
                if let Some(created) = create_scan(&state, scan).await {
                    finish_scan(&state, created).await;
                }
            });
        }
    }

    debug!(
        destination = %destination.target,
        campaign = %campaign,
        "scan redirected"
    );
    redirect_response(&destination, state.cache_policy)
}

/// Everything the recorder needs, owned so it can move into a task
struct PendingScan {
    classification: Classification,
    tracking: TrackingParams,
    destination: Destination,
    meta: RequestMeta,
    received_at: DateTime<Utc>,
}

async fn create_scan(state: &ScanState, scan: PendingScan) -> Option<CreatedScan> {
    let recorder = state.recorder.as_ref()?;

    let classification = state.classifier.enrich(scan.classification).await;
    let event = build_event(
        classification.profile,
        scan.tracking,
        scan.destination,
        scan.meta,
        scan.received_at,
    );
    recorder.create(event).await
}

async fn finish_scan(state: &ScanState, created: CreatedScan) {
    let Some(recorder) = &state.recorder else {
        return;
    };

    let outcome = recorder.finish(created).await;
    debug!(store = recorder.store_name(), ?outcome, "scan recording finished");
}

/// 302 with the configured cache policy
pub fn redirect_response(destination: &Destination, cache_policy: CachePolicy) -> Response {
    let location = match HeaderValue::from_str(&destination.target) {
        Ok(value) => value,
        Err(e) => {
            error!(
                destination = %destination.target,
                error = %e,
                "destination is not a valid header value"
            );
            return (StatusCode::INTERNAL_SERVER_ERROR, "Invalid destination").into_response();
        }
    };

    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::FOUND;
    let response_headers = response.headers_mut();
    response_headers.insert(header::LOCATION, location);
    if let Ok(cache_control) = HeaderValue::from_str(&cache_policy.header_value()) {
        response_headers.insert(header::CACHE_CONTROL, cache_control);
    }
    response_headers.insert(header::VARY, HeaderValue::from_static("User-Agent"));
    response
}

fn debug_response(
    state: &ScanState,
    query: &ScanQuery,
    classification: Classification,
    tracking: TrackingParams,
    headers: &HeaderMap,
) -> Response {
    let forced = query.forced();
    let destination = select_destination(&state.destinations, classification.profile.os, forced);
    let profile = classification.profile;

    let report = DebugReport {
        os: profile.os,
        browser: profile.browser.to_string(),
        device: profile.device.clone(),
        ip_anonymized: profile.ip_anonymized.clone(),
        target: destination.target,
        store_kind: destination.store_kind.as_str().to_string(),
        forced_os: forced.map(ForcedTarget::os),
        profile,
        tracking,
        headers: consulted_headers(headers),
        recording: state.recorder.is_some(),
    };

    let mut response = (StatusCode::OK, Json(report)).into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    #[derive(Serialize)]
    struct HealthResponse {
        status: String,
    }

    Json(HealthResponse {
        status: "OK".to_string(),
    })
}
