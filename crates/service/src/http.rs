use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use scan_contracts::{ScanResponse, Status};

use crate::config::{ServiceConfig, StartupError};
use crate::index::IndexBackend;
use crate::pool::HitCountPool;
use crate::profile::{FilterResolver, ProfileServiceCache, ProfileServiceConfig, TRACKING_ID_HEADER};
use crate::scan::{RejectionKind, Scan, ScanQuery};
use crate::scan_logic::ScanLogic;
use crate::solr::{SolrClient, SolrClientConfig};

#[derive(Clone)]
pub struct AppState {
    scan: Scan,
}

/// Builds the collaborators described by `config` and the router serving
/// them. The hit count pool is created once here and shared by every scan.
pub fn router(config: ServiceConfig) -> Result<Router, StartupError> {
    let solr = SolrClient::new(SolrClientConfig {
        base_url: config.solr_url.clone(),
        app_id: config.solr_app_id.clone(),
        timeout: Duration::from_millis(config.solr_timeout_ms),
        user_agent: config.user_agent.clone(),
    })
    .map_err(|err| StartupError {
        code: "ERR_INDEX_CLIENT",
        message: format!("failed to initialize index client: {}", err),
    })?;

    let profiles = ProfileServiceCache::new(ProfileServiceConfig {
        base_url: config.vipcore_endpoint.clone(),
        timeout: Duration::from_millis(config.vipcore_timeout_ms),
        user_agent: config.user_agent.clone(),
        cache_ttl: Duration::from_millis(config.profile_cache_ttl_ms),
        error_ttl: Duration::from_millis(config.profile_cache_error_ttl_ms),
        cache_max_entries: config.profile_cache_max_entries,
    })
    .map_err(|err| StartupError {
        code: "ERR_PROFILE_CLIENT",
        message: format!("failed to initialize profile service client: {}", err),
    })?;

    let pool = HitCountPool::new(config.parallel_hitcount_requests);
    tracing::info!(size = pool.size(), "hit count pool ready");

    Ok(router_with(
        Arc::new(solr),
        Arc::new(profiles),
        pool,
        &config,
    ))
}

/// Router over already constructed collaborators.
pub fn router_with(
    index: Arc<dyn IndexBackend>,
    profiles: Arc<dyn FilterResolver>,
    pool: HitCountPool,
    config: &ServiceConfig,
) -> Router {
    let logic = ScanLogic::new(index, profiles, pool, config.scan_tuning());
    let state = AppState {
        scan: Scan::new(config.max_count, config.default_count, logic),
    };

    Router::new()
        .route("/healthz", get(healthz))
        .route("/status", get(status))
        .route("/metrics", get(metrics))
        .route("/scan", get(scan))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn status(State(state): State<AppState>) -> Json<Status> {
    let started = Instant::now();
    let status = match state.scan.logic().index().ping().await {
        Ok(()) => Status::ok(),
        Err(err) => {
            tracing::warn!(error = %err, "index ping failed");
            Status::failed(err.to_string())
        }
    };
    crate::metrics::observe_http_request("/status", "GET", 200, started.elapsed());
    Json(status)
}

async fn metrics() -> impl IntoResponse {
    match crate::metrics::render() {
        Ok((body, content_type)) => {
            let mut headers = HeaderMap::new();
            if let Ok(value) = HeaderValue::from_str(content_type.as_str()) {
                headers.insert(header::CONTENT_TYPE, value);
            }
            (headers, body).into_response()
        }
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

async fn scan(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ScanQuery>,
) -> Response {
    let started = Instant::now();
    let header_tracking_id = headers
        .get(TRACKING_ID_HEADER)
        .and_then(|v| v.to_str().ok());

    let (status, response) = match state.scan.scan(query, header_tracking_id).await {
        Ok(success) => (StatusCode::OK, ScanResponse::Success(success)),
        Err(rejection) => {
            let status = match rejection.kind {
                RejectionKind::BadRequest => StatusCode::BAD_REQUEST,
                RejectionKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (status, ScanResponse::Failure(rejection.failure))
        }
    };

    crate::metrics::observe_http_request("/scan", "GET", status.as_u16(), started.elapsed());
    (status, Json(response)).into_response()
}
