use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;

use crate::ttl_cache::TtlCache;

pub const TRACKING_ID_HEADER: &str = "X-DBCTrackingId";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProfileError {
    #[error("profile service request timed out")]
    Timeout,
    #[error("profile service HTTP error: {0}")]
    Http(String),
    #[error("profile service returned status {0}")]
    BadStatus(u16),
    #[error("profile service error: {0}")]
    Service(String),
    #[error("profile service returned invalid JSON response")]
    InvalidResponse,
}

impl From<reqwest::Error> for ProfileError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_timeout() {
            ProfileError::Timeout
        } else {
            ProfileError::Http(value.to_string())
        }
    }
}

/// Resolves the filter expression restricting what a profile may see.
#[async_trait]
pub trait FilterResolver: Send + Sync {
    async fn filter_query_for(
        &self,
        agency_id: &str,
        profile: &str,
        tracking_id: &str,
    ) -> Result<String, ProfileError>;
}

#[derive(Debug, Clone)]
pub struct ProfileServiceConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub user_agent: String,
    pub cache_ttl: Duration,
    pub error_ttl: Duration,
    pub cache_max_entries: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ProfileCacheKey {
    agency_id: String,
    profile: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileServiceResponse {
    #[serde(default)]
    filter_query: Option<String>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

/// Profile service client memoizing both answers and failures per
/// (agency, profile). The tracking id is forwarded but is not part of the
/// key.
#[derive(Clone)]
pub struct ProfileServiceCache {
    base_url: String,
    http: reqwest::Client,
    cache: TtlCache<ProfileCacheKey, Result<String, ProfileError>>,
    cache_ttl: Duration,
    error_ttl: Duration,
}

impl ProfileServiceCache {
    pub fn new(config: ProfileServiceConfig) -> Result<Self, ProfileError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent)
            .build()?;

        Ok(Self {
            base_url: config.base_url,
            http,
            cache: TtlCache::new(config.cache_max_entries),
            cache_ttl: config.cache_ttl,
            error_ttl: config.error_ttl,
        })
    }

    fn search_url(&self, agency_id: &str, profile: &str) -> String {
        format!(
            "{}/profileservice/search/{}/{}",
            self.base_url.trim_end_matches('/'),
            agency_id,
            profile
        )
    }

    async fn fetch(
        &self,
        agency_id: &str,
        profile: &str,
        tracking_id: &str,
    ) -> Result<String, ProfileError> {
        let resp = self
            .http
            .get(self.search_url(agency_id, profile))
            .header(TRACKING_ID_HEADER, tracking_id)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(ProfileError::BadStatus(resp.status().as_u16()));
        }

        let decoded = resp.json::<ProfileServiceResponse>().await.map_err(|err| {
            tracing::warn!(
                agency_id,
                profile,
                error = %err,
                "error occurred when fetching filter query"
            );
            ProfileError::InvalidResponse
        })?;

        if let Some(error) = decoded.error {
            let message = match error {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            tracing::warn!(agency_id, profile, error = %message, "profile service returned an error");
            return Err(ProfileError::Service(message));
        }

        decoded.filter_query.ok_or(ProfileError::InvalidResponse)
    }
}

#[async_trait]
impl FilterResolver for ProfileServiceCache {
    async fn filter_query_for(
        &self,
        agency_id: &str,
        profile: &str,
        tracking_id: &str,
    ) -> Result<String, ProfileError> {
        let key = ProfileCacheKey {
            agency_id: agency_id.to_string(),
            profile: profile.to_string(),
        };

        if let Some(cached) = self.cache.get(&key).await {
            return cached;
        }

        tracing::debug!(agency_id, profile, "filter query lookup");
        let started = Instant::now();
        let outcome = self.fetch(agency_id, profile, tracking_id).await;
        crate::metrics::observe_backend_call(
            "profile_service",
            if outcome.is_ok() { "success" } else { "error" },
            started.elapsed(),
        );

        let ttl = if outcome.is_ok() {
            self.cache_ttl
        } else {
            self.error_ttl
        };
        self.cache.put(key, outcome.clone(), ttl).await;
        let entries = self.cache.len().await;
        tracing::debug!(entries, "cached filter lookup");

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::extract::{Path, State};
    use axum::http::HeaderMap;
    use axum::routing::get;
    use axum::{Json, Router};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    async fn search(
        State(counter): State<Arc<AtomicUsize>>,
        Path((agency_id, profile)): Path<(String, String)>,
        headers: HeaderMap,
    ) -> Json<serde_json::Value> {
        counter.fetch_add(1, Ordering::SeqCst);
        let tracked = headers.get("x-dbctrackingid").is_some();
        match (agency_id.as_str(), profile.as_str(), tracked) {
            (_, _, false) => Json(serde_json::json!({ "error": "missing_tracking" })),
            ("123456", "that", true) => Json(serde_json::json!({
                "filterQuery": "collection:(777777-foo OR 654321-bar)",
                "trackingId": "ignored"
            })),
            _ => Json(serde_json::json!({ "error": "profile_not_found" })),
        }
    }

    async fn spawn_profile_service(
        counter: Arc<AtomicUsize>,
    ) -> (SocketAddr, oneshot::Sender<()>, tokio::task::JoinHandle<()>) {
        let app = Router::new()
            .route(
                "/api/profileservice/search/{agency_id}/{profile}",
                get(search),
            )
            .with_state(counter);

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind should succeed");
        let addr = listener.local_addr().expect("local_addr should succeed");

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
        });

        (addr, shutdown_tx, handle)
    }

    fn cache_for(addr: SocketAddr) -> ProfileServiceCache {
        cache_with_ttls(addr, Duration::from_secs(60), Duration::from_secs(60))
    }

    fn cache_with_ttls(
        addr: SocketAddr,
        cache_ttl: Duration,
        error_ttl: Duration,
    ) -> ProfileServiceCache {
        ProfileServiceCache::new(ProfileServiceConfig {
            base_url: format!("http://{}/api/", addr),
            timeout: Duration::from_secs(2),
            user_agent: "ScanService/test".to_string(),
            cache_ttl,
            error_ttl,
            cache_max_entries: 16,
        })
        .expect("profile cache should build")
    }

    #[tokio::test]
    async fn successful_lookup_is_cached_across_tracking_ids() {
        let counter = Arc::new(AtomicUsize::new(0));
        let (addr, shutdown, task) = spawn_profile_service(counter.clone()).await;
        let cache = cache_for(addr);

        let first = cache.filter_query_for("123456", "that", "t1").await;
        let second = cache.filter_query_for("123456", "that", "t2").await;

        shutdown.send(()).ok();
        let _ = task.await;

        let expected = Ok("collection:(777777-foo OR 654321-bar)".to_string());
        assert_eq!(first, expected);
        assert_eq!(second, expected);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_lookup_is_cached_too() {
        let counter = Arc::new(AtomicUsize::new(0));
        let (addr, shutdown, task) = spawn_profile_service(counter.clone()).await;
        let cache = cache_for(addr);

        let first = cache.filter_query_for("000001", "nope", "t1").await;
        let second = cache.filter_query_for("000001", "nope", "t1").await;

        shutdown.send(()).ok();
        let _ = task.await;

        assert_eq!(
            first,
            Err(ProfileError::Service("profile_not_found".to_string()))
        );
        assert_eq!(second, first);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failures_expire_on_their_own_ttl() {
        let counter = Arc::new(AtomicUsize::new(0));
        let (addr, shutdown, task) = spawn_profile_service(counter.clone()).await;
        let cache = cache_with_ttls(addr, Duration::from_secs(60), Duration::from_millis(20));

        assert!(cache.filter_query_for("000001", "nope", "t").await.is_err());
        assert!(cache.filter_query_for("123456", "that", "t").await.is_ok());
        assert_eq!(counter.load(Ordering::SeqCst), 2);

        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(cache.filter_query_for("000001", "nope", "t").await.is_err());
        assert!(cache.filter_query_for("123456", "that", "t").await.is_ok());

        shutdown.send(()).ok();
        let _ = task.await;

        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn unreachable_service_is_an_http_error() {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind should succeed");
        let addr = listener.local_addr().expect("local_addr should succeed");
        drop(listener);

        let cache = cache_for(addr);
        let result = cache.filter_query_for("123456", "that", "t").await;
        assert!(matches!(result, Err(ProfileError::Http(_))));
    }
}
