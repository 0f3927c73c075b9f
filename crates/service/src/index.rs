use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IndexError {
    #[error("index request timed out")]
    Timeout,
    #[error("index HTTP error: {0}")]
    Http(String),
    #[error("index returned status {0}")]
    BadStatus(u16),
    #[error("{operation}: malformed response")]
    MalformedResponse { operation: &'static str },
}

impl From<reqwest::Error> for IndexError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_timeout() {
            IndexError::Timeout
        } else {
            IndexError::Http(value.to_string())
        }
    }
}

/// The term index the scan engine browses.
///
/// Implementations must return terms from [`IndexBackend::enumerate_terms`]
/// in strictly increasing order without duplicates.
#[async_trait]
pub trait IndexBackend: Send + Sync {
    /// Maps a raw value to the token the index would store for `field`.
    async fn normalize(&self, field: &str, value: &str) -> Result<String, IndexError>;

    /// Up to `limit` terms of `field` starting at `lower_bound`.
    async fn enumerate_terms(
        &self,
        field: &str,
        lower_bound: &str,
        inclusive: bool,
        limit: usize,
        tracking_id: &str,
    ) -> Result<Vec<String>, IndexError>;

    /// Number of documents where `field` holds `value` and `filter_query`
    /// matches.
    async fn hit_count(
        &self,
        field: &str,
        value: &str,
        filter_query: &str,
    ) -> Result<u64, IndexError>;

    async fn ping(&self) -> Result<(), IndexError>;
}
