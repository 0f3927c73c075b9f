//! Wire types exchanged by the scan service.
//!
//! Every response echoes the caller's parameters back so clients can
//! correlate pages without keeping their own request log.

use serde::{Deserialize, Serialize};

/// The caller's parameters as received, before validation.
///
/// Fields the caller omitted or that failed to parse are `None`. The
/// tracking id is always present: it is generated when absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRequest {
    pub agency_id: Option<i64>,
    pub profile: Option<String>,
    pub term: Option<String>,
    pub register: Option<String>,
    pub count: Option<i64>,
    #[serde(rename = "continue")]
    pub cont: Option<bool>,
    pub tracking_id: String,
}

/// A term with a verified, strictly positive hit count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Term {
    pub term: String,
    pub count: u64,
}

/// One page of verified terms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResult {
    /// Last returned term when the page is full, `None` once the register
    /// is exhausted.
    pub continue_after: Option<String>,
    pub terms: Vec<Term>,
}

impl ScanResult {
    pub fn new(continue_after: Option<String>, terms: Vec<Term>) -> Self {
        Self {
            continue_after,
            terms,
        }
    }

    pub fn is_last_page(&self) -> bool {
        self.continue_after.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSuccess {
    pub request: ScanRequest,
    pub result: ScanResult,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanFailure {
    pub error: String,
    pub request: ScanRequest,
}

/// Either envelope, as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScanResponse {
    Success(ScanSuccess),
    Failure(ScanFailure),
}

impl ScanResponse {
    pub fn request(&self) -> &ScanRequest {
        match self {
            ScanResponse::Success(success) => &success.request,
            ScanResponse::Failure(failure) => &failure.request,
        }
    }
}

/// Body of the status endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub success: bool,
    pub error: Option<String>,
}

impl Status {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}
