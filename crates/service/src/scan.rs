//! Request validation in front of the scan engine.

use std::time::Instant;

use scan_contracts::{ScanFailure, ScanRequest, ScanSuccess};
use serde::Deserialize;
use tracing::Instrument;
use ulid::Ulid;

use crate::scan_logic::{ScanLogic, ScanParams};

pub const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

/// Query parameters exactly as received. Everything is kept as text so a
/// malformed number is reported as a validation failure rather than a
/// framework rejection.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScanQuery {
    #[serde(rename = "agencyId")]
    pub agency_id: Option<String>,
    pub profile: Option<String>,
    pub term: Option<String>,
    pub register: Option<String>,
    pub count: Option<String>,
    #[serde(rename = "continue")]
    pub cont: Option<String>,
    #[serde(rename = "trackingId")]
    pub tracking_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ValidationError(pub &'static str);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionKind {
    BadRequest,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRejection {
    pub kind: RejectionKind,
    pub failure: ScanFailure,
}

#[derive(Clone)]
pub struct Scan {
    max_count: usize,
    default_count: usize,
    logic: ScanLogic,
}

impl Scan {
    pub fn new(max_count: usize, default_count: usize, logic: ScanLogic) -> Self {
        Self {
            max_count,
            default_count,
            logic,
        }
    }

    pub fn logic(&self) -> &ScanLogic {
        &self.logic
    }

    pub async fn scan(
        &self,
        query: ScanQuery,
        header_tracking_id: Option<&str>,
    ) -> Result<ScanSuccess, ScanRejection> {
        let tracking_id = resolve_tracking_id(query.tracking_id.as_deref(), header_tracking_id);
        let (request, validated) = self.validate(&query, tracking_id);

        let span = tracing::info_span!(
            "scan",
            tracking_id = %request.tracking_id,
            register = request.register.as_deref().unwrap_or_default(),
            agency_id = tracing::field::Empty,
            profile = request.profile.as_deref().unwrap_or_default(),
            outcome = tracing::field::Empty,
            latency_ms = tracing::field::Empty,
        );
        if let Some(agency_id) = request.agency_id {
            span.record("agency_id", agency_id);
        }
        let started = Instant::now();

        let result = async {
            let params = match validated {
                Ok(params) => params,
                Err(err) => {
                    tracing::info!(reason = %err, "rejected scan request");
                    return Err(ScanRejection {
                        kind: RejectionKind::BadRequest,
                        failure: ScanFailure {
                            error: err.to_string(),
                            request: request.clone(),
                        },
                    });
                }
            };

            match self.logic.scan(&params).await {
                Ok(result) => {
                    tracing::info!(
                        terms = result.terms.len(),
                        last_page = result.is_last_page(),
                        "scan complete"
                    );
                    Ok(ScanSuccess {
                        request: request.clone(),
                        result,
                    })
                }
                Err(err) => {
                    tracing::error!(error = %err, "scan failed");
                    Err(ScanRejection {
                        kind: RejectionKind::Internal,
                        failure: ScanFailure {
                            error: INTERNAL_ERROR_MESSAGE.to_string(),
                            request: request.clone(),
                        },
                    })
                }
            }
        }
        .instrument(span.clone())
        .await;

        let outcome = match &result {
            Ok(_) => "success",
            Err(rejection) if rejection.kind == RejectionKind::BadRequest => "bad_request",
            Err(_) => "error",
        };
        span.record("outcome", outcome);
        span.record("latency_ms", started.elapsed().as_millis() as u64);

        result
    }

    /// Builds the echoed request and, when every rule passes, the engine
    /// parameters. The echoed count is the caller's, before clamping.
    fn validate(
        &self,
        query: &ScanQuery,
        tracking_id: String,
    ) -> (ScanRequest, Result<ScanParams, ValidationError>) {
        let agency_id = query
            .agency_id
            .as_deref()
            .and_then(|v| v.trim().parse::<i64>().ok());
        let count = match query.count.as_deref() {
            None => Some(self.default_count as i64),
            Some(raw) => raw.trim().parse::<i64>().ok(),
        };
        let cont = Some(query.cont.as_deref().is_some_and(is_true));

        let request = ScanRequest {
            agency_id,
            profile: query.profile.clone(),
            term: query.term.clone(),
            register: query.register.clone(),
            count,
            cont,
            tracking_id,
        };

        let validated = self.check(&request);
        (request, validated)
    }

    fn check(&self, request: &ScanRequest) -> Result<ScanParams, ValidationError> {
        let agency_id = request
            .agency_id
            .ok_or(ValidationError("Required parameter: agencyId is missing"))?;

        let profile = request
            .profile
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or(ValidationError("Required parameter: profile is missing"))?;
        if !is_word(profile) {
            return Err(ValidationError(
                "Required parameter: profile contains invalid characters",
            ));
        }

        let term = request
            .term
            .as_deref()
            .ok_or(ValidationError("Required parameter: term is missing"))?;

        let register = request
            .register
            .as_deref()
            .filter(|r| !r.is_empty())
            .ok_or(ValidationError("Required parameter: register is missing"))?;

        let count = request
            .count
            .filter(|c| *c > 0)
            .ok_or(ValidationError("Parameter: count needs to be a positive number"))?;

        let cont = request.cont.unwrap_or(false);

        Ok(ScanParams {
            register: register.to_string(),
            term: term.to_string(),
            cont,
            count: usize::try_from(count).unwrap_or(usize::MAX).min(self.max_count),
            agency_id: format!("{:06}", agency_id),
            profile: profile.to_string(),
            tracking_id: request.tracking_id.clone(),
        })
    }
}

fn is_word(value: &str) -> bool {
    value
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

/// Only `true`, in any case, continues. Anything else starts a fresh scan.
fn is_true(raw: &str) -> bool {
    raw.trim().eq_ignore_ascii_case("true")
}

fn resolve_tracking_id(query: Option<&str>, header: Option<&str>) -> String {
    query
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .or_else(|| header.map(str::trim).filter(|v| !v.is_empty()))
        .map(str::to_string)
        .unwrap_or_else(|| Ulid::new().to_string())
}
