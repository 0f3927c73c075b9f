//! Verified term scan.
//!
//! Term enumeration knows nothing about profiles, so many enumerated terms
//! have no visible hits for the caller. Each candidate is therefore
//! verified with a hit count query before it may be returned. Verifications
//! run concurrently on the shared [`HitCountPool`] while enumeration keeps
//! going, and the number in flight is capped at what is still needed plus a
//! small overhead.

use std::collections::VecDeque;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use scan_contracts::{ScanResult, Term};
use tracing::Instrument;

use crate::in_flight::InFlight;
use crate::index::{IndexBackend, IndexError};
use crate::pool::HitCountPool;
use crate::profile::{FilterResolver, ProfileError};

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("index: {0}")]
    Index(#[from] IndexError),
    #[error("profile lookup: {0}")]
    Profile(#[from] ProfileError),
    #[error("interrupted while waiting for {in_flight} hit count verifications")]
    Interrupted { in_flight: usize },
}

/// Knobs trading index round trips against wasted verifications. None of
/// them change which terms a scan returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanTuning {
    /// Terms fetched beyond what is still missing.
    pub fetch_extra: usize,
    /// Another `to_go / fetch_extra_divisor` terms are fetched on top.
    pub fetch_extra_divisor: usize,
    /// Verifications allowed in flight beyond what is still missing.
    pub in_flight_overhead: usize,
    /// Total time one scan may spend waiting on in-flight verifications,
    /// measured from the start of the scan.
    pub drain_timeout: Duration,
}

impl Default for ScanTuning {
    fn default() -> Self {
        Self {
            fetch_extra: 5,
            fetch_extra_divisor: 8,
            in_flight_overhead: 3,
            drain_timeout: Duration::from_secs(30),
        }
    }
}

impl ScanTuning {
    pub fn batch_size(&self, to_go: usize) -> usize {
        to_go + self.fetch_extra + to_go / self.fetch_extra_divisor.max(1)
    }

    /// How many more verifications may be submitted right now.
    pub fn submission_budget(&self, to_go: usize, in_flight: usize) -> usize {
        (to_go + self.in_flight_overhead).saturating_sub(in_flight)
    }
}

/// Validated input to one scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanParams {
    pub register: String,
    pub term: String,
    /// `term` is a continuation token: already normalized and excluded.
    pub cont: bool,
    pub count: usize,
    /// Zero padded to six digits.
    pub agency_id: String,
    pub profile: String,
    pub tracking_id: String,
}

impl ScanParams {
    /// The per-agency, per-profile register that holds enumerable terms.
    pub fn scan_register(&self) -> String {
        format!("{}_{}_{}", self.register, self.agency_id, self.profile)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    Unverified,
    Zero,
    Positive(u64),
}

/// A term pulled from enumeration. Its hit count is written once, by the
/// verification task that owns it.
#[derive(Debug)]
struct CandidateTerm {
    term: String,
    hits: OnceLock<u64>,
}

impl CandidateTerm {
    fn new(term: String) -> Arc<Self> {
        Arc::new(Self {
            term,
            hits: OnceLock::new(),
        })
    }

    fn record(&self, hits: u64) {
        let _ = self.hits.set(hits);
    }

    fn verification(&self) -> Verification {
        match self.hits.get() {
            None => Verification::Unverified,
            Some(0) => Verification::Zero,
            Some(hits) => Verification::Positive(*hits),
        }
    }
}

fn good_count(candidates: &[Arc<CandidateTerm>]) -> usize {
    candidates
        .iter()
        .filter(|c| matches!(c.verification(), Verification::Positive(_)))
        .count()
}

#[derive(Clone)]
pub struct ScanLogic {
    index: Arc<dyn IndexBackend>,
    profiles: Arc<dyn FilterResolver>,
    pool: HitCountPool,
    tuning: ScanTuning,
}

impl ScanLogic {
    pub fn new(
        index: Arc<dyn IndexBackend>,
        profiles: Arc<dyn FilterResolver>,
        pool: HitCountPool,
        tuning: ScanTuning,
    ) -> Self {
        Self {
            index,
            profiles,
            pool,
            tuning,
        }
    }

    pub fn index(&self) -> &Arc<dyn IndexBackend> {
        &self.index
    }

    pub async fn scan(&self, params: &ScanParams) -> Result<ScanResult, ScanError> {
        let deadline = tokio::time::Instant::now() + self.tuning.drain_timeout;
        let count = params.count;
        let scan_register = params.scan_register();

        let mut lower_bound = if params.cont {
            params.term.clone()
        } else {
            let normalized = self.index.normalize(&params.register, &params.term).await?;
            tracing::debug!(normalized = %normalized, "normalized start term");
            normalized
        };

        let filter_query: Arc<str> = self
            .profiles
            .filter_query_for(&params.agency_id, &params.profile, &params.tracking_id)
            .await?
            .into();
        tracing::debug!(filter_query = %filter_query, "resolved profile filter");

        let register: Arc<str> = params.register.as_str().into();
        let mut in_flight = InFlight::new();
        let mut candidates: Vec<Arc<CandidateTerm>> = Vec::new();
        let mut staged: VecDeque<String> = VecDeque::new();
        let mut inclusive = !params.cont;
        let mut exhausted = false;

        loop {
            let good = good_count(&candidates);
            if good >= count {
                break;
            }
            let to_go = count - good;

            let Some(term) = staged.pop_front() else {
                if exhausted {
                    tracing::debug!("reached the end of the register");
                    break;
                }

                let fetch = self.tuning.batch_size(to_go);
                tracing::debug!(fetch, lower_bound = %lower_bound, "fetching terms");
                let batch = self
                    .index
                    .enumerate_terms(
                        &scan_register,
                        &lower_bound,
                        inclusive,
                        fetch,
                        &params.tracking_id,
                    )
                    .await?;
                inclusive = false;

                match batch.last() {
                    Some(last) if batch.len() == fetch => lower_bound = last.clone(),
                    _ => exhausted = true,
                }
                staged.extend(batch);
                continue;
            };

            if self.tuning.submission_budget(to_go, in_flight.count()) == 0 {
                staged.push_front(term);
                await_completion(&mut in_flight, deadline).await?;
                continue;
            }

            let candidate = CandidateTerm::new(term);
            candidates.push(Arc::clone(&candidate));
            let guard = in_flight.acquire();
            tracing::trace!(
                term = %candidate.term,
                in_flight = in_flight.count(),
                "queued hit count verification"
            );

            let index = Arc::clone(&self.index);
            let register = Arc::clone(&register);
            let filter_query = Arc::clone(&filter_query);
            self.pool.submit(
                guard,
                async move {
                    verify(index.as_ref(), &register, &candidate, &filter_query).await;
                }
                .instrument(tracing::Span::current()),
            );
        }

        let drained = tokio::time::timeout_at(deadline, in_flight.wait_idle()).await;
        if drained.is_err() {
            return Err(ScanError::Interrupted {
                in_flight: in_flight.count(),
            });
        }

        let mut terms = candidates
            .iter()
            .filter_map(|c| match c.verification() {
                Verification::Positive(hits) => Some(Term {
                    term: c.term.clone(),
                    count: hits,
                }),
                _ => None,
            })
            .collect::<Vec<_>>();

        let validated = terms.len();
        terms.truncate(count);
        let extra = validated - terms.len();
        tracing::info!(extra, "extra terms hit validated");
        crate::metrics::add_extra_verified_terms(extra);

        let continue_after = if terms.len() == count {
            terms.last().map(|t| t.term.clone())
        } else {
            None
        };

        Ok(ScanResult::new(continue_after, terms))
    }
}

async fn await_completion(
    in_flight: &mut InFlight,
    deadline: tokio::time::Instant,
) -> Result<(), ScanError> {
    let waited = tokio::time::timeout_at(deadline, in_flight.wait_for_completion()).await;
    if waited.is_err() {
        return Err(ScanError::Interrupted {
            in_flight: in_flight.count(),
        });
    }
    Ok(())
}

async fn verify(
    index: &dyn IndexBackend,
    register: &str,
    candidate: &CandidateTerm,
    filter_query: &str,
) {
    match index
        .hit_count(register, &candidate.term, filter_query)
        .await
    {
        Ok(hits) => {
            candidate.record(hits);
            crate::metrics::observe_verified_term(if hits > 0 { "positive" } else { "zero" });
            tracing::debug!(term = %candidate.term, hits, "verified term");
        }
        Err(err) => {
            crate::metrics::observe_verified_term("failed");
            tracing::error!(
                term = %candidate.term,
                error = %err,
                "error checking real hit count"
            );
        }
    }
}
