use crate::config::Config;
use crate::core::compare::{Scores, SimilarityScorer};
use crate::core::fetch::{CandidateError, CandidateFetcher, CandidateRef};
use crate::core::image::{ensure_non_empty, ImageError};
use crate::core::ocr::TextExtractor;
use anyhow::Context;
use image::DynamicImage;
use serde::Serialize;
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{watch, Semaphore};

#[derive(Debug, Error)]
pub enum CompareError {
    #[error("Query image is invalid: {0}")]
    InvalidQuery(#[from] ImageError),
}

impl CompareError {
    pub fn code(&self) -> &'static str {
        match self {
            CompareError::InvalidQuery(_) => "invalid_image",
        }
    }
}

/// Cooperative cancellation for a running batch. Clones share one flag.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    flag: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn new() -> Self {
        let (flag, _) = watch::channel(false);
        Self {
            flag: Arc::new(flag),
        }
    }

    pub fn cancel(&self) {
        self.flag.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.flag.borrow()
    }

    /// Resolves once `cancel` has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.flag.subscribe();
        // The sender lives in `self`, so this cannot observe a closed channel
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Cancels when the returned guard is dropped, e.g. with the future of a
    /// request whose client went away.
    pub fn drop_guard(&self) -> CancelGuard {
        CancelGuard {
            handle: self.clone(),
        }
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

pub struct CancelGuard {
    handle: CancelHandle,
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        self.handle.cancel();
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Failure {
    pub code: String,
    pub message: String,
}

impl From<&CandidateError> for Failure {
    fn from(err: &CandidateError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// A candidate is either scored (possibly partially) or failed outright.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Scored(Scores),
    Failed(Failure),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonResult {
    /// Position in the request.
    pub index: usize,
    pub candidate: String,
    #[serde(flatten)]
    pub outcome: Outcome,
    pub elapsed_ms: u64,
}

impl ComparisonResult {
    pub fn scores(&self) -> Option<&Scores> {
        match &self.outcome {
            Outcome::Scored(scores) => Some(scores),
            Outcome::Failed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&Failure> {
        match &self.outcome {
            Outcome::Scored(_) => None,
            Outcome::Failed(failure) => Some(failure),
        }
    }

    pub fn combined(&self) -> Option<f64> {
        self.scores().and_then(|s| s.combined)
    }

    fn failed(index: usize, candidate: &CandidateRef, err: &CandidateError) -> Self {
        Self {
            index,
            candidate: candidate.to_string(),
            outcome: Outcome::Failed(Failure::from(err)),
            elapsed_ms: 0,
        }
    }
}

/// One entry per requested candidate, in request order.
#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub results: Vec<ComparisonResult>,
}

impl BatchResult {
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ComparisonResult> {
        self.results.iter()
    }

    /// Best first: combined score descending, then scored entries without a
    /// combined score, then failures. Ties keep request order.
    pub fn ranked(&self) -> Vec<&ComparisonResult> {
        let mut ranked: Vec<&ComparisonResult> = self.results.iter().collect();
        ranked.sort_by(|a, b| rank_key(a).cmp_desc(&rank_key(b)).then(a.index.cmp(&b.index)));
        ranked
    }

    pub fn best(&self) -> Option<&ComparisonResult> {
        self.ranked().into_iter().find(|r| r.combined().is_some())
    }
}

enum RankKey {
    Failed,
    Unscored,
    Scored(f64),
}

impl RankKey {
    fn tier(&self) -> u8 {
        match self {
            RankKey::Failed => 0,
            RankKey::Unscored => 1,
            RankKey::Scored(_) => 2,
        }
    }

    fn cmp_desc(&self, other: &RankKey) -> Ordering {
        match (self, other) {
            (RankKey::Scored(a), RankKey::Scored(b)) => b.total_cmp(a),
            _ => other.tier().cmp(&self.tier()),
        }
    }
}

fn rank_key(result: &ComparisonResult) -> RankKey {
    match &result.outcome {
        Outcome::Failed(_) => RankKey::Failed,
        Outcome::Scored(scores) => scores.combined.map_or(RankKey::Unscored, RankKey::Scored),
    }
}

/// Compares one query against many candidates concurrently.
pub struct BatchComparator {
    scorer: Arc<SimilarityScorer>,
    fetcher: Arc<CandidateFetcher>,
    concurrency: usize,
}

impl BatchComparator {
    pub fn new(scorer: SimilarityScorer, fetcher: CandidateFetcher, concurrency: usize) -> Self {
        Self {
            scorer: Arc::new(scorer),
            fetcher: Arc::new(fetcher),
            concurrency: concurrency.max(1),
        }
    }

    pub fn from_config(
        config: &Config,
        extractor: Arc<dyn TextExtractor>,
    ) -> anyhow::Result<Self> {
        let scorer = SimilarityScorer::from_config(config, extractor)
            .context("Failed to configure perceptual hasher")?;
        let fetcher =
            CandidateFetcher::new(&config.fetch).context("Failed to build HTTP client")?;
        Ok(Self::new(scorer, fetcher, config.batch.concurrency))
    }

    pub fn scorer(&self) -> &SimilarityScorer {
        &self.scorer
    }

    /// Every candidate gets exactly one entry, in input order. Candidate
    /// failures are recorded in their entry; only an invalid query fails the
    /// whole batch. After cancellation no further candidates are started and
    /// the remaining entries are marked cancelled.
    pub async fn compare_all(
        &self,
        query: Arc<DynamicImage>,
        candidates: &[CandidateRef],
        cancel: &CancelHandle,
    ) -> Result<BatchResult, CompareError> {
        ensure_non_empty(&query)?;

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut slots: Vec<Option<ComparisonResult>> = vec![None; candidates.len()];
        let mut handles = Vec::with_capacity(candidates.len());

        for (index, candidate) in candidates.iter().enumerate() {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let scorer = self.scorer.clone();
            let fetcher = self.fetcher.clone();
            let query = query.clone();
            let candidate = candidate.clone();
            let cancel = cancel.clone();

            let handle = tokio::spawn(async move {
                let _permit = permit;
                run_candidate(index, &candidate, &scorer, &fetcher, query, &cancel).await
            });
            handles.push((index, handle));
        }

        for (index, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => {
                    log::error!("Comparison task for candidate {} failed: {}", index, e);
                    ComparisonResult::failed(
                        index,
                        &candidates[index],
                        &CandidateError::Internal(e.to_string()),
                    )
                }
            };
            slots[index] = Some(result);
        }

        let results = slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.unwrap_or_else(|| {
                    ComparisonResult::failed(index, &candidates[index], &CandidateError::Cancelled)
                })
            })
            .collect();

        Ok(BatchResult { results })
    }
}

async fn run_candidate(
    index: usize,
    candidate: &CandidateRef,
    scorer: &Arc<SimilarityScorer>,
    fetcher: &CandidateFetcher,
    query: Arc<DynamicImage>,
    cancel: &CancelHandle,
) -> ComparisonResult {
    let started = Instant::now();

    let outcome = match fetch_and_compare(candidate, scorer, fetcher, query, cancel).await {
        Ok(scores) => Outcome::Scored(scores),
        Err(e) => {
            log::warn!("Candidate {} ({}) failed: {}", index, candidate, e);
            Outcome::Failed(Failure::from(&e))
        }
    };

    let elapsed_ms = started.elapsed().as_millis() as u64;
    log::debug!("Candidate {} ({}) finished in {}ms", index, candidate, elapsed_ms);

    ComparisonResult {
        index,
        candidate: candidate.to_string(),
        outcome,
        elapsed_ms,
    }
}

async fn fetch_and_compare(
    candidate: &CandidateRef,
    scorer: &Arc<SimilarityScorer>,
    fetcher: &CandidateFetcher,
    query: Arc<DynamicImage>,
    cancel: &CancelHandle,
) -> Result<Scores, CandidateError> {
    let image = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(CandidateError::Cancelled),
        image = fetcher.fetch(candidate) => image?,
    };

    let scorer = scorer.clone();
    tokio::task::spawn_blocking(move || scorer.compare(&query, &image))
        .await
        .map_err(|e| CandidateError::Internal(e.to_string()))
}
