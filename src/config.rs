//! Tunables for a matching run

use crate::bundles::DEFAULT_BUNDLE_TOLERANCE;
use crate::models::DEFAULT_VALUE_TOLERANCE;
use crate::scoring::Thresholds;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;

/// Progress callback: percentage in [0, 100] and a human-readable status line
pub type ProgressFn = Arc<dyn Fn(u8, &str) + Send + Sync>;

/// Options for [`generate_matches`](crate::orchestrator::generate_matches)
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct MatchOptions {
    /// Candidates whose sides differ by more than this (absolute price) are dropped
    pub max_value_difference: f64,
    /// Candidates scoring below this are dropped
    pub min_match_score: u8,
    /// Counterparts fetched per page
    pub page_size: usize,
    /// Counterparts per concurrently processed chunk
    pub chunk_size: usize,
    /// Ranked candidates kept after aggregation
    pub max_results: usize,
    /// Rows per persistence batch
    pub persist_batch_size: usize,
    /// Bundle deviation band as a fraction of the anchor item's price
    pub bundle_tolerance: f64,
    /// Value tolerance used when the initiator's own is missing or outside (0, 1]
    pub default_value_tolerance: f64,
    #[serde(skip)]
    pub on_progress: Option<ProgressFn>,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            max_value_difference: 500.0,
            min_match_score: 50,
            page_size: 50,
            chunk_size: 10,
            max_results: 50,
            persist_batch_size: 50,
            bundle_tolerance: DEFAULT_BUNDLE_TOLERANCE,
            default_value_tolerance: DEFAULT_VALUE_TOLERANCE,
            on_progress: None,
        }
    }
}

impl fmt::Debug for MatchOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MatchOptions")
            .field("max_value_difference", &self.max_value_difference)
            .field("min_match_score", &self.min_match_score)
            .field("page_size", &self.page_size)
            .field("chunk_size", &self.chunk_size)
            .field("max_results", &self.max_results)
            .field("persist_batch_size", &self.persist_batch_size)
            .field("bundle_tolerance", &self.bundle_tolerance)
            .field("default_value_tolerance", &self.default_value_tolerance)
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

impl MatchOptions {
    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            min_match_score: self.min_match_score,
            max_value_difference: self.max_value_difference,
        }
    }

    pub fn with_progress(mut self, on_progress: ProgressFn) -> Self {
        self.on_progress = Some(on_progress);
        self
    }

    /// Zero sizes would stall paging or chunking; clamp them to 1
    pub(crate) fn normalized(mut self) -> Self {
        self.page_size = self.page_size.max(1);
        self.chunk_size = self.chunk_size.max(1);
        self.persist_batch_size = self.persist_batch_size.max(1);
        self
    }

    pub(crate) fn report(&self, percent: u8, status: &str) {
        log::debug!("[{:>3}%] {}", percent, status);
        if let Some(on_progress) = &self.on_progress {
            on_progress(percent, status);
        }
    }
}
