//! Duplicate filtering and batched persistence of match candidates
//!
//! A candidate duplicates a stored one when both involve the same
//! (initiator, counterpart) pair and carry the same item-id sets, compared as
//! unordered sets and in either side orientation.

use crate::error::MatchError;
use crate::models::{MatchCandidate, StoredCandidate};
use crate::store::TradeStore;
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;

/// What happened to one persistence call
#[derive(Debug, Default)]
pub struct PersistOutcome {
    /// Candidates handed to the persister
    pub submitted: usize,
    /// Candidates dropped as already stored
    pub duplicates: usize,
    /// Rows written by committed batches
    pub written: usize,
    /// Batches committed before stopping
    pub batches_committed: usize,
    /// Why persistence stopped early, if it did
    pub error: Option<MatchError>,
}

impl PersistOutcome {
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }
}

/// Sorted, comma-joined item ids so set equality becomes string equality
pub fn canonical_side(ids: &[i64]) -> String {
    let mut sorted = ids.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    sorted
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

type DedupKey = (i64, i64, String, String);

fn key_of(initiator: i64, counterpart: i64, side_a: &[i64], side_b: &[i64]) -> DedupKey {
    (
        initiator,
        counterpart,
        canonical_side(side_a),
        canonical_side(side_b),
    )
}

/// Index of stored candidates, holding both side orientations of each row
#[derive(Debug, Default)]
pub struct SeenCandidates {
    keys: HashSet<DedupKey>,
}

impl SeenCandidates {
    pub fn from_stored(stored: &[StoredCandidate]) -> Self {
        let mut seen = Self::default();
        for row in stored {
            seen.insert(
                row.initiator_id,
                row.counterpart_id,
                &row.initiator_item_ids,
                &row.counterpart_item_ids,
            );
        }
        seen
    }

    fn insert(&mut self, initiator: i64, counterpart: i64, side_a: &[i64], side_b: &[i64]) {
        self.keys
            .insert(key_of(initiator, counterpart, side_a, side_b));
        self.keys
            .insert(key_of(initiator, counterpart, side_b, side_a));
    }

    pub fn contains(&self, candidate: &MatchCandidate) -> bool {
        self.keys.contains(&key_of(
            candidate.initiator_id,
            candidate.counterpart_id,
            &candidate.initiator_item_ids,
            &candidate.counterpart_item_ids,
        ))
    }

    /// Record the candidate; returns false when it was already present
    pub fn admit(&mut self, candidate: &MatchCandidate) -> bool {
        if self.contains(candidate) {
            return false;
        }
        self.insert(
            candidate.initiator_id,
            candidate.counterpart_id,
            &candidate.initiator_item_ids,
            &candidate.counterpart_item_ids,
        );
        true
    }
}

/// Candidates not already present in `stored`, in their original order
pub fn filter_new<'a>(
    candidates: &'a [MatchCandidate],
    stored: &[StoredCandidate],
) -> Vec<&'a MatchCandidate> {
    let mut seen = SeenCandidates::from_stored(stored);
    candidates.iter().filter(|c| seen.admit(c)).collect()
}

/// Write the novel candidates for `initiator_id` in batches of `batch_size`
///
/// Each batch commits on its own. The first failing batch stops the call;
/// batches already committed stay written.
pub async fn persist_candidates<S: TradeStore + ?Sized>(
    store: &S,
    initiator_id: i64,
    candidates: &[MatchCandidate],
    batch_size: usize,
    cancel: Option<&CancellationToken>,
) -> PersistOutcome {
    let mut outcome = PersistOutcome {
        submitted: candidates.len(),
        ..Default::default()
    };
    if candidates.is_empty() {
        return outcome;
    }

    let stored = match store.get_stored_candidates(initiator_id).await {
        Ok(stored) => stored,
        Err(e) => {
            log::error!("Failed to load stored candidates for {}: {}", initiator_id, e);
            outcome.error = Some(MatchError::StoredCandidates(e));
            return outcome;
        }
    };

    let fresh: Vec<MatchCandidate> = filter_new(candidates, &stored)
        .into_iter()
        .cloned()
        .collect();
    outcome.duplicates = candidates.len() - fresh.len();
    log::info!(
        "{} new candidates, {} already stored",
        fresh.len(),
        outcome.duplicates
    );
    if fresh.is_empty() {
        return outcome;
    }

    for (index, batch) in fresh.chunks(batch_size.max(1)).enumerate() {
        if cancel.is_some_and(|token| token.is_cancelled()) {
            log::warn!("Persistence cancelled before batch {}", index);
            outcome.error = Some(MatchError::Cancelled);
            break;
        }
        match store.insert_candidates(batch).await {
            Ok(()) => {
                outcome.batches_committed += 1;
                outcome.written += batch.len();
                log::debug!("Committed batch {} ({} rows)", index, batch.len());
            }
            Err(e) => {
                log::error!(
                    "Batch {} failed, {} rows left unwritten: {}",
                    index,
                    fresh.len() - outcome.written,
                    e
                );
                outcome.error = Some(MatchError::Persistence {
                    batch: index,
                    source: e,
                });
                break;
            }
        }
    }

    outcome
}
