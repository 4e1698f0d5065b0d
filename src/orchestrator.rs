//! Matching run orchestration
//!
//! A run walks `Init -> FetchingProfile -> FetchingOwnItems -> PagingCounterparts
//! -> Aggregating -> Done`, with `Failed` reachable from the fetch states and
//! `Cancelled` when the caller's token fires. Counterparts are paged by id
//! cursor; each page is split into chunks that are evaluated concurrently on
//! the blocking pool and joined before the next page is requested.

use crate::bundles::{bundle_synergy_score, bundle_value, find_combinations};
use crate::config::MatchOptions;
use crate::error::MatchError;
use crate::models::{
    CandidateStatus, Collection, Counterpart, Item, MatchCandidate, ScoreBreakdown, Trader,
};
use crate::name_matching::{build_cache, NameCache};
use crate::persist::{persist_candidates, PersistOutcome};
use crate::scoring::{confidence_tier, score_bundle, score_single, Thresholds};
use crate::store::TradeStore;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Progress reported once the initiator's own items are loaded
pub const PROGRESS_ITEMS_LOADED: u8 = 10;
/// Progress reported once every counterpart page has been processed
pub const PROGRESS_PAGING_DONE: u8 = 90;

/// Where a run is, or where it stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Init,
    FetchingProfile,
    FetchingOwnItems,
    PagingCounterparts,
    Aggregating,
    Done,
    Failed,
    Cancelled,
}

/// Everything a caller learns from one run
#[derive(Debug)]
pub struct MatchReport {
    /// Ranked, truncated candidates generated by this run (not only the persisted delta)
    pub candidates: Vec<MatchCandidate>,
    pub final_state: RunState,
    /// Last status line reported
    pub status: String,
    /// Computation failure: aborted fetch, stopped paging or cancellation
    pub error: Option<MatchError>,
    /// Persistence result, kept apart from computation failures
    pub persistence: PersistOutcome,
    /// Counterparts evaluated, including skipped ones
    pub counterparts_seen: u64,
    /// Counterparts skipped because their evaluation failed
    pub counterparts_failed: usize,
}

impl MatchReport {
    fn finished(state: RunState, status: String, error: Option<MatchError>) -> Self {
        Self {
            candidates: Vec::new(),
            final_state: state,
            status,
            error,
            persistence: PersistOutcome::default(),
            counterparts_seen: 0,
            counterparts_failed: 0,
        }
    }
}

/// Read-only inputs shared by every chunk of a run
struct RunContext {
    initiator_id: i64,
    own: Collection,
    thresholds: Thresholds,
    bundle_tolerance: f64,
    /// Initiator's value tolerance in percent
    value_tolerance: f64,
    started_at: DateTime<Utc>,
}

/// Result of one chunk worker
#[derive(Default)]
struct ChunkOutcome {
    candidates: Vec<MatchCandidate>,
    failed: usize,
}

/// Monotonic progress reporter interpolating between the paging bounds
struct Progress<'a> {
    options: &'a MatchOptions,
    last: u8,
    status: String,
}

impl<'a> Progress<'a> {
    fn new(options: &'a MatchOptions) -> Self {
        Self {
            options,
            last: 0,
            status: String::new(),
        }
    }

    fn report(&mut self, percent: u8, status: impl Into<String>) {
        self.last = self.last.max(percent.min(100));
        self.status = status.into();
        self.options.report(self.last, &self.status);
    }

    fn paging(&mut self, processed: u64, total: u64, status: impl Into<String>) {
        let span = (PROGRESS_PAGING_DONE - PROGRESS_ITEMS_LOADED) as f64;
        let fraction = if total == 0 {
            1.0
        } else {
            (processed as f64 / total as f64).min(1.0)
        };
        let percent = PROGRESS_ITEMS_LOADED as f64 + span * fraction;
        self.report(percent.floor() as u8, status);
    }
}

/// Find, rank and persist trade candidates for `initiator_id`
///
/// The returned report always carries the generated candidates, even when
/// persistence failed part-way.
pub async fn generate_matches<S: TradeStore + ?Sized>(
    store: &S,
    initiator_id: i64,
    options: MatchOptions,
    cancel: Option<CancellationToken>,
) -> MatchReport {
    let options = options.normalized();
    let mut progress = Progress::new(&options);
    let mut state = RunState::Init;
    log::debug!("Run for trader {} in state {:?}", initiator_id, state);

    state = transition(state, RunState::FetchingProfile);
    progress.report(0, "Loading your profile...");
    let profile = match store.get_trader_profile(initiator_id).await {
        Ok(profile) => profile,
        Err(e) => {
            let error = MatchError::ProfileFetch {
                trader_id: initiator_id,
                source: e,
            };
            log::error!("{}", error);
            return MatchReport::finished(RunState::Failed, error.to_string(), Some(error));
        }
    };

    state = transition(state, RunState::FetchingOwnItems);
    let own = match store.get_items_by_owner(initiator_id).await {
        Ok(items) => Collection::from_items(items),
        Err(e) => {
            let error = MatchError::ItemFetch {
                trader_id: initiator_id,
                source: e,
            };
            log::error!("{}", error);
            return MatchReport::finished(RunState::Failed, error.to_string(), Some(error));
        }
    };

    if own.is_incomplete() {
        let status = format!(
            "{} needs at least one offer and one want to find matches ({} offers, {} wants)",
            profile.display_name,
            own.offers.len(),
            own.wants.len()
        );
        transition(state, RunState::Done);
        progress.report(100, status.clone());
        return MatchReport::finished(RunState::Done, status, None);
    }
    progress.report(
        PROGRESS_ITEMS_LOADED,
        format!(
            "Loaded {} offers and {} wants, looking for traders...",
            own.offers.len(),
            own.wants.len()
        ),
    );

    let context = Arc::new(RunContext {
        initiator_id,
        own,
        thresholds: options.thresholds(),
        bundle_tolerance: options.bundle_tolerance,
        value_tolerance: profile.tolerance_percent_or(options.default_value_tolerance),
        started_at: Utc::now(),
    });

    state = transition(state, RunState::PagingCounterparts);
    let mut collected: Vec<MatchCandidate> = Vec::new();
    let mut run_error: Option<MatchError> = None;
    let mut seen: u64 = 0;
    let mut failed: usize = 0;

    match store.count_other_traders(initiator_id).await {
        Err(e) => {
            let error = MatchError::CounterpartPage {
                after_id: 0,
                source: e,
            };
            log::error!("{}", error);
            run_error = Some(error);
        }
        Ok(total) => {
            log::info!("{} other traders to evaluate", total);
            let mut after_id = 0;
            loop {
                if cancel.as_ref().is_some_and(|token| token.is_cancelled()) {
                    log::warn!("Run cancelled after {} counterparts", seen);
                    run_error = Some(MatchError::Cancelled);
                    break;
                }

                let page = match store
                    .page_other_traders(initiator_id, after_id, options.page_size)
                    .await
                {
                    Ok(page) => page,
                    Err(e) => {
                        let error = MatchError::CounterpartPage {
                            after_id,
                            source: e,
                        };
                        log::error!("{}; keeping {} candidates", error, collected.len());
                        run_error = Some(error);
                        break;
                    }
                };
                let Some(last) = page.last() else {
                    break;
                };
                after_id = last.trader.id;
                let page_len = page.len() as u64;
                log::debug!("Fetched page of {} traders up to id {}", page_len, after_id);

                let outcome = process_page(&context, page, options.chunk_size).await;
                collected.extend(outcome.candidates);
                failed += outcome.failed;
                seen += page_len;

                progress.paging(
                    seen,
                    total,
                    format!(
                        "Checked {} of {} traders, {} candidates so far",
                        seen,
                        total.max(seen),
                        collected.len()
                    ),
                );
            }
        }
    }

    state = transition(state, RunState::Aggregating);
    progress.report(PROGRESS_PAGING_DONE, "Ranking candidates...");
    let candidates = rank_candidates(collected, options.max_results);

    let cancelled = matches!(run_error, Some(MatchError::Cancelled));
    let persistence = if cancelled {
        PersistOutcome {
            submitted: candidates.len(),
            ..Default::default()
        }
    } else {
        persist_candidates(
            store,
            initiator_id,
            &candidates,
            options.persist_batch_size,
            cancel.as_ref(),
        )
        .await
    };

    // a token that fires while saving still ends the run as cancelled
    let cancelled = cancelled || matches!(persistence.error, Some(MatchError::Cancelled));
    if cancelled && run_error.is_none() {
        run_error = Some(MatchError::Cancelled);
    }
    let final_state = if cancelled {
        RunState::Cancelled
    } else {
        RunState::Done
    };
    transition(state, final_state);

    let mut status = if candidates.is_empty() {
        "No trade candidates found".to_string()
    } else {
        format!("Found {} trade candidates", candidates.len())
    };
    if let Some(error) = &persistence.error {
        status.push_str(&format!(
            " ({} saved, saving stopped: {})",
            persistence.written, error
        ));
    }
    progress.report(100, status.clone());

    MatchReport {
        candidates,
        final_state,
        status,
        error: run_error,
        persistence,
        counterparts_seen: seen,
        counterparts_failed: failed,
    }
}

fn transition(from: RunState, to: RunState) -> RunState {
    log::debug!("Matching run: {:?} -> {:?}", from, to);
    to
}

/// Split a page into chunks, evaluate them concurrently and wait for all of them
async fn process_page(
    context: &Arc<RunContext>,
    page: Vec<Counterpart>,
    chunk_size: usize,
) -> ChunkOutcome {
    let mut workers = JoinSet::new();
    let mut pending = page.into_iter().peekable();
    while pending.peek().is_some() {
        let chunk: Vec<Counterpart> = pending.by_ref().take(chunk_size).collect();
        let context = Arc::clone(context);
        workers.spawn_blocking(move || {
            panic::catch_unwind(AssertUnwindSafe(|| process_chunk(&context, &chunk)))
                .unwrap_or_else(|_| {
                    log::error!("Chunk of {} counterparts panicked, skipping it", chunk.len());
                    ChunkOutcome {
                        candidates: Vec::new(),
                        failed: chunk.len(),
                    }
                })
        });
    }

    let mut merged = ChunkOutcome::default();
    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(outcome) => {
                merged.candidates.extend(outcome.candidates);
                merged.failed += outcome.failed;
            }
            Err(e) => log::error!("{}", MatchError::Join(e)),
        }
    }
    merged
}

fn process_chunk(context: &RunContext, chunk: &[Counterpart]) -> ChunkOutcome {
    let mut outcome = ChunkOutcome::default();
    for counterpart in chunk {
        match match_counterpart(context, counterpart) {
            Ok(candidates) => outcome.candidates.extend(candidates),
            Err(e) => {
                log::warn!("Skipping counterpart: {}", e);
                outcome.failed += 1;
            }
        }
    }
    outcome
}

fn check_items(counterpart: &Counterpart) -> Result<(), MatchError> {
    let owner = counterpart.trader.id;
    let all = counterpart
        .collection
        .offers
        .iter()
        .chain(counterpart.collection.wants.iter());
    for item in all {
        if item.owner_id != owner {
            return Err(MatchError::CandidateProcessing {
                counterpart_id: owner,
                reason: format!("item {} belongs to trader {}", item.id, item.owner_id),
            });
        }
        if !item.unit_price.is_finite() || item.unit_price < 0.0 {
            return Err(MatchError::CandidateProcessing {
                counterpart_id: owner,
                reason: format!("item {} has invalid price {}", item.id, item.unit_price),
            });
        }
    }
    Ok(())
}

/// All accepted candidates between the initiator and one counterpart
///
/// Both name caches are built here and dropped when this returns.
fn match_counterpart(
    context: &RunContext,
    counterpart: &Counterpart,
) -> Result<Vec<MatchCandidate>, MatchError> {
    let theirs = &counterpart.collection;
    if theirs.is_incomplete() {
        return Ok(Vec::new());
    }
    check_items(counterpart)?;

    let mine = &context.own;
    // my wants -> their offers, their wants -> my offers
    let wanted_by_me: NameCache = build_cache(&mine.wants, &theirs.offers);
    let wanted_by_them: NameCache = build_cache(&theirs.wants, &mine.offers);

    let their_wanted_offers: Vec<&Item> = theirs
        .offers
        .iter()
        .filter(|item| wanted_by_me.is_target_matched(item.id))
        .collect();
    let my_wanted_offers: Vec<&Item> = mine
        .offers
        .iter()
        .filter(|item| wanted_by_them.is_target_matched(item.id))
        .collect();
    if their_wanted_offers.is_empty() || my_wanted_offers.is_empty() {
        return Ok(Vec::new());
    }

    let trader = &counterpart.trader;
    let mut candidates = Vec::new();

    for my_item in &my_wanted_offers {
        for their_item in &their_wanted_offers {
            let breakdown = score_single(my_item, their_item, context.value_tolerance, trader);
            let difference = (my_item.unit_price - their_item.unit_price).abs();
            if context.thresholds.accepts(breakdown.overall_score, difference) {
                candidates.push(build_candidate(
                    context,
                    trader.id,
                    vec![my_item.id],
                    vec![their_item.id],
                    breakdown,
                    difference,
                ));
            }
        }
    }

    // one of mine for several of theirs
    for my_item in &my_wanted_offers {
        for bundle in find_combinations(
            &their_wanted_offers,
            my_item.unit_price,
            context.bundle_tolerance,
        ) {
            if let Some(candidate) = bundle_candidate(context, trader, my_item, &bundle, true) {
                candidates.push(candidate);
            }
        }
    }

    // one of theirs for several of mine
    for their_item in &their_wanted_offers {
        for bundle in find_combinations(
            &my_wanted_offers,
            their_item.unit_price,
            context.bundle_tolerance,
        ) {
            if let Some(candidate) = bundle_candidate(context, trader, their_item, &bundle, false)
            {
                candidates.push(candidate);
            }
        }
    }

    log::debug!(
        "Trader {}: {} candidates from {} wanted offers",
        trader.id,
        candidates.len(),
        their_wanted_offers.len()
    );
    Ok(candidates)
}

fn bundle_candidate(
    context: &RunContext,
    trader: &Trader,
    single: &Item,
    bundle: &[&Item],
    single_is_mine: bool,
) -> Option<MatchCandidate> {
    let synergy = bundle_synergy_score(bundle);
    let breakdown = score_bundle(single, bundle, synergy, context.value_tolerance, trader);
    let difference = (single.unit_price - bundle_value(bundle)).abs();
    if !context
        .thresholds
        .accepts(breakdown.overall_score, difference)
    {
        return None;
    }

    let bundle_ids: Vec<i64> = bundle.iter().map(|item| item.id).collect();
    let (mine, theirs) = if single_is_mine {
        (vec![single.id], bundle_ids)
    } else {
        (bundle_ids, vec![single.id])
    };
    Some(build_candidate(
        context, trader.id, mine, theirs, breakdown, difference,
    ))
}

fn build_candidate(
    context: &RunContext,
    counterpart_id: i64,
    mut initiator_item_ids: Vec<i64>,
    mut counterpart_item_ids: Vec<i64>,
    breakdown: ScoreBreakdown,
    value_difference: f64,
) -> MatchCandidate {
    initiator_item_ids.sort_unstable();
    counterpart_item_ids.sort_unstable();
    let is_bundle = initiator_item_ids.len() > 1 || counterpart_item_ids.len() > 1;
    MatchCandidate {
        id: uuid::Uuid::new_v4(),
        initiator_id: context.initiator_id,
        counterpart_id,
        initiator_item_ids,
        counterpart_item_ids,
        overall_score: breakdown.overall_score,
        value_difference,
        score_breakdown: breakdown,
        is_bundle,
        confidence_tier: confidence_tier(breakdown.overall_score),
        status: CandidateStatus::Pending,
        created_at: context.started_at,
    }
}

/// Score descending, then counterpart id, then counterpart and initiator item ids
pub fn compare_candidates(a: &MatchCandidate, b: &MatchCandidate) -> Ordering {
    b.overall_score
        .cmp(&a.overall_score)
        .then_with(|| a.counterpart_id.cmp(&b.counterpart_id))
        .then_with(|| a.counterpart_item_ids.cmp(&b.counterpart_item_ids))
        .then_with(|| a.initiator_item_ids.cmp(&b.initiator_item_ids))
}

/// Deterministically rank and keep the top `max_results`
pub fn rank_candidates(
    mut candidates: Vec<MatchCandidate>,
    max_results: usize,
) -> Vec<MatchCandidate> {
    candidates.sort_by(compare_candidates);
    let mut kept: HashSet<(i64, Vec<i64>, Vec<i64>)> = HashSet::new();
    candidates.retain(|c| {
        kept.insert((
            c.counterpart_id,
            c.initiator_item_ids.clone(),
            c.counterpart_item_ids.clone(),
        ))
    });
    candidates.truncate(max_results);
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_support::{make_item, make_trader};
    use crate::models::ListKind;

    fn context(own: Collection) -> RunContext {
        RunContext {
            initiator_id: 1,
            own,
            thresholds: MatchOptions::default().thresholds(),
            bundle_tolerance: 0.2,
            value_tolerance: 80.0,
            started_at: Utc::now(),
        }
    }

    fn counterpart(id: i64, items: Vec<Item>) -> Counterpart {
        Counterpart {
            trader: make_trader(id),
            collection: Collection::from_items(items),
        }
    }

    #[test]
    fn complementary_single_items_match() {
        let ctx = context(Collection::from_items(vec![
            make_item(1, 1, "Charizard", 10.0, ListKind::Offer),
            make_item(2, 1, "Blastoise", 0.0, ListKind::Want),
        ]));
        let other = counterpart(
            2,
            vec![
                make_item(3, 2, "Blastoise", 10.0, ListKind::Offer),
                make_item(4, 2, "Charizard", 0.0, ListKind::Want),
            ],
        );

        let candidates = match_counterpart(&ctx, &other).unwrap();
        assert_eq!(candidates.len(), 1);
        let c = &candidates[0];
        assert_eq!(c.initiator_item_ids, vec![1]);
        assert_eq!(c.counterpart_item_ids, vec![3]);
        assert!(!c.is_bundle);
        assert_eq!(c.value_difference, 0.0);
    }

    #[test]
    fn one_sided_interest_is_not_a_match() {
        let ctx = context(Collection::from_items(vec![
            make_item(1, 1, "Charizard", 10.0, ListKind::Offer),
            make_item(2, 1, "Blastoise", 0.0, ListKind::Want),
        ]));
        let other = counterpart(
            2,
            vec![
                make_item(3, 2, "Blastoise", 10.0, ListKind::Offer),
                make_item(4, 2, "Venusaur", 0.0, ListKind::Want),
            ],
        );
        assert!(match_counterpart(&ctx, &other).unwrap().is_empty());
    }

    #[test]
    fn counterpart_without_wants_is_skipped_quietly() {
        let ctx = context(Collection::from_items(vec![
            make_item(1, 1, "Charizard", 10.0, ListKind::Offer),
            make_item(2, 1, "Blastoise", 0.0, ListKind::Want),
        ]));
        let other = counterpart(2, vec![make_item(3, 2, "Blastoise", 10.0, ListKind::Offer)]);
        assert!(match_counterpart(&ctx, &other).unwrap().is_empty());
    }

    #[test]
    fn foreign_items_fail_only_that_counterpart() {
        let ctx = context(Collection::from_items(vec![
            make_item(1, 1, "Charizard", 10.0, ListKind::Offer),
            make_item(2, 1, "Blastoise", 0.0, ListKind::Want),
        ]));
        let broken = counterpart(
            2,
            vec![
                make_item(3, 9, "Blastoise", 10.0, ListKind::Offer),
                make_item(4, 2, "Charizard", 0.0, ListKind::Want),
            ],
        );
        let healthy = counterpart(
            3,
            vec![
                make_item(5, 3, "Blastoise", 10.0, ListKind::Offer),
                make_item(6, 3, "Charizard", 0.0, ListKind::Want),
            ],
        );

        assert!(matches!(
            match_counterpart(&ctx, &broken),
            Err(MatchError::CandidateProcessing {
                counterpart_id: 2,
                ..
            })
        ));

        let outcome = process_chunk(&ctx, &[broken, healthy]);
        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.candidates.len(), 1);
        assert_eq!(outcome.candidates[0].counterpart_id, 3);
    }

    #[test]
    fn bundles_are_found_in_both_directions() {
        // my 30 for their 9 + 10 + 11, and their 20 for my 8 + 12
        let ctx = context(Collection::from_items(vec![
            make_item(1, 1, "Gengar", 30.0, ListKind::Offer),
            make_item(2, 1, "Abra", 8.0, ListKind::Offer),
            make_item(3, 1, "Kadabra", 12.0, ListKind::Offer),
            make_item(4, 1, "Oddish", 0.0, ListKind::Want),
            make_item(5, 1, "Gloom", 0.0, ListKind::Want),
            make_item(6, 1, "Vileplume", 0.0, ListKind::Want),
            make_item(7, 1, "Lapras", 0.0, ListKind::Want),
        ]));
        let other = counterpart(
            2,
            vec![
                make_item(10, 2, "Oddish", 9.0, ListKind::Offer),
                make_item(11, 2, "Gloom", 10.0, ListKind::Offer),
                make_item(12, 2, "Vileplume", 11.0, ListKind::Offer),
                make_item(13, 2, "Lapras", 20.0, ListKind::Offer),
                make_item(14, 2, "Gengar", 0.0, ListKind::Want),
                make_item(15, 2, "Abra", 0.0, ListKind::Want),
                make_item(16, 2, "Kadabra", 0.0, ListKind::Want),
            ],
        );

        let candidates = match_counterpart(&ctx, &other).unwrap();
        let bundles: Vec<&MatchCandidate> = candidates.iter().filter(|c| c.is_bundle).collect();

        assert!(bundles.iter().any(
            |c| c.initiator_item_ids == vec![1] && c.counterpart_item_ids == vec![10, 11, 12]
        ));
        assert!(bundles
            .iter()
            .any(|c| c.initiator_item_ids == vec![2, 3] && c.counterpart_item_ids == vec![13]));
        for c in &bundles {
            assert!(c.initiator_item_ids.len() == 1 || c.counterpart_item_ids.len() == 1);
            assert!(c.initiator_item_ids.len() <= 4 && c.counterpart_item_ids.len() <= 4);
        }
    }

    #[test]
    fn ranking_is_deterministic_on_ties() {
        let ctx = context(Collection::default());
        let breakdown = ScoreBreakdown {
            value_score: 100.0,
            condition_score: 100.0,
            rarity_score: 60.0,
            reputation_score: 70.0,
            overall_score: 85,
        };
        let mut better = breakdown;
        better.overall_score = 90;

        let candidates = vec![
            build_candidate(&ctx, 5, vec![1], vec![50], breakdown, 0.0),
            build_candidate(&ctx, 3, vec![1], vec![31], breakdown, 0.0),
            build_candidate(&ctx, 3, vec![1], vec![30], breakdown, 0.0),
            build_candidate(&ctx, 9, vec![1], vec![90], better, 0.0),
        ];
        let ranked = rank_candidates(candidates, 3);

        let order: Vec<(i64, Vec<i64>)> = ranked
            .iter()
            .map(|c| (c.counterpart_id, c.counterpart_item_ids.clone()))
            .collect();
        assert_eq!(order, vec![(9, vec![90]), (3, vec![30]), (3, vec![31])]);
    }

    #[test]
    fn progress_is_monotonic_and_bounded() {
        let options = MatchOptions::default();
        let mut progress = Progress::new(&options);
        progress.report(PROGRESS_ITEMS_LOADED, "loaded");
        progress.paging(5, 10, "half");
        assert_eq!(progress.last, 50);
        progress.paging(3, 10, "stale");
        assert_eq!(progress.last, 50);
        progress.paging(20, 10, "more than counted");
        assert_eq!(progress.last, PROGRESS_PAGING_DONE);
    }
}
