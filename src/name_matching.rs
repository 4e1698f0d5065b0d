//! Card name equivalence
//!
//! Two names denote the same tradable card when they are equal after
//! normalization (trim + lowercase) or when their edit-distance similarity
//! exceeds [`SIMILARITY_THRESHOLD`]. Equivalences between two collections are
//! computed once into a [`NameCache`] that belongs to a single counterpart
//! pairing and is passed by value through that pairing's processing.

use crate::models::Item;
use std::collections::{HashMap, HashSet};

/// Similarity must be strictly greater than this for a fuzzy match
pub const SIMILARITY_THRESHOLD: f64 = 0.75;

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Levenshtein distance over Unicode scalar values
pub fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// Similarity in [0, 1]: `(len(longer) - distance) / len(longer)`
pub fn similarity(a: &str, b: &str) -> f64 {
    let (longer, shorter) = if a.chars().count() >= b.chars().count() {
        (a, b)
    } else {
        (b, a)
    };
    let longer_len = longer.chars().count();
    if longer_len == 0 {
        return 1.0;
    }
    let distance = edit_distance(longer, shorter);
    (longer_len - distance) as f64 / longer_len as f64
}

/// Precomputed equivalences from source item ids to target item ids
#[derive(Debug, Clone, Default)]
pub struct NameCache {
    matches: HashMap<i64, HashSet<i64>>,
    matched_targets: HashSet<i64>,
}

impl NameCache {
    /// True when `target_id` is equivalent to at least one source
    pub fn is_target_matched(&self, target_id: i64) -> bool {
        self.matched_targets.contains(&target_id)
    }
}

/// Test every source item against every target item and record the equivalences
pub fn build_cache(source_items: &[Item], target_items: &[Item]) -> NameCache {
    let targets: Vec<(i64, String)> = target_items
        .iter()
        .map(|item| (item.id, normalize(&item.name)))
        .collect();

    let mut matches: HashMap<i64, HashSet<i64>> = HashMap::new();
    let mut matched_targets: HashSet<i64> = HashSet::new();
    for source in source_items {
        let source_name = normalize(&source.name);
        for (target_id, target_name) in &targets {
            if source_name == *target_name
                || similarity(&source_name, target_name) > SIMILARITY_THRESHOLD
            {
                matches.entry(source.id).or_default().insert(*target_id);
                matched_targets.insert(*target_id);
            }
        }
    }

    log::debug!(
        "Built name cache: {} of {} source items matched {} of {} targets",
        matches.len(),
        source_items.len(),
        matched_targets.len(),
        target_items.len()
    );

    NameCache {
        matches,
        matched_targets,
    }
}

/// O(1) lookup of a precomputed equivalence
pub fn is_equivalent(cache: &NameCache, source_id: i64, target_id: i64) -> bool {
    cache
        .matches
        .get(&source_id)
        .is_some_and(|targets| targets.contains(&target_id))
}
