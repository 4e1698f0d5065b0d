//! Multi-item bundle search
//!
//! Finds groups of 2 to 4 items whose combined price lands within a tolerance
//! band around a target price, so one card can be traded for several.

use crate::models::Item;
use std::collections::HashMap;

/// Smallest bundle worth proposing
pub const MIN_BUNDLE_SIZE: usize = 2;
/// Largest bundle we enumerate
pub const MAX_BUNDLE_SIZE: usize = 4;
/// Default deviation band as a fraction of the target value
pub const DEFAULT_BUNDLE_TOLERANCE: f64 = 0.2;

// Absorbs float noise when sums land exactly on a band edge
const EPSILON: f64 = 1e-9;

/// All 2-4 item subsets whose total is non-zero and within `target * tolerance` of `target`
///
/// Each branch extends strictly forward through the input, so every subset is
/// produced at most once, in input order.
pub fn find_combinations<'a>(
    items: &[&'a Item],
    target_value: f64,
    tolerance: f64,
) -> Vec<Vec<&'a Item>> {
    let mut found = Vec::new();
    if target_value <= 0.0 || items.len() < MIN_BUNDLE_SIZE {
        return found;
    }

    let band = target_value * tolerance;
    let mut current: Vec<&'a Item> = Vec::with_capacity(MAX_BUNDLE_SIZE);
    extend(items, 0, &mut current, 0.0, target_value, band, &mut found);
    found
}

fn extend<'a>(
    items: &[&'a Item],
    start: usize,
    current: &mut Vec<&'a Item>,
    total: f64,
    target: f64,
    band: f64,
    found: &mut Vec<Vec<&'a Item>>,
) {
    if current.len() >= MIN_BUNDLE_SIZE && total > 0.0 && (total - target).abs() <= band + EPSILON
    {
        found.push(current.clone());
    }
    if current.len() == MAX_BUNDLE_SIZE {
        return;
    }

    for (offset, &item) in items[start..].iter().enumerate() {
        let next_total = total + item.unit_price;
        if next_total > target + band + EPSILON {
            continue;
        }
        current.push(item);
        extend(items, start + offset + 1, current, next_total, target, band, found);
        current.pop();
    }
}

/// Combined unit price of a bundle
pub fn bundle_value(items: &[&Item]) -> f64 {
    items.iter().map(|item| item.unit_price).sum()
}

/// Desirability of a bundle: smaller bundles and shared sets score higher, within [60, 100]
pub fn bundle_synergy_score(items: &[&Item]) -> f64 {
    if items.is_empty() {
        return 60.0;
    }

    let mut set_counts: HashMap<String, usize> = HashMap::new();
    for item in items {
        *set_counts
            .entry(item.set_name.trim().to_lowercase())
            .or_default() += 1;
    }
    let shared = items
        .iter()
        .filter(|item| set_counts[&item.set_name.trim().to_lowercase()] > 1)
        .count();

    let score = 100.0 - 5.0 * (items.len() - 1) as f64 + 5.0 * shared as f64;
    score.clamp(60.0, 100.0)
}
