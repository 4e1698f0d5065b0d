//! Compatibility scoring
//!
//! All functions are pure. Factor scores are `f64` in [0, 100]; the weighted
//! overall score is rounded to an integer percentage.

use crate::models::{ConfidenceTier, Item, ScoreBreakdown, Trader};

const VALUE_WEIGHT: f64 = 0.30;
const CONDITION_WEIGHT: f64 = 0.25;
const RARITY_WEIGHT: f64 = 0.25;
const REPUTATION_WEIGHT: f64 = 0.20;

/// Score used when either side has no usable price
pub const NEUTRAL_VALUE_SCORE: f64 = 50.0;

/// Rank assumed for conditions we do not recognize
const UNKNOWN_CONDITION_RANK: i32 = 3;

const HIGH_DEMAND_NAMES: &[&str] = &[
    "charizard",
    "pikachu",
    "blastoise",
    "venusaur",
    "mewtwo",
    "mew",
    "lugia",
    "ho-oh",
    "rayquaza",
    "umbreon",
    "espeon",
    "gengar",
    "eevee",
    "gyarados",
    "dragonite",
];

const VALUABLE_SETS: &[&str] = &[
    "base set",
    "base",
    "jungle",
    "fossil",
    "team rocket",
    "gym heroes",
    "gym challenge",
    "neo genesis",
    "neo discovery",
    "neo revelation",
    "neo destiny",
    "skyridge",
    "aquapolis",
    "expedition",
];

const SPECIAL_RARITY_TOKENS: &[&str] = &[
    "ex", "gx", "v", "vmax", "vstar", "break", "prime", "lv.x",
];

const FOIL_TOKENS: &[&str] = &[
    "holo",
    "holographic",
    "reverse",
    "secret",
    "rainbow",
    "gold",
    "shiny",
];

/// Ordinal rank of a condition label, 6 = Mint down to 1 = Damaged
pub fn condition_rank(condition: &str) -> i32 {
    match condition.trim().to_lowercase().as_str() {
        "mint" | "m" | "gem mint" => 6,
        "near mint" | "nm" | "nm-m" => 5,
        "excellent" | "ex" | "lightly played" | "lp" => 4,
        "good" | "gd" | "moderately played" | "mp" => 3,
        "played" | "pl" | "heavily played" | "hp" => 2,
        "poor" | "po" | "damaged" | "dmg" => 1,
        _ => UNKNOWN_CONDITION_RANK,
    }
}

/// Value compatibility of two prices under a tolerance given in percent (e.g. 80)
pub fn value_score(price_a: f64, price_b: f64, tolerance: f64) -> f64 {
    if price_a <= 0.0 || price_b <= 0.0 {
        return NEUTRAL_VALUE_SCORE;
    }

    let ratio_pct = 100.0 * price_a.min(price_b) / price_a.max(price_b);
    let band_floor = tolerance - 30.0;

    if ratio_pct >= tolerance {
        100.0
    } else if ratio_pct >= band_floor {
        70.0 + (ratio_pct - band_floor) / 30.0 * 30.0
    } else {
        (ratio_pct / band_floor * 70.0).max(30.0)
    }
}

/// Condition compatibility by rank distance
pub fn condition_score(condition_a: &str, condition_b: &str) -> f64 {
    let diff = (condition_rank(condition_a) - condition_rank(condition_b)).abs();
    match diff {
        0 => 100.0,
        1 => 85.0,
        2 => 70.0,
        _ => (70.0 - (diff - 2) as f64 * 15.0).max(50.0),
    }
}

fn name_tokens(name: &str) -> Vec<String> {
    name.to_lowercase()
        .split(|c: char| c.is_whitespace() || c == '-' || c == '(' || c == ')' || c == ',')
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Demand/rarity estimate from the card and set names
pub fn rarity_score(name: &str, set_name: &str) -> f64 {
    let lower = name.to_lowercase();
    let tokens = name_tokens(name);
    let set = set_name.trim().to_lowercase();
    let mut score: f64 = 60.0;

    if HIGH_DEMAND_NAMES.iter().any(|k| lower.contains(k)) {
        score += 25.0;
    }
    if VALUABLE_SETS.iter().any(|s| set == *s) {
        score += 15.0;
    }
    if tokens
        .iter()
        .any(|t| SPECIAL_RARITY_TOKENS.contains(&t.as_str()))
    {
        score += 20.0;
    }
    if tokens.iter().any(|t| FOIL_TOKENS.contains(&t.as_str())) {
        score += 10.0;
    }

    score.min(100.0)
}

/// Counterpart reliability from trade history and rating
pub fn reputation_score(trader: Option<&Trader>) -> f64 {
    let Some(trader) = trader else {
        return 70.0;
    };
    let mut score: f64 = 70.0;

    score += match trader.trade_count_total {
        n if n > 50 => 20.0,
        n if n > 20 => 15.0,
        n if n > 10 => 10.0,
        n if n > 5 => 5.0,
        _ => 0.0,
    };

    let rate = trader.success_rate_percent;
    score += if rate > 95.0 {
        15.0
    } else if rate > 90.0 {
        12.0
    } else if rate > 80.0 {
        8.0
    } else if rate > 70.0 {
        5.0
    } else {
        0.0
    };

    let rating = trader.reputation_rating;
    score += if rating > 4.8 {
        10.0
    } else if rating > 4.5 {
        8.0
    } else if rating > 4.0 {
        5.0
    } else {
        0.0
    };

    score.min(100.0)
}

/// Weighted combination of the four factors, rounded and clamped to [0, 100]
pub fn overall_score(value: f64, condition: f64, rarity: f64, reputation: f64) -> u8 {
    let weighted = VALUE_WEIGHT * value
        + CONDITION_WEIGHT * condition
        + RARITY_WEIGHT * rarity
        + REPUTATION_WEIGHT * reputation;
    weighted.round().clamp(0.0, 100.0) as u8
}

pub fn confidence_tier(score: u8) -> ConfidenceTier {
    if score >= 80 {
        ConfidenceTier::High
    } else if score >= 65 {
        ConfidenceTier::Medium
    } else {
        ConfidenceTier::Low
    }
}

/// Acceptance thresholds applied to every candidate
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    pub min_match_score: u8,
    pub max_value_difference: f64,
}

impl Thresholds {
    pub fn accepts(&self, overall: u8, value_difference: f64) -> bool {
        overall >= self.min_match_score && value_difference.abs() <= self.max_value_difference
    }
}

fn breakdown(value: f64, condition: f64, rarity: f64, reputation: f64) -> ScoreBreakdown {
    ScoreBreakdown {
        value_score: value,
        condition_score: condition,
        rarity_score: rarity,
        reputation_score: reputation,
        overall_score: overall_score(value, condition, rarity, reputation),
    }
}

/// Score a one-for-one pairing; `tolerance` is the initiator's value tolerance in percent
pub fn score_single(
    mine: &Item,
    theirs: &Item,
    tolerance: f64,
    counterpart: &Trader,
) -> ScoreBreakdown {
    let value = value_score(mine.unit_price, theirs.unit_price, tolerance);
    let condition = condition_score(&mine.condition, &theirs.condition);
    let rarity = (rarity_score(&mine.name, &mine.set_name)
        + rarity_score(&theirs.name, &theirs.set_name))
        / 2.0;
    let reputation = reputation_score(Some(counterpart));
    breakdown(value, condition, rarity, reputation)
}

/// Score one fixed item against a bundle of several items on the other side
pub fn score_bundle(
    single: &Item,
    bundle: &[&Item],
    synergy: f64,
    tolerance: f64,
    counterpart: &Trader,
) -> ScoreBreakdown {
    let bundle_value: f64 = bundle.iter().map(|item| item.unit_price).sum();
    let value = value_score(single.unit_price, bundle_value, tolerance);
    let condition = if bundle.is_empty() {
        0.0
    } else {
        bundle
            .iter()
            .map(|item| condition_score(&single.condition, &item.condition))
            .sum::<f64>()
            / bundle.len() as f64
    };
    let reputation = reputation_score(Some(counterpart));
    breakdown(value, condition, synergy, reputation)
}
