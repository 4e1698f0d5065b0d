//! Core records read from the store and match candidates produced by the engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which of its owner's lists an item sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListKind {
    /// Available to trade away
    Offer,
    /// Sought from other traders
    Want,
}

impl ListKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListKind::Offer => "offer",
            ListKind::Want => "want",
        }
    }

    /// Parse a stored or imported list kind ("offer", "want", case-insensitive)
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "offer" | "offers" | "have" => Some(ListKind::Offer),
            "want" | "wants" => Some(ListKind::Want),
            _ => None,
        }
    }
}

/// A single card listing owned by one trader
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: i64,
    pub owner_id: i64,
    pub name: String,
    pub set_name: String,
    pub condition: String,
    /// Non-negative unit price; unknown prices are stored as 0
    pub unit_price: f64,
    pub list_kind: ListKind,
}

/// Parse a price string, treating empty, negative or unparseable values as 0
pub fn parse_price(raw: &str) -> f64 {
    match raw.trim().trim_start_matches('$').parse::<f64>() {
        Ok(price) if price.is_finite() && price > 0.0 => price,
        _ => 0.0,
    }
}

/// Default minimum smaller/larger price ratio for a fully value-compatible pairing
pub const DEFAULT_VALUE_TOLERANCE: f64 = 0.8;

/// Trader profile as read from the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trader {
    pub id: i64,
    pub display_name: String,
    pub trade_count_total: u32,
    pub success_rate_percent: f64,
    pub reputation_rating: f64,
    pub value_tolerance_fraction: f64,
}

impl Trader {
    /// Value tolerance as a percentage (0.8 -> 80.0); `fallback` replaces a fraction outside (0, 1]
    pub fn tolerance_percent_or(&self, fallback: f64) -> f64 {
        let fraction = self.value_tolerance_fraction;
        if fraction.is_finite() && fraction > 0.0 && fraction <= 1.0 {
            fraction * 100.0
        } else {
            fallback * 100.0
        }
    }
}

/// A trader's two lists, split by list kind
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Collection {
    pub offers: Vec<Item>,
    pub wants: Vec<Item>,
}

impl Collection {
    /// Split a flat list of items into offers and wants
    pub fn from_items(items: Vec<Item>) -> Self {
        let (offers, wants) = items
            .into_iter()
            .partition(|item| item.list_kind == ListKind::Offer);
        Self { offers, wants }
    }

    /// True when either list is empty, so no trade is possible
    pub fn is_incomplete(&self) -> bool {
        self.offers.is_empty() || self.wants.is_empty()
    }
}

/// A counterpart as delivered by a page query: the profile with its items embedded
#[derive(Debug, Clone, PartialEq)]
pub struct Counterpart {
    pub trader: Trader,
    pub collection: Collection,
}

/// Coarse bucketing of the overall score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceTier {
    High,
    Medium,
    Low,
}

impl ConfidenceTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceTier::High => "high",
            ConfidenceTier::Medium => "medium",
            ConfidenceTier::Low => "low",
        }
    }
}

/// Candidate status; the engine only ever creates pending rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateStatus {
    Pending,
}

impl CandidateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateStatus::Pending => "pending",
        }
    }
}

/// Per-factor scores, each in [0, 100]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub value_score: f64,
    pub condition_score: f64,
    pub rarity_score: f64,
    pub reputation_score: f64,
    pub overall_score: u8,
}

/// A proposed trade between the initiator and one counterpart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCandidate {
    pub id: uuid::Uuid,
    pub initiator_id: i64,
    pub counterpart_id: i64,
    pub initiator_item_ids: Vec<i64>,
    pub counterpart_item_ids: Vec<i64>,
    pub overall_score: u8,
    pub value_difference: f64,
    pub score_breakdown: ScoreBreakdown,
    pub is_bundle: bool,
    pub confidence_tier: ConfidenceTier,
    pub status: CandidateStatus,
    pub created_at: DateTime<Utc>,
}

/// The subset of a stored candidate needed for duplicate detection
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredCandidate {
    pub id: String,
    pub initiator_id: i64,
    pub counterpart_id: i64,
    pub initiator_item_ids: Vec<i64>,
    pub counterpart_item_ids: Vec<i64>,
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn make_item(id: i64, owner_id: i64, name: &str, price: f64, kind: ListKind) -> Item {
        Item {
            id,
            owner_id,
            name: name.to_string(),
            set_name: "Jungle".to_string(),
            condition: "Near Mint".to_string(),
            unit_price: price,
            list_kind: kind,
        }
    }

    pub fn make_trader(id: i64) -> Trader {
        Trader {
            id,
            display_name: format!("trader-{}", id),
            trade_count_total: 0,
            success_rate_percent: 0.0,
            reputation_rating: 0.0,
            value_tolerance_fraction: DEFAULT_VALUE_TOLERANCE,
        }
    }
}
