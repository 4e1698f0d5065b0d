//! CSV import of traders and item listings into the store

use crate::error::{MatchError, Result};
use crate::models::{parse_price, Item, ListKind, Trader, DEFAULT_VALUE_TOLERANCE};
use serde::Deserialize;
use std::path::Path;

/// One row of a traders CSV export
#[derive(Debug, Deserialize)]
struct TraderRow {
    id: i64,
    display_name: String,
    #[serde(default)]
    trade_count: Option<u32>,
    #[serde(default)]
    success_rate: Option<f64>,
    #[serde(default)]
    reputation: Option<f64>,
    #[serde(default)]
    value_tolerance: Option<f64>,
}

/// One row of an items CSV export; price stays raw so bad values can fall back to 0
#[derive(Debug, Deserialize)]
struct ItemRow {
    id: i64,
    owner_id: i64,
    name: String,
    #[serde(default)]
    set_name: String,
    #[serde(default)]
    condition: String,
    #[serde(default)]
    price: String,
    list_kind: String,
}

fn reader(path: &Path) -> Result<csv::Reader<std::fs::File>> {
    Ok(csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)?)
}

/// Read trader profiles; a missing value tolerance defaults to 0.8
pub fn read_traders(path: &Path) -> Result<Vec<Trader>> {
    let mut rdr = reader(path)?;
    let mut traders = Vec::new();

    for result in rdr.deserialize() {
        let row: TraderRow = result?;
        let tolerance = row
            .value_tolerance
            .filter(|t| t.is_finite() && *t > 0.0 && *t <= 1.0)
            .unwrap_or(DEFAULT_VALUE_TOLERANCE);
        traders.push(Trader {
            id: row.id,
            display_name: row.display_name,
            trade_count_total: row.trade_count.unwrap_or(0),
            success_rate_percent: row.success_rate.unwrap_or(0.0),
            reputation_rating: row.reputation.unwrap_or(0.0),
            value_tolerance_fraction: tolerance,
        });
    }

    log::info!("Read {} traders from {}", traders.len(), path.display());
    Ok(traders)
}

/// Read item listings; rows with an unknown list kind are skipped with a warning
pub fn read_items(path: &Path) -> Result<Vec<Item>> {
    let mut rdr = reader(path)?;
    let mut items = Vec::new();

    for result in rdr.deserialize() {
        let row: ItemRow = result?;
        let Some(list_kind) = ListKind::parse(&row.list_kind) else {
            log::warn!(
                "Skipping item {}: unknown list kind {:?}",
                row.id,
                row.list_kind
            );
            continue;
        };
        if row.name.trim().is_empty() {
            log::warn!("Skipping item {}: empty name", row.id);
            continue;
        }
        items.push(Item {
            id: row.id,
            owner_id: row.owner_id,
            name: row.name,
            set_name: row.set_name,
            condition: row.condition,
            unit_price: parse_price(&row.price),
            list_kind,
        });
    }

    log::info!("Read {} items from {}", items.len(), path.display());
    Ok(items)
}

/// Items whose owner is not among `traders`
pub fn orphaned_items<'a>(items: &'a [Item], traders: &[Trader]) -> Vec<&'a Item> {
    items
        .iter()
        .filter(|item| !traders.iter().any(|t| t.id == item.owner_id))
        .collect()
}

/// Reject an import whose items reference unknown traders
pub fn check_owners(items: &[Item], traders: &[Trader]) -> Result<()> {
    let orphans = orphaned_items(items, traders);
    if let Some(first) = orphans.first() {
        return Err(MatchError::InvalidImport(format!(
            "{} items reference unknown traders (first: item {} owned by {})",
            orphans.len(),
            first.id,
            first.owner_id
        )));
    }
    Ok(())
}
