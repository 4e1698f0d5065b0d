//! SQLite-backed trade store
//!
//! Uses parameterized queries exclusively (no SQL string concatenation).
//! Every write call runs in its own transaction.

use super::{StoreResult, TradeStore};
use crate::error::StoreError;
use crate::models::{
    Collection, Counterpart, Item, ListKind, MatchCandidate, StoredCandidate, Trader,
    DEFAULT_VALUE_TOLERANCE,
};
use async_trait::async_trait;
use rusqlite::{params, Connection, Row};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Initialize the database schema
///
/// Creates tables if they don't exist:
/// - `traders`: trader profiles and reputation data
/// - `items`: offer and want listings, one owner each
/// - `match_candidates`: candidates written by matching runs
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS traders (
            id INTEGER PRIMARY KEY,
            display_name TEXT NOT NULL,
            trade_count INTEGER NOT NULL DEFAULT 0,
            success_rate REAL NOT NULL DEFAULT 0,
            reputation REAL NOT NULL DEFAULT 0,
            value_tolerance REAL NOT NULL DEFAULT 0.8
        );

        CREATE TABLE IF NOT EXISTS items (
            id INTEGER PRIMARY KEY,
            owner_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            set_name TEXT NOT NULL DEFAULT '',
            condition TEXT NOT NULL DEFAULT '',
            price REAL,
            list_kind TEXT NOT NULL CHECK (list_kind IN ('offer', 'want')),
            FOREIGN KEY (owner_id) REFERENCES traders(id)
        );

        CREATE INDEX IF NOT EXISTS idx_items_owner ON items(owner_id);

        -- Item id lists and the score breakdown are stored as JSON text
        CREATE TABLE IF NOT EXISTS match_candidates (
            id TEXT PRIMARY KEY,
            initiator_id INTEGER NOT NULL,
            counterpart_id INTEGER NOT NULL,
            initiator_item_ids TEXT NOT NULL,
            counterpart_item_ids TEXT NOT NULL,
            overall_score INTEGER NOT NULL,
            value_difference REAL NOT NULL,
            score_breakdown TEXT NOT NULL,
            is_bundle INTEGER NOT NULL,
            confidence_tier TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_candidates_initiator ON match_candidates(initiator_id);
        ",
    )?;

    log::info!("Database schema initialized");
    Ok(())
}

/// Trade store over a shared SQLite connection
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) a database file and initialize the schema
    pub fn open(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        log::info!("Opened database: {}", path.display());
        Self::from_connection(conn)
    }

    /// In-memory database, used by tests and dry runs
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    pub fn from_connection(conn: Connection) -> StoreResult<Self> {
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("connection lock poisoned".to_string()))
    }

    /// Insert or replace trader profiles, returning the number written
    pub fn upsert_traders(&self, traders: &[Trader]) -> StoreResult<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO traders
                 (id, display_name, trade_count, success_rate, reputation, value_tolerance)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for trader in traders {
                stmt.execute(params![
                    trader.id,
                    &trader.display_name,
                    trader.trade_count_total,
                    trader.success_rate_percent,
                    trader.reputation_rating,
                    trader.value_tolerance_fraction,
                ])?;
            }
        }
        tx.commit()?;

        log::info!("Upserted {} traders", traders.len());
        Ok(traders.len())
    }

    /// Insert or replace item listings, returning the number written
    pub fn upsert_items(&self, items: &[Item]) -> StoreResult<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO items
                 (id, owner_id, name, set_name, condition, price, list_kind)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for item in items {
                stmt.execute(params![
                    item.id,
                    item.owner_id,
                    &item.name,
                    &item.set_name,
                    &item.condition,
                    item.unit_price,
                    item.list_kind.as_str(),
                ])?;
            }
        }
        tx.commit()?;

        log::info!("Upserted {} items", items.len());
        Ok(items.len())
    }

    /// Number of stored candidates for an initiator
    pub fn candidate_count(&self, initiator_id: i64) -> StoreResult<i64> {
        let conn = self.lock()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM match_candidates WHERE initiator_id = ?1",
            params![initiator_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

fn trader_from_row(row: &Row<'_>) -> rusqlite::Result<Trader> {
    Ok(Trader {
        id: row.get(0)?,
        display_name: row.get(1)?,
        trade_count_total: row.get(2)?,
        success_rate_percent: row.get(3)?,
        reputation_rating: row.get(4)?,
        value_tolerance_fraction: row
            .get::<_, Option<f64>>(5)?
            .unwrap_or(DEFAULT_VALUE_TOLERANCE),
    })
}

fn item_from_row(row: &Row<'_>) -> rusqlite::Result<Item> {
    let kind: String = row.get(6)?;
    let list_kind = ListKind::parse(&kind).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            6,
            rusqlite::types::Type::Text,
            format!("unknown list kind: {}", kind).into(),
        )
    })?;
    Ok(Item {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        name: row.get(2)?,
        set_name: row.get(3)?,
        condition: row.get(4)?,
        unit_price: row.get::<_, Option<f64>>(5)?.unwrap_or(0.0),
        list_kind,
    })
}

fn parse_id_list(raw: &str) -> StoreResult<Vec<i64>> {
    serde_json::from_str(raw)
        .map_err(|e| StoreError::CorruptRow(format!("bad item id list {:?}: {}", raw, e)))
}

fn to_json<T: serde::Serialize>(value: &T) -> StoreResult<String> {
    serde_json::to_string(value).map_err(|e| StoreError::CorruptRow(e.to_string()))
}

const TRADER_COLUMNS: &str =
    "id, display_name, trade_count, success_rate, reputation, value_tolerance";

#[async_trait]
impl TradeStore for SqliteStore {
    async fn get_trader_profile(&self, trader_id: i64) -> StoreResult<Trader> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM traders WHERE id = ?1",
            TRADER_COLUMNS
        ))?;
        let mut rows = stmt.query(params![trader_id])?;
        match rows.next()? {
            Some(row) => Ok(trader_from_row(row)?),
            None => Err(StoreError::NotFound(format!("trader {}", trader_id))),
        }
    }

    async fn get_items_by_owner(&self, owner_id: i64) -> StoreResult<Vec<Item>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            "SELECT id, owner_id, name, set_name, condition, price, list_kind
             FROM items WHERE owner_id = ?1 ORDER BY id",
        )?;
        let items: rusqlite::Result<Vec<Item>> =
            stmt.query_map(params![owner_id], item_from_row)?.collect();
        Ok(items?)
    }

    async fn count_other_traders(&self, exclude_id: i64) -> StoreResult<u64> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM traders WHERE id != ?1",
            params![exclude_id],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    async fn page_other_traders(
        &self,
        exclude_id: i64,
        after_id: i64,
        page_size: usize,
    ) -> StoreResult<Vec<Counterpart>> {
        let conn = self.lock()?;
        let limit = page_size as i64;

        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM traders WHERE id != ?1 AND id > ?2 ORDER BY id LIMIT ?3",
            TRADER_COLUMNS
        ))?;
        let traders: rusqlite::Result<Vec<Trader>> = stmt
            .query_map(params![exclude_id, after_id, limit], trader_from_row)?
            .collect();
        let traders = traders?;
        if traders.is_empty() {
            return Ok(Vec::new());
        }

        let mut stmt = conn.prepare_cached(
            "SELECT id, owner_id, name, set_name, condition, price, list_kind
             FROM items
             WHERE owner_id IN (
                 SELECT id FROM traders WHERE id != ?1 AND id > ?2 ORDER BY id LIMIT ?3
             )
             ORDER BY owner_id, id",
        )?;
        let mut by_owner: HashMap<i64, Vec<Item>> = HashMap::new();
        for item in stmt.query_map(params![exclude_id, after_id, limit], item_from_row)? {
            let item = item?;
            by_owner.entry(item.owner_id).or_default().push(item);
        }

        Ok(traders
            .into_iter()
            .map(|trader| {
                let items = by_owner.remove(&trader.id).unwrap_or_default();
                Counterpart {
                    trader,
                    collection: Collection::from_items(items),
                }
            })
            .collect())
    }

    async fn get_stored_candidates(&self, initiator_id: i64) -> StoreResult<Vec<StoredCandidate>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            "SELECT id, initiator_id, counterpart_id, initiator_item_ids, counterpart_item_ids
             FROM match_candidates WHERE initiator_id = ?1
             ORDER BY created_at, id",
        )?;
        let rows: rusqlite::Result<Vec<(String, i64, i64, String, String)>> = stmt
            .query_map(params![initiator_id], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
            })?
            .collect();

        rows?
            .into_iter()
            .map(|(id, initiator_id, counterpart_id, mine, theirs)| {
                Ok(StoredCandidate {
                    id,
                    initiator_id,
                    counterpart_id,
                    initiator_item_ids: parse_id_list(&mine)?,
                    counterpart_item_ids: parse_id_list(&theirs)?,
                })
            })
            .collect()
    }

    async fn insert_candidates(&self, batch: &[MatchCandidate]) -> StoreResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO match_candidates
                 (id, initiator_id, counterpart_id, initiator_item_ids, counterpart_item_ids,
                  overall_score, value_difference, score_breakdown, is_bundle,
                  confidence_tier, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            )?;
            for candidate in batch {
                stmt.execute(params![
                    candidate.id.to_string(),
                    candidate.initiator_id,
                    candidate.counterpart_id,
                    to_json(&candidate.initiator_item_ids)?,
                    to_json(&candidate.counterpart_item_ids)?,
                    candidate.overall_score,
                    candidate.value_difference,
                    to_json(&candidate.score_breakdown)?,
                    candidate.is_bundle,
                    candidate.confidence_tier.as_str(),
                    candidate.status.as_str(),
                    candidate.created_at.to_rfc3339(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    async fn delete_candidate(&self, candidate_id: &str) -> StoreResult<bool> {
        let conn = self.lock()?;
        let deleted = conn.execute(
            "DELETE FROM match_candidates WHERE id = ?1",
            params![candidate_id],
        )?;
        Ok(deleted > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_support::{make_item, make_trader};
    use crate::models::{CandidateStatus, ConfidenceTier, ScoreBreakdown};

    fn seeded_store() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .upsert_traders(&[make_trader(1), make_trader(2), make_trader(3)])
            .unwrap();
        store
            .upsert_items(&[
                make_item(10, 1, "Charizard", 10.0, ListKind::Offer),
                make_item(11, 1, "Blastoise", 0.0, ListKind::Want),
                make_item(20, 2, "Blastoise", 10.0, ListKind::Offer),
                make_item(21, 2, "Charizard", 0.0, ListKind::Want),
                make_item(30, 3, "Mew", 25.0, ListKind::Offer),
            ])
            .unwrap();
        store
    }

    fn candidate(
        initiator: i64,
        counterpart: i64,
        mine: Vec<i64>,
        theirs: Vec<i64>,
    ) -> MatchCandidate {
        MatchCandidate {
            id: uuid::Uuid::new_v4(),
            initiator_id: initiator,
            counterpart_id: counterpart,
            initiator_item_ids: mine,
            counterpart_item_ids: theirs,
            overall_score: 90,
            value_difference: 0.0,
            score_breakdown: ScoreBreakdown {
                value_score: 100.0,
                condition_score: 100.0,
                rarity_score: 85.0,
                reputation_score: 70.0,
                overall_score: 90,
            },
            is_bundle: false,
            confidence_tier: ConfidenceTier::High,
            status: CandidateStatus::Pending,
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn init_schema_creates_tables() {
        let store = SqliteStore::open_in_memory().unwrap();
        let conn = store.lock().unwrap();
        for table in ["traders", "items", "match_candidates"] {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    params![table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "missing table {}", table);
        }
    }

    #[test]
    fn init_schema_is_idempotent() {
        let store = SqliteStore::open_in_memory().unwrap();
        let conn = store.lock().unwrap();
        init_schema(&conn).unwrap();
    }

    #[tokio::test]
    async fn profile_lookup_and_missing_trader() {
        let store = seeded_store();
        let trader = store.get_trader_profile(2).await.unwrap();
        assert_eq!(trader.display_name, "trader-2");
        assert_eq!(trader.value_tolerance_fraction, DEFAULT_VALUE_TOLERANCE);

        match store.get_trader_profile(99).await {
            Err(StoreError::NotFound(what)) => assert_eq!(what, "trader 99"),
            other => panic!("expected NotFound, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn items_by_owner_keep_list_kinds() {
        let store = seeded_store();
        let items = store.get_items_by_owner(1).await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].list_kind, ListKind::Offer);
        assert_eq!(items[1].list_kind, ListKind::Want);
        assert_eq!(items[1].unit_price, 0.0);
    }

    #[tokio::test]
    async fn paging_excludes_initiator_and_follows_cursor() {
        let store = seeded_store();
        assert_eq!(store.count_other_traders(1).await.unwrap(), 2);

        let page = store.page_other_traders(1, 0, 1).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].trader.id, 2);
        assert_eq!(page[0].collection.offers.len(), 1);
        assert_eq!(page[0].collection.wants.len(), 1);

        let page = store.page_other_traders(1, 2, 1).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].trader.id, 3);
        assert!(page[0].collection.wants.is_empty());

        assert!(store.page_other_traders(1, 3, 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn candidates_round_trip_through_lite_view() {
        let store = seeded_store();
        store
            .insert_candidates(&[candidate(1, 2, vec![10], vec![20])])
            .await
            .unwrap();

        let stored = store.get_stored_candidates(1).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].counterpart_id, 2);
        assert_eq!(stored[0].initiator_item_ids, vec![10]);
        assert_eq!(stored[0].counterpart_item_ids, vec![20]);
        assert!(store.get_stored_candidates(2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_batch_writes_nothing() {
        let store = seeded_store();
        let first = candidate(1, 2, vec![10], vec![20]);
        let mut clash = candidate(1, 3, vec![10], vec![30]);
        clash.id = first.id;

        let result = store.insert_candidates(&[first, clash]).await;
        assert!(result.is_err());
        assert_eq!(store.candidate_count(1).unwrap(), 0);
    }

    #[tokio::test]
    async fn delete_candidate_reports_whether_row_existed() {
        let store = seeded_store();
        let row = candidate(1, 2, vec![10], vec![20]);
        let id = row.id.to_string();
        store.insert_candidates(&[row]).await.unwrap();

        assert!(store.delete_candidate(&id).await.unwrap());
        assert!(!store.delete_candidate(&id).await.unwrap());
        assert_eq!(store.candidate_count(1).unwrap(), 0);
    }
}
