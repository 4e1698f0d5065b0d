//! Read/write contract between the matching engine and the persistent store

mod sqlite;

pub use sqlite::{init_schema, SqliteStore};

use crate::error::StoreError;
use crate::models::{Counterpart, Item, MatchCandidate, StoredCandidate, Trader};
use async_trait::async_trait;

/// Result type for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Everything the engine needs from the store that owns traders, items and candidates
#[async_trait]
pub trait TradeStore: Send + Sync + 'static {
    async fn get_trader_profile(&self, trader_id: i64) -> StoreResult<Trader>;

    async fn get_items_by_owner(&self, owner_id: i64) -> StoreResult<Vec<Item>>;

    /// Number of traders other than `exclude_id`
    async fn count_other_traders(&self, exclude_id: i64) -> StoreResult<u64>;

    /// Next page of traders (ordered by id, `id > after_id`) with their items embedded
    async fn page_other_traders(
        &self,
        exclude_id: i64,
        after_id: i64,
        page_size: usize,
    ) -> StoreResult<Vec<Counterpart>>;

    async fn get_stored_candidates(&self, initiator_id: i64) -> StoreResult<Vec<StoredCandidate>>;

    /// Write one batch; each call commits independently
    async fn insert_candidates(&self, batch: &[MatchCandidate]) -> StoreResult<()>;

    /// Remove a stored candidate, returning whether a row was deleted
    async fn delete_candidate(&self, candidate_id: &str) -> StoreResult<bool>;
}
