//! Error types for trade_matcher

use thiserror::Error;

/// Failure reported by a [`TradeStore`](crate::store::TradeStore) implementation
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database operation failed
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// A stored column could not be decoded
    #[error("Corrupt row: {0}")]
    CorruptRow(String),
    /// Requested record does not exist
    #[error("Not found: {0}")]
    NotFound(String),
    /// Store is unreachable or refused the request
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Unified error type for matching runs and the CLI around them
#[derive(Debug, Error)]
pub enum MatchError {
    /// The initiator's profile could not be loaded; the run is aborted
    #[error("Failed to fetch profile for trader {trader_id}: {source}")]
    ProfileFetch {
        trader_id: i64,
        #[source]
        source: StoreError,
    },
    /// The initiator's items could not be loaded; the run is aborted
    #[error("Failed to fetch items for trader {trader_id}: {source}")]
    ItemFetch {
        trader_id: i64,
        #[source]
        source: StoreError,
    },
    /// Counting or paging counterparts failed; paging stops, earlier pages are kept
    #[error("Failed to fetch counterparts after id {after_id}: {source}")]
    CounterpartPage {
        after_id: i64,
        #[source]
        source: StoreError,
    },
    /// One counterpart could not be evaluated; only that counterpart is skipped
    #[error("Failed to process counterpart {counterpart_id}: {reason}")]
    CandidateProcessing { counterpart_id: i64, reason: String },
    /// A write batch failed; remaining batches are not attempted
    #[error("Failed to persist batch {batch}: {source}")]
    Persistence {
        batch: usize,
        #[source]
        source: StoreError,
    },
    /// Reading stored candidates for duplicate detection failed
    #[error("Failed to load stored candidates: {0}")]
    StoredCandidates(#[source] StoreError),
    /// A chunk worker panicked or was aborted
    #[error("Chunk worker failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    /// The run was cancelled by the caller
    #[error("Matching run cancelled")]
    Cancelled,
    /// Store failure outside a matching run (import, list, deny)
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Imported rows are inconsistent with each other
    #[error("Invalid import: {0}")]
    InvalidImport(String),
    /// CSV import failed
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    /// File I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for MatchError {
    fn from(err: rusqlite::Error) -> Self {
        MatchError::Store(StoreError::Database(err))
    }
}

/// Result alias for trade_matcher operations
pub type Result<T> = std::result::Result<T, MatchError>;
