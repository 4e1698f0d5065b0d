//! Trade Matcher - peer-to-peer card exchange matching engine
//!
//! Finds traders whose offers and wants complement a given trader's lists,
//! scores each pairing (including multi-card bundles) and stores the best
//! candidates without duplicating earlier runs.

pub mod bundles;
pub mod config;
pub mod error;
pub mod import;
pub mod models;
pub mod name_matching;
pub mod orchestrator;
pub mod persist;
pub mod scoring;
pub mod store;

pub use config::{MatchOptions, ProgressFn};
pub use error::{MatchError, Result, StoreError};
pub use models::{
    Collection, ConfidenceTier, Counterpart, Item, ListKind, MatchCandidate, ScoreBreakdown,
    StoredCandidate, Trader,
};
pub use orchestrator::{generate_matches, MatchReport, RunState};
pub use persist::PersistOutcome;
pub use store::{SqliteStore, TradeStore};
