//! Trade Matcher - card exchange matching CLI
//!
//! Imports traders and listings into SQLite, runs matching for one trader
//! and manages the stored candidates.

use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use trade_matcher::import::{check_owners, read_items, read_traders};
use trade_matcher::{generate_matches, MatchOptions, RunState, SqliteStore, TradeStore};

/// Card exchange matcher - finds and stores complementary trade candidates
#[derive(Parser, Debug)]
#[command(name = "trade_matcher")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the SQLite database file
    #[arg(short, long, default_value_t = default_db_path())]
    database: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load traders and item listings from CSV files
    Import {
        /// Traders CSV (id,display_name,trade_count,success_rate,reputation,value_tolerance)
        #[arg(long)]
        traders: PathBuf,
        /// Items CSV (id,owner_id,name,set_name,condition,price,list_kind)
        #[arg(long)]
        items: PathBuf,
    },
    /// Find, rank and store trade candidates for one trader
    Match(MatchArgs),
    /// Show stored candidates for one trader
    List {
        #[arg(long)]
        user: i64,
    },
    /// Delete a stored candidate
    Deny {
        #[arg(long)]
        id: String,
    },
}

#[derive(ClapArgs, Debug)]
struct MatchArgs {
    /// Trader to find matches for
    #[arg(long)]
    user: i64,

    /// Drop candidates whose sides differ by more than this amount
    #[arg(long, default_value_t = 500.0)]
    max_value_difference: f64,

    /// Drop candidates scoring below this
    #[arg(long, default_value_t = 50)]
    min_score: u8,

    /// Traders fetched per page
    #[arg(long, default_value_t = 50)]
    page_size: usize,

    /// Traders per concurrently processed chunk
    #[arg(long, default_value_t = 10)]
    chunk_size: usize,

    /// Keep at most this many ranked candidates
    #[arg(long, default_value_t = 50)]
    max_results: usize,

    /// Candidates written per database transaction
    #[arg(long, default_value_t = 50)]
    persist_batch_size: usize,

    /// Allowed bundle deviation as a fraction of the single item's price
    #[arg(long, default_value_t = 0.2)]
    bundle_tolerance: f64,

    /// Value tolerance used when your profile has none (fraction, 0-1]
    #[arg(long, default_value_t = 0.8)]
    default_value_tolerance: f64,

    /// Print candidates as JSON instead of a table
    #[arg(long, default_value_t = false)]
    json: bool,
}

impl MatchArgs {
    fn options(&self) -> MatchOptions {
        MatchOptions {
            max_value_difference: self.max_value_difference,
            min_match_score: self.min_score,
            page_size: self.page_size,
            chunk_size: self.chunk_size,
            max_results: self.max_results,
            persist_batch_size: self.persist_batch_size,
            bundle_tolerance: self.bundle_tolerance,
            default_value_tolerance: self.default_value_tolerance,
            on_progress: None,
        }
    }
}

/// Returns the default database path: ~/.local/share/trade_matcher/trades.db
fn default_db_path() -> String {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("trade_matcher")
        .join("trades.db")
        .to_string_lossy()
        .to_string()
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let db_path = PathBuf::from(&args.database);

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                log::error!("Failed to create database directory: {}", e);
                std::process::exit(1);
            }
            log::info!("Created directory: {}", parent.display());
        }
    }

    let store = match SqliteStore::open(&db_path) {
        Ok(store) => store,
        Err(e) => {
            log::error!("Failed to open database {}: {}", db_path.display(), e);
            std::process::exit(1);
        }
    };

    let code = match args.command {
        Command::Import { traders, items } => run_import(&store, &traders, &items),
        Command::Match(match_args) => run_match(&store, &match_args).await,
        Command::List { user } => run_list(&store, user).await,
        Command::Deny { id } => run_deny(&store, &id).await,
    };
    std::process::exit(code);
}

fn run_import(store: &SqliteStore, traders_csv: &Path, items_csv: &Path) -> i32 {
    let result = read_traders(traders_csv).and_then(|traders| {
        let items = read_items(items_csv)?;
        check_owners(&items, &traders)?;
        store.upsert_traders(&traders)?;
        store.upsert_items(&items)?;
        Ok((traders.len(), items.len()))
    });

    match result {
        Ok((traders, items)) => {
            log::info!("Imported {} traders and {} items", traders, items);
            0
        }
        Err(e) => {
            log::error!("Import failed: {}", e);
            1
        }
    }
}

async fn run_match(store: &SqliteStore, match_args: &MatchArgs) -> i32 {
    let cancel = CancellationToken::new();
    let watcher = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Ctrl-C received, stopping after the current page");
            watcher.cancel();
        }
    });

    let options = match_args
        .options()
        .with_progress(Arc::new(|percent: u8, status: &str| {
            eprintln!("[{:>3}%] {}", percent, status);
        }));
    let report = generate_matches(store, match_args.user, options, Some(cancel)).await;

    if match_args.json {
        match serde_json::to_string_pretty(&report.candidates) {
            Ok(json) => println!("{}", json),
            Err(e) => log::error!("Failed to encode candidates: {}", e),
        }
    } else {
        print_table(&report.candidates);
    }

    if report.counterparts_failed > 0 {
        log::warn!("{} traders were skipped after errors", report.counterparts_failed);
    }
    if let Some(e) = &report.persistence.error {
        log::error!(
            "Saving candidates stopped after {} rows: {}",
            report.persistence.written,
            e
        );
    }

    match (report.final_state, &report.error) {
        (RunState::Failed, Some(e)) => {
            log::error!("Matching failed: {}", e);
            1
        }
        (RunState::Cancelled, _) => 130,
        (_, Some(e)) => {
            log::warn!("Matching finished with partial results: {}", e);
            if report.persistence.is_complete() {
                0
            } else {
                2
            }
        }
        _ if !report.persistence.is_complete() => 2,
        _ => 0,
    }
}

fn print_table(candidates: &[trade_matcher::MatchCandidate]) {
    if candidates.is_empty() {
        println!("No trade candidates found.");
        return;
    }
    println!(
        "{:<6} {:<10} {:<8} {:<7} {:>10}  {:<20} {:<20}",
        "Score", "Tier", "Trader", "Bundle", "Diff", "You give", "You get"
    );
    for c in candidates {
        println!(
            "{:<6} {:<10} {:<8} {:<7} {:>10.2}  {:<20} {:<20}",
            c.overall_score,
            c.confidence_tier.as_str(),
            c.counterpart_id,
            if c.is_bundle { "yes" } else { "no" },
            c.value_difference,
            join_ids(&c.initiator_item_ids),
            join_ids(&c.counterpart_item_ids),
        );
    }
}

fn join_ids(ids: &[i64]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

async fn run_list(store: &SqliteStore, user: i64) -> i32 {
    match store.get_stored_candidates(user).await {
        Ok(stored) => {
            if stored.is_empty() {
                println!("No stored candidates for trader {}.", user);
            }
            for row in stored {
                println!(
                    "{}  trader {}  give [{}]  get [{}]",
                    row.id,
                    row.counterpart_id,
                    join_ids(&row.initiator_item_ids),
                    join_ids(&row.counterpart_item_ids)
                );
            }
            0
        }
        Err(e) => {
            log::error!("Failed to load candidates: {}", e);
            1
        }
    }
}

async fn run_deny(store: &SqliteStore, id: &str) -> i32 {
    match store.delete_candidate(id).await {
        Ok(true) => {
            log::info!("Deleted candidate {}", id);
            0
        }
        Ok(false) => {
            log::warn!("No candidate with id {}", id);
            1
        }
        Err(e) => {
            log::error!("Failed to delete candidate: {}", e);
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn match_flags_reach_the_options() {
        let args = Args::try_parse_from([
            "trade_matcher",
            "--database",
            "test.db",
            "match",
            "--user",
            "7",
            "--persist-batch-size",
            "5",
            "--bundle-tolerance",
            "0.1",
            "--default-value-tolerance",
            "0.6",
        ])
        .unwrap();

        let Command::Match(match_args) = args.command else {
            panic!("expected the match subcommand");
        };
        let options = match_args.options();
        assert_eq!(match_args.user, 7);
        assert_eq!(options.persist_batch_size, 5);
        assert_eq!(options.bundle_tolerance, 0.1);
        assert_eq!(options.default_value_tolerance, 0.6);
        assert_eq!(options.page_size, 50);
    }
}
