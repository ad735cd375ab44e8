use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use statboard::importer::{ImportConfig, ImportService, StatRef};
use statboard::metrics::RankPoints;
use statboard::store::{FlushThresholds, ImportStore, PostgresImportStore};

/// Imports per-player stat snapshots and materializes leaderboard tables.
#[derive(Parser, Debug)]
#[command(name = "statboard", version)]
struct Args {
    /// Directory containing per-player <uuid>.json snapshot files
    #[arg(long)]
    stats_dir: PathBuf,

    /// Identity cache JSON (array of {name, id} records)
    #[arg(long)]
    identity_cache: Option<PathBuf>,

    /// Postgres connection string
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Inclusion threshold checked against the activity stat
    #[arg(long, default_value_t = 72_000)]
    min_activity: i64,

    /// Stat compared against the threshold, as section/key
    #[arg(long, default_value = "custom/play_time")]
    activity_stat: String,

    /// Player id to skip entirely (repeatable)
    #[arg(long = "exclude", value_name = "UUID")]
    exclude: Vec<String>,

    /// Flush the seen-id buffer after this many rows
    #[arg(long, default_value_t = 2000)]
    flush_seen: usize,

    /// Flush the profile buffer after this many rows
    #[arg(long, default_value_t = 2000)]
    flush_profiles: usize,

    /// Flush the changed-player batch after this many players
    #[arg(long, default_value_t = 800)]
    flush_changed: usize,

    /// Advisory lock name guarding concurrent runs
    #[arg(long, default_value = "statboard_import")]
    lock_name: String,

    /// Seconds to wait for the run lock before giving up
    #[arg(long, default_value_t = 5)]
    lock_timeout_secs: u64,

    /// Metric id used for the composite leaderboard
    #[arg(long, default_value = "champion")]
    champion_metric: String,

    /// Comma-separated points for ranks 1..N
    #[arg(long, default_value = "5,3,1")]
    rank_points: String,

    /// Disable the composite leaderboard recompute
    #[arg(long)]
    no_champion: bool,

    /// Cosmetic key suffix stripped during normalization (repeatable)
    #[arg(long = "cosmetic-suffix", default_values_t = [String::from("_wall_banner")])]
    cosmetic_suffix: Vec<String>,

    /// Parse and compute only; issue no persistent writes
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "statboard=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    std::process::exit(run(args).await);
}

async fn run(args: Args) -> i32 {
    let Some(database_url) = args.database_url.clone() else {
        error!("No database configured; pass --database-url or set DATABASE_URL");
        return 1;
    };

    let Some(activity_stat) = StatRef::parse(&args.activity_stat) else {
        error!(raw = %args.activity_stat, "Invalid --activity-stat; expected section/key");
        return 1;
    };

    let mut excluded = HashSet::new();
    for raw in &args.exclude {
        match Uuid::parse_str(raw.trim()) {
            Ok(player) => {
                excluded.insert(player);
            }
            Err(_) => warn!(%raw, "Invalid exclude id ignored"),
        }
    }

    let config = ImportConfig {
        stats_dir: args.stats_dir,
        identity_cache: args.identity_cache,
        min_activity: args.min_activity,
        activity_stat,
        excluded,
        cosmetic_suffixes: args.cosmetic_suffix,
        thresholds: FlushThresholds {
            seen: args.flush_seen,
            profiles: args.flush_profiles,
            changed: args.flush_changed,
        },
        lock_name: args.lock_name,
        lock_timeout: Duration::from_secs(args.lock_timeout_secs),
        champion_metric: args.champion_metric,
        rank_points: RankPoints::parse(&args.rank_points),
        champion_enabled: !args.no_champion,
        placeholder: Default::default(),
        dry_run: args.dry_run,
    };

    let pool = match PgPoolOptions::new()
        .max_connections(4)
        .connect(&database_url)
        .await
    {
        Ok(pool) => pool,
        Err(err) => {
            error!(error = %err, "Failed to connect to database");
            return 1;
        }
    };
    let store: Arc<dyn ImportStore> = Arc::new(PostgresImportStore::new(pool));

    let service = ImportService::new(store, config);
    match service.run().await {
        Ok(summary) => {
            info!(
                run_id = summary.run_id,
                processed = summary.processed,
                kept = summary.kept,
                changed = summary.changed,
                dry_run = summary.dry_run,
                "Import finished"
            );
            0
        }
        Err(err) => {
            error!(error = %err, "Import failed");
            err.exit_code()
        }
    }
}
