use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;
use uuid::Uuid;

use statboard::identity::NameSource;
use statboard::importer::{ImportConfig, ImportService};
use statboard::metrics::{MetricDef, MetricSource};
use statboard::shared::ImportError;
use statboard::store::{CleanupCounts, ImportStore, InMemoryImportStore};

const BLOCKS_MINED: &str = "blocks_mined";
const CHAMPION: &str = "champion";

fn player_a() -> Uuid {
    Uuid::parse_str("aaaaaaaa-1111-4111-8111-111111111111").unwrap()
}

fn player_b() -> Uuid {
    Uuid::parse_str("bbbbbbbb-2222-4222-8222-222222222222").unwrap()
}

fn player_c() -> Uuid {
    Uuid::parse_str("cccccccc-3333-4333-8333-333333333333").unwrap()
}

fn write_snapshot(dir: &Path, player: Uuid, stats: serde_json::Value) {
    let payload = json!({ "stats": stats });
    fs::write(
        dir.join(format!("{player}.json")),
        serde_json::to_vec(&payload).unwrap(),
    )
    .unwrap();
}

fn seeded_store() -> Arc<InMemoryImportStore> {
    let store = InMemoryImportStore::new();
    store.define_metric(MetricDef::enabled(BLOCKS_MINED, "Blocks mined", 1));
    store.add_metric_source(MetricSource {
        metric_id: BLOCKS_MINED.to_string(),
        section: "mined".to_string(),
        key: "stone".to_string(),
        weight: 1,
    });
    Arc::new(store)
}

fn test_config(dir: &Path) -> ImportConfig {
    ImportConfig {
        stats_dir: dir.to_path_buf(),
        min_activity: 0,
        ..Default::default()
    }
}

fn service(store: &Arc<InMemoryImportStore>, config: ImportConfig) -> ImportService {
    ImportService::new(store.clone(), config)
}

#[tokio::test]
async fn single_metric_two_players_awards_champion_points() {
    let dir = TempDir::new().unwrap();
    write_snapshot(dir.path(), player_a(), json!({ "mined": { "stone": 10 } }));
    write_snapshot(dir.path(), player_b(), json!({ "mined": { "stone": 5 } }));

    let store = seeded_store();
    let summary = service(&store, test_config(dir.path())).run().await.unwrap();

    assert_eq!(summary.processed, 2);
    assert_eq!(summary.kept, 2);
    assert_eq!(summary.changed, 2);

    assert_eq!(store.metric_value(1, BLOCKS_MINED, player_a()), Some(10));
    assert_eq!(store.metric_value(1, BLOCKS_MINED, player_b()), Some(5));

    // Rank 1 and rank 2; no third player, so no rank-3 award.
    assert_eq!(store.metric_value(1, CHAMPION, player_a()), Some(5));
    assert_eq!(store.metric_value(1, CHAMPION, player_b()), Some(3));
    assert_eq!(summary.champion.unwrap().players_awarded, 2);
}

#[tokio::test]
async fn unchanged_rerun_skips_stats_and_metric_writes() {
    let dir = TempDir::new().unwrap();
    write_snapshot(dir.path(), player_a(), json!({ "mined": { "stone": 10 } }));
    write_snapshot(dir.path(), player_b(), json!({ "mined": { "stone": 5 } }));

    let store = seeded_store();
    let first = service(&store, test_config(dir.path())).run().await.unwrap();
    let stats_written_after_first = store.stats_rows_written();

    let second = service(&store, test_config(dir.path())).run().await.unwrap();

    assert_eq!(second.processed, first.processed);
    assert_eq!(second.kept, first.kept);
    assert_eq!(second.changed, 0);
    // Hash-skip: no snapshot rewrites on the second pass.
    assert_eq!(store.stats_rows_written(), stats_written_after_first);
    assert_eq!(store.metric_value(1, BLOCKS_MINED, player_a()), Some(10));
    // Profiles are still refreshed every pass for last-seen freshness.
    assert_eq!(store.profile_flushes(), 2);
}

#[tokio::test]
async fn changed_value_is_rewritten_on_rerun() {
    let dir = TempDir::new().unwrap();
    write_snapshot(dir.path(), player_a(), json!({ "mined": { "stone": 10 } }));

    let store = seeded_store();
    service(&store, test_config(dir.path())).run().await.unwrap();

    write_snapshot(dir.path(), player_a(), json!({ "mined": { "stone": 12 } }));
    let second = service(&store, test_config(dir.path())).run().await.unwrap();

    assert_eq!(second.changed, 1);
    assert_eq!(store.metric_value(1, BLOCKS_MINED, player_a()), Some(12));
}

#[tokio::test]
async fn removed_player_is_fully_cleaned_up() {
    let dir = TempDir::new().unwrap();
    write_snapshot(dir.path(), player_a(), json!({ "mined": { "stone": 10 } }));
    write_snapshot(dir.path(), player_b(), json!({ "mined": { "stone": 5 } }));

    let store = seeded_store();
    service(&store, test_config(dir.path())).run().await.unwrap();

    fs::remove_file(dir.path().join(format!("{}.json", player_b()))).unwrap();
    let second = service(&store, test_config(dir.path())).run().await.unwrap();

    // blocks_mined + champion rows both count toward the metric cleanup.
    assert_eq!(
        second.cleanup,
        Some(CleanupCounts {
            profiles: 1,
            stats: 1,
            metric_values: 2
        })
    );
    assert!(store.profile(1, player_b()).is_none());
    assert!(store.stats_row(1, player_b()).is_none());
    assert_eq!(store.metric_value(1, BLOCKS_MINED, player_b()), None);
    assert_eq!(store.metric_value(1, CHAMPION, player_b()), None);

    assert!(store.profile(1, player_a()).is_some());
    assert_eq!(store.metric_value(1, CHAMPION, player_a()), Some(5));
}

#[tokio::test]
async fn players_below_threshold_are_cleaned_up() {
    let dir = TempDir::new().unwrap();
    write_snapshot(
        dir.path(),
        player_a(),
        json!({ "custom": { "play_time": 50 }, "mined": { "stone": 10 } }),
    );

    let store = seeded_store();
    service(&store, test_config(dir.path())).run().await.unwrap();
    assert!(store.profile(1, player_a()).is_some());

    let strict = ImportConfig {
        min_activity: 100,
        ..test_config(dir.path())
    };
    let summary = service(&store, strict).run().await.unwrap();

    assert_eq!(summary.kept, 0);
    assert_eq!(summary.below_threshold, 1);
    assert!(store.profile(1, player_a()).is_none());
    assert!(store.stats_row(1, player_a()).is_none());
}

#[tokio::test]
async fn missing_source_key_writes_no_row() {
    let dir = TempDir::new().unwrap();
    write_snapshot(dir.path(), player_a(), json!({ "custom": { "jumps": 3 } }));

    let store = seeded_store();
    store.define_metric(MetricDef::enabled("jumping", "Jumps", 2));
    store.add_metric_source(MetricSource {
        metric_id: "jumping".to_string(),
        section: "custom".to_string(),
        key: "jumps".to_string(),
        weight: 1,
    });

    let summary = service(&store, test_config(dir.path())).run().await.unwrap();

    assert_eq!(summary.changed, 1);
    // All blocks_mined sources are absent, so no row exists for the metric.
    assert_eq!(store.metric_value(1, BLOCKS_MINED, player_a()), None);
    assert_eq!(store.metric_value(1, "jumping", player_a()), Some(3));
}

#[tokio::test]
async fn dry_run_computes_but_writes_nothing() {
    let dir = TempDir::new().unwrap();
    write_snapshot(dir.path(), player_a(), json!({ "mined": { "stone": 10 } }));

    let store = seeded_store();
    let config = ImportConfig {
        dry_run: true,
        ..test_config(dir.path())
    };
    let summary = service(&store, config).run().await.unwrap();

    assert_eq!(summary.processed, 1);
    assert_eq!(summary.changed, 1);
    assert!(summary.dry_run);
    assert!(summary.cleanup.is_none());
    assert!(summary.champion.is_none());

    assert_eq!(store.profile_count(1), 0);
    assert_eq!(store.stats_count(1), 0);
    assert_eq!(store.stats_rows_written(), 0);
    assert_eq!(store.metric_rows_written(), 0);
    assert_eq!(store.seen_flushes(), 0);
}

#[tokio::test]
async fn held_lock_aborts_with_distinct_outcome() {
    let dir = TempDir::new().unwrap();
    write_snapshot(dir.path(), player_a(), json!({ "mined": { "stone": 1 } }));

    let store = seeded_store();
    let config = ImportConfig {
        lock_timeout: Duration::from_secs(0),
        ..test_config(dir.path())
    };
    assert!(store
        .acquire_run_lock(&config.lock_name, Duration::from_secs(0))
        .await
        .unwrap());

    let err = service(&store, config).run().await.unwrap_err();
    assert!(matches!(err, ImportError::LockUnavailable { .. }));
    assert_eq!(err.exit_code(), 10);
}

#[tokio::test]
async fn lock_is_released_after_a_failed_pass() {
    let dir = TempDir::new().unwrap();
    write_snapshot(dir.path(), player_a(), json!({ "mined": { "stone": 1 } }));

    // No metrics seeded: the pass fails after the lock was acquired.
    let store = Arc::new(InMemoryImportStore::new());
    let config = test_config(dir.path());
    let lock_name = config.lock_name.clone();

    let err = service(&store, config).run().await.unwrap_err();
    assert!(matches!(err, ImportError::NoMetricsConfigured));
    assert_eq!(err.exit_code(), 3);
    assert!(!store.is_locked(&lock_name));
}

#[tokio::test]
async fn missing_stats_dir_is_a_distinct_outcome() {
    let dir = TempDir::new().unwrap();
    let config = ImportConfig {
        stats_dir: dir.path().join("absent"),
        ..test_config(dir.path())
    };

    let err = service(&seeded_store(), config).run().await.unwrap_err();
    assert!(matches!(err, ImportError::StatsDirNotFound(_)));
    assert_eq!(err.exit_code(), 2);
}

#[tokio::test]
async fn excluded_and_malformed_files_are_counted_not_fatal() {
    let dir = TempDir::new().unwrap();
    write_snapshot(dir.path(), player_a(), json!({ "mined": { "stone": 4 } }));
    write_snapshot(dir.path(), player_b(), json!({ "mined": { "stone": 2 } }));
    fs::write(dir.path().join(format!("{}.json", player_c())), b"{ not json").unwrap();
    fs::write(dir.path().join("sidecar.json"), b"{}").unwrap();

    let store = seeded_store();
    let config = ImportConfig {
        excluded: [player_b()].into_iter().collect(),
        ..test_config(dir.path())
    };
    let summary = service(&store, config).run().await.unwrap();

    assert_eq!(summary.processed, 4);
    assert_eq!(summary.kept, 1);
    assert_eq!(summary.excluded, 1);
    assert_eq!(summary.unparseable, 1);
    assert_eq!(summary.invalid_filenames, 1);
    assert!(store.profile(1, player_b()).is_none());
}

#[tokio::test]
async fn identity_cache_names_win_and_fallbacks_fill_in() {
    let dir = TempDir::new().unwrap();
    write_snapshot(dir.path(), player_a(), json!({ "mined": { "stone": 4 } }));
    write_snapshot(dir.path(), player_b(), json!({ "mined": { "stone": 2 } }));

    let cache_path = dir.path().join("identities.json");
    fs::write(
        &cache_path,
        serde_json::to_vec(&json!([{ "name": "Alice", "uuid": player_a().to_string() }])).unwrap(),
    )
    .unwrap();

    let store = seeded_store();
    let config = ImportConfig {
        identity_cache: Some(cache_path),
        ..test_config(dir.path())
    };
    service(&store, config).run().await.unwrap();

    let alice = store.profile(1, player_a()).unwrap();
    assert_eq!(alice.name, "Alice");
    assert_eq!(alice.name_lc, "alice");
    assert_eq!(alice.source, NameSource::Cache);
    assert!(alice.checked_at.is_some());

    let unnamed = store.profile(1, player_b()).unwrap();
    assert_eq!(unnamed.name, "bbbbbbbb2222");
    assert_eq!(unnamed.source, NameSource::Fallback);
}

#[tokio::test]
async fn stored_names_survive_a_cacheless_rerun() {
    let dir = TempDir::new().unwrap();
    write_snapshot(dir.path(), player_a(), json!({ "mined": { "stone": 4 } }));

    let cache_path = dir.path().join("identities.json");
    fs::write(
        &cache_path,
        serde_json::to_vec(&json!([{ "name": "Alice", "uuid": player_a().to_string() }])).unwrap(),
    )
    .unwrap();

    let store = seeded_store();
    let with_cache = ImportConfig {
        identity_cache: Some(cache_path),
        ..test_config(dir.path())
    };
    service(&store, with_cache).run().await.unwrap();

    // Second pass without the cache: the stored name must not be clobbered
    // by the synthesized fallback.
    service(&store, test_config(dir.path())).run().await.unwrap();

    let alice = store.profile(1, player_a()).unwrap();
    assert_eq!(alice.name, "Alice");
    assert_eq!(alice.source, NameSource::Cache);
}

#[tokio::test]
async fn champion_recompute_can_be_disabled() {
    let dir = TempDir::new().unwrap();
    write_snapshot(dir.path(), player_a(), json!({ "mined": { "stone": 4 } }));

    let store = seeded_store();
    let config = ImportConfig {
        champion_enabled: false,
        ..test_config(dir.path())
    };
    let summary = service(&store, config).run().await.unwrap();

    assert!(summary.champion.is_none());
    assert_eq!(store.metric_value(1, CHAMPION, player_a()), None);
}

#[tokio::test]
async fn small_flush_thresholds_stream_the_whole_input() {
    let dir = TempDir::new().unwrap();
    for n in 0..10u128 {
        let player = Uuid::from_u128((n + 1) << 64 | 0x4000_8000_0000_0000u128);
        write_snapshot(dir.path(), player, json!({ "mined": { "stone": n as i64 + 1 } }));
    }

    let store = seeded_store();
    let mut config = test_config(dir.path());
    config.thresholds.seen = 3;
    config.thresholds.profiles = 4;
    config.thresholds.changed = 2;
    let summary = service(&store, config).run().await.unwrap();

    assert_eq!(summary.kept, 10);
    assert_eq!(summary.changed, 10);
    assert_eq!(store.profile_count(1), 10);
    assert_eq!(store.stats_count(1), 10);
    assert!(store.changed_flushes() >= 5);
    assert_eq!(store.metric_values_for(1, CHAMPION).len(), 3);
}
