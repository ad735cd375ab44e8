use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::identity::{load_identity_cache, NameResolver};
use crate::metrics::{compute_metrics, recompute_champion, stat_value, ChampionSummary, MetricCatalog};
use crate::shared::ImportError;
use crate::snapshot::{
    canonical_bytes, compress_payload, normalize, snapshot_digest, stats_files, ChangeDetector,
};
use crate::store::{
    BatchWriter, CleanupCounts, ImportStore, MetricValueRow, ProfileRow, StatsRow,
};

use super::config::ImportConfig;

/// What happened to one input file. Skips are explicit values rather than
/// silently absorbed exceptions, so they stay observable in the summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    /// Kept and different from the stored snapshot: written + recomputed.
    Changed,
    /// Kept but identical to the stored snapshot: hash-skip.
    Unchanged,
    /// Activity stat below the inclusion threshold.
    BelowThreshold,
    /// Listed in the exclusion set.
    Excluded,
    /// Filename is not a player id.
    InvalidFilename,
    /// File unreadable or not valid JSON.
    Unparseable,
}

/// Pass-level counters plus the end-of-pass reconciliation results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassSummary {
    pub run_id: i64,
    pub processed: u64,
    pub kept: u64,
    pub changed: u64,
    pub below_threshold: u64,
    pub excluded: u64,
    pub invalid_filenames: u64,
    pub unparseable: u64,
    pub cleanup: Option<CleanupCounts>,
    pub champion: Option<ChampionSummary>,
    pub dry_run: bool,
}

impl PassSummary {
    fn record(&mut self, outcome: FileOutcome) {
        self.processed += 1;
        match outcome {
            FileOutcome::Changed => {
                self.kept += 1;
                self.changed += 1;
            }
            FileOutcome::Unchanged => self.kept += 1,
            FileOutcome::BelowThreshold => self.below_threshold += 1,
            FileOutcome::Excluded => self.excluded += 1,
            FileOutcome::InvalidFilename => self.invalid_filenames += 1,
            FileOutcome::Unparseable => self.unparseable += 1,
        }
    }
}

/// Runs one exclusive import pass: scan, diff, materialize, reconcile,
/// recompute the composite leaderboard.
pub struct ImportService {
    store: Arc<dyn ImportStore>,
    config: ImportConfig,
}

impl ImportService {
    pub fn new(store: Arc<dyn ImportStore>, config: ImportConfig) -> Self {
        Self { store, config }
    }

    pub async fn run(&self) -> Result<PassSummary, ImportError> {
        if !self.config.stats_dir.is_dir() {
            return Err(ImportError::StatsDirNotFound(
                self.config.stats_dir.display().to_string(),
            ));
        }

        let cache = match &self.config.identity_cache {
            Some(path) => load_identity_cache(path),
            None => HashMap::new(),
        };
        info!(names = cache.len(), "Loaded identity cache");

        let locked = self
            .store
            .acquire_run_lock(&self.config.lock_name, self.config.lock_timeout)
            .await?;
        if !locked {
            return Err(ImportError::LockUnavailable {
                name: self.config.lock_name.clone(),
                timeout_secs: self.config.lock_timeout.as_secs(),
            });
        }

        let result = self.run_locked(cache).await;

        if let Err(err) = self.store.release_run_lock(&self.config.lock_name).await {
            warn!(error = %err, "Failed to release run lock");
        }
        result
    }

    async fn run_locked(
        &self,
        cache: HashMap<Uuid, String>,
    ) -> Result<PassSummary, ImportError> {
        let run_id = self.store.ensure_active_run().await?;
        info!(run_id, "Using active run (in-place)");

        let catalog = self.store.load_metric_catalog().await?;
        if catalog.is_empty() {
            return Err(ImportError::NoMetricsConfigured);
        }
        info!(metrics = catalog.len(), "Loaded metric catalog");

        let mut detector = ChangeDetector::new(self.store.load_digests(run_id).await?);
        info!(digests = detector.len(), "Loaded existing snapshot digests");

        let columns = self.store.profile_columns().await?;
        let known = self.store.load_known_names(run_id, columns).await?;
        info!(profiles = known.len(), "Loaded existing profile names");

        let resolver = NameResolver::new(cache, known, self.config.placeholder.clone());

        let mut writer = if self.config.dry_run {
            info!("Dry run: no writes will be issued");
            None
        } else {
            self.store.reset_seen(run_id).await?;
            Some(BatchWriter::new(
                self.store.clone(),
                run_id,
                columns,
                &self.config.thresholds,
            ))
        };

        let mut summary = PassSummary {
            run_id,
            dry_run: self.config.dry_run,
            ..Default::default()
        };
        let now = Utc::now();

        let files = stats_files(&self.config.stats_dir)?;
        for (stem, path) in files {
            let outcome = self
                .process_file(&stem, &path, &catalog, &resolver, &mut detector, writer.as_mut(), now)
                .await?;
            summary.record(outcome);
        }

        info!(
            processed = summary.processed,
            kept = summary.kept,
            changed = summary.changed,
            "Scan complete"
        );

        let Some(mut writer) = writer else {
            return Ok(summary);
        };
        writer.flush_all().await?;

        let cleanup = self.store.cleanup_unseen(run_id).await?;
        self.store.clear_seen(run_id).await?;
        info!(
            profiles = cleanup.profiles,
            stats = cleanup.stats,
            metric_values = cleanup.metric_values,
            "Removed players absent from this pass"
        );
        summary.cleanup = Some(cleanup);

        if self.config.champion_enabled {
            // The base import is already durable; a broken leaderboard
            // recompute must not invalidate it.
            match recompute_champion(
                self.store.as_ref(),
                run_id,
                &catalog,
                &self.config.champion_metric,
                &self.config.rank_points,
            )
            .await
            {
                Ok(champion) => {
                    info!(
                        metrics_ranked = champion.metrics_ranked,
                        players_awarded = champion.players_awarded,
                        "Recomputed composite leaderboard"
                    );
                    summary.champion = Some(champion);
                }
                Err(err) => {
                    warn!(error = %err, "Composite leaderboard recompute failed; keeping base import");
                }
            }
        }

        self.store.touch_run(run_id).await?;
        Ok(summary)
    }

    #[allow(clippy::too_many_arguments)]
    async fn process_file(
        &self,
        stem: &str,
        path: &Path,
        catalog: &MetricCatalog,
        resolver: &NameResolver,
        detector: &mut ChangeDetector,
        mut writer: Option<&mut BatchWriter>,
        now: DateTime<Utc>,
    ) -> Result<FileOutcome, ImportError> {
        let Ok(player) = Uuid::parse_str(stem) else {
            debug!(file = stem, "Skipping file without a player-id name");
            return Ok(FileOutcome::InvalidFilename);
        };
        if self.config.excluded.contains(&player) {
            return Ok(FileOutcome::Excluded);
        }

        let raw = match parse_snapshot(path) {
            Ok(raw) => raw,
            Err(reason) => {
                warn!(file = %path.display(), %reason, "Cannot parse snapshot file");
                return Ok(FileOutcome::Unparseable);
            }
        };
        let tree = normalize(raw, &self.config.cosmetic_suffixes);

        let activity = stat_value(
            &tree,
            &self.config.activity_stat.section,
            &self.config.activity_stat.key,
        );
        if activity < self.config.min_activity {
            return Ok(FileOutcome::BelowThreshold);
        }

        if let Some(writer) = writer.as_deref_mut() {
            writer.record_seen(player).await?;
        }

        let resolved = resolver.resolve(player, now);
        if let Some(writer) = writer.as_deref_mut() {
            writer
                .record_profile(ProfileRow {
                    player,
                    name_lc: resolved.name.to_lowercase(),
                    name: resolved.name,
                    source: resolved.source,
                    checked_at: resolved.checked_at,
                    last_seen: now,
                })
                .await?;
        }

        let canonical = match canonical_bytes(&tree) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(file = %path.display(), error = %err, "Cannot canonicalize snapshot");
                return Ok(FileOutcome::Unparseable);
            }
        };
        let digest = snapshot_digest(&canonical);
        if !detector.observe(player, digest) {
            return Ok(FileOutcome::Unchanged);
        }

        let Some(writer) = writer else {
            return Ok(FileOutcome::Changed);
        };

        let metric_rows = compute_metrics(&tree, catalog)
            .into_iter()
            .map(|(metric_id, value)| MetricValueRow {
                metric_id,
                player,
                value,
            })
            .collect();
        writer
            .record_changed(
                StatsRow {
                    player,
                    payload_gz: compress_payload(&canonical)?,
                    digest,
                    updated_at: now,
                },
                metric_rows,
            )
            .await?;
        Ok(FileOutcome::Changed)
    }
}

fn parse_snapshot(path: &Path) -> Result<Value, String> {
    let text = fs::read_to_string(path).map_err(|err| err.to_string())?;
    serde_json::from_str(&text).map_err(|err| err.to_string())
}
