use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use crate::identity::KnownName;
use crate::metrics::{MetricCatalog, MetricDef, MetricSource};
use crate::shared::ImportError;
use crate::snapshot::SnapshotDigest;

use super::models::{
    AwardRow, CleanupCounts, MetricValueRow, ProfileColumns, ProfileRow, StatsRow,
};
use super::repository::ImportStore;

/// In-memory implementation of [`ImportStore`] for tests and local
/// development. Data is lost when the process exits. Write counters are
/// tracked so tests can assert that hash-skipped players cause no writes.
#[derive(Debug, Default)]
pub struct InMemoryImportStore {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    locks: HashSet<String>,
    active_run: Option<i64>,
    columns: Option<ProfileColumns>,
    awards_supported: Option<bool>,
    metric_defs: Vec<MetricDef>,
    metric_sources: Vec<MetricSource>,
    profiles: HashMap<(i64, Uuid), ProfileRow>,
    stats: HashMap<(i64, Uuid), StatsRow>,
    metric_values: HashMap<(i64, String, Uuid), i64>,
    awards: HashMap<i64, Vec<AwardRow>>,
    seen: HashMap<i64, HashSet<Uuid>>,
    counters: WriteCounters,
}

#[derive(Debug, Default, Clone, Copy)]
struct WriteCounters {
    seen_flushes: u64,
    profile_flushes: u64,
    changed_flushes: u64,
    stats_rows: u64,
    metric_rows: u64,
}

impl InMemoryImportStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates a deployment without the optional profile columns.
    pub fn with_profile_columns(self, columns: ProfileColumns) -> Self {
        self.inner.lock().unwrap().columns = Some(columns);
        self
    }

    /// Simulates a deployment without the award audit table.
    pub fn with_awards(self, supported: bool) -> Self {
        self.inner.lock().unwrap().awards_supported = Some(supported);
        self
    }

    pub fn define_metric(&self, def: MetricDef) {
        self.inner.lock().unwrap().metric_defs.push(def);
    }

    pub fn add_metric_source(&self, source: MetricSource) {
        self.inner.lock().unwrap().metric_sources.push(source);
    }

    pub fn seed_profile(&self, run_id: i64, row: ProfileRow) {
        self.inner
            .lock()
            .unwrap()
            .profiles
            .insert((run_id, row.player), row);
    }

    pub fn profile(&self, run_id: i64, player: Uuid) -> Option<ProfileRow> {
        self.inner
            .lock()
            .unwrap()
            .profiles
            .get(&(run_id, player))
            .cloned()
    }

    pub fn profile_count(&self, run_id: i64) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.profiles.keys().filter(|(run, _)| *run == run_id).count()
    }

    pub fn stats_row(&self, run_id: i64, player: Uuid) -> Option<StatsRow> {
        self.inner
            .lock()
            .unwrap()
            .stats
            .get(&(run_id, player))
            .cloned()
    }

    pub fn stats_count(&self, run_id: i64) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.stats.keys().filter(|(run, _)| *run == run_id).count()
    }

    pub fn metric_value(&self, run_id: i64, metric_id: &str, player: Uuid) -> Option<i64> {
        self.inner
            .lock()
            .unwrap()
            .metric_values
            .get(&(run_id, metric_id.to_string(), player))
            .copied()
    }

    /// All values for one metric, sorted value descending then id ascending.
    pub fn metric_values_for(&self, run_id: i64, metric_id: &str) -> Vec<MetricValueRow> {
        let inner = self.inner.lock().unwrap();
        let mut rows: Vec<MetricValueRow> = inner
            .metric_values
            .iter()
            .filter(|((run, metric, _), _)| *run == run_id && metric == metric_id)
            .map(|((_, metric, player), value)| MetricValueRow {
                metric_id: metric.clone(),
                player: *player,
                value: *value,
            })
            .collect();
        rows.sort_by_key(|row| (Reverse(row.value), row.player));
        rows
    }

    pub fn awards_for(&self, run_id: i64) -> Vec<AwardRow> {
        self.inner
            .lock()
            .unwrap()
            .awards
            .get(&run_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn stats_rows_written(&self) -> u64 {
        self.inner.lock().unwrap().counters.stats_rows
    }

    pub fn metric_rows_written(&self) -> u64 {
        self.inner.lock().unwrap().counters.metric_rows
    }

    pub fn seen_flushes(&self) -> u64 {
        self.inner.lock().unwrap().counters.seen_flushes
    }

    pub fn profile_flushes(&self) -> u64 {
        self.inner.lock().unwrap().counters.profile_flushes
    }

    pub fn changed_flushes(&self) -> u64 {
        self.inner.lock().unwrap().counters.changed_flushes
    }

    pub fn is_locked(&self, name: &str) -> bool {
        self.inner.lock().unwrap().locks.contains(name)
    }
}

#[async_trait]
impl ImportStore for InMemoryImportStore {
    async fn acquire_run_lock(&self, name: &str, _timeout: Duration) -> Result<bool, ImportError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.locks.contains(name) {
            return Ok(false);
        }
        inner.locks.insert(name.to_string());
        Ok(true)
    }

    async fn release_run_lock(&self, name: &str) -> Result<(), ImportError> {
        self.inner.lock().unwrap().locks.remove(name);
        Ok(())
    }

    async fn ensure_active_run(&self) -> Result<i64, ImportError> {
        let mut inner = self.inner.lock().unwrap();
        let run_id = *inner.active_run.get_or_insert(1);
        Ok(run_id)
    }

    async fn touch_run(&self, _run_id: i64) -> Result<(), ImportError> {
        Ok(())
    }

    async fn profile_columns(&self) -> Result<ProfileColumns, ImportError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .columns
            .unwrap_or_else(ProfileColumns::all))
    }

    async fn load_metric_catalog(&self) -> Result<MetricCatalog, ImportError> {
        let inner = self.inner.lock().unwrap();
        let mut defs: Vec<&MetricDef> = inner.metric_defs.iter().filter(|d| d.enabled).collect();
        defs.sort_by(|a, b| (a.sort_order, &a.id).cmp(&(b.sort_order, &b.id)));

        let mut ordered = Vec::new();
        for def in defs {
            ordered.extend(
                inner
                    .metric_sources
                    .iter()
                    .filter(|s| s.metric_id == def.id)
                    .cloned(),
            );
        }
        Ok(MetricCatalog::from_sources(ordered))
    }

    async fn load_digests(
        &self,
        run_id: i64,
    ) -> Result<HashMap<Uuid, SnapshotDigest>, ImportError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .stats
            .iter()
            .filter(|((run, _), _)| *run == run_id)
            .map(|((_, player), row)| (*player, row.digest))
            .collect())
    }

    async fn load_known_names(
        &self,
        run_id: i64,
        columns: ProfileColumns,
    ) -> Result<HashMap<Uuid, KnownName>, ImportError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .profiles
            .iter()
            .filter(|((run, _), row)| *run == run_id && !row.name.is_empty())
            .map(|((_, player), row)| {
                let known = KnownName {
                    name: row.name.clone(),
                    source: columns.name_source.then_some(row.source),
                    checked_at: columns.name_checked_at.then_some(row.checked_at).flatten(),
                };
                (*player, known)
            })
            .collect())
    }

    async fn reset_seen(&self, run_id: i64) -> Result<(), ImportError> {
        self.inner
            .lock()
            .unwrap()
            .seen
            .insert(run_id, HashSet::new());
        Ok(())
    }

    async fn insert_seen(&self, run_id: i64, players: Vec<Uuid>) -> Result<(), ImportError> {
        let mut inner = self.inner.lock().unwrap();
        inner.counters.seen_flushes += 1;
        inner.seen.entry(run_id).or_default().extend(players);
        Ok(())
    }

    async fn cleanup_unseen(&self, run_id: i64) -> Result<CleanupCounts, ImportError> {
        let mut inner = self.inner.lock().unwrap();
        let seen = inner.seen.get(&run_id).cloned().unwrap_or_default();
        let mut counts = CleanupCounts::default();

        inner.profiles.retain(|(run, player), _| {
            let keep = *run != run_id || seen.contains(player);
            if !keep {
                counts.profiles += 1;
            }
            keep
        });
        inner.stats.retain(|(run, player), _| {
            let keep = *run != run_id || seen.contains(player);
            if !keep {
                counts.stats += 1;
            }
            keep
        });
        inner.metric_values.retain(|(run, _, player), _| {
            let keep = *run != run_id || seen.contains(player);
            if !keep {
                counts.metric_values += 1;
            }
            keep
        });

        debug!(
            profiles = counts.profiles,
            stats = counts.stats,
            metric_values = counts.metric_values,
            "Removed unseen players from memory"
        );
        Ok(counts)
    }

    async fn clear_seen(&self, run_id: i64) -> Result<(), ImportError> {
        self.inner.lock().unwrap().seen.remove(&run_id);
        Ok(())
    }

    async fn upsert_profiles(
        &self,
        run_id: i64,
        rows: Vec<ProfileRow>,
        columns: ProfileColumns,
    ) -> Result<(), ImportError> {
        let mut inner = self.inner.lock().unwrap();
        inner.counters.profile_flushes += 1;
        for mut row in rows {
            if !columns.name_checked_at {
                row.checked_at = None;
            }
            inner.profiles.insert((run_id, row.player), row);
        }
        Ok(())
    }

    async fn write_changed_batch(
        &self,
        run_id: i64,
        changed: Vec<Uuid>,
        stats: Vec<StatsRow>,
        metrics: Vec<MetricValueRow>,
    ) -> Result<(), ImportError> {
        let mut inner = self.inner.lock().unwrap();
        inner.counters.changed_flushes += 1;

        let changed: HashSet<Uuid> = changed.into_iter().collect();
        inner
            .metric_values
            .retain(|(run, _, player), _| *run != run_id || !changed.contains(player));

        inner.counters.stats_rows += stats.len() as u64;
        for row in stats {
            inner.stats.insert((run_id, row.player), row);
        }

        inner.counters.metric_rows += metrics.len() as u64;
        for row in metrics {
            inner
                .metric_values
                .insert((run_id, row.metric_id, row.player), row.value);
        }
        Ok(())
    }

    async fn ensure_metric(&self, def: &MetricDef) -> Result<(), ImportError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.metric_defs.iter().any(|existing| existing.id == def.id) {
            inner.metric_defs.push(def.clone());
        }
        Ok(())
    }

    async fn delete_metric_values(
        &self,
        run_id: i64,
        metric_id: &str,
    ) -> Result<(), ImportError> {
        self.inner
            .lock()
            .unwrap()
            .metric_values
            .retain(|(run, metric, _), _| *run != run_id || metric != metric_id);
        Ok(())
    }

    async fn top_metric_values(
        &self,
        run_id: i64,
        metric_id: &str,
        limit: i64,
    ) -> Result<Vec<(Uuid, i64)>, ImportError> {
        let mut rows: Vec<(Uuid, i64)> = self
            .metric_values_for(run_id, metric_id)
            .into_iter()
            .filter(|row| row.value > 0)
            .map(|row| (row.player, row.value))
            .collect();
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn insert_metric_values(
        &self,
        run_id: i64,
        rows: Vec<MetricValueRow>,
    ) -> Result<(), ImportError> {
        let mut inner = self.inner.lock().unwrap();
        inner.counters.metric_rows += rows.len() as u64;
        for row in rows {
            inner
                .metric_values
                .insert((run_id, row.metric_id, row.player), row.value);
        }
        Ok(())
    }

    async fn supports_awards(&self) -> Result<bool, ImportError> {
        Ok(self.inner.lock().unwrap().awards_supported.unwrap_or(true))
    }

    async fn clear_awards(&self, run_id: i64) -> Result<(), ImportError> {
        self.inner.lock().unwrap().awards.remove(&run_id);
        Ok(())
    }

    async fn insert_awards(&self, run_id: i64, rows: Vec<AwardRow>) -> Result<(), ImportError> {
        self.inner
            .lock()
            .unwrap()
            .awards
            .entry(run_id)
            .or_default()
            .extend(rows);
        Ok(())
    }
}
