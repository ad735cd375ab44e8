use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::identity::KnownName;
use crate::metrics::{MetricCatalog, MetricDef};
use crate::shared::ImportError;
use crate::snapshot::SnapshotDigest;

use super::models::{
    AwardRow, CleanupCounts, MetricValueRow, ProfileColumns, ProfileRow, StatsRow,
};

/// Persistence contract for one import run.
///
/// Every batched write is transactional: it either fully commits or returns
/// an error, which aborts the run. The production implementation is
/// [`super::PostgresImportStore`]; [`super::InMemoryImportStore`] backs tests
/// and local development.
#[async_trait]
pub trait ImportStore: Send + Sync {
    /// Acquires the process-wide run lock, waiting at most `timeout`.
    /// `Ok(false)` means another run holds it; callers must not retry.
    async fn acquire_run_lock(&self, name: &str, timeout: Duration) -> Result<bool, ImportError>;
    async fn release_run_lock(&self, name: &str) -> Result<(), ImportError>;

    /// Returns the single active run id, creating it on first use
    /// (in-place mode: the run is reused indefinitely).
    async fn ensure_active_run(&self) -> Result<i64, ImportError>;
    /// Refreshes the run's generation timestamp after a successful pass.
    async fn touch_run(&self, run_id: i64) -> Result<(), ImportError>;

    /// Probes which optional profile columns this deployment has.
    async fn profile_columns(&self) -> Result<ProfileColumns, ImportError>;
    /// Loads the enabled metrics with their sources, in presentation order.
    async fn load_metric_catalog(&self) -> Result<MetricCatalog, ImportError>;
    /// Loads the stored digest per player for the run (the hash-skip map).
    async fn load_digests(
        &self,
        run_id: i64,
    ) -> Result<HashMap<Uuid, SnapshotDigest>, ImportError>;
    /// Loads previously stored display names so lower-priority fallbacks
    /// never clobber them.
    async fn load_known_names(
        &self,
        run_id: i64,
        columns: ProfileColumns,
    ) -> Result<HashMap<Uuid, KnownName>, ImportError>;

    /// Empties the run's seen-set before a pass begins.
    async fn reset_seen(&self, run_id: i64) -> Result<(), ImportError>;
    async fn insert_seen(&self, run_id: i64, players: Vec<Uuid>) -> Result<(), ImportError>;
    /// Deletes profile/stats/metric rows for every player absent from the
    /// seen-set. Must only run after the scan fully populated the set.
    async fn cleanup_unseen(&self, run_id: i64) -> Result<CleanupCounts, ImportError>;
    /// Drops the seen-set; it never outlives the pass.
    async fn clear_seen(&self, run_id: i64) -> Result<(), ImportError>;

    async fn upsert_profiles(
        &self,
        run_id: i64,
        rows: Vec<ProfileRow>,
        columns: ProfileColumns,
    ) -> Result<(), ImportError>;
    /// One transaction: delete the changed players' old metric rows, upsert
    /// their stats snapshots, insert their recomputed metric values. The
    /// delete-first ordering makes metrics that dropped to zero disappear.
    async fn write_changed_batch(
        &self,
        run_id: i64,
        changed: Vec<Uuid>,
        stats: Vec<StatsRow>,
        metrics: Vec<MetricValueRow>,
    ) -> Result<(), ImportError>;

    /// Inserts the metric definition if it is not already present.
    async fn ensure_metric(&self, def: &MetricDef) -> Result<(), ImportError>;
    async fn delete_metric_values(&self, run_id: i64, metric_id: &str)
        -> Result<(), ImportError>;
    /// Top values for one metric: value descending, player id ascending.
    async fn top_metric_values(
        &self,
        run_id: i64,
        metric_id: &str,
        limit: i64,
    ) -> Result<Vec<(Uuid, i64)>, ImportError>;
    async fn insert_metric_values(
        &self,
        run_id: i64,
        rows: Vec<MetricValueRow>,
    ) -> Result<(), ImportError>;

    /// Whether the optional award audit store exists.
    async fn supports_awards(&self) -> Result<bool, ImportError>;
    async fn clear_awards(&self, run_id: i64) -> Result<(), ImportError>;
    async fn insert_awards(&self, run_id: i64, rows: Vec<AwardRow>) -> Result<(), ImportError>;
}
