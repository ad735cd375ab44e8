use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::shared::ImportError;

use super::models::{MetricValueRow, ProfileColumns, ProfileRow, StatsRow};
use super::repository::ImportStore;

/// Per-buffer flush thresholds (row counts), independently tunable.
#[derive(Debug, Clone)]
pub struct FlushThresholds {
    pub seen: usize,
    pub profiles: usize,
    pub changed: usize,
}

impl Default for FlushThresholds {
    fn default() -> Self {
        Self {
            seen: 2000,
            profiles: 2000,
            changed: 800,
        }
    }
}

/// Bounded accumulator. `drain` hands back the buffered rows and resets the
/// buffer, so each flush site owns exactly one copy of the data.
#[derive(Debug)]
pub struct Buffer<T> {
    items: Vec<T>,
    threshold: usize,
}

impl<T> Buffer<T> {
    pub fn new(threshold: usize) -> Self {
        Self {
            items: Vec::new(),
            threshold: threshold.max(1),
        }
    }

    /// Appends one item; returns `true` once the buffer reached its
    /// threshold and should be flushed.
    pub fn push(&mut self, item: T) -> bool {
        self.items.push(item);
        self.items.len() >= self.threshold
    }

    pub fn drain(&mut self) -> Vec<T> {
        std::mem::take(&mut self.items)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Accumulates rows for the four sinks (seen ids, profile upserts, changed
/// stats + metric rows) and pushes each batch through the store once its
/// threshold is reached. The changed batch keeps stats and metric rows
/// together with their player ids so stale metric rows are deleted in the
/// same transaction that rewrites the snapshot.
pub struct BatchWriter {
    store: Arc<dyn ImportStore>,
    run_id: i64,
    columns: ProfileColumns,
    seen: Buffer<Uuid>,
    profiles: Buffer<ProfileRow>,
    changed: Buffer<Uuid>,
    stats: Vec<StatsRow>,
    metrics: Vec<MetricValueRow>,
}

impl BatchWriter {
    pub fn new(
        store: Arc<dyn ImportStore>,
        run_id: i64,
        columns: ProfileColumns,
        thresholds: &FlushThresholds,
    ) -> Self {
        Self {
            store,
            run_id,
            columns,
            seen: Buffer::new(thresholds.seen),
            profiles: Buffer::new(thresholds.profiles),
            changed: Buffer::new(thresholds.changed),
            stats: Vec::new(),
            metrics: Vec::new(),
        }
    }

    pub async fn record_seen(&mut self, player: Uuid) -> Result<(), ImportError> {
        if self.seen.push(player) {
            self.flush_seen().await?;
        }
        Ok(())
    }

    pub async fn record_profile(&mut self, row: ProfileRow) -> Result<(), ImportError> {
        if self.profiles.push(row) {
            self.flush_profiles().await?;
        }
        Ok(())
    }

    /// Queues a changed player's snapshot and recomputed metric rows. The
    /// batch flushes once the changed-player count reaches its threshold.
    pub async fn record_changed(
        &mut self,
        stats: StatsRow,
        metrics: Vec<MetricValueRow>,
    ) -> Result<(), ImportError> {
        let full = self.changed.push(stats.player);
        self.stats.push(stats);
        self.metrics.extend(metrics);
        if full {
            self.flush_changed().await?;
        }
        Ok(())
    }

    /// Flushes whatever remains in all buffers; called once the scan ends.
    pub async fn flush_all(&mut self) -> Result<(), ImportError> {
        self.flush_seen().await?;
        self.flush_profiles().await?;
        self.flush_changed().await
    }

    async fn flush_seen(&mut self) -> Result<(), ImportError> {
        if self.seen.is_empty() {
            return Ok(());
        }
        let players = self.seen.drain();
        debug!(count = players.len(), "Flushing seen ids");
        self.store.insert_seen(self.run_id, players).await
    }

    async fn flush_profiles(&mut self) -> Result<(), ImportError> {
        if self.profiles.is_empty() {
            return Ok(());
        }
        let rows = self.profiles.drain();
        debug!(count = rows.len(), "Flushing profile upserts");
        self.store
            .upsert_profiles(self.run_id, rows, self.columns)
            .await
    }

    async fn flush_changed(&mut self) -> Result<(), ImportError> {
        if self.changed.is_empty() {
            return Ok(());
        }
        let changed = self.changed.drain();
        let stats = std::mem::take(&mut self.stats);
        let metrics = std::mem::take(&mut self.metrics);
        debug!(
            players = changed.len(),
            stats = stats.len(),
            metrics = metrics.len(),
            "Flushing changed batch"
        );
        self.store
            .write_changed_batch(self.run_id, changed, stats, metrics)
            .await
    }
}
