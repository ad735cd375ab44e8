use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::identity::NameSource;
use crate::snapshot::SnapshotDigest;

/// Which optional `player_profile` columns exist in this deployment.
/// Resolved once per run and threaded through profile loads and flushes
/// instead of being probed at each write site.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProfileColumns {
    pub name_source: bool,
    pub name_checked_at: bool,
}

impl ProfileColumns {
    pub fn all() -> Self {
        Self {
            name_source: true,
            name_checked_at: true,
        }
    }
}

/// One profile upsert: insert-or-replace by (run, player), always refreshing
/// `last_seen`.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileRow {
    pub player: Uuid,
    pub name: String,
    pub name_lc: String,
    pub source: NameSource,
    pub checked_at: Option<DateTime<Utc>>,
    pub last_seen: DateTime<Utc>,
}

/// One stats upsert: compressed canonical payload plus its digest.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsRow {
    pub player: Uuid,
    pub payload_gz: Vec<u8>,
    pub digest: SnapshotDigest,
    pub updated_at: DateTime<Utc>,
}

/// One materialized metric value. Only strictly positive values are stored.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricValueRow {
    pub metric_id: String,
    pub player: Uuid,
    pub value: i64,
}

/// One audit fact for a composite-leaderboard placement.
#[derive(Debug, Clone, PartialEq)]
pub struct AwardRow {
    pub metric_id: String,
    pub place: i32,
    pub player: Uuid,
    pub points: i64,
    pub value: i64,
}

/// Rows removed by the end-of-pass reconciliation, per table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupCounts {
    pub profiles: u64,
    pub stats: u64,
    pub metric_values: u64,
}

impl CleanupCounts {
    pub fn total(&self) -> u64 {
        self.profiles + self.stats + self.metric_values
    }
}
