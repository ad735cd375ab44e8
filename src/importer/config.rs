use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use uuid::Uuid;

use crate::identity::PlaceholderPolicy;
use crate::metrics::RankPoints;
use crate::store::FlushThresholds;

/// Address of a single stat inside the normalized tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatRef {
    pub section: String,
    pub key: String,
}

impl StatRef {
    pub fn new(section: &str, key: &str) -> Self {
        Self {
            section: section.to_string(),
            key: key.to_string(),
        }
    }

    /// Parses `section/key`. A slash separates the parts because stat keys
    /// themselves may contain namespace colons.
    pub fn parse(raw: &str) -> Option<Self> {
        let (section, key) = raw.split_once('/')?;
        if section.is_empty() || key.is_empty() {
            return None;
        }
        Some(Self::new(section, key))
    }
}

/// Everything one import pass needs to know. Assembled from the CLI in
/// production; tests construct it directly.
#[derive(Debug, Clone)]
pub struct ImportConfig {
    pub stats_dir: PathBuf,
    pub identity_cache: Option<PathBuf>,
    /// Players whose activity stat is below this are not imported.
    pub min_activity: i64,
    pub activity_stat: StatRef,
    /// Players skipped entirely, regardless of other criteria.
    pub excluded: HashSet<Uuid>,
    /// Key suffixes stripped during normalization.
    pub cosmetic_suffixes: Vec<String>,
    pub thresholds: FlushThresholds,
    pub lock_name: String,
    pub lock_timeout: Duration,
    pub champion_metric: String,
    pub rank_points: RankPoints,
    pub champion_enabled: bool,
    pub placeholder: PlaceholderPolicy,
    /// Parse and compute only; no persistent writes at all.
    pub dry_run: bool,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            stats_dir: PathBuf::from("stats"),
            identity_cache: None,
            min_activity: 72_000,
            activity_stat: StatRef::new("custom", "play_time"),
            excluded: HashSet::new(),
            cosmetic_suffixes: vec!["_wall_banner".to_string()],
            thresholds: FlushThresholds::default(),
            lock_name: "statboard_import".to_string(),
            lock_timeout: Duration::from_secs(5),
            champion_metric: "champion".to_string(),
            rank_points: RankPoints::default(),
            champion_enabled: true,
            placeholder: PlaceholderPolicy::default(),
            dry_run: false,
        }
    }
}
