use std::collections::BTreeMap;

use tracing::{debug, instrument};
use uuid::Uuid;

use crate::shared::ImportError;
use crate::store::{AwardRow, ImportStore, MetricValueRow};

use super::{MetricCatalog, MetricDef};

const CHAMPION_LABEL: &str = "Champion";

/// Points handed out per leaderboard rank, best rank first. Ranks beyond the
/// schedule award nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankPoints(Vec<i64>);

impl Default for RankPoints {
    fn default() -> Self {
        Self(vec![5, 3, 1])
    }
}

impl RankPoints {
    pub fn new(points: Vec<i64>) -> Self {
        if points.is_empty() {
            Self::default()
        } else {
            Self(points)
        }
    }

    /// Parses a comma-separated schedule like "5,3,1"; malformed or empty
    /// input falls back to the default.
    pub fn parse(raw: &str) -> Self {
        let points: Vec<i64> = raw
            .split(',')
            .filter_map(|part| part.trim().parse().ok())
            .collect();
        Self::new(points)
    }

    pub fn ranks(&self) -> usize {
        self.0.len()
    }

    fn for_rank(&self, rank: usize) -> i64 {
        self.0.get(rank).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChampionSummary {
    pub metrics_ranked: usize,
    pub players_awarded: usize,
}

/// Rebuilds the composite leaderboard metric from the top placements of every
/// other enabled metric.
///
/// The previous composite values (and award facts, when the audit store
/// exists) are dropped wholesale before reinsertion; the composite is never
/// patched incrementally. Ordering is deterministic: per metric the store
/// ranks value descending with player id ascending as tie-break, and point
/// totals accumulate in a BTreeMap keyed by player id.
#[instrument(skip(store, catalog, points))]
pub async fn recompute_champion(
    store: &dyn ImportStore,
    run_id: i64,
    catalog: &MetricCatalog,
    champion_id: &str,
    points: &RankPoints,
) -> Result<ChampionSummary, ImportError> {
    store
        .ensure_metric(&MetricDef::enabled(champion_id, CHAMPION_LABEL, 0))
        .await?;
    let store_awards = store.supports_awards().await?;

    store.delete_metric_values(run_id, champion_id).await?;
    if store_awards {
        store.clear_awards(run_id).await?;
    }

    let mut totals: BTreeMap<Uuid, i64> = BTreeMap::new();
    let mut awards: Vec<AwardRow> = Vec::new();
    let mut metrics_ranked = 0usize;

    for metric in catalog.iter() {
        if metric.id == champion_id {
            continue;
        }
        let top = store
            .top_metric_values(run_id, &metric.id, points.ranks() as i64)
            .await?;
        if !top.is_empty() {
            metrics_ranked += 1;
        }
        for (rank, (player, value)) in top.into_iter().enumerate() {
            let awarded = points.for_rank(rank);
            if awarded <= 0 {
                continue;
            }
            *totals.entry(player).or_insert(0) += awarded;
            if store_awards {
                awards.push(AwardRow {
                    metric_id: metric.id.clone(),
                    place: (rank + 1) as i32,
                    player,
                    points: awarded,
                    value,
                });
            }
        }
    }

    if store_awards && !awards.is_empty() {
        store.insert_awards(run_id, awards).await?;
    }

    let rows: Vec<MetricValueRow> = totals
        .into_iter()
        .filter(|(_, total)| *total > 0)
        .map(|(player, total)| MetricValueRow {
            metric_id: champion_id.to_string(),
            player,
            value: total,
        })
        .collect();
    let players_awarded = rows.len();
    if !rows.is_empty() {
        store.insert_metric_values(run_id, rows).await?;
    }

    debug!(metrics_ranked, players_awarded, "Composite leaderboard rebuilt");
    Ok(ChampionSummary {
        metrics_ranked,
        players_awarded,
    })
}
