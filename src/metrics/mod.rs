mod computer;
mod leaderboard;

pub use computer::{compute_metrics, stat_value};
pub use leaderboard::{recompute_champion, ChampionSummary, RankPoints};

use serde::{Deserialize, Serialize};

/// A leaderboard metric definition. Label/category/unit are presentation
/// metadata carried through untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricDef {
    pub id: String,
    pub label: String,
    pub category: String,
    pub unit: String,
    pub sort_order: i32,
    pub enabled: bool,
}

impl MetricDef {
    pub fn enabled(id: &str, label: &str, sort_order: i32) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
            category: "general".to_string(),
            unit: String::new(),
            sort_order,
            enabled: true,
        }
    }
}

/// One weighted input of a metric: `tree[section][key] * weight`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSource {
    pub metric_id: String,
    pub section: String,
    pub key: String,
    pub weight: i64,
}

/// The enabled metrics with their sources, in presentation order. Metrics
/// without sources are not part of the catalog; the composite metric is
/// managed separately by the leaderboard recompute.
#[derive(Debug, Clone, Default)]
pub struct MetricCatalog {
    metrics: Vec<CatalogMetric>,
}

#[derive(Debug, Clone)]
pub struct CatalogMetric {
    pub id: String,
    pub sources: Vec<MetricSource>,
}

impl MetricCatalog {
    /// Groups an ordered source list by metric id, preserving first-seen
    /// order so ranking iteration stays deterministic.
    pub fn from_sources(sources: Vec<MetricSource>) -> Self {
        let mut metrics: Vec<CatalogMetric> = Vec::new();
        for source in sources {
            match metrics.iter_mut().find(|metric| metric.id == source.metric_id) {
                Some(metric) => metric.sources.push(source),
                None => metrics.push(CatalogMetric {
                    id: source.metric_id.clone(),
                    sources: vec![source],
                }),
            }
        }
        Self { metrics }
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CatalogMetric> {
        self.metrics.iter()
    }
}
