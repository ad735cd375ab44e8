use serde_json::Value;

use crate::snapshot::StatsTree;

use super::MetricCatalog;

/// Evaluates every catalog metric against one player's normalized tree.
///
/// A missing section or key, or a non-integer value, contributes zero for
/// that source only; one bad source never drops the metric or the player.
/// Only strictly positive totals are returned (sparse storage: absence means
/// zero).
pub fn compute_metrics(tree: &StatsTree, catalog: &MetricCatalog) -> Vec<(String, i64)> {
    catalog
        .iter()
        .filter_map(|metric| {
            let total = metric.sources.iter().fold(0i64, |acc, source| {
                acc.saturating_add(
                    stat_value(tree, &source.section, &source.key).saturating_mul(source.weight),
                )
            });
            (total > 0).then(|| (metric.id.clone(), total))
        })
        .collect()
}

/// Looks up a single integer stat; missing or non-numeric values read as 0.
pub fn stat_value(tree: &StatsTree, section: &str, key: &str) -> i64 {
    match tree.get(section) {
        Some(Value::Object(entries)) => entries.get(key).and_then(Value::as_i64).unwrap_or(0),
        _ => 0,
    }
}
