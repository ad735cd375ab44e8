use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres, Row};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::identity::{truncate_name, KnownName, NameSource};
use crate::metrics::{MetricCatalog, MetricDef, MetricSource};
use crate::shared::ImportError;
use crate::snapshot::SnapshotDigest;

use super::models::{
    AwardRow, CleanupCounts, MetricValueRow, ProfileColumns, ProfileRow, StatsRow,
};
use super::repository::ImportStore;

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// PostgreSQL implementation of [`ImportStore`].
///
/// Batched writes use single `UNNEST`-driven statements (or one transaction
/// for the changed batch), so a flush either fully commits or fails. The
/// advisory run lock is session-scoped and therefore held on a dedicated
/// pool connection for the lifetime of the run.
pub struct PostgresImportStore {
    pool: PgPool,
    lock_conn: Mutex<Option<PoolConnection<Postgres>>>,
}

impl PostgresImportStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lock_conn: Mutex::new(None),
        }
    }
}

fn db_err(context: &'static str) -> impl FnOnce(sqlx::Error) -> ImportError {
    move |err| {
        warn!(error = %err, context, "Database operation failed");
        ImportError::DatabaseError(format!("{context}: {err}"))
    }
}

#[async_trait]
impl ImportStore for PostgresImportStore {
    #[instrument(skip(self))]
    async fn acquire_run_lock(&self, name: &str, timeout: Duration) -> Result<bool, ImportError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(db_err("acquire lock connection"))?;

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let locked: bool =
                sqlx::query_scalar("SELECT pg_try_advisory_lock(hashtext($1)::bigint)")
                    .bind(name)
                    .fetch_one(&mut *conn)
                    .await
                    .map_err(db_err("try advisory lock"))?;
            if locked {
                debug!(lock = name, "Acquired run lock");
                *self.lock_conn.lock().await = Some(conn);
                return Ok(true);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(LOCK_POLL_INTERVAL).await;
        }
    }

    #[instrument(skip(self))]
    async fn release_run_lock(&self, name: &str) -> Result<(), ImportError> {
        let conn = self.lock_conn.lock().await.take();
        if let Some(mut conn) = conn {
            sqlx::query("SELECT pg_advisory_unlock(hashtext($1)::bigint)")
                .bind(name)
                .execute(&mut *conn)
                .await
                .map_err(db_err("release advisory lock"))?;
            debug!(lock = name, "Released run lock");
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn ensure_active_run(&self) -> Result<i64, ImportError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_err("begin run transaction"))?;

        let active: Option<Option<i64>> =
            sqlx::query_scalar("SELECT active_run_id FROM site_state WHERE id = 1")
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_err("read active run"))?;

        let run_id = match active.flatten() {
            Some(run_id) => {
                sqlx::query(
                    "UPDATE import_run SET generated_at = NOW(), status = 'active' WHERE id = $1",
                )
                .bind(run_id)
                .execute(&mut *tx)
                .await
                .map_err(db_err("touch existing run"))?;
                run_id
            }
            None => {
                let run_id: i64 = sqlx::query_scalar(
                    "INSERT INTO import_run (generated_at, status) VALUES (NOW(), 'active') RETURNING id",
                )
                .fetch_one(&mut *tx)
                .await
                .map_err(db_err("create run"))?;
                sqlx::query(
                    "INSERT INTO site_state (id, active_run_id) VALUES (1, $1) \
                     ON CONFLICT (id) DO UPDATE SET active_run_id = EXCLUDED.active_run_id",
                )
                .bind(run_id)
                .execute(&mut *tx)
                .await
                .map_err(db_err("activate run"))?;
                run_id
            }
        };

        tx.commit().await.map_err(db_err("commit run transaction"))?;
        Ok(run_id)
    }

    #[instrument(skip(self))]
    async fn touch_run(&self, run_id: i64) -> Result<(), ImportError> {
        sqlx::query("UPDATE import_run SET generated_at = NOW(), status = 'active' WHERE id = $1")
            .bind(run_id)
            .execute(&self.pool)
            .await
            .map_err(db_err("touch run"))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn profile_columns(&self) -> Result<ProfileColumns, ImportError> {
        let rows = sqlx::query(
            "SELECT column_name::text AS column_name FROM information_schema.columns \
             WHERE table_schema = current_schema() AND table_name = 'player_profile' \
               AND column_name IN ('name_source', 'name_checked_at')",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("probe profile columns"))?;

        let mut columns = ProfileColumns::default();
        for row in rows {
            match row.get::<String, _>("column_name").as_str() {
                "name_source" => columns.name_source = true,
                "name_checked_at" => columns.name_checked_at = true,
                _ => {}
            }
        }
        debug!(?columns, "Resolved profile column capabilities");
        Ok(columns)
    }

    #[instrument(skip(self))]
    async fn load_metric_catalog(&self) -> Result<MetricCatalog, ImportError> {
        let rows = sqlx::query(
            "SELECT ms.metric_id, ms.section, ms.stat_key, ms.weight \
             FROM metric_source ms \
             JOIN metric_def md ON md.id = ms.metric_id \
             WHERE md.enabled \
             ORDER BY md.sort_order ASC, ms.metric_id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("load metric sources"))?;

        let sources = rows
            .into_iter()
            .map(|row| MetricSource {
                metric_id: row.get("metric_id"),
                section: row.get("section"),
                key: row.get("stat_key"),
                weight: row.get("weight"),
            })
            .collect();
        Ok(MetricCatalog::from_sources(sources))
    }

    #[instrument(skip(self))]
    async fn load_digests(
        &self,
        run_id: i64,
    ) -> Result<HashMap<Uuid, SnapshotDigest>, ImportError> {
        let mut digests = HashMap::new();
        let mut rows = sqlx::query("SELECT player_id, digest FROM player_stats WHERE run_id = $1")
            .bind(run_id)
            .fetch(&self.pool);

        while let Some(row) = rows.try_next().await.map_err(db_err("load digests"))? {
            let player: Uuid = row.get("player_id");
            let digest: Vec<u8> = row.get("digest");
            match SnapshotDigest::try_from(digest.as_slice()) {
                Ok(digest) => {
                    digests.insert(player, digest);
                }
                Err(_) => warn!(%player, "Ignoring stored digest with unexpected length"),
            }
        }
        Ok(digests)
    }

    #[instrument(skip(self))]
    async fn load_known_names(
        &self,
        run_id: i64,
        columns: ProfileColumns,
    ) -> Result<HashMap<Uuid, KnownName>, ImportError> {
        let mut select = String::from("SELECT player_id, name");
        if columns.name_source {
            select.push_str(", name_source");
        }
        if columns.name_checked_at {
            select.push_str(", name_checked_at");
        }
        select.push_str(" FROM player_profile WHERE run_id = $1");

        let mut known = HashMap::new();
        let mut rows = sqlx::query(&select).bind(run_id).fetch(&self.pool);
        while let Some(row) = rows.try_next().await.map_err(db_err("load known names"))? {
            let player: Uuid = row.get("player_id");
            let name: Option<String> = row.get("name");
            let Some(name) = name.filter(|name| !name.is_empty()) else {
                continue;
            };

            let source = if columns.name_source {
                row.get::<Option<String>, _>("name_source")
                    .and_then(|raw| NameSource::from_str(&raw).ok())
            } else {
                None
            };
            let checked_at = if columns.name_checked_at {
                row.get::<Option<DateTime<Utc>>, _>("name_checked_at")
            } else {
                None
            };
            known.insert(
                player,
                KnownName {
                    name: truncate_name(&name),
                    source,
                    checked_at,
                },
            );
        }
        Ok(known)
    }

    #[instrument(skip(self))]
    async fn reset_seen(&self, run_id: i64) -> Result<(), ImportError> {
        sqlx::query("DELETE FROM import_seen WHERE run_id = $1")
            .bind(run_id)
            .execute(&self.pool)
            .await
            .map_err(db_err("reset seen set"))?;
        Ok(())
    }

    #[instrument(skip(self, players))]
    async fn insert_seen(&self, run_id: i64, players: Vec<Uuid>) -> Result<(), ImportError> {
        if players.is_empty() {
            return Ok(());
        }
        sqlx::query(
            "INSERT INTO import_seen (run_id, player_id) \
             SELECT $1, ids.player_id FROM UNNEST($2::uuid[]) AS ids(player_id) \
             ON CONFLICT DO NOTHING",
        )
        .bind(run_id)
        .bind(players)
        .execute(&self.pool)
        .await
        .map_err(db_err("insert seen ids"))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn cleanup_unseen(&self, run_id: i64) -> Result<CleanupCounts, ImportError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_err("begin cleanup transaction"))?;

        let profiles = sqlx::query(
            "DELETE FROM player_profile p WHERE p.run_id = $1 AND NOT EXISTS \
             (SELECT 1 FROM import_seen s WHERE s.run_id = p.run_id AND s.player_id = p.player_id)",
        )
        .bind(run_id)
        .execute(&mut *tx)
        .await
        .map_err(db_err("cleanup profiles"))?
        .rows_affected();

        let stats = sqlx::query(
            "DELETE FROM player_stats ps WHERE ps.run_id = $1 AND NOT EXISTS \
             (SELECT 1 FROM import_seen s WHERE s.run_id = ps.run_id AND s.player_id = ps.player_id)",
        )
        .bind(run_id)
        .execute(&mut *tx)
        .await
        .map_err(db_err("cleanup stats"))?
        .rows_affected();

        let metric_values = sqlx::query(
            "DELETE FROM metric_value mv WHERE mv.run_id = $1 AND NOT EXISTS \
             (SELECT 1 FROM import_seen s WHERE s.run_id = mv.run_id AND s.player_id = mv.player_id)",
        )
        .bind(run_id)
        .execute(&mut *tx)
        .await
        .map_err(db_err("cleanup metric values"))?
        .rows_affected();

        tx.commit()
            .await
            .map_err(db_err("commit cleanup transaction"))?;
        Ok(CleanupCounts {
            profiles,
            stats,
            metric_values,
        })
    }

    #[instrument(skip(self))]
    async fn clear_seen(&self, run_id: i64) -> Result<(), ImportError> {
        sqlx::query("DELETE FROM import_seen WHERE run_id = $1")
            .bind(run_id)
            .execute(&self.pool)
            .await
            .map_err(db_err("clear seen set"))?;
        Ok(())
    }

    #[instrument(skip(self, rows))]
    async fn upsert_profiles(
        &self,
        run_id: i64,
        rows: Vec<ProfileRow>,
        columns: ProfileColumns,
    ) -> Result<(), ImportError> {
        if rows.is_empty() {
            return Ok(());
        }

        let players: Vec<Uuid> = rows.iter().map(|row| row.player).collect();
        let names: Vec<String> = rows.iter().map(|row| row.name.clone()).collect();
        let names_lc: Vec<String> = rows.iter().map(|row| row.name_lc.clone()).collect();
        let sources: Vec<String> = rows.iter().map(|row| row.source.to_string()).collect();
        let checked: Vec<Option<DateTime<Utc>>> = rows.iter().map(|row| row.checked_at).collect();
        let last_seen: Vec<DateTime<Utc>> = rows.iter().map(|row| row.last_seen).collect();

        match (columns.name_source, columns.name_checked_at) {
            (true, true) => {
                sqlx::query(
                    "INSERT INTO player_profile \
                       (run_id, player_id, name, name_lc, name_source, name_checked_at, last_seen) \
                     SELECT $1, t.player_id, t.name, t.name_lc, t.name_source, t.name_checked_at, t.last_seen \
                     FROM UNNEST($2::uuid[], $3::text[], $4::text[], $5::text[], $6::timestamptz[], $7::timestamptz[]) \
                       AS t(player_id, name, name_lc, name_source, name_checked_at, last_seen) \
                     ON CONFLICT (run_id, player_id) DO UPDATE SET \
                       name = EXCLUDED.name, name_lc = EXCLUDED.name_lc, \
                       name_source = EXCLUDED.name_source, \
                       name_checked_at = EXCLUDED.name_checked_at, \
                       last_seen = EXCLUDED.last_seen",
                )
                .bind(run_id)
                .bind(players)
                .bind(names)
                .bind(names_lc)
                .bind(sources)
                .bind(checked)
                .bind(last_seen)
                .execute(&self.pool)
                .await
                .map_err(db_err("upsert profiles"))?;
            }
            (true, false) => {
                sqlx::query(
                    "INSERT INTO player_profile (run_id, player_id, name, name_lc, name_source, last_seen) \
                     SELECT $1, t.player_id, t.name, t.name_lc, t.name_source, t.last_seen \
                     FROM UNNEST($2::uuid[], $3::text[], $4::text[], $5::text[], $6::timestamptz[]) \
                       AS t(player_id, name, name_lc, name_source, last_seen) \
                     ON CONFLICT (run_id, player_id) DO UPDATE SET \
                       name = EXCLUDED.name, name_lc = EXCLUDED.name_lc, \
                       name_source = EXCLUDED.name_source, last_seen = EXCLUDED.last_seen",
                )
                .bind(run_id)
                .bind(players)
                .bind(names)
                .bind(names_lc)
                .bind(sources)
                .bind(last_seen)
                .execute(&self.pool)
                .await
                .map_err(db_err("upsert profiles"))?;
            }
            (false, _) => {
                sqlx::query(
                    "INSERT INTO player_profile (run_id, player_id, name, name_lc, last_seen) \
                     SELECT $1, t.player_id, t.name, t.name_lc, t.last_seen \
                     FROM UNNEST($2::uuid[], $3::text[], $4::text[], $5::timestamptz[]) \
                       AS t(player_id, name, name_lc, last_seen) \
                     ON CONFLICT (run_id, player_id) DO UPDATE SET \
                       name = EXCLUDED.name, name_lc = EXCLUDED.name_lc, \
                       last_seen = EXCLUDED.last_seen",
                )
                .bind(run_id)
                .bind(players)
                .bind(names)
                .bind(names_lc)
                .bind(last_seen)
                .execute(&self.pool)
                .await
                .map_err(db_err("upsert profiles"))?;
            }
        }
        Ok(())
    }

    #[instrument(skip(self, changed, stats, metrics))]
    async fn write_changed_batch(
        &self,
        run_id: i64,
        changed: Vec<Uuid>,
        stats: Vec<StatsRow>,
        metrics: Vec<MetricValueRow>,
    ) -> Result<(), ImportError> {
        if changed.is_empty() {
            return Ok(());
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_err("begin changed-batch transaction"))?;

        // Old metric rows go first so metrics that dropped to zero are not
        // left behind by the sparse insert below.
        sqlx::query("DELETE FROM metric_value WHERE run_id = $1 AND player_id = ANY($2)")
            .bind(run_id)
            .bind(&changed)
            .execute(&mut *tx)
            .await
            .map_err(db_err("delete stale metric values"))?;

        if !stats.is_empty() {
            let players: Vec<Uuid> = stats.iter().map(|row| row.player).collect();
            let payloads: Vec<Vec<u8>> = stats.iter().map(|row| row.payload_gz.clone()).collect();
            let digests: Vec<Vec<u8>> = stats.iter().map(|row| row.digest.to_vec()).collect();
            let updated: Vec<DateTime<Utc>> = stats.iter().map(|row| row.updated_at).collect();

            sqlx::query(
                "INSERT INTO player_stats (run_id, player_id, payload_gz, digest, updated_at) \
                 SELECT $1, t.player_id, t.payload_gz, t.digest, t.updated_at \
                 FROM UNNEST($2::uuid[], $3::bytea[], $4::bytea[], $5::timestamptz[]) \
                   AS t(player_id, payload_gz, digest, updated_at) \
                 ON CONFLICT (run_id, player_id) DO UPDATE SET \
                   payload_gz = EXCLUDED.payload_gz, digest = EXCLUDED.digest, \
                   updated_at = EXCLUDED.updated_at",
            )
            .bind(run_id)
            .bind(players)
            .bind(payloads)
            .bind(digests)
            .bind(updated)
            .execute(&mut *tx)
            .await
            .map_err(db_err("upsert stats snapshots"))?;
        }

        if !metrics.is_empty() {
            let metric_ids: Vec<String> = metrics.iter().map(|row| row.metric_id.clone()).collect();
            let players: Vec<Uuid> = metrics.iter().map(|row| row.player).collect();
            let values: Vec<i64> = metrics.iter().map(|row| row.value).collect();

            sqlx::query(
                "INSERT INTO metric_value (run_id, metric_id, player_id, value) \
                 SELECT $1, t.metric_id, t.player_id, t.value \
                 FROM UNNEST($2::text[], $3::uuid[], $4::bigint[]) AS t(metric_id, player_id, value) \
                 ON CONFLICT (run_id, metric_id, player_id) DO UPDATE SET value = EXCLUDED.value",
            )
            .bind(run_id)
            .bind(metric_ids)
            .bind(players)
            .bind(values)
            .execute(&mut *tx)
            .await
            .map_err(db_err("insert metric values"))?;
        }

        tx.commit()
            .await
            .map_err(db_err("commit changed-batch transaction"))?;
        Ok(())
    }

    #[instrument(skip(self, def))]
    async fn ensure_metric(&self, def: &MetricDef) -> Result<(), ImportError> {
        sqlx::query(
            "INSERT INTO metric_def (id, label, category, unit, sort_order, enabled) \
             VALUES ($1, $2, $3, $4, $5, $6) ON CONFLICT (id) DO NOTHING",
        )
        .bind(&def.id)
        .bind(&def.label)
        .bind(&def.category)
        .bind(&def.unit)
        .bind(def.sort_order)
        .bind(def.enabled)
        .execute(&self.pool)
        .await
        .map_err(db_err("ensure metric definition"))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_metric_values(
        &self,
        run_id: i64,
        metric_id: &str,
    ) -> Result<(), ImportError> {
        sqlx::query("DELETE FROM metric_value WHERE run_id = $1 AND metric_id = $2")
            .bind(run_id)
            .bind(metric_id)
            .execute(&self.pool)
            .await
            .map_err(db_err("delete metric values"))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn top_metric_values(
        &self,
        run_id: i64,
        metric_id: &str,
        limit: i64,
    ) -> Result<Vec<(Uuid, i64)>, ImportError> {
        let rows = sqlx::query(
            "SELECT player_id, value FROM metric_value \
             WHERE run_id = $1 AND metric_id = $2 AND value > 0 \
             ORDER BY value DESC, player_id ASC LIMIT $3",
        )
        .bind(run_id)
        .bind(metric_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("load top metric values"))?;

        Ok(rows
            .into_iter()
            .map(|row| (row.get("player_id"), row.get("value")))
            .collect())
    }

    #[instrument(skip(self, rows))]
    async fn insert_metric_values(
        &self,
        run_id: i64,
        rows: Vec<MetricValueRow>,
    ) -> Result<(), ImportError> {
        if rows.is_empty() {
            return Ok(());
        }
        let metric_ids: Vec<String> = rows.iter().map(|row| row.metric_id.clone()).collect();
        let players: Vec<Uuid> = rows.iter().map(|row| row.player).collect();
        let values: Vec<i64> = rows.iter().map(|row| row.value).collect();

        sqlx::query(
            "INSERT INTO metric_value (run_id, metric_id, player_id, value) \
             SELECT $1, t.metric_id, t.player_id, t.value \
             FROM UNNEST($2::text[], $3::uuid[], $4::bigint[]) AS t(metric_id, player_id, value) \
             ON CONFLICT (run_id, metric_id, player_id) DO UPDATE SET value = EXCLUDED.value",
        )
        .bind(run_id)
        .bind(metric_ids)
        .bind(players)
        .bind(values)
        .execute(&self.pool)
        .await
        .map_err(db_err("insert metric values"))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn supports_awards(&self) -> Result<bool, ImportError> {
        let exists: Option<i32> = sqlx::query_scalar(
            "SELECT 1 FROM information_schema.tables \
             WHERE table_schema = current_schema() AND table_name = 'metric_award' LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("probe award table"))?;
        Ok(exists.is_some())
    }

    #[instrument(skip(self))]
    async fn clear_awards(&self, run_id: i64) -> Result<(), ImportError> {
        sqlx::query("DELETE FROM metric_award WHERE run_id = $1")
            .bind(run_id)
            .execute(&self.pool)
            .await
            .map_err(db_err("clear awards"))?;
        Ok(())
    }

    #[instrument(skip(self, rows))]
    async fn insert_awards(&self, run_id: i64, rows: Vec<AwardRow>) -> Result<(), ImportError> {
        if rows.is_empty() {
            return Ok(());
        }
        let metric_ids: Vec<String> = rows.iter().map(|row| row.metric_id.clone()).collect();
        let places: Vec<i32> = rows.iter().map(|row| row.place).collect();
        let players: Vec<Uuid> = rows.iter().map(|row| row.player).collect();
        let points: Vec<i64> = rows.iter().map(|row| row.points).collect();
        let values: Vec<i64> = rows.iter().map(|row| row.value).collect();

        sqlx::query(
            "INSERT INTO metric_award (run_id, metric_id, place, player_id, points, value) \
             SELECT $1, t.metric_id, t.place, t.player_id, t.points, t.value \
             FROM UNNEST($2::text[], $3::int[], $4::uuid[], $5::bigint[], $6::bigint[]) \
               AS t(metric_id, place, player_id, points, value)",
        )
        .bind(run_id)
        .bind(metric_ids)
        .bind(places)
        .bind(players)
        .bind(points)
        .bind(values)
        .execute(&self.pool)
        .await
        .map_err(db_err("insert awards"))?;
        Ok(())
    }
}
