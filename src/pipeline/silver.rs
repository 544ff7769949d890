//! Weekly trip aggregates computed from bronze, served as JSON or persisted
//! into the silver layer.

use chrono::NaiveDate;
use serde::Serialize;
use sqlx::postgres::PgPool;
use sqlx::Executor;
use tracing::info;

use crate::db::ident::quote_identifier;
use crate::error::{ServiceError, ServiceResult};

use super::placeholder_groups;

/// The persisted aggregate table, replaced wholesale on every create-mode
/// call.
pub const SILVER_TABLE: &str = "silver_weekly_avg";

/// Row count for one calendar week (Monday-start, from `DATE_TRUNC`).
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct WeekBucket {
    pub week_start: NaiveDate,
    pub trips: i64,
}

/// One week's aggregate value as returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeeklyAverage {
    pub week_start: NaiveDate,
    pub weekly_avg_trips: f64,
}

fn week_buckets_query(table: &str) -> ServiceResult<String> {
    let table = quote_identifier(table)?;
    Ok(format!(
        "SELECT DATE_TRUNC('week', date)::date AS week_start, COUNT(*) AS trips \
         FROM {table} GROUP BY week_start ORDER BY week_start"
    ))
}

/// Divide each week's row count by the number of distinct weeks in the whole
/// result set.
///
/// The denominator is deliberately the whole-set distinct-week count, not a
/// per-week aggregate: computed inside the grouping it would always equal 1
/// and every "average" would just be the week's raw count.
pub fn weekly_averages(buckets: &[WeekBucket]) -> Vec<WeeklyAverage> {
    let distinct_weeks = buckets.len();
    if distinct_weeks == 0 {
        return Vec::new();
    }
    buckets
        .iter()
        .map(|b| WeeklyAverage {
            week_start: b.week_start,
            weekly_avg_trips: b.trips as f64 / distinct_weeks as f64,
        })
        .collect()
}

/// Fetch mode: the ordered weekly averages for `table`, straight from bronze.
pub async fn fetch_weekly_averages(
    bronze_pool: &PgPool,
    table: &str,
) -> ServiceResult<Vec<WeeklyAverage>> {
    let sql = week_buckets_query(table)?;
    let buckets: Vec<WeekBucket> = sqlx::query_as(&sql).fetch_all(bronze_pool).await?;
    Ok(weekly_averages(&buckets))
}

/// Create mode: recompute the aggregate and persist it as the silver table,
/// replacing any previous contents. Returns the number of weeks written.
pub async fn materialize_weekly_averages(
    bronze_pool: &PgPool,
    table: &str,
    silver_pool: &PgPool,
) -> ServiceResult<u64> {
    let averages = fetch_weekly_averages(bronze_pool, table).await?;

    let mut tx = silver_pool.begin().await?;
    let drop_stmt = format!("DROP TABLE IF EXISTS {SILVER_TABLE}");
    (&mut *tx).execute(drop_stmt.as_str()).await?;
    let create_stmt = format!(
        "CREATE TABLE {SILVER_TABLE} (\
            week_start DATE NOT NULL, \
            weekly_avg_trips DOUBLE PRECISION NOT NULL\
        )"
    );
    (&mut *tx)
        .execute(create_stmt.as_str())
        .await
        .map_err(|e| ServiceError::schema(format!("creating table `{SILVER_TABLE}`: {e}")))?;

    let mut total = 0u64;
    if !averages.is_empty() {
        let sql = format!(
            "INSERT INTO {SILVER_TABLE} (week_start, weekly_avg_trips) VALUES {}",
            placeholder_groups(averages.len(), 2)
        );
        let mut query = sqlx::query(&sql);
        for avg in &averages {
            query = query.bind(avg.week_start).bind(avg.weekly_avg_trips);
        }
        total = query.execute(&mut *tx).await?.rows_affected();
    }
    tx.commit().await?;

    info!(weeks = total, "silver table materialized");
    Ok(total)
}
