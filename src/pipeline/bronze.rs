//! Reshape raw trip rows into the typed, fixed-schema bronze table.

use chrono::{NaiveDate, NaiveTime};
use sqlx::postgres::PgPool;
use sqlx::Executor;
use tracing::info;

use crate::db::ident::quote_identifier;
use crate::error::{ServiceError, ServiceResult};

use super::{placeholder_groups, rows_per_batch};

/// The shared bronze sink. Every transformed upload appends here; there is no
/// provenance column, so rows from different uploads merge indistinguishably.
pub const BRONZE_TABLE: &str = "bronze_trips";

const BRONZE_COLUMNS: usize = 8;

/// One parsed trip.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct BronzeTrip {
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub origin_latitude: f64,
    pub origin_longitude: f64,
    pub destination_latitude: f64,
    pub destination_longitude: f64,
    pub region: String,
    pub datasource: String,
}

/// The decomposition SELECT against a raw table.
///
/// `datetime` holds `"YYYY-MM-DD HH:MM:SS"` and splits on the first space;
/// the coordinate columns hold WKT-like `"POINT (lat lon)"` text, so the
/// piece after `(` splits on the space and sheds the trailing `)`. A row
/// that does not match these shapes fails the casts and aborts the whole
/// transform.
fn transform_query(raw_table: &str) -> ServiceResult<String> {
    let table = quote_identifier(raw_table)?;
    Ok(format!(
        "SELECT \
            CAST(SPLIT_PART(datetime, ' ', 1) AS DATE) AS date, \
            CAST(SPLIT_PART(datetime, ' ', 2) AS TIME) AS time, \
            CAST(BTRIM(SPLIT_PART(SPLIT_PART(origin_coord, '(', 2), ' ', 1)) AS DOUBLE PRECISION) AS origin_latitude, \
            CAST(BTRIM(SPLIT_PART(SPLIT_PART(origin_coord, '(', 2), ' ', 2), ' )') AS DOUBLE PRECISION) AS origin_longitude, \
            CAST(BTRIM(SPLIT_PART(SPLIT_PART(destination_coord, '(', 2), ' ', 1)) AS DOUBLE PRECISION) AS destination_latitude, \
            CAST(BTRIM(SPLIT_PART(SPLIT_PART(destination_coord, '(', 2), ' ', 2), ' )') AS DOUBLE PRECISION) AS destination_longitude, \
            UPPER(region) AS region, \
            UPPER(datasource) AS datasource \
        FROM {table}"
    ))
}

/// Create the bronze table if absent. Never drops.
pub async fn ensure_bronze_table(pool: &PgPool) -> ServiceResult<()> {
    let stmt = format!(
        "CREATE TABLE IF NOT EXISTS {BRONZE_TABLE} (\
            date DATE, \
            time TIME, \
            origin_latitude DOUBLE PRECISION, \
            origin_longitude DOUBLE PRECISION, \
            destination_latitude DOUBLE PRECISION, \
            destination_longitude DOUBLE PRECISION, \
            region TEXT, \
            datasource TEXT\
        )"
    );
    pool.execute(stmt.as_str())
        .await
        .map_err(|e| ServiceError::schema(format!("creating table `{BRONZE_TABLE}`: {e}")))?;
    Ok(())
}

/// Read every row of `raw_table`, parse it, and append the result to the
/// bronze table.
///
/// The raw read is a snapshot on one database, the bronze write a single
/// transaction on another; the write is all-or-nothing, but nothing
/// coordinates the two databases. Returns the number of rows appended.
pub async fn transform_to_bronze(
    raw_pool: &PgPool,
    raw_table: &str,
    bronze_pool: &PgPool,
) -> ServiceResult<u64> {
    let select = transform_query(raw_table)?;
    let trips: Vec<BronzeTrip> = sqlx::query_as(&select)
        .fetch_all(raw_pool)
        .await
        .map_err(|e| {
            ServiceError::Transform(format!("decomposing rows from `{raw_table}`: {e}"))
        })?;

    ensure_bronze_table(bronze_pool).await?;

    if trips.is_empty() {
        info!(table = raw_table, "no rows to transform");
        return Ok(0);
    }

    let mut tx = bronze_pool.begin().await?;
    let mut total = 0u64;
    for chunk in trips.chunks(rows_per_batch(BRONZE_COLUMNS)) {
        let sql = format!(
            "INSERT INTO {BRONZE_TABLE} (\
                date, time, origin_latitude, origin_longitude, \
                destination_latitude, destination_longitude, region, datasource\
            ) VALUES {}",
            placeholder_groups(chunk.len(), BRONZE_COLUMNS)
        );
        let mut query = sqlx::query(&sql);
        for trip in chunk {
            query = query
                .bind(trip.date)
                .bind(trip.time)
                .bind(trip.origin_latitude)
                .bind(trip.origin_longitude)
                .bind(trip.destination_latitude)
                .bind(trip.destination_longitude)
                .bind(trip.region.as_str())
                .bind(trip.datasource.as_str());
        }
        total += query.execute(&mut *tx).await?.rows_affected();
    }
    tx.commit().await?;

    info!(table = raw_table, rows = total, "bronze transform complete");
    Ok(total)
}
