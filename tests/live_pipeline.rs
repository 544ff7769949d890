//! Live-database integration tests.
//!
//! These need a reachable PostgreSQL configured through the same environment
//! variables as the service (`DB_HOST`, `DB_PORT`, `DB_USER`, `DB_PASSWORD`,
//! ...). They are ignored by default; run with `cargo test -- --ignored`.

use std::io::Write;

use chrono::{NaiveDate, NaiveTime};
use tempfile::NamedTempFile;

use tripsink::config::{Config, DbConfig};
use tripsink::db::{self, PoolRegistry};
use tripsink::pipeline::bronze::{self, BronzeTrip, BRONZE_TABLE};
use tripsink::pipeline::{raw, silver};

fn live_config() -> DbConfig {
    dotenvy::dotenv().ok();
    Config::from_env()
        .expect("live tests need DB_* environment variables")
        .db
}

fn csv_file(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[tokio::test]
#[ignore]
async fn ensure_database_is_idempotent() {
    let cfg = live_config();
    db::ensure_database(&cfg, "tripsink_live_idempotence")
        .await
        .unwrap();
    // Second call must be a no-op, not an error.
    db::ensure_database(&cfg, "tripsink_live_idempotence")
        .await
        .unwrap();
}

#[tokio::test]
#[ignore]
async fn raw_load_round_trips_headers_and_rows() {
    let cfg = live_config();
    db::ensure_database(&cfg, &cfg.raw_database).await.unwrap();
    let pools = PoolRegistry::new(cfg.clone());
    let pool = pools.pool(&cfg.raw_database).await.unwrap();

    let file = csv_file("a,b,c\n1,2,3\nx,y,z\n");
    let loaded = raw::load_raw(&pool, file.path(), "live_raw_roundtrip", true)
        .await
        .unwrap();
    assert_eq!(loaded, 2);

    let rows: Vec<(String, String, String)> =
        sqlx::query_as("SELECT a, b, c FROM live_raw_roundtrip")
            .fetch_all(&pool)
            .await
            .unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.contains(&("1".into(), "2".into(), "3".into())));
    assert!(rows.contains(&("x".into(), "y".into(), "z".into())));
}

#[tokio::test]
#[ignore]
async fn header_only_csv_loads_an_empty_table() {
    let cfg = live_config();
    db::ensure_database(&cfg, &cfg.raw_database).await.unwrap();
    let pools = PoolRegistry::new(cfg.clone());
    let pool = pools.pool(&cfg.raw_database).await.unwrap();

    let file = csv_file("region,origin_coord,destination_coord,datetime,datasource\n");
    let loaded = raw::load_raw(&pool, file.path(), "live_raw_empty", true)
        .await
        .unwrap();
    assert_eq!(loaded, 0);

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM live_raw_empty")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 0);

    // No rows in, no rows out.
    db::ensure_database(&cfg, &cfg.bronze_database).await.unwrap();
    let bronze_pool = pools.pool(&cfg.bronze_database).await.unwrap();
    let transformed = bronze::transform_to_bronze(&pool, "live_raw_empty", &bronze_pool)
        .await
        .unwrap();
    assert_eq!(transformed, 0);
}

#[tokio::test]
#[ignore]
async fn a_short_row_fails_the_whole_load() {
    let cfg = live_config();
    db::ensure_database(&cfg, &cfg.raw_database).await.unwrap();
    let pools = PoolRegistry::new(cfg.clone());
    let pool = pools.pool(&cfg.raw_database).await.unwrap();

    let file = csv_file("a,b\n1,2\nonly_one_field\n");
    let result = raw::load_raw(&pool, file.path(), "live_raw_arity", true).await;
    assert!(result.is_err());

    // The create ran inside the rolled-back transaction, so the table must
    // not exist at all.
    let table: Option<String> =
        sqlx::query_scalar("SELECT to_regclass('live_raw_arity')::text")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert!(table.is_none());
}

#[tokio::test]
#[ignore]
async fn transform_parses_composite_columns() {
    let cfg = live_config();
    db::ensure_database(&cfg, &cfg.raw_database).await.unwrap();
    db::ensure_database(&cfg, &cfg.bronze_database).await.unwrap();
    let pools = PoolRegistry::new(cfg.clone());
    let raw_pool = pools.pool(&cfg.raw_database).await.unwrap();
    let bronze_pool = pools.pool(&cfg.bronze_database).await.unwrap();

    // Unique datasource marker so the assertion survives the shared sink.
    let file = csv_file(
        "region,origin_coord,destination_coord,datetime,datasource\n\
         north,POINT (10.5 20.5),POINT (30.1 40.2),2024-01-02 03:04:05,tripsink_live_parse\n",
    );
    raw::load_raw(&raw_pool, file.path(), "live_raw_parse", true)
        .await
        .unwrap();
    let transformed = bronze::transform_to_bronze(&raw_pool, "live_raw_parse", &bronze_pool)
        .await
        .unwrap();
    assert_eq!(transformed, 1);

    let rows: Vec<BronzeTrip> = sqlx::query_as(
        "SELECT date, time, origin_latitude, origin_longitude, \
                destination_latitude, destination_longitude, region, datasource \
         FROM bronze_trips WHERE datasource = $1",
    )
    .bind("TRIPSINK_LIVE_PARSE")
    .fetch_all(&bronze_pool)
    .await
    .unwrap();

    let expected = BronzeTrip {
        date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
        time: NaiveTime::from_hms_opt(3, 4, 5).unwrap(),
        origin_latitude: 10.5,
        origin_longitude: 20.5,
        destination_latitude: 30.1,
        destination_longitude: 40.2,
        region: "NORTH".into(),
        datasource: "TRIPSINK_LIVE_PARSE".into(),
    };
    assert!(!rows.is_empty());
    assert!(rows.iter().all(|row| *row == expected));
}

#[tokio::test]
#[ignore]
async fn end_to_end_upload_reflects_in_weekly_average() {
    let cfg = live_config();
    db::ensure_database(&cfg, &cfg.raw_database).await.unwrap();
    db::ensure_database(&cfg, &cfg.bronze_database).await.unwrap();
    db::ensure_database(&cfg, &cfg.silver_database).await.unwrap();
    let pools = PoolRegistry::new(cfg.clone());
    let raw_pool = pools.pool(&cfg.raw_database).await.unwrap();
    let bronze_pool = pools.pool(&cfg.bronze_database).await.unwrap();
    let silver_pool = pools.pool(&cfg.silver_database).await.unwrap();

    // Two trips in the same ISO week (Monday 2024-01-01).
    let file = csv_file(
        "region,origin_coord,destination_coord,datetime,datasource\n\
         east,POINT (1.0 2.0),POINT (3.0 4.0),2024-01-02 08:00:00,tripsink_live_e2e\n\
         east,POINT (5.0 6.0),POINT (7.0 8.0),2024-01-03 09:30:00,tripsink_live_e2e\n",
    );
    let loaded = raw::load_raw(&raw_pool, file.path(), "live_raw_e2e", true)
        .await
        .unwrap();
    assert_eq!(loaded, 2);
    let transformed = bronze::transform_to_bronze(&raw_pool, "live_raw_e2e", &bronze_pool)
        .await
        .unwrap();
    assert_eq!(transformed, 2);

    let averages = silver::fetch_weekly_averages(&bronze_pool, BRONZE_TABLE)
        .await
        .unwrap();
    let week = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    let bucket = averages.iter().find(|a| a.week_start == week);
    assert!(bucket.is_some(), "uploaded week missing from the aggregate");
    assert!(bucket.unwrap().weekly_avg_trips > 0.0);

    // Create mode persists the same aggregate into silver.
    let weeks = silver::materialize_weekly_averages(&bronze_pool, BRONZE_TABLE, &silver_pool)
        .await
        .unwrap();
    assert_eq!(weeks as usize, averages.len());

    let persisted: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM silver_weekly_avg")
        .fetch_one(&silver_pool)
        .await
        .unwrap();
    assert_eq!(persisted, weeks as i64);
}
