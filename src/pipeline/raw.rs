//! First landing: load an uploaded CSV verbatim into an all-text table.

use std::path::Path;

use csv::ReaderBuilder;
use sqlx::postgres::PgPool;
use sqlx::{Executor, Postgres, Transaction};
use tracing::{debug, info};

use crate::db::ident::quote_identifier;
use crate::error::{ServiceError, ServiceResult};

use super::{placeholder_groups, rows_per_batch};

/// Load `csv_path` into `table_name`, one TEXT column per header.
///
/// With `overwrite` the table is dropped and recreated; without it rows
/// append to an existing table whose column set is assumed to match. The
/// whole load runs in one transaction, so a malformed row (wrong field
/// count, bad encoding) rolls everything back and nothing partial lands.
/// Returns the number of rows inserted.
pub async fn load_raw(
    pool: &PgPool,
    csv_path: &Path,
    table_name: &str,
    overwrite: bool,
) -> ServiceResult<u64> {
    let table = quote_identifier(table_name)?;

    let mut reader = ReaderBuilder::new().has_headers(true).from_path(csv_path)?;
    let headers: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();
    if headers.is_empty() || headers.iter().all(|h| h.is_empty()) {
        return Err(ServiceError::validation("CSV file has no header row"));
    }

    let columns: Vec<String> = headers
        .iter()
        .map(|h| quote_identifier(h))
        .collect::<ServiceResult<_>>()?;

    let mut tx = pool.begin().await?;

    if overwrite {
        let drop_stmt = format!("DROP TABLE IF EXISTS {table}");
        (&mut *tx).execute(drop_stmt.as_str()).await?;

        let column_defs = columns
            .iter()
            .map(|c| format!("{c} TEXT"))
            .collect::<Vec<_>>()
            .join(", ");
        let create_stmt = format!("CREATE TABLE {table} ({column_defs})");
        (&mut *tx)
            .execute(create_stmt.as_str())
            .await
            .map_err(|e| ServiceError::schema(format!("creating table `{table_name}`: {e}")))?;
        debug!(table = table_name, columns = headers.len(), "created raw table");
    }

    let batch_rows = rows_per_batch(columns.len());
    let mut buffer: Vec<Vec<String>> = Vec::with_capacity(batch_rows);
    let mut total = 0u64;

    for record in reader.records() {
        // Strict record length: a row whose arity differs from the header
        // errors here and aborts the transaction.
        let record = record?;
        buffer.push(record.iter().map(|f| f.to_string()).collect());
        if buffer.len() == batch_rows {
            total += insert_batch(&mut tx, &table, &columns, &buffer).await?;
            buffer.clear();
        }
    }
    if !buffer.is_empty() {
        total += insert_batch(&mut tx, &table, &columns, &buffer).await?;
    }

    tx.commit().await?;

    info!(table = table_name, rows = total, overwrite, "raw load complete");
    Ok(total)
}

async fn insert_batch(
    tx: &mut Transaction<'_, Postgres>,
    table: &str,
    columns: &[String],
    rows: &[Vec<String>],
) -> ServiceResult<u64> {
    let sql = format!(
        "INSERT INTO {table} ({}) VALUES {}",
        columns.join(", "),
        placeholder_groups(rows.len(), columns.len())
    );

    let mut query = sqlx::query(&sql);
    for row in rows {
        for field in row {
            query = query.bind(field.as_str());
        }
    }

    let result = query.execute(&mut **tx).await?;
    Ok(result.rows_affected())
}
