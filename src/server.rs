//! HTTP surface: upload, weekly aggregate, restart, health.
//!
//! Handlers sequence the pipeline components and translate [`ServiceError`]s
//! into JSON responses: validation failures as 400, everything else as 500.

use std::convert::Infallible;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use bytes::BufMut;
use futures_util::TryStreamExt;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use warp::http::StatusCode;
use warp::multipart::{FormData, Part};
use warp::{Filter, Rejection, Reply};

use crate::config::Config;
use crate::db::{self, ident, PoolRegistry};
use crate::error::{ServiceError, ServiceResult};
use crate::pipeline::{bronze, raw, silver};

const MAX_UPLOAD_BYTES: u64 = 50 * 1024 * 1024;

/// Shared per-process state handed to every handler.
pub struct AppState {
    pub config: Config,
    pub pools: PoolRegistry,
    shutdown: mpsc::Sender<()>,
}

impl AppState {
    pub fn new(config: Config, shutdown: mpsc::Sender<()>) -> Self {
        let pools = PoolRegistry::new(config.db.clone());
        AppState {
            config,
            pools,
            shutdown,
        }
    }
}

#[derive(Serialize)]
struct MessageResponse {
    message: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Serialize)]
struct DataResponse {
    data: Vec<silver::WeeklyAverage>,
}

#[derive(Debug, Deserialize)]
struct WeeklyAverageParams {
    create_db: Option<bool>,
    file_name: Option<String>,
}

/// All routes for the service.
pub fn routes(
    state: Arc<AppState>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let health = warp::path("health").and(warp::get()).and_then(health_check);

    let upload = warp::path("upload-csv")
        .and(warp::post())
        .and(warp::multipart::form().max_length(MAX_UPLOAD_BYTES))
        .and(with_state(state.clone()))
        .and_then(upload_csv);

    let weekly = warp::path("weekly-average-trips")
        .and(warp::get())
        .and(warp::query::<WeeklyAverageParams>())
        .and(with_state(state.clone()))
        .and_then(weekly_average_trips);

    let restart = warp::path("restart-server")
        .and(warp::post())
        .and(with_state(state))
        .and_then(restart_server);

    health.or(upload).or(weekly).or(restart)
}

fn with_state(
    state: Arc<AppState>,
) -> impl Filter<Extract = (Arc<AppState>,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

async fn health_check() -> Result<impl Reply, Rejection> {
    Ok(warp::reply::json(&serde_json::json!({
        "status": "healthy",
        "service": "tripsink"
    })))
}

async fn upload_csv(form: FormData, state: Arc<AppState>) -> Result<impl Reply, Rejection> {
    match handle_upload(form, &state).await {
        Ok(message) => Ok(message_reply(StatusCode::OK, message)),
        Err(err) => {
            error!(error = %err, "upload failed");
            Ok(error_reply(&err))
        }
    }
}

/// Upload pipeline: provision raw → load → provision bronze → transform →
/// provision silver. The buffered upload file is removed when the temp
/// handle drops, whatever the outcome.
async fn handle_upload(form: FormData, state: &AppState) -> ServiceResult<String> {
    let (file_name, body) = read_csv_part(form).await?;
    let table_name = ident::table_name_for(&file_name)?;

    let mut upload = NamedTempFile::new()?;
    upload.write_all(&body)?;

    let cfg = &state.config.db;

    db::ensure_database(cfg, &cfg.raw_database).await?;
    let raw_pool = state.pools.pool(&cfg.raw_database).await?;
    let loaded = raw::load_raw(&raw_pool, upload.path(), &table_name, true).await?;

    db::ensure_database(cfg, &cfg.bronze_database).await?;
    let bronze_pool = state.pools.pool(&cfg.bronze_database).await?;
    let transformed = bronze::transform_to_bronze(&raw_pool, &table_name, &bronze_pool).await?;

    db::ensure_database(cfg, &cfg.silver_database).await?;

    info!(
        table = %table_name,
        loaded,
        transformed,
        "file uploaded and ingested"
    );
    Ok("file uploaded and saved to database successfully".to_string())
}

/// Pull the `file` part out of the multipart body and buffer its bytes.
async fn read_csv_part(form: FormData) -> ServiceResult<(String, Vec<u8>)> {
    let parts: Vec<Part> = form
        .try_collect()
        .await
        .map_err(|e| ServiceError::validation(format!("malformed multipart body: {e}")))?;

    let part = parts
        .into_iter()
        .find(|p| p.name() == "file")
        .ok_or_else(|| ServiceError::validation("no file part"))?;

    let file_name = part.filename().unwrap_or("").to_string();
    if file_name.is_empty() {
        return Err(ServiceError::validation("no selected file"));
    }
    if !file_name.to_ascii_lowercase().ends_with(".csv") {
        return Err(ServiceError::validation(
            "invalid file format, expected a .csv upload",
        ));
    }

    let body = part
        .stream()
        .try_fold(Vec::new(), |mut acc, buf| async move {
            acc.put(buf);
            Ok(acc)
        })
        .await
        .map_err(|e| ServiceError::validation(format!("failed to read upload: {e}")))?;

    Ok((file_name, body))
}

async fn weekly_average_trips(
    params: WeeklyAverageParams,
    state: Arc<AppState>,
) -> Result<impl Reply, Rejection> {
    let file_name = match params.file_name.as_deref() {
        Some(name) if !name.is_empty() => name,
        _ => {
            return Ok(error_reply(&ServiceError::validation("missing file name")));
        }
    };
    // The aggregate always reads the shared bronze sink; file_name is
    // validated for interface compatibility but cannot select a source, as
    // bronze rows carry no provenance.
    if let Err(err) = ident::table_name_for(file_name) {
        return Ok(error_reply(&err));
    }

    let create_db = params.create_db.unwrap_or(true);
    if create_db {
        match handle_materialize(&state).await {
            Ok(weeks) => {
                info!(weeks, "silver table created from bronze");
                Ok(message_reply(
                    StatusCode::OK,
                    "silver table created from bronze table successfully".to_string(),
                ))
            }
            Err(err) => {
                error!(error = %err, "silver materialization failed");
                Ok(error_reply(&err))
            }
        }
    } else {
        match handle_fetch(&state).await {
            Ok(data) => Ok(warp::reply::with_status(
                warp::reply::json(&DataResponse { data }),
                StatusCode::OK,
            )),
            Err(err) => {
                error!(error = %err, "weekly average fetch failed");
                Ok(error_reply(&err))
            }
        }
    }
}

async fn handle_materialize(state: &AppState) -> ServiceResult<u64> {
    let cfg = &state.config.db;
    db::ensure_database(cfg, &cfg.silver_database).await?;
    let bronze_pool = state.pools.pool(&cfg.bronze_database).await?;
    let silver_pool = state.pools.pool(&cfg.silver_database).await?;
    silver::materialize_weekly_averages(&bronze_pool, bronze::BRONZE_TABLE, &silver_pool).await
}

async fn handle_fetch(state: &AppState) -> ServiceResult<Vec<silver::WeeklyAverage>> {
    let cfg = &state.config.db;
    let bronze_pool = state.pools.pool(&cfg.bronze_database).await?;
    silver::fetch_weekly_averages(&bronze_pool, bronze::BRONZE_TABLE).await
}

/// Feed the graceful-shutdown channel after a short delay so the response is
/// on the wire first. The supervisor owns the actual restart; the process
/// never signals itself.
async fn restart_server(state: Arc<AppState>) -> Result<impl Reply, Rejection> {
    let shutdown = state.shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        if shutdown.send(()).await.is_err() {
            warn!("shutdown channel closed before restart could trigger");
        }
    });

    info!("restart requested, draining in-flight requests");
    Ok(message_reply(
        StatusCode::OK,
        "server restarting...".to_string(),
    ))
}

fn message_reply(
    status: StatusCode,
    message: String,
) -> warp::reply::WithStatus<warp::reply::Json> {
    warp::reply::with_status(warp::reply::json(&MessageResponse { message }), status)
}

fn error_reply(err: &ServiceError) -> warp::reply::WithStatus<warp::reply::Json> {
    warp::reply::with_status(
        warp::reply::json(&ErrorResponse {
            error: err.to_string(),
        }),
        err.status(),
    )
}
