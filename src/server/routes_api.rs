use crate::download::{run_with_fallback, strategy_chain};
use crate::error::Error;
use crate::probe;
use crate::server::AppContext;
use crate::state::{Job, JobStatus};
use crate::validate;
use axum::body::Body;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::io::ReaderStream;
use uuid::Uuid;

pub fn api_routes() -> Router<AppContext> {
    Router::new()
        .route("/probe", post(probe_formats))
        .route("/download", post(start_download))
        .route("/jobs", get(list_jobs))
        .route("/jobs/:id", get(get_job))
        .route("/jobs/:id/file", get(fetch_file))
        .route("/jobs/:id/cancel", post(cancel_job))
}

#[derive(Deserialize)]
struct ProbeRequest {
    url: String,
}

async fn probe_formats(
    State(ctx): State<AppContext>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(payload): Json<ProbeRequest>,
) -> Result<Json<probe::ProbeReport>, Error> {
    ctx.limiter.check(addr.ip())?;
    let url = validate::validate_url(&payload.url, &ctx.config.security.allowed_domains)?;

    let chain = strategy_chain(&ctx.config.paths.cookies_dir);
    let extractor = Arc::clone(&ctx.extractor);
    let target = url.to_string();

    let metadata = tokio::task::spawn_blocking(move || {
        run_with_fallback(&chain, |strategy| extractor.probe(&target, strategy))
    })
    .await
    .map_err(|e| Error::extraction(e.to_string()))?
    .map_err(|e| Error::extraction(e.to_string()))?;

    Ok(Json(probe::build_report(metadata)))
}

#[derive(Deserialize)]
struct DownloadRequest {
    url: String,
    fmt: String,
}

#[derive(Serialize)]
struct DownloadResponse {
    job_id: Uuid,
    status: JobStatus,
}

async fn start_download(
    State(ctx): State<AppContext>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(payload): Json<DownloadRequest>,
) -> Result<Json<DownloadResponse>, Error> {
    ctx.limiter.check(addr.ip())?;
    let url = validate::validate_request(
        &payload.url,
        &payload.fmt,
        &ctx.config.security.allowed_domains,
    )?;

    let job_id = Uuid::new_v4();
    let job = ctx.store.create(job_id);
    ctx.runner.spawn(job_id, url.to_string(), payload.fmt);
    tracing::info!(%job_id, url = %url, "download accepted");

    Ok(Json(DownloadResponse {
        job_id,
        status: job.status,
    }))
}

async fn list_jobs(State(ctx): State<AppContext>) -> Json<Vec<Job>> {
    let mut jobs = ctx.store.list();
    jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Json(jobs)
}

async fn get_job(State(ctx): State<AppContext>, Path(id): Path<Uuid>) -> Result<Json<Job>, Error> {
    ctx.store
        .get(id)
        .map(Json)
        .ok_or_else(|| Error::not_found(format!("job {id}")))
}

/// Stream the finished file to the client. A grace period after the first
/// successful fetch gives retries and parallel observers a window before
/// the job and its scratch directory are reclaimed.
async fn fetch_file(
    State(ctx): State<AppContext>,
    Path(id): Path<Uuid>,
) -> Result<Response, Error> {
    let job = ctx
        .store
        .get(id)
        .ok_or_else(|| Error::not_found(format!("job {id}")))?;

    if job.status != JobStatus::Finished {
        return Err(Error::not_ready(format!(
            "job {id} is {} and has no file yet",
            job.status
        )));
    }
    let result = job
        .result
        .ok_or_else(|| Error::not_ready(format!("job {id} has no recorded output")))?;

    let file = tokio::fs::File::open(&result.file_path)
        .await
        .map_err(|_| Error::missing_file(result.file_path.clone()))?;
    let length = file.metadata().await?.len();

    let grace = Duration::from_secs(ctx.config.limits.fetch_grace_secs);
    let store = Arc::clone(&ctx.store);
    tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        tracing::debug!(%id, "fetch grace period over, removing job");
        store.remove(id);
    });

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(content_type_for(&result.file_name)),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    let disposition = format!(
        "attachment; filename=\"{}\"",
        sanitize_filename::sanitize(&result.file_name)
    );
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&disposition)
            .unwrap_or_else(|_| HeaderValue::from_static("attachment")),
    );

    let body = Body::from_stream(ReaderStream::new(file));
    Ok((StatusCode::OK, headers, body).into_response())
}

async fn cancel_job(
    State(ctx): State<AppContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<Job>, Error> {
    if ctx.store.get(id).is_none() {
        return Err(Error::not_found(format!("job {id}")));
    }

    let cancelled = ctx.runner.cancel(id);
    if cancelled {
        tracing::info!(%id, "job cancelled by client");
    }
    // Already-terminal jobs report their final state unchanged.
    ctx.store
        .get(id)
        .map(Json)
        .ok_or_else(|| Error::not_found(format!("job {id}")))
}

fn content_type_for(file_name: &str) -> &'static str {
    match std::path::Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
    {
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        Some("mkv") => "video/x-matroska",
        Some("m4a") => "audio/mp4",
        Some("mp3") => "audio/mpeg",
        _ => "application/octet-stream",
    }
}
