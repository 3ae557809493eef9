//! Import submission, staging cleanup and statistics endpoints.

use actix_multipart::Multipart;
use actix_web::http::{StatusCode, header};
use actix_web::{HttpResponse, delete, get, post, web};
use futures_util::StreamExt;
use serde::Deserialize;
use tracing::{info, warn};

use crate::auth::CallerIdentity;
use crate::db::{DbPool, import_stats};
use crate::error::{AppError, AppResult, ImportError};
use crate::models::Metadata;
use crate::services::{Acceptance, ImportPipeline, IncomingFile};

const DEFAULT_STATS_LIMIT: u64 = 50;
const MAX_STATS_LIMIT: u64 = 1000;
const MAX_TAG_BYTES: usize = 64 * 1024;

/// Consume the rest of a field so the next one can be read.
async fn drain_field(field: &mut actix_multipart::Field) {
    while let Some(chunk) = field.next().await {
        if chunk.is_err() {
            break;
        }
    }
}

async fn read_text_field(field: &mut actix_multipart::Field) -> AppResult<String> {
    let mut data = Vec::new();
    while let Some(chunk) = field.next().await {
        let chunk = chunk.map_err(|e| AppError::InvalidInput(format!("Read error: {}", e)))?;
        if data.len() + chunk.len() > MAX_TAG_BYTES {
            return Err(AppError::InvalidInput("Form field too large".to_string()));
        }
        data.extend_from_slice(&chunk);
    }
    String::from_utf8(data)
        .map(|v| v.trim().to_string())
        .map_err(|_| AppError::InvalidInput("Form fields must be UTF-8".to_string()))
}

fn rejection(status: StatusCode, reason: String) -> HttpResponse {
    HttpResponse::build(status).json(Acceptance {
        accepted: false,
        reason: Some(reason),
        files: Vec::new(),
    })
}

/// Accept an import request.
///
/// File fields are staged as they arrive; text fields become caller tags.
/// Returns 202 once at least one file is staged and queued. Progress and
/// outcomes are only reported on the event stream.
#[post("/imports")]
async fn submit_imports(
    identity: CallerIdentity,
    mut payload: Multipart,
    pipeline: web::Data<ImportPipeline>,
) -> AppResult<HttpResponse> {
    let caller = &identity.caller;
    let mut tags = Metadata::default();
    let mut staged = Vec::new();
    let mut last_error: Option<ImportError> = None;

    while let Some(item) = payload.next().await {
        let mut field =
            item.map_err(|e| AppError::InvalidInput(format!("Multipart error: {}", e)))?;

        let (field_name, file_name) = match field.content_disposition() {
            Some(cd) => (
                cd.get_name().map(str::to_string),
                cd.get_filename().map(str::to_string),
            ),
            None => {
                return Err(AppError::InvalidInput(
                    "Missing content disposition".to_string(),
                ));
            }
        };

        let Some(file_name) = file_name else {
            let value = read_text_field(&mut field).await?;
            if let Some(key) = field_name.filter(|k| !k.is_empty()) {
                tags.insert(key, value);
            }
            continue;
        };

        let declared_size = field
            .headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());

        let incoming = IncomingFile {
            name: file_name,
            declared_size,
            stream: &mut field,
        };
        match pipeline.stage_file(&caller.user, incoming).await {
            Ok(file) => staged.push(file),
            Err(e) => {
                drain_field(&mut field).await;
                last_error = Some(e);
            }
        }
    }

    if staged.is_empty() {
        return Ok(match last_error {
            Some(e @ ImportError::StagingIo { .. }) => {
                rejection(StatusCode::INSUFFICIENT_STORAGE, e.to_string())
            }
            Some(e) => rejection(StatusCode::BAD_REQUEST, e.to_string()),
            None => rejection(StatusCode::BAD_REQUEST, "No files in request".to_string()),
        });
    }

    let files = pipeline.submit(staged, tags, caller)?;
    info!(user = %caller.user, filesets = files.len(), "Import request accepted");

    Ok(HttpResponse::Accepted().json(Acceptance {
        accepted: true,
        reason: None,
        files,
    }))
}

/// Remove everything staged for the caller. Intended as a logout hook.
#[delete("/imports/uploads")]
async fn remove_uploads(
    identity: CallerIdentity,
    pipeline: web::Data<ImportPipeline>,
) -> AppResult<HttpResponse> {
    let removed = pipeline
        .remove_user_uploads(identity.user())
        .await
        .map_err(|e| {
            warn!(user = %identity.user(), error = %e, "Failed to remove staged uploads");
            AppError::Import(format!("Failed to remove staged uploads: {}", e))
        })?;

    Ok(HttpResponse::Ok().json(serde_json::json!({ "removed": removed })))
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    pub limit: Option<u64>,
}

/// Most recent import statistics rows.
#[get("/imports/stats")]
async fn list_stats(
    query: web::Query<StatsQuery>,
    pool: web::Data<DbPool>,
) -> AppResult<HttpResponse> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_STATS_LIMIT)
        .clamp(1, MAX_STATS_LIMIT);
    let rows = import_stats::list_import_stats(pool.connection(), limit).await?;
    Ok(HttpResponse::Ok().json(rows))
}

/// Routes that need only the pipeline.
pub fn configure_import_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(submit_imports).service(remove_uploads);
}

/// Routes backed by the stats table.
pub fn configure_stats_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(list_stats);
}
