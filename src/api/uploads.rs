/// File upload and serving endpoints
use crate::{
    admin::{ActivityAction, ActivityEntry},
    auth::AuthContext,
    context::AppContext,
    error::{PortalError, PortalResult},
    upload_store::{UploadPurpose, UploadResponse},
};
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;

/// Multipart framing allowance on top of the file size limit
const MULTIPART_OVERHEAD: usize = 64 * 1024;

const IMMUTABLE: &str = "public, max-age=31536000, immutable";

/// Build upload routes
pub fn routes(upload_limit: usize) -> Router<AppContext> {
    Router::new()
        .route(
            "/api/uploads",
            post(upload_file).layer(DefaultBodyLimit::max(upload_limit + MULTIPART_OVERHEAD)),
        )
        .route("/api/uploads/:id", get(get_upload).delete(delete_upload))
}

/// Store a multipart upload with `file` and `purpose` fields
async fn upload_file(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    mut multipart: Multipart,
) -> PortalResult<(StatusCode, Json<UploadResponse>)> {
    let mut file: Option<(String, Option<String>, Vec<u8>)> = None;
    let mut purpose = UploadPurpose::Document;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| PortalError::Upload(format!("Malformed multipart body: {}", e)))?
    {
        match field.name() {
            Some("file") => {
                let name = field.file_name().unwrap_or("file").to_string();
                let mime = field.content_type().map(str::to_string);
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| PortalError::Upload(format!("Failed to read file: {}", e)))?;
                file = Some((name, mime, data.to_vec()));
            }
            Some("purpose") => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| PortalError::Upload(format!("Failed to read purpose: {}", e)))?;
                purpose = UploadPurpose::from_str(value.trim())?;
            }
            _ => {}
        }
    }

    let (name, mime, data) =
        file.ok_or_else(|| PortalError::Validation("Missing file field".to_string()))?;

    let upload = ctx
        .upload_store
        .store(auth.user_id(), &name, mime.as_deref(), data, purpose)
        .await?;

    ctx.activity
        .record(
            ActivityEntry::new(ActivityAction::UploadCreate)
                .user(auth.user_id())
                .entity("upload", &upload.id)
                .details(json!({
                    "purpose": upload.purpose.as_str(),
                    "mimeType": upload.mime_type,
                    "size": upload.size,
                }))
                .ip(auth.ip.clone()),
        )
        .await;

    Ok((StatusCode::CREATED, Json(upload.into())))
}

fn header_value(value: &str) -> PortalResult<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| PortalError::Internal(format!("Invalid header value: {}", e)))
}

/// Serve an upload with caching and single-range support
async fn get_upload(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> PortalResult<Response> {
    let (upload, data) = ctx.upload_store.get(&id).await?;
    let total_size = data.len();
    let etag = upload.etag();

    let mut response_headers = HeaderMap::new();
    response_headers.insert(header::ETAG, header_value(&etag)?);
    response_headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(IMMUTABLE));

    // Content is addressed by hash, so a matching ETag means nothing changed
    let not_modified = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.split(',').any(|tag| tag.trim() == etag || tag.trim() == "*"));
    if not_modified {
        return Ok((StatusCode::NOT_MODIFIED, response_headers).into_response());
    }

    response_headers.insert(header::CONTENT_TYPE, header_value(&upload.mime_type)?);
    response_headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    response_headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    let disposition = if upload.is_image() { "inline" } else { "attachment" };
    let file_name = upload.original_name.replace(['"', '\\'], "_");
    response_headers.insert(
        header::CONTENT_DISPOSITION,
        header_value(&format!(
            "{}; filename=\"{}\"",
            disposition,
            urlencoding::encode(&file_name)
        ))?,
    );

    if let Some(range) = headers.get(header::RANGE).and_then(|v| v.to_str().ok()) {
        let Some((start, end)) = parse_range(range, total_size) else {
            response_headers.insert(
                header::CONTENT_RANGE,
                header_value(&format!("bytes */{}", total_size))?,
            );
            return Ok((StatusCode::RANGE_NOT_SATISFIABLE, response_headers).into_response());
        };

        response_headers.insert(
            header::CONTENT_RANGE,
            header_value(&format!("bytes {}-{}/{}", start, end, total_size))?,
        );
        let partial = data[start..=end].to_vec();
        return Ok((StatusCode::PARTIAL_CONTENT, response_headers, partial).into_response());
    }

    Ok((StatusCode::OK, response_headers, data).into_response())
}

async fn delete_upload(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(id): Path<String>,
) -> PortalResult<StatusCode> {
    let upload = ctx.upload_store.delete(&id, &auth.account).await?;

    ctx.activity
        .record(
            ActivityEntry::new(ActivityAction::UploadDelete)
                .user(auth.user_id())
                .entity("upload", &upload.id)
                .details(json!({ "ownerId": upload.owner_id }))
                .ip(auth.ip.clone()),
        )
        .await;

    Ok(StatusCode::NO_CONTENT)
}

/// Parse a single-range `Range` header
///
/// Returns inclusive (start, end) byte positions, or None if the range is
/// malformed, multi-part or unsatisfiable.
fn parse_range(range_header: &str, total_size: usize) -> Option<(usize, usize)> {
    let spec = range_header.trim().strip_prefix("bytes=")?;
    if total_size == 0 || spec.contains(',') {
        return None;
    }

    let (start_str, end_str) = spec.split_once('-')?;
    let (start_str, end_str) = (start_str.trim(), end_str.trim());

    if start_str.is_empty() {
        // Suffix range: last N bytes
        let suffix = end_str.parse::<usize>().ok().filter(|n| *n > 0)?;
        return Some((total_size.saturating_sub(suffix), total_size - 1));
    }

    let start = start_str.parse::<usize>().ok().filter(|s| *s < total_size)?;
    let end = if end_str.is_empty() {
        total_size - 1
    } else {
        end_str.parse::<usize>().ok()?.min(total_size - 1)
    };

    (start <= end).then_some((start, end))
}
