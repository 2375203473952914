use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::Serialize;
use serde_json::{json, Value};

use crate::auth::AuthContext;
use crate::error::AppError;
use crate::models::file::ListingQuery;
use crate::services::access::{AccessMode, Served};
use crate::state::AppState;

const ACCESS_MODE_HEADER: &str = "x-access-mode";
const FALLBACK_HEADER: &str = "x-access-fallback";

fn parse_mode(raw: &str) -> Result<AccessMode, AppError> {
    raw.parse().map_err(AppError::BadRequest)
}

fn require_id(raw: &str, what: &str) -> Result<(), AppError> {
    if raw.trim().is_empty() {
        return Err(AppError::BadRequest(format!("{} is required", what)));
    }
    Ok(())
}

/// Headers reporting which mode answered, so degraded responses are visible.
fn served_headers<T>(served: &Served<T>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCESS_MODE_HEADER,
        HeaderValue::from_static(served.mode.as_str()),
    );
    if served.fell_back {
        headers.insert(FALLBACK_HEADER, HeaderValue::from_static("true"));
    }
    headers
}

fn envelope<T: Serialize>(served: Served<T>) -> (HeaderMap, Json<Value>) {
    let headers = served_headers(&served);
    (headers, Json(json!({ "data": served.value, "error": null })))
}

pub async fn listing(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path((mode, folder_id)): Path<(String, String)>,
    Query(query): Query<ListingQuery>,
) -> Result<(HeaderMap, Json<Value>), AppError> {
    let mode = parse_mode(&mode)?;
    require_id(&folder_id, "Folder id")?;
    let credentials = auth.credentials_for(mode)?;

    let search = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty());
    let cursor = query.cursor.as_deref().filter(|c| !c.is_empty());

    let served = state
        .access
        .fetch_listing(&folder_id, mode, credentials.as_ref(), search, cursor)
        .await?;

    tracing::info!(
        folder_id = %folder_id,
        mode = %served.mode,
        fell_back = served.fell_back,
        files = served.value.files.len(),
        "Listing served"
    );
    Ok(envelope(served))
}

pub async fn detail(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path((mode, file_id)): Path<(String, String)>,
) -> Result<(HeaderMap, Json<Value>), AppError> {
    let mode = parse_mode(&mode)?;
    require_id(&file_id, "File id")?;
    let credentials = auth.credentials_for(mode)?;

    let served = state
        .access
        .fetch_detail(&file_id, mode, credentials.as_ref())
        .await?;
    Ok(envelope(served))
}

pub async fn path(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path((mode, folder_id)): Path<(String, String)>,
) -> Result<Json<Value>, AppError> {
    let mode = parse_mode(&mode)?;
    require_id(&folder_id, "Folder id")?;
    let credentials = auth.credentials_for(mode)?;

    let path = state
        .breadcrumbs
        .resolve_path(&folder_id, mode, credentials.as_ref())
        .await;

    Ok(Json(json!({ "data": path, "error": null })))
}

/// Pipes the provider's bytes through unchanged.
pub async fn content(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path((mode, file_id)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let mode = parse_mode(&mode)?;
    require_id(&file_id, "File id")?;
    let credentials = auth.credentials_for(mode)?;

    let served = state
        .access
        .fetch_content(&file_id, mode, credentials.as_ref())
        .await?;
    let headers = served_headers(&served);
    let stream = served.value;

    let mut builder = Response::builder().status(StatusCode::OK).header(
        header::CONTENT_TYPE,
        stream
            .content_type
            .as_deref()
            .unwrap_or("application/octet-stream"),
    );
    if let Some(len) = stream.content_length {
        builder = builder.header(header::CONTENT_LENGTH, len);
    }

    let mut response = builder
        .body(Body::from_stream(stream.body))
        .map_err(|e| AppError::Internal(format!("Failed to build content response: {}", e)))?;
    response.headers_mut().extend(headers);

    tracing::info!(file_id = %file_id, mode = %served.mode, "Content stream opened");
    Ok(response.into_response())
}
