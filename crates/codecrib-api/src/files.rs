use axum::{
    Extension, Json,
    body::Bytes,
    extract::{FromRequest, Path, Query, Request, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::warn;

use codecrib_gateway::manifest::AttachRequest;
use codecrib_types::api::{Claims, FileContentResponse, FileReference, FileResponse};

use crate::AppState;
use crate::error::reject;
use crate::form::{Form, is_json, is_multipart};

#[derive(Debug, Default, Deserialize)]
pub struct AttachQuery {
    pub name: Option<String>,
    pub ext: Option<String>,
}

/// POST /api/rooms/{room_id}/files accepts three body shapes:
/// - `multipart/form-data` with a `file` part and optional `fileName`,
///   `fileExt` and `lines` fields (no `file` part attaches by reference)
/// - JSON, registering a file by reference
/// - anything else, uploaded as the file's content, named by `?name=`
pub async fn attach_file(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Query(query): Query<AttachQuery>,
    request: Request,
) -> Result<impl IntoResponse, StatusCode> {
    let req = if is_multipart(request.headers()) {
        attach_from_form(Form::read(request, "file").await?, query)?
    } else if is_json(request.headers()) {
        let body = Bytes::from_request(request, &()).await.map_err(|e| e.status())?;
        let reference: FileReference = serde_json::from_slice(&body).map_err(|e| {
            warn!("Bad file reference for room {}: {}", room_id, e);
            StatusCode::BAD_REQUEST
        })?;
        AttachRequest {
            content: None,
            name: reference.file_name,
            ext: reference.file_ext,
            lines: reference.lines,
        }
    } else {
        let body = Bytes::from_request(request, &()).await.map_err(|e| e.status())?;
        AttachRequest {
            content: (!body.is_empty()).then_some(body),
            name: query.name,
            ext: query.ext,
            lines: None,
        }
    };

    let file = state.manifest.attach(&room_id, req).await.map_err(reject)?;
    Ok((StatusCode::CREATED, Json(FileResponse { file })))
}

/// GET /api/rooms/{room_id}/files/{file_name}: text form of the newest file
/// with that name.
pub async fn file_content(
    State(state): State<AppState>,
    Path((room_id, file_name)): Path<(String, String)>,
) -> Result<impl IntoResponse, StatusCode> {
    let bytes = state
        .manifest
        .fetch_content(&room_id, &file_name)
        .await
        .map_err(reject)?;

    Ok(Json(FileContentResponse {
        content: String::from_utf8_lossy(&bytes).into_owned(),
    }))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((room_id, file_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, StatusCode> {
    let file = state
        .manifest
        .mark_read(&room_id, &file_id, &claims.sub)
        .await
        .map_err(reject)?;
    Ok(Json(FileResponse { file }))
}

pub async fn remove_file(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((room_id, file_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, StatusCode> {
    let file = state
        .manifest
        .remove(&room_id, &file_id, &claims.sub)
        .await
        .map_err(reject)?;
    Ok(Json(FileResponse { file }))
}

/// GET /api/blobs/{key}: raw stored bytes.
pub async fn download_blob(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, StatusCode> {
    let bytes = state
        .blobs
        .retrieve(&key)
        .await
        .map_err(|e| {
            warn!("Blob lookup {:?} refused: {}", key, e);
            StatusCode::BAD_REQUEST
        })?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(([(header::CONTENT_TYPE, content_type_for(&key))], bytes))
}

/// Form fields win over the query string; an uploaded part falls back to
/// its own file name.
fn attach_from_form(mut form: Form, query: AttachQuery) -> Result<AttachRequest, StatusCode> {
    let lines = match form.take("lines").filter(|v| !v.trim().is_empty()) {
        Some(v) => Some(v.trim().parse().map_err(|_| StatusCode::BAD_REQUEST)?),
        None => None,
    };
    let ext = form.take("fileExt").or(query.ext);
    let name = form.take("fileName").or(query.name);

    Ok(match form.upload {
        Some(upload) => AttachRequest {
            name: name.or(upload.file_name),
            content: Some(upload.bytes),
            ext,
            lines: None,
        },
        None => AttachRequest {
            content: None,
            name,
            ext,
            lines,
        },
    })
}

fn content_type_for(key: &str) -> &'static str {
    match key.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase()) {
        Some(ext) if ext == "png" => "image/png",
        Some(ext) if ext == "jpg" || ext == "jpeg" => "image/jpeg",
        _ => "application/octet-stream",
    }
}
