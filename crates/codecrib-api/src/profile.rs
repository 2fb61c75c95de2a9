use axum::{
    Extension, Json,
    body::Bytes,
    extract::{FromRequest, Path, Request, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use tracing::{error, info};

use codecrib_gateway::blob::BlobStore;
use codecrib_types::api::{Claims, ProfileImageResponse};

use crate::form::{Form, is_multipart};
use crate::{AppState, blocking};

pub async fn get_profile(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let user = blocking(move || db.get_user_by_id(&claims.sub))
        .await?
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(user.profile()))
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let user = blocking(move || db.get_user_by_id(&user_id))
        .await?
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(user.profile()))
}

/// PATCH /api/profile/image: a raw PNG or JPEG body, or a multipart form
/// with a `profilePic` part. The new image also replaces the snapshot in
/// every roster the caller appears in.
pub async fn update_image(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    request: Request,
) -> Result<impl IntoResponse, StatusCode> {
    let (content_type, bytes) = if is_multipart(request.headers()) {
        let upload = Form::read(request, "profilePic")
            .await?
            .upload
            .ok_or(StatusCode::BAD_REQUEST)?;
        (upload.content_type, upload.bytes)
    } else {
        let content_type = request
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = Bytes::from_request(request, &()).await.map_err(|e| e.status())?;
        (content_type, body)
    };

    let key = store_profile_image(&state, &claims.sub, content_type.as_deref(), bytes)
        .await?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(ProfileImageResponse {
        message: "Profile image updated".into(),
        profile_pic_ref: key,
    }))
}

/// Store a PNG or JPEG as `user_id`'s profile image and refresh their
/// roster snapshots. `Ok(None)` when the user does not exist.
pub(crate) async fn store_profile_image(
    state: &AppState,
    user_id: &str,
    content_type: Option<&str>,
    bytes: Bytes,
) -> Result<Option<String>, StatusCode> {
    let ext = content_type
        .and_then(image_extension)
        .ok_or(StatusCode::UNSUPPORTED_MEDIA_TYPE)?;
    if bytes.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let key = BlobStore::fresh_key(&format!("profile.{}", ext));
    state.blobs.store(&key, &bytes).await.map_err(|e| {
        error!("Failed to store profile image {}: {}", key, e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let db = state.db.clone();
    let (uid, pic) = (user_id.to_string(), key.clone());
    let refreshed = blocking(move || {
        if !db.set_profile_pic(&uid, &pic)? {
            return Ok(None);
        }
        db.refresh_participant_profile_pic(&uid, &pic).map(Some)
    })
    .await?;
    let Some(refreshed) = refreshed else {
        return Ok(None);
    };
    info!(
        "{} changed profile image to {} ({} roster entries refreshed)",
        user_id, key, refreshed
    );
    Ok(Some(key))
}

pub(crate) fn image_extension(content_type: &str) -> Option<&'static str> {
    match content_type.split(';').next().map(str::trim) {
        Some("image/png") => Some("png"),
        Some("image/jpeg") => Some("jpg"),
        _ => None,
    }
}
