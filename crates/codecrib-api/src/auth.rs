use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::{SaltString, rand_core::OsRng}};
use axum::{
    Json,
    extract::{FromRequest, Path, Request, State},
    http::StatusCode,
    response::IntoResponse,
};
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::{error, info};
use uuid::Uuid;

use codecrib_types::api::{
    Claims, ForgotPasswordRequest, LoginRequest, MessageResponse, RegisterRequest,
    ResetPasswordRequest, TokenResponse,
};

use crate::form::{Form, Upload, is_multipart};
use crate::profile::{image_extension, store_profile_image};
use crate::{AppState, blocking};

const MIN_PASSWORD_LEN: usize = 6;
const RESET_TOKEN_TTL_SECS: i64 = 60 * 60;

/// POST /api/register takes JSON, or a multipart form with the same
/// fields plus an optional PNG/JPEG `profilePic` part.
pub async fn register(
    State(state): State<AppState>,
    request: Request,
) -> Result<impl IntoResponse, StatusCode> {
    let (req, picture) = if is_multipart(request.headers()) {
        register_form(Form::read(request, "profilePic").await?)
    } else {
        let Json(req) = Json::<RegisterRequest>::from_request(request, &())
            .await
            .map_err(|e| e.status())?;
        (req, None)
    };

    let name = req.name.trim().to_string();
    let email = req.email.trim().to_lowercase();
    if name.is_empty() || email.is_empty() || req.password.len() < MIN_PASSWORD_LEN {
        return Err(StatusCode::BAD_REQUEST);
    }
    if let Some(picture) = &picture {
        picture
            .content_type
            .as_deref()
            .and_then(image_extension)
            .ok_or(StatusCode::UNSUPPORTED_MEDIA_TYPE)?;
    }

    // Check if email is taken
    let db = state.db.clone();
    let lookup = email.clone();
    if blocking(move || db.get_user_by_email(&lookup)).await?.is_some() {
        return Err(StatusCode::CONFLICT);
    }

    let password_hash = hash_password(&req.password)?;
    let user_id = Uuid::new_v4().to_string();

    // a concurrent registration can still win the email between the check
    // and the insert
    let db = state.db.clone();
    let (uid, uemail) = (user_id.clone(), email.clone());
    if !blocking(move || db.create_user(&uid, &name, &uemail, &password_hash)).await? {
        return Err(StatusCode::CONFLICT);
    }
    info!("Registered user {} ({})", user_id, email);

    if let Some(picture) = picture {
        store_profile_image(&state, &user_id, picture.content_type.as_deref(), picture.bytes).await?;
    }

    let token = create_token(&state.jwt_secret, &user_id, &email, req.remember_me).map_err(|e| {
        error!("Failed to sign token: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok((
        StatusCode::CREATED,
        Json(TokenResponse {
            token,
            message: "User registered successfully".into(),
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let email = req.email.clone();
    let user = blocking(move || db.get_user_by_email(&email))
        .await?
        .ok_or(StatusCode::UNAUTHORIZED)?;

    // Verify password
    let parsed_hash =
        PasswordHash::new(&user.password).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| StatusCode::UNAUTHORIZED)?;

    let token = create_token(&state.jwt_secret, &user.id, &user.email, req.remember_me)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(TokenResponse {
        token,
        message: "Logged in successfully".into(),
    }))
}

/// Issues a one-hour reset token. There is no mail delivery; the token is
/// written to the server log.
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(req): Json<ForgotPasswordRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let token = hex::encode(rand::random::<[u8; 32]>());
    let expires_at = chrono::Utc::now().timestamp() + RESET_TOKEN_TTL_SECS;

    let db = state.db.clone();
    let (email, reset) = (req.email.clone(), token.clone());
    if !blocking(move || db.set_reset_token(&email, &reset, expires_at)).await? {
        return Err(StatusCode::NOT_FOUND);
    }
    info!("Password reset token for {}: {}", req.email, token);

    Ok(Json(MessageResponse {
        message: "Password reset token issued".into(),
    }))
}

pub async fn reset_password(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(req): Json<ResetPasswordRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if req.password.len() < MIN_PASSWORD_LEN {
        return Err(StatusCode::BAD_REQUEST);
    }
    let password_hash = hash_password(&req.password)?;
    let now = chrono::Utc::now().timestamp();

    let db = state.db.clone();
    if !blocking(move || db.reset_password(&token, now, &password_hash)).await? {
        return Err(StatusCode::BAD_REQUEST);
    }

    Ok(Json(MessageResponse {
        message: "Password has been reset".into(),
    }))
}

fn register_form(mut form: Form) -> (RegisterRequest, Option<Upload>) {
    let req = RegisterRequest {
        remember_me: form.flag("rememberMe"),
        name: form.take("name").unwrap_or_default(),
        email: form.take("email").unwrap_or_default(),
        password: form.take("password").unwrap_or_default(),
    };
    (req, form.upload)
}

/// Hash password with Argon2id
fn hash_password(password: &str) -> Result<String, StatusCode> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

/// Signed HS256 token. Lifetime is 7 days with `remember_me`, else 1 hour.
pub fn create_token(secret: &str, user_id: &str, email: &str, remember_me: bool) -> anyhow::Result<String> {
    let lifetime = if remember_me {
        chrono::Duration::days(7)
    } else {
        chrono::Duration::hours(1)
    };
    let claims = Claims {
        sub: user_id.to_string(),
        email: email.to_string(),
        exp: (chrono::Utc::now() + lifetime).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}
