//! HTTP surface of CodeCrib: accounts, rooms and file transfer, plus the
//! `/gateway` upgrade into the real-time channel.

pub mod auth;
pub mod error;
pub mod files;
pub mod form;
pub mod middleware;
pub mod profile;
pub mod rooms;

use std::sync::Arc;

use axum::{
    Router,
    Extension,
    extract::{DefaultBodyLimit, State, WebSocketUpgrade},
    http::StatusCode,
    middleware::from_fn_with_state,
    response::IntoResponse,
    routing::{get, patch, post},
};
use tracing::error;

use codecrib_db::Database;
use codecrib_types::api::Claims;
use codecrib_gateway::blob::BlobStore;
use codecrib_gateway::connection;
use codecrib_gateway::manifest::FileManifest;
use codecrib_gateway::router::RoomRouter;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub blobs: Arc<BlobStore>,
    pub router: RoomRouter,
    pub manifest: FileManifest,
    pub jwt_secret: String,
    pub max_upload_bytes: usize,
}

impl AppStateInner {
    /// Wire the real-time core on top of the given stores.
    pub fn new(db: Arc<Database>, blobs: Arc<BlobStore>, jwt_secret: String, max_upload_bytes: usize) -> AppState {
        let router = RoomRouter::new(db.clone());
        let manifest = FileManifest::new(db.clone(), blobs.clone(), router.clone());
        Arc::new(Self {
            db,
            blobs,
            router,
            manifest,
            jwt_secret,
            max_upload_bytes,
        })
    }
}

/// Full application router: public auth routes, bearer-protected routes,
/// public blob downloads and the token-checked WebSocket gateway.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/api/register", post(auth::register))
        .route("/api/login", post(auth::login))
        .route("/api/forgot-password", post(auth::forgot_password))
        .route("/api/reset-password/{token}", post(auth::reset_password))
        .route("/api/blobs/{key}", get(files::download_blob));

    let gateway_routes = Router::new()
        .route("/gateway", get(ws_upgrade))
        .route_layer(from_fn_with_state(state.clone(), middleware::require_gateway_auth));

    let protected_routes = Router::new()
        .route("/api/profile", get(profile::get_profile))
        .route("/api/profile/image", patch(profile::update_image))
        .route("/api/users/{user_id}", get(profile::get_user))
        .route("/api/rooms", get(rooms::list_rooms).post(rooms::create_room))
        .route("/api/rooms/{room_id}", get(rooms::get_room))
        .route("/api/rooms/{room_id}/join", post(rooms::join_room))
        .route("/api/rooms/{room_id}/files", post(files::attach_file))
        // GET addresses a file by name, the mutations by id
        .route(
            "/api/rooms/{room_id}/files/{file}",
            get(files::file_content).delete(files::remove_file),
        )
        .route("/api/rooms/{room_id}/files/{file}/read", patch(files::mark_read))
        .layer(from_fn_with_state(state.clone(), middleware::require_auth));

    Router::new()
        .merge(public_routes)
        .merge(gateway_routes)
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(state.max_upload_bytes))
        .with_state(state)
}

async fn ws_upgrade(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let router = state.router.clone();
    ws.on_upgrade(move |socket| connection::handle_connection(socket, router, claims.sub))
}

/// Run blocking database work off the async runtime.
pub(crate) async fn blocking<F, T>(f: F) -> Result<T, StatusCode>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|e| {
            error!("DB error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })
}
