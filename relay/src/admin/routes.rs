use axum::{
    extract::{Multipart, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::auth::{login, require_admin};
use super::media::store_upload;
use super::store::{AdminUser, CctvLocation, Incident, MediaRecord, NewCctvLocation, NewIncident};
use crate::api::AppState;
use crate::error::RelayError;

const DEFAULT_LIST_LIMIT: u32 = 100;
const MAX_LIST_LIMIT: u32 = 500;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/admin/login", post(admin_login))
        .route("/admin/incidents", get(list_incidents).post(create_incident))
        .route("/admin/cctv", get(list_cctv).post(create_cctv))
        .route("/admin/media", post(upload_media))
}

#[derive(Serialize)]
struct Envelope<T> {
    success: bool,
    #[serde(flatten)]
    body: T,
}

fn ok<T>(body: T) -> Json<Envelope<T>> {
    Json(Envelope {
        success: true,
        body,
    })
}

#[derive(Serialize)]
struct Docs<T> {
    docs: Vec<T>,
}

#[derive(Serialize)]
struct Doc<T> {
    doc: T,
}

#[derive(Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

#[derive(Serialize)]
struct LoginResponse {
    token: String,
    user: AdminUser,
}

#[derive(Deserialize)]
struct ListParams {
    limit: Option<u32>,
}

async fn admin_login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<Envelope<LoginResponse>>, RelayError> {
    let store = state.admin.clone();
    let (user, token) =
        tokio::task::spawn_blocking(move || login(&store, &req.email, &req.password))
            .await
            .map_err(|e| RelayError::Internal(e.to_string()))??;

    info!(user_id = user.id, "Admin signed in");
    Ok(ok(LoginResponse { token, user }))
}

async fn list_incidents(
    headers: HeaderMap,
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Envelope<Docs<Incident>>>, RelayError> {
    require_admin(&headers, &state.admin)?;
    let limit = params.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
    let docs = state.admin.list_incidents(limit)?;
    Ok(ok(Docs { docs }))
}

async fn create_incident(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(new): Json<NewIncident>,
) -> Result<(StatusCode, Json<Envelope<Doc<Incident>>>), RelayError> {
    let user = require_admin(&headers, &state.admin)?;
    let doc = state.admin.create_incident(new)?;
    info!(user_id = user.id, incident = doc.id, "Incident created");
    Ok((StatusCode::CREATED, ok(Doc { doc })))
}

async fn list_cctv(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<Envelope<Docs<CctvLocation>>>, RelayError> {
    require_admin(&headers, &state.admin)?;
    let docs = state.admin.list_cctv()?;
    Ok(ok(Docs { docs }))
}

async fn create_cctv(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(new): Json<NewCctvLocation>,
) -> Result<(StatusCode, Json<Envelope<Doc<CctvLocation>>>), RelayError> {
    let user = require_admin(&headers, &state.admin)?;
    let doc = state.admin.create_cctv(new)?;
    info!(user_id = user.id, camera = doc.id, "CCTV location created");
    Ok((StatusCode::CREATED, ok(Doc { doc })))
}

async fn upload_media(
    headers: HeaderMap,
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Envelope<Doc<MediaRecord>>>), RelayError> {
    require_admin(&headers, &state.admin)?;

    let mut file: Option<(String, Vec<u8>)> = None;
    let mut alt: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| RelayError::BadRequest(format!("Multipart error: {e}")))?
    {
        let field_name = field.name().unwrap_or("").to_string();
        match field_name.as_str() {
            "file" => {
                if let Some(mime) = field.content_type() {
                    if !mime.starts_with("image/") {
                        return Err(RelayError::Media(format!("{mime} is not an image")));
                    }
                }
                let name = field.file_name().unwrap_or("upload").to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| RelayError::BadRequest(format!("Failed to read field: {e}")))?;
                if data.len() > state.config.max_upload_bytes {
                    return Err(RelayError::UploadTooLarge {
                        size: data.len(),
                        max: state.config.max_upload_bytes,
                    });
                }
                file = Some((name, data.to_vec()));
            }
            "alt" => {
                alt = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| RelayError::BadRequest(format!("Failed to read field: {e}")))?,
                );
            }
            _ => {}
        }
    }

    let (name, data) =
        file.ok_or_else(|| RelayError::BadRequest("Missing 'file' field in multipart form".into()))?;

    let media_dir = state.config.media_dir.clone();
    let new = tokio::task::spawn_blocking(move || store_upload(&media_dir, &name, alt, &data))
        .await
        .map_err(|e| RelayError::Internal(e.to_string()))??;

    let doc = state.admin.insert_media(new)?;
    info!(media = doc.id, size = doc.filesize, "Media uploaded");
    Ok((StatusCode::CREATED, ok(Doc { doc })))
}
