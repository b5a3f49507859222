use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::json;
use tokio::fs;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;
use uuid::Uuid;

use crate::{
    error::ApiError,
    media_store,
    models::{Conversation, JobStatusRecord, RenameSpeakerOutcome, RenameSpeakerRequest},
    AppState,
};

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/process", post(create_process).get(list_process))
        .route("/process/{job_id}", get(get_process))
        .route("/conversations", get(list_conversations))
        .route("/conversations/{conversation_id}", get(get_conversation))
        .route("/audio/{job_id}", get(get_audio))
        .route("/speakers/rename", post(rename_speaker))
        .layer(DefaultBodyLimit::max(state.config.max_upload_bytes))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    let transcriber_ok = state.transcriber.health_check().await.is_ok();
    Json(json!({
        "ok": true,
        "timestamp": Utc::now(),
        "transcriber": transcriber_ok
    }))
}

pub async fn create_process(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<JobStatusRecord>, ApiError> {
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(ApiError::invalid_multipart)?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = media_store::sanitize_filename(field.file_name().unwrap_or_default());
        let bytes = field
            .bytes()
            .await
            .map_err(ApiError::invalid_multipart)?;
        upload = Some((filename, bytes));
        break;
    }

    let Some((filename, bytes)) = upload else {
        return Err(ApiError::no_file());
    };
    if filename.is_empty() || bytes.is_empty() {
        return Err(ApiError::no_file());
    }

    let job_id = Uuid::new_v4().to_string();
    let audio_path =
        media_store::save_upload(&state.config.uploads_dir, &job_id, &filename, &bytes).await?;

    let record = JobStatusRecord::queued(job_id.clone(), filename);
    if let Err(err) = state.store.create(&record).await {
        if let Err(cleanup_err) = media_store::delete_file_if_exists(&audio_path).await {
            warn!("Failed to remove upload after status write failure: {cleanup_err:#}");
        }
        return Err(ApiError::Storage(err));
    }

    if state.queue_tx.send(job_id.clone()).await.is_err() {
        if let Err(err) = state.store.remove(&job_id).await {
            warn!(job_id = %job_id, "Failed to roll back status record: {err:#}");
        }
        if let Err(err) = media_store::delete_file_if_exists(&audio_path).await {
            warn!(job_id = %job_id, "Failed to roll back upload: {err:#}");
        }
        return Err(ApiError::QueueUnavailable);
    }

    Ok(Json(record))
}

pub async fn list_process(
    State(state): State<AppState>,
) -> Result<Json<Vec<JobStatusRecord>>, ApiError> {
    Ok(Json(state.store.list_all().await?))
}

pub async fn get_process(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobStatusRecord>, ApiError> {
    let record = state
        .store
        .get(&job_id)
        .await?
        .ok_or_else(ApiError::job_not_found)?;
    Ok(Json(record))
}

pub async fn list_conversations(
    State(state): State<AppState>,
) -> Result<Json<Vec<Conversation>>, ApiError> {
    Ok(Json(state.conversations.list_all().await?))
}

pub async fn get_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> Result<Json<Conversation>, ApiError> {
    let conversation = state
        .conversations
        .get(&conversation_id)
        .await?
        .ok_or_else(ApiError::conversation_not_found)?;
    Ok(Json(conversation))
}

pub async fn get_audio(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Response, ApiError> {
    let Some(path) = media_store::find_by_prefix(&state.config.uploads_dir, &job_id).await? else {
        return Err(ApiError::audio_not_found());
    };

    let bytes = match fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::audio_not_found());
        }
        Err(err) => {
            return Err(ApiError::Storage(anyhow::Error::new(err).context(format!(
                "Failed to read audio file {}",
                path.display()
            ))));
        }
    };

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, media_store::content_type_for(&path))
        .header(header::CONTENT_LENGTH, bytes.len())
        .header(header::ACCEPT_RANGES, "bytes")
        .body(Body::from(bytes))
        .map_err(|err| ApiError::Storage(anyhow::Error::new(err)))?;
    Ok(response)
}

pub async fn rename_speaker(
    State(state): State<AppState>,
    Json(request): Json<RenameSpeakerRequest>,
) -> Result<Json<RenameSpeakerOutcome>, ApiError> {
    if request.original_name.trim().is_empty() || request.new_name.trim().is_empty() {
        return Err(ApiError::missing_fields());
    }

    let outcome = state
        .speakers
        .rename(&request)
        .await
        .map_err(|err| ApiError::SpeakerDb(err.to_string()))?;
    Ok(Json(outcome))
}
