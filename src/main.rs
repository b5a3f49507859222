mod api;
mod config;
mod conversation_store;
mod error;
mod media_store;
mod models;
mod queue;
mod speaker_db;
mod status_store;
mod transcriber;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use config::Config;
use conversation_store::ConversationStore;
use speaker_db::{SpeakerDatabase, SubprocessSpeakerDatabase};
use status_store::StatusStore;
use tokio::sync::mpsc;
use tracing::info;
use transcriber::{SubprocessTranscriber, Transcriber};

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub store: StatusStore,
    pub conversations: ConversationStore,
    pub transcriber: Arc<dyn Transcriber>,
    pub speakers: Arc<dyn SpeakerDatabase>,
    pub queue_tx: mpsc::Sender<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "speaker_id_api=info,tower_http=info".into()),
        )
        .init();

    let config = Config::from_env()?;
    media_store::ensure_dir(&config.uploads_dir).await?;
    media_store::ensure_dir(&config.processing_dir).await?;
    media_store::ensure_dir(&config.conversations_dir).await?;

    let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity);
    let transcriber: Arc<dyn Transcriber> = Arc::new(SubprocessTranscriber::new(
        config.identify_bin.clone(),
        Duration::from_secs(config.job_timeout_seconds),
    ));
    let speakers: Arc<dyn SpeakerDatabase> =
        Arc::new(SubprocessSpeakerDatabase::new(config.rename_bin.clone()));

    let state = AppState {
        store: StatusStore::new(config.processing_dir.clone()),
        conversations: ConversationStore::new(config.conversations_dir.clone()),
        transcriber,
        speakers,
        queue_tx,
        config: config.clone(),
    };

    queue::spawn_processing_worker(state.clone(), queue_rx);

    let app = api::app_router(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!("speaker-id-api listening on {}", config.bind_addr);
    axum::serve(listener, app).await?;
    Ok(())
}
