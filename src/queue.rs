use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::{
    conversation_store::build_conversation,
    media_store,
    models::JobState,
    AppState,
};

pub fn spawn_processing_worker(state: AppState, mut queue_rx: mpsc::Receiver<String>) {
    tokio::spawn(async move {
        while let Some(job_id) = queue_rx.recv().await {
            info!(job_id = %job_id, "Worker picked processing job");
            run_supervised(state.clone(), job_id).await;
        }
    });
}

async fn run_supervised(state: AppState, job_id: String) {
    let task_state = state.clone();
    let task_id = job_id.clone();
    let outcome = tokio::spawn(async move { process_job(task_state, &task_id).await }).await;

    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            error!(job_id = %job_id, "Processing job failed: {err:#}");
            mark_failed(&state, &job_id, err.to_string()).await;
        }
        Err(err) => {
            error!(job_id = %job_id, "Processing job crashed: {err}");
            mark_failed(&state, &job_id, "processing task crashed unexpectedly".to_string()).await;
        }
    }
}

async fn process_job(state: AppState, job_id: &str) -> Result<()> {
    let record = state
        .store
        .get(job_id)
        .await?
        .with_context(|| format!("unknown job id: {job_id}"))?;

    if record.status != JobState::Queued {
        info!(job_id = %job_id, status = ?record.status, "Skipping job not in queued state");
        return Ok(());
    }

    state
        .store
        .update(job_id, |record| {
            record.status = JobState::Processing;
            record.stage = Some("Transcribing audio".to_string());
            record.progress = Some(0);
        })
        .await?;

    let audio_path = media_store::find_by_prefix(&state.config.uploads_dir, job_id)
        .await?
        .context("uploaded audio file is missing")?;

    let payload = state.transcriber.run(&audio_path).await?;

    state
        .store
        .update(job_id, |record| {
            record.stage = Some("Saving conversation".to_string());
            record.progress = Some(90);
        })
        .await?;

    let completed = state
        .store
        .update(job_id, |record| {
            record.status = JobState::Completed;
            record.stage = Some("Processing complete".to_string());
            record.progress = Some(100);
            record.result = Some(payload.clone());
            record.error = None;
        })
        .await?;

    info!(
        job_id = %job_id,
        segments = payload.segments.len(),
        "Processing job completed"
    );

    let conversation = build_conversation(&completed, &payload);
    if let Err(err) = state.conversations.save(&conversation).await {
        error!(job_id = %job_id, "Failed to materialize conversation: {err:#}");
    }

    Ok(())
}

async fn mark_failed(state: &AppState, job_id: &str, message: String) {
    let result = state
        .store
        .update(job_id, |record| {
            if record.status.is_terminal() {
                return;
            }
            record.status = JobState::Failed;
            record.error = Some(message.clone());
            record.result = None;
        })
        .await;

    if let Err(err) = result {
        error!(job_id = %job_id, "Failed to record job failure: {err:#}");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::config::Config;
    use crate::conversation_store::ConversationStore;
    use crate::models::{
        JobStatusRecord, SpeakerMatch, TranscriptPayload, TranscriptSegment,
    };
    use crate::speaker_db::FakeSpeakerDatabase;
    use crate::status_store::StatusStore;
    use crate::transcriber::FakeTranscriber;

    fn sample_payload() -> TranscriptPayload {
        TranscriptPayload {
            segments: vec![TranscriptSegment {
                id: "segment-0".to_string(),
                start: 0.0,
                end: 5.0,
                text: "hello".to_string(),
                speaker: SpeakerMatch {
                    speaker_id: "unknown_speaker_1".to_string(),
                    speaker_name: "Unknown Speaker 1".to_string(),
                    confidence: 0.0,
                    is_unknown: true,
                },
            }],
            duration: Some(10.0),
        }
    }

    fn test_state(
        dir: &tempfile::TempDir,
        transcriber: Arc<FakeTranscriber>,
    ) -> (AppState, mpsc::Receiver<String>) {
        let config = Config {
            bind_addr: ([127, 0, 0, 1], 0).into(),
            uploads_dir: dir.path().join("uploads"),
            processing_dir: dir.path().join("processing"),
            conversations_dir: dir.path().join("conversations"),
            identify_bin: "identify-conversation".to_string(),
            rename_bin: "rename-speaker".to_string(),
            queue_capacity: 8,
            job_timeout_seconds: 5,
            max_upload_bytes: 1024 * 1024,
        };
        let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity);
        let state = AppState {
            store: StatusStore::new(config.processing_dir.clone()),
            conversations: ConversationStore::new(config.conversations_dir.clone()),
            transcriber,
            speakers: Arc::new(FakeSpeakerDatabase::succeeding_with(0)),
            queue_tx,
            config,
        };
        (state, queue_rx)
    }

    async fn enqueue_job(state: &AppState, job_id: &str) {
        media_store::save_upload(&state.config.uploads_dir, job_id, "meeting.wav", b"RIFF")
            .await
            .unwrap();
        let record = JobStatusRecord::queued(job_id.to_string(), "meeting.wav".to_string());
        state.store.create(&record).await.unwrap();
        state.queue_tx.send(job_id.to_string()).await.unwrap();
    }

    async fn wait_for_terminal(state: &AppState, job_id: &str) -> JobStatusRecord {
        for _ in 0..100 {
            if let Some(record) = state.store.get(job_id).await.unwrap() {
                if record.status.is_terminal() {
                    return record;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("job {job_id} did not reach a terminal status");
    }

    #[tokio::test]
    async fn successful_job_completes_and_materializes_conversation() {
        let dir = tempfile::tempdir().unwrap();
        let transcriber = Arc::new(FakeTranscriber::completing_with(sample_payload()));
        let (state, queue_rx) = test_state(&dir, transcriber.clone());
        spawn_processing_worker(state.clone(), queue_rx);

        enqueue_job(&state, "job-1").await;
        let record = wait_for_terminal(&state, "job-1").await;

        assert_eq!(record.status, JobState::Completed);
        assert_eq!(record.progress, Some(100));
        assert!(record.error.is_none());
        let result = record.result.unwrap();
        assert_eq!(result.segments.len(), 1);

        let conversation = state.conversations.get("job-1").await.unwrap().unwrap();
        assert_eq!(conversation.filename, "meeting.wav");
        assert_eq!(conversation.duration, 10.0);
        assert_eq!(conversation.segments.len(), 1);
    }

    #[tokio::test]
    async fn collaborator_failure_marks_job_failed() {
        let dir = tempfile::tempdir().unwrap();
        let transcriber = Arc::new(FakeTranscriber::failing_with("model load failed"));
        let (state, queue_rx) = test_state(&dir, transcriber);
        spawn_processing_worker(state.clone(), queue_rx);

        enqueue_job(&state, "job-1").await;
        let record = wait_for_terminal(&state, "job-1").await;

        assert_eq!(record.status, JobState::Failed);
        assert!(record.error.unwrap().contains("model load failed"));
        assert!(record.result.is_none());
        assert!(state.conversations.get("job-1").await.unwrap().is_none());
        assert!(state.conversations.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_upload_marks_job_failed() {
        let dir = tempfile::tempdir().unwrap();
        let transcriber = Arc::new(FakeTranscriber::completing_with(sample_payload()));
        let (state, queue_rx) = test_state(&dir, transcriber.clone());
        spawn_processing_worker(state.clone(), queue_rx);

        let record = JobStatusRecord::queued("job-1".to_string(), "meeting.wav".to_string());
        state.store.create(&record).await.unwrap();
        state.queue_tx.send("job-1".to_string()).await.unwrap();

        let record = wait_for_terminal(&state, "job-1").await;
        assert_eq!(record.status, JobState::Failed);
        assert!(record.error.unwrap().contains("audio file is missing"));
        assert_eq!(transcriber.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn duplicate_delivery_invokes_collaborator_once() {
        let dir = tempfile::tempdir().unwrap();
        let transcriber = Arc::new(FakeTranscriber::completing_with(sample_payload()));
        let (state, queue_rx) = test_state(&dir, transcriber.clone());
        spawn_processing_worker(state.clone(), queue_rx);

        enqueue_job(&state, "job-1").await;
        state.queue_tx.send("job-1".to_string()).await.unwrap();
        state.queue_tx.send("job-1".to_string()).await.unwrap();

        wait_for_terminal(&state, "job-1").await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(transcriber.calls.load(Ordering::SeqCst), 1);
        let record = state.store.get("job-1").await.unwrap().unwrap();
        assert_eq!(record.status, JobState::Completed);
    }

    #[tokio::test]
    async fn unknown_job_id_does_not_stall_the_worker() {
        let dir = tempfile::tempdir().unwrap();
        let transcriber = Arc::new(FakeTranscriber::completing_with(sample_payload()));
        let (state, queue_rx) = test_state(&dir, transcriber);
        spawn_processing_worker(state.clone(), queue_rx);

        state.queue_tx.send("ghost".to_string()).await.unwrap();
        enqueue_job(&state, "job-1").await;

        let record = wait_for_terminal(&state, "job-1").await;
        assert_eq!(record.status, JobState::Completed);
        assert!(state.store.get("ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn status_sequence_never_skips_processing() {
        let dir = tempfile::tempdir().unwrap();
        let transcriber = Arc::new(FakeTranscriber::completing_with(sample_payload()));
        let (state, queue_rx) = test_state(&dir, transcriber);

        enqueue_job(&state, "job-1").await;
        let queued = state.store.get("job-1").await.unwrap().unwrap();
        assert_eq!(queued.status, JobState::Queued);

        spawn_processing_worker(state.clone(), queue_rx);
        let record = wait_for_terminal(&state, "job-1").await;

        assert_eq!(record.status, JobState::Completed);
        assert_eq!(record.filename, "meeting.wav");
        assert_eq!(record.created, queued.created);
        assert!(record.updated >= queued.updated);
    }
}
