use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::warn;

use crate::models::JobStatusRecord;

#[derive(Clone)]
pub struct StatusStore {
    dir: PathBuf,
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl StatusStore {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    async fn lock_for(&self, id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub async fn create(&self, record: &JobStatusRecord) -> Result<()> {
        let lock = self.lock_for(&record.id).await;
        let _guard = lock.lock().await;

        let path = self.record_path(&record.id);
        if fs::try_exists(&path).await.unwrap_or(false) {
            bail!("status record already exists for job {}", record.id);
        }

        self.write_record(record).await
    }

    pub async fn get(&self, id: &str) -> Result<Option<JobStatusRecord>> {
        let path = self.record_path(id);
        let raw = match fs::read(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("Failed to read status record {}", path.display()))
            }
        };

        let record = serde_json::from_slice(&raw)
            .with_context(|| format!("Failed to parse status record {}", path.display()))?;
        Ok(Some(record))
    }

    pub async fn update(
        &self,
        id: &str,
        mutate: impl FnOnce(&mut JobStatusRecord),
    ) -> Result<JobStatusRecord> {
        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;

        let Some(mut record) = self.get(id).await? else {
            bail!("unknown job id: {id}");
        };

        mutate(&mut record);
        record.updated = Utc::now();
        self.write_record(&record).await?;
        Ok(record)
    }

    pub async fn remove(&self, id: &str) -> Result<()> {
        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;

        let path = self.record_path(id);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err)
                .with_context(|| format!("Failed to remove status record {}", path.display())),
        }
    }

    pub async fn list_all(&self) -> Result<Vec<JobStatusRecord>> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("Failed to list status records in {}", self.dir.display())
                })
            }
        };

        let mut records = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .context("Failed to walk status record directory")?
        {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            match fs::read(&path).await {
                Ok(raw) => match serde_json::from_slice::<JobStatusRecord>(&raw) {
                    Ok(record) => records.push(record),
                    Err(err) => {
                        warn!("Skipping unreadable status record {}: {err}", path.display())
                    }
                },
                Err(err) => warn!("Skipping status record {}: {err}", path.display()),
            }
        }

        records.sort_by(|a, b| b.created.cmp(&a.created));
        Ok(records)
    }

    async fn write_record(&self, record: &JobStatusRecord) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create status directory {}", self.dir.display()))?;

        let path = self.record_path(&record.id);
        let bytes = serde_json::to_vec_pretty(record)
            .with_context(|| format!("Failed to serialize status record for job {}", record.id))?;

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, &bytes)
            .await
            .with_context(|| format!("Failed to write status record {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to commit status record {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobState;

    fn test_store() -> (StatusStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (StatusStore::new(dir.path().to_path_buf()), dir)
    }

    #[tokio::test]
    async fn create_then_get_roundtrips() {
        let (store, _dir) = test_store();
        let record = JobStatusRecord::queued("job-1".to_string(), "meeting.wav".to_string());

        store.create(&record).await.unwrap();
        let loaded = store.get("job-1").await.unwrap().unwrap();

        assert_eq!(loaded.id, "job-1");
        assert_eq!(loaded.filename, "meeting.wav");
        assert_eq!(loaded.status, JobState::Queued);
    }

    #[tokio::test]
    async fn get_unknown_id_returns_none() {
        let (store, _dir) = test_store();
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn create_rejects_duplicate_ids() {
        let (store, _dir) = test_store();
        let record = JobStatusRecord::queued("job-1".to_string(), "meeting.wav".to_string());

        store.create(&record).await.unwrap();
        assert!(store.create(&record).await.is_err());
    }

    #[tokio::test]
    async fn update_carries_forward_untouched_fields() {
        let (store, _dir) = test_store();
        let record = JobStatusRecord::queued("job-1".to_string(), "meeting.wav".to_string());
        store.create(&record).await.unwrap();

        let updated = store
            .update("job-1", |record| {
                record.status = JobState::Processing;
                record.stage = Some("Transcribing audio".to_string());
                record.progress = Some(0);
            })
            .await
            .unwrap();

        assert_eq!(updated.filename, "meeting.wav");
        assert_eq!(updated.created, record.created);
        assert!(updated.updated >= record.updated);

        let loaded = store.get("job-1").await.unwrap().unwrap();
        assert_eq!(loaded.status, JobState::Processing);
        assert_eq!(loaded.stage.as_deref(), Some("Transcribing audio"));
    }

    #[tokio::test]
    async fn update_unknown_id_fails() {
        let (store, _dir) = test_store();
        let result = store.update("missing", |_| {}).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn concurrent_same_id_updates_are_all_applied() {
        let (store, _dir) = test_store();
        let record = JobStatusRecord::queued("job-1".to_string(), "meeting.wav".to_string());
        store.create(&record).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .update("job-1", |record| {
                        record.progress = Some(record.progress.unwrap_or(0) + 10);
                    })
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let loaded = store.get("job-1").await.unwrap().unwrap();
        assert_eq!(loaded.progress, Some(100));
    }

    #[tokio::test]
    async fn list_all_sorts_newest_first() {
        let (store, _dir) = test_store();

        let mut first = JobStatusRecord::queued("job-1".to_string(), "a.wav".to_string());
        first.created = Utc::now() - chrono::Duration::seconds(10);
        let second = JobStatusRecord::queued("job-2".to_string(), "b.wav".to_string());

        store.create(&first).await.unwrap();
        store.create(&second).await.unwrap();

        let records = store.list_all().await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "job-2");
        assert_eq!(records[1].id, "job-1");
    }

    #[tokio::test]
    async fn list_all_on_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = StatusStore::new(dir.path().join("never-created"));
        assert!(store.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let (store, _dir) = test_store();
        let record = JobStatusRecord::queued("job-1".to_string(), "meeting.wav".to_string());
        store.create(&record).await.unwrap();

        store.remove("job-1").await.unwrap();
        store.remove("job-1").await.unwrap();
        assert!(store.get("job-1").await.unwrap().is_none());
    }
}
