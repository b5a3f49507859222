use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::fs;
use tracing::warn;

use crate::models::{Conversation, JobStatusRecord, TranscriptPayload};

#[derive(Clone)]
pub struct ConversationStore {
    dir: PathBuf,
}

impl ConversationStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn conversation_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    pub async fn save(&self, conversation: &Conversation) -> Result<()> {
        fs::create_dir_all(&self.dir).await.with_context(|| {
            format!(
                "Failed to create conversations directory {}",
                self.dir.display()
            )
        })?;

        let path = self.conversation_path(&conversation.id);
        let bytes = serde_json::to_vec_pretty(conversation).with_context(|| {
            format!("Failed to serialize conversation {}", conversation.id)
        })?;

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, &bytes)
            .await
            .with_context(|| format!("Failed to write conversation {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to commit conversation {}", path.display()))?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<Conversation>> {
        let path = self.conversation_path(id);
        let raw = match fs::read(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("Failed to read conversation {}", path.display()))
            }
        };

        let conversation = serde_json::from_slice(&raw)
            .with_context(|| format!("Failed to parse conversation {}", path.display()))?;
        Ok(Some(conversation))
    }

    pub async fn list_all(&self) -> Result<Vec<Conversation>> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                fs::create_dir_all(&self.dir).await.with_context(|| {
                    format!(
                        "Failed to create conversations directory {}",
                        self.dir.display()
                    )
                })?;
                return Ok(Vec::new());
            }
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("Failed to list conversations in {}", self.dir.display())
                })
            }
        };

        let mut conversations = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .context("Failed to walk conversations directory")?
        {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            match fs::read(&path).await {
                Ok(raw) => match serde_json::from_slice::<Conversation>(&raw) {
                    Ok(conversation) => conversations.push(conversation),
                    Err(err) => {
                        warn!("Skipping unreadable conversation {}: {err}", path.display())
                    }
                },
                Err(err) => warn!("Skipping conversation {}: {err}", path.display()),
            }
        }

        conversations.sort_by(|a, b| b.created.cmp(&a.created));
        Ok(conversations)
    }
}

pub fn build_conversation(record: &JobStatusRecord, payload: &TranscriptPayload) -> Conversation {
    let duration = payload
        .duration
        .unwrap_or_else(|| payload.segments.last().map(|s| s.end).unwrap_or(0.0));

    Conversation {
        id: record.id.clone(),
        filename: record.filename.clone(),
        duration,
        created: Utc::now(),
        segments: payload.segments.clone(),
    }
}
