use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;

use crate::models::{RenameSpeakerOutcome, RenameSpeakerRequest};

#[derive(Debug, Error)]
pub enum SpeakerDbError {
    #[error("failed to launch speaker database process: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("speaker database process exited with code {code}: {stderr}")]
    Failed { code: i32, stderr: String },
    #[error("speaker database process reported errors: {0}")]
    Diagnostics(String),
    #[error("speaker database output is invalid: {0}")]
    InvalidOutput(String),
}

#[async_trait]
pub trait SpeakerDatabase: Send + Sync {
    async fn rename(
        &self,
        request: &RenameSpeakerRequest,
    ) -> Result<RenameSpeakerOutcome, SpeakerDbError>;
}

pub struct SubprocessSpeakerDatabase {
    binary: String,
}

impl SubprocessSpeakerDatabase {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl SpeakerDatabase for SubprocessSpeakerDatabase {
    async fn rename(
        &self,
        request: &RenameSpeakerRequest,
    ) -> Result<RenameSpeakerOutcome, SpeakerDbError> {
        let mut command = Command::new(&self.binary);
        command
            .arg(&request.original_name)
            .arg(&request.new_name);
        if request.update_all_instances {
            command.arg("--update-all");
        }
        command
            .arg("--min-confidence")
            .arg(format!("{:.2}", request.min_confidence / 100.0));

        let output = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(SpeakerDbError::Spawn)?;

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !output.status.success() {
            return Err(SpeakerDbError::Failed {
                code: output.status.code().unwrap_or(-1),
                stderr,
            });
        }
        if !stderr.is_empty() {
            return Err(SpeakerDbError::Diagnostics(stderr));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|err| SpeakerDbError::InvalidOutput(err.to_string()))
    }
}

#[cfg(test)]
pub(crate) struct FakeSpeakerDatabase {
    outcome: Result<RenameSpeakerOutcome, String>,
}

#[cfg(test)]
impl FakeSpeakerDatabase {
    pub(crate) fn succeeding_with(updated: u64) -> Self {
        Self {
            outcome: Ok(RenameSpeakerOutcome {
                success: true,
                updated,
            }),
        }
    }

    pub(crate) fn failing_with(message: &str) -> Self {
        Self {
            outcome: Err(message.to_string()),
        }
    }
}

#[cfg(test)]
#[async_trait]
impl SpeakerDatabase for FakeSpeakerDatabase {
    async fn rename(
        &self,
        _request: &RenameSpeakerRequest,
    ) -> Result<RenameSpeakerOutcome, SpeakerDbError> {
        match &self.outcome {
            Ok(outcome) => Ok(outcome.clone()),
            Err(message) => Err(SpeakerDbError::Diagnostics(message.clone())),
        }
    }
}
