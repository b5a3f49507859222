use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;

use crate::models::{SpeakerMatch, TranscriptPayload, TranscriptSegment};

#[derive(Debug, Error)]
pub enum TranscriberError {
    #[error("failed to launch transcription process: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("transcription timed out after {0} seconds")]
    Timeout(u64),
    #[error("transcription process exited with code {code}: {stderr}")]
    Failed { code: i32, stderr: String },
    #[error("transcription process reported errors: {0}")]
    Diagnostics(String),
    #[error("transcript output is invalid: {0}")]
    InvalidOutput(String),
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn run(&self, audio_path: &Path) -> Result<TranscriptPayload, TranscriberError>;

    async fn health_check(&self) -> anyhow::Result<()>;
}

pub struct SubprocessTranscriber {
    binary: String,
    job_timeout: Duration,
}

impl SubprocessTranscriber {
    pub fn new(binary: impl Into<String>, job_timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            job_timeout,
        }
    }
}

#[async_trait]
impl Transcriber for SubprocessTranscriber {
    async fn run(&self, audio_path: &Path) -> Result<TranscriptPayload, TranscriberError> {
        let child = Command::new(&self.binary)
            .arg(audio_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(TranscriberError::Spawn)?;

        let output = timeout(self.job_timeout, child.wait_with_output())
            .await
            .map_err(|_| TranscriberError::Timeout(self.job_timeout.as_secs()))?
            .map_err(TranscriberError::Spawn)?;

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !output.status.success() {
            return Err(TranscriberError::Failed {
                code: output.status.code().unwrap_or(-1),
                stderr,
            });
        }
        if !stderr.is_empty() {
            return Err(TranscriberError::Diagnostics(stderr));
        }

        parse_transcript(&output.stdout)
    }

    async fn health_check(&self) -> anyhow::Result<()> {
        Command::new(&self.binary)
            .arg("--help")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .with_context(|| format!("transcription binary {} is not runnable", self.binary))?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTranscript {
    segments: Vec<RawSegment>,
    #[serde(default)]
    duration: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSegment {
    #[serde(default)]
    id: Option<String>,
    start: f64,
    end: f64,
    text: String,
    speaker: RawSpeaker,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSpeaker {
    #[serde(default)]
    speaker_id: Option<String>,
    speaker_name: String,
    confidence: f64,
    is_unknown: bool,
}

pub fn parse_transcript(stdout: &[u8]) -> Result<TranscriptPayload, TranscriberError> {
    let raw: RawTranscript = serde_json::from_slice(stdout)
        .map_err(|err| TranscriberError::InvalidOutput(err.to_string()))?;

    let mut segments = Vec::with_capacity(raw.segments.len());
    for (index, segment) in raw.segments.into_iter().enumerate() {
        if !segment.start.is_finite() || !segment.end.is_finite() {
            return Err(TranscriberError::InvalidOutput(format!(
                "segment {index} has non-finite offsets"
            )));
        }
        if segment.start < 0.0 || segment.start >= segment.end {
            return Err(TranscriberError::InvalidOutput(format!(
                "segment {index} has invalid offsets {}..{}",
                segment.start, segment.end
            )));
        }
        if !segment.speaker.confidence.is_finite()
            || !(0.0..=100.0).contains(&segment.speaker.confidence)
        {
            return Err(TranscriberError::InvalidOutput(format!(
                "segment {index} has confidence {} outside 0-100",
                segment.speaker.confidence
            )));
        }

        let speaker_id = segment.speaker.speaker_id.unwrap_or_else(|| {
            segment
                .speaker
                .speaker_name
                .to_lowercase()
                .replace(' ', "_")
        });

        segments.push(TranscriptSegment {
            id: segment.id.unwrap_or_else(|| format!("segment-{index}")),
            start: segment.start,
            end: segment.end,
            text: segment.text,
            speaker: SpeakerMatch {
                speaker_id,
                speaker_name: segment.speaker.speaker_name,
                confidence: segment.speaker.confidence,
                is_unknown: segment.speaker.is_unknown,
            },
        });
    }

    segments.sort_by(|a, b| a.start.total_cmp(&b.start));
    Ok(TranscriptPayload {
        segments,
        duration: raw.duration,
    })
}

#[cfg(test)]
pub(crate) struct FakeTranscriber {
    payload: Result<TranscriptPayload, String>,
    pub(crate) calls: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl FakeTranscriber {
    pub(crate) fn completing_with(payload: TranscriptPayload) -> Self {
        Self {
            payload: Ok(payload),
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub(crate) fn failing_with(message: &str) -> Self {
        Self {
            payload: Err(message.to_string()),
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }
}

#[cfg(test)]
#[async_trait]
impl Transcriber for FakeTranscriber {
    async fn run(&self, _audio_path: &Path) -> Result<TranscriptPayload, TranscriberError> {
        self.calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        match &self.payload {
            Ok(payload) => Ok(payload.clone()),
            Err(message) => Err(TranscriberError::Diagnostics(message.clone())),
        }
    }

    async fn health_check(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
