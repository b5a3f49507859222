use std::{env, net::SocketAddr, path::PathBuf};

use anyhow::Result;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub uploads_dir: PathBuf,
    pub processing_dir: PathBuf,
    pub conversations_dir: PathBuf,
    pub identify_bin: String,
    pub rename_bin: String,
    pub queue_capacity: usize,
    pub job_timeout_seconds: u64,
    pub max_upload_bytes: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let bind_raw =
            env::var("SPEAKER_ID_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:5000".to_string());
        let bind_addr = bind_raw
            .trim()
            .parse::<SocketAddr>()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 5000)));

        let uploads_dir = PathBuf::from(
            env::var("SPEAKER_ID_UPLOADS_DIR").unwrap_or_else(|_| "data/uploads".to_string()),
        );

        let processing_dir = PathBuf::from(
            env::var("SPEAKER_ID_PROCESSING_DIR")
                .unwrap_or_else(|_| "data/processing".to_string()),
        );

        let conversations_dir = PathBuf::from(
            env::var("SPEAKER_ID_CONVERSATIONS_DIR")
                .unwrap_or_else(|_| "data/conversations".to_string()),
        );

        let identify_bin = env::var("SPEAKER_ID_IDENTIFY_BIN")
            .unwrap_or_else(|_| "identify-conversation".to_string());

        let rename_bin =
            env::var("SPEAKER_ID_RENAME_BIN").unwrap_or_else(|_| "rename-speaker".to_string());

        let queue_capacity = env::var("SPEAKER_ID_QUEUE_CAPACITY")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(128);

        let job_timeout_seconds = env::var("SPEAKER_ID_JOB_TIMEOUT_SECONDS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(30 * 60);

        let max_upload_bytes = env::var("SPEAKER_ID_MAX_UPLOAD_BYTES")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(256 * 1024 * 1024);

        Ok(Self {
            bind_addr,
            uploads_dir,
            processing_dir,
            conversations_dir,
            identify_bin,
            rename_bin,
            queue_capacity,
            job_timeout_seconds,
            max_upload_bytes,
        })
    }
}
