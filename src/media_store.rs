use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs;

pub async fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .await
        .with_context(|| format!("Failed to create directory {}", path.display()))
}

pub fn sanitize_filename(raw: &str) -> String {
    Path::new(raw)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

pub fn upload_path(uploads_dir: &Path, job_id: &str, filename: &str) -> PathBuf {
    uploads_dir.join(format!("{job_id}_{filename}"))
}

pub async fn save_upload(
    uploads_dir: &Path,
    job_id: &str,
    filename: &str,
    bytes: &[u8],
) -> Result<PathBuf> {
    ensure_dir(uploads_dir).await?;
    let path = upload_path(uploads_dir, job_id, filename);
    fs::write(&path, bytes)
        .await
        .with_context(|| format!("Failed to write upload {}", path.display()))?;
    Ok(path)
}

pub async fn find_by_prefix(uploads_dir: &Path, job_id: &str) -> Result<Option<PathBuf>> {
    let mut entries = match fs::read_dir(uploads_dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("Failed to list uploads in {}", uploads_dir.display()))
        }
    };

    while let Some(entry) = entries
        .next_entry()
        .await
        .context("Failed to walk uploads directory")?
    {
        if entry.file_name().to_string_lossy().starts_with(job_id) {
            return Ok(Some(entry.path()));
        }
    }

    Ok(None)
}

pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();

    match ext.as_str() {
        "wav" => "audio/wav",
        "m4a" => "audio/m4a",
        "ogg" => "audio/ogg",
        _ => "audio/mpeg",
    }
}

pub async fn delete_file_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(_) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("Failed to delete {}", path.display())),
    }
}
