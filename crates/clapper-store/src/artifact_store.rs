//! Artifact Store (spec.md §4.1): on-disk job hierarchy, atomic writes,
//! and the `job.meta.json`/`job.files.json` manifest. No teacher file
//! writes atomically this way — the "write to *.tmp, then rename" idiom is
//! spec.md §9's own translation note, applied fresh here with `tokio::fs`.

use std::path::Path;

use clapper_pipeline::guard::is_within;
use clapper_pipeline::manifest::JobDirs;
use clapper_pipeline::model::JobFiles;
use serde::{de::DeserializeOwned, Serialize};
use tokio::fs;

use crate::error::{Result, StoreError};

#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct JobMeta {
    pub job_id: String,
    pub owner_user_id: String,
    pub status: String,
    pub progress: u8,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Write `contents` to `path` atomically: write to a sibling `.tmp` file,
/// then rename over the target. The rename is atomic on the same
/// filesystem, which every path under a single work directory is.
pub async fn atomic_write(work_dir: &Path, path: &Path, contents: &[u8]) -> Result<()> {
    if !is_within(work_dir, path) {
        return Err(StoreError::PathEscapesWorkDir(path.display().to_string()));
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let tmp_path = path.with_extension(format!(
        "{}.tmp",
        path.extension().and_then(|e| e.to_str()).unwrap_or("tmp")
    ));
    fs::write(&tmp_path, contents).await?;
    fs::rename(&tmp_path, path).await?;
    Ok(())
}

async fn write_json<T: Serialize>(work_dir: &Path, path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    atomic_write(work_dir, path, &bytes).await
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Create the four subtrees a job directory contains (§6.6).
pub async fn ensure_job_dirs(dirs: &JobDirs) -> Result<()> {
    fs::create_dir_all(&dirs.input).await?;
    fs::create_dir_all(&dirs.step1).await?;
    fs::create_dir_all(&dirs.step2).await?;
    fs::create_dir_all(&dirs.render).await?;
    Ok(())
}

pub async fn write_meta(work_dir: &Path, dirs: &JobDirs, meta: &JobMeta) -> Result<()> {
    write_json(work_dir, &dirs.meta_path(), meta).await
}

pub async fn read_meta(dirs: &JobDirs) -> Result<Option<JobMeta>> {
    read_json(&dirs.meta_path()).await
}

pub async fn write_files(work_dir: &Path, dirs: &JobDirs, files: &JobFiles) -> Result<()> {
    write_json(work_dir, &dirs.files_path(), files).await
}

pub async fn read_files(dirs: &JobDirs) -> Result<JobFiles> {
    Ok(read_json(&dirs.files_path()).await?.unwrap_or_default())
}

pub async fn write_error(work_dir: &Path, dirs: &JobDirs, code: &str, message: &str) -> Result<()> {
    let error = clapper_pipeline::model::JobError {
        code: code.to_string(),
        message: message.to_string(),
    };
    write_json(work_dir, &dirs.error_path(), &error).await
}

pub async fn clear_error(dirs: &JobDirs) -> Result<()> {
    match fs::remove_file(dirs.error_path()).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

pub async fn write_marker(work_dir: &Path, marker_path: &Path) -> Result<()> {
    atomic_write(work_dir, marker_path, b"").await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn atomic_write_rejects_paths_outside_work_dir() {
        let dir = tempfile::tempdir().unwrap();
        let work_dir = dir.path();
        let outside = Path::new("/tmp/escape.json");
        let result = atomic_write(work_dir, outside, b"{}").await;
        assert!(matches!(result, Err(StoreError::PathEscapesWorkDir(_))));
    }

    #[tokio::test]
    async fn meta_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let work_dir = dir.path();
        let dirs = JobDirs::new(work_dir, "job_abc123");
        ensure_job_dirs(&dirs).await.unwrap();

        let meta = JobMeta {
            job_id: "job_abc123".into(),
            owner_user_id: "u1".into(),
            status: "CREATED".into(),
            progress: 0,
            created_at: 1,
            updated_at: 1,
        };
        write_meta(work_dir, &dirs, &meta).await.unwrap();
        let read_back = read_meta(&dirs).await.unwrap().unwrap();
        assert_eq!(read_back.job_id, meta.job_id);
        assert_eq!(read_back.status, "CREATED");
    }

    #[tokio::test]
    async fn missing_files_manifest_defaults_empty() {
        let dir = tempfile::tempdir().unwrap();
        let dirs = JobDirs::new(dir.path(), "job_missing");
        let files = read_files(&dirs).await.unwrap();
        assert!(files.audio_path.is_none());
    }
}
