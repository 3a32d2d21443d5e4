//! Cleanup sweep (spec.md §4.8): reclaim disk space for long-settled jobs
//! and prune orphaned job directories left behind by a crash between
//! `ensure_job_dirs` and the first `job.meta.json` write.
//!
//! Ported from `original_source/web_api/services/cleanup.py`'s
//! `cleanup_job_artifacts`/`cleanup_orphan_job_dirs`/`_list_orphan_job_dirs`/
//! `_remove_path`, built on top of `clapper_pipeline::manifest`'s
//! `collect_artifact_paths`/`dedupe_paths` (already spec.md §4.8 step 1-2)
//! and `clapper_store::artifact_store`'s on-disk manifest helpers, since
//! this port keeps job status/files in `job.meta.json`/`job.files.json`
//! rather than a DB row.

use std::path::Path;

use clapper_pipeline::manifest::{collect_artifact_paths, dedupe_paths};
use clapper_pipeline::model::JobFiles;
use clapper_pipeline::state::JobStatus;
use clapper_store::artifact_store::{self, JobMeta};
use clapper_store::models::now_unix;
use tracing::{info, warn};

use crate::config::Settings;

#[derive(Debug, thiserror::Error)]
pub enum CleanupError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store error: {0}")]
    Store(#[from] clapper_store::StoreError),
}

pub type Result<T> = std::result::Result<T, CleanupError>;

fn is_eligible(status: &str, updated_at: i64, ttl_seconds: i64, now: i64) -> bool {
    matches!(status, "SUCCEEDED" | "STEP2_CONFIRMED") && now - updated_at >= ttl_seconds
}

/// Remove a path, recursing into directories; errors are logged and
/// swallowed so one bad path never aborts the sweep (spec.md §4.8 step 2).
async fn remove_path(path: &Path) -> bool {
    let metadata = match tokio::fs::symlink_metadata(path).await {
        Ok(m) => m,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return false,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "cleanup could not stat path");
            return false;
        }
    };
    let result = if metadata.is_dir() {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    };
    match result {
        Ok(()) => true,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => false,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "cleanup failed to remove path");
            false
        }
    }
}

/// Reclaim one eligible job's artifacts and rewrite its manifest to a bare
/// `SUCCEEDED` shell (spec.md §4.8 steps 1-5). `meta`/`files` must already
/// be loaded by the caller, since the directory wipe below also removes
/// the `job.meta.json`/`job.files.json` that held them.
async fn cleanup_job_artifacts(settings: &Settings, job_id: &str, mut meta: JobMeta, files: JobFiles) -> Result<usize> {
    let dirs = settings.job_dir(job_id);
    let paths = dedupe_paths(collect_artifact_paths(&settings.work_dir, &dirs.base, &files));

    let mut removed = 0;
    for path in &paths {
        if remove_path(path).await {
            removed += 1;
        }
    }

    artifact_store::ensure_job_dirs(&dirs).await?;
    artifact_store::write_files(&settings.work_dir, &dirs, &JobFiles::default()).await?;

    meta.status = JobStatus::Succeeded.to_string();
    meta.progress = JobStatus::Succeeded.base_progress();
    meta.updated_at = now_unix();
    artifact_store::write_meta(&settings.work_dir, &dirs, &meta).await?;
    artifact_store::clear_error(&dirs).await?;

    info!(job_id, removed_paths = removed, "cleaned job artifacts");
    Ok(removed)
}

/// List job directories under `jobs/` that have no `job.meta.json` — the
/// signature of a crash between `ensure_job_dirs` and the first meta write.
async fn list_orphan_job_dirs(settings: &Settings) -> Result<Vec<std::path::PathBuf>> {
    let jobs_dir = settings.jobs_dir();
    let mut read_dir = match tokio::fs::read_dir(&jobs_dir).await {
        Ok(rd) => rd,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };

    let mut orphans = Vec::new();
    while let Some(entry) = read_dir.next_entry().await? {
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        let path = entry.path();
        if !path.join("job.meta.json").exists() {
            orphans.push(path);
        }
    }
    orphans.sort();
    Ok(orphans)
}

/// Delete every orphan job directory found under `jobs/` (spec.md §4.8
/// "Also: at startup, delete orphan directories...").
pub async fn cleanup_orphan_job_dirs(settings: &Settings) -> Result<usize> {
    let orphans = list_orphan_job_dirs(settings).await?;
    let mut removed = 0;
    for path in &orphans {
        if remove_path(path).await {
            removed += 1;
        }
    }
    if removed > 0 {
        info!(removed_dirs = removed, "removed orphan job directories");
    }
    Ok(removed)
}

/// One pass of the in-worker cleanup sweep (spec.md §4.8): scan `jobs/`,
/// reclaim every eligible job up to `cleanup_batch_size`.
pub async fn run_cleanup_sweep(settings: &Settings) -> Result<usize> {
    let jobs_dir = settings.jobs_dir();
    let mut read_dir = match tokio::fs::read_dir(&jobs_dir).await {
        Ok(rd) => rd,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(err) => return Err(err.into()),
    };

    let now = now_unix();
    let mut cleaned = 0usize;
    while let Some(entry) = read_dir.next_entry().await? {
        if cleaned >= settings.cleanup_batch_size {
            break;
        }
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        let job_id = entry.file_name().to_string_lossy().into_owned();
        let dirs = settings.job_dir(&job_id);

        let Some(meta) = artifact_store::read_meta(&dirs).await? else {
            continue;
        };
        if !is_eligible(&meta.status, meta.updated_at, settings.cleanup_ttl_seconds, now) {
            continue;
        }

        let files = artifact_store::read_files(&dirs).await?;
        if files.declared_paths().is_empty() {
            continue;
        }

        cleanup_job_artifacts(settings, &job_id, meta, files).await?;
        cleaned += 1;
    }

    Ok(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eligibility_requires_settled_status_and_ttl_elapsed() {
        assert!(is_eligible("SUCCEEDED", 0, 60, 120));
        assert!(is_eligible("STEP2_CONFIRMED", 0, 60, 120));
        assert!(!is_eligible("SUCCEEDED", 100, 60, 120));
        assert!(!is_eligible("STEP1_READY", 0, 60, 120));
    }

    #[tokio::test]
    async fn cleanup_job_artifacts_wipes_and_rewrites_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let settings = test_settings(dir.path());
        let dirs = settings.job_dir("job_abc");
        artifact_store::ensure_job_dirs(&dirs).await.unwrap();

        let audio_path = dirs.input.join("a.wav");
        tokio::fs::write(&audio_path, b"audio").await.unwrap();
        let mut files = JobFiles::default();
        files.audio_path = Some(audio_path.display().to_string());

        let meta = JobMeta {
            job_id: "job_abc".into(),
            owner_user_id: "u1".into(),
            status: "SUCCEEDED".into(),
            progress: 100,
            created_at: 1,
            updated_at: 1,
        };

        cleanup_job_artifacts(&settings, "job_abc", meta, files).await.unwrap();

        assert!(!audio_path.exists());
        let files_after = artifact_store::read_files(&dirs).await.unwrap();
        assert!(files_after.audio_path.is_none());
        let meta_after = artifact_store::read_meta(&dirs).await.unwrap().unwrap();
        assert_eq!(meta_after.status, "SUCCEEDED");
        assert_eq!(meta_after.owner_user_id, "u1");
    }

    #[tokio::test]
    async fn orphan_dirs_without_meta_json_are_removed() {
        let dir = tempfile::tempdir().unwrap();
        let settings = test_settings(dir.path());
        let orphan_dir = settings.jobs_dir().join("job_orphan");
        tokio::fs::create_dir_all(&orphan_dir).await.unwrap();

        let removed = cleanup_orphan_job_dirs(&settings).await.unwrap();
        assert_eq!(removed, 1);
        assert!(!orphan_dir.exists());
    }

    fn test_settings(work_dir: &Path) -> Settings {
        std::env::set_var("WORK_DIR", work_dir.to_str().unwrap());
        let settings = Settings::from_env();
        std::env::remove_var("WORK_DIR");
        settings
    }
}
