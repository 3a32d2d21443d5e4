//! Worker loop (spec.md §4.5): claims STEP1/STEP2 tasks from the queue and
//! dispatches them to the stage drivers, translating each task's outcome
//! into a job-state transition.
//!
//! Grounded on `reactor.rs`'s claim-loop shape (claim -> spawn/dispatch ->
//! sleep-on-empty, DB-error backoff), generalized from its single flat
//! `Job` row into the STEP1/STEP2 dispatch pseudocode. Diverges from
//! `Reactor::claim_next_pending`'s raw `pool.begin()`: claiming is
//! `clapper_store::queue::claim_next`'s BEGIN IMMEDIATE + retry algorithm,
//! reached here through `Store::claim_next`, since job ownership is
//! exactly-once-dispatch state that belongs to the relational store, not
//! the worker.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clapper_pipeline::manifest::JobDirs;
use clapper_pipeline::model::{QueueTask, Step1Lines, Step2Chapters, TaskType};
use clapper_pipeline::srt::{merge_step1_lines, parse_srt, render_final_step1_srt};
use clapper_pipeline::state::{running_progress, transition, Event, JobStatus};
use clapper_pipeline::topics::{kept_line_ids, remap_chapter_line_ids, verify_chapter_coverage};
use clapper_store::{artifact_store, artifact_store::JobMeta, models::now_unix, Store, StoreError};
use tracing::{error, info, instrument, warn};

use crate::cleanup;
use crate::config::Settings;
use crate::drivers::{DriverError, ProgressCallback, StageDriver};
use crate::state::AppState;

#[derive(Debug, thiserror::Error)]
enum WorkerError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("pipeline error: {0}")]
    Pipeline(#[from] clapper_pipeline::PipelineError),
    #[error("driver error: {0}")]
    Driver(#[from] DriverError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("job {0} has no job.meta.json")]
    MissingMeta(String),
    #[error("job {job_id} is missing required input {field}")]
    MissingInput { job_id: String, field: &'static str },
}

impl WorkerError {
    fn is_insufficient_credits(&self) -> bool {
        matches!(self, WorkerError::Store(StoreError::InsufficientCredits))
    }
}

/// Run the claim/dispatch loop forever. Spawned once per process in
/// standalone worker mode, or alongside the HTTP server when
/// `settings.embedded_worker` is set.
pub async fn run_worker(state: Arc<AppState>, driver: Arc<dyn StageDriver>, worker_id: String) {
    info!(worker_id = %worker_id, "worker loop starting");

    if state.settings.cleanup_on_startup {
        if let Err(err) = cleanup::cleanup_orphan_job_dirs(&state.settings).await {
            warn!(error = %err, "startup orphan cleanup failed");
        }
    }

    let cleanup_interval = Duration::from_secs_f64(state.settings.cleanup_interval_seconds.max(1.0));
    let poll_interval = Duration::from_secs_f64(state.settings.worker_poll_seconds.max(0.05));
    let mut last_cleanup = tokio::time::Instant::now();

    loop {
        if state.settings.cleanup_enabled && last_cleanup.elapsed() >= cleanup_interval {
            if let Err(err) = cleanup::run_cleanup_sweep(&state.settings).await {
                warn!(error = %err, "cleanup sweep failed");
            }
            last_cleanup = tokio::time::Instant::now();
        }

        match state.store.claim_next(&worker_id).await {
            Ok(Some(task)) => dispatch(&state, driver.as_ref(), task).await,
            Ok(None) => tokio::time::sleep(poll_interval).await,
            Err(err) => {
                error!(error = %err, "queue claim failed");
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        }
    }
}

#[instrument(skip(state, driver, task), fields(job_id = %task.job_id, task_id = task.task_id))]
async fn dispatch(state: &AppState, driver: &dyn StageDriver, task: QueueTask) {
    let result = match task.task_type {
        TaskType::Step1 => run_step1(&state.settings, state.store.as_ref(), driver, &task.job_id).await,
        TaskType::Step2 => run_step2(&state.settings, state.store.as_ref(), driver, &task.job_id).await,
    };

    match result {
        Ok(()) => {
            if let Err(err) = state.store.set_task_succeeded(task.task_id).await {
                error!(error = %err, "failed to mark task succeeded");
            }
            info!("task succeeded");
        }
        Err(err) => {
            error!(error = %err, "task failed");
            if let Err(store_err) = state.store.set_task_failed(task.task_id, &err.to_string()).await {
                error!(error = %store_err, "failed to mark task failed");
            }

            let recovery = if task.task_type == TaskType::Step1 && err.is_insufficient_credits() {
                revert_step1_insufficient_credits(&state.settings, &task.job_id).await
            } else {
                fail_job(&state.settings, &task.job_id, "INTERNAL_ERROR", "internal error, please try again later").await
            };
            if let Err(meta_err) = recovery {
                error!(error = %meta_err, "failed to persist job failure state");
            }
        }
    }
}

async fn load_meta(dirs: &JobDirs, job_id: &str) -> Result<JobMeta, WorkerError> {
    artifact_store::read_meta(dirs)
        .await?
        .ok_or_else(|| WorkerError::MissingMeta(job_id.to_string()))
}

async fn write_status(
    settings: &Settings,
    dirs: &JobDirs,
    meta: &mut JobMeta,
    status: JobStatus,
    progress: u8,
) -> Result<(), WorkerError> {
    meta.status = status.to_string();
    meta.progress = progress;
    meta.updated_at = now_unix();
    artifact_store::write_meta(&settings.work_dir, dirs, meta).await?;
    Ok(())
}

/// Revert a STEP1 task to `UPLOAD_READY` when the owner's balance ran out
/// between enqueue and the credit debit (spec.md §4.5 dispatch loop).
async fn revert_step1_insufficient_credits(settings: &Settings, job_id: &str) -> Result<(), WorkerError> {
    let dirs = settings.job_dir(job_id);
    let mut meta = load_meta(&dirs, job_id).await?;
    let from = meta.status.parse().unwrap_or(JobStatus::Step1Running);
    let to = transition(from, Event::Step1InsufficientCredits).unwrap_or(JobStatus::UploadReady);
    artifact_store::write_error(
        &settings.work_dir,
        &dirs,
        "INVALID_STEP_STATE",
        "not enough credits to run this step; redeem a coupon and try again",
    )
    .await?;
    write_status(settings, &dirs, &mut meta, to, JobStatus::UploadReady.base_progress()).await
}

async fn fail_job(settings: &Settings, job_id: &str, code: &str, message: &str) -> Result<(), WorkerError> {
    let dirs = settings.job_dir(job_id);
    let mut meta = load_meta(&dirs, job_id).await?;
    artifact_store::write_error(&settings.work_dir, &dirs, code, message).await?;
    write_status(settings, &dirs, &mut meta, JobStatus::Failed, meta.progress).await
}

/// Build a `ProgressCallback` that forwards every reported ratio to a
/// background flusher task, which persists `job.meta.json` whenever the
/// translated rung exceeds the last value written (spec.md §4.5 "Progress
/// reporting").
fn spawn_progress_flusher(
    work_dir: PathBuf,
    job_id: String,
    status: JobStatus,
    mut meta: JobMeta,
) -> (ProgressCallback, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = tokio::sync::watch::channel::<Option<f64>>(None);
    let callback: ProgressCallback = Box::new(move |_stage, ratio| {
        let _ = tx.send(ratio);
    });

    let handle = tokio::spawn(async move {
        let dirs = JobDirs::new(&work_dir, &job_id);
        let mut last_pct = meta.progress;
        while rx.changed().await.is_ok() {
            let Some(ratio) = *rx.borrow() else { continue };
            let pct = running_progress(status, ratio);
            if pct > last_pct {
                last_pct = pct;
                meta.progress = pct;
                meta.updated_at = now_unix();
                if let Err(err) = artifact_store::write_meta(&work_dir, &dirs, &meta).await {
                    warn!(error = %err, "progress flush failed");
                }
            }
        }
    });

    (callback, handle)
}

/// STEP1: transcribe -> auto-edit -> merge the two SRTs into Step1 Lines
/// -> debit one credit (spec.md §4.5).
async fn run_step1(
    settings: &Settings,
    store: &dyn Store,
    driver: &dyn StageDriver,
    job_id: &str,
) -> Result<(), WorkerError> {
    let dirs = settings.job_dir(job_id);
    let mut meta = load_meta(&dirs, job_id).await?;
    let mut files = artifact_store::read_files(&dirs).await?;

    let audio_path = files.audio_path.clone().ok_or_else(|| WorkerError::MissingInput {
        job_id: job_id.to_string(),
        field: "audio_path",
    })?;

    // spec.md §4.5 dispatch step 2: a read-only balance check before paying
    // for ASR/auto-edit work the job's owner can't afford. A race with
    // another STEP1 run landing here concurrently is ruled out by I1 (a job
    // has at most one live STEP1 task); the debit itself still runs at the
    // end of this function and is the actual enforcement point.
    if store.get_balance(&meta.owner_user_id).await? < 1 {
        return Err(StoreError::InsufficientCredits.into());
    }

    write_status(settings, &dirs, &mut meta, JobStatus::Step1Running, JobStatus::Step1Running.base_progress()).await?;
    artifact_store::clear_error(&dirs).await?;

    let (progress, flusher) =
        spawn_progress_flusher(settings.work_dir.clone(), job_id.to_string(), JobStatus::Step1Running, meta.clone());

    let result: Result<(), WorkerError> = async {
        let srt_path = driver.transcribe(std::path::Path::new(&audio_path), &progress).await?;
        let optimized_srt_path = driver.auto_edit(&srt_path, &progress).await?;

        let original_cues = parse_srt(&tokio::fs::read_to_string(&srt_path).await?)?;
        let optimized_cues = parse_srt(&tokio::fs::read_to_string(&optimized_srt_path).await?)?;
        let lines = merge_step1_lines(&original_cues, &optimized_cues);

        let final_srt = render_final_step1_srt(&lines);
        let final_srt_path = dirs.step1.join("final_step1.srt");
        let final_json_path = dirs.step1.join("final_step1.json");
        artifact_store::atomic_write(&settings.work_dir, &final_srt_path, final_srt.as_bytes()).await?;
        let final_json = serde_json::to_vec_pretty(&Step1Lines { lines })?;
        artifact_store::atomic_write(&settings.work_dir, &final_json_path, &final_json).await?;

        files.srt_path = Some(srt_path.display().to_string());
        files.optimized_srt_path = Some(optimized_srt_path.display().to_string());
        files.final_step1_srt_path = Some(final_srt_path.display().to_string());
        artifact_store::write_files(&settings.work_dir, &dirs, &files).await?;

        store.debit_step1_success(&meta.owner_user_id, job_id).await?;
        Ok(())
    }
    .await;

    flusher.abort();
    result?;

    write_status(settings, &dirs, &mut meta, JobStatus::Step1Ready, JobStatus::Step1Ready.base_progress()).await
}

/// STEP2: topic-segment the confirmed cut -> remap chapter line ids onto
/// the kept Step1 ids (Algorithm B) -> verify coverage (invariant I7).
async fn run_step2(
    settings: &Settings,
    _store: &dyn Store,
    driver: &dyn StageDriver,
    job_id: &str,
) -> Result<(), WorkerError> {
    let dirs = settings.job_dir(job_id);
    let mut meta = load_meta(&dirs, job_id).await?;
    let mut files = artifact_store::read_files(&dirs).await?;

    let final_step1_srt_path = files.final_step1_srt_path.clone().ok_or_else(|| WorkerError::MissingInput {
        job_id: job_id.to_string(),
        field: "final_step1_srt_path",
    })?;

    write_status(settings, &dirs, &mut meta, JobStatus::Step2Running, JobStatus::Step2Running.base_progress()).await?;
    artifact_store::clear_error(&dirs).await?;

    let (progress, flusher) =
        spawn_progress_flusher(settings.work_dir.clone(), job_id.to_string(), JobStatus::Step2Running, meta.clone());

    let result: Result<(), WorkerError> = async {
        let final_json_path = dirs.step1.join("final_step1.json");
        let step1_lines: Step1Lines = serde_json::from_slice(&tokio::fs::read(&final_json_path).await?)?;
        let kept = kept_line_ids(&step1_lines.lines);

        let topics_path = dirs.step2.join("topics.json");
        driver
            .topic_segment(std::path::Path::new(&final_step1_srt_path), &topics_path, &progress)
            .await?;

        let mut chapters: Step2Chapters = serde_json::from_slice(&tokio::fs::read(&topics_path).await?)?;
        remap_chapter_line_ids(&mut chapters.topics, &kept);
        verify_chapter_coverage(&chapters.topics, &kept)?;

        let final_topics_path = dirs.step2.join("final_topics.json");
        let final_topics_json = serde_json::to_vec_pretty(&chapters)?;
        artifact_store::atomic_write(&settings.work_dir, &final_topics_path, &final_topics_json).await?;

        files.topics_path = Some(topics_path.display().to_string());
        files.final_topics_path = Some(final_topics_path.display().to_string());
        artifact_store::write_files(&settings.work_dir, &dirs, &files).await?;

        Ok(())
    }
    .await;

    flusher.abort();
    result?;

    write_status(settings, &dirs, &mut meta, JobStatus::Step2Ready, JobStatus::Step2Ready.base_progress()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_credits_is_detected_through_worker_error() {
        let err = WorkerError::Store(StoreError::InsufficientCredits);
        assert!(err.is_insufficient_credits());
        let other = WorkerError::Store(StoreError::CouponInvalid);
        assert!(!other.is_insufficient_credits());
    }
}
