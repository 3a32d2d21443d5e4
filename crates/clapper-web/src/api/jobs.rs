//! Job lifecycle endpoints (spec.md §4.6): create/read a job, upload audio
//! (direct or via presigned OSS url), run/confirm each stage, and build the
//! client-side renderer's config document.
//!
//! Every `/jobs/{id}/*` handler starts by calling [`load_job`], which
//! enforces the "404 not 403" cross-tenant rule (spec.md §4.6
//! "Authorization rule") and reconciles the stored status against on-disk
//! evidence (`clapper_pipeline::state::infer_status`) the same way a worker
//! restart would, per spec.md §4.3.

use std::path::Path as FsPath;

use axum::extract::{Multipart, Path, Query, State};
use axum::response::Response;
use axum::Json;
use clapper_pipeline::manifest::JobDirs;
use clapper_pipeline::model::{JobError, JobFiles, Step1Lines, Step2Chapters, TaskType};
use clapper_pipeline::render::{self, Caption, Segment};
use clapper_pipeline::srt::{parse_srt, render_final_step1_srt};
use clapper_pipeline::state::{evidence_from_disk, infer_status, transition, Event, JobStatus};
use clapper_store::{artifact_store, artifact_store::JobMeta, models::now_unix};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::auth::AuthUser;
use crate::error::{new_request_id, ok, WebError, WebResult};
use crate::state::AppState;

/// No allow-list source exists in the retrieved original (it validates
/// *video* uploads, not audio) — authored fresh for this spec's audio
/// upload slot.
const ALLOWED_AUDIO_EXTENSIONS: &[&str] = &["wav", "mp3", "m4a", "flac", "aac", "ogg", "wma", "opus"];

fn new_job_id() -> String {
    format!("job_{}", &uuid::Uuid::new_v4().simple().to_string()[..12])
}

#[derive(Debug, Serialize)]
pub struct JobView {
    pub job_id: String,
    pub status: String,
    pub progress: u8,
    pub error: Option<JobError>,
    pub created_at: i64,
    pub updated_at: i64,
}

async fn read_job_error(dirs: &JobDirs) -> WebResult<Option<JobError>> {
    match tokio::fs::read(dirs.error_path()).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

async fn job_view(dirs: &JobDirs, meta: &JobMeta) -> WebResult<JobView> {
    let error = if meta.status == JobStatus::Failed.to_string() {
        read_job_error(dirs).await?
    } else {
        None
    };
    Ok(JobView {
        job_id: meta.job_id.clone(),
        status: meta.status.clone(),
        progress: meta.progress,
        error,
        created_at: meta.created_at,
        updated_at: meta.updated_at,
    })
}

/// Load `job_id`'s metadata, enforcing ownership and reconciling its
/// stored status against disk evidence. A mismatched owner and a missing
/// job are indistinguishable on the wire (404), so a probing caller can't
/// learn whether a job id belongs to someone else.
async fn load_job(state: &AppState, owner_user_id: &str, job_id: &str) -> WebResult<(JobDirs, JobMeta)> {
    let dirs = state.settings.job_dir(job_id);
    let mut meta = artifact_store::read_meta(&dirs).await?.ok_or(WebError::NotFound)?;
    if meta.owner_user_id != owner_user_id {
        return Err(WebError::NotFound);
    }

    let stored: JobStatus = meta.status.parse()?;
    let evidence = evidence_from_disk(&dirs.base);
    let reconciled = infer_status(stored, &evidence);
    if reconciled != stored {
        meta.status = reconciled.to_string();
        meta.updated_at = now_unix();
        artifact_store::write_meta(&state.settings.work_dir, &dirs, &meta).await?;
    }
    Ok((dirs, meta))
}

fn require_status(meta: &JobMeta, allowed: &[JobStatus]) -> WebResult<JobStatus> {
    let status: JobStatus = meta.status.parse()?;
    if allowed.contains(&status) {
        Ok(status)
    } else {
        Err(WebError::InvalidStepState(format!(
            "job is {status}, expected one of {allowed:?}"
        )))
    }
}

async fn apply_transition(state: &AppState, dirs: &JobDirs, meta: &mut JobMeta, event: Event) -> WebResult<()> {
    let from: JobStatus = meta.status.parse()?;
    let to = transition(from, event)?;
    meta.status = to.to_string();
    meta.progress = to.base_progress();
    meta.updated_at = now_unix();
    artifact_store::write_meta(&state.settings.work_dir, dirs, meta).await?;
    Ok(())
}

/// `POST /jobs` (requires the caller's account to be ACTIVE).
pub async fn create_job(State(state): State<AppState>, AuthUser(user): AuthUser) -> WebResult<Response> {
    let request_id = new_request_id();

    let account = state.store.get_user(&user.user_id).await?;
    let is_active = matches!(account, Some(u) if u.status == clapper_pipeline::model::UserStatus::Active);
    if !is_active {
        return Err(WebError::InvalidStepState(
            "account is not ACTIVE; redeem a coupon before creating a job".into(),
        ));
    }

    let job_id = new_job_id();
    let dirs = state.settings.job_dir(&job_id);
    artifact_store::ensure_job_dirs(&dirs).await?;

    let now = now_unix();
    let meta = JobMeta {
        job_id: job_id.clone(),
        owner_user_id: user.user_id.clone(),
        status: JobStatus::Created.to_string(),
        progress: JobStatus::Created.base_progress(),
        created_at: now,
        updated_at: now,
    };
    artifact_store::write_meta(&state.settings.work_dir, &dirs, &meta).await?;
    artifact_store::write_files(&state.settings.work_dir, &dirs, &JobFiles::default()).await?;

    Ok(ok(&request_id, job_view(&dirs, &meta).await?))
}

/// `GET /jobs/{id}`.
pub async fn get_job(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(job_id): Path<String>,
) -> WebResult<Response> {
    let request_id = new_request_id();
    let (dirs, meta) = load_job(&state, &user.user_id, &job_id).await?;
    Ok(ok(&request_id, job_view(&dirs, &meta).await?))
}

#[derive(Debug, Deserialize)]
pub struct OssUploadUrlRequest {
    pub suffix: Option<String>,
    pub expires_seconds: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct OssUploadUrlResponse {
    pub object_key: String,
    pub upload_url: String,
    pub expires_seconds: i64,
}

/// `POST /jobs/{id}/oss-upload-url`.
pub async fn create_oss_upload_url(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(job_id): Path<String>,
    Json(body): Json<OssUploadUrlRequest>,
) -> WebResult<Response> {
    let request_id = new_request_id();
    let (_dirs, meta) = load_job(&state, &user.user_id, &job_id).await?;
    require_status(&meta, &[JobStatus::Created, JobStatus::UploadReady])?;

    let oss = state
        .oss
        .as_ref()
        .ok_or_else(|| WebError::BadRequest("object storage is not configured".into()))?;

    let suffix = body.suffix.as_deref().unwrap_or(".wav");
    let object_key = oss.build_object_key_for_job(&job_id, suffix);
    let upload_url = oss
        .get_presigned_put_url(&object_key, body.expires_seconds)
        .await
        .map_err(|err| WebError::BadRequest(err.to_string()))?;
    let expires_seconds = body.expires_seconds.unwrap_or(state.settings.oss_signed_url_ttl_seconds);

    Ok(ok(
        &request_id,
        OssUploadUrlResponse { object_key, upload_url, expires_seconds },
    ))
}

/// Persist `audio_path`, mark the job `UPLOAD_READY`, regardless of
/// whether the bytes arrived via OSS or direct multipart.
async fn mark_upload_ready(state: &AppState, dirs: &JobDirs, meta: &mut JobMeta, audio_path: String) -> WebResult<()> {
    let mut files = artifact_store::read_files(dirs).await?;
    files.audio_path = Some(audio_path);
    artifact_store::write_files(&state.settings.work_dir, dirs, &files).await?;
    apply_transition(state, dirs, meta, Event::UploadAudio).await
}

#[derive(Debug, Deserialize)]
pub struct OssUploadReadyRequest {
    pub object_key: String,
}

/// `POST /jobs/{id}/audio-oss-ready`: the client uploaded directly to the
/// presigned URL; fetch the object down into `input/` so the worker's
/// local-filesystem `audio_path` contract stays uniform across both
/// upload paths.
pub async fn audio_oss_ready(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(job_id): Path<String>,
    Json(body): Json<OssUploadReadyRequest>,
) -> WebResult<Response> {
    let request_id = new_request_id();
    let (dirs, mut meta) = load_job(&state, &user.user_id, &job_id).await?;
    require_status(&meta, &[JobStatus::Created, JobStatus::UploadReady])?;

    let oss = state
        .oss
        .as_ref()
        .ok_or_else(|| WebError::BadRequest("object storage is not configured".into()))?;

    let ext = FsPath::new(&body.object_key)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("wav")
        .to_lowercase();
    if !ALLOWED_AUDIO_EXTENSIONS.contains(&ext.as_str()) {
        return Err(WebError::UnsupportedAudioFormat(ext));
    }

    let dest = dirs.input.join(format!("audio.{ext}"));
    oss.download_object_to_file(&body.object_key, &dest)
        .await
        .map_err(|err| WebError::BadRequest(err.to_string()))?;

    mark_upload_ready(&state, &dirs, &mut meta, dest.display().to_string()).await?;
    Ok(ok(&request_id, job_view(&dirs, &meta).await?))
}

/// `POST /jobs/{id}/audio`: direct multipart upload (spec.md §4.6 "Upload
/// validation"). Streams into `input/`, enforcing the size cap and
/// extension allow-list as it goes.
pub async fn upload_audio(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(job_id): Path<String>,
    mut multipart: Multipart,
) -> WebResult<Response> {
    let request_id = new_request_id();
    let (dirs, mut meta) = load_job(&state, &user.user_id, &job_id).await?;
    require_status(&meta, &[JobStatus::Created, JobStatus::UploadReady])?;

    let mut field = multipart
        .next_field()
        .await
        .map_err(|err| WebError::BadRequest(err.to_string()))?
        .ok_or_else(|| WebError::BadRequest("missing file field".into()))?;

    let filename = field.file_name().unwrap_or("audio").to_string();
    let ext = FsPath::new(&filename)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    if !ALLOWED_AUDIO_EXTENSIONS.contains(&ext.as_str()) {
        return Err(WebError::UnsupportedAudioFormat(ext));
    }

    let dest = dirs.input.join(format!("audio.{ext}"));
    let max_bytes = state.settings.max_upload_mb.saturating_mul(1024 * 1024);

    let mut file = tokio::fs::File::create(&dest).await?;
    let mut written: u64 = 0;
    loop {
        let chunk = match field.chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(err) => {
                drop(file);
                let _ = tokio::fs::remove_file(&dest).await;
                return Err(WebError::BadRequest(err.to_string()));
            }
        };
        written += chunk.len() as u64;
        if written > max_bytes {
            drop(file);
            let _ = tokio::fs::remove_file(&dest).await;
            return Err(WebError::UploadTooLarge);
        }
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    drop(file);

    mark_upload_ready(&state, &dirs, &mut meta, dest.display().to_string()).await?;
    Ok(ok(&request_id, job_view(&dirs, &meta).await?))
}

/// `POST /jobs/{id}/step1/run`.
pub async fn run_step1(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(job_id): Path<String>,
) -> WebResult<Response> {
    let request_id = new_request_id();
    let (dirs, mut meta) = load_job(&state, &user.user_id, &job_id).await?;
    require_status(&meta, &[JobStatus::UploadReady])?;

    let balance = state.store.get_balance(&user.user_id).await?;
    if balance < 1 {
        return Err(WebError::InvalidStepState(
            "insufficient credits to run step1; redeem a coupon and try again".into(),
        ));
    }

    state.store.enqueue(&job_id, TaskType::Step1, "{}").await?;
    apply_transition(&state, &dirs, &mut meta, Event::EnqueueStep1).await?;
    Ok(ok(&request_id, job_view(&dirs, &meta).await?))
}

const STEP1_READABLE: &[JobStatus] = &[
    JobStatus::Step1Ready,
    JobStatus::Step1Confirmed,
    JobStatus::Step2Running,
    JobStatus::Step2Ready,
    JobStatus::Step2Confirmed,
];

/// `GET /jobs/{id}/step1`.
pub async fn get_step1(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(job_id): Path<String>,
) -> WebResult<Response> {
    let request_id = new_request_id();
    let (dirs, meta) = load_job(&state, &user.user_id, &job_id).await?;
    require_status(&meta, STEP1_READABLE)?;

    let bytes = tokio::fs::read(dirs.step1.join("final_step1.json")).await?;
    let lines: Step1Lines = serde_json::from_slice(&bytes)?;
    Ok(ok(&request_id, lines))
}

/// `PUT /jobs/{id}/step1/confirm`: persist the caller's edits, rewrite
/// `final_step1.srt` from them, then advance the job.
pub async fn confirm_step1(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(job_id): Path<String>,
    Json(body): Json<Step1Lines>,
) -> WebResult<Response> {
    let request_id = new_request_id();
    let (dirs, mut meta) = load_job(&state, &user.user_id, &job_id).await?;
    require_status(&meta, &[JobStatus::Step1Ready])?;

    let final_srt_path = dirs.step1.join("final_step1.srt");
    let final_json_path = dirs.step1.join("final_step1.json");
    let final_srt = render_final_step1_srt(&body.lines);
    artifact_store::atomic_write(&state.settings.work_dir, &final_srt_path, final_srt.as_bytes()).await?;
    artifact_store::atomic_write(
        &state.settings.work_dir,
        &final_json_path,
        &serde_json::to_vec_pretty(&body)?,
    )
    .await?;
    artifact_store::write_marker(&state.settings.work_dir, &dirs.step1.join(".confirmed")).await?;

    let mut files = artifact_store::read_files(&dirs).await?;
    files.final_step1_srt_path = Some(final_srt_path.display().to_string());
    artifact_store::write_files(&state.settings.work_dir, &dirs, &files).await?;

    apply_transition(&state, &dirs, &mut meta, Event::ConfirmStep1).await?;
    Ok(ok(&request_id, job_view(&dirs, &meta).await?))
}

/// `POST /jobs/{id}/step2/run`.
pub async fn run_step2(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(job_id): Path<String>,
) -> WebResult<Response> {
    let request_id = new_request_id();
    let (dirs, mut meta) = load_job(&state, &user.user_id, &job_id).await?;
    require_status(&meta, &[JobStatus::Step1Confirmed])?;

    state.store.enqueue(&job_id, TaskType::Step2, "{}").await?;
    apply_transition(&state, &dirs, &mut meta, Event::EnqueueStep2).await?;
    Ok(ok(&request_id, job_view(&dirs, &meta).await?))
}

const STEP2_READABLE: &[JobStatus] = &[JobStatus::Step2Ready, JobStatus::Step2Confirmed];

/// `GET /jobs/{id}/step2`.
pub async fn get_step2(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(job_id): Path<String>,
) -> WebResult<Response> {
    let request_id = new_request_id();
    let (dirs, meta) = load_job(&state, &user.user_id, &job_id).await?;
    require_status(&meta, STEP2_READABLE)?;

    let bytes = tokio::fs::read(dirs.step2.join("final_topics.json")).await?;
    let chapters: Step2Chapters = serde_json::from_slice(&bytes)?;
    Ok(ok(&request_id, chapters))
}

/// `PUT /jobs/{id}/step2/confirm`.
pub async fn confirm_step2(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(job_id): Path<String>,
    Json(body): Json<Step2Chapters>,
) -> WebResult<Response> {
    let request_id = new_request_id();
    let (dirs, mut meta) = load_job(&state, &user.user_id, &job_id).await?;
    require_status(&meta, &[JobStatus::Step2Ready])?;

    let final_topics_path = dirs.step2.join("final_topics.json");
    artifact_store::atomic_write(
        &state.settings.work_dir,
        &final_topics_path,
        &serde_json::to_vec_pretty(&body)?,
    )
    .await?;
    artifact_store::write_marker(&state.settings.work_dir, &dirs.step2.join(".confirmed")).await?;

    let mut files = artifact_store::read_files(&dirs).await?;
    files.final_topics_path = Some(final_topics_path.display().to_string());
    artifact_store::write_files(&state.settings.work_dir, &dirs, &files).await?;

    apply_transition(&state, &dirs, &mut meta, Event::ConfirmStep2).await?;
    Ok(ok(&request_id, job_view(&dirs, &meta).await?))
}

#[derive(Debug, Deserialize)]
pub struct RenderConfigQuery {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

/// `GET /jobs/{id}/render/config` (Algorithm C). Invokes the external
/// cut-srt builder on demand and caches its output under `render/`, since
/// the confirmed Step1/Step2 artifacts it's built from are immutable once
/// `STEP2_CONFIRMED`.
pub async fn render_config(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(job_id): Path<String>,
    Query(query): Query<RenderConfigQuery>,
) -> WebResult<Response> {
    let request_id = new_request_id();
    let (dirs, meta) = load_job(&state, &user.user_id, &job_id).await?;
    require_status(&meta, &[JobStatus::Step2Confirmed, JobStatus::Succeeded])?;

    let files = artifact_store::read_files(&dirs).await?;
    let final_step1_srt_path = files
        .final_step1_srt_path
        .ok_or_else(|| WebError::Internal(anyhow::anyhow!("job {job_id} is missing final_step1_srt_path")))?;

    let cut_srt_path = dirs.render.join("cut.srt");
    if !cut_srt_path.exists() {
        state
            .driver
            .build_cut_srt(FsPath::new(&final_step1_srt_path), &cut_srt_path, state.settings.cut_merge_gap)
            .await?;
    }

    let cues = parse_srt(&tokio::fs::read_to_string(&cut_srt_path).await?)?;
    let captions: Vec<Caption> = cues
        .iter()
        .map(|cue| Caption {
            index: cue.index,
            start_sec: cue.start_sec,
            end_sec: cue.end_sec,
            text: cue.content.clone(),
        })
        .collect();
    let segments: Vec<Segment> = cues
        .iter()
        .map(|cue| Segment { start_sec: cue.start_sec, end_sec: cue.end_sec })
        .collect();

    let topics_bytes = tokio::fs::read(dirs.step2.join("final_topics.json")).await?;
    let chapters: Step2Chapters = serde_json::from_slice(&topics_bytes)?;

    let config = render::build_render_config(&captions, &segments, &chapters.topics, query.width, query.height, query.fps)?;
    Ok(ok(&request_id, config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_has_expected_shape() {
        let id = new_job_id();
        assert!(id.starts_with("job_"));
        assert_eq!(id.len(), "job_".len() + 12);
    }

    #[test]
    fn audio_extension_allow_list_rejects_video() {
        assert!(!ALLOWED_AUDIO_EXTENSIONS.contains(&"mp4"));
        assert!(ALLOWED_AUDIO_EXTENSIONS.contains(&"wav"));
    }
}
