//! Entity types shared across the store and web crates.
//!
//! Tagged structs over dynamic dicts, per the source-pattern translation
//! noted for "dynamic dict-valued payload blobs": the queue payload and
//! job-files manifest are explicit structs with optional fields rather than
//! untyped JSON, persisted as JSON text in the respective tables/files.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserStatus {
    PendingCoupon,
    Active,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub user_id: String,
    pub email: Option<String>,
    pub status: UserStatus,
    pub activated_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CouponStatus {
    Active,
    Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Coupon {
    pub coupon_id: i64,
    pub code: String,
    pub credits: i64,
    pub used_count: i32,
    pub expires_at: Option<i64>,
    pub status: CouponStatus,
    pub source: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Coupon {
    /// Normalize a user-submitted coupon code: trim then uppercase.
    pub fn normalize_code(raw: &str) -> String {
        raw.trim().to_uppercase()
    }
}

/// `reason` values for `credit_ledger` rows. Stored as text; new reasons
/// may be added without a migration since the column is just `TEXT`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerReason {
    CouponRedeem,
    JobStep1Success,
}

impl LedgerReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerReason::CouponRedeem => "COUPON_REDEEM",
            LedgerReason::JobStep1Success => "JOB_STEP1_SUCCESS",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditLedgerEntry {
    pub entry_id: i64,
    pub user_id: String,
    pub delta: i64,
    pub reason: String,
    pub job_id: Option<String>,
    pub idempotency_key: String,
    pub created_at: i64,
}

/// Idempotency key for a coupon redemption ledger row.
pub fn coupon_idempotency_key(code: &str) -> String {
    format!("coupon:{code}")
}

/// Idempotency key for a STEP1-success debit ledger row.
pub fn step1_success_idempotency_key(job_id: &str) -> String {
    format!("job:{job_id}:step1_success")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobError {
    pub code: String,
    pub message: String,
}

/// Per-job manifest mapping canonical slots to absolute paths. Missing
/// slots are `None`. Persisted verbatim as `job.files.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobFiles {
    pub audio_path: Option<String>,
    pub srt_path: Option<String>,
    pub optimized_srt_path: Option<String>,
    pub final_step1_srt_path: Option<String>,
    pub topics_path: Option<String>,
    pub final_topics_path: Option<String>,
    pub final_video_path: Option<String>,
}

impl JobFiles {
    /// All non-null slot values, for the cleanup sweep's artifact-path scan.
    pub fn declared_paths(&self) -> Vec<&str> {
        [
            &self.audio_path,
            &self.srt_path,
            &self.optimized_srt_path,
            &self.final_step1_srt_path,
            &self.topics_path,
            &self.final_topics_path,
            &self.final_video_path,
        ]
        .into_iter()
        .filter_map(|slot| slot.as_deref())
        .collect()
    }

    /// Null out every slot (cleanup step 3).
    pub fn clear(&mut self) {
        *self = JobFiles::default();
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step1Line {
    pub line_id: i64,
    pub start_sec: f64,
    pub end_sec: f64,
    pub original_text: String,
    pub optimized_text: String,
    pub ai_suggest_remove: bool,
    pub user_final_remove: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step1Lines {
    pub lines: Vec<Step1Line>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step2Chapter {
    pub chapter_id: i64,
    pub title: String,
    pub summary: String,
    pub start_sec: f64,
    pub end_sec: f64,
    pub line_ids: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step2Chapters {
    pub topics: Vec<Step2Chapter>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    Step1,
    Step2,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Step1 => "STEP1",
            TaskType::Step2 => "STEP2",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "QUEUED",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Succeeded => "SUCCEEDED",
            TaskStatus::Failed => "FAILED",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueTask {
    pub task_id: i64,
    pub job_id: String,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub payload_json: String,
    pub error_message: Option<String>,
    pub worker_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
}
