//! Row <-> domain-type conversions. `clapper_pipeline::model` owns the
//! canonical shapes; this module only knows how to read/write them against
//! `sqlx::sqlite::SqliteRow`.

use clapper_pipeline::model::{
    Coupon, CouponStatus, CreditLedgerEntry, QueueTask, TaskStatus, TaskType, User, UserStatus,
};
use sqlx::{sqlite::SqliteRow, Row};

use crate::error::{Result, StoreError};

pub fn row_to_user(row: &SqliteRow) -> Result<User> {
    let status_str: String = row.try_get("status")?;
    let status = match status_str.as_str() {
        "ACTIVE" => UserStatus::Active,
        _ => UserStatus::PendingCoupon,
    };
    Ok(User {
        user_id: row.try_get("user_id")?,
        email: row.try_get("email")?,
        status,
        activated_at: row.try_get("activated_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub fn row_to_coupon(row: &SqliteRow) -> Result<Coupon> {
    let status_str: String = row.try_get("status")?;
    let status = match status_str.as_str() {
        "DISABLED" => CouponStatus::Disabled,
        _ => CouponStatus::Active,
    };
    Ok(Coupon {
        coupon_id: row.try_get("coupon_id")?,
        code: row.try_get("code")?,
        credits: row.try_get("credits")?,
        used_count: row.try_get("used_count")?,
        expires_at: row.try_get("expires_at")?,
        status,
        source: row.try_get("source")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub fn row_to_ledger_entry(row: &SqliteRow) -> Result<CreditLedgerEntry> {
    Ok(CreditLedgerEntry {
        entry_id: row.try_get("entry_id")?,
        user_id: row.try_get("user_id")?,
        delta: row.try_get("delta")?,
        reason: row.try_get("reason")?,
        job_id: row.try_get("job_id")?,
        idempotency_key: row.try_get("idempotency_key")?,
        created_at: row.try_get("created_at")?,
    })
}

pub fn row_to_queue_task(row: &SqliteRow) -> Result<QueueTask> {
    let task_type_str: String = row.try_get("task_type")?;
    let task_type = match task_type_str.as_str() {
        "STEP2" => TaskType::Step2,
        _ => TaskType::Step1,
    };
    let status_str: String = row.try_get("status")?;
    let status = parse_task_status(&status_str)
        .ok_or_else(|| StoreError::Database(sqlx::Error::ColumnNotFound("status".into())))?;
    Ok(QueueTask {
        task_id: row.try_get("task_id")?,
        job_id: row.try_get("job_id")?,
        task_type,
        status,
        payload_json: row.try_get("payload_json")?,
        error_message: row.try_get("error_message")?,
        worker_id: row.try_get("worker_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
    })
}

pub fn parse_task_status(s: &str) -> Option<TaskStatus> {
    match s {
        "QUEUED" => Some(TaskStatus::Queued),
        "RUNNING" => Some(TaskStatus::Running),
        "SUCCEEDED" => Some(TaskStatus::Succeeded),
        "FAILED" => Some(TaskStatus::Failed),
        _ => None,
    }
}

pub fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}
