//! Task queue: enqueue/claim_next/set_succeeded/set_failed (spec.md §4.4).
//!
//! The claim algorithm is grounded directly on `magnetar::backends::sqlite
//! ::SqliteStore::claim_pending`'s conditional-UPDATE-under-transaction
//! shape, generalized from a single `rowid` target to the `BEGIN IMMEDIATE`
//! + retry-three-times protocol spec.md §4.4 specifies explicitly (a plain
//! `pool.begin()` issues `BEGIN DEFERRED`, which doesn't give us the
//! write-lock-up-front semantics the race needs, so the claim path issues
//! `BEGIN IMMEDIATE` as raw SQL over a checked-out connection).

use clapper_pipeline::model::{QueueTask, TaskType};
use sqlx::sqlite::SqlitePool;
use sqlx::Row;

use crate::error::Result;
use crate::models::{now_unix, row_to_queue_task};

const MAX_CLAIM_RETRIES: u32 = 3;

/// Coalesces on `(job_id, task_type, status IN (QUEUED, RUNNING))`: if a
/// live row already exists, its `task_id` is returned without inserting
/// (I1, L1).
pub async fn enqueue(
    pool: &SqlitePool,
    job_id: &str,
    task_type: TaskType,
    payload_json: &str,
) -> Result<i64> {
    let now = now_unix();

    if let Some(row) = sqlx::query(
        "SELECT task_id FROM queue_tasks
         WHERE job_id = ? AND task_type = ? AND status IN ('QUEUED', 'RUNNING')
         LIMIT 1",
    )
    .bind(job_id)
    .bind(task_type.as_str())
    .fetch_optional(pool)
    .await?
    {
        return Ok(row.try_get::<i64, _>("task_id")?);
    }

    let result = sqlx::query(
        "INSERT INTO queue_tasks (job_id, task_type, status, payload_json, created_at, updated_at)
         VALUES (?, ?, 'QUEUED', ?, ?, ?)",
    )
    .bind(job_id)
    .bind(task_type.as_str())
    .bind(payload_json)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Atomic single-claim per spec.md §4.4's algorithm: `BEGIN IMMEDIATE`,
/// select the oldest queued task, conditionally update it to RUNNING, and
/// retry up to three times if another worker won the race before giving
/// up and returning `None`.
pub async fn claim_next(pool: &SqlitePool, worker_id: &str) -> Result<Option<QueueTask>> {
    for _attempt in 0..MAX_CLAIM_RETRIES {
        let mut conn = pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

        let candidate = sqlx::query(
            "SELECT task_id FROM queue_tasks WHERE status = 'QUEUED' ORDER BY task_id ASC LIMIT 1",
        )
        .fetch_optional(&mut *conn)
        .await?;

        let Some(candidate) = candidate else {
            sqlx::query("ROLLBACK").execute(&mut *conn).await?;
            return Ok(None);
        };
        let task_id: i64 = candidate.try_get("task_id")?;
        let now = now_unix();

        let result = sqlx::query(
            "UPDATE queue_tasks
             SET status = 'RUNNING', worker_id = ?, started_at = COALESCE(started_at, ?),
                 updated_at = ?, error_message = NULL
             WHERE task_id = ? AND status = 'QUEUED'",
        )
        .bind(worker_id)
        .bind(now)
        .bind(now)
        .bind(task_id)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            // another worker won the race between our SELECT and UPDATE
            sqlx::query("ROLLBACK").execute(&mut *conn).await?;
            continue;
        }

        let row = sqlx::query("SELECT * FROM queue_tasks WHERE task_id = ?")
            .bind(task_id)
            .fetch_one(&mut *conn)
            .await?;
        sqlx::query("COMMIT").execute(&mut *conn).await?;

        return Ok(Some(row_to_queue_task(&row)?));
    }
    Ok(None)
}

pub async fn set_task_succeeded(pool: &SqlitePool, task_id: i64) -> Result<()> {
    let now = now_unix();
    sqlx::query(
        "UPDATE queue_tasks SET status = 'SUCCEEDED', updated_at = ?, finished_at = ?
         WHERE task_id = ?",
    )
    .bind(now)
    .bind(now)
    .bind(task_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn set_task_failed(pool: &SqlitePool, task_id: i64, error_message: &str) -> Result<()> {
    let now = now_unix();
    sqlx::query(
        "UPDATE queue_tasks SET status = 'FAILED', error_message = ?, updated_at = ?, finished_at = ?
         WHERE task_id = ?",
    )
    .bind(error_message)
    .bind(now)
    .bind(now)
    .bind(task_id)
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    async fn test_pool() -> SqlitePool {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let pool = db::open(path.to_str().unwrap()).await.unwrap();
        std::mem::forget(dir); // keep the tempdir alive for the pool's lifetime
        pool
    }

    #[tokio::test]
    async fn enqueue_coalesces_live_rows() {
        let pool = test_pool().await;
        let first = enqueue(&pool, "job_1", TaskType::Step1, "{}").await.unwrap();
        let second = enqueue(&pool, "job_1", TaskType::Step1, "{}").await.unwrap();
        assert_eq!(first, second);

        let count: i64 = sqlx::query("SELECT COUNT(*) AS c FROM queue_tasks")
            .fetch_one(&pool)
            .await
            .unwrap()
            .try_get("c")
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn claim_next_is_fifo_and_single_claim() {
        let pool = test_pool().await;
        let t1 = enqueue(&pool, "job_1", TaskType::Step1, "{}").await.unwrap();
        let t2 = enqueue(&pool, "job_2", TaskType::Step1, "{}").await.unwrap();

        let claimed = claim_next(&pool, "worker-a").await.unwrap().unwrap();
        assert_eq!(claimed.task_id, t1);

        let claimed2 = claim_next(&pool, "worker-a").await.unwrap().unwrap();
        assert_eq!(claimed2.task_id, t2);

        assert!(claim_next(&pool, "worker-a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn set_succeeded_and_failed_update_status() {
        let pool = test_pool().await;
        let t1 = enqueue(&pool, "job_1", TaskType::Step1, "{}").await.unwrap();
        claim_next(&pool, "worker-a").await.unwrap();
        set_task_succeeded(&pool, t1).await.unwrap();

        let row = sqlx::query("SELECT status FROM queue_tasks WHERE task_id = ?")
            .bind(t1)
            .fetch_one(&pool)
            .await
            .unwrap();
        let status: String = row.try_get("status").unwrap();
        assert_eq!(status, "SUCCEEDED");
    }
}
