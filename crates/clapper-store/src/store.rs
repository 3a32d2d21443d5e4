//! `Store` trait abstracting the relational store's two deployment modes
//! (spec.md §4.2, §9): `LocalStore` (single local SQLite file) and
//! `ReplicatedStore` (local replica + remote primary, synced after every
//! commit). Grounded on `magnetar::JobStore`'s async-trait-with-default-
//! methods shape — most methods here have a default implementation that
//! delegates to the free functions in `queue`/`ledger` and then calls the
//! `sync()` hook, so the two implementations only need to supply `pool()`
//! and `sync()`.

use async_trait::async_trait;
use clapper_pipeline::model::{QueueTask, TaskType, User};
use sqlx::sqlite::SqlitePool;

use crate::error::Result;
use crate::ledger::{self, CouponPreview, RedeemOutcome};
use crate::queue;

#[async_trait]
pub trait Store: Send + Sync {
    fn pool(&self) -> &SqlitePool;

    /// Replication hook, called after every write path's commit. A no-op
    /// in local-only mode.
    async fn sync(&self) -> Result<()>;

    async fn enqueue(&self, job_id: &str, task_type: TaskType, payload_json: &str) -> Result<i64> {
        let task_id = queue::enqueue(self.pool(), job_id, task_type, payload_json).await?;
        self.sync().await?;
        Ok(task_id)
    }

    async fn claim_next(&self, worker_id: &str) -> Result<Option<QueueTask>> {
        let task = queue::claim_next(self.pool(), worker_id).await?;
        self.sync().await?;
        Ok(task)
    }

    async fn set_task_succeeded(&self, task_id: i64) -> Result<()> {
        queue::set_task_succeeded(self.pool(), task_id).await?;
        self.sync().await
    }

    async fn set_task_failed(&self, task_id: i64, error_message: &str) -> Result<()> {
        queue::set_task_failed(self.pool(), task_id, error_message).await?;
        self.sync().await
    }

    async fn upsert_user(&self, user_id: &str, email: Option<&str>) -> Result<User> {
        let user = ledger::upsert_user(self.pool(), user_id, email).await?;
        self.sync().await?;
        Ok(user)
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<User>> {
        ledger::get_user(self.pool(), user_id).await
    }

    async fn get_balance(&self, user_id: &str) -> Result<i64> {
        ledger::get_balance(self.pool(), user_id).await
    }

    async fn recent_ledger_entries(
        &self,
        user_id: &str,
        limit: i64,
    ) -> Result<Vec<clapper_pipeline::model::CreditLedgerEntry>> {
        ledger::recent_ledger_entries(self.pool(), user_id, limit).await
    }

    async fn preview_coupon(&self, code: &str) -> Result<CouponPreview> {
        ledger::preview_coupon(self.pool(), code).await
    }

    /// Backfill a coupon discovered in the legacy CSV sheet (Algorithm E,
    /// spec.md §4.9) into `coupon_codes`, so callers can retry `preview_coupon`/
    /// `redeem_coupon` against it. A no-op if the code already exists.
    async fn materialize_sheet_coupon(
        &self,
        code: &str,
        credits: i64,
        expires_at: Option<i64>,
        source: Option<&str>,
    ) -> Result<()> {
        ledger::materialize_sheet_coupon(self.pool(), code, credits, expires_at, source).await?;
        self.sync().await
    }

    async fn redeem_coupon(&self, user_id: &str, code: &str) -> Result<RedeemOutcome> {
        let outcome = ledger::redeem_coupon(self.pool(), user_id, code).await?;
        self.sync().await?;
        Ok(outcome)
    }

    async fn debit_step1_success(&self, user_id: &str, job_id: &str) -> Result<()> {
        ledger::debit_step1_success(self.pool(), user_id, job_id).await?;
        self.sync().await
    }
}

/// Single local database file with WAL journaling (spec.md §4.2
/// "Local-only mode").
pub struct LocalStore {
    pool: SqlitePool,
}

impl LocalStore {
    pub async fn open(path: &str) -> Result<Self> {
        let pool = crate::db::open(path).await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl Store for LocalStore {
    fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn sync(&self) -> Result<()> {
        Ok(())
    }
}

/// Remote primary with a local on-disk replica (spec.md §4.2 "Replicated
/// mode"). The replication protocol itself (Turso/libsql-style) is an
/// external collaborator the same way the ASR/render engines are: `sync()`
/// issues a best-effort HTTP POST to the configured sync endpoint after
/// every commit and logs (never propagates) a failure, since the local
/// replica write has already durably committed by the time `sync` runs.
pub struct ReplicatedStore {
    pool: SqlitePool,
    http: reqwest::Client,
    sync_url: Option<String>,
    auth_token: Option<String>,
}

impl ReplicatedStore {
    pub async fn open(
        local_replica_path: &str,
        database_url: Option<String>,
        auth_token: Option<String>,
    ) -> Result<Self> {
        let pool = crate::db::open(local_replica_path).await?;
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()
            .expect("reqwest client builds");
        Ok(Self {
            pool,
            http,
            sync_url: database_url,
            auth_token,
        })
    }
}

#[async_trait]
impl Store for ReplicatedStore {
    fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn sync(&self) -> Result<()> {
        let Some(url) = &self.sync_url else {
            return Ok(());
        };
        let mut request = self.http.post(format!("{url}/sync"));
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }
        if let Err(err) = request.send().await {
            tracing::warn!(error = %err, "replicated store sync failed; local replica remains authoritative until next sync");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_store_sync_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let store = LocalStore::open(path.to_str().unwrap()).await.unwrap();
        store.sync().await.unwrap();

        let user = store.upsert_user("u1", Some("a@b.com")).await.unwrap();
        assert_eq!(user.user_id, "u1");
    }
}
