//! Credit ledger and coupon redemption (Algorithm D, spec.md §4.7).
//!
//! Grounded on spec.md §4.7/§4.9 directly; the `BEGIN IMMEDIATE` +
//! conditional-UPDATE pattern mirrors `queue::claim_next`'s claim algorithm,
//! applied here to coupon single-use enforcement (I3) and the STEP1 debit
//! idempotency key (I4).

use clapper_pipeline::model::{
    coupon_idempotency_key, step1_success_idempotency_key, LedgerReason,
};
use sqlx::sqlite::SqlitePool;
use sqlx::Row;

use crate::error::{Result, StoreError};
use crate::models::now_unix;

/// Read a user row without materializing it (spec.md §6.3 `/me`: a caller
/// whose subject was never upserted gets a `PENDING_INVITE` shell instead).
pub async fn get_user(pool: &SqlitePool, user_id: &str) -> Result<Option<clapper_pipeline::model::User>> {
    let row = sqlx::query("SELECT * FROM users WHERE user_id = ?")
        .bind(user_id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(crate::models::row_to_user).transpose()
}

pub async fn get_balance(pool: &SqlitePool, user_id: &str) -> Result<i64> {
    let row = sqlx::query("SELECT COALESCE(SUM(delta), 0) AS balance FROM credit_ledger WHERE user_id = ?")
        .bind(user_id)
        .fetch_one(pool)
        .await?;
    Ok(row.try_get("balance")?)
}

pub async fn recent_ledger_entries(
    pool: &SqlitePool,
    user_id: &str,
    limit: i64,
) -> Result<Vec<clapper_pipeline::model::CreditLedgerEntry>> {
    let rows = sqlx::query(
        "SELECT * FROM credit_ledger WHERE user_id = ? ORDER BY created_at DESC LIMIT ?",
    )
    .bind(user_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    rows.iter().map(crate::models::row_to_ledger_entry).collect()
}

/// Ensure a user row exists (materialize on first sight, §4.7 JWT
/// verification step). Returns the (possibly just-created) user.
pub async fn upsert_user(
    pool: &SqlitePool,
    user_id: &str,
    email: Option<&str>,
) -> Result<clapper_pipeline::model::User> {
    let now = now_unix();
    sqlx::query(
        "INSERT INTO users (user_id, email, status, created_at, updated_at)
         VALUES (?, ?, 'PENDING_COUPON', ?, ?)
         ON CONFLICT(user_id) DO UPDATE SET
             email = COALESCE(excluded.email, users.email),
             updated_at = excluded.updated_at",
    )
    .bind(user_id)
    .bind(email)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    let row = sqlx::query("SELECT * FROM users WHERE user_id = ?")
        .bind(user_id)
        .fetch_one(pool)
        .await?;
    crate::models::row_to_user(&row)
}

/// `/public/coupons/verify` (spec.md §4.6): the same validity checks
/// `redeem_coupon` runs before its conditional UPDATE, but read-only — no
/// transaction, no mutation, safe to call unauthenticated.
pub struct CouponPreview {
    pub code: String,
    pub credits: i64,
}

pub async fn preview_coupon(pool: &SqlitePool, raw_code: &str) -> Result<CouponPreview> {
    let code = clapper_pipeline::model::Coupon::normalize_code(raw_code);
    if code.is_empty() {
        return Err(StoreError::CouponInvalid);
    }

    let row = sqlx::query("SELECT * FROM coupon_codes WHERE code = ?")
        .bind(&code)
        .fetch_optional(pool)
        .await?;
    let Some(row) = row else {
        return Err(StoreError::CouponInvalid);
    };

    let status: String = row.try_get("status").unwrap_or_default();
    let used_count: i32 = row.try_get("used_count").unwrap_or(0);
    let credits: i64 = row.try_get("credits").unwrap_or(0);
    let expires_at: Option<i64> = row.try_get("expires_at").unwrap_or(None);

    if status != "ACTIVE" || used_count != 0 || credits <= 0 {
        return Err(StoreError::CouponExhausted);
    }
    if let Some(expires_at) = expires_at {
        if expires_at <= now_unix() {
            return Err(StoreError::CouponExpired);
        }
    }

    Ok(CouponPreview { code, credits })
}

/// Algorithm D — atomic coupon redemption.
pub struct RedeemOutcome {
    pub already_activated: bool,
    pub coupon_redeemed: bool,
    pub granted_credits: i64,
    pub balance: i64,
}

pub async fn redeem_coupon(pool: &SqlitePool, user_id: &str, raw_code: &str) -> Result<RedeemOutcome> {
    let code = clapper_pipeline::model::Coupon::normalize_code(raw_code);
    if code.is_empty() {
        return Err(StoreError::CouponInvalid);
    }

    let mut conn = pool.acquire().await?;
    sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

    let coupon_row = sqlx::query("SELECT * FROM coupon_codes WHERE code = ?")
        .bind(&code)
        .fetch_optional(&mut *conn)
        .await?;

    let Some(coupon_row) = coupon_row else {
        sqlx::query("ROLLBACK").execute(&mut *conn).await?;
        return Err(StoreError::CouponInvalid);
    };

    let status: String = coupon_row.try_get("status").unwrap_or_default();
    let credits: i64 = coupon_row.try_get("credits").unwrap_or(0);
    let expires_at: Option<i64> = coupon_row.try_get("expires_at").unwrap_or(None);
    let now = now_unix();

    if status != "ACTIVE" || credits <= 0 {
        sqlx::query("ROLLBACK").execute(&mut *conn).await?;
        return Err(StoreError::CouponExhausted);
    }
    if let Some(expires_at) = expires_at {
        if expires_at <= now {
            sqlx::query("ROLLBACK").execute(&mut *conn).await?;
            return Err(StoreError::CouponExpired);
        }
    }

    let update_result = sqlx::query(
        "UPDATE coupon_codes SET used_count = 1, status = 'DISABLED', updated_at = ?
         WHERE code = ? AND status = 'ACTIVE' AND used_count = 0",
    )
    .bind(now)
    .bind(&code)
    .execute(&mut *conn)
    .await?;

    if update_result.rows_affected() == 0 {
        sqlx::query("ROLLBACK").execute(&mut *conn).await?;
        return Err(StoreError::CouponExhausted);
    }

    let idempotency_key = coupon_idempotency_key(&code);
    let insert_result = sqlx::query(
        "INSERT OR IGNORE INTO credit_ledger (user_id, delta, reason, job_id, idempotency_key, created_at)
         VALUES (?, ?, ?, NULL, ?, ?)",
    )
    .bind(user_id)
    .bind(credits)
    .bind(LedgerReason::CouponRedeem.as_str())
    .bind(&idempotency_key)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    if insert_result.rows_affected() == 0 {
        // the idempotency key already existed: another redemption of this
        // exact coupon code already completed (shouldn't happen given the
        // conditional UPDATE above, but the INSERT OR IGNORE is the sole
        // coordination primitive per spec.md §9, so it is checked too).
        sqlx::query("ROLLBACK").execute(&mut *conn).await?;
        return Err(StoreError::CouponExhausted);
    }

    let user_row = sqlx::query("SELECT status FROM users WHERE user_id = ?")
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?;
    let already_activated = user_row
        .as_ref()
        .map(|r| r.try_get::<String, _>("status").unwrap_or_default() == "ACTIVE")
        .unwrap_or(false);

    sqlx::query(
        "INSERT INTO users (user_id, status, activated_at, created_at, updated_at)
         VALUES (?, 'ACTIVE', ?, ?, ?)
         ON CONFLICT(user_id) DO UPDATE SET
             status = 'ACTIVE',
             activated_at = COALESCE(users.activated_at, excluded.activated_at),
             updated_at = excluded.updated_at",
    )
    .bind(user_id)
    .bind(now)
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    let balance_row = sqlx::query(
        "SELECT COALESCE(SUM(delta), 0) AS balance FROM credit_ledger WHERE user_id = ?",
    )
    .bind(user_id)
    .fetch_one(&mut *conn)
    .await?;
    let balance: i64 = balance_row.try_get("balance")?;

    sqlx::query("COMMIT").execute(&mut *conn).await?;

    Ok(RedeemOutcome {
        already_activated,
        coupon_redeemed: true,
        granted_credits: credits,
        balance,
    })
}

/// Materialize a coupon discovered in the legacy CSV sheet (Algorithm E,
/// spec.md §4.9) into the primary `coupon_codes` table, so the rest of the
/// redemption path (single-use enforcement, ledger entries) runs through
/// the same `preview_coupon`/`redeem_coupon` code as a DB-seeded coupon.
/// A no-op if the code already exists (`INSERT OR IGNORE`) — the sheet is
/// only ever consulted as a fallback after a `coupon_codes` miss.
pub async fn materialize_sheet_coupon(
    pool: &SqlitePool,
    code: &str,
    credits: i64,
    expires_at: Option<i64>,
    source: Option<&str>,
) -> Result<()> {
    let now = now_unix();
    sqlx::query(
        "INSERT OR IGNORE INTO coupon_codes (code, credits, used_count, status, expires_at, source, created_at, updated_at)
         VALUES (?, ?, 0, 'ACTIVE', ?, ?, ?, ?)",
    )
    .bind(code)
    .bind(credits)
    .bind(expires_at)
    .bind(source)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(())
}

/// STEP1 credit consumption (I2, I4): debit one credit, idempotent on
/// `job:<id>:step1_success`. If a prior debit already exists for this job,
/// this is a no-op (safe idempotent re-run). If the balance would go
/// negative, the debit is rolled back and `InsufficientCredits` is raised.
pub async fn debit_step1_success(pool: &SqlitePool, user_id: &str, job_id: &str) -> Result<()> {
    let idempotency_key = step1_success_idempotency_key(job_id);

    let mut conn = pool.acquire().await?;
    sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

    let existing = sqlx::query("SELECT 1 FROM credit_ledger WHERE idempotency_key = ?")
        .bind(&idempotency_key)
        .fetch_optional(&mut *conn)
        .await?;
    if existing.is_some() {
        sqlx::query("ROLLBACK").execute(&mut *conn).await?;
        return Ok(());
    }

    let balance_row = sqlx::query(
        "SELECT COALESCE(SUM(delta), 0) AS balance FROM credit_ledger WHERE user_id = ?",
    )
    .bind(user_id)
    .fetch_one(&mut *conn)
    .await?;
    let balance: i64 = balance_row.try_get("balance")?;

    if balance < 1 {
        sqlx::query("ROLLBACK").execute(&mut *conn).await?;
        return Err(StoreError::InsufficientCredits);
    }

    let now = now_unix();
    sqlx::query(
        "INSERT INTO credit_ledger (user_id, delta, reason, job_id, idempotency_key, created_at)
         VALUES (?, -1, ?, ?, ?, ?)",
    )
    .bind(user_id)
    .bind(LedgerReason::JobStep1Success.as_str())
    .bind(job_id)
    .bind(&idempotency_key)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    sqlx::query("COMMIT").execute(&mut *conn).await?;
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
        std::mem::forget(dir);
        pool
    }

    async fn seed_coupon(pool: &SqlitePool, code: &str, credits: i64) {
        let now = now_unix();
        sqlx::query(
            "INSERT INTO coupon_codes (code, credits, used_count, status, created_at, updated_at)
             VALUES (?, ?, 0, 'ACTIVE', ?, ?)",
        )
        .bind(code)
        .bind(credits)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn redeem_grants_credits_and_activates_user() {
        let pool = test_pool().await;
        seed_coupon(&pool, "CPN-AAAA1111", 5).await;
        upsert_user(&pool, "u1", None).await.unwrap();

        let outcome = redeem_coupon(&pool, "u1", "cpn-aaaa1111").await.unwrap();
        assert!(!outcome.already_activated);
        assert!(outcome.coupon_redeemed);
        assert_eq!(outcome.granted_credits, 5);
        assert_eq!(outcome.balance, 5);
    }

    #[tokio::test]
    async fn double_redemption_is_rejected_l2() {
        let pool = test_pool().await;
        seed_coupon(&pool, "CPN-AAAA1111", 5).await;
        upsert_user(&pool, "u1", None).await.unwrap();
        upsert_user(&pool, "u2", None).await.unwrap();

        redeem_coupon(&pool, "u1", "CPN-AAAA1111").await.unwrap();
        let second = redeem_coupon(&pool, "u2", "CPN-AAAA1111").await;
        assert!(matches!(second, Err(StoreError::CouponExhausted)));

        let count: i64 = sqlx::query(
            "SELECT COUNT(*) AS c FROM credit_ledger WHERE idempotency_key = 'coupon:CPN-AAAA1111'",
        )
        .fetch_one(&pool)
        .await
        .unwrap()
        .try_get("c")
        .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn step1_debit_is_idempotent_l1() {
        let pool = test_pool().await;
        seed_coupon(&pool, "CPN-AAAA1111", 5).await;
        upsert_user(&pool, "u1", None).await.unwrap();
        redeem_coupon(&pool, "u1", "CPN-AAAA1111").await.unwrap();

        debit_step1_success(&pool, "u1", "job_abc").await.unwrap();
        debit_step1_success(&pool, "u1", "job_abc").await.unwrap();

        assert_eq!(get_balance(&pool, "u1").await.unwrap(), 4);
    }

    #[tokio::test]
    async fn step1_debit_rejects_when_balance_zero() {
        let pool = test_pool().await;
        upsert_user(&pool, "u2", None).await.unwrap();
        let result = debit_step1_success(&pool, "u2", "job_xyz").await;
        assert!(matches!(result, Err(StoreError::InsufficientCredits)));
        assert_eq!(get_balance(&pool, "u2").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn preview_does_not_consume_the_coupon() {
        let pool = test_pool().await;
        seed_coupon(&pool, "CPN-BBBB2222", 3).await;

        let preview = preview_coupon(&pool, "cpn-bbbb2222").await.unwrap();
        assert_eq!(preview.credits, 3);

        upsert_user(&pool, "u1", None).await.unwrap();
        let outcome = redeem_coupon(&pool, "u1", "CPN-BBBB2222").await.unwrap();
        assert_eq!(outcome.granted_credits, 3);
    }

    #[tokio::test]
    async fn preview_rejects_unknown_code() {
        let pool = test_pool().await;
        let result = preview_coupon(&pool, "NOPE").await;
        assert!(matches!(result, Err(StoreError::CouponInvalid)));
    }

    #[tokio::test]
    async fn materialized_sheet_coupon_redeems_like_a_db_coupon() {
        let pool = test_pool().await;
        assert!(matches!(preview_coupon(&pool, "SHEET1").await, Err(StoreError::CouponInvalid)));

        materialize_sheet_coupon(&pool, "SHEET1", 7, None, Some("sheet")).await.unwrap();
        let preview = preview_coupon(&pool, "SHEET1").await.unwrap();
        assert_eq!(preview.credits, 7);

        upsert_user(&pool, "u1", None).await.unwrap();
        let outcome = redeem_coupon(&pool, "u1", "SHEET1").await.unwrap();
        assert_eq!(outcome.granted_credits, 7);

        // a second redemption attempt fails exactly as a DB-native coupon would.
        upsert_user(&pool, "u2", None).await.unwrap();
        let second = redeem_coupon(&pool, "u2", "SHEET1").await;
        assert!(matches!(second, Err(StoreError::CouponExhausted)));
    }

    #[tokio::test]
    async fn materializing_an_existing_code_is_a_no_op() {
        let pool = test_pool().await;
        seed_coupon(&pool, "CPN-AAAA1111", 5).await;
        materialize_sheet_coupon(&pool, "CPN-AAAA1111", 999, None, None).await.unwrap();
        let preview = preview_coupon(&pool, "CPN-AAAA1111").await.unwrap();
        assert_eq!(preview.credits, 5);
    }
}
