//! User profile and coupon redemption glue (spec.md §4.7, §6.3).
//!
//! Ported from `original_source/web_api/services/billing.py`'s
//! `get_user_profile`/`redeem_coupon_for_user`: a thin translation layer
//! over [`clapper_store::Store`] that shapes the `/me` response and maps
//! `Store::redeem_coupon`'s outcome into the wire DTO.

use clapper_pipeline::model::{CreditLedgerEntry, UserStatus};
use clapper_store::ledger::{CouponPreview, RedeemOutcome};
use clapper_store::{Store, StoreError};
use serde::Serialize;

use crate::code_sheet::CouponSheet;
use crate::error::WebResult;

const RECENT_LEDGER_LIMIT: i64 = 20;

#[derive(Debug, Serialize)]
pub struct UserProfile {
    pub user_id: String,
    pub email: Option<String>,
    pub status: String,
    pub invite_activated_at: Option<i64>,
    pub credits: CreditsSummary,
}

#[derive(Debug, Serialize)]
pub struct CreditsSummary {
    pub balance: i64,
    pub recent_ledger: Vec<CreditLedgerEntry>,
}

fn wire_status(status: UserStatus) -> &'static str {
    match status {
        UserStatus::PendingCoupon => "PENDING_INVITE",
        UserStatus::Active => "ACTIVE",
    }
}

/// `GET /me` (spec.md §6.3): a `PENDING_INVITE` shell for a caller whose
/// JWT subject has never been materialized, or the real profile otherwise.
pub async fn get_user_profile(store: &dyn Store, user_id: &str) -> WebResult<UserProfile> {
    let Some(user) = store.get_user(user_id).await? else {
        return Ok(UserProfile {
            user_id: user_id.to_string(),
            email: None,
            status: "PENDING_INVITE".to_string(),
            invite_activated_at: None,
            credits: CreditsSummary { balance: 0, recent_ledger: Vec::new() },
        });
    };

    let balance = store.get_balance(user_id).await?;
    let recent_ledger = store.recent_ledger_entries(user_id, RECENT_LEDGER_LIMIT).await?;
    Ok(UserProfile {
        user_id: user.user_id,
        email: user.email,
        status: wire_status(user.status).to_string(),
        invite_activated_at: user.activated_at,
        credits: CreditsSummary { balance, recent_ledger },
    })
}

#[derive(Debug, Serialize)]
pub struct CouponPreviewResponse {
    pub code: String,
    pub credits: i64,
}

impl From<CouponPreview> for CouponPreviewResponse {
    fn from(preview: CouponPreview) -> Self {
        CouponPreviewResponse { code: preview.code, credits: preview.credits }
    }
}

/// Consult the legacy CSV sheet (Algorithm E, spec.md §4.9) when `code`
/// isn't a `coupon_codes` row, backfilling the primary table so the normal
/// single-use/expiry checks run uniformly afterward. Only called on a
/// `CouponInvalid` miss — an expired or exhausted DB coupon is never
/// shadowed by the sheet.
async fn fall_back_to_sheet(store: &dyn Store, sheet: &CouponSheet, code: &str) -> WebResult<()> {
    let Some(entry) = sheet.get(code).await.map_err(|err| crate::error::WebError::Internal(err.into()))? else {
        return Ok(());
    };
    if entry.status != "ACTIVE" || entry.credits <= 0 {
        return Ok(());
    }
    if let Some(expires_at) = entry.expires_at_unix() {
        if expires_at <= clapper_store::models::now_unix() {
            return Ok(());
        }
    }
    store
        .materialize_sheet_coupon(&entry.code, entry.credits, entry.expires_at_unix(), entry.source.as_deref())
        .await?;
    Ok(())
}

/// `POST /public/coupons/verify` (spec.md §4.6): no auth required, no
/// mutation — `WebError`'s `From<StoreError>` already maps the same
/// invalid/expired/exhausted codes `redeem_coupon_for_user` uses.
pub async fn preview_coupon(store: &dyn Store, sheet: Option<&CouponSheet>, code: &str) -> WebResult<CouponPreviewResponse> {
    match store.preview_coupon(code).await {
        Err(StoreError::CouponInvalid) if sheet.is_some() => {
            fall_back_to_sheet(store, sheet.unwrap(), code).await?;
            Ok(store.preview_coupon(code).await?.into())
        }
        other => Ok(other?.into()),
    }
}

#[derive(Debug, Serialize)]
pub struct RedeemResponse {
    pub already_activated: bool,
    pub coupon_redeemed: bool,
    pub granted_credits: i64,
    pub balance: i64,
}

impl From<RedeemOutcome> for RedeemResponse {
    fn from(outcome: RedeemOutcome) -> Self {
        RedeemResponse {
            already_activated: outcome.already_activated,
            coupon_redeemed: outcome.coupon_redeemed,
            granted_credits: outcome.granted_credits,
            balance: outcome.balance,
        }
    }
}

/// `POST /auth/coupon/redeem` (spec.md §6.3, Algorithm D). Materializes
/// the user row on first sight, then delegates to `Store::redeem_coupon`,
/// falling back to the legacy CSV sheet on a `coupon_codes` miss the same
/// way `preview_coupon` does; `WebError`'s `From<StoreError>` already maps
/// `CouponInvalid`/`Expired`/`Exhausted` to their wire codes.
pub async fn redeem_coupon_for_user(
    store: &dyn Store,
    sheet: Option<&CouponSheet>,
    user_id: &str,
    code: &str,
) -> WebResult<RedeemResponse> {
    store.upsert_user(user_id, None).await?;
    match store.redeem_coupon(user_id, code).await {
        Err(StoreError::CouponInvalid) if sheet.is_some() => {
            fall_back_to_sheet(store, sheet.unwrap(), code).await?;
            Ok(store.redeem_coupon(user_id, code).await?.into())
        }
        other => Ok(other?.into()),
    }
}
