//! Coupon and profile endpoints (spec.md §4.6-§4.7): `/public/coupons/
//! verify`, `/auth/coupon/redeem`, `/me`. Pure glue over [`crate::billing`];
//! the envelope/error mapping is identical to the job handlers.

use axum::extract::State;
use axum::response::Response;
use axum::Json;
use serde::Deserialize;

use crate::auth::AuthUser;
use crate::billing;
use crate::error::{new_request_id, ok, WebResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CouponCodeRequest {
    pub code: String,
}

/// `POST /public/coupons/verify` — no auth required.
pub async fn verify_coupon(State(state): State<AppState>, Json(body): Json<CouponCodeRequest>) -> WebResult<Response> {
    let request_id = new_request_id();
    let sheet = state.coupon_sheet.as_deref();
    let preview = billing::preview_coupon(state.store.as_ref(), sheet, &body.code).await?;
    Ok(ok(&request_id, preview))
}

/// `POST /auth/coupon/redeem`.
pub async fn redeem_coupon(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(body): Json<CouponCodeRequest>,
) -> WebResult<Response> {
    let request_id = new_request_id();
    let sheet = state.coupon_sheet.as_deref();
    let outcome = billing::redeem_coupon_for_user(state.store.as_ref(), sheet, &user.user_id, &body.code).await?;
    Ok(ok(&request_id, outcome))
}

/// `GET /me`.
pub async fn me(State(state): State<AppState>, AuthUser(user): AuthUser) -> WebResult<Response> {
    let request_id = new_request_id();
    let profile = billing::get_user_profile(state.store.as_ref(), &user.user_id).await?;
    Ok(ok(&request_id, profile))
}
