//! `Authorization: Bearer` extractor, replacing the teacher's cookie-jar
//! `require_auth` middleware (`clapper-web/src/auth/middleware.rs`) with an
//! axum `FromRequestParts` impl that resolves a [`CurrentUser`] per request.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::headers::authorization::Bearer;
use axum_extra::headers::Authorization;
use axum_extra::TypedHeader;

use crate::auth::jwks::{CurrentUser, JwtVerifier};
use crate::error::WebError;
use crate::state::AppState;

pub struct AuthUser(pub CurrentUser);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = WebError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if !state.settings.auth_enabled {
            let user = JwtVerifier::dev_user();
            state.store.upsert_user(&user.user_id, user.email.as_deref()).await?;
            return Ok(AuthUser(user));
        }

        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| WebError::Unauthorized("missing bearer token".into()))?;

        let user = state.jwt.verify(&state.settings, bearer.token()).await?;
        state.store.upsert_user(&user.user_id, user.email.as_deref()).await?;
        Ok(AuthUser(user))
    }
}
