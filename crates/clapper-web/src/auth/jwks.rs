//! JWKS-backed bearer token verification (spec.md §4.7, §6.4).
//!
//! Grounded on `original_source/web_api/services/auth.py`: a process-wide
//! `kid -> JWK` cache behind a mutex with a 5-minute TTL, RS256-only
//! verification, configured issuer/audience/leeway, and claim-alias
//! extraction for email and account handles. This replaces the teacher's
//! own cookie+HMAC `auth/middleware.rs` wholesale — that module signs its
//! own tokens with a shared secret, which is the wrong model for an
//! external identity provider. `jsonwebtoken`'s encode/decode call shape is
//! still the one the teacher uses.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use serde_json::Value;

use crate::config::Settings;
use crate::error::WebError;

const JWKS_CACHE_TTL: Duration = Duration::from_secs(300);
const JWKS_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentUser {
    pub user_id: String,
    pub email: Option<String>,
    pub account: Option<String>,
}

#[derive(Deserialize)]
struct Jwk {
    kid: Option<String>,
    n: Option<String>,
    e: Option<String>,
}

#[derive(Deserialize)]
struct JwksDocument {
    keys: Vec<Jwk>,
}

#[derive(Deserialize)]
struct Claims {
    sub: Option<String>,
    #[serde(flatten)]
    rest: HashMap<String, Value>,
}

struct JwksCache {
    by_kid: HashMap<String, Jwk>,
    expires_at: Instant,
}

/// The verifier: holds the JWKS cache mutex and an HTTP client for fetches.
/// One instance lives in `AppState` for the process lifetime.
pub struct JwtVerifier {
    http: reqwest::Client,
    cache: Mutex<JwksCache>,
}

impl JwtVerifier {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(JWKS_FETCH_TIMEOUT)
            .build()
            .expect("reqwest client builds");
        JwtVerifier {
            http,
            cache: Mutex::new(JwksCache {
                by_kid: HashMap::new(),
                expires_at: Instant::now(),
            }),
        }
    }

    /// Disabled-auth dev mode: a fixed synthetic user (§4.7).
    pub fn dev_user() -> CurrentUser {
        CurrentUser {
            user_id: "dev_local_user".to_string(),
            email: Some("dev_local_user@example.local".to_string()),
            account: Some("dev_local_user".to_string()),
        }
    }

    pub async fn verify(&self, settings: &Settings, token: &str) -> Result<CurrentUser, WebError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(WebError::Unauthorized("missing bearer token".into()));
        }

        let jwks_url = settings
            .auth_jwks_url
            .as_ref()
            .ok_or_else(|| WebError::Unauthorized("server auth configuration missing (WEB_AUTH_JWKS_URL)".into()))?;

        let header = decode_header(token)
            .map_err(|e| WebError::Unauthorized(format!("invalid token header: {e}")))?;
        let kid = header
            .kid
            .filter(|k| !k.is_empty())
            .ok_or_else(|| WebError::Unauthorized("token missing kid".into()))?;

        let jwk = self
            .jwk_for_kid(jwks_url, &kid)
            .await?
            .ok_or_else(|| WebError::Unauthorized("no matching signing key".into()))?;

        let (n, e) = (
            jwk.n.ok_or_else(|| WebError::Unauthorized("malformed signing key".into()))?,
            jwk.e.ok_or_else(|| WebError::Unauthorized("malformed signing key".into()))?,
        );
        let decoding_key = DecodingKey::from_rsa_components(&n, &e)
            .map_err(|e| WebError::Unauthorized(format!("malformed signing key: {e}")))?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.leeway = settings.auth_jwt_leeway_seconds.max(0) as u64;
        if let Some(issuer) = &settings.auth_issuer {
            validation.set_issuer(&[issuer]);
        }
        if let Some(audience) = &settings.auth_audience {
            validation.set_audience(&[audience]);
        } else {
            validation.validate_aud = false;
        }

        let data = decode::<Claims>(token, &decoding_key, &validation)
            .map_err(|e| WebError::Unauthorized(format!("token verification failed: {e}")))?;

        let user_id = data
            .claims
            .sub
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| WebError::Unauthorized("token missing sub".into()))?;

        let email = extract_email(&data.claims.rest);
        let account = extract_account(&data.claims.rest);

        Ok(CurrentUser { user_id, email, account })
    }

    async fn jwk_for_kid(&self, jwks_url: &str, kid: &str) -> Result<Option<Jwk>, WebError> {
        {
            let cache = self.cache.lock().unwrap();
            if Instant::now() < cache.expires_at {
                return Ok(cache.by_kid.get(kid).map(|j| Jwk {
                    kid: j.kid.clone(),
                    n: j.n.clone(),
                    e: j.e.clone(),
                }));
            }
        }

        let fetched = self.fetch_jwks(jwks_url).await?;
        let mut cache = self.cache.lock().unwrap();
        cache.by_kid = fetched;
        cache.expires_at = Instant::now() + JWKS_CACHE_TTL;
        Ok(cache.by_kid.get(kid).map(|j| Jwk {
            kid: j.kid.clone(),
            n: j.n.clone(),
            e: j.e.clone(),
        }))
    }

    async fn fetch_jwks(&self, jwks_url: &str) -> Result<HashMap<String, Jwk>, WebError> {
        let response = self
            .http
            .get(jwks_url)
            .send()
            .await
            .map_err(|e| WebError::Unauthorized(format!("unable to reach identity service: {e}")))?;
        let document: JwksDocument = response
            .json()
            .await
            .map_err(|e| WebError::Unauthorized(format!("malformed identity service response: {e}")))?;

        let mut by_kid = HashMap::new();
        for jwk in document.keys {
            if let Some(kid) = jwk.kid.clone().filter(|k| !k.is_empty()) {
                by_kid.insert(kid, jwk);
            }
        }
        Ok(by_kid)
    }
}

impl Default for JwtVerifier {
    fn default() -> Self {
        Self::new()
    }
}

fn extract_email(claims: &HashMap<String, Value>) -> Option<String> {
    for key in ["email", "email_address", "primary_email_address"] {
        if let Some(value) = claims.get(key).and_then(Value::as_str) {
            if !value.trim().is_empty() {
                return Some(value.trim().to_lowercase());
            }
        }
    }
    if let Some(user) = claims.get("user").and_then(Value::as_object) {
        if let Some(value) = user.get("email").and_then(Value::as_str) {
            if !value.trim().is_empty() {
                return Some(value.trim().to_lowercase());
            }
        }
    }
    None
}

fn extract_account(claims: &HashMap<String, Value>) -> Option<String> {
    for key in ["username", "account"] {
        if let Some(value) = claims.get(key).and_then(Value::as_str) {
            if !value.trim().is_empty() {
                return Some(value.trim().to_string());
            }
        }
    }
    if let Some(user) = claims.get("user").and_then(Value::as_object) {
        for key in ["username", "email"] {
            if let Some(value) = user.get(key).and_then(Value::as_str) {
                if !value.trim().is_empty() {
                    return Some(value.trim().to_string());
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dev_user_is_fixed() {
        let user = JwtVerifier::dev_user();
        assert_eq!(user.user_id, "dev_local_user");
    }

    #[test]
    fn extract_email_prefers_top_level_then_nested() {
        let mut claims = HashMap::new();
        claims.insert("email".to_string(), Value::String(" User@Example.com ".into()));
        assert_eq!(extract_email(&claims).as_deref(), Some("user@example.com"));

        let mut nested = HashMap::new();
        nested.insert(
            "user".to_string(),
            serde_json::json!({"email": "Nested@Example.com"}),
        );
        assert_eq!(extract_email(&nested).as_deref(), Some("nested@example.com"));
    }

    #[test]
    fn extract_account_falls_back_to_nested_username() {
        let mut claims = HashMap::new();
        claims.insert(
            "user".to_string(),
            serde_json::json!({"username": "alice"}),
        );
        assert_eq!(extract_account(&claims).as_deref(), Some("alice"));
    }
}
