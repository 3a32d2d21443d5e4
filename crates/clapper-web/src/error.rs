//! HTTP error envelope (spec.md §6.1, §7).
//!
//! Grounded on the teacher's `error.rs` (`WebError` + `IntoResponse`) but
//! remapped to spec.md's exact code table and `{"request_id", "data"|"error"}`
//! envelope instead of the teacher's `{"error", "status"}` shape.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

pub type WebResult<T> = Result<T, WebError>;

#[derive(Debug, Error)]
pub enum WebError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("not found")]
    NotFound,
    #[error("invalid step state: {0}")]
    InvalidStepState(String),
    #[error("upload too large")]
    UploadTooLarge,
    #[error("unsupported audio format: {0}")]
    UnsupportedAudioFormat(String),
    #[error("coupon code invalid")]
    CouponInvalid,
    #[error("coupon code expired")]
    CouponExpired,
    #[error("coupon code exhausted")]
    CouponExhausted,
    #[error("internal error")]
    Internal(#[source] anyhow::Error),
}

impl WebError {
    fn code(&self) -> &'static str {
        match self {
            WebError::BadRequest(_) => "BAD_REQUEST",
            WebError::Unauthorized(_) => "UNAUTHORIZED",
            WebError::Forbidden(_) => "FORBIDDEN",
            WebError::NotFound => "NOT_FOUND",
            WebError::InvalidStepState(_) => "INVALID_STEP_STATE",
            WebError::UploadTooLarge => "UPLOAD_TOO_LARGE",
            WebError::UnsupportedAudioFormat(_) => "UNSUPPORTED_AUDIO_FORMAT",
            WebError::CouponInvalid => "COUPON_CODE_INVALID",
            WebError::CouponExpired => "COUPON_CODE_EXPIRED",
            WebError::CouponExhausted => "COUPON_CODE_EXHAUSTED",
            WebError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            WebError::BadRequest(_) => StatusCode::BAD_REQUEST,
            WebError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            WebError::Forbidden(_) => StatusCode::FORBIDDEN,
            WebError::NotFound => StatusCode::NOT_FOUND,
            WebError::InvalidStepState(_) => StatusCode::CONFLICT,
            WebError::UploadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            WebError::UnsupportedAudioFormat(_) => StatusCode::UNPROCESSABLE_ENTITY,
            WebError::CouponInvalid | WebError::CouponExpired | WebError::CouponExhausted => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            WebError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Text shown to the caller. Never the raw internal error (§7
    /// propagation policy: internal errors never leak the raw exception).
    fn public_message(&self) -> String {
        match self {
            WebError::Internal(_) => "internal error, please try again later".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<clapper_store::StoreError> for WebError {
    fn from(err: clapper_store::StoreError) -> Self {
        use clapper_store::StoreError as E;
        match err {
            E::CouponInvalid => WebError::CouponInvalid,
            E::CouponExpired => WebError::CouponExpired,
            E::CouponExhausted => WebError::CouponExhausted,
            E::InsufficientCredits => WebError::InvalidStepState("insufficient credits".into()),
            other => WebError::Internal(other.into()),
        }
    }
}

impl From<clapper_pipeline::PipelineError> for WebError {
    fn from(err: clapper_pipeline::PipelineError) -> Self {
        WebError::Internal(err.into())
    }
}

impl From<std::io::Error> for WebError {
    fn from(err: std::io::Error) -> Self {
        WebError::Internal(err.into())
    }
}

impl From<crate::drivers::DriverError> for WebError {
    fn from(err: crate::drivers::DriverError) -> Self {
        WebError::Internal(err.into())
    }
}

impl From<serde_json::Error> for WebError {
    fn from(err: serde_json::Error) -> Self {
        WebError::Internal(err.into())
    }
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

#[derive(Serialize)]
struct Envelope<T: Serialize> {
    request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorBody>,
}

/// `req_<hex10>` request id, attached to every response (spec.md §4.6).
pub fn new_request_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("req_{}", &hex[..10])
}

/// Wrap a successful handler result in the `{"request_id", "data"}` envelope.
pub fn ok<T: Serialize>(request_id: &str, data: T) -> Response {
    Json(Envelope {
        request_id: request_id.to_string(),
        data: Some(data),
        error: None,
    })
    .into_response()
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        if matches!(self, WebError::Internal(_)) {
            tracing::error!(error = %self, "internal error");
        }
        let request_id = new_request_id();
        let status = self.status();
        let body = Envelope::<()> {
            request_id,
            data: None,
            error: Some(ErrorBody {
                code: self.code(),
                message: self.public_message(),
            }),
        };
        (status, Json(body)).into_response()
    }
}
