//! Error types for pipeline logic.
//!
//! These are pure-logic errors: nothing here touches a database or the
//! filesystem beyond path arithmetic. `clapper-store` and `clapper-web`
//! wrap these into their own error enums at the I/O boundary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("illegal transition from {from} via {event}")]
    IllegalTransition { from: String, event: String },

    #[error("path escapes work directory: {0}")]
    PathEscapesWorkDir(String),

    #[error("malformed SRT: {0}")]
    MalformedSrt(String),

    #[error("chapter line_ids violate invariant I7: {0}")]
    ChapterCoverage(String),

    #[error("render config invalid: {0}")]
    InvalidRenderConfig(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
