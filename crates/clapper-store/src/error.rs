use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("pipeline error: {0}")]
    Pipeline(#[from] clapper_pipeline::PipelineError),

    #[error("path escapes work directory: {0}")]
    PathEscapesWorkDir(String),

    #[error("coupon code invalid")]
    CouponInvalid,

    #[error("coupon code expired")]
    CouponExpired,

    #[error("coupon code exhausted")]
    CouponExhausted,

    #[error("insufficient credits")]
    InsufficientCredits,

    #[error("sync to remote primary failed: {0}")]
    SyncFailed(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
