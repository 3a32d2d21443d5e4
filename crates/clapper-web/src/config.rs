//! Frozen environment-driven settings (spec.md §6.5).
//!
//! Shape lifted from `clapper-store`'s ex-`magnetar::config::ConcurrencyConfig`
//! `auto_detect`/`Default` idiom: one immutable struct built once at startup,
//! never re-read. Key names, defaults and the truthy-string boolean parsing
//! (`"1"`/`"true"`/`"yes"`) are taken directly from `original_source/web_api/
//! config.py::Settings`/`get_settings()`.

use std::path::PathBuf;

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_opt_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub work_dir: PathBuf,
    pub max_upload_mb: u64,
    pub worker_poll_seconds: f64,

    pub cleanup_enabled: bool,
    pub cleanup_interval_seconds: f64,
    pub cleanup_ttl_seconds: i64,
    pub cleanup_batch_size: usize,
    pub cleanup_on_download: bool,
    pub cleanup_on_startup: bool,

    pub embedded_worker: bool,

    pub auth_enabled: bool,
    pub auth_jwks_url: Option<String>,
    pub auth_issuer: Option<String>,
    pub auth_audience: Option<String>,
    pub auth_jwt_leeway_seconds: i64,

    pub db_local_only: bool,
    pub turso_database_url: Option<String>,
    pub turso_auth_token: Option<String>,
    pub turso_sync_interval: f64,
    pub turso_local_replica_path: PathBuf,

    pub coupon_sheet_local_csv: Option<String>,
    pub coupon_sheet_csv_url: Option<String>,
    pub coupon_sheet_cache_seconds: u64,

    pub oss_endpoint: Option<String>,
    pub oss_bucket: Option<String>,
    pub oss_access_key_id: Option<String>,
    pub oss_access_key_secret: Option<String>,
    pub oss_audio_prefix: String,
    pub oss_signed_url_ttl_seconds: i64,

    pub cors_allow_origins: Vec<String>,

    pub cut_merge_gap: f64,

    pub asr_dashscope_base_url: String,
    pub asr_dashscope_model: String,
    pub asr_dashscope_api_key: Option<String>,
    pub asr_dashscope_poll_seconds: f64,
    pub asr_dashscope_timeout_seconds: f64,

    pub stage_driver_program: PathBuf,
}

impl Settings {
    pub fn from_env() -> Self {
        let work_dir = PathBuf::from(env_string("WORK_DIR", "./workdir"));
        let turso_local_replica_path = env_opt_string("TURSO_LOCAL_REPLICA_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| work_dir.join("web_api_turso_replica.db"));

        let cors_allow_origins = env_opt_string("WEB_CORS_ALLOW_ORIGINS")
            .map(|v| v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
            .unwrap_or_else(|| vec!["http://localhost:5173".to_string(), "http://127.0.0.1:5173".to_string()]);

        Settings {
            work_dir,
            max_upload_mb: env_parsed("MAX_UPLOAD_MB", 2048),
            worker_poll_seconds: env_parsed("WORKER_POLL_SECONDS", 1.0),

            cleanup_enabled: env_bool("WEB_CLEANUP_ENABLED", true),
            cleanup_interval_seconds: env_parsed("WEB_CLEANUP_INTERVAL_SECONDS", 300.0),
            cleanup_ttl_seconds: env_parsed("WEB_CLEANUP_TTL_SECONDS", 3600),
            cleanup_batch_size: env_parsed("WEB_CLEANUP_BATCH_SIZE", 10),
            cleanup_on_download: env_bool("WEB_CLEANUP_ON_DOWNLOAD", true),
            cleanup_on_startup: env_bool("WEB_CLEANUP_ON_STARTUP", true),

            embedded_worker: env_bool("WEB_EMBEDDED_WORKER", false),

            auth_enabled: env_bool("WEB_AUTH_ENABLED", true),
            auth_jwks_url: env_opt_string("WEB_AUTH_JWKS_URL"),
            auth_issuer: env_opt_string("WEB_AUTH_ISSUER"),
            auth_audience: env_opt_string("WEB_AUTH_AUDIENCE"),
            auth_jwt_leeway_seconds: env_parsed("WEB_AUTH_JWT_LEEWAY_SECONDS", 10),

            db_local_only: env_bool("WEB_DB_LOCAL_ONLY", true),
            turso_database_url: env_opt_string("TURSO_DATABASE_URL"),
            turso_auth_token: env_opt_string("TURSO_AUTH_TOKEN"),
            turso_sync_interval: env_parsed("TURSO_SYNC_INTERVAL", 2.0),
            turso_local_replica_path,

            coupon_sheet_local_csv: env_opt_string("COUPON_CODE_SHEET_LOCAL_CSV"),
            coupon_sheet_csv_url: env_opt_string("COUPON_CODE_SHEET_CSV_URL"),
            coupon_sheet_cache_seconds: env_parsed("COUPON_CODE_SHEET_CACHE_SECONDS", 300),

            oss_endpoint: env_opt_string("OSS_ENDPOINT"),
            oss_bucket: env_opt_string("OSS_BUCKET"),
            oss_access_key_id: env_opt_string("OSS_ACCESS_KEY_ID"),
            oss_access_key_secret: env_opt_string("OSS_ACCESS_KEY_SECRET"),
            oss_audio_prefix: env_string("OSS_AUDIO_PREFIX", "video-auto-cut/asr"),
            oss_signed_url_ttl_seconds: env_parsed("OSS_SIGNED_URL_TTL_SECONDS", 86400),

            cors_allow_origins,

            cut_merge_gap: env_parsed("CUT_MERGE_GAP", 0.0),

            asr_dashscope_base_url: env_string("ASR_DASHSCOPE_BASE_URL", "https://dashscope.aliyuncs.com"),
            asr_dashscope_model: env_string("ASR_DASHSCOPE_MODEL", "qwen3-asr-flash-filetrans"),
            asr_dashscope_api_key: env_opt_string("ASR_DASHSCOPE_API_KEY").or_else(|| env_opt_string("DASHSCOPE_API_KEY")),
            asr_dashscope_poll_seconds: env_parsed("ASR_DASHSCOPE_POLL_SECONDS", 2.0),
            asr_dashscope_timeout_seconds: env_parsed("ASR_DASHSCOPE_TIMEOUT_SECONDS", 3600.0),

            stage_driver_program: PathBuf::from(env_string("STAGE_DRIVER_PROGRAM", "video-auto-cut")),
        }
    }

    pub fn jobs_dir(&self) -> PathBuf {
        self.work_dir.join("jobs")
    }

    pub fn job_dir(&self, job_id: &str) -> clapper_pipeline::manifest::JobDirs {
        clapper_pipeline::manifest::JobDirs::new(&self.work_dir, job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_env_unset() {
        std::env::remove_var("MAX_UPLOAD_MB");
        let settings = Settings::from_env();
        assert_eq!(settings.max_upload_mb, 2048);
        assert!(settings.auth_enabled);
        assert!(settings.cleanup_enabled);
    }

    #[test]
    fn truthy_strings_parse_as_bool() {
        std::env::set_var("WEB_CLEANUP_ENABLED", "0");
        assert!(!env_bool("WEB_CLEANUP_ENABLED", true));
        std::env::set_var("WEB_CLEANUP_ENABLED", "yes");
        assert!(env_bool("WEB_CLEANUP_ENABLED", false));
        std::env::remove_var("WEB_CLEANUP_ENABLED");
    }
}
