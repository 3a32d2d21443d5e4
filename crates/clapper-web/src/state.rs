//! Shared application state (spec.md §5 concurrency model).
//!
//! Grounded on the teacher's `AppState::new` async-constructor/`Clone`
//! shape, trimmed of `backends`/`OrbitEvent` broadcast (no multi-backend
//! file-transfer config, no websocket progress stream — both UI-layer
//! concerns this spec excludes) and given a [`Store`], a JWKS verifier and
//! the frozen [`Settings`] in their place.

use std::sync::Arc;

use clapper_store::Store;

use crate::auth::JwtVerifier;
use crate::code_sheet::CouponSheet;
use crate::config::Settings;
use crate::drivers::{CompositeDriver, DashscopeAsrDriver, DashscopeOptions, StageDriver, SubprocessDriver};
use crate::oss::OssUploader;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub jwt: Arc<JwtVerifier>,
    pub settings: Arc<Settings>,
    /// `None` when `OSS_*` settings are absent: OSS-backed upload endpoints
    /// reject with `BAD_REQUEST` rather than panicking at startup, since the
    /// direct multipart upload path remains usable without it.
    pub oss: Option<Arc<OssUploader>>,
    /// Shared with the worker loop's own dispatch (`worker::run_worker`
    /// takes its own `Arc<dyn StageDriver>`, built the same way): the
    /// `/jobs/{id}/render/config` handler needs the same `build_cut_srt`
    /// collaborator synchronously, since Algorithm C runs inline in the
    /// request instead of through the queue.
    pub driver: Arc<dyn StageDriver>,
    /// `None` when neither `COUPON_CODE_SHEET_LOCAL_CSV` nor `_CSV_URL` is
    /// set. Consulted by [`crate::billing`] as a fallback source when a
    /// code isn't found in the `coupon_codes` table (Algorithm E, spec.md
    /// §4.9).
    pub coupon_sheet: Option<Arc<CouponSheet>>,
}

fn build_driver(settings: &Settings) -> Arc<dyn StageDriver> {
    let asr = DashscopeAsrDriver::new(DashscopeOptions {
        base_url: settings.asr_dashscope_base_url.clone(),
        model: settings.asr_dashscope_model.clone(),
        api_key: settings.asr_dashscope_api_key.clone(),
        poll_interval: std::time::Duration::from_secs_f64(settings.asr_dashscope_poll_seconds.max(0.1)),
        timeout: std::time::Duration::from_secs_f64(settings.asr_dashscope_timeout_seconds.max(1.0)),
    });
    let local = SubprocessDriver::new(settings.stage_driver_program.clone());
    Arc::new(CompositeDriver::new(asr, local))
}

fn build_coupon_sheet(settings: &Settings) -> Option<Arc<CouponSheet>> {
    if settings.coupon_sheet_local_csv.is_none() && settings.coupon_sheet_csv_url.is_none() {
        return None;
    }
    Some(Arc::new(CouponSheet::new(
        settings.coupon_sheet_local_csv.clone(),
        settings.coupon_sheet_csv_url.clone(),
        settings.coupon_sheet_cache_seconds,
    )))
}

impl AppState {
    pub async fn new(settings: Settings) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        std::fs::create_dir_all(settings.jobs_dir())?;

        let store: Arc<dyn Store> = if settings.db_local_only || settings.turso_database_url.is_none() {
            let path = settings.turso_local_replica_path.to_string_lossy().to_string();
            Arc::new(clapper_store::LocalStore::open(&path).await?)
        } else {
            let path = settings.turso_local_replica_path.to_string_lossy().to_string();
            Arc::new(
                clapper_store::ReplicatedStore::open(
                    &path,
                    settings.turso_database_url.clone(),
                    settings.turso_auth_token.clone(),
                )
                .await?,
            )
        };

        let oss = match OssUploader::from_settings(&settings) {
            Ok(uploader) => Some(Arc::new(uploader)),
            Err(_) => None,
        };

        let driver = build_driver(&settings);
        let coupon_sheet = build_coupon_sheet(&settings);

        Ok(AppState {
            store,
            jwt: Arc::new(JwtVerifier::new()),
            settings: Arc::new(settings),
            oss,
            driver,
            coupon_sheet,
        })
    }
}
