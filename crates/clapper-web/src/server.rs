//! Axum router assembly and the server entry point (spec.md §4.6
//! "Router assembly"). Grounded on the teacher's `run_server`
//! (`Router::new().route(...)` table, `CorsLayer`/`TraceLayer` stacking,
//! `tracing_subscriber` init, `axum::serve`), trimmed of the UI static-file
//! serving, reactor, and websocket routes this spec has no use for — the
//! client-side renderer consumes `/jobs/{id}/render/config` directly, there
//! is no server-push progress channel (spec.md §9 translation note: the
//! client polls `GET /jobs/{id}`).

use axum::http::{HeaderValue, Method};
use axum::routing::{get, post, put};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api;
use crate::config::Settings;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    let cors = build_cors_layer(&state.settings);

    Router::new()
        .route("/jobs", post(api::jobs::create_job))
        .route("/jobs/:job_id", get(api::jobs::get_job))
        .route("/jobs/:job_id/oss-upload-url", post(api::jobs::create_oss_upload_url))
        .route("/jobs/:job_id/audio-oss-ready", post(api::jobs::audio_oss_ready))
        .route("/jobs/:job_id/audio", post(api::jobs::upload_audio))
        .route("/jobs/:job_id/step1/run", post(api::jobs::run_step1))
        .route("/jobs/:job_id/step1", get(api::jobs::get_step1))
        .route("/jobs/:job_id/step1/confirm", put(api::jobs::confirm_step1))
        .route("/jobs/:job_id/step2/run", post(api::jobs::run_step2))
        .route("/jobs/:job_id/step2", get(api::jobs::get_step2))
        .route("/jobs/:job_id/step2/confirm", put(api::jobs::confirm_step2))
        .route("/jobs/:job_id/render/config", get(api::jobs::render_config))
        .route("/public/coupons/verify", post(api::auth::verify_coupon))
        .route("/auth/coupon/redeem", post(api::auth::redeem_coupon))
        .route("/me", get(api::auth::me))
        .route(
            "/healthz",
            get(|| async { axum::Json(serde_json::json!({"status": "ok"})) }),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn build_cors_layer(settings: &Settings) -> CorsLayer {
    let origins: Vec<HeaderValue> = settings
        .cors_allow_origins
        .iter()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([axum::http::header::CONTENT_TYPE, axum::http::header::AUTHORIZATION])
        .allow_credentials(true)
}

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,clapper_web=debug".into()),
        )
        .json()
        .init();
}

/// Run startup cleanup, bind and serve. `state` is already constructed —
/// in embedded-worker mode `main` shares the same `AppState` with the
/// worker loop it spawns alongside this.
pub async fn run_server(state: AppState, host: &str, port: u16) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if state.settings.cleanup_on_startup {
        if let Err(err) = crate::cleanup::cleanup_orphan_job_dirs(&state.settings).await {
            tracing::warn!(error = %err, "startup orphan cleanup failed");
        }
    }

    let addr = format!("{host}:{port}");
    let app = build_router(state);

    tracing::info!(%addr, "clapper-web listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
