//! Process entry point (spec.md §5 "Concurrency & resource model").
//!
//! Dispatches on `argv[1]` to a `Mode`: a bare HTTP server, a worker-only
//! process, or (the default) a server with the worker loop spawned
//! alongside it in-process when `settings.embedded_worker` is set —
//! mirroring the teacher's split between `run_server` and a leaner
//! standalone entry point, without the reactor/sentinel machinery this
//! spec has no counterpart for.

use std::sync::Arc;

use clapper_web::config::Settings;
use clapper_web::{server, worker, AppState};

enum Mode {
    Server,
    WorkerOnly,
}

fn parse_mode() -> Mode {
    match std::env::args().nth(1).as_deref() {
        Some("worker") => Mode::WorkerOnly,
        _ => Mode::Server,
    }
}

fn worker_id() -> String {
    format!("worker-{}", std::process::id())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    server::init_tracing();

    let settings = Settings::from_env();
    let host = std::env::var("WEB_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port: u16 = std::env::var("WEB_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);

    match parse_mode() {
        Mode::WorkerOnly => {
            let state = Arc::new(AppState::new(settings).await?);
            let driver = state.driver.clone();
            worker::run_worker(state, driver, worker_id()).await;
            Ok(())
        }
        Mode::Server => {
            let state = AppState::new(settings).await?;

            if state.settings.embedded_worker {
                let worker_state = Arc::new(state.clone());
                let driver = worker_state.driver.clone();
                tokio::spawn(async move {
                    worker::run_worker(worker_state, driver, worker_id()).await;
                });
            }

            server::run_server(state, &host, port).await
        }
    }
}
