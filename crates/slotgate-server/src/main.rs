//! slotgate-server: demo HTTP service protected by a slotgate throttle.
//!
//! Configuration comes from the environment:
//! - `SLOTGATE_CONCURRENCY` / `SLOTGATE_QUEUE_TOLERANCE`: throttle limits
//! - `SLOTGATE_HOST` / `SLOTGATE_PORT`: listen address
//! - `RUST_LOG`, or `SLOTGATE_LOG` (`debug|info|warn|error`), and `LOG_FORMAT=json`

use std::sync::Arc;
use std::time::Duration;

use axum::{Json, Router, extract::Query, routing::post};
use serde::Deserialize;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use slotgate::transport::{ServerConfig, serve, status_routes, throttled};
use slotgate::{Throttle, ThrottleConfig, TracingObserver};

/// Upper bound on simulated work so a single request cannot pin a slot indefinitely.
const MAX_WORK_MS: u64 = 60_000;

/// Initialize tracing with SLOTGATE_LOG and LOG_FORMAT support.
fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let base_level = match std::env::var("SLOTGATE_LOG").as_deref() {
            Ok("debug") => "debug",
            Ok("warn") | Ok("warning") => "warn",
            Ok("error") => "error",
            _ => "info",
        };

        EnvFilter::new(format!(
            "slotgate={level},slotgate_server={level}",
            level = base_level
        ))
    };

    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}

#[derive(Debug, Deserialize)]
struct WorkParams {
    #[serde(default)]
    ms: u64,
}

/// Simulated work: hold the slot for `ms` milliseconds.
async fn do_work(Query(params): Query<WorkParams>) -> Json<serde_json::Value> {
    let ms = params.ms.min(MAX_WORK_MS);
    tokio::time::sleep(Duration::from_millis(ms)).await;
    Json(serde_json::json!({
        "status": "done",
        "slept_ms": ms
    }))
}

fn app(throttle: Arc<Throttle>) -> Router {
    let work = Router::new().route("/work", post(do_work));
    throttled(work, Arc::clone(&throttle)).merge(status_routes(throttle))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("slotgate-server {}", env!("CARGO_PKG_VERSION"));

    let throttle_config = ThrottleConfig::from_env()?;
    let server_config = ServerConfig::from_env()?;

    let throttle = Arc::new(
        Throttle::builder(throttle_config)
            .observer(TracingObserver)
            .build()?,
    );
    info!(
        concurrency = throttle.concurrency(),
        queue_tolerance = throttle.queue_tolerance(),
        "Throttle configured"
    );

    serve(server_config, app(throttle)).await
}
