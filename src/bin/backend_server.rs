//! Demo upstream for local runs of the gateway.
//!
//! Usage: `backend_server [port] [name]`. Answers `/health` for the monitor,
//! `/delay/:ms` and `/error/:status` for exercising timeouts and upstream
//! failures, and echoes every other request back as JSON.

use std::error::Error;
use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, Method, StatusCode, Uri},
    response::Json,
    routing::get,
    Router,
};
use rand::Rng;
use serde::Serialize;
use tokio::time::sleep;

#[derive(Debug, Clone, Serialize)]
struct BackendInfo {
    name: String,
    port: u16,
}

async fn health_check(State(info): State<BackendInfo>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "UP",
        "name": info.name,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn delayed_response(
    State(info): State<BackendInfo>,
    Path(duration_ms): Path<u64>,
) -> Json<serde_json::Value> {
    sleep(Duration::from_millis(duration_ms)).await;

    Json(serde_json::json!({
        "message": format!("Delayed response ({}ms)", duration_ms),
        "server": info.name,
    }))
}

async fn error_response(
    State(info): State<BackendInfo>,
    Path(status_code): Path<u16>,
) -> (StatusCode, Json<serde_json::Value>) {
    let status = StatusCode::from_u16(status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    (
        status,
        Json(serde_json::json!({
            "error": format!("Error response with status {}", status_code),
            "server": info.name,
        })),
    )
}

/// Echo method, path, query and forwarding headers back to the caller
async fn echo(
    State(info): State<BackendInfo>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> Json<serde_json::Value> {
    // Small jitter so latency analytics have something to show
    let jitter = rand::thread_rng().gen_range(5..=50);
    sleep(Duration::from_millis(jitter)).await;

    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };

    Json(serde_json::json!({
        "server": info.name,
        "method": method.as_str(),
        "path": uri.path(),
        "query": uri.query(),
        "host": header("host"),
        "forwardedFor": header("x-forwarded-for"),
        "body": body,
    }))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let port = match args.next() {
        Some(port) => port.parse::<u16>()?,
        None => 8081,
    };
    let name = args.next().unwrap_or_else(|| format!("backend-{}", port));
    let info = BackendInfo { name, port };

    let addr = SocketAddr::from(([127, 0, 0, 1], info.port));

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/delay/:duration_ms", get(delayed_response))
        .route("/error/:status_code", get(error_response))
        .fallback(echo)
        .with_state(info.clone());

    tracing::info!(name = %info.name, "Backend server listening on {}", addr);

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
