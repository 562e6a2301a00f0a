//! Liveness endpoint for the hosting platform
//!
//! Holds only immutable identity data; never touches the schedule or cursor.

use crate::error::Result;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info};

pub const ALIVE_TEXT: &str = "✅ Bot is running.";

#[derive(Clone)]
struct AppState {
    name: Arc<str>,
    version: Arc<str>,
}

pub fn router(name: &str, version: &str) -> Router {
    let state = AppState {
        name: Arc::from(name),
        version: Arc::from(version),
    };
    Router::new()
        .route("/", get(handle_root))
        .route("/health", get(handle_health))
        .with_state(state)
}

/// Bind `bind` and serve in a background task. Returns the bound address.
pub async fn spawn(bind: &str, name: &str, version: &str) -> Result<(SocketAddr, JoinHandle<()>)> {
    let listener = TcpListener::bind(bind).await?;
    let addr = listener.local_addr()?;
    let app = router(name, version);

    info!("Liveness endpoint listening on http://{}", addr);
    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Liveness server error: {}", e);
        }
    });
    Ok((addr, handle))
}

async fn handle_root() -> &'static str {
    ALIVE_TEXT
}

async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "name": &*state.name,
        "version": &*state.version,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_root_and_health() {
        let (addr, handle) = spawn("127.0.0.1:0", "TestBot", "1.0.0").await.unwrap();
        let client = reqwest::Client::new();

        let body = client
            .get(format!("http://{}/", addr))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(body, ALIVE_TEXT);

        let health: serde_json::Value = client
            .get(format!("http://{}/health", addr))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["status"], "ok");
        assert_eq!(health["name"], "TestBot");
        assert_eq!(health["version"], "1.0.0");

        handle.abort();
    }

    #[tokio::test]
    async fn test_bind_failure_is_error() {
        assert!(spawn("not-an-address", "x", "y").await.is_err());
    }
}
