//! Health and status endpoints

use std::sync::atomic::Ordering;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use serde_json::json;

use crate::api::server::AppState;
use crate::relay::message::timestamp_now;

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "timestamp": timestamp_now()
        })),
    )
}

/// Relay status snapshot
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub connections: usize,
    pub sessions: usize,
    pub uptime_secs: u64,
    pub version: &'static str,
    pub timestamp: String,
}

/// Status endpoint with the live connection count
pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "ok",
        connections: state.registry.len(),
        sessions: state.sessions.load(Ordering::Relaxed),
        uptime_secs: state.started_at.elapsed().as_secs(),
        version: env!("CARGO_PKG_VERSION"),
        timestamp: timestamp_now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::routes::create_router;
    use crate::config::{Config, LogConfig, LogFormat, ServerConfig};
    use crate::relay::ConnectionHandle;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        AppState::new(Config {
            server: ServerConfig::default(),
            log: LogConfig {
                level: "info".to_string(),
                format: LogFormat::Pretty,
            },
        })
    }

    async fn get_json(state: AppState, uri: &str) -> (StatusCode, Value) {
        let response = create_router(state, "/ws")
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_health_check() {
        let (status, body) = get_json(test_state(), "/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert!(body["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[tokio::test]
    async fn test_status_reports_connections() {
        let state = test_state();
        let (a, _ra) = ConnectionHandle::new(None, 1);
        let (b, _rb) = ConnectionHandle::new(None, 1);
        state.registry.add(a);
        state.registry.add(b);

        let (status, body) = get_json(state, "/api/status").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["connections"], 2);
        assert_eq!(body["sessions"], 0);
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
        assert!(body["uptime_secs"].is_u64());
    }
}
