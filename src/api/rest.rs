// =============================================================================
// REST API Endpoints - Axum 0.7
// =============================================================================
//
// All endpoints live under `/api/v1/`.  They expose exactly what the chart
// core offers the display layer: the current series, a coarse status, and
// interval selection.
//
// CORS is configured permissively for development; tighten `allowed_origins`
// in production.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::app_state::AppState;
use crate::types::Interval;

// =============================================================================
// Router construction
// =============================================================================

/// Build the full API router with CORS and request tracing.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/candles", get(candles))
        .route("/api/v1/interval", post(set_interval))
        .route("/api/v1/ws", get(crate::api::ws::ws_handler))
        // ── Middleware & State ───────────────────────────────────────
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Health
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    state_version: u64,
    uptime_secs: u64,
    server_time: i64,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let resp = HealthResponse {
        status: "ok",
        state_version: state.current_state_version(),
        uptime_secs: state.uptime_secs(),
        server_time: chrono::Utc::now().timestamp_millis(),
    };
    Json(resp)
}

// =============================================================================
// Current series
// =============================================================================

async fn candles(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.build_snapshot())
}

// =============================================================================
// Interval selection
// =============================================================================

#[derive(Deserialize)]
struct IntervalRequest {
    /// `"5m"`, `"300"` or `300`.
    interval: serde_json::Value,
}

fn parse_requested_interval(value: &serde_json::Value) -> Result<Interval, String> {
    match value {
        serde_json::Value::String(s) => s.parse(),
        serde_json::Value::Number(n) => n
            .as_i64()
            .and_then(Interval::from_seconds)
            .ok_or_else(|| format!("unsupported interval: {n}")),
        other => Err(format!("interval must be a string or number, got {other}")),
    }
}

async fn set_interval(
    State(state): State<Arc<AppState>>,
    Json(req): Json<IntervalRequest>,
) -> impl IntoResponse {
    let interval = match parse_requested_interval(&req.interval) {
        Ok(iv) => iv,
        Err(e) => {
            warn!(error = %e, "rejected interval change");
            let supported: Vec<&str> = Interval::ALL.iter().map(|iv| iv.label()).collect();
            let body = serde_json::json!({ "error": e, "supported": supported });
            return (StatusCode::BAD_REQUEST, Json(body)).into_response();
        }
    };

    let switched = state.session.set_interval(interval);
    state.runtime_config.write().default_interval = interval;
    if switched {
        info!(interval = %interval, "interval changed via API");
    }

    let body = serde_json::json!({
        "switched": switched,
        "interval": interval,
    });
    Json(body).into_response()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime_config::RuntimeConfig;
    use crate::sync::testing::{settle, ChannelLive, ScriptedHistory};
    use crate::market_data::Candle;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn app_state() -> Arc<AppState> {
        let history = Arc::new(ScriptedHistory::new());
        history.push_ok(vec![Candle::from_price(0, 5.0)]);
        let live = Arc::new(ChannelLive::new());
        Arc::new(AppState::new(RuntimeConfig::default(), history, live))
    }

    async fn body_json(resp: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_interval(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/v1/interval")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[test]
    fn interval_request_accepts_label_and_seconds() {
        assert_eq!(
            parse_requested_interval(&serde_json::json!("1h")),
            Ok(Interval::OneHour)
        );
        assert_eq!(
            parse_requested_interval(&serde_json::json!(900)),
            Ok(Interval::FifteenMinutes)
        );
        assert!(parse_requested_interval(&serde_json::json!(61)).is_err());
        assert!(parse_requested_interval(&serde_json::json!(true)).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn health_reports_ok() {
        let resp = router(app_state())
            .oneshot(Request::get("/api/v1/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["status"], "ok");
    }

    #[tokio::test(start_paused = true)]
    async fn interval_post_switches_and_candles_follow() {
        let state = app_state();

        let resp = router(state.clone())
            .oneshot(post_interval(r#"{ "interval": "5m" }"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["switched"], true);
        assert_eq!(json["interval"], "5m");
        assert_eq!(state.runtime_config.read().default_interval, Interval::FiveMinutes);

        settle().await;
        let resp = router(state.clone())
            .oneshot(Request::get("/api/v1/candles").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let json = body_json(resp).await;
        assert_eq!(json["type"], "SERIES_SNAPSHOT");
        assert_eq!(json["interval"], "5m");
        assert_eq!(json["phase"], "Live");
        assert_eq!(json["candles"][0]["time"], 0);

        // Same interval again: nothing restarts.
        let resp = router(state)
            .oneshot(post_interval(r#"{ "interval": 300 }"#))
            .await
            .unwrap();
        assert_eq!(body_json(resp).await["switched"], false);
    }

    #[tokio::test(start_paused = true)]
    async fn unsupported_interval_is_bad_request() {
        let state = app_state();
        let resp = router(state.clone())
            .oneshot(post_interval(r#"{ "interval": "2m" }"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let json = body_json(resp).await;
        assert_eq!(json["supported"][0], "1m");
        assert_eq!(state.session.active_interval(), None);
    }
}
