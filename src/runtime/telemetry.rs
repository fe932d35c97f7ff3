// src/runtime/telemetry.rs

//! The self-telemetry HTTP surface: per-session counter snapshots in the
//! daemon's own text protocol, plus the ambient Prometheus endpoint.

use crate::core::metrics::gather_metrics;
use crate::core::stats::{AggMode, StatsRegistry};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::info;

/// The marker terminating every successful text response.
const OK_MARKER: &str = "<!--SEARCH OK-->\n";

#[derive(Clone)]
struct TelemetryState {
    stats: Arc<StatsRegistry>,
}

/// Serves until the shutdown broadcast fires.
pub async fn run_telemetry_server(
    listener: TcpListener,
    stats: Arc<StatsRegistry>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), anyhow::Error> {
    let state = TelemetryState { stats };
    let app = Router::new()
        .route("/", get(index_handler))
        .route("/metrics", get(metrics_handler))
        .route("/{session}", get(session_handler))
        .with_state(state);

    info!(
        "Self-telemetry listening on http://{}/",
        listener.local_addr()?
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_rx.recv().await.ok();
            info!("Telemetry server shutting down.");
        })
        .await?;
    Ok(())
}

/// Lists the registered session names, one per line.
async fn index_handler(State(state): State<TelemetryState>) -> Response {
    let mut body = String::new();
    for name in state.stats.names() {
        body.push_str(&name);
        body.push('\n');
    }
    body.push_str(OK_MARKER);
    text_response(body)
}

async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        gather_metrics(),
    )
}

/// `GET /<session>?mode={avg|max|min|med}&reset={0|1}&json={0|1}`.
async fn session_handler(
    State(state): State<TelemetryState>,
    Path(session): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let mode = params
        .get("mode")
        .map(|m| AggMode::from_query(m))
        .unwrap_or_default();

    let Some(snapshot) = state.stats.session_snapshot(&session, mode) else {
        return (StatusCode::NOT_FOUND, format!("no such session '{session}'\n"))
            .into_response();
    };
    if params.get("reset").map(String::as_str) == Some("1") {
        state.stats.session_reset(&session);
    }

    let wants_json = params.get("json").map(String::as_str) == Some("1")
        || headers
            .get(header::ACCEPT)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|accept| accept.ends_with("/json"));

    if wants_json {
        json_response(&snapshot)
    } else {
        text_response(render_text(&snapshot))
    }
}

/// The text protocol: optional `qsize=N` preamble, `KEY=FLOAT2DP` lines,
/// trailing OK marker.
fn render_text(snapshot: &IndexMap<String, f64>) -> String {
    let mut body = String::new();
    if let Some(qsize) = snapshot.get("qsize") {
        body.push_str(&format!("qsize={}\n", *qsize as i64));
    }
    for (key, value) in snapshot {
        if key == "qsize" {
            continue;
        }
        body.push_str(&format!("{key}={value:.2}\n"));
    }
    body.push_str(OK_MARKER);
    body
}

fn text_response(body: String) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
        .into_response()
}

/// One JSON object with the snapshot's keys; integral values render
/// without a fraction.
fn json_response(snapshot: &IndexMap<String, f64>) -> Response {
    let mut object = serde_json::Map::new();
    for (key, value) in snapshot {
        let number = if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
            serde_json::Number::from(*value as i64)
        } else {
            match serde_json::Number::from_f64(*value) {
                Some(n) => n,
                None => continue,
            }
        };
        object.insert(key.clone(), serde_json::Value::Number(number));
    }
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json; charset=utf-8")],
        serde_json::Value::Object(object).to_string(),
    )
        .into_response()
}
