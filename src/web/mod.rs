//! Web UI, JSON control API and Prometheus metrics server.

pub mod metrics;
pub mod state;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use metrics_exporter_prometheus::PrometheusHandle;
use minijinja::{Environment, context};
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::shade::controller::{Intent, ShadeController};
use crate::shade::error::ControllerError;
use crate::web::metrics::Metrics;
use crate::web::state::ShadeSnapshot;

/// Application state shared with all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub controller: ShadeController,
    pub metrics_handle: PrometheusHandle,
    pub templates: Arc<RwLock<Environment<'static>>>,
}

#[derive(Debug, Clone)]
pub struct WebConfig {
    pub port: u16,
    pub enabled: bool,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            enabled: true,
        }
    }
}

#[derive(Debug, Deserialize)]
struct AutomaticModeRequest {
    enabled: bool,
}

#[derive(Debug, Deserialize)]
struct MinutesRequest {
    minutes: u32,
}

#[derive(Debug, Deserialize)]
struct RainRequest {
    raining: bool,
}

/// Start the web server in the background.
pub async fn start_web_server(
    config: WebConfig,
    controller: ShadeController,
    metrics_handle: PrometheusHandle,
) -> anyhow::Result<()> {
    if !config.enabled {
        info!("Web UI is disabled");
        return Ok(());
    }

    let mut env = Environment::new();
    env.add_template("index.html", include_str!("../../templates/index.html"))?;

    let app_state = AppState {
        controller,
        metrics_handle,
        templates: Arc::new(RwLock::new(env)),
    };

    let app = router(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Starting web server on http://{}", addr);

    let listener = TcpListener::bind(addr).await?;

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Web server error: {}", e);
        }
    });

    Ok(())
}

fn router(app_state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/api/status", get(api_status_handler))
        .route("/api/automatic-mode", post(automatic_mode_handler))
        .route("/api/manual-shade", post(manual_shade_handler))
        .route("/api/rain", post(rain_handler))
        .route("/api/extend", post(extend_handler))
        .route("/api/retract", post(retract_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

/// Status page.
async fn index_handler(State(state): State<AppState>) -> Response {
    let snapshot = state.controller.snapshot();
    Metrics::set_uptime(state.controller.state().start_time());

    let templates = state.templates.read();
    let template = match templates.get_template("index.html") {
        Ok(t) => t,
        Err(e) => {
            error!("Failed to get index template: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Template error").into_response();
        }
    };

    let status = snapshot.status.as_ref();
    let html = match template.render(context! {
        title => "Nimbus Shade",
        available => snapshot.is_available(),
        automatic_mode => status.map(|s| s.automatic_mode),
        manual_shade => status.map(|s| s.manual_shade),
        rain_label => status.map(|s| s.rain_label()),
        shade_label => snapshot.position.map(|p| p.label()),
        remaining => snapshot.remaining,
        uptime_seconds => snapshot.uptime_seconds,
        snapshots_received => snapshot.snapshots_received,
        last_error => snapshot.last_error,
    }) {
        Ok(html) => html,
        Err(e) => {
            error!("Failed to render index template: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Render error").into_response();
        }
    };

    Html(html).into_response()
}

/// Healthy once a snapshot has been received and the last one decoded.
async fn health_handler(State(state): State<AppState>) -> Response {
    let snapshot = state.controller.snapshot();
    if snapshot.is_available() && snapshot.last_error.is_none() {
        (StatusCode::OK, "OK").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "UNHEALTHY").into_response()
    }
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    Metrics::set_uptime(state.controller.state().start_time());

    let metrics = state.metrics_handle.render();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        metrics,
    )
        .into_response()
}

async fn api_status_handler(State(state): State<AppState>) -> Response {
    (StatusCode::OK, Json(status_json(&state.controller.snapshot()))).into_response()
}

async fn automatic_mode_handler(
    State(state): State<AppState>,
    Json(request): Json<AutomaticModeRequest>,
) -> Response {
    dispatch(&state, Intent::SetAutomaticMode(request.enabled)).await
}

async fn manual_shade_handler(
    State(state): State<AppState>,
    Json(request): Json<MinutesRequest>,
) -> Response {
    dispatch(&state, Intent::SetManualShadeMinutes(request.minutes)).await
}

async fn rain_handler(State(state): State<AppState>, Json(request): Json<RainRequest>) -> Response {
    dispatch(&state, Intent::SetRainStatus(request.raining)).await
}

async fn extend_handler(
    State(state): State<AppState>,
    Json(request): Json<MinutesRequest>,
) -> Response {
    dispatch(&state, Intent::Extend(request.minutes)).await
}

async fn retract_handler(State(state): State<AppState>) -> Response {
    dispatch(&state, Intent::Retract).await
}

async fn dispatch(state: &AppState, intent: Intent) -> Response {
    match state.controller.send(intent).await {
        Ok(()) => api_status_handler(State(state.clone())).await,
        Err(e) => (error_status(&e), Json(json!({ "error": e.to_string() }))).into_response(),
    }
}

fn error_status(error: &ControllerError) -> StatusCode {
    match error {
        ControllerError::Validation(_) => StatusCode::BAD_REQUEST,
        ControllerError::AutomaticModeActive => StatusCode::CONFLICT,
        ControllerError::StatusUnavailable | ControllerError::Closed => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        ControllerError::Store(_) => StatusCode::BAD_GATEWAY,
    }
}

pub fn status_json(snapshot: &ShadeSnapshot) -> Value {
    json!({
        "status": if snapshot.is_available() { "ok" } else { "unavailable" },
        "uptime_seconds": snapshot.uptime_seconds,
        "shade": snapshot.status,
        "position": snapshot.position,
        "countdown": snapshot.countdown,
        "remaining": snapshot.remaining,
        "snapshots_received": snapshot.snapshots_received,
        "last_error": snapshot.last_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shade::countdown::CountdownState;
    use crate::shade::error::ValidationError;
    use nimbus_client::{ShadePosition, ShadeStatus, StatusPath, StatusStoreError};

    #[test]
    fn status_json_shape() {
        let snapshot = ShadeSnapshot {
            uptime_seconds: 12,
            status: Some(ShadeStatus::default()),
            position: Some(ShadePosition::Retracted),
            countdown: CountdownState::Running { seconds_left: 599 },
            remaining: Some("09:59".to_string()),
            last_error: None,
            snapshots_received: 3,
        };
        let value = status_json(&snapshot);
        assert_eq!(value["status"], "ok");
        assert_eq!(value["position"], "retracted");
        assert_eq!(
            value["countdown"],
            json!({"state": "running", "seconds_left": 599})
        );
        assert_eq!(value["remaining"], "09:59");
        assert_eq!(value["shade"]["manualShade"], 30);
    }

    #[test]
    fn status_json_unavailable() {
        let snapshot = ShadeSnapshot {
            uptime_seconds: 0,
            status: None,
            position: None,
            countdown: CountdownState::Idle,
            remaining: None,
            last_error: Some("Status data not found".to_string()),
            snapshots_received: 0,
        };
        let value = status_json(&snapshot);
        assert_eq!(value["status"], "unavailable");
        assert_eq!(value["countdown"], json!({"state": "idle"}));
        assert_eq!(value["last_error"], "Status data not found");
    }

    #[test]
    fn errors_map_to_status_codes() {
        assert_eq!(
            error_status(&ValidationError::MinutesOutOfRange(0).into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            error_status(&ControllerError::AutomaticModeActive),
            StatusCode::CONFLICT
        );
        assert_eq!(
            error_status(&ControllerError::StatusUnavailable),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            error_status(
                &StatusStoreError::Write {
                    path: StatusPath::ManualShade,
                    message: "offline".into()
                }
                .into()
            ),
            StatusCode::BAD_GATEWAY
        );
    }
}
