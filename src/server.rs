use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tower_http::{set_header::SetResponseHeaderLayer, trace::TraceLayer};
use tracing::{debug, info, warn};

use crate::{
    ports::PortSet,
    scanner::{self, PortProber, ScanConfig, ScanError, TcpConnectProber},
    types::ScanReport,
};

/// Largest per-probe timeout a request may ask for.
pub const MAX_REQUEST_TIMEOUT_MS: u64 = 10_000;

/// Shared, read-only handler state. Nothing scan-related outlives a request.
pub struct AppState<P = TcpConnectProber> {
    prober: Arc<P>,
    config: ScanConfig,
}

impl<P> Clone for AppState<P> {
    fn clone(&self) -> Self {
        Self {
            prober: self.prober.clone(),
            config: self.config,
        }
    }
}

impl AppState<TcpConnectProber> {
    pub fn new(config: ScanConfig) -> Self {
        Self::with_prober(TcpConnectProber, config)
    }
}

impl<P: PortProber> AppState<P> {
    pub fn with_prober(prober: P, config: ScanConfig) -> Self {
        Self {
            prober: Arc::new(prober),
            config,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ScanRequest {
    #[serde(default, deserialize_with = "lenient_text")]
    pub host: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub ports: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub concurrency: Option<usize>,
}

/// Strings pass through, numbers are rendered as text, anything else is absent.
fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Host is required")]
    MissingHost,
    #[error("{0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Scan(#[from] ScanError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::MissingHost | ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Scan(ScanError::Cancelled) => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

/// Build the API router. Generic over the prober so tests can inject one.
pub fn router<P: PortProber>(state: AppState<P>) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/scan", post(post_scan::<P>))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the API on `bind` until Ctrl+C.
pub async fn spawn_server(bind: &str, config: ScanConfig) -> Result<()> {
    let app = router(AppState::new(config));
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;

    info!(addr = %listener.local_addr()?, "serving scan API");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await?;
    Ok(())
}

async fn get_health() -> impl IntoResponse {
    (StatusCode::OK, Json(Health { status: "ok" }))
}

async fn post_scan<P: PortProber>(
    State(app): State<AppState<P>>,
    body: Result<Json<ScanRequest>, JsonRejection>,
) -> Result<Json<ScanReport>, ApiError> {
    // a missing or unreadable body is treated like an empty request
    let req = match body {
        Ok(Json(req)) => req,
        Err(JsonRejection::JsonDataError(e)) => {
            warn!(error = %e, "rejecting scan request with mistyped fields");
            return Err(ApiError::InvalidRequest(e.body_text()));
        }
        Err(e) => {
            debug!(error = %e, "unreadable scan request body");
            ScanRequest::default()
        }
    };

    let host = req.host.as_deref().map(str::trim).unwrap_or_default();
    if host.is_empty() {
        warn!("rejecting scan request without host");
        return Err(ApiError::MissingHost);
    }

    let ports = PortSet::parse(req.ports.as_deref().unwrap_or_default());
    let config = request_config(app.config, &req);

    // dropping the request future (client went away) cancels in-flight probes
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let report = scanner::run_report_with(app.prober.clone(), host, &ports, &config, cancel).await?;
    Ok(Json(report))
}

fn request_config(base: ScanConfig, req: &ScanRequest) -> ScanConfig {
    let mut config = base;
    if let Some(ms) = req.timeout_ms {
        config.timeout = Duration::from_millis(ms.clamp(1, MAX_REQUEST_TIMEOUT_MS));
    }
    if let Some(n) = req.concurrency {
        config.concurrency = Some(n);
    }
    config
}
