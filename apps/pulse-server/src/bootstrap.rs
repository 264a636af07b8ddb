use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::Request;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use parking_lot::Mutex;
use pulse_core::{longest_span, Aggregator, Config, EventCounter, Hub, WindowSpec};
use tokio::sync::Semaphore;
use tracing::info;
use utoipa::OpenApi;

use crate::{
    app_state::AppState,
    router::{build_router, paths},
    synthetic,
    tasks::TaskManager,
    ticker,
};

/// Default cap on in-flight requests. `/metrics/stream` is not counted: a
/// subscriber holds its request open for the life of the connection.
const DEFAULT_CONCURRENCY_LIMIT: usize = 1024;

pub(crate) struct BootstrapOutput {
    pub router: axum::Router<AppState>,
    pub state: AppState,
    pub background_tasks: TaskManager,
}

/// Wire counter, hub and aggregator together without starting any task.
pub(crate) fn build_state(config: Config) -> (AppState, Arc<Mutex<Aggregator>>) {
    let windows = config.window_specs();
    let counter = Arc::new(EventCounter::new(longest_span(&windows)));
    let hub = Hub::new(
        windows.iter().map(WindowSpec::id).cloned().collect(),
        config.hub_options(),
    );
    let aggregator = Aggregator::new(counter.clone(), windows, hub.clone());
    let state = AppState::new(hub, counter, Arc::new(config));
    (state, Arc::new(Mutex::new(aggregator)))
}

pub(crate) fn build(config: Config) -> BootstrapOutput {
    let (state, aggregator) = build_state(config);
    let (router, endpoints, endpoints_meta) = build_router();
    let state = state.with_endpoints(endpoints, endpoints_meta);

    let cfg = state.config();
    info!(
        tick_ms = cfg.tick_ms,
        windows = ?cfg.windows.iter().map(|w| w.id.as_str()).collect::<Vec<_>>(),
        store_capacity = cfg.store_capacity,
        queue_capacity = cfg.queue_capacity,
        "metrics pipeline configured"
    );

    let mut background_tasks = TaskManager::new();
    background_tasks.push(ticker::start(aggregator, cfg.tick_period()));
    background_tasks.extend(synthetic::start(
        state.counter().clone(),
        cfg.synthetic.events_per_sec,
    ));

    BootstrapOutput {
        router,
        state,
        background_tasks,
    }
}

pub(crate) fn attach_http_layers(
    router: axum::Router<()>,
    concurrency_limit: usize,
) -> axum::Router<()> {
    use tower_http::{cors::CorsLayer, trace::TraceLayer};

    let permits = Arc::new(Semaphore::new(concurrency_limit.min(Semaphore::MAX_PERMITS)));
    router
        .layer(axum::middleware::from_fn(move |req, next| {
            let permits = permits.clone();
            async move { limit_concurrency(permits, req, next).await }
        }))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Holds one permit per in-flight request, except for SSE streams.
async fn limit_concurrency(permits: Arc<Semaphore>, req: Request, next: Next) -> Response {
    if req.uri().path() == paths::METRICS_STREAM {
        return next.run(req).await;
    }
    match permits.acquire_owned().await {
        Ok(_permit) => next.run(req).await,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum HttpConfigError {
    #[error("invalid PULSE_HTTP_MAX_CONC: {0}")]
    InvalidConcurrency(String),
    #[error("invalid listen address {bind}:{port}")]
    InvalidBind { bind: String, port: u16 },
}

pub(crate) struct HttpConfig {
    pub addr: SocketAddr,
    pub concurrency_limit: usize,
}

pub(crate) fn http_config(cfg: &Config) -> Result<HttpConfig, HttpConfigError> {
    let concurrency_limit = std::env::var("PULSE_HTTP_MAX_CONC")
        .ok()
        .filter(|raw| !raw.trim().is_empty())
        .map(|raw| {
            raw.trim()
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or(HttpConfigError::InvalidConcurrency(raw))
        })
        .transpose()?
        .unwrap_or(DEFAULT_CONCURRENCY_LIMIT);

    let bind = cfg.http.bind.trim();
    let host = if bind.eq_ignore_ascii_case("localhost") {
        "127.0.0.1"
    } else {
        bind.trim_start_matches('[').trim_end_matches(']')
    };
    let ip: std::net::IpAddr = host.parse().map_err(|_| HttpConfigError::InvalidBind {
        bind: cfg.http.bind.clone(),
        port: cfg.http.port,
    })?;

    Ok(HttpConfig {
        addr: SocketAddr::new(ip, cfg.http.port),
        concurrency_limit,
    })
}

/// Write the OpenAPI document when `OPENAPI_OUT` is set.
pub(crate) fn ensure_openapi_export() -> Result<Option<String>, std::io::Error> {
    if let Ok(path) = std::env::var("OPENAPI_OUT") {
        export_openapi(&path)?;
        return Ok(Some(path));
    }
    Ok(None)
}

fn export_openapi(path: &str) -> Result<(), std::io::Error> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    let yaml = crate::openapi::ApiDoc::openapi()
        .to_yaml()
        .unwrap_or_else(|_| "openapi: 3.1.0".into());
    std::fs::write(path, yaml)
}
