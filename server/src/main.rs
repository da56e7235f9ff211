use axum::{Json, Router, extract::State, response::IntoResponse, routing::get};
use casemap_server::config::Config;
use casemap_server::demo::{DemoData, InMemoryBoundarySource, InMemoryCaseSource};
use casemap_server::tiles::StatusDotIcons;
use casemap_server::{MapAppState, MapOverview, map_routes};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application start time for uptime calculation
static START_TIME: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Prometheus metrics handle for exposing metrics in Prometheus format
static PROMETHEUS_HANDLE: std::sync::OnceLock<PrometheusHandle> = std::sync::OnceLock::new();

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    rendering: bool,
    incident_id: i64,
    uptime_seconds: u64,
}

async fn health(State(state): State<MapAppState>) -> Json<HealthResponse> {
    let uptime = START_TIME.get().map(|t| t.elapsed().as_secs()).unwrap_or(0);
    let renderer = state.overview.renderer();

    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        rendering: renderer.is_rendering(),
        incident_id: renderer.incident_id(),
        uptime_seconds: uptime,
    })
}

/// Endpoint to expose metrics in Prometheus format
async fn prometheus_metrics() -> impl IntoResponse {
    PROMETHEUS_HANDLE
        .get()
        .map(PrometheusHandle::render)
        .unwrap_or_default()
}

/// Update gauge metrics that are not driven by events (called periodically)
fn update_gauge_metrics(state: &MapAppState) {
    let renderer = state.overview.renderer();
    metrics::gauge!("casemap_tile_renders_pending").set(renderer.pending_renders() as f64);

    let uptime = START_TIME.get().map(|t| t.elapsed().as_secs()).unwrap_or(0);
    metrics::gauge!("casemap_uptime_seconds").set(uptime as f64);
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    START_TIME.set(Instant::now()).ok();

    // Must be installed before any metrics are recorded
    let prometheus_handle = PrometheusBuilder::new().install_recorder()?;
    PROMETHEUS_HANDLE.set(prometheus_handle).ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "casemap=debug,casemap_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    info!(
        "Loaded configuration: host={}, port={}, cache={} bytes, max render zoom={}",
        config.host, config.port, config.tiles.cache_max_bytes, config.tiles.max_render_zoom
    );

    // Demo collaborators stand in for the case database and location service
    let cases = Arc::new(InMemoryCaseSource::new());
    let boundaries = Arc::new(InMemoryBoundarySource::new());
    let incidents =
        DemoData::new(config.demo.seed).seed(config.demo.case_count, &cases, &boundaries);
    info!(
        "Seeded {} demo incidents with {} cases",
        incidents.len(),
        config.demo.case_count
    );

    let icons = Arc::new(StatusDotIcons::new(config.tiles.dot_size_px()));
    let overview = Arc::new(MapOverview::new(&config, cases, boundaries, icons));
    overview.select_incident(incidents.first().cloned());

    let state = MapAppState::new(Arc::clone(&overview), incidents);

    // Periodic update of gauge metrics (every 5 seconds)
    let metrics_state = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(5));
        loop {
            interval.tick().await;
            update_gauge_metrics(&metrics_state);
        }
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(health))
        .route("/metrics/prometheus", get(prometheus_metrics))
        .with_state(state.clone())
        .nest("/api", map_routes(state))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Casemap server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    overview.shutdown();
    Ok(())
}
