//! Common Test Utilities for Integration Tests
//!
//! Shared helpers used across integration test modules.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    Json, Router,
    body::{Body, Bytes},
    http::{Request, StatusCode},
    routing::get,
};
use casemap_server::config::Config;
use casemap_server::demo::{InMemoryBoundarySource, InMemoryCaseSource};
use casemap_server::tiles::{CaseDataSource, CaseSummary, SourceError, StatusDotIcons};
use casemap_server::{
    Incident, LatLngBounds, MapAppState, MapOverview, TileCoordinates, TileRenderer, map_routes,
};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tower::util::ServiceExt;
use tower_http::cors::{Any, CorsLayer};

// ============================================================================
// Data sources
// ============================================================================

/// Case source that counts how often each query runs
#[derive(Default)]
pub struct CountingCaseSource {
    pub inner: InMemoryCaseSource,
    count_calls: AtomicUsize,
    page_calls: AtomicUsize,
}

impl CountingCaseSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count_calls(&self) -> usize {
        self.count_calls.load(Ordering::SeqCst)
    }

    pub fn page_calls(&self) -> usize {
        self.page_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CaseDataSource for CountingCaseSource {
    async fn count_cases(&self, incident_id: i64) -> Result<u64, SourceError> {
        self.count_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.count_cases(incident_id).await
    }

    async fn cases_in_window(
        &self,
        incident_id: i64,
        window: &LatLngBounds,
        page_size: usize,
        offset: usize,
    ) -> Result<Vec<CaseSummary>, SourceError> {
        self.page_calls.fetch_add(1, Ordering::SeqCst);
        self.inner
            .cases_in_window(incident_id, window, page_size, offset)
            .await
    }
}

// ============================================================================
// Case generators
// ============================================================================

/// `count` cases laid out on a square grid inside the interior of `tile`,
/// clear of the padding shared with neighbouring tiles. Ids start at
/// `first_id`.
pub fn grid_cases(tile: TileCoordinates, count: usize, first_id: i64) -> Vec<CaseSummary> {
    let per_axis = (count as f64).sqrt().ceil().max(1.0) as usize;
    let step = 0.8 / per_axis as f64;
    (0..count)
        .map(|i| {
            let x = 0.1 + (i % per_axis) as f64 * step + step / 2.0;
            let y = 0.1 + (i / per_axis) as f64 * step + step / 2.0;
            CaseSummary {
                id: first_id + i as i64,
                location: tile.point_at(x, y),
                status: "open_unassigned".to_string(),
            }
        })
        .collect()
}

/// `count` cases spread round-robin over every tile of `zoom`. All of them
/// stay clear of the padding strips, so each case is drawn by exactly one
/// tile at that zoom.
pub fn cases_over_zoom(zoom: u32, count: usize) -> Vec<CaseSummary> {
    let per_axis = 1u32 << zoom;
    let tiles = (per_axis * per_axis) as usize;
    let mut cases = Vec::with_capacity(count);
    for t in 0..tiles {
        let tile = TileCoordinates::new(t as u32 % per_axis, t as u32 / per_axis, zoom);
        let in_tile = count / tiles + usize::from(t < count % tiles);
        cases.extend(grid_cases(tile, in_tile, cases.len() as i64 + 1));
    }
    cases
}

pub fn test_renderer(source: Arc<dyn CaseDataSource>) -> Arc<TileRenderer> {
    let config = Config::default();
    TileRenderer::new(
        config.tiles,
        config.dedup,
        source,
        Arc::new(StatusDotIcons::new(12)),
    )
}

/// Wait until every background render task and count check has finished
pub async fn wait_for_renders(renderer: &TileRenderer) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while renderer.pending_renders() > 0 || renderer.is_refreshing_count() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("render tasks did not finish");
}

// ============================================================================
// HTTP app
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub struct TestApp {
    pub router: Router,
    pub state: MapAppState,
    pub cases: Arc<InMemoryCaseSource>,
    pub boundaries: Arc<InMemoryBoundarySource>,
}

/// Create a test application router with two incidents: 1 has cases on
/// tile 0/0/0 and one location, 2 has neither.
pub fn create_test_app() -> TestApp {
    let config = Config::default();
    let cases = Arc::new(InMemoryCaseSource::new());
    let boundaries = Arc::new(InMemoryBoundarySource::new());

    cases.set_cases(1, grid_cases(TileCoordinates::new(0, 0, 0), 100, 1));
    boundaries.put(casemap_server::IncidentLocation {
        id: 10,
        coordinates: Some(vec![-90.0, 30.0, -80.0, 35.0]),
        multi_coordinates: None,
    });

    let incidents = vec![
        Incident {
            id: 1,
            name: "Test Hurricane".to_string(),
            location_ids: vec![10],
        },
        Incident {
            id: 2,
            name: "Test Flood".to_string(),
            location_ids: vec![],
        },
    ];

    let overview = Arc::new(MapOverview::new(
        &config,
        cases.clone(),
        boundaries.clone(),
        Arc::new(StatusDotIcons::new(config.tiles.dot_size_px())),
    ));
    let state = MapAppState::new(overview, incidents);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let router = Router::new()
        .route("/health", get(health))
        .nest("/api", map_routes(state.clone()))
        .layer(cors);

    TestApp {
        router,
        state,
        cases,
        boundaries,
    }
}

impl TestApp {
    /// Send a request with an optional JSON body and collect the response
    pub async fn send(
        &self,
        method: &str,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, Bytes) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header("Content-Type", "application/json")
                .body(Body::from(serde_json::to_vec(&json).unwrap())),
            None => builder.body(Body::empty()),
        }
        .unwrap();

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body)
    }

    pub async fn get_json(&self, uri: &str) -> (StatusCode, serde_json::Value) {
        let (status, body) = self.send("GET", uri, None).await;
        let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
        (status, json)
    }
}
