//! HTTP route handlers for the map overview API

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bounds::CameraBounds;
use crate::geo::LatLngBounds;
use crate::incident::Incident;
use crate::map::MapOverview;
use crate::query::WorksiteQueryState;

/// Deepest zoom level accepted in tile paths
const MAX_TILE_ZOOM: u32 = 30;

/// Application state shared by the map routes
#[derive(Clone)]
pub struct MapAppState {
    pub overview: Arc<MapOverview>,
    /// Incidents that can be selected, by id
    pub incidents: Arc<DashMap<i64, Incident>>,
}

impl MapAppState {
    pub fn new(overview: Arc<MapOverview>, incidents: impl IntoIterator<Item = Incident>) -> Self {
        Self {
            overview,
            incidents: Arc::new(incidents.into_iter().map(|i| (i.id, i)).collect()),
        }
    }
}

#[derive(Debug, Error)]
pub enum MapError {
    #[error("Incident not found: {0}")]
    IncidentNotFound(i64),

    #[error("Invalid tile coordinates: z={zoom} x={x} y={y}")]
    InvalidTile { zoom: u32, x: u32, y: u32 },
}

/// Error response for the map API
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    pub code: String,
}

impl From<MapError> for ApiError {
    fn from(e: MapError) -> Self {
        let code = match &e {
            MapError::IncidentNotFound(_) => "not_found",
            MapError::InvalidTile { .. } => "invalid_coordinates",
        };
        Self {
            error: e.to_string(),
            code: code.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.code.as_str() {
            "not_found" => StatusCode::NOT_FOUND,
            "invalid_coordinates" => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self)).into_response()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SelectIncidentRequest {
    /// `None` clears the selection
    pub incident_id: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RenderingRequest {
    pub enabled: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ViewportRequest {
    #[serde(default)]
    pub zoom: Option<f64>,
    #[serde(default)]
    pub bounds: Option<LatLngBounds>,
    #[serde(default)]
    pub table_view: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CameraBoundsResponse {
    #[serde(flatten)]
    pub camera: CameraBounds,
    /// Locations are being mapped or bounds recomputed
    pub busy: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RestoreResponse {
    pub restored: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TileStatsResponse {
    pub incident_id: i64,
    pub rendering: bool,
    pub entry_count: usize,
    pub size_bytes: usize,
    pub max_size_bytes: usize,
    pub pending_renders: usize,
    pub live_case_count: Option<u64>,
}

/// GET /api/tiles/:z/:x/:y - Get a case-dot tile as PNG
///
/// Returns 204 when the tile is empty, not rendered yet, or beyond the
/// render zoom. A missing or stale tile is rendered in the background, so
/// polling again later picks up the new tile.
pub async fn get_tile(
    State(state): State<MapAppState>,
    Path((zoom, x, y)): Path<(u32, u32, u32)>,
) -> Result<Response, ApiError> {
    if zoom > MAX_TILE_ZOOM || x >= 1 << zoom || y >= 1 << zoom {
        tracing::debug!("Rejecting tile z={} x={} y={}", zoom, x, y);
        return Err(MapError::InvalidTile { zoom, x, y }.into());
    }

    match state.overview.renderer().get_tile(x, y, zoom) {
        Some(png) => Ok((
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "image/png"),
                (header::CACHE_CONTROL, "no-cache"),
            ],
            png,
        )
            .into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

/// GET /api/tiles/stats - Cache and render statistics
pub async fn get_tile_stats(State(state): State<MapAppState>) -> Json<TileStatsResponse> {
    let renderer = state.overview.renderer();
    let cache = renderer.cache().stats();

    Json(TileStatsResponse {
        incident_id: renderer.incident_id(),
        rendering: renderer.is_rendering(),
        entry_count: cache.entry_count,
        size_bytes: cache.size_bytes,
        max_size_bytes: cache.max_size_bytes,
        pending_renders: renderer.pending_renders(),
        live_case_count: renderer.live_case_count(),
    })
}

/// GET /api/incidents - List selectable incidents
pub async fn list_incidents(State(state): State<MapAppState>) -> Json<Vec<Incident>> {
    let mut incidents: Vec<Incident> = state
        .incidents
        .iter()
        .map(|entry| entry.value().clone())
        .collect();
    incidents.sort_by_key(|i| i.id);
    Json(incidents)
}

/// PUT /api/incident - Select the incident shown on the map
pub async fn select_incident(
    State(state): State<MapAppState>,
    Json(request): Json<SelectIncidentRequest>,
) -> Result<StatusCode, ApiError> {
    let incident = match request.incident_id {
        Some(id) => Some(
            state
                .incidents
                .get(&id)
                .map(|entry| entry.value().clone())
                .ok_or_else(|| {
                    tracing::warn!("Unknown incident selected: {}", id);
                    MapError::IncidentNotFound(id)
                })?,
        ),
        None => None,
    };

    state.overview.select_incident(incident);
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /api/rendering - Enable or disable tile rendering
pub async fn set_rendering(
    State(state): State<MapAppState>,
    Json(request): Json<RenderingRequest>,
) -> StatusCode {
    state.overview.renderer().set_rendering(request.enabled);
    StatusCode::NO_CONTENT
}

/// PUT /api/viewport - Report camera zoom, visible bounds and view mode
///
/// Zoom and bounds reach the query state after the debounce delay.
pub async fn set_viewport(
    State(state): State<MapAppState>,
    Json(request): Json<ViewportRequest>,
) -> StatusCode {
    let query = state.overview.query();
    if let Some(table_view) = request.table_view {
        query.set_table_view(table_view);
    }
    if let Some(zoom) = request.zoom {
        query.set_zoom(zoom);
    }
    if let Some(bounds) = request.bounds {
        query.set_bounds(bounds);
    }
    StatusCode::ACCEPTED
}

/// GET /api/query-state - Current coalesced worksite query
pub async fn get_query_state(State(state): State<MapAppState>) -> Json<WorksiteQueryState> {
    Json(state.overview.query().current())
}

/// GET /api/camera-bounds - Box the camera should fit
pub async fn get_camera_bounds(State(state): State<MapAppState>) -> Json<CameraBoundsResponse> {
    let aggregator = state.overview.aggregator();
    Json(CameraBoundsResponse {
        camera: aggregator.current(),
        busy: aggregator.is_busy(),
    })
}

/// POST /api/camera-bounds/cache - Remember the current camera bounds
pub async fn cache_camera_bounds(State(state): State<MapAppState>) -> StatusCode {
    state.overview.aggregator().cache_bounds();
    StatusCode::NO_CONTENT
}

/// POST /api/camera-bounds/restore - Re-apply the remembered bounds
pub async fn restore_camera_bounds(State(state): State<MapAppState>) -> Json<RestoreResponse> {
    let restored = state.overview.aggregator().restore_bounds();
    Json(RestoreResponse { restored })
}

/// Build map API routes
pub fn map_routes(state: MapAppState) -> Router {
    Router::new()
        .route("/tiles/stats", get(get_tile_stats))
        .route("/tiles/:z/:x/:y", get(get_tile))
        .route("/incidents", get(list_incidents))
        .route("/incident", put(select_incident))
        .route("/rendering", put(set_rendering))
        .route("/viewport", put(set_viewport))
        .route("/query-state", get(get_query_state))
        .route("/camera-bounds", get(get_camera_bounds))
        .route("/camera-bounds/cache", post(cache_camera_bounds))
        .route("/camera-bounds/restore", post(restore_camera_bounds))
        .with_state(state)
}
