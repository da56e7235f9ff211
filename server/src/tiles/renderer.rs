//! Tile render orchestrator
//!
//! `get_tile` never renders. It answers from the cache immediately and, when
//! the cached entry is missing or its case-count snapshot no longer matches
//! the live count, spawns one background task for that tile. Until the task
//! lands, the previous (stale) tile keeps being served so the map does not
//! flash blank.
//!
//! Render tasks are tied to the incident scope they were spawned under:
//! - switching incidents evicts the cache, bumps the scope generation and
//!   cancels the previous scope's tasks
//! - tasks check for cancellation before each page fetch and before the
//!   final cache write, and the write itself is rejected if the generation
//!   moved on in the meantime
//!
//! At most one task per tile key runs at a time.
//!
//! Staleness is judged against the last observed live case count. Render
//! tasks update it, and a request for a tile that looks fresh starts a
//! throttled background count check so changes in the data layer surface
//! without anyone pushing them in.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use metrics::{counter, histogram};
use tokio::runtime::Handle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::cache::{CacheScope, CachedTileEntry, NO_INCIDENT, TileCache};
use super::compose::TileCanvas;
use super::coordinates::TileCoordinates;
use super::dedup::DotDeduplicator;
use super::source::{CaseDataSource, DotIconProvider};
use super::types::{CaseSummary, RenderOutcome, RenderStats, TileError};
use crate::config::{DedupConfig, TileConfig};

/// Renders case dots into cached raster tiles on demand.
pub struct TileRenderer {
    config: TileConfig,
    dedup: DedupConfig,
    source: Arc<dyn CaseDataSource>,
    icons: Arc<dyn DotIconProvider>,
    cache: TileCache,
    rendering_enabled: AtomicBool,
    /// Last observed live case count, tagged with the scope generation it
    /// was observed under
    live_count: Mutex<Option<(u64, u64)>>,
    /// When the live count was last read for the current scope
    last_count_check: Mutex<Option<Instant>>,
    count_refreshing: AtomicBool,
    /// Tiles with a render task in flight, mapped to the task's generation
    in_flight: Arc<DashMap<TileCoordinates, u64>>,
    /// Cancelled on teardown; parent of every scope token
    shutdown: CancellationToken,
    /// Cancelled when the incident scope changes
    scope_token: Mutex<CancellationToken>,
    runtime: Handle,
}

impl TileRenderer {
    /// Create a renderer that spawns its tasks on the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn new(
        config: TileConfig,
        dedup: DedupConfig,
        source: Arc<dyn CaseDataSource>,
        icons: Arc<dyn DotIconProvider>,
    ) -> Arc<Self> {
        let shutdown = CancellationToken::new();
        let scope_token = shutdown.child_token();
        Arc::new(Self {
            cache: TileCache::new(config.cache_max_bytes),
            config,
            dedup,
            source,
            icons,
            rendering_enabled: AtomicBool::new(true),
            live_count: Mutex::new(None),
            last_count_check: Mutex::new(None),
            count_refreshing: AtomicBool::new(false),
            in_flight: Arc::new(DashMap::new()),
            shutdown,
            scope_token: Mutex::new(scope_token),
            runtime: Handle::current(),
        })
    }

    /// Cached tile bytes for `(x, y, zoom)`, possibly one render stale.
    ///
    /// Returns `None` for empty tiles, tiles not rendered yet, zooms beyond
    /// the render threshold, or while rendering is disabled. Schedules a
    /// background render when the tile is missing or stale, and a live count
    /// check when the tile looks fresh but the count has not been read for
    /// `count_refresh_interval`.
    pub fn get_tile(self: &Arc<Self>, x: u32, y: u32, zoom: u32) -> Option<Bytes> {
        if !self.is_rendering() || !self.renders_at(zoom) {
            return None;
        }

        let coordinates = TileCoordinates::new(x, y, zoom);
        let entry = self.cache.get(&coordinates);

        let fresh = match (&entry, self.live_case_count()) {
            (Some(entry), Some(live)) => entry.case_count == live,
            _ => false,
        };
        if !fresh {
            self.schedule_render(coordinates);
        } else if self.count_check_due() {
            self.schedule_count_refresh();
        }

        entry.and_then(|e| e.tile).map(|t| t.data)
    }

    /// Whether tiles are produced at `zoom`. Beyond this, callers are
    /// expected to draw individual markers instead.
    pub fn renders_at(&self, zoom: u32) -> bool {
        zoom <= self.config.max_render_zoom
    }

    pub fn set_rendering(&self, enabled: bool) {
        let previous = self.rendering_enabled.swap(enabled, Ordering::SeqCst);
        if previous != enabled {
            info!("Tile rendering {}", if enabled { "enabled" } else { "disabled" });
        }
    }

    pub fn is_rendering(&self) -> bool {
        self.rendering_enabled.load(Ordering::SeqCst)
    }

    /// Switch the incident whose cases are rendered. Evicts every cached
    /// tile and cancels renders started for the previous incident.
    pub fn set_incident(&self, incident_id: i64) {
        if self.cache.scope().incident_id == incident_id {
            return;
        }

        let scope = self.cache.rescope(incident_id);
        {
            let mut token = self.lock_scope_token();
            token.cancel();
            *token = self.shutdown.child_token();
        }
        self.in_flight.clear();
        *self.lock_live_count() = None;
        *self.lock_last_count_check() = None;

        info!(
            "Tile renderer switched to incident {} (generation {})",
            incident_id, scope.generation
        );
    }

    pub fn incident_id(&self) -> i64 {
        self.cache.scope().incident_id
    }

    /// Record a live case count observed elsewhere (for example by the list
    /// view), so `get_tile` can detect stale tiles without waiting for a
    /// render task to notice.
    pub fn set_case_count(&self, count: u64) {
        let generation = self.cache.scope().generation;
        *self.lock_live_count() = Some((generation, count));
    }

    /// Last observed live case count for the current incident.
    pub fn live_case_count(&self) -> Option<u64> {
        let generation = self.cache.scope().generation;
        match *self.lock_live_count() {
            Some((observed_in, count)) if observed_in == generation => Some(count),
            _ => None,
        }
    }

    /// Number of render tasks currently in flight.
    pub fn pending_renders(&self) -> usize {
        self.in_flight.len()
    }

    /// Whether a background live count check is running.
    pub fn is_refreshing_count(&self) -> bool {
        self.count_refreshing.load(Ordering::SeqCst)
    }

    pub fn cache(&self) -> &TileCache {
        &self.cache
    }

    /// Cancel every outstanding render task. Further renders are cancelled
    /// immediately.
    pub fn shutdown(&self) {
        info!("Shutting down tile renderer");
        self.shutdown.cancel();
    }

    /// Render one tile in the current scope and wait for it.
    pub async fn render_tile(&self, coordinates: TileCoordinates) -> RenderOutcome {
        let scope = self.cache.scope();
        let token = self.lock_scope_token().clone();
        self.render_in_scope(coordinates, scope, &token).await
    }

    fn schedule_render(self: &Arc<Self>, coordinates: TileCoordinates) {
        let scope = self.cache.scope();
        if scope.incident_id == NO_INCIDENT || self.shutdown.is_cancelled() {
            return;
        }

        match self.in_flight.entry(coordinates) {
            Entry::Occupied(_) => return,
            Entry::Vacant(slot) => {
                slot.insert(scope.generation);
            }
        }

        let token = self.lock_scope_token().clone();
        let guard = InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
            coordinates,
            generation: scope.generation,
        };
        let renderer = Arc::clone(self);
        self.runtime.spawn(async move {
            let _guard = guard;
            renderer.render_in_scope(coordinates, scope, &token).await;
        });
    }

    fn count_check_due(&self) -> bool {
        let last = *self.lock_last_count_check();
        last.is_none_or(|at| at.elapsed() >= self.config.count_refresh_interval)
    }

    fn schedule_count_refresh(self: &Arc<Self>) {
        let scope = self.cache.scope();
        if scope.incident_id == NO_INCIDENT || self.shutdown.is_cancelled() {
            return;
        }
        if self.count_refreshing.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.lock_last_count_check() = Some(Instant::now());

        let token = self.lock_scope_token().clone();
        let renderer = Arc::clone(self);
        self.runtime.spawn(async move {
            renderer.refresh_live_count(scope, &token).await;
            renderer.count_refreshing.store(false, Ordering::SeqCst);
        });
    }

    async fn refresh_live_count(&self, scope: CacheScope, token: &CancellationToken) {
        let result = tokio::select! {
            _ = token.cancelled() => return,
            result = self.source.count_cases(scope.incident_id) => result,
        };

        match result {
            Ok(count) => {
                let previous = self.live_case_count();
                self.record_live_count(scope.generation, count);
                if previous.is_some_and(|p| p != count) {
                    debug!(
                        "Live case count for incident {} changed from {:?} to {}",
                        scope.incident_id, previous, count
                    );
                }
            }
            Err(e) => warn!(
                "Failed to refresh case count for incident {}: {}",
                scope.incident_id, e
            ),
        }
    }

    /// Store `count` as the live count unless the scope moved on.
    fn record_live_count(&self, generation: u64, count: u64) {
        if self.cache.scope().generation != generation {
            return;
        }
        *self.lock_live_count() = Some((generation, count));
        *self.lock_last_count_check() = Some(Instant::now());
    }

    async fn render_in_scope(
        &self,
        coordinates: TileCoordinates,
        scope: CacheScope,
        token: &CancellationToken,
    ) -> RenderOutcome {
        let start = Instant::now();

        let outcome = match self.produce(coordinates, scope, token).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(
                    "Failed to render tile {} for incident {}: {}",
                    coordinates, scope.incident_id, e
                );
                RenderOutcome::Failed
            }
        };

        counter!("casemap_tile_renders_total", "outcome" => outcome.label()).increment(1);
        histogram!("casemap_tile_render_duration_seconds").record(start.elapsed());
        outcome
    }

    async fn produce(
        &self,
        coordinates: TileCoordinates,
        scope: CacheScope,
        token: &CancellationToken,
    ) -> Result<RenderOutcome, TileError> {
        let cancelled =
            || token.is_cancelled() || self.cache.scope().generation != scope.generation;

        if scope.incident_id == NO_INCIDENT || cancelled() {
            return Ok(RenderOutcome::Cancelled);
        }

        let case_count = self.source.count_cases(scope.incident_id).await?;
        if cancelled() {
            return Ok(RenderOutcome::Cancelled);
        }
        self.record_live_count(scope.generation, case_count);

        let window = coordinates.padded_bounds();
        if case_count == 0 {
            let empty = CachedTileEntry {
                tile: None,
                southwest: window.southwest,
                northeast: window.northeast,
                case_count: 0,
            };
            return Ok(if self.cache.put_scoped(scope.generation, coordinates, empty) {
                RenderOutcome::Empty
            } else {
                RenderOutcome::Cancelled
            });
        }

        if let Some(existing) = self.cache.get(&coordinates)
            && existing.case_count == case_count
        {
            return Ok(RenderOutcome::Unchanged);
        }

        let mut canvas = TileCanvas::new(self.config.tile_size_px());
        let mut dedup = DotDeduplicator::new(&self.dedup, case_count);
        let mut stats = RenderStats::default();
        let page_size = self.config.page_size.max(1);
        let mut offset = 0;

        loop {
            if cancelled() {
                return Ok(RenderOutcome::Cancelled);
            }

            let page = self
                .source
                .cases_in_window(scope.incident_id, &window, page_size, offset)
                .await?;
            stats.pages += 1;

            for case in &page {
                self.draw_case(&mut canvas, &mut dedup, coordinates, case, &mut stats);
            }

            offset += page.len();
            if page.len() < page_size {
                break;
            }
        }
        stats.skipped_duplicate = dedup.skipped();

        if cancelled() {
            return Ok(RenderOutcome::Cancelled);
        }

        // The snapshot is the count observed once every page has been read
        let snapshot_count = self.source.count_cases(scope.incident_id).await?;
        if cancelled() {
            return Ok(RenderOutcome::Cancelled);
        }
        self.record_live_count(scope.generation, snapshot_count);

        let tile = if stats.dots_drawn > 0 {
            Some(canvas.encode()?)
        } else {
            None
        };
        let entry = CachedTileEntry {
            tile,
            southwest: window.southwest,
            northeast: window.northeast,
            case_count: snapshot_count,
        };
        if !self.cache.put_scoped(scope.generation, coordinates, entry) {
            return Ok(RenderOutcome::Cancelled);
        }

        counter!("casemap_tile_dots_drawn_total").increment(stats.dots_drawn);
        counter!("casemap_tile_dots_deduplicated_total").increment(stats.skipped_duplicate);
        debug!(
            "Rendered tile {}: {} cases, {} drawn, {} duplicate, {} outside, {} pages",
            coordinates,
            stats.cases_seen,
            stats.dots_drawn,
            stats.skipped_duplicate,
            stats.skipped_outside,
            stats.pages
        );

        Ok(RenderOutcome::Rendered(stats))
    }

    fn draw_case(
        &self,
        canvas: &mut TileCanvas,
        dedup: &mut DotDeduplicator,
        coordinates: TileCoordinates,
        case: &CaseSummary,
        stats: &mut RenderStats,
    ) {
        stats.cases_seen += 1;

        let Some(dot) = self.icons.dot_bitmap(&case.status) else {
            stats.skipped_no_icon += 1;
            return;
        };
        let Some((x, y)) = coordinates.normalize(case.location) else {
            stats.skipped_outside += 1;
            return;
        };
        if dedup.is_occupied(coordinates.zoom, x, y) {
            return;
        }

        canvas.draw_dot(&dot, x, y);
        stats.dots_drawn += 1;
    }

    fn lock_scope_token(&self) -> MutexGuard<'_, CancellationToken> {
        self.scope_token.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_live_count(&self) -> MutexGuard<'_, Option<(u64, u64)>> {
        self.live_count.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_last_count_check(&self) -> MutexGuard<'_, Option<Instant>> {
        self.last_count_check
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Clears a tile's in-flight marker when its task ends, unless the marker
/// already belongs to a newer scope.
struct InFlightGuard {
    in_flight: Arc<DashMap<TileCoordinates, u64>>,
    coordinates: TileCoordinates,
    generation: u64,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight
            .remove_if(&self.coordinates, |_, generation| *generation == self.generation);
    }
}
