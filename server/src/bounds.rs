//! Viewport bounds aggregation
//!
//! Fits the map camera to every region the selected incident declares. The
//! aggregator follows the incident selection signal; for each incident it
//! streams the incident's location records, flattens their coordinates into
//! points and folds them into one box. Every distinct box is published as a
//! new [`CameraBounds`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::BoundsConfig;
use crate::geo::{BoundsBuilder, DEFAULT_BOUNDS, LatLng, LatLngBounds};
use crate::incident::Incident;

/// Geographic location record declared by an incident.
///
/// Coordinates are flat `[lon, lat, lon, lat, ...]` lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentLocation {
    pub id: i64,
    #[serde(default)]
    pub coordinates: Option<Vec<f64>>,
    /// Multi-polygon variant: one flat list per polygon
    #[serde(default)]
    pub multi_coordinates: Option<Vec<Vec<f64>>>,
}

/// Source of incident location records
pub trait IncidentBoundarySource: Send + Sync {
    /// Stream of the current records for `location_ids`. A new list is
    /// emitted whenever the records change.
    fn locations_for(&self, location_ids: &[i64]) -> BoxStream<'static, Vec<IncidentLocation>>;
}

/// Box the camera should fit
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraBounds {
    pub bounds: LatLngBounds,
    /// Move the camera without animating
    pub apply_immediately: bool,
}

impl Default for CameraBounds {
    fn default() -> Self {
        Self {
            bounds: DEFAULT_BOUNDS,
            apply_immediately: false,
        }
    }
}

/// Flatten single and multi-polygon coordinate lists into points, swapping
/// the source `lon, lat` order. A trailing unpaired value is dropped.
pub fn flatten_locations(locations: &[IncidentLocation]) -> Vec<LatLng> {
    let mut points = Vec::new();
    for location in locations {
        let lists = location
            .multi_coordinates
            .iter()
            .flatten()
            .chain(location.coordinates.iter());
        for list in lists {
            if list.len() % 2 != 0 {
                warn!(
                    "Location {} has an odd coordinate count ({})",
                    location.id,
                    list.len()
                );
            }
            points.extend(list.chunks_exact(2).map(|pair| LatLng::new(pair[1], pair[0])));
        }
    }
    points
}

/// Smallest box containing `points`, padded by `epsilon` degrees on both
/// axes when it has no area. [`DEFAULT_BOUNDS`] when there are no points.
pub fn fit_bounds(points: &[LatLng], epsilon: f64) -> LatLngBounds {
    match points.iter().copied().collect::<BoundsBuilder>().build() {
        None => DEFAULT_BOUNDS,
        Some(bounds) if bounds.is_degenerate() => bounds.expanded(epsilon, epsilon),
        Some(bounds) => bounds,
    }
}

/// Publishes camera bounds fitting the selected incident's regions.
pub struct ViewportBoundsAggregator {
    bounds_tx: watch::Sender<CameraBounds>,
    cached: Mutex<Option<CameraBounds>>,
    mapping_locations: AtomicBool,
    updating_bounds: AtomicBool,
    busy_tx: watch::Sender<bool>,
    epsilon: f64,
    cancel: CancellationToken,
}

impl ViewportBoundsAggregator {
    /// Start following `incidents` on the current Tokio runtime.
    pub fn spawn(
        config: &BoundsConfig,
        incidents: watch::Receiver<Option<Incident>>,
        source: Arc<dyn IncidentBoundarySource>,
    ) -> Arc<Self> {
        let (bounds_tx, _) = watch::channel(CameraBounds::default());
        let (busy_tx, _) = watch::channel(false);
        let aggregator = Arc::new(Self {
            bounds_tx,
            cached: Mutex::new(None),
            mapping_locations: AtomicBool::new(false),
            updating_bounds: AtomicBool::new(false),
            busy_tx,
            epsilon: config.degenerate_epsilon,
            cancel: CancellationToken::new(),
        });

        tokio::spawn(Arc::clone(&aggregator).run(incidents, source));
        aggregator
    }

    /// Receiver of every distinct camera bounds value.
    pub fn camera_bounds(&self) -> watch::Receiver<CameraBounds> {
        self.bounds_tx.subscribe()
    }

    pub fn current(&self) -> CameraBounds {
        *self.bounds_tx.borrow()
    }

    /// Receiver of whether locations are being mapped or bounds updated.
    pub fn busy(&self) -> watch::Receiver<bool> {
        self.busy_tx.subscribe()
    }

    pub fn is_busy(&self) -> bool {
        *self.busy_tx.borrow()
    }

    /// Remember the current bounds, for example before the user pans away.
    pub fn cache_bounds(&self) {
        let current = self.current();
        *self.cached.lock().unwrap_or_else(PoisonError::into_inner) = Some(current);
    }

    /// Re-publish the remembered bounds without recomputing them. Returns
    /// false when nothing was cached.
    pub fn restore_bounds(&self) -> bool {
        let cached = *self.cached.lock().unwrap_or_else(PoisonError::into_inner);
        match cached {
            Some(cached) => {
                self.bounds_tx.send_replace(CameraBounds {
                    bounds: cached.bounds,
                    apply_immediately: true,
                });
                true
            }
            None => false,
        }
    }

    /// Stop following the incident selection.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    async fn run(
        self: Arc<Self>,
        mut incidents: watch::Receiver<Option<Incident>>,
        source: Arc<dyn IncidentBoundarySource>,
    ) {
        loop {
            let incident = incidents.borrow_and_update().clone();
            let mut locations = match &incident {
                Some(incident) if !incident.location_ids.is_empty() => {
                    debug!(
                        "Streaming {} locations for incident {}",
                        incident.location_ids.len(),
                        incident.id
                    );
                    source.locations_for(&incident.location_ids)
                }
                _ => stream::iter([Vec::new()]).boxed(),
            };
            self.set_flag(&self.mapping_locations, true);

            let mut exhausted = false;
            loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => return,
                    changed = incidents.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        break;
                    }
                    next = locations.next(), if !exhausted => match next {
                        Some(records) => self.apply_locations(incident.as_ref(), &records),
                        None => {
                            exhausted = true;
                            self.set_flag(&self.mapping_locations, false);
                        }
                    },
                }
            }
        }
    }

    fn apply_locations(&self, incident: Option<&Incident>, records: &[IncidentLocation]) {
        self.set_flag(&self.mapping_locations, true);
        let points = flatten_locations(records);
        self.set_flag(&self.mapping_locations, false);

        self.set_flag(&self.updating_bounds, true);
        let bounds = fit_bounds(&points, self.epsilon);
        let changed = self.bounds_tx.send_if_modified(|current| {
            if current.bounds == bounds {
                false
            } else {
                *current = CameraBounds {
                    bounds,
                    apply_immediately: false,
                };
                true
            }
        });
        self.set_flag(&self.updating_bounds, false);

        if changed {
            info!(
                "Camera bounds for incident {:?} updated from {} points: {:?}",
                incident.map(|i| i.id),
                points.len(),
                bounds
            );
        }
    }

    fn set_flag(&self, flag: &AtomicBool, value: bool) {
        flag.store(value, Ordering::SeqCst);
        let busy = self.mapping_locations.load(Ordering::SeqCst)
            || self.updating_bounds.load(Ordering::SeqCst);
        self.busy_tx.send_if_modified(|current| {
            let modified = *current != busy;
            *current = busy;
            modified
        });
    }
}

impl Drop for ViewportBoundsAggregator {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
