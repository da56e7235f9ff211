//! Worksite query state
//!
//! The list/table view and the map share one query descriptor. Incident and
//! table-view changes are applied as soon as they arrive. Zoom and viewport
//! bounds change continuously while the user pans, so each of them is
//! debounced on its own timer: the timer restarts with every new value and
//! only the last value is applied once it expires. Every update replaces a
//! single field and leaves the others as they were.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::QueryConfig;
use crate::geo::LatLngBounds;
use crate::tiles::cache::NO_INCIDENT;

/// Query descriptor consumed by the worksite list and the map
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorksiteQueryState {
    pub incident_id: i64,
    pub is_table_view: bool,
    pub zoom: f64,
    pub coordinate_bounds: LatLngBounds,
}

impl Default for WorksiteQueryState {
    fn default() -> Self {
        Self {
            incident_id: NO_INCIDENT,
            is_table_view: false,
            zoom: 0.0,
            coordinate_bounds: LatLngBounds::empty(),
        }
    }
}

struct SharedState {
    tx: watch::Sender<WorksiteQueryState>,
    revision: AtomicU64,
}

impl SharedState {
    /// Apply `update` and bump the revision if it changed anything
    fn update(&self, field: &'static str, update: impl FnOnce(&mut WorksiteQueryState) -> bool) {
        if self.tx.send_if_modified(update) {
            let revision = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
            counter!("casemap_query_state_updates_total", "field" => field).increment(1);
            debug!("Query state {} updated (revision {})", field, revision);
        }
    }
}

/// Merges incident, view-mode, zoom and bounds signals into one
/// [`WorksiteQueryState`].
pub struct QueryStateCoalescer {
    shared: Arc<SharedState>,
    zoom_tx: mpsc::UnboundedSender<f64>,
    bounds_tx: mpsc::UnboundedSender<LatLngBounds>,
    cancel: CancellationToken,
}

impl QueryStateCoalescer {
    /// Start the debounce timers on the current Tokio runtime.
    pub fn new(config: &QueryConfig) -> Self {
        let (tx, _) = watch::channel(WorksiteQueryState::default());
        let shared = Arc::new(SharedState {
            tx,
            revision: AtomicU64::new(0),
        });
        let cancel = CancellationToken::new();

        let (zoom_tx, zoom_rx) = mpsc::unbounded_channel();
        let zoom_state = Arc::clone(&shared);
        spawn_debounced(config.debounce, zoom_rx, cancel.clone(), move |zoom: f64| {
            zoom_state.update("zoom", |state| {
                if state.zoom == zoom {
                    return false;
                }
                state.zoom = zoom;
                true
            });
        });

        let (bounds_tx, bounds_rx) = mpsc::unbounded_channel();
        let bounds_state = Arc::clone(&shared);
        spawn_debounced(config.debounce, bounds_rx, cancel.clone(), move |bounds| {
            bounds_state.update("bounds", |state| {
                if state.coordinate_bounds == bounds {
                    return false;
                }
                state.coordinate_bounds = bounds;
                true
            });
        });

        Self {
            shared,
            zoom_tx,
            bounds_tx,
            cancel,
        }
    }

    pub fn set_incident(&self, incident_id: i64) {
        self.shared.update("incident", |state| {
            if state.incident_id == incident_id {
                return false;
            }
            state.incident_id = incident_id;
            true
        });
    }

    pub fn set_table_view(&self, is_table_view: bool) {
        self.shared.update("table_view", |state| {
            if state.is_table_view == is_table_view {
                return false;
            }
            state.is_table_view = is_table_view;
            true
        });
    }

    /// Debounced
    pub fn set_zoom(&self, zoom: f64) {
        // Closed only after shutdown
        let _ = self.zoom_tx.send(zoom);
    }

    /// Debounced
    pub fn set_bounds(&self, bounds: LatLngBounds) {
        let _ = self.bounds_tx.send(bounds);
    }

    pub fn current(&self) -> WorksiteQueryState {
        *self.shared.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<WorksiteQueryState> {
        self.shared.tx.subscribe()
    }

    /// Number of changes applied so far
    pub fn revision(&self) -> u64 {
        self.shared.revision.load(Ordering::SeqCst)
    }

    /// Stop the debounce timers. Pending debounced values are dropped.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for QueryStateCoalescer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Apply the last value received from `rx` once `delay` passes without a
/// newer one.
fn spawn_debounced<T: Send + 'static>(
    delay: Duration,
    mut rx: mpsc::UnboundedReceiver<T>,
    cancel: CancellationToken,
    mut apply: impl FnMut(T) + Send + 'static,
) {
    tokio::spawn(async move {
        loop {
            let mut pending = tokio::select! {
                _ = cancel.cancelled() => return,
                value = rx.recv() => match value {
                    Some(value) => value,
                    None => return,
                },
            };

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    value = rx.recv() => match value {
                        Some(value) => pending = value,
                        None => {
                            apply(pending);
                            return;
                        }
                    },
                    _ = tokio::time::sleep(delay) => {
                        apply(pending);
                        break;
                    }
                }
            }
        }
    });
}
