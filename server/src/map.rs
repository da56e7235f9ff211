//! Map overview screen scope
//!
//! Owns everything that lives as long as the map screen: the tile renderer,
//! the camera bounds aggregator, the query coalescer and the incident
//! selection they all follow.

use std::sync::Arc;

use tracing::info;

use crate::bounds::{IncidentBoundarySource, ViewportBoundsAggregator};
use crate::config::Config;
use crate::incident::{Incident, IncidentSelector};
use crate::query::QueryStateCoalescer;
use crate::tiles::cache::NO_INCIDENT;
use crate::tiles::{CaseDataSource, DotIconProvider, TileRenderer};

pub struct MapOverview {
    renderer: Arc<TileRenderer>,
    aggregator: Arc<ViewportBoundsAggregator>,
    query: QueryStateCoalescer,
    selector: IncidentSelector,
}

impl MapOverview {
    /// Build the screen scope on the current Tokio runtime.
    pub fn new(
        config: &Config,
        cases: Arc<dyn CaseDataSource>,
        boundaries: Arc<dyn IncidentBoundarySource>,
        icons: Arc<dyn DotIconProvider>,
    ) -> Self {
        let selector = IncidentSelector::new();
        let renderer = TileRenderer::new(config.tiles.clone(), config.dedup.clone(), cases, icons);
        let aggregator =
            ViewportBoundsAggregator::spawn(&config.bounds, selector.subscribe(), boundaries);
        let query = QueryStateCoalescer::new(&config.query);

        Self {
            renderer,
            aggregator,
            query,
            selector,
        }
    }

    /// Switch every component to `incident`, or to no incident.
    pub fn select_incident(&self, incident: Option<Incident>) {
        let incident_id = incident.as_ref().map_or(NO_INCIDENT, |i| i.id);
        if let Some(incident) = &incident {
            info!("Selecting incident {} ({})", incident.id, incident.name);
        }

        self.renderer.set_incident(incident_id);
        self.query.set_incident(incident_id);
        self.selector.select(incident);
    }

    pub fn incident(&self) -> Option<Incident> {
        self.selector.current()
    }

    pub fn renderer(&self) -> &Arc<TileRenderer> {
        &self.renderer
    }

    pub fn aggregator(&self) -> &ViewportBoundsAggregator {
        &self.aggregator
    }

    pub fn query(&self) -> &QueryStateCoalescer {
        &self.query
    }

    /// Cancel all render tasks, timers and subscriptions of the screen.
    pub fn shutdown(&self) {
        self.renderer.shutdown();
        self.aggregator.shutdown();
        self.query.shutdown();
    }
}
