//! Casemap Server Library
//!
//! Map overview tiles for disaster cases: a byte-budgeted tile cache, a
//! background tile renderer, camera bounds aggregation and the coalesced
//! worksite query. Exported for the binary, integration tests and benches.

pub mod bounds;
pub mod config;
pub mod demo;
pub mod geo;
pub mod incident;
pub mod map;
pub mod query;
pub mod routes;
pub mod tiles;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types
pub use bounds::{CameraBounds, IncidentBoundarySource, IncidentLocation, ViewportBoundsAggregator};
pub use geo::{LatLng, LatLngBounds};
pub use incident::{Incident, IncidentSelector};
pub use map::MapOverview;
pub use query::{QueryStateCoalescer, WorksiteQueryState};
pub use routes::{MapAppState, map_routes};
pub use tiles::{CaseDataSource, DotIconProvider, TileCoordinates, TileRenderer};
