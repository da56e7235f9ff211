//! Case-dot map tiles
//!
//! This module provides:
//! - `TileCoordinates` for slippy-map tile math
//! - `TileCache`, a byte-budgeted LRU scoped to one incident
//! - `DotDeduplicator` for skipping visually identical dots at far zoom
//! - `TileRenderer`, which serves cached tiles and renders stale ones in the background
//! - `CaseDataSource` and `DotIconProvider` traits for the data it renders from

pub mod cache;
mod compose;
pub mod coordinates;
mod dedup;
mod icons;
mod renderer;
mod source;
mod types;

pub use cache::{ByteBudgetCache, CacheScope, CachedTileEntry, Tile, TileCache, TileCacheStats};
pub use compose::TileCanvas;
pub use coordinates::TileCoordinates;
pub use dedup::DotDeduplicator;
pub use icons::StatusDotIcons;
pub use renderer::TileRenderer;
pub use source::{CaseDataSource, DotIconProvider};
pub use types::{CaseSummary, RenderOutcome, RenderStats, SourceError, TileError};
