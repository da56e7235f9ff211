//! Tile-related types and error definitions

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geo::LatLng;

/// Errors reported by a case data source
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Data source unavailable: {0}")]
    Unavailable(String),

    #[error("Query failed: {0}")]
    Query(String),
}

/// Errors that can occur while producing a tile
#[derive(Debug, Error)]
pub enum TileError {
    #[error("Failed to encode tile: {0}")]
    Encode(String),

    #[error(transparent)]
    Source(#[from] SourceError),
}

/// Minimal case record needed to place and colour a dot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseSummary {
    pub id: i64,
    pub location: LatLng,
    /// Work status (or work type) key used to pick the dot icon
    pub status: String,
}

/// Counters collected while compositing one tile
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RenderStats {
    /// Cases returned by the data source for the tile window
    pub cases_seen: u64,
    pub dots_drawn: u64,
    /// Cases outside the padded tile bounds
    pub skipped_outside: u64,
    /// Cases hidden behind an already drawn dot
    pub skipped_duplicate: u64,
    /// Cases whose status has no dot icon
    pub skipped_no_icon: u64,
    /// Pages fetched from the data source
    pub pages: u32,
}

/// Result of one render task
#[derive(Debug, Clone, PartialEq)]
pub enum RenderOutcome {
    /// The incident has no cases; the empty sentinel was cached
    Empty,
    /// The cached tile already matched the live case count
    Unchanged,
    /// A new tile was composited and cached
    Rendered(RenderStats),
    /// The scope changed or the renderer shut down mid-render
    Cancelled,
    /// The data source failed; the previous entry (if any) is kept
    Failed,
}

impl RenderOutcome {
    /// Label used for metrics
    pub fn label(&self) -> &'static str {
        match self {
            RenderOutcome::Empty => "empty",
            RenderOutcome::Unchanged => "unchanged",
            RenderOutcome::Rendered(_) => "rendered",
            RenderOutcome::Cancelled => "cancelled",
            RenderOutcome::Failed => "failed",
        }
    }
}
