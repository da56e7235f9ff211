//! Collaborator traits consumed by the tile renderer

use std::sync::Arc;

use async_trait::async_trait;
use image::RgbaImage;

use super::types::{CaseSummary, SourceError};
use crate::geo::LatLngBounds;

/// Trait for case data sources (local store or remote API)
#[async_trait]
pub trait CaseDataSource: Send + Sync {
    /// Number of cases in an incident
    async fn count_cases(&self, incident_id: i64) -> Result<u64, SourceError>;

    /// One page of cases inside `window`.
    ///
    /// Ordering is arbitrary but must be stable across calls for the same
    /// incident and window, so that `offset` paging neither skips nor repeats.
    async fn cases_in_window(
        &self,
        incident_id: i64,
        window: &LatLngBounds,
        page_size: usize,
        offset: usize,
    ) -> Result<Vec<CaseSummary>, SourceError>;
}

/// Lookup of the dot bitmap drawn for a case status
pub trait DotIconProvider: Send + Sync {
    /// `None` when the status has no icon; such cases are not drawn.
    fn dot_bitmap(&self, status: &str) -> Option<Arc<RgbaImage>>;
}
