//! Test Utilities Module
//!
//! Provides fixtures and helpers for testing the tile renderer and its
//! collaborators. This module is only compiled when running tests.

#![cfg(test)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::config::{DedupConfig, TileConfig};
use crate::demo::InMemoryCaseSource;
use crate::geo::{LatLng, LatLngBounds};
use crate::tiles::{CaseDataSource, CaseSummary, SourceError, StatusDotIcons, TileRenderer};

// ============================================================================
// Mock Case Source
// ============================================================================

/// Holds back one page response. `served` is notified once the page has
/// been read; the response is returned after `release` is notified.
#[derive(Clone)]
pub struct PageGate {
    pub served: Arc<Notify>,
    pub release: Arc<Notify>,
}

/// In-memory case source that counts calls and can be switched to failing.
#[derive(Default)]
pub struct MockCaseSource {
    inner: InMemoryCaseSource,
    failing: AtomicBool,
    count_calls: AtomicUsize,
    page_calls: AtomicUsize,
    page_gate: Mutex<Option<PageGate>>,
}

impl MockCaseSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_cases(&self, incident_id: i64, cases: Vec<CaseSummary>) {
        self.inner.set_cases(incident_id, cases);
    }

    pub fn add_case(&self, incident_id: i64, case: CaseSummary) {
        self.inner.add_case(incident_id, case);
    }

    /// Make every subsequent query fail
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Gate the next page fetch
    pub fn hold_next_page(&self) -> PageGate {
        let gate = PageGate {
            served: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
        };
        *self.page_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn count_calls(&self) -> usize {
        self.count_calls.load(Ordering::SeqCst)
    }

    pub fn page_calls(&self) -> usize {
        self.page_calls.load(Ordering::SeqCst)
    }

    fn check_failing(&self) -> Result<(), SourceError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(SourceError::Unavailable("mock source failing".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CaseDataSource for MockCaseSource {
    async fn count_cases(&self, incident_id: i64) -> Result<u64, SourceError> {
        self.count_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failing()?;
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
        self.check_failing()?;
        let page = self
            .inner
            .cases_in_window(incident_id, window, page_size, offset)
            .await?;

        let gate = self.page_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.served.notify_one();
            gate.release.notified().await;
        }
        Ok(page)
    }
}

// ============================================================================
// Fixtures
// ============================================================================

pub fn case_at(id: i64, location: LatLng, status: &str) -> CaseSummary {
    CaseSummary {
        id,
        location,
        status: status.to_string(),
    }
}

/// Renderer with default configuration and 12px status dots
pub fn test_renderer(source: Arc<MockCaseSource>) -> Arc<TileRenderer> {
    TileRenderer::new(
        TileConfig::default(),
        DedupConfig::default(),
        source,
        Arc::new(StatusDotIcons::new(12)),
    )
}

/// Yield until every background render task and count check has finished
pub async fn wait_for_renders(renderer: &TileRenderer) {
    for _ in 0..10_000 {
        if renderer.pending_renders() == 0 && !renderer.is_refreshing_count() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("render tasks did not finish");
}
