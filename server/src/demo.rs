//! In-memory data sources and a synthetic data generator
//!
//! These back the standalone server and the tests. Cases are indexed per
//! incident in an R-tree keyed by (longitude, latitude) so window queries do
//! not scan every case.

use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rstar::{AABB, RTree, RTreeObject};
use tokio::sync::watch;

use crate::bounds::{IncidentBoundarySource, IncidentLocation};
use crate::geo::{LatLng, LatLngBounds};
use crate::incident::Incident;
use crate::tiles::{CaseDataSource, CaseSummary, SourceError, StatusDotIcons};

/// R-tree entry pointing into the incident's case list
#[derive(Debug, Clone)]
struct CaseEntry {
    index: usize,
    position: [f64; 2],
}

impl RTreeObject for CaseEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.position)
    }
}

#[derive(Default)]
struct IncidentCases {
    tree: RTree<CaseEntry>,
    cases: Vec<CaseSummary>,
}

impl IncidentCases {
    fn from_cases(cases: Vec<CaseSummary>) -> Self {
        let entries = cases
            .iter()
            .enumerate()
            .map(|(index, case)| CaseEntry {
                index,
                position: [case.location.longitude, case.location.latitude],
            })
            .collect();
        Self {
            tree: RTree::bulk_load(entries),
            cases,
        }
    }

    fn insert(&mut self, case: CaseSummary) {
        let index = self.cases.len();
        self.tree.insert(CaseEntry {
            index,
            position: [case.location.longitude, case.location.latitude],
        });
        self.cases.push(case);
    }

    /// Cases inside `window`, ordered by id
    fn in_window(&self, window: &LatLngBounds) -> Vec<&CaseSummary> {
        let envelope = AABB::from_corners(
            [window.west(), window.south()],
            [window.east(), window.north()],
        );
        let mut found: Vec<&CaseSummary> = self
            .tree
            .locate_in_envelope(&envelope)
            .map(|entry| &self.cases[entry.index])
            .collect();
        found.sort_by_key(|case| case.id);
        found
    }
}

/// Case source holding every incident's cases in memory.
#[derive(Default)]
pub struct InMemoryCaseSource {
    incidents: DashMap<i64, IncidentCases>,
}

impl InMemoryCaseSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the cases of `incident_id`.
    pub fn set_cases(&self, incident_id: i64, cases: Vec<CaseSummary>) {
        self.incidents
            .insert(incident_id, IncidentCases::from_cases(cases));
    }

    pub fn add_case(&self, incident_id: i64, case: CaseSummary) {
        self.incidents.entry(incident_id).or_default().insert(case);
    }

    pub fn case_count(&self, incident_id: i64) -> u64 {
        self.incidents
            .get(&incident_id)
            .map_or(0, |cases| cases.cases.len() as u64)
    }
}

#[async_trait]
impl CaseDataSource for InMemoryCaseSource {
    async fn count_cases(&self, incident_id: i64) -> Result<u64, SourceError> {
        Ok(self.case_count(incident_id))
    }

    async fn cases_in_window(
        &self,
        incident_id: i64,
        window: &LatLngBounds,
        page_size: usize,
        offset: usize,
    ) -> Result<Vec<CaseSummary>, SourceError> {
        let Some(cases) = self.incidents.get(&incident_id) else {
            return Ok(Vec::new());
        };
        Ok(cases
            .in_window(window)
            .into_iter()
            .skip(offset)
            .take(page_size)
            .cloned()
            .collect())
    }
}

/// Location records held in memory. Streams handed out by
/// [`locations_for`](IncidentBoundarySource::locations_for) re-emit whenever
/// a record is replaced.
pub struct InMemoryBoundarySource {
    locations: watch::Sender<HashMap<i64, IncidentLocation>>,
}

impl InMemoryBoundarySource {
    pub fn new() -> Self {
        let (locations, _) = watch::channel(HashMap::new());
        Self { locations }
    }

    /// Insert or replace a location record.
    pub fn put(&self, location: IncidentLocation) {
        self.locations.send_modify(|locations| {
            locations.insert(location.id, location);
        });
    }
}

impl Default for InMemoryBoundarySource {
    fn default() -> Self {
        Self::new()
    }
}

impl IncidentBoundarySource for InMemoryBoundarySource {
    fn locations_for(&self, location_ids: &[i64]) -> BoxStream<'static, Vec<IncidentLocation>> {
        let ids = location_ids.to_vec();
        let rx = self.locations.subscribe();
        stream::unfold((rx, ids, true), |(mut rx, ids, first)| async move {
            if !first && rx.changed().await.is_err() {
                return None;
            }
            let selected = {
                let locations = rx.borrow_and_update();
                ids.iter()
                    .filter_map(|id| locations.get(id).cloned())
                    .collect::<Vec<_>>()
            };
            Some((selected, (rx, ids, false)))
        })
        .boxed()
    }
}

/// Deterministic generator of demo incidents and cases.
pub struct DemoData {
    rng: ChaCha8Rng,
    next_case_id: i64,
}

impl DemoData {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            next_case_id: 1,
        }
    }

    /// `count` cases spread uniformly over `area`, with random statuses.
    pub fn cases(&mut self, area: &LatLngBounds, count: usize) -> Vec<CaseSummary> {
        let statuses: Vec<&'static str> = StatusDotIcons::statuses().collect();
        (0..count)
            .map(|_| {
                let latitude = self.rng.random_range(area.south()..=area.north());
                let longitude = self.rng.random_range(area.west()..=area.east());
                let status = statuses[self.rng.random_range(0..statuses.len())];
                let id = self.next_case_id;
                self.next_case_id += 1;
                CaseSummary {
                    id,
                    location: LatLng::new(latitude, longitude),
                    status: status.to_string(),
                }
            })
            .collect()
    }

    /// Rectangular location record covering `area`.
    pub fn location(id: i64, area: &LatLngBounds) -> IncidentLocation {
        IncidentLocation {
            id,
            coordinates: Some(vec![
                area.west(),
                area.south(),
                area.east(),
                area.south(),
                area.east(),
                area.north(),
                area.west(),
                area.north(),
                area.west(),
                area.south(),
            ]),
            multi_coordinates: None,
        }
    }

    /// Seed `cases` and `boundaries` with two demo incidents: a hurricane
    /// along the Gulf coast with `case_count` cases, and a flood incident
    /// with neither cases nor locations.
    pub fn seed(
        &mut self,
        case_count: usize,
        cases: &InMemoryCaseSource,
        boundaries: &InMemoryBoundarySource,
    ) -> Vec<Incident> {
        let gulf_coast = LatLngBounds::new(LatLng::new(28.9, -95.5), LatLng::new(31.2, -87.8));
        let florida = LatLngBounds::new(LatLng::new(25.1, -82.9), LatLng::new(27.8, -80.0));

        boundaries.put(Self::location(101, &gulf_coast));
        boundaries.put(Self::location(102, &florida));

        let mut hurricane_cases = self.cases(&gulf_coast, case_count * 3 / 4);
        hurricane_cases.extend(self.cases(&florida, case_count - case_count * 3 / 4));
        cases.set_cases(1, hurricane_cases);
        cases.set_cases(2, Vec::new());

        vec![
            Incident {
                id: 1,
                name: "Demo Hurricane".to_string(),
                location_ids: vec![101, 102],
            },
            Incident {
                id: 2,
                name: "Demo Flood".to_string(),
                location_ids: Vec::new(),
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn case(id: i64, latitude: f64, longitude: f64) -> CaseSummary {
        CaseSummary {
            id,
            location: LatLng::new(latitude, longitude),
            status: "open_assigned".to_string(),
        }
    }

    #[tokio::test]
    async fn test_window_query_is_ordered_and_paged() {
        let source = InMemoryCaseSource::new();
        source.set_cases(
            1,
            vec![
                case(5, 10.0, 10.0),
                case(2, 11.0, 11.0),
                case(9, 12.0, 12.0),
                case(7, 50.0, 50.0),
            ],
        );
        source.add_case(1, case(1, 10.5, 10.5));

        let window = LatLngBounds::new(LatLng::new(9.0, 9.0), LatLng::new(13.0, 13.0));
        let first = source.cases_in_window(1, &window, 3, 0).await.unwrap();
        let ids: Vec<i64> = first.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![1, 2, 5]);

        let second = source.cases_in_window(1, &window, 3, 3).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id, 9);

        assert_eq!(source.count_cases(1).await.unwrap(), 5);
        assert_eq!(source.count_cases(2).await.unwrap(), 0);
        assert!(source.cases_in_window(2, &window, 3, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_boundary_stream_reemits_on_change() {
        let source = InMemoryBoundarySource::new();
        let area = LatLngBounds::new(LatLng::new(1.0, 1.0), LatLng::new(2.0, 2.0));
        source.put(DemoData::location(1, &area));
        source.put(DemoData::location(2, &area));

        let mut stream = source.locations_for(&[1, 3]);
        let first = stream.next().await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].id, 1);

        source.put(DemoData::location(3, &area));
        let second = stream.next().await.unwrap();
        let ids: Vec<i64> = second.iter().map(|l| l.id).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn test_generator_is_deterministic() {
        let area = LatLngBounds::new(LatLng::new(30.0, -90.0), LatLng::new(31.0, -89.0));
        let a = DemoData::new(7).cases(&area, 50);
        let b = DemoData::new(7).cases(&area, 50);

        assert_eq!(a, b);
        assert!(a.iter().all(|c| area.contains(c.location)));
        assert_eq!(a.last().map(|c| c.id), Some(50));
    }

    #[test]
    fn test_seed_creates_incidents() {
        let cases = InMemoryCaseSource::new();
        let boundaries = InMemoryBoundarySource::new();
        let incidents = DemoData::new(1).seed(1000, &cases, &boundaries);

        assert_eq!(incidents.len(), 2);
        assert_eq!(cases.case_count(1), 1000);
        assert_eq!(cases.case_count(2), 0);
    }
}
