//! Suppression of visually identical dots during one tile render pass.
//!
//! Far out, many cases land on the same screen position and drawing all of
//! them changes nothing visible. The tracker floors normalized tile positions
//! into a coarse bucket grid and reports a bucket as occupied once a dot has
//! been drawn in it. Positions in the padding margin around the tile are
//! always drawn and never mark a bucket, so a mostly clipped dot cannot hide
//! one that lies inside the tile.

use crate::config::DedupConfig;

/// Per-render-pass occupancy grid.
#[derive(Debug)]
pub struct DotDeduplicator {
    active: bool,
    max_zoom: u32,
    resolution: usize,
    occupied: Vec<bool>,
    skipped: u64,
}

impl DotDeduplicator {
    /// Tracker for an incident with `case_count` cases. Inactive (never
    /// reports occupancy) for small incidents.
    pub fn new(config: &DedupConfig, case_count: u64) -> Self {
        let resolution = config.resolution.max(1) as usize;
        let active = case_count >= config.min_case_count;
        Self {
            active,
            max_zoom: config.max_zoom,
            resolution,
            occupied: if active {
                vec![false; resolution * resolution]
            } else {
                Vec::new()
            },
            skipped: 0,
        }
    }

    /// Whether a dot at the normalized tile position has already been drawn
    /// in the same bucket. A position reported free is marked occupied.
    pub fn is_occupied(&mut self, zoom: u32, x_norm: f64, y_norm: f64) -> bool {
        if !self.active || zoom > self.max_zoom {
            return false;
        }
        let (Some(column), Some(row)) = (self.bucket(x_norm), self.bucket(y_norm)) else {
            return false;
        };

        let index = row * self.resolution + column;
        if self.occupied[index] {
            self.skipped += 1;
            true
        } else {
            self.occupied[index] = true;
            false
        }
    }

    /// Bucket index along one axis, `None` outside `[0, 1)`.
    fn bucket(&self, norm: f64) -> Option<usize> {
        if !(0.0..1.0).contains(&norm) {
            return None;
        }
        let index = (norm * self.resolution as f64).floor() as usize;
        Some(index.min(self.resolution - 1))
    }

    /// Number of positions reported occupied since the last reset.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    pub fn reset(&mut self) {
        self.occupied.fill(false);
        self.skipped = 0;
    }
}
