//! Geographic primitives shared by the tile renderer, bounds aggregator and
//! query state.

use serde::{Deserialize, Serialize};

/// A latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LatLng {
    pub latitude: f64,
    pub longitude: f64,
}

impl LatLng {
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// Axis-aligned geographic box described by its southwest and northeast corners.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LatLngBounds {
    pub southwest: LatLng,
    pub northeast: LatLng,
}

/// Bounds used when an incident declares no locations (continental United States).
pub const DEFAULT_BOUNDS: LatLngBounds = LatLngBounds {
    southwest: LatLng::new(28.598, -122.762),
    northeast: LatLng::new(48.922, -69.034),
};

impl LatLngBounds {
    pub const fn new(southwest: LatLng, northeast: LatLng) -> Self {
        Self {
            southwest,
            northeast,
        }
    }

    /// The zero-sized box at the origin, used before any viewport is known.
    pub const fn empty() -> Self {
        Self {
            southwest: LatLng::new(0.0, 0.0),
            northeast: LatLng::new(0.0, 0.0),
        }
    }

    pub fn south(&self) -> f64 {
        self.southwest.latitude
    }

    pub fn north(&self) -> f64 {
        self.northeast.latitude
    }

    pub fn west(&self) -> f64 {
        self.southwest.longitude
    }

    pub fn east(&self) -> f64 {
        self.northeast.longitude
    }

    pub fn width(&self) -> f64 {
        self.east() - self.west()
    }

    pub fn height(&self) -> f64 {
        self.north() - self.south()
    }

    /// True when the box has no area along at least one axis.
    pub fn is_degenerate(&self) -> bool {
        self.width() <= 0.0 || self.height() <= 0.0
    }

    pub fn contains(&self, point: LatLng) -> bool {
        point.latitude >= self.south()
            && point.latitude <= self.north()
            && point.longitude >= self.west()
            && point.longitude <= self.east()
    }

    /// Grows the box by `lat` degrees north and south, `lng` degrees east and west.
    pub fn expanded(&self, lat: f64, lng: f64) -> Self {
        Self {
            southwest: LatLng::new(self.south() - lat, self.west() - lng),
            northeast: LatLng::new(self.north() + lat, self.east() + lng),
        }
    }
}

/// Accumulates points into the smallest box containing all of them.
#[derive(Debug, Clone, Default)]
pub struct BoundsBuilder {
    bounds: Option<LatLngBounds>,
}

impl BoundsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn include(&mut self, point: LatLng) -> &mut Self {
        self.bounds = Some(match self.bounds {
            None => LatLngBounds::new(point, point),
            Some(b) => LatLngBounds::new(
                LatLng::new(
                    b.south().min(point.latitude),
                    b.west().min(point.longitude),
                ),
                LatLng::new(
                    b.north().max(point.latitude),
                    b.east().max(point.longitude),
                ),
            ),
        });
        self
    }

    /// Returns `None` if no point was ever included.
    pub fn build(&self) -> Option<LatLngBounds> {
        self.bounds
    }
}

impl FromIterator<LatLng> for BoundsBuilder {
    fn from_iter<I: IntoIterator<Item = LatLng>>(iter: I) -> Self {
        let mut builder = Self::new();
        for point in iter {
            builder.include(point);
        }
        builder
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_empty() {
        assert!(BoundsBuilder::new().build().is_none());
    }

    #[test]
    fn test_builder_contains_all_points() {
        let points = [
            LatLng::new(30.0, -90.0),
            LatLng::new(35.5, -80.0),
            LatLng::new(28.0, -85.0),
        ];
        let bounds = points.iter().copied().collect::<BoundsBuilder>().build().unwrap();

        assert_eq!(bounds.southwest, LatLng::new(28.0, -90.0));
        assert_eq!(bounds.northeast, LatLng::new(35.5, -80.0));
        assert!(points.iter().all(|p| bounds.contains(*p)));
        assert!(!bounds.is_degenerate());
    }

    #[test]
    fn test_single_point_is_degenerate() {
        let bounds = BoundsBuilder::from_iter([LatLng::new(10.0, 10.0)])
            .build()
            .unwrap();
        assert!(bounds.is_degenerate());

        let padded = bounds.expanded(0.02, 0.02);
        assert!(!padded.is_degenerate());
        assert!((padded.height() - 0.04).abs() < 1e-9);
    }
}
