use std::fmt;

use chrono::{DateTime, Utc};
use geo_types::Point;
use serde::{Deserialize, Serialize};

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A single GPS fix. `position` is stored as x = longitude, y = latitude.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionFix {
    pub position: Point,
    pub speed_kmh: f64,
    pub accuracy_m: f64,
    pub timestamp: DateTime<Utc>,
}

impl PositionFix {
    pub fn new(latitude: f64, longitude: f64, speed_kmh: f64, accuracy_m: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            position: Point::new(longitude, latitude),
            speed_kmh,
            accuracy_m,
            timestamp,
        }
    }

    pub fn latitude(&self) -> f64 {
        self.position.y()
    }

    pub fn longitude(&self) -> f64 {
        self.position.x()
    }

    pub fn has_valid_coordinates(&self) -> bool {
        let (lat, lon) = (self.latitude(), self.longitude());
        lat.is_finite()
            && lon.is_finite()
            && (-90.0..=90.0).contains(&lat)
            && (-180.0..=180.0).contains(&lon)
            && self.speed_kmh.is_finite()
            && self.accuracy_m.is_finite()
    }

    /// Great-circle distance to another fix in meters.
    pub fn distance_m(&self, other: &PositionFix) -> f64 {
        haversine_m(self.position, other.position)
    }
}

/// Haversine distance between two lon/lat points in meters.
pub fn haversine_m(a: Point, b: Point) -> f64 {
    let d_lat = (b.y() - a.y()).to_radians();
    let d_lon = (b.x() - a.x()).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a.y().to_radians().cos() * b.y().to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).max(0.0).sqrt());
    EARTH_RADIUS_M * c
}

/// Sum of great-circle segments over consecutive points, in meters.
pub fn path_distance_m<'a>(path: impl IntoIterator<Item = &'a PositionFix>) -> f64 {
    let mut total = 0.0;
    let mut previous: Option<&PositionFix> = None;
    for fix in path {
        if let Some(previous) = previous {
            total += previous.distance_m(fix);
        }
        previous = Some(fix);
    }
    total
}

/// Where a trip started or ended. `Unknown` stands in when no fix was available.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Location {
    Known(Point),
    Unknown,
}

impl Location {
    pub fn is_known(&self) -> bool {
        matches!(self, Location::Known(_))
    }
}

impl From<&PositionFix> for Location {
    fn from(fix: &PositionFix) -> Self {
        Location::Known(fix.position)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Known(point) => write!(f, "{:.6}, {:.6}", point.y(), point.x()),
            Location::Unknown => write!(f, "Unknown"),
        }
    }
}
