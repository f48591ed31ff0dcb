use approx::{AbsDiffEq, RelativeEq};

use crate::Point;

/// WGS84 coordinate expressed as latitude and longitude in degrees.
#[derive(Clone, Copy, PartialEq, Default)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub const fn latlon(latitude: f64, longitude: f64) -> Self {
        Coordinate { latitude, longitude }
    }

    pub fn is_valid(&self) -> bool {
        self.latitude.abs() <= 90.0 && self.longitude.abs() <= 180.0
    }

    pub fn point(&self) -> Point {
        Point::new(self.longitude, self.latitude)
    }
}

impl From<Point> for Coordinate {
    fn from(point: Point) -> Self {
        Coordinate::latlon(point.y(), point.x())
    }
}

impl std::fmt::Display for Coordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.latitude, self.longitude)
    }
}

impl std::fmt::Debug for Coordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

impl AbsDiffEq for Coordinate {
    type Epsilon = f64;

    fn default_epsilon() -> f64 {
        f64::EPSILON
    }

    fn abs_diff_eq(&self, other: &Self, epsilon: f64) -> bool {
        self.latitude.abs_diff_eq(&other.latitude, epsilon) && self.longitude.abs_diff_eq(&other.longitude, epsilon)
    }
}

impl RelativeEq for Coordinate {
    fn default_max_relative() -> f64 {
        f64::default_max_relative()
    }

    fn relative_eq(&self, other: &Self, epsilon: f64, max_relative: f64) -> bool {
        self.latitude.relative_eq(&other.latitude, epsilon, max_relative)
            && self.longitude.relative_eq(&other.longitude, epsilon, max_relative)
    }
}

/// Position of one sample within its source collection together with its
/// resolved coordinate. The index is the unit of parallel work.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SampleLocation {
    pub index: u64,
    pub coordinate: Coordinate,
}

impl SampleLocation {
    pub const fn new(index: u64, coordinate: Coordinate) -> Self {
        SampleLocation { index, coordinate }
    }
}
