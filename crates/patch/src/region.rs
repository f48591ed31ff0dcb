use crate::Coordinate;

const METERS_PER_DEGREE: f64 = 111_320.0;

/// WGS84 bounds of a region, degrees.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RegionBounds {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

/// Square geographic window centered on a sample coordinate.
///
/// The side length is fixed by the nominal pixel resolution and the patch
/// size in pixels: a request for `size_px` pixels at `scale_m` meters per
/// pixel covers `scale_m * size_px` meters on the ground.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RasterRegion {
    center: Coordinate,
    scale_m: f64,
    size_px: usize,
}

impl RasterRegion {
    pub fn centered_at(center: Coordinate, scale_m: f64, size_px: usize) -> Self {
        RasterRegion { center, scale_m, size_px }
    }

    pub fn center(&self) -> Coordinate {
        self.center
    }

    pub fn size_px(&self) -> usize {
        self.size_px
    }

    pub fn side_meters(&self) -> f64 {
        self.scale_m * self.size_px as f64
    }

    /// Bounds of the window, using the meters per degree approximation at
    /// the center latitude.
    pub fn bounds(&self) -> RegionBounds {
        let half_side = self.side_meters() / 2.0;
        let dlat = half_side / METERS_PER_DEGREE;
        let dlon = half_side / (METERS_PER_DEGREE * self.center.latitude.to_radians().cos());

        RegionBounds {
            west: self.center.longitude - dlon,
            south: self.center.latitude - dlat,
            east: self.center.longitude + dlon,
            north: self.center.latitude + dlat,
        }
    }
}
