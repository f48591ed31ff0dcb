use std::collections::BTreeMap;

use patch::{Coordinate, Patch, RasterRegion, RegionBounds};

use crate::error::FetchError;

/// Reference to a sample collection, optionally narrowed to a band of its
/// server side uniform random column.
#[derive(Clone, Debug, PartialEq)]
pub struct CollectionRef {
    pub collection: String,
    pub filter: Option<RandomFilter>,
}

impl CollectionRef {
    pub fn named(collection: impl Into<String>) -> CollectionRef {
        CollectionRef {
            collection: collection.into(),
            filter: None,
        }
    }

    pub fn with_filter(mut self, filter: RandomFilter) -> CollectionRef {
        self.filter = Some(filter);
        self
    }
}

/// Selection `gt < r <= lte` on the random column in `[0, 1)` seeded with
/// `seed`, open ends omitted.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RandomFilter {
    pub seed: u64,
    pub gt: Option<f64>,
    pub lte: Option<f64>,
}

/// Neighborhood request around one sample coordinate.
#[derive(Clone, Debug, PartialEq)]
pub struct PatchRequest {
    pub coordinate: Coordinate,
    pub bands: Vec<String>,
    pub scale_m: f64,
    pub size: usize,
}

impl PatchRequest {
    /// Geographic window covered by the requested patch.
    pub fn region(&self) -> RasterRegion {
        RasterRegion::centered_at(self.coordinate, self.scale_m, self.size)
    }
}

/// Per band value summary over a region.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BandStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RegionStats {
    pub bands: BTreeMap<String, BandStats>,
}

/// Per point band value sampling over a collection view.
#[derive(Clone, Debug, PartialEq)]
pub struct PointQuery {
    pub collection: CollectionRef,
    pub properties: Vec<String>,
    pub scale_m: f64,
}

/// One sampled row, values aligned with the query properties.
#[derive(Clone, Debug, PartialEq)]
pub struct PointRow {
    pub values: Vec<f32>,
}

/// Server side stratified sampling over a labeled image band.
#[derive(Clone, Debug, PartialEq)]
pub struct StratifiedQuery {
    pub class_band: String,
    pub points_per_class: u64,
    pub scale_m: f64,
    pub region: Option<RegionBounds>,
    pub seed: u64,
}

/// One authenticated session against the remote raster service.
///
/// A session is used from a single worker. Workers never share sessions,
/// every one opens its own through a [`SessionFactory`].
pub trait RasterBackend {
    fn collection_size(&self, collection: &CollectionRef) -> Result<u64, FetchError>;

    /// Coordinate of the sample at `index`. Past the end of the collection
    /// this is [`FetchError::OutOfRange`], which callers treat as an
    /// expected end condition rather than a failure.
    fn sample_coordinate(
        &self,
        collection: &CollectionRef,
        index: u64,
    ) -> Result<Coordinate, FetchError>;

    /// Download the neighborhood of a sample as a decoded [`Patch`].
    fn fetch_patch(&self, image: &str, request: &PatchRequest) -> Result<Patch, FetchError>;

    /// Compute the neighborhood synchronously instead of downloading it.
    fn compute_patch(&self, image: &str, request: &PatchRequest) -> Result<Patch, FetchError>;

    fn image_bands(&self, image: &str) -> Result<Vec<String>, FetchError>;

    fn region_stats(
        &self,
        image: &str,
        bounds: &RegionBounds,
        scale_m: f64,
    ) -> Result<RegionStats, FetchError>;

    fn sample_points(&self, image: &str, query: &PointQuery) -> Result<Vec<PointRow>, FetchError>;

    /// Create a stratified sample collection server side and return its
    /// name.
    fn stratified_sample(
        &self,
        image: &str,
        query: &StratifiedQuery,
    ) -> Result<String, FetchError>;
}

/// Opens backend sessions for pipeline workers.
pub trait SessionFactory: Sync {
    type Backend: RasterBackend;

    fn open_session(&self) -> Result<Self::Backend, FetchError>;
}
