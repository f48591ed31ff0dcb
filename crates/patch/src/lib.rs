#![warn(clippy::unwrap_used)]

pub type Result<T = ()> = std::result::Result<T, Error>;

mod bands;
mod coordinate;
mod error;
mod npyio;
mod patchdata;
mod region;

pub use bands::expand_band_names;
pub use bands::CompositeWindow;
pub use coordinate::Coordinate;
pub use coordinate::SampleLocation;
#[doc(inline)]
pub use error::Error;
pub use npyio::patch_from_npy;
pub use patchdata::Patch;
pub use region::RasterRegion;
pub use region::RegionBounds;

pub type Point<T = f64> = geo_types::Point<T>;
