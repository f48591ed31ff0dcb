use ndarray::Array3;
use ndarray_npy::ReadNpyExt;

use crate::{Error, Patch, Result};

/// Decode a `(band, row, col)` float32 npy payload into a [`Patch`].
///
/// The plane count has to match the band name list and every plane has to be
/// `size` x `size` pixels.
pub fn patch_from_npy(data: &[u8], names: Vec<String>, size: usize) -> Result<Patch> {
    let planes = Array3::<f32>::read_npy(data).map_err(|err| Error::Npy(err.to_string()))?;

    let (bands, rows, cols) = planes.dim();
    if bands != names.len() {
        return Err(Error::BandCount {
            expected: names.len(),
            actual: bands,
        });
    }
    if rows != size || cols != size {
        return Err(Error::PatchSize {
            expected: size,
            actual: (rows, cols),
        });
    }

    Patch::new(names, planes)
}
