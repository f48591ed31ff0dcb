use ndarray::{Array3, ArrayView2, Axis};

use crate::{Error, Result};

/// Fixed size multi band raster window with named bands.
///
/// Planes are stored `(band, row, col)` with one square plane per band, band
/// order matching the name list. Storage is kept in standard row major
/// layout so flat views stay cheap.
#[derive(Clone, Debug, PartialEq)]
pub struct Patch {
    names: Vec<String>,
    planes: Array3<f32>,
}

impl Patch {
    pub fn new(names: Vec<String>, planes: Array3<f32>) -> Result<Patch> {
        if names.is_empty() {
            return Err(Error::EmptyBandList);
        }

        for (index, name) in names.iter().enumerate() {
            if names[..index].contains(name) {
                return Err(Error::DuplicateBand(name.clone()));
            }
        }

        let (bands, rows, cols) = planes.dim();
        if bands != names.len() {
            return Err(Error::BandCount {
                expected: names.len(),
                actual: bands,
            });
        }
        if rows != cols {
            return Err(Error::PlaneShape { rows, cols });
        }

        let planes = if planes.is_standard_layout() {
            planes
        } else {
            planes.as_standard_layout().into_owned()
        };

        Ok(Patch { names, planes })
    }

    pub fn filled_with(value: f32, names: Vec<String>, size: usize) -> Result<Patch> {
        let bands = names.len();
        Patch::new(names, Array3::from_elem((bands, size, size), value))
    }

    /// Side length of every band plane in pixels.
    pub fn size(&self) -> usize {
        self.planes.dim().1
    }

    pub fn band_count(&self) -> usize {
        self.names.len()
    }

    pub fn band_names(&self) -> &[String] {
        &self.names
    }

    pub fn band(&self, name: &str) -> Option<ArrayView2<'_, f32>> {
        let index = self.names.iter().position(|n| n == name)?;
        Some(self.planes.index_axis(Axis(0), index))
    }

    /// Bands in declaration order.
    pub fn bands(&self) -> impl Iterator<Item = (&str, ArrayView2<'_, f32>)> {
        self.names.iter().map(String::as_str).zip(self.planes.axis_iter(Axis(0)))
    }

    /// Every value as one contiguous view, bands outermost, rows before
    /// columns within a band.
    pub fn as_slice(&self) -> &[f32] {
        self.planes.as_slice().expect("Patch storage is always standard layout")
    }

    /// Every value in [`Patch::as_slice`] order.
    pub fn values(&self) -> impl Iterator<Item = f32> + '_ {
        self.as_slice().iter().copied()
    }

    /// Row major values of the band at `index`.
    pub fn band_values(&self, index: usize) -> &[f32] {
        let plane = self.size() * self.size();
        &self.as_slice()[index * plane..(index + 1) * plane]
    }
}

#[cfg(test)]
mod tests {
    use ndarray::Array;

    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|name| name.to_string()).collect()
    }

    fn counting_planes(bands: usize, size: usize) -> Array3<f32> {
        Array::from_iter((0..bands * size * size).map(|v| v as f32))
            .into_shape_with_order((bands, size, size))
            .unwrap()
    }

    #[test]
    fn construction_checks_names_against_planes() {
        assert!(matches!(
            Patch::new(Vec::new(), counting_planes(1, 2)),
            Err(Error::EmptyBandList)
        ));
        assert!(matches!(
            Patch::new(names(&["a", "a"]), counting_planes(2, 2)),
            Err(Error::DuplicateBand(_))
        ));
        assert!(matches!(
            Patch::new(names(&["a", "b"]), counting_planes(3, 2)),
            Err(Error::BandCount { expected: 2, actual: 3 })
        ));

        let rectangular = Array3::<f32>::zeros((1, 2, 3));
        assert!(matches!(
            Patch::new(names(&["a"]), rectangular),
            Err(Error::PlaneShape { rows: 2, cols: 3 })
        ));
    }

    #[test]
    fn band_lookup_by_name() {
        let patch = Patch::new(names(&["red", "class"]), counting_planes(2, 2)).unwrap();

        assert_eq!(patch.size(), 2);
        assert_eq!(patch.band_count(), 2);
        let class = patch.band("class").unwrap();
        assert_eq!(class[[0, 0]], 4.0);
        assert_eq!(class[[1, 1]], 7.0);
        assert!(patch.band("blue").is_none());
    }

    #[test]
    fn band_values_are_row_major_per_band() {
        let patch = Patch::new(names(&["a", "b"]), counting_planes(2, 2)).unwrap();

        assert_eq!(patch.band_values(0), &[0.0, 1.0, 2.0, 3.0]);
        assert_eq!(patch.band_values(1), &[4.0, 5.0, 6.0, 7.0]);
        assert_eq!(patch.as_slice().len(), 8);
    }

    #[test]
    fn non_standard_layout_is_normalized() {
        // (2, 2, 2) planes with the band axis innermost, as a permuted view.
        let mut planes = counting_planes(2, 2);
        planes.swap_axes(0, 2);
        let logical: Vec<f32> = planes.iter().copied().collect();

        let patch = Patch::new(names(&["a", "b"]), planes).unwrap();
        assert_eq!(patch.as_slice(), logical.as_slice());
    }

    #[test]
    fn bands_iterate_in_declaration_order() {
        let patch = Patch::new(names(&["first", "second"]), counting_planes(2, 2)).unwrap();
        let order: Vec<&str> = patch.bands().map(|(name, _)| name).collect();
        assert_eq!(order, vec!["first", "second"]);
    }

    #[test]
    fn filled_patch() {
        let patch = Patch::filled_with(1.5, names(&["a"]), 3).unwrap();
        assert_eq!(patch.size(), 3);
        assert!(patch.as_slice().iter().all(|v| *v == 1.5));
    }
}
