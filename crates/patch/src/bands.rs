use std::str::FromStr;

use crate::{Error, Result};

/// Temporal window of a composite, used to disambiguate band names when
/// several composites of the same sensor are stacked into one image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompositeWindow {
    Before,
    During,
    After,
}

impl CompositeWindow {
    pub const fn suffix(&self) -> &'static str {
        match self {
            CompositeWindow::Before => "_before",
            CompositeWindow::During => "_during",
            CompositeWindow::After => "_after",
        }
    }

    pub fn band_name(&self, base: &str) -> String {
        format!("{}{}", base, self.suffix())
    }
}

impl std::fmt::Display for CompositeWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", &self.suffix()[1..])
    }
}

impl FromStr for CompositeWindow {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "before" => Ok(CompositeWindow::Before),
            "during" => Ok(CompositeWindow::During),
            "after" => Ok(CompositeWindow::After),
            _ => Err(Error::UnknownWindow(value.to_string())),
        }
    }
}

/// Expand base band names across composite windows, window major so all
/// bands of the first window come first. Without windows the base names are
/// used as is. Duplicate names are rejected.
pub fn expand_band_names(bands: &[String], windows: &[CompositeWindow]) -> Result<Vec<String>> {
    if bands.is_empty() {
        return Err(Error::EmptyBandList);
    }

    let mut names = Vec::with_capacity(bands.len() * windows.len().max(1));
    if windows.is_empty() {
        names.extend(bands.iter().cloned());
    } else {
        for window in windows {
            for band in bands {
                names.push(window.band_name(band));
            }
        }
    }

    for (index, name) in names.iter().enumerate() {
        if names[..index].contains(name) {
            return Err(Error::DuplicateBand(name.clone()));
        }
    }

    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bands(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn window_suffixes() {
        assert_eq!(CompositeWindow::Before.band_name("red"), "red_before");
        assert_eq!(CompositeWindow::During.band_name("nir"), "nir_during");
        assert_eq!(CompositeWindow::After.band_name("swir1"), "swir1_after");
    }

    #[test]
    fn parse_round_trip() {
        for window in [CompositeWindow::Before, CompositeWindow::During, CompositeWindow::After] {
            assert_eq!(window.to_string().parse::<CompositeWindow>().ok(), Some(window));
        }

        assert!(matches!("later".parse::<CompositeWindow>(), Err(Error::UnknownWindow(_))));
    }

    #[test]
    fn expansion_is_window_major() {
        let names = expand_band_names(
            &bands(&["red", "green"]),
            &[CompositeWindow::Before, CompositeWindow::During],
        )
        .unwrap();

        assert_eq!(names, bands(&["red_before", "green_before", "red_during", "green_during"]));
    }

    #[test]
    fn no_windows_keeps_base_names() {
        let names = expand_band_names(&bands(&["red", "green"]), &[]).unwrap();
        assert_eq!(names, bands(&["red", "green"]));
    }

    #[test]
    fn duplicates_are_rejected() {
        assert!(matches!(
            expand_band_names(&bands(&["red", "red"]), &[]),
            Err(Error::DuplicateBand(_))
        ));
        assert!(matches!(
            expand_band_names(&bands(&["red"]), &[CompositeWindow::Before, CompositeWindow::Before]),
            Err(Error::DuplicateBand(_))
        ));
    }

    #[test]
    fn empty_band_list_is_rejected() {
        assert!(matches!(expand_band_names(&[], &[]), Err(Error::EmptyBandList)));
    }
}
