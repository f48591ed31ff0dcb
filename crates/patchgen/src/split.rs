use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::SmallRng;
use rand::SeedableRng;

use crate::backend::RandomFilter;
use crate::{Error, Result};

const INDEX_MIX: u64 = 0x9e37_79b9_7f4a_7c15;

/// Dataset role of a record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Split {
    Training,
    Validation,
    Test,
}

impl Split {
    pub const ALL: [Split; 3] = [Split::Training, Split::Validation, Split::Test];

    /// Directory and shard stem name of the split.
    pub fn role(self) -> &'static str {
        match self {
            Split::Training => "training",
            Split::Validation => "validation",
            Split::Test => "testing",
        }
    }

    pub fn index(self) -> usize {
        match self {
            Split::Training => 0,
            Split::Validation => 1,
            Split::Test => 2,
        }
    }
}

impl std::fmt::Display for Split {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.role())
    }
}

/// Validation and test fractions, the rest is training.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SplitRatios {
    pub validation: f64,
    pub test: f64,
}

impl Default for SplitRatios {
    fn default() -> SplitRatios {
        SplitRatios {
            validation: 0.2,
            test: 0.2,
        }
    }
}

impl SplitRatios {
    pub fn new(validation: f64, test: f64) -> Result<SplitRatios> {
        let ratios = SplitRatios { validation, test };
        ratios.validate()?;
        Ok(ratios)
    }

    pub fn validate(&self) -> Result {
        if !(self.validation >= 0.0 && self.test >= 0.0) {
            return Err(Error::InvalidArgument(format!(
                "Split ratios have to be non negative (validation {}, test {})",
                self.validation, self.test
            )));
        }
        if !(self.validation + self.test < 1.0) {
            return Err(Error::InvalidArgument(format!(
                "Split ratios have to leave room for training data (validation {} + test {})",
                self.validation, self.test
            )));
        }

        Ok(())
    }

    pub fn training(&self) -> f64 {
        1.0 - self.validation - self.test
    }

    /// Random column range for `split` in a pre-partitioned collection,
    /// derived from the same ratios: validation `r <= v`, test
    /// `v < r <= v + t`, training `r > v + t`.
    pub fn random_filter(&self, split: Split, seed: u64) -> RandomFilter {
        match split {
            Split::Training => RandomFilter {
                seed,
                gt: Some(self.validation + self.test),
                lte: None,
            },
            Split::Validation => RandomFilter {
                seed,
                gt: None,
                lte: Some(self.validation),
            },
            Split::Test => RandomFilter {
                seed,
                gt: Some(self.validation),
                lte: Some(self.validation + self.test),
            },
        }
    }
}

/// Record counts per split role.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SplitCounts {
    pub training: u64,
    pub validation: u64,
    pub test: u64,
}

impl SplitCounts {
    pub fn count(&self, split: Split) -> u64 {
        match split {
            Split::Training => self.training,
            Split::Validation => self.validation,
            Split::Test => self.test,
        }
    }

    pub fn total(&self) -> u64 {
        self.training + self.validation + self.test
    }

    pub(crate) fn add(&mut self, split: Split, records: u64) {
        match split {
            Split::Training => self.training += records,
            Split::Validation => self.validation += records,
            Split::Test => self.test += records,
        }
    }
}

impl std::fmt::Display for SplitCounts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} training, {} validation, {} testing",
            self.training, self.validation, self.test
        )
    }
}

/// Weighted random split assignment.
///
/// Draws are expectation only, no exact per split counts are enforced. With
/// a seed the draw for an index is a pure function of `(seed, index)`, so a
/// rerun of the same collection lands every sample in the same split no
/// matter how the work is distributed over threads.
pub struct SplitSampler {
    weights: WeightedIndex<f64>,
    seed: Option<u64>,
}

impl SplitSampler {
    pub fn new(ratios: &SplitRatios, seed: Option<u64>) -> Result<SplitSampler> {
        ratios.validate()?;
        let weights = WeightedIndex::new([ratios.training(), ratios.validation, ratios.test])
            .map_err(|err| Error::InvalidArgument(format!("Unusable split ratios: {err}")))?;

        Ok(SplitSampler { weights, seed })
    }

    pub fn assign(&self, index: u64) -> Split {
        let mut rng = self.rng_for(index);
        Split::ALL[self.weights.sample(&mut rng)]
    }

    fn rng_for(&self, index: u64) -> SmallRng {
        match self.seed {
            Some(seed) => SmallRng::seed_from_u64(seed ^ index.wrapping_mul(INDEX_MIX)),
            None => SmallRng::from_entropy(),
        }
    }
}
