//! Umbrella crate re-exporting the workspace members.

pub use patch;
pub use patchgen;
pub use train_record;
