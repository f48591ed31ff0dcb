use patch::Patch;

/// Accept a patch only when every sample in every band is a finite number.
///
/// A single NaN or infinity anywhere rejects the whole patch. There is no
/// repair and no partial accept, a rejected patch is simply not exported.
pub fn has_finite_values(patch: &Patch) -> bool {
    patch.values().all(f32::is_finite)
}
