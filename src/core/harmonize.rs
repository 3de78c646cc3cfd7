use crate::core::bands::BandKind;
use crate::core::cube::SiteCube;
use crate::types::{SitsError, SitsResult};
use ndarray::s;

/// Additive shift introduced by Sentinel-2 processing baseline 04.00:
/// digital numbers gained a fixed 1000 DN offset.
pub const BASELINE_OFFSET: f32 = 1000.0;

/// First processing baseline carrying the offset
pub const BASELINE_THRESHOLD: f32 = 4.0;

/// Smallest valid digital number after correction; keeps shifted pixels
/// from collapsing into the nodata sentinel
pub const MIN_VALID_DN: f32 = 1.0;

/// Removes the processing-baseline radiometric offset from reflectance
/// bands, harmonizing newer scenes onto the pre-04.00 scale.
///
/// Classification bands are never corrected. The correction is applied at
/// most once per cube: a second `apply` fails with `AlreadyCorrected`
/// rather than double-subtracting.
pub struct BaselineCorrector {
    offset: f32,
    threshold: f32,
}

impl Default for BaselineCorrector {
    fn default() -> Self {
        Self { offset: BASELINE_OFFSET, threshold: BASELINE_THRESHOLD }
    }
}

impl BaselineCorrector {
    pub fn new(offset: f32, threshold: f32) -> Self {
        Self { offset, threshold }
    }

    /// Shift every timestamp whose source baseline is at or above the
    /// threshold. Returns the number of corrected timestamps.
    pub fn apply(&self, cube: &mut SiteCube) -> SitsResult<usize> {
        if cube.harmonized {
            return Err(SitsError::AlreadyCorrected);
        }

        let nodata = cube.nodata;
        let mut corrected = 0usize;
        for (t, &baseline) in cube.baselines.iter().enumerate() {
            if baseline < self.threshold {
                continue;
            }
            corrected += 1;
            for name in &cube.band_names {
                if cube.band_kinds.get(name) != Some(&BandKind::Reflectance) {
                    continue;
                }
                if let Some(stack) = cube.bands.get_mut(name) {
                    stack
                        .slice_mut(s![t, .., ..])
                        .mapv_inplace(|v| {
                            if v == nodata {
                                v
                            } else {
                                (v - self.offset).max(MIN_VALID_DN)
                            }
                        });
                }
            }
        }

        cube.harmonized = true;
        log::info!(
            "site {}: baseline offset removed from {} of {} timestamps",
            cube.site_id,
            corrected,
            cube.timestamps.len()
        );
        Ok(corrected)
    }
}
