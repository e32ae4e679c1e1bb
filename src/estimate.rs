//! Predicting how big a download will be before we fetch anything.
//!
//! The user gets shown an estimated total for their package before any
//! transfer happens, so we need a byte count for every manifest entry up
//! front. For full frames that's just a per-instrument constant. For cutouts
//! we scale the data portion of the frame by the fraction of its area that
//! the cutout covers. The cutout service may clip at frame edges, so the
//! real file can be smaller; that's fine, these numbers are advisory.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::records::ProductType;

/// What we assume about an entry whose size we have no idea about.
pub const DEFAULT_ENTRY_BYTES: u64 = 2097152;

const ARCSEC_PER_DEG: f64 = 3600.;

/// How the cutout area is modeled relative to the requested angular size.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CutoutShape {
    /// Square cutouts of square frames: the width ratio, squared.
    #[default]
    Square,

    /// Only the width is modeled; the height ratio is taken to be half of
    /// it. Matches instruments with asymmetric pixel geometry.
    HalfHeight,

    /// Width and height ratios are computed separately from the frame's
    /// pixel dimensions.
    Independent,
}

/// The pixel geometry of a frame, for cutout scaling.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct FrameGeometry {
    pub width_pix: u32,
    pub height_pix: u32,
    pub arcsec_per_pix: f64,

    #[serde(default)]
    pub shape: CutoutShape,
}

/// Size information about one kind of downloadable file.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct FrameSpec {
    pub full_bytes: u64,

    #[serde(default)]
    pub header_bytes: u64,

    /// If absent, the file is never cutout-scaled.
    #[serde(default)]
    pub geometry: Option<FrameGeometry>,
}

impl FrameSpec {
    /// A file of fixed size that's never scaled.
    pub const fn fixed(full_bytes: u64) -> Self {
        FrameSpec {
            full_bytes,
            header_bytes: 0,
            geometry: None,
        }
    }

    pub const fn fallback() -> Self {
        Self::fixed(DEFAULT_ENTRY_BYTES)
    }

    /// Estimate the size of this product, cut out to `cutout_deg` degrees
    /// on a side if that's given.
    pub fn estimate(&self, product: ProductType, cutout_deg: Option<f64>) -> u64 {
        let (size_deg, geom) = match (cutout_deg, self.geometry) {
            (Some(s), Some(g)) if !product.is_artifact() => (s, g),
            _ => return self.full_bytes,
        };

        estimate(
            product,
            self.full_bytes,
            self.header_bytes,
            Some(size_deg),
            geom.arcsec_per_pix,
            geom.width_pix,
            geom.height_pix,
            geom.shape,
        )
    }
}

/// The raw estimator. With no cutout, or for artifact products, the answer
/// is just `full_bytes`. Otherwise we compute the fraction of the frame
/// width that the cutout spans and scale the non-header bytes by the
/// corresponding area fraction. This is monotonic in `size_deg` and tops
/// out at `full_bytes` once the cutout is at least as big as the frame.
#[allow(clippy::too_many_arguments)]
pub fn estimate(
    product: ProductType,
    full_bytes: u64,
    header_bytes: u64,
    size_deg: Option<f64>,
    arcsec_per_pix: f64,
    width_pix: u32,
    height_pix: u32,
    shape: CutoutShape,
) -> u64 {
    let size_deg = match size_deg {
        Some(s) if !product.is_artifact() => s,
        _ => return full_bytes,
    };

    // NaN-sensitive: a garbage size or garbage geometry gets the whole frame.
    if !(size_deg >= 0.) || !(arcsec_per_pix > 0.) || width_pix == 0 {
        return full_bytes;
    }

    let extent_deg = |npix: u32| (npix as f64 * arcsec_per_pix) / ARCSEC_PER_DEG;
    let ratio = size_deg / extent_deg(width_pix);

    if ratio >= 1. {
        return full_bytes;
    }

    let area = match shape {
        CutoutShape::Square => ratio * ratio,
        CutoutShape::HalfHeight => ratio * (ratio / 2.),
        CutoutShape::Independent => {
            let ratio_h = if height_pix == 0 {
                1.
            } else {
                f64::min(size_deg / extent_deg(height_pix), 1.)
            };
            ratio * ratio_h
        }
    };

    let header_bytes = u64::min(header_bytes, full_bytes);
    header_bytes + ((full_bytes - header_bytes) as f64 * area) as u64
}

/// A lookup table of frame specs, keyed by names like `wise-1b-w4`.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct SizeTable(HashMap<String, FrameSpec>);

// These values come from the WISE Explanatory Supplement file descriptions.
// Level-1b band 4 frames are binned 2x2 relative to the other bands.
static DEFAULT_FRAME_SPECS: Lazy<HashMap<String, FrameSpec>> = Lazy::new(|| {
    let square = |width_pix, arcsec_per_pix| {
        Some(FrameGeometry {
            width_pix,
            height_pix: width_pix,
            arcsec_per_pix,
            shape: CutoutShape::Square,
        })
    };

    [
        (
            "wise-1b",
            FrameSpec {
                full_bytes: 4167360,
                header_bytes: 38336,
                geometry: square(1016, 2.76),
            },
        ),
        (
            "wise-1b-w4",
            FrameSpec {
                full_bytes: 1071360,
                header_bytes: 38336,
                geometry: square(508, 5.52),
            },
        ),
        ("wise-1b-art", FrameSpec::fixed(4096)),
        (
            "wise-3",
            FrameSpec {
                full_bytes: 67080960,
                header_bytes: 4860,
                geometry: square(4095, 1.375),
            },
        ),
        ("wise-3-art", FrameSpec::fixed(4096)),
    ]
    .iter()
    .map(|t| (t.0.to_owned(), t.1))
    .collect()
});

impl SizeTable {
    /// The built-in table, with `overrides` replacing or adding entries.
    pub fn with_overrides(overrides: &HashMap<String, FrameSpec>) -> Self {
        let mut t = DEFAULT_FRAME_SPECS.clone();
        t.extend(overrides.iter().map(|(k, v)| (k.clone(), *v)));
        SizeTable(t)
    }

    pub fn get(&self, key: &str) -> Option<&FrameSpec> {
        self.0.get(key)
    }

    /// Look up an entry, falling back to a conservative default if we don't
    /// know about this key.
    pub fn get_or_fallback(&self, key: &str) -> FrameSpec {
        match self.0.get(key) {
            Some(s) => *s,
            None => {
                lambda_runtime::tracing::debug!(key, "no size constant; using default");
                FrameSpec::fallback()
            }
        }
    }
}
