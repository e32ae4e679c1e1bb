//! Deduplication keys.
//!
//! In "all bands" mode, or when a user selects several rows that refer to
//! the same underlying frame, many candidates point at the same physical
//! file. We collapse them by identity and product type. Cutouts are
//! centered on the row's position, so two cutouts of the same frame at
//! different centers are different files and the position joins the key;
//! for full frames it doesn't matter where the row was centered.

use std::collections::HashSet;

use crate::{
    naming::position_tag,
    records::{Identity, ProductType, SourceRecord},
};

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct LocatorKey {
    identity: Identity,
    product: ProductType,

    // The center at the precision that cutout names carry it. Two centers
    // that would get the same archive name are the same cutout.
    position: Option<String>,
}

impl LocatorKey {
    pub fn new(record: &SourceRecord, product: ProductType, cutout: bool) -> Self {
        let position = if cutout {
            record.position.map(position_tag)
        } else {
            None
        };

        LocatorKey {
            identity: record.identity.clone(),
            product,
            position,
        }
    }
}

/// The per-request set of keys we've already accepted.
pub type LocatorKeySet = HashSet<LocatorKey>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::Position;

    fn record(ra: f64, dec: f64) -> SourceRecord {
        SourceRecord {
            identity: Identity::Coadd {
                coadd_id: "0001p000_ab41".to_owned(),
                band: 1,
            },
            position: Some(Position {
                ra_deg: ra,
                dec_deg: dec,
            }),
            source_id: None,
        }
    }

    #[test]
    fn full_frame_ignores_position() {
        let a = LocatorKey::new(&record(1., 2.), ProductType::Intensity, false);
        let b = LocatorKey::new(&record(3., 4.), ProductType::Intensity, false);
        assert_eq!(a, b);
    }

    #[test]
    fn cutout_includes_position() {
        let a = LocatorKey::new(&record(1., 2.), ProductType::Intensity, true);
        let b = LocatorKey::new(&record(3., 4.), ProductType::Intensity, true);
        let c = LocatorKey::new(&record(1., 2.), ProductType::Intensity, true);
        assert_ne!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn cutout_centers_match_at_name_precision() {
        let a = LocatorKey::new(&record(10.00001, 5.), ProductType::Intensity, true);
        let b = LocatorKey::new(&record(10.00002, 5.), ProductType::Intensity, true);
        let c = LocatorKey::new(&record(10.0002, 5.), ProductType::Intensity, true);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn product_and_band_distinguish() {
        let r = record(1., 2.);
        let a = LocatorKey::new(&r, ProductType::Intensity, false);
        let b = LocatorKey::new(&r, ProductType::Mask, false);
        assert_ne!(a, b);

        let mut r2 = r.clone();
        r2.identity = r.identity.with_band(2);
        assert_ne!(a, LocatorKey::new(&r2, ProductType::Intensity, false));
    }
}
