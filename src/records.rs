//! Source records: what one selected table row says about an image product.
//!
//! Reading the table itself is somebody else's job. We receive each row as a
//! JSON object mapping column names to cell values, and pull out just the
//! identity and position columns that the download planning needs. IPAC
//! tables are not very consistent about cell types, so numeric columns may
//! show up either as JSON numbers or as numeric strings.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::planner::PlanError;

/// One table row, as handed to us by the table reader.
pub type Row = Map<String, Value>;

/// The kinds of downloadable products that can hang off of a single
/// science frame.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductType {
    Intensity,
    Mask,
    Uncertainty,
    Coverage,
    DiffSpikes,
    Halos,
    OptGhosts,
    Latents,
}

impl ProductType {
    /// Parse one of the short letter codes used in download requests. The
    /// intensity image has no code since it is always included.
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_ascii_uppercase().as_str() {
            "M" => Some(ProductType::Mask),
            "U" => Some(ProductType::Uncertainty),
            "C" => Some(ProductType::Coverage),
            "D" => Some(ProductType::DiffSpikes),
            "H" => Some(ProductType::Halos),
            "O" => Some(ProductType::OptGhosts),
            "P" => Some(ProductType::Latents),
            _ => None,
        }
    }

    /// Artifacts are small overlay tables that are never cut out.
    pub fn is_artifact(&self) -> bool {
        matches!(
            self,
            ProductType::DiffSpikes
                | ProductType::Halos
                | ProductType::OptGhosts
                | ProductType::Latents
        )
    }
}

impl fmt::Display for ProductType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProductType::Intensity => "intensity",
            ProductType::Mask => "mask",
            ProductType::Uncertainty => "uncertainty",
            ProductType::Coverage => "coverage",
            ProductType::DiffSpikes => "diff_spikes",
            ProductType::Halos => "halos",
            ProductType::OptGhosts => "opt_ghosts",
            ProductType::Latents => "latents",
        };
        f.write_str(s)
    }
}

/// A sky position in degrees.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Position {
    pub ra_deg: f64,
    pub dec_deg: f64,
}

/// The survey-specific identity of a physical frame.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Identity {
    /// A single exposure (WISE Level-1b).
    Frame {
        scan_id: String,
        frame_num: u32,
        band: u8,
    },

    /// A stacked image (WISE Level-3).
    Coadd { coadd_id: String, band: u8 },
}

impl Identity {
    pub fn band(&self) -> u8 {
        match self {
            Identity::Frame { band, .. } => *band,
            Identity::Coadd { band, .. } => *band,
        }
    }

    /// The same physical frame, but in a different band.
    pub fn with_band(&self, new_band: u8) -> Self {
        match self {
            Identity::Frame {
                scan_id, frame_num, ..
            } => Identity::Frame {
                scan_id: scan_id.clone(),
                frame_num: *frame_num,
                band: new_band,
            },
            Identity::Coadd { coadd_id, .. } => Identity::Coadd {
                coadd_id: coadd_id.clone(),
                band: new_band,
            },
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Frame {
                scan_id,
                frame_num,
                band,
            } => write!(f, "{scan_id}:{frame_num}:{band}"),
            Identity::Coadd { coadd_id, band } => write!(f, "{coadd_id}:{band}"),
        }
    }
}

/// One logical image referenced by a table row. Product types are paired
/// with a record at planning time, so a single record fans out into one
/// manifest candidate per requested product.
#[derive(Clone, Debug, PartialEq)]
pub struct SourceRecord {
    pub identity: Identity,
    pub position: Option<Position>,

    /// Light-curve tables name the astronomical source that the frame was
    /// selected for; we use it to prefix archive names.
    pub source_id: Option<String>,
}

impl SourceRecord {
    /// Get the position, or complain that the row didn't give us one.
    pub fn require_position(&self) -> Result<Position, PlanError> {
        self.position.ok_or(PlanError::MissingField("ra/dec"))
    }
}

/// Get a string-valued cell. Numbers are stringified since some table
/// readers type ID columns as integers.
pub fn row_str(row: &Row, col: &'static str) -> Result<String, PlanError> {
    match row.get(col) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_owned()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(PlanError::MissingField(col)),
    }
}

/// Get a floating-point cell, or `None` if missing, null, or unparseable.
pub fn row_f64(row: &Row, col: &str) -> Option<f64> {
    match row.get(col)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .filter(|v: &f64| v.is_finite())
}

/// Get a non-negative integer cell.
pub fn row_u32(row: &Row, col: &'static str) -> Result<u32, PlanError> {
    let v = match row.get(col) {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    };

    v.and_then(|v| u32::try_from(v).ok())
        .ok_or(PlanError::MissingField(col))
}

/// Take the first column in `cols` holding a usable value. Zero is what the
/// search services write when they don't know, so it is treated the same as
/// a missing cell, except in the last column: that one is the frame's own
/// header value, where zero is a real coordinate.
pub fn first_known(row: &Row, cols: &[&str]) -> Option<f64> {
    let (last, searched) = cols.split_last()?;

    searched
        .iter()
        .filter_map(|c| row_f64(row, c))
        .find(|v| *v != 0.)
        .or_else(|| row_f64(row, last))
}

/// Get the best position available for this row. Moving-object searches
/// fill in `ra_obj`/`dec_obj`; IBE searches give `in_ra`/`in_dec`; failing
/// both, we use the frame's reference pixel.
pub fn fallback_position(row: &Row) -> Option<Position> {
    let ra = first_known(row, &["ra_obj", "in_ra", "crval1"])?;
    let dec = first_known(row, &["dec_obj", "in_dec", "crval2"])?;
    Some(Position {
        ra_deg: ra,
        dec_deg: dec,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(v: Value) -> Row {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn position_falls_through_zero_and_missing() {
        let r = row(json!({
            "ra_obj": 0.0,
            "in_ra": "12.5",
            "crval1": 13.0,
            "dec_obj": null,
            "crval2": -4.25,
        }));

        let pos = fallback_position(&r).unwrap();
        assert_eq!(pos.ra_deg, 12.5);
        assert_eq!(pos.dec_deg, -4.25);
    }

    #[test]
    fn header_zero_is_a_position() {
        let r = row(json!({
            "ra_obj": 0,
            "in_ra": 0.0,
            "crval1": 0.0,
            "in_dec": "0",
            "crval2": 0,
        }));

        let pos = fallback_position(&r).unwrap();
        assert_eq!(pos.ra_deg, 0.);
        assert_eq!(pos.dec_deg, 0.);

        // A search-supplied zero still defers to the header.
        let r = row(json!({ "in_ra": 0, "crval1": 359.5, "in_dec": 0, "crval2": 0 }));
        assert_eq!(fallback_position(&r).unwrap().ra_deg, 359.5);
    }

    #[test]
    fn position_requires_both_axes() {
        let r = row(json!({ "in_ra": 10.0 }));
        assert!(fallback_position(&r).is_none());
    }

    #[test]
    fn cells_accept_strings_and_numbers() {
        let r = row(json!({ "scan_id": "01234a", "frame_num": "7", "band": 2, "blank": " " }));
        assert_eq!(row_str(&r, "scan_id").unwrap(), "01234a");
        assert_eq!(row_u32(&r, "frame_num").unwrap(), 7);
        assert_eq!(row_u32(&r, "band").unwrap(), 2);
        assert!(matches!(
            row_str(&r, "blank"),
            Err(PlanError::MissingField("blank"))
        ));
    }

    #[test]
    fn product_codes() {
        assert_eq!(ProductType::from_code("m"), Some(ProductType::Mask));
        assert_eq!(ProductType::from_code("P"), Some(ProductType::Latents));
        assert_eq!(ProductType::from_code("X"), None);
        assert!(ProductType::Halos.is_artifact());
        assert!(!ProductType::Coverage.is_artifact());
    }
}
