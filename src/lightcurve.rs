//! WISE downloads driven by a light-curve table.
//!
//! The light-curve viewer shows photometry of one source across many
//! single-exposure frames. Its tables identify frames with a compact
//! `frame_id` like `01234a123`, rather than separate scan and frame columns,
//! and they give the source's own position in `ra`/`dec`. Only intensity
//! images are offered, and remotely retrieved files are named after the
//! source so that a package from several sources stays legible.

use anyhow::{anyhow, Result};
use std::path::PathBuf;

use crate::{
    config::{RetrievalType, Settings},
    dispatch::{DownloadRequest, FileGroupsProcessor},
    manifest::{FileGroup, ManifestAssembler},
    options::RetrievalOptions,
    planner::PlanError,
    records::{row_f64, row_str, row_u32, Identity, Position, ProductType, Row, SourceRecord},
    survey::Survey,
    wise::{ProductLevel, WiseSurvey},
};

/// Split a frame ID into scan ID and frame number. The scan ID is a run of
/// digits followed by a single lowercase letter; the frame number is the
/// rest.
pub fn parse_frame_id(frame_id: &str) -> Option<(String, u32)> {
    let letter = frame_id.find(|c: char| !c.is_ascii_digit())?;

    if letter < 2 || !frame_id[letter..].starts_with(|c: char| c.is_ascii_lowercase()) {
        return None;
    }

    let (scan_id, rest) = frame_id.split_at(letter + 1);

    if rest.is_empty() || !rest.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    Some((scan_id.to_owned(), rest.parse().ok()?))
}

pub struct LightCurveSurvey {
    inner: WiseSurvey,
}

impl LightCurveSurvey {
    pub fn new(inner: WiseSurvey) -> Self {
        LightCurveSurvey { inner }
    }

    /// Figure out which frame a row refers to. We prefer `frame_id`, then
    /// the prefix of a `source_id` like `01234a123-000456`, then explicit
    /// `scan_id`/`frame_num` columns.
    fn frame_of(row: &Row) -> Result<(String, u32), PlanError> {
        let compact = row_str(row, "frame_id").ok().or_else(|| {
            row_str(row, "source_id")
                .ok()
                .and_then(|s| s.split('-').next().map(str::to_owned))
        });

        match compact {
            Some(id) => parse_frame_id(&id).ok_or_else(|| {
                PlanError::Planning(format!("`{id}` is not a WISE frame identifier"))
            }),

            None => Ok((row_str(row, "scan_id")?, row_u32(row, "frame_num")?)),
        }
    }
}

impl Survey for LightCurveSurvey {
    fn name(&self) -> &'static str {
        "wise-lc"
    }

    fn label(&self) -> &str {
        self.inner.label()
    }

    fn records(&self, row: &Row, options: &RetrievalOptions) -> Result<Vec<SourceRecord>, PlanError> {
        let (scan_id, frame_num) = Self::frame_of(row)?;

        let band = row_u32(row, "band")
            .ok()
            .filter(|b| (1..=4).contains(b))
            .map(|b| b as u8);

        let band = match (band, options.all_bands) {
            (Some(b), _) => b,
            (None, true) => 1,
            (None, false) => return Err(PlanError::MissingField("band")),
        };

        let position = match (row_f64(row, "ra"), row_f64(row, "dec")) {
            (Some(ra_deg), Some(dec_deg)) => Some(Position { ra_deg, dec_deg }),
            _ => None,
        };

        let source_id = row_str(row, "source_id_mf").ok();

        let identity = Identity::Frame {
            scan_id,
            frame_num,
            band,
        };

        let mut records = self.inner.expand_bands(identity, row, options, source_id);

        if position.is_some() {
            for r in &mut records {
                r.position = position;
            }
        }

        Ok(records)
    }

    fn retrieval_type(&self) -> RetrievalType {
        self.inner.retrieval_type()
    }

    fn local_root(&self) -> Result<Option<PathBuf>, PlanError> {
        self.inner.local_root()
    }

    fn relative_path(&self, record: &SourceRecord, product: ProductType) -> Result<String, PlanError> {
        if product != ProductType::Intensity {
            return Err(PlanError::Unsupported(format!(
                "light-curve downloads offer intensity images only, not {product}"
            )));
        }

        self.inner.relative_path(record, product)
    }

    fn base_url(&self, record: &SourceRecord) -> Result<String, PlanError> {
        self.inner.base_url(record)
    }

    fn folder(&self, record: &SourceRecord) -> String {
        self.inner.folder(record)
    }

    /// Rows without a source position can't be cut out, so they get full
    /// frames instead.
    fn cutout_capable(&self, record: &SourceRecord, product: ProductType) -> bool {
        record.position.is_some() && self.inner.cutout_capable(record, product)
    }

    fn frame_spec_key(&self, record: &SourceRecord, product: ProductType) -> String {
        self.inner.frame_spec_key(record, product)
    }

    fn remote_name(&self, record: &SourceRecord, _product: ProductType, suffix: &str) -> Option<String> {
        let Identity::Frame {
            scan_id,
            frame_num,
            band,
        } = &record.identity
        else {
            return None;
        };

        let source = match &record.source_id {
            Some(s) => format!("{s}-"),
            None => String::new(),
        };

        Some(format!(
            "{source}{scan_id}{frame_num:03}-w{band}-int-1b{suffix}.fits"
        ))
    }
}

/// The `LightCurveDownload` function.
pub struct LightCurveDownload;

impl FileGroupsProcessor for LightCurveDownload {
    fn id(&self) -> &'static str {
        "LightCurveDownload"
    }

    fn load(&self, request: DownloadRequest, settings: &Settings) -> Result<FileGroup> {
        // The viewer doesn't ask about bands; users get all of them unless it
        // says otherwise.
        let mut options = RetrievalOptions::from_params(&request.options, true)?;
        options.products = vec![ProductType::Intensity];

        if let Some(level) = request.product_level.as_deref() {
            if ProductLevel::parse(level) != Some(ProductLevel::L1b) {
                return Err(anyhow!(
                    "light-curve downloads are single-exposure only, not level {level:?}"
                ));
            }
        }

        let image_set = request.image_set.as_deref().unwrap_or("merge");
        let survey = LightCurveSurvey::new(WiseSurvey::new(
            image_set,
            ProductLevel::L1b,
            settings.wise.clone(),
        ));
        let sizes = settings.size_table();

        let group = ManifestAssembler::new(&survey, &sizes, settings.min_entry_bytes)
            .with_cookies(request.cookies)
            .assemble(&request.rows, &options)?;

        Ok(group)
    }
}
