//! WISE image downloads.
//!
//! WISE data come in two flavors that matter here: Level-1b single exposures,
//! identified by scan ID, frame number, and band; and Level-3 coadds,
//! identified by coadd ID and band. Each public image set has its own IBE
//! table and its own link tree on the archive filesystem, and they use the
//! same relative paths below those roots.

use anyhow::{anyhow, Result};
use once_cell::sync::Lazy;
use std::{collections::HashMap, ops::RangeInclusive, path::PathBuf};

use crate::{
    config::{RetrievalType, Settings, WiseSettings},
    dispatch::{DownloadRequest, FileGroupsProcessor},
    manifest::{FileGroup, ManifestAssembler},
    options::RetrievalOptions,
    planner::PlanError,
    records::{fallback_position, row_str, row_u32, Identity, ProductType, Row, SourceRecord},
    survey::Survey,
};

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ProductLevel {
    L1b,
    L3a,
    L3o,
}

impl ProductLevel {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1b" => Some(ProductLevel::L1b),
            "3a" => Some(ProductLevel::L3a),
            "3o" => Some(ProductLevel::L3o),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProductLevel::L1b => "1b",
            ProductLevel::L3a => "3a",
            ProductLevel::L3o => "3o",
        }
    }

    pub fn is_coadd(&self) -> bool {
        !matches!(self, ProductLevel::L1b)
    }
}

/// Where one image set's files live.
#[derive(Clone, Copy, Debug)]
pub struct DataProduct {
    /// The IBE schema.
    pub schema: &'static str,

    /// The IBE image metadata table.
    pub table: &'static str,

    /// The link tree below the filesystem base path.
    pub link_tree: &'static str,
}

// Keyed by "<image set>|<product level>".
static DATA_PRODUCTS: Lazy<HashMap<&'static str, DataProduct>> = Lazy::new(|| {
    let p = |schema, table, link_tree| DataProduct {
        schema,
        table,
        link_tree,
    };

    [
        (
            "allsky-4band|1b",
            p("allsky", "4band_p1bm_frm", "links-allsky/l1b-4band/"),
        ),
        (
            "allsky-4band|3a",
            p("allsky", "4band_p3am_cdd", "links-allsky/l3a-4band/"),
        ),
        (
            "cryo_3band|1b",
            p("cryo_3band", "3band_p1bm_frm", "links-3band/l1b-3band/"),
        ),
        (
            "cryo_3band|3a",
            p("cryo_3band", "3band_p3am_cdd", "links-3band/l3a-3band/"),
        ),
        (
            "postcryo|1b",
            p("postcryo", "2band_p1bm_frm", "links-postcryo/l1b-2band/"),
        ),
        (
            "allwise-multiband|3a",
            p("allwise", "p3am_cdd", "links-allwise/l3a/"),
        ),
        (
            "neowiser|1b",
            p("neowiser", "p1bm_frm", "links-neowiser/l1b/"),
        ),
        (
            "merge|1b",
            p("merge", "merge_p1bm_frm", "links-merge/l1b/"),
        ),
        (
            "merge|3a",
            p("merge", "merge_p3am_cdd", "links-merge/l3a/"),
        ),
    ]
    .into_iter()
    .collect()
});

/// Requests for several image sets at once are served from the merged
/// tables.
pub fn normalize_image_set(image_set: &str) -> &str {
    if image_set.contains(',') {
        "merge"
    } else {
        image_set.trim()
    }
}

/// The bands recorded for a Level-1b scan. The cryogen ran out partway
/// through the mission: W4 went first, after scan 07101a, and then W3 after
/// scan 08744. If we can't make sense of the scan ID we offer everything and
/// let the missing files fall out.
pub fn available_bands_1b(scan_id: &str) -> RangeInclusive<u8> {
    let digits: String = scan_id.chars().take_while(|c| c.is_ascii_digit()).collect();

    match digits.parse::<u32>() {
        Err(_) => 1..=4,
        Ok(n) if n < 7101 || (n == 7101 && scan_id.ends_with('a')) => 1..=4,
        Ok(n) if n <= 8744 => 1..=3,
        Ok(_) => 1..=2,
    }
}

fn parse_band(row: &Row) -> Result<u8, PlanError> {
    let band = row_u32(row, "band")?;

    if (1..=4).contains(&band) {
        Ok(band as u8)
    } else {
        Err(PlanError::Planning(format!("illegal WISE band {band}")))
    }
}

pub struct WiseSurvey {
    label: String,
    image_set: String,
    level: ProductLevel,
    settings: WiseSettings,
}

impl WiseSurvey {
    pub fn new<S: AsRef<str>>(image_set: S, level: ProductLevel, settings: WiseSettings) -> Self {
        WiseSurvey {
            label: "WISE Download Files".to_owned(),
            image_set: normalize_image_set(image_set.as_ref()).to_owned(),
            level,
            settings,
        }
    }

    fn data_product(&self) -> Result<&'static DataProduct, PlanError> {
        DATA_PRODUCTS
            .get(format!("{}|{}", self.image_set, self.level.as_str()).as_str())
            .ok_or_else(|| {
                PlanError::Unsupported(format!(
                    "image set `{}` at product level {}",
                    self.image_set,
                    self.level.as_str()
                ))
            })
    }

    /// Build the records for one frame, expanding to every available band if
    /// requested.
    pub fn expand_bands(
        &self,
        identity: Identity,
        row: &Row,
        options: &RetrievalOptions,
        source_id: Option<String>,
    ) -> Vec<SourceRecord> {
        let position = fallback_position(row);

        let bands: Vec<u8> = if !options.all_bands {
            vec![identity.band()]
        } else {
            match &identity {
                Identity::Frame { scan_id, .. } => available_bands_1b(scan_id).collect(),
                Identity::Coadd { .. } => (1..=4).collect(),
            }
        };

        bands
            .into_iter()
            .map(|b| SourceRecord {
                identity: identity.with_band(b),
                position,
                source_id: source_id.clone(),
            })
            .collect()
    }
}

impl Survey for WiseSurvey {
    fn name(&self) -> &'static str {
        "wise"
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn records(&self, row: &Row, options: &RetrievalOptions) -> Result<Vec<SourceRecord>, PlanError> {
        // In all-bands mode the row's own band doesn't matter.
        let band = if options.all_bands {
            parse_band(row).unwrap_or(1)
        } else {
            parse_band(row)?
        };

        let identity = if self.level.is_coadd() {
            Identity::Coadd {
                coadd_id: row_str(row, "coadd_id")?,
                band,
            }
        } else {
            Identity::Frame {
                scan_id: row_str(row, "scan_id")?,
                frame_num: row_u32(row, "frame_num")?,
                band,
            }
        };

        Ok(self.expand_bands(identity, row, options, None))
    }

    fn retrieval_type(&self) -> RetrievalType {
        self.settings.retrieval_type
    }

    fn local_root(&self) -> Result<Option<PathBuf>, PlanError> {
        match self.settings.basepath() {
            Some(base) => Ok(Some(base.join(self.data_product()?.link_tree))),
            None => Ok(None),
        }
    }

    fn relative_path(&self, record: &SourceRecord, product: ProductType) -> Result<String, PlanError> {
        match &record.identity {
            Identity::Frame {
                scan_id,
                frame_num,
                band,
            } => {
                let scan_tail = scan_id
                    .len()
                    .checked_sub(2)
                    .and_then(|i| scan_id.get(i..))
                    .ok_or_else(|| PlanError::Planning(format!("scan ID `{scan_id}` too short")))?;

                let stem = format!("{scan_tail}/{scan_id}/{frame_num:03}/{scan_id}{frame_num:03}");

                let tail = match product {
                    ProductType::Intensity => format!("-w{band}-int-1b.fits"),
                    ProductType::Mask => format!("-w{band}-msk-1b.fits.gz"),
                    ProductType::Uncertainty => format!("-w{band}-unc-1b.fits.gz"),
                    ProductType::Coverage => {
                        return Err(PlanError::Unsupported(
                            "Level-1b frames have no coverage maps".to_owned(),
                        ))
                    }
                    p => artifact_tail(*band, p),
                };

                Ok(stem + &tail)
            }

            Identity::Coadd { coadd_id, band } => {
                let (Some(c2), Some(c4)) = (coadd_id.get(..2), coadd_id.get(..4)) else {
                    return Err(PlanError::Planning(format!(
                        "coadd ID `{coadd_id}` too short"
                    )));
                };

                let tail = match product {
                    ProductType::Intensity => format!("-w{band}-int-3.fits"),
                    ProductType::Mask => format!("-w{band}-msk-3.fits.gz"),
                    ProductType::Coverage => format!("-w{band}-cov-3.fits.gz"),
                    ProductType::Uncertainty => format!("-w{band}-unc-3.fits.gz"),
                    p => artifact_tail(*band, p),
                };

                Ok(format!("{c2}/{c4}/{coadd_id}/{coadd_id}{tail}"))
            }
        }
    }

    fn base_url(&self, _record: &SourceRecord) -> Result<String, PlanError> {
        let dp = self.data_product()?;
        let host = self.settings.ibe_host.trim().trim_end_matches('/');

        if host.is_empty() {
            return Err(PlanError::Planning("no IBE host configured".to_owned()));
        }

        let scheme = if host.to_ascii_lowercase().starts_with("http") {
            ""
        } else {
            "http://"
        };

        Ok(format!(
            "{scheme}{host}/ibe/data/wise/{}/{}/",
            dp.schema, dp.table
        ))
    }

    fn folder(&self, record: &SourceRecord) -> String {
        let level = self.level.as_str();

        match &record.identity {
            Identity::Frame {
                scan_id, frame_num, ..
            } => format!("L{level}/{scan_id}/{frame_num:03}"),
            Identity::Coadd { coadd_id, .. } => format!("L{level}/{coadd_id}"),
        }
    }

    fn cutout_capable(&self, record: &SourceRecord, product: ProductType) -> bool {
        match record.identity {
            Identity::Frame { .. } => matches!(
                product,
                ProductType::Intensity | ProductType::Mask | ProductType::Uncertainty
            ),
            Identity::Coadd { .. } => matches!(
                product,
                ProductType::Intensity | ProductType::Coverage | ProductType::Uncertainty
            ),
        }
    }

    fn frame_spec_key(&self, record: &SourceRecord, product: ProductType) -> String {
        let key = match (&record.identity, product.is_artifact()) {
            (Identity::Frame { .. }, true) => "wise-1b-art",
            (Identity::Frame { band: 4, .. }, false) => "wise-1b-w4",
            (Identity::Frame { .. }, false) => "wise-1b",
            (Identity::Coadd { .. }, true) => "wise-3-art",
            (Identity::Coadd { .. }, false) => "wise-3",
        };
        key.to_owned()
    }
}

fn artifact_tail(band: u8, product: ProductType) -> String {
    let code = match product {
        ProductType::DiffSpikes => "D",
        ProductType::Halos => "H",
        ProductType::OptGhosts => "O",
        _ => "P",
    };
    format!("-art-w{band}-{code}.tbl")
}

/// The `WiseDownload` function.
pub struct WiseDownload;

impl FileGroupsProcessor for WiseDownload {
    fn id(&self) -> &'static str {
        "WiseDownload"
    }

    fn load(&self, request: DownloadRequest, settings: &Settings) -> Result<FileGroup> {
        let options = RetrievalOptions::from_params(&request.options, false)?;

        let level_text = request.product_level.as_deref().unwrap_or("1b");
        let level = ProductLevel::parse(level_text)
            .ok_or_else(|| anyhow!("illegal product_level {level_text:?}"))?;

        let image_set = request
            .image_set
            .as_deref()
            .ok_or_else(|| anyhow!("missing image_set parameter"))?;

        let survey = WiseSurvey::new(image_set, level, settings.wise.clone());
        let sizes = settings.size_table();

        let group = ManifestAssembler::new(&survey, &sizes, settings.min_entry_bytes)
            .with_cookies(request.cookies)
            .assemble(&request.rows, &options)?;

        Ok(group)
    }
}
