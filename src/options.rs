//! Download request options.
//!
//! These come in as the loosely-typed string parameters that the download
//! dialog has always sent. We validate them once, up front, into a
//! `RetrievalOptions` that is read-only for the rest of the request.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::records::ProductType;

#[derive(Debug, Error)]
pub enum OptionsError {
    #[error("cutout requested but `subsize` is missing")]
    MissingCutoutSize,

    #[error("illegal `subsize` parameter {0:?}")]
    BadCutoutSize(String),
}

/// The options as sent by the client.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct RequestParams {
    #[serde(rename = "allBands", default)]
    pub all_bands: Option<String>,

    /// `cut` or `orig`.
    #[serde(rename = "dlCutouts", default)]
    pub dl_cutouts: Option<String>,

    /// `folder` or `flat`.
    #[serde(rename = "zipType", default)]
    pub zip_type: Option<String>,

    /// Comma-separated product letter codes, or `_none_`.
    #[serde(rename = "artFiles", default)]
    pub art_files: Option<String>,

    /// Cutout size in degrees. Old clients send this as a string.
    #[serde(default)]
    pub subsize: Option<Value>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ArchiveLayout {
    /// Files go in per-frame subdirectories.
    Folder,

    /// All files at the top level of the package.
    Flat,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RetrievalOptions {
    /// The cutout size in degrees, or `None` for full frames.
    pub cutout_deg: Option<f64>,
    pub layout: ArchiveLayout,

    /// The product types to package, in order. Intensity always comes
    /// first.
    pub products: Vec<ProductType>,
    pub all_bands: bool,
}

impl RetrievalOptions {
    /// Validate request parameters. `all_bands_default` applies when the
    /// client didn't say.
    pub fn from_params(params: &RequestParams, all_bands_default: bool) -> Result<Self, OptionsError> {
        let all_bands = match params.all_bands.as_deref() {
            Some(s) => s.eq_ignore_ascii_case("yes"),
            None => all_bands_default,
        };

        let cutout = params
            .dl_cutouts
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case("cut"));

        let layout = match params.zip_type.as_deref() {
            Some(s) if s.eq_ignore_ascii_case("flat") => ArchiveLayout::Flat,
            _ => ArchiveLayout::Folder,
        };

        let mut products = vec![ProductType::Intensity];

        if let Some(codes) = params.art_files.as_deref() {
            if !codes.eq_ignore_ascii_case("_none_") {
                for p in codes.split(',').filter_map(ProductType::from_code) {
                    if !products.contains(&p) {
                        products.push(p);
                    }
                }
            }
        }

        let cutout_deg = if cutout {
            Some(parse_size(params.subsize.as_ref())?)
        } else {
            None
        };

        Ok(RetrievalOptions {
            cutout_deg,
            layout,
            products,
            all_bands,
        })
    }

    pub fn is_cutout(&self) -> bool {
        self.cutout_deg.is_some()
    }

    pub fn folders(&self) -> bool {
        self.layout == ArchiveLayout::Folder
    }
}

fn parse_size(v: Option<&Value>) -> Result<f64, OptionsError> {
    let v = v.ok_or(OptionsError::MissingCutoutSize)?;

    let size = match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };

    // NaN-sensitive logic
    match size {
        Some(s) if s > 0. && s.is_finite() => Ok(s),
        _ => Err(OptionsError::BadCutoutSize(v.to_string())),
    }
}
