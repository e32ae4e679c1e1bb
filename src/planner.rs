//! Deciding where each file comes from.
//!
//! For surveys whose archives are mounted locally we prefer to read files
//! straight off of the disk. The link trees are not complete, though, and
//! some products are stored compressed, so we probe for the file and then
//! for a gzipped version of it, and go to the network if neither exists.
//! Cutouts always go to the network, since only the remote service can
//! make them.

use serde::{Deserialize, Serialize};
use std::{
    ffi::OsString,
    path::{Path, PathBuf},
};
use thiserror::Error;

use lambda_runtime::tracing::debug;

use crate::{
    config::RetrievalType,
    naming::{cutout_suffix, folder_prefix, trailing_segment, ArchiveName},
    options::RetrievalOptions,
    records::{Position, ProductType, SourceRecord},
    survey::Survey,
};

/// Why a (record, product) pair was left out of the manifest. None of these
/// are fatal to the request as a whole.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("missing value for `{0}`")]
    MissingField(&'static str),

    #[error("cannot construct locator: {0}")]
    Planning(String),

    #[error("not available: {0}")]
    Unsupported(String),
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMode {
    Filesystem,
    Remote,
}

/// Where a file's bytes live.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Locator {
    Path(PathBuf),
    Url(String),
}

impl Locator {
    /// A string form, for deduplication and logging.
    pub fn as_key(&self) -> String {
        match self {
            Locator::Path(p) => p.to_string_lossy().into_owned(),
            Locator::Url(u) => u.clone(),
        }
    }
}

/// What we know about a file's size at planning time.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SizeHint {
    /// We found the file on disk, so we know exactly.
    Measured(u64),

    /// We'll need to estimate.
    Predicted,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RetrievalDecision {
    pub mode: RetrievalMode,
    pub locator: Locator,
    pub name: ArchiveName,
    pub size: SizeHint,
}

impl RetrievalDecision {
    /// The identity of the physical file in the package: its package name
    /// if that's known now, otherwise its URL. Two decisions with the same
    /// key would put the same bytes in the package twice.
    pub fn physical_key(&self) -> String {
        match (&self.mode, self.name.as_literal()) {
            (RetrievalMode::Filesystem, Some(n)) => n.to_owned(),
            _ => self.locator.as_key(),
        }
    }
}

/// Get the size of a regular file, or `None` if there isn't one at `path`.
/// No timeout: this is a local disk.
pub fn probe_file(path: &Path) -> Option<u64> {
    std::fs::metadata(path)
        .ok()
        .filter(|m| m.is_file())
        .map(|m| m.len())
}

/// The cutout service URL for a full-frame product URL.
pub fn cutout_url(url: &str, center: Position, size_deg: f64) -> String {
    let gz = url.ends_with("gz");
    format!(
        "{url}?center={},{}&size={size_deg}deg&gzip={gz}",
        center.ra_deg, center.dec_deg
    )
}

pub struct RetrievalPlanner<'a> {
    survey: &'a dyn Survey,
}

impl<'a> RetrievalPlanner<'a> {
    pub fn new(survey: &'a dyn Survey) -> Self {
        RetrievalPlanner { survey }
    }

    /// Decide how to retrieve one product of one record.
    pub fn plan(
        &self,
        record: &SourceRecord,
        product: ProductType,
        options: &RetrievalOptions,
    ) -> Result<RetrievalDecision, PlanError> {
        let rel_path = self.survey.relative_path(record, product)?;
        let prefix = if options.folders() {
            folder_prefix(self.survey.folder(record))
        } else {
            String::new()
        };

        let cutout_deg = options
            .cutout_deg
            .filter(|_| self.survey.cutout_capable(record, product));

        if cutout_deg.is_none() && self.survey.retrieval_type() == RetrievalType::Filesystem {
            if let Some(root) = self.survey.local_root()? {
                if let Some(d) = self.plan_local(&root.join(&rel_path), &prefix) {
                    return Ok(d);
                }

                debug!(
                    survey = self.survey.name(),
                    path = %rel_path,
                    "not on local disk; falling back to URL"
                );
            }
        }

        let url = format!("{}{}", self.survey.base_url(record)?, rel_path);

        let (url, name) = match cutout_deg {
            Some(size_deg) => {
                let center = record.require_position()?;
                let suffix = cutout_suffix(center, size_deg);
                let url = cutout_url(&url, center, size_deg);
                let name = match self.survey.remote_name(record, product, &suffix) {
                    Some(n) => ArchiveName::literal(format!("{prefix}{n}")),
                    None => ArchiveName::deferred(suffix, prefix),
                };
                (url, name)
            }

            None => {
                let n = self
                    .survey
                    .remote_name(record, product, "")
                    .unwrap_or_else(|| trailing_segment(&url).to_owned());

                if n.is_empty() {
                    return Err(PlanError::Planning(format!("no file name in URL `{url}`")));
                }

                (url.clone(), ArchiveName::literal(format!("{prefix}{n}")))
            }
        };

        Ok(RetrievalDecision {
            mode: RetrievalMode::Remote,
            locator: Locator::Url(url),
            name,
            size: SizeHint::Predicted,
        })
    }

    /// Look for the file, then for a gzipped version of it.
    fn plan_local(&self, path: &Path, prefix: &str) -> Option<RetrievalDecision> {
        let mut gz_path = OsString::from(path.as_os_str());
        gz_path.push(".gz");
        let gz_path = PathBuf::from(gz_path);

        for p in [path, gz_path.as_path()] {
            let Some(len) = probe_file(p) else {
                continue;
            };

            let Some(file_name) = p.file_name() else {
                continue;
            };

            return Some(RetrievalDecision {
                mode: RetrievalMode::Filesystem,
                locator: Locator::Path(p.to_owned()),
                name: ArchiveName::literal(format!("{prefix}{}", file_name.to_string_lossy())),
                size: SizeHint::Measured(len),
            });
        }

        None
    }
}
