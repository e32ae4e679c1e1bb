//! The seam between the generic manifest machinery and each survey's
//! particular naming conventions.
//!
//! Every survey has its own way of turning table rows into file paths and
//! URLs, and there's no point in trying to unify them. What they all have to
//! provide is this handful of answers.

use std::path::PathBuf;

use crate::{
    config::RetrievalType,
    options::RetrievalOptions,
    planner::PlanError,
    records::{ProductType, Row, SourceRecord},
};

pub trait Survey: Send + Sync {
    /// Short name for logging.
    fn name(&self) -> &'static str;

    /// Human-readable label for the resulting file group.
    fn label(&self) -> &str;

    /// Turn one selected table row into the records it refers to. In "all
    /// bands" mode this is one record per band available for the row's
    /// frame.
    fn records(&self, row: &Row, options: &RetrievalOptions) -> Result<Vec<SourceRecord>, PlanError>;

    /// How files are normally retrieved for this survey.
    fn retrieval_type(&self) -> RetrievalType;

    /// The root of the local file tree, if one is configured for this
    /// survey and data set.
    fn local_root(&self) -> Result<Option<PathBuf>, PlanError>;

    /// The path of this product's file below both the local root and the
    /// remote base URL.
    fn relative_path(&self, record: &SourceRecord, product: ProductType) -> Result<String, PlanError>;

    /// The remote base URL, with a trailing slash.
    fn base_url(&self, record: &SourceRecord) -> Result<String, PlanError>;

    /// The package subdirectory for this record's files, used in the
    /// "folder" layout.
    fn folder(&self, record: &SourceRecord) -> String;

    /// Whether this product can be cut out. Cutouts can only be made by the
    /// remote service, so these products are never served from disk in
    /// cutout mode.
    fn cutout_capable(&self, record: &SourceRecord, product: ProductType) -> bool;

    /// The size-table key for this product.
    fn frame_spec_key(&self, record: &SourceRecord, product: ProductType) -> String;

    /// Some surveys pick their own names for remotely retrieved files rather
    /// than using whatever the server calls them. `suffix` is the cutout
    /// suffix, or empty for full frames.
    fn remote_name(
        &self,
        _record: &SourceRecord,
        _product: ProductType,
        _suffix: &str,
    ) -> Option<String> {
        None
    }
}
