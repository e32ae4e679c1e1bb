//! Building download manifests.
//!
//! A manifest is a list of files to be bundled into one download package,
//! each with a locator, a package entry name, and an estimated size. We walk
//! the selected rows in order, pair each resulting record with each
//! requested product type, and let the planner decide where every file comes
//! from. Rows routinely refer to the same physical frame (especially when
//! users ask for all bands), so we dedupe as we go.
//!
//! This is best-effort: a row that can't be planned gets logged and skipped.
//! The only failure we report is a manifest with nothing in it.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;

use lambda_runtime::tracing::{debug, info, warn};

use crate::{
    estimate::SizeTable,
    locator::{LocatorKey, LocatorKeySet},
    naming::ArchiveName,
    options::RetrievalOptions,
    planner::{Locator, RetrievalMode, RetrievalPlanner, SizeHint},
    records::{ProductType, Row, SourceRecord},
    survey::Survey,
};

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("none of the selected rows yielded a downloadable file")]
    EmptyManifest,
}

/// One file to be packaged.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ManifestEntry {
    pub locator: Locator,
    pub name: ArchiveName,

    /// A prediction, not a measurement.
    pub est_bytes: u64,

    /// Cookies to present when fetching remote entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookies: Option<BTreeMap<String, String>>,
}

/// The assembled manifest, as handed to the packager.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct FileGroup {
    pub label: String,
    pub entries: Vec<ManifestEntry>,
    pub total_bytes: u64,
}

impl FileGroup {
    pub fn new<S: Into<String>>(label: S) -> Self {
        FileGroup {
            label: label.into(),
            ..Default::default()
        }
    }

    pub fn push(&mut self, entry: ManifestEntry) {
        self.total_bytes += entry.est_bytes;
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Dedup state for a single manifest build. Created fresh for every call to
/// `assemble` so that nothing leaks between requests.
#[derive(Debug, Default)]
struct RequestContext {
    keys: LocatorKeySet,

    /// Physical files already in the package: entry names for local files,
    /// URLs for remote ones. This catches the same file turning up under
    /// different logical identities, such as a raw file and its `.gz`
    /// fallback.
    accepted: HashSet<String>,

    skipped: usize,
    duplicates: usize,
}

pub struct ManifestAssembler<'a> {
    survey: &'a dyn Survey,
    sizes: &'a SizeTable,
    min_entry_bytes: u64,
    cookies: Option<BTreeMap<String, String>>,
}

impl<'a> ManifestAssembler<'a> {
    pub fn new(survey: &'a dyn Survey, sizes: &'a SizeTable, min_entry_bytes: u64) -> Self {
        ManifestAssembler {
            survey,
            sizes,
            min_entry_bytes,
            cookies: None,
        }
    }

    /// Attach these cookies to every remote entry.
    pub fn with_cookies(mut self, cookies: Option<BTreeMap<String, String>>) -> Self {
        self.cookies = cookies.filter(|c| !c.is_empty());
        self
    }

    /// Build the manifest for these rows.
    pub fn assemble(&self, rows: &[Row], options: &RetrievalOptions) -> Result<FileGroup, ManifestError> {
        let mut ctx = RequestContext::default();
        let group = self.collect(rows, options, &mut ctx);

        info!(
            survey = self.survey.name(),
            rows = rows.len(),
            entries = group.len(),
            skipped = ctx.skipped,
            duplicates = ctx.duplicates,
            total_bytes = group.total_bytes,
            "assembled manifest"
        );

        if group.is_empty() {
            return Err(ManifestError::EmptyManifest);
        }

        Ok(group)
    }

    fn collect(&self, rows: &[Row], options: &RetrievalOptions, ctx: &mut RequestContext) -> FileGroup {
        let planner = RetrievalPlanner::new(self.survey);
        let mut group = FileGroup::new(self.survey.label());

        for (row_num, row) in rows.iter().enumerate() {
            let records = match self.survey.records(row, options) {
                Ok(r) => r,
                Err(e) => {
                    warn!(survey = self.survey.name(), row = row_num, "skipping row: {e}");
                    ctx.skipped += 1;
                    continue;
                }
            };

            for record in &records {
                for product in &options.products {
                    if let Some(entry) =
                        self.consider(&planner, ctx, record, *product, options, row_num)
                    {
                        group.push(entry);
                    }
                }
            }
        }

        group
    }

    fn consider(
        &self,
        planner: &RetrievalPlanner,
        ctx: &mut RequestContext,
        record: &SourceRecord,
        product: ProductType,
        options: &RetrievalOptions,
        row_num: usize,
    ) -> Option<ManifestEntry> {
        let key = LocatorKey::new(record, product, options.is_cutout());

        if ctx.keys.contains(&key) {
            debug!(row = row_num, identity = %record.identity, %product, "duplicate request");
            ctx.duplicates += 1;
            return None;
        }

        let decision = match planner.plan(record, product, options) {
            Ok(d) => d,
            Err(e) => {
                warn!(
                    survey = self.survey.name(),
                    row = row_num,
                    identity = %record.identity,
                    %product,
                    "skipping: {e}"
                );
                ctx.skipped += 1;
                return None;
            }
        };

        ctx.keys.insert(key);

        if !ctx.accepted.insert(decision.physical_key()) {
            debug!(row = row_num, locator = %decision.locator.as_key(), "file already packaged");
            ctx.duplicates += 1;
            return None;
        }

        let est_bytes = match decision.size {
            SizeHint::Measured(n) => n,
            SizeHint::Predicted => {
                let cutout_deg = options
                    .cutout_deg
                    .filter(|_| self.survey.cutout_capable(record, product));

                self.sizes
                    .get_or_fallback(&self.survey.frame_spec_key(record, product))
                    .estimate(product, cutout_deg)
            }
        };

        let cookies = match decision.mode {
            RetrievalMode::Remote => self.cookies.clone(),
            RetrievalMode::Filesystem => None,
        };

        Some(ManifestEntry {
            locator: decision.locator,
            name: decision.name,
            est_bytes: u64::max(est_bytes, self.min_entry_bytes),
            cookies,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{RetrievalType, WiseSettings},
        options::ArchiveLayout,
        wise::{ProductLevel, WiseSurvey},
    };
    use crate::planner::PlanError;
    use serde_json::json;
    use std::{collections::HashMap, fs, path::PathBuf};

    fn rows(v: serde_json::Value) -> Vec<Row> {
        v.as_array()
            .unwrap()
            .iter()
            .map(|r| r.as_object().unwrap().clone())
            .collect()
    }

    fn options(
        cutout_deg: Option<f64>,
        products: Vec<ProductType>,
        all_bands: bool,
    ) -> RetrievalOptions {
        RetrievalOptions {
            cutout_deg,
            layout: ArchiveLayout::Folder,
            products,
            all_bands,
        }
    }

    fn sizes() -> SizeTable {
        SizeTable::with_overrides(&HashMap::new())
    }

    fn coadd_rows() -> Vec<Row> {
        rows(json!([
            { "coadd_id": "0001p000_ab41", "band": 1, "in_ra": 0.1, "in_dec": 0.2 },
            { "coadd_id": "0001p000_ab41", "band": 2, "in_ra": 0.3, "in_dec": 0.4 },
            { "coadd_id": "0001p000_ab41", "band": 3, "in_ra": 0.5, "in_dec": 0.6 },
        ]))
    }

    #[test]
    fn all_bands_collapse_to_one_entry_per_band() {
        let s = WiseSurvey::new("allwise-multiband", ProductLevel::L3a, WiseSettings::default());
        let sizes = sizes();
        let g = ManifestAssembler::new(&s, &sizes, 4096)
            .assemble(&coadd_rows(), &options(None, vec![ProductType::Intensity], true))
            .unwrap();

        assert_eq!(g.len(), 4);
        assert_eq!(g.total_bytes, 4 * 67080960);
        assert_eq!(g.label, "WISE Download Files");

        let names: Vec<_> = g.entries.iter().map(|e| e.name.as_literal().unwrap()).collect();
        assert_eq!(names[0], "L3a/0001p000_ab41/0001p000_ab41-w1-int-3.fits");
        assert_eq!(names[3], "L3a/0001p000_ab41/0001p000_ab41-w4-int-3.fits");
    }

    #[test]
    fn cutouts_at_different_centers_are_distinct() {
        let s = WiseSurvey::new("allwise-multiband", ProductLevel::L3a, WiseSettings::default());
        let sizes = sizes();
        let g = ManifestAssembler::new(&s, &sizes, 4096)
            .assemble(
                &coadd_rows(),
                &options(Some(0.01), vec![ProductType::Intensity], true),
            )
            .unwrap();

        assert_eq!(g.len(), 12);

        for e in &g.entries {
            assert!(matches!(e.name, ArchiveName::DeferredCutout { .. }));
            assert!(e.est_bytes > 4860 && e.est_bytes < 67080960);
        }
    }

    #[test]
    fn assembly_is_repeatable_and_ordered() {
        let s = WiseSurvey::new("allsky-4band", ProductLevel::L1b, WiseSettings::default());
        let sizes = sizes();
        let r = rows(json!([
            { "scan_id": "01234a", "frame_num": 1, "band": 4 },
            { "scan_id": "01234a", "frame_num": 2, "band": 1 },
            { "scan_id": "01234a", "frame_num": 1, "band": 4 },
        ]));
        let o = options(
            None,
            vec![ProductType::Intensity, ProductType::Mask, ProductType::Halos],
            false,
        );
        let a = ManifestAssembler::new(&s, &sizes, 4096).assemble(&r, &o).unwrap();
        let b = ManifestAssembler::new(&s, &sizes, 4096).assemble(&r, &o).unwrap();

        assert_eq!(a, b);
        assert_eq!(a.len(), 6);

        let sizes: Vec<u64> = a.entries.iter().map(|e| e.est_bytes).collect();
        assert_eq!(sizes, vec![1071360, 1071360, 4096, 4167360, 4167360, 4096]);
        assert_eq!(a.total_bytes, sizes.iter().sum::<u64>());

        let mut seen = HashSet::new();
        for e in &a.entries {
            assert!(seen.insert(e.locator.as_key()));
        }
    }

    #[test]
    fn uncut_artifacts_are_packaged_once() {
        let s = WiseSurvey::new("allsky-4band", ProductLevel::L1b, WiseSettings::default());
        let sizes = sizes();
        let r = rows(json!([
            { "scan_id": "01234a", "frame_num": 7, "band": 1, "in_ra": 10.0, "in_dec": 5.0 },
            { "scan_id": "01234a", "frame_num": 7, "band": 1, "in_ra": 10.2, "in_dec": 5.0 },
        ]));
        let o = options(Some(0.01), vec![ProductType::Intensity, ProductType::Halos], false);

        let mut ctx = RequestContext::default();
        let g = ManifestAssembler::new(&s, &sizes, 4096).collect(&r, &o, &mut ctx);

        assert_eq!(g.len(), 3);
        assert_eq!(ctx.duplicates, 1);
        assert_eq!(ctx.skipped, 0);

        let artifacts: Vec<_> = g
            .entries
            .iter()
            .filter_map(|e| e.name.as_literal())
            .filter(|n| n.ends_with("-art-w1-H.tbl"))
            .collect();
        assert_eq!(artifacts.len(), 1);
    }

    /// A survey whose files cover every band at once, so that records for
    /// different bands land on the same file.
    struct AllBandsInOneFile(WiseSurvey);

    impl Survey for AllBandsInOneFile {
        fn name(&self) -> &'static str {
            "all-bands-in-one"
        }

        fn label(&self) -> &str {
            self.0.label()
        }

        fn records(&self, row: &Row, options: &RetrievalOptions) -> Result<Vec<SourceRecord>, PlanError> {
            self.0.records(row, options)
        }

        fn retrieval_type(&self) -> RetrievalType {
            self.0.retrieval_type()
        }

        fn local_root(&self) -> Result<Option<PathBuf>, PlanError> {
            self.0.local_root()
        }

        fn relative_path(&self, record: &SourceRecord, product: ProductType) -> Result<String, PlanError> {
            let mut r = record.clone();
            r.identity = record.identity.with_band(1);
            self.0.relative_path(&r, product)
        }

        fn base_url(&self, record: &SourceRecord) -> Result<String, PlanError> {
            self.0.base_url(record)
        }

        fn folder(&self, record: &SourceRecord) -> String {
            self.0.folder(record)
        }

        fn cutout_capable(&self, record: &SourceRecord, product: ProductType) -> bool {
            self.0.cutout_capable(record, product)
        }

        fn frame_spec_key(&self, record: &SourceRecord, product: ProductType) -> String {
            self.0.frame_spec_key(record, product)
        }
    }

    #[test]
    fn local_files_are_packaged_once() {
        let dir = tempfile::tempdir().unwrap();
        let frame_dir = dir.path().join("links-allsky/l1b-4band/4a/01234a/001");
        fs::create_dir_all(&frame_dir).unwrap();
        fs::write(frame_dir.join("01234a001-w1-int-1b.fits"), vec![0u8; 8000]).unwrap();

        let settings = WiseSettings {
            retrieval_type: RetrievalType::Filesystem,
            filesystem_basepath: Some(dir.path().to_owned()),
            ..WiseSettings::default()
        };
        let s = AllBandsInOneFile(WiseSurvey::new("allsky-4band", ProductLevel::L1b, settings));
        let sizes = sizes();
        let r = rows(json!([
            { "scan_id": "01234a", "frame_num": 1, "band": 1 },
            { "scan_id": "01234a", "frame_num": 1, "band": 2 },
        ]));

        let mut ctx = RequestContext::default();
        let g = ManifestAssembler::new(&s, &sizes, 4096).collect(
            &r,
            &options(None, vec![ProductType::Intensity], false),
            &mut ctx,
        );

        assert_eq!(g.len(), 1);
        assert_eq!(ctx.duplicates, 1);
        assert_eq!(
            g.entries[0].name.as_literal(),
            Some("L1b/01234a/001/01234a001-w1-int-1b.fits")
        );
        assert_eq!(g.total_bytes, 8000);
    }

    #[test]
    fn bad_rows_are_skipped() {
        let s = WiseSurvey::new("allsky-4band", ProductLevel::L1b, WiseSettings::default());
        let sizes = sizes();
        let r = rows(json!([
            { "scan_id": "01234a", "band": 1 },
            { "scan_id": "01234a", "frame_num": 2, "band": 1 },
        ]));
        let g = ManifestAssembler::new(&s, &sizes, 4096)
            .assemble(&r, &options(None, vec![ProductType::Intensity], false))
            .unwrap();
        assert_eq!(g.len(), 1);
    }

    #[test]
    fn nothing_plannable_is_an_error() {
        let s = WiseSurvey::new("postcryo", ProductLevel::L3a, WiseSettings::default());
        let sizes = sizes();
        let r = coadd_rows();
        assert!(matches!(
            ManifestAssembler::new(&s, &sizes, 4096)
                .assemble(&r, &options(None, vec![ProductType::Intensity], false)),
            Err(ManifestError::EmptyManifest)
        ));

        assert!(matches!(
            ManifestAssembler::new(&s, &sizes, 4096)
                .assemble(&[], &options(None, vec![ProductType::Intensity], false)),
            Err(ManifestError::EmptyManifest)
        ));
    }

    #[test]
    fn local_files_use_real_sizes_and_skip_cookies() {
        let dir = tempfile::tempdir().unwrap();
        let frame_dir = dir.path().join("links-allsky/l1b-4band/4a/01234a/001");
        fs::create_dir_all(&frame_dir).unwrap();
        fs::write(frame_dir.join("01234a001-w1-int-1b.fits.gz"), vec![0u8; 10000]).unwrap();

        let settings = WiseSettings {
            retrieval_type: RetrievalType::Filesystem,
            filesystem_basepath: Some(dir.path().to_owned()),
            ..WiseSettings::default()
        };
        let s = WiseSurvey::new("allsky-4band", ProductLevel::L1b, settings);
        let sizes = sizes();

        let mut cookies = BTreeMap::new();
        cookies.insert("JOSSO_SESSIONID".to_owned(), "abc".to_owned());

        let r = rows(json!([
            { "scan_id": "01234a", "frame_num": 1, "band": 1 },
            { "scan_id": "01234a", "frame_num": 1, "band": 2 },
        ]));
        let g = ManifestAssembler::new(&s, &sizes, 4096)
            .with_cookies(Some(cookies))
            .assemble(&r, &options(None, vec![ProductType::Intensity], false))
            .unwrap();

        assert_eq!(g.len(), 2);

        assert_eq!(
            g.entries[0].locator,
            Locator::Path(frame_dir.join("01234a001-w1-int-1b.fits.gz"))
        );
        assert_eq!(g.entries[0].est_bytes, 10000);
        assert_eq!(g.entries[0].cookies, None);
        assert_eq!(
            g.entries[0].name.as_literal(),
            Some("L1b/01234a/001/01234a001-w1-int-1b.fits.gz")
        );

        assert!(matches!(g.entries[1].locator, Locator::Url(_)));
        assert_eq!(g.entries[1].est_bytes, 4167360);
        assert!(g.entries[1].cookies.is_some());
    }

    #[test]
    fn sizes_are_clamped() {
        let s = WiseSurvey::new("allsky-4band", ProductLevel::L1b, WiseSettings::default());
        let sizes = sizes();
        let r = rows(json!([
            { "scan_id": "01234a", "frame_num": 1, "band": 1, "in_ra": 1.0, "in_dec": 1.0 },
        ]));
        let g = ManifestAssembler::new(&s, &sizes, 100000)
            .assemble(
                &r,
                &options(Some(0.0001), vec![ProductType::Intensity, ProductType::Halos], false),
            )
            .unwrap();

        assert_eq!(g.entries[0].est_bytes, 100000);
        assert_eq!(g.entries[1].est_bytes, 100000);
    }
}
