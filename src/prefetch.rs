//! Warming the cache after a search.
//!
//! When a search comes back with a single highlighted result, the user is
//! very likely to ask for its images next. We can hide some of that latency
//! by starting to read them right away. This is purely an optimization: we
//! give the fetches a fixed amount of time, then walk away. Stragglers keep
//! running in the background, and nothing that goes wrong here is ever
//! reported to the caller.

use anyhow::anyhow;
use lambda_runtime::{
    tracing::{debug, info},
    Error,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    io,
    sync::{
        atomic::{AtomicU8, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::Semaphore;

use crate::{
    config::{PrefetchSettings, Settings},
    options::{RequestParams, RetrievalOptions},
    planner::{Locator, RetrievalPlanner},
    records::{ProductType, Row, SourceRecord},
    survey::Survey,
    wise::{ProductLevel, WiseSurvey},
};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PrefetchState {
    Idle,

    /// Tasks are being submitted.
    Running,

    /// Everything is submitted and we're waiting on the join.
    Draining,
}

impl PrefetchState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => PrefetchState::Running,
            2 => PrefetchState::Draining,
            _ => PrefetchState::Idle,
        }
    }
}

/// What happened to one batch of prefetches, for logging.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct PrefetchReport {
    pub submitted: usize,
    pub completed: usize,
    pub failed: usize,

    /// Still running when we stopped waiting.
    pub abandoned: usize,
}

pub struct PrefetchScheduler {
    max_workers: usize,
    timeout: Duration,
    state: AtomicU8,
}

impl PrefetchScheduler {
    pub fn new(settings: &PrefetchSettings) -> Self {
        PrefetchScheduler {
            max_workers: settings.max_workers.max(1),
            timeout: settings.timeout(),
            state: AtomicU8::new(PrefetchState::Idle as u8),
        }
    }

    pub fn state(&self) -> PrefetchState {
        PrefetchState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, s: PrefetchState) {
        self.state.store(s as u8, Ordering::SeqCst);
    }

    /// Run `fetch_one` on every record, at most `min(records, max_workers)`
    /// at a time, and wait up to the timeout for them to finish.
    pub async fn prefetch<F>(&self, records: Vec<SourceRecord>, fetch_one: F) -> PrefetchReport
    where
        F: Fn(&SourceRecord) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        if records.is_empty() {
            return PrefetchReport::default();
        }

        self.set_state(PrefetchState::Running);

        let fetch_one = Arc::new(fetch_one);
        let permits = Arc::new(Semaphore::new(usize::min(records.len(), self.max_workers)));
        let completed = Arc::new(AtomicUsize::new(0));
        let failed = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::with_capacity(records.len());

        for record in records {
            let fetch_one = fetch_one.clone();
            let permits = permits.clone();
            let completed = completed.clone();
            let failed = failed.clone();

            handles.push(tokio::spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return;
                };

                match tokio::task::spawn_blocking(move || fetch_one(&record)).await {
                    Ok(Ok(())) => {
                        completed.fetch_add(1, Ordering::SeqCst);
                    }

                    Ok(Err(e)) => {
                        debug!("prefetch failed: {e}");
                        failed.fetch_add(1, Ordering::SeqCst);
                    }

                    Err(e) => {
                        debug!("prefetch task died: {e}");
                        failed.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }));
        }

        let submitted = handles.len();
        self.set_state(PrefetchState::Draining);

        let joined = tokio::time::timeout(self.timeout, async {
            for h in handles.iter_mut() {
                let _ = h.await;
            }
        })
        .await
        .is_ok();

        // Dropping the handles detaches whatever is still running.
        drop(handles);

        let completed = completed.load(Ordering::SeqCst);
        let failed = failed.load(Ordering::SeqCst);
        let abandoned = if joined {
            0
        } else {
            submitted.saturating_sub(completed + failed)
        };

        self.set_state(PrefetchState::Idle);

        PrefetchReport {
            submitted,
            completed,
            failed,
            abandoned,
        }
    }
}

#[derive(Deserialize)]
pub struct PrefetchRequest {
    #[serde(default)]
    options: RequestParams,

    #[serde(default)]
    rows: Vec<Row>,

    image_set: Option<String>,
    product_level: Option<String>,

    /// Set when the search result is a single highlighted record rather
    /// than a general listing. We only prefetch for the former.
    #[serde(default)]
    highlighted: bool,
}

/// Read a local file all the way through so that it's hot in the page cache
/// when the real download comes for it. Remote fetching belongs to the
/// packager, so there's nothing we can do for those.
fn warm_one(survey: &dyn Survey, record: &SourceRecord, options: &RetrievalOptions) -> anyhow::Result<()> {
    let decision = RetrievalPlanner::new(survey).plan(record, ProductType::Intensity, options)?;

    match decision.locator {
        Locator::Path(p) => {
            let mut f = std::fs::File::open(&p)?;
            io::copy(&mut f, &mut io::sink())?;
            Ok(())
        }

        Locator::Url(u) => Err(anyhow!("not prefetching remote file {u}")),
    }
}

/// The `WisePrefetch` function.
pub async fn handler(payload: Option<Value>, settings: &Settings) -> Result<Value, Error> {
    let payload = payload.ok_or_else(|| -> Error { "missing prefetch request payload".into() })?;
    let request: PrefetchRequest = serde_json::from_value(payload)?;

    if !request.highlighted {
        return Ok(serde_json::to_value(PrefetchReport::default())?);
    }

    let level_text = request.product_level.as_deref().unwrap_or("1b");
    let level = ProductLevel::parse(level_text)
        .ok_or_else(|| -> Error { format!("illegal product_level {level_text:?}").into() })?;

    let image_set = request
        .image_set
        .as_deref()
        .ok_or_else(|| -> Error { "missing image_set parameter".into() })?;

    let options = RetrievalOptions::from_params(&request.options, false)?;
    let survey = Arc::new(WiseSurvey::new(image_set, level, settings.wise.clone()));

    let records: Vec<SourceRecord> = request
        .rows
        .iter()
        .filter_map(|row| survey.records(row, &options).ok())
        .flatten()
        .collect();

    let scheduler = PrefetchScheduler::new(&settings.prefetch);
    let report = scheduler
        .prefetch(records, move |r| warm_one(survey.as_ref(), r, &options))
        .await;

    info!(
        submitted = report.submitted,
        completed = report.completed,
        failed = report.failed,
        abandoned = report.abandoned,
        "prefetch finished"
    );

    Ok(serde_json::to_value(report)?)
}
