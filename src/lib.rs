//! The AWS/Lambda-powered IRSA download manifest services
//!
//! This library crate implements the planning stage of IRSA's bulk image
//! downloads. Given table rows that a user has selected, we figure out which
//! files they refer to, where each file's bytes can be found, what it should
//! be called inside the download package, and how big it's likely to be. The
//! resulting manifest is handed off to the packager, which does the actual
//! transfers.
//!
//! The common codebase is compiled into three executables:
//! `irsa-download-lambda-bare`, `irsa-download-lambda-proxyevent`, and
//! `irsa-download-lambda-oneshot`. The first is useful for local testing,
//! the second has support for the AWS API Gateway "proxy event" framework
//! that we use for actual cloud deployment, and the third runs one request
//! from the command line.
//!
//! Manifests are small and JSON is what the buffered response mechanism
//! wants, so we don't bother with streaming.

use lambda_runtime::Error;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

pub mod config;
pub mod dispatch;
pub mod estimate;
pub mod lightcurve;
pub mod locator;
pub mod manifest;
pub mod naming;
pub mod options;
pub mod planner;
pub mod prefetch;
pub mod records;
pub mod survey;
pub mod wise;

use config::Settings;
use dispatch::{function_id, DownloadRequest, Dispatcher};

pub struct Services {
    settings: Settings,
    dispatcher: Dispatcher,
}

impl Services {
    /// Create a state object for the download Lambda services.
    pub async fn init() -> Result<Self, Error> {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false) // don't print the module name
            .without_time() // don't print time (CloudWatch has it)
            .init();

        let settings = Settings::from_env()?;
        Ok(Self::with_settings(settings))
    }

    /// Create a state object with explicit settings, without touching the
    /// global logger.
    pub fn with_settings(settings: Settings) -> Self {
        Services {
            settings,
            dispatcher: Dispatcher::standard(),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Handle an invocation of one of the download APIs.
    ///
    /// As with our other Lambdas, everything is bundled into one executable
    /// and we "know" which function is being invoked by looking at the suffix
    /// of the function ARN.
    pub async fn dispatch(&self, mut arn: String, payload: Option<Value>) -> Result<Value, Error> {
        // Local testing environment?
        if arn.ends_with(":test_function") {
            arn = std::env::var("IRSA_LOCALTEST_ARN")
                .map_err(|_| -> Error { "set $IRSA_LOCALTEST_ARN to test locally".into() })?;
        }

        let id = function_id(&arn);

        if id == "WisePrefetch" {
            return prefetch::handler(payload, &self.settings).await;
        }

        let processor = self
            .dispatcher
            .get(id)
            .ok_or_else(|| -> Error { format!("unhandled function: {}", arn).into() })?;

        let payload = payload.ok_or_else(|| -> Error { "missing request payload".into() })?;
        let request: DownloadRequest = serde_json::from_value(payload)
            .map_err(|e| -> Error { format!("unable to process request: {e}").into() })?;

        let group = processor
            .load(request, &self.settings)
            .map_err(|e| -> Error { format!("unable to process request: {e:#}").into() })?;

        Ok(serde_json::to_value(group)?)
    }
}
