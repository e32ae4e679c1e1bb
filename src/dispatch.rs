//! Routing invocations to download processors.

use anyhow::Result;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};

use crate::{
    config::Settings, lightcurve::LightCurveDownload, manifest::FileGroup,
    options::RequestParams, records::Row, wise::WiseDownload,
};

/// The payload of a download request.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct DownloadRequest {
    #[serde(default)]
    pub options: RequestParams,

    /// The selected table rows.
    #[serde(default)]
    pub rows: Vec<Row>,

    pub image_set: Option<String>,
    pub product_level: Option<String>,

    #[serde(default)]
    pub cookies: Option<BTreeMap<String, String>>,
}

/// Something that can turn a download request into a manifest.
pub trait FileGroupsProcessor: Send + Sync {
    /// The function name that this processor answers to.
    fn id(&self) -> &'static str;

    fn load(&self, request: DownloadRequest, settings: &Settings) -> Result<FileGroup>;
}

pub struct Dispatcher {
    processors: HashMap<&'static str, Box<dyn FileGroupsProcessor>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Dispatcher {
            processors: HashMap::new(),
        }
    }

    /// A dispatcher with all of the standard processors.
    pub fn standard() -> Self {
        let mut d = Self::new();
        d.register(Box::new(WiseDownload));
        d.register(Box::new(LightCurveDownload));
        d
    }

    pub fn register(&mut self, p: Box<dyn FileGroupsProcessor>) {
        self.processors.insert(p.id(), p);
    }

    pub fn get(&self, id: &str) -> Option<&dyn FileGroupsProcessor> {
        self.processors.get(id).map(|p| p.as_ref())
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::standard()
    }
}

/// Get the function ID from a function ARN: the last dash-separated piece of
/// the function name, so that `...:function:irsa-download-WiseDownload`
/// gives `WiseDownload`.
pub fn function_id(arn: &str) -> &str {
    let name = arn.rsplit(':').next().unwrap_or(arn);
    name.rsplit('-').next().unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_from_arns() {
        assert_eq!(
            function_id("arn:aws:lambda:us-west-2:123456789012:function:irsa-download-WiseDownload"),
            "WiseDownload"
        );
        assert_eq!(function_id("LightCurveDownload"), "LightCurveDownload");
    }

    #[test]
    fn standard_processors() {
        let d = Dispatcher::standard();
        assert_eq!(d.get("WiseDownload").unwrap().id(), "WiseDownload");
        assert_eq!(d.get("LightCurveDownload").unwrap().id(), "LightCurveDownload");
        assert!(d.get("PlanckDownload").is_none());
    }
}
