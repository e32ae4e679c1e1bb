//! Service settings.
//!
//! Settings come from an optional JSON file named by `IRSA_DOWNLOAD_CONFIG`,
//! then individual environment variables override pieces of it. Lambda
//! configuration is all environment variables, so the file is mostly useful
//! for local testing and for shipping a revised size table.

use serde::{Deserialize, Serialize};
use std::{collections::HashMap, path::PathBuf, str::FromStr, time::Duration};
use thiserror::Error;

use crate::estimate::{FrameSpec, SizeTable};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read settings file `{path}`: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("cannot parse settings file `{path}`: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },

    #[error("illegal value {value:?} for `{var}`")]
    BadValue { var: &'static str, value: String },
}

/// How a survey's files are normally obtained.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalType {
    #[default]
    Url,
    Filesystem,
}

impl FromStr for RetrievalType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        if s.eq_ignore_ascii_case("url") {
            Ok(RetrievalType::Url)
        } else if s.eq_ignore_ascii_case("filesystem") {
            Ok(RetrievalType::Filesystem)
        } else {
            Err(())
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct WiseSettings {
    pub retrieval_type: RetrievalType,

    /// Root of the WISE link trees. Unset or empty means "not mounted".
    pub filesystem_basepath: Option<PathBuf>,

    /// Scheme and host of the IBE service.
    pub ibe_host: String,
}

impl Default for WiseSettings {
    fn default() -> Self {
        WiseSettings {
            retrieval_type: RetrievalType::Url,
            filesystem_basepath: None,
            ibe_host: "https://irsa.ipac.caltech.edu".to_owned(),
        }
    }
}

impl WiseSettings {
    /// The base path, if it's configured at all.
    pub fn basepath(&self) -> Option<&PathBuf> {
        self.filesystem_basepath
            .as_ref()
            .filter(|p| !p.as_os_str().is_empty())
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct PrefetchSettings {
    pub timeout_secs: u64,
    pub max_workers: usize,
}

impl Default for PrefetchSettings {
    fn default() -> Self {
        PrefetchSettings {
            timeout_secs: 60,
            max_workers: 64,
        }
    }
}

impl PrefetchSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub wise: WiseSettings,
    pub prefetch: PrefetchSettings,

    /// No manifest entry is estimated smaller than this.
    pub min_entry_bytes: u64,

    /// Replacements and additions to the built-in size table.
    pub frame_specs: HashMap<String, FrameSpec>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            wise: WiseSettings::default(),
            prefetch: PrefetchSettings::default(),
            min_entry_bytes: 4096,
            frame_specs: HashMap::new(),
        }
    }
}

impl Settings {
    /// Load settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Load settings using `lookup` to get environment variables.
    pub fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Result<Self, ConfigError> {
        let mut s = match lookup("IRSA_DOWNLOAD_CONFIG") {
            Some(path) => {
                let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                    path: path.clone(),
                    source,
                })?;
                serde_json::from_str(&text).map_err(|source| ConfigError::Parse { path, source })?
            }

            None => Settings::default(),
        };

        if let Some(v) = lookup("WISE_DATA_RETRIEVAL_TYPE") {
            s.wise.retrieval_type = v.trim().parse().map_err(|_| ConfigError::BadValue {
                var: "WISE_DATA_RETRIEVAL_TYPE",
                value: v.clone(),
            })?;
        }

        if let Some(v) = lookup("WISE_FILESYSTEM_BASEPATH") {
            s.wise.filesystem_basepath = Some(PathBuf::from(v.trim()));
        }

        if let Some(v) = lookup("WISE_IBE_HOST") {
            s.wise.ibe_host = v.trim().to_owned();
        }

        if let Some(v) = lookup("IRSA_MIN_ENTRY_BYTES") {
            s.min_entry_bytes = parse_num(&v, "IRSA_MIN_ENTRY_BYTES")?;
        }

        if let Some(v) = lookup("IRSA_PREFETCH_TIMEOUT_SECS") {
            s.prefetch.timeout_secs = parse_num(&v, "IRSA_PREFETCH_TIMEOUT_SECS")?;
        }

        if let Some(v) = lookup("IRSA_PREFETCH_MAX_WORKERS") {
            s.prefetch.max_workers = parse_num(&v, "IRSA_PREFETCH_MAX_WORKERS")?;
        }

        Ok(s)
    }

    pub fn size_table(&self) -> SizeTable {
        SizeTable::with_overrides(&self.frame_specs)
    }
}

fn parse_num<T: FromStr>(v: &str, var: &'static str) -> Result<T, ConfigError> {
    v.trim().parse().map_err(|_| ConfigError::BadValue {
        var,
        value: v.to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults() {
        let s = Settings::from_lookup(env(&[])).unwrap();
        assert_eq!(s.wise.retrieval_type, RetrievalType::Url);
        assert!(s.wise.basepath().is_none());
        assert_eq!(s.prefetch.timeout(), Duration::from_secs(60));
        assert_eq!(s.min_entry_bytes, 4096);
    }

    #[test]
    fn env_overrides() {
        let s = Settings::from_lookup(env(&[
            ("WISE_DATA_RETRIEVAL_TYPE", "FileSystem"),
            ("WISE_FILESYSTEM_BASEPATH", "/stage/irsa-wise-links-public"),
            ("IRSA_PREFETCH_MAX_WORKERS", "4"),
        ]))
        .unwrap();

        assert_eq!(s.wise.retrieval_type, RetrievalType::Filesystem);
        assert_eq!(
            s.wise.basepath().unwrap(),
            &PathBuf::from("/stage/irsa-wise-links-public")
        );
        assert_eq!(s.prefetch.max_workers, 4);
    }

    #[test]
    fn empty_basepath_is_unset() {
        let s = Settings::from_lookup(env(&[("WISE_FILESYSTEM_BASEPATH", "  ")])).unwrap();
        assert!(s.wise.basepath().is_none());
    }

    #[test]
    fn bad_values() {
        assert!(matches!(
            Settings::from_lookup(env(&[("WISE_DATA_RETRIEVAL_TYPE", "ftp")])),
            Err(ConfigError::BadValue { .. })
        ));
        assert!(matches!(
            Settings::from_lookup(env(&[("IRSA_MIN_ENTRY_BYTES", "lots")])),
            Err(ConfigError::BadValue { .. })
        ));
    }

    #[test]
    fn settings_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(
            f,
            r#"{{
                "min_entry_bytes": 1,
                "wise": {{ "ibe_host": "http://localhost:8080" }},
                "frame_specs": {{ "wise-1b-art": {{ "full_bytes": 8192 }} }}
            }}"#
        )
        .unwrap();
        let path = f.path().to_str().unwrap().to_owned();

        let s = Settings::from_lookup(env(&[("IRSA_DOWNLOAD_CONFIG", path.as_str())])).unwrap();
        assert_eq!(s.min_entry_bytes, 1);
        assert_eq!(s.wise.ibe_host, "http://localhost:8080");
        assert_eq!(s.wise.retrieval_type, RetrievalType::Url);
        assert_eq!(s.prefetch.max_workers, 64);
        assert_eq!(s.size_table().get("wise-1b-art").unwrap().full_bytes, 8192);
    }
}
