//! Archive entry names.
//!
//! Most of the time we know what a file will be called inside the download
//! package as soon as we decide where it comes from. Remote cutouts are the
//! exception: the cutout service may or may not gzip its output, and we only
//! find out which when the bytes arrive. So for those we record the pieces
//! of the name and let the packager finish the job once it knows the
//! retrieved file's real name.

use serde::{Deserialize, Serialize};

use crate::records::Position;

pub const GZ_EXTENSION: &str = "gz";

/// The name of a file inside the download package.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArchiveName {
    /// The name is already known.
    Literal { name: String },

    /// The name is derived from the retrieved file's name by splicing in
    /// `suffix` ahead of the extension and prefixing `folder_prefix`.
    DeferredCutout {
        suffix: String,
        folder_prefix: String,
    },
}

impl ArchiveName {
    /// A literal name, sanitized.
    pub fn literal<S: AsRef<str>>(name: S) -> Self {
        ArchiveName::Literal {
            name: sanitize(name.as_ref()),
        }
    }

    pub fn deferred<S1: Into<String>, S2: Into<String>>(suffix: S1, folder_prefix: S2) -> Self {
        ArchiveName::DeferredCutout {
            suffix: suffix.into(),
            folder_prefix: folder_prefix.into(),
        }
    }

    /// Get the name if it's already known.
    pub fn as_literal(&self) -> Option<&str> {
        match self {
            ArchiveName::Literal { name } => Some(name),
            ArchiveName::DeferredCutout { .. } => None,
        }
    }

    /// Compute the final name, given the base name of the file that was
    /// actually retrieved. Called by the packager after the transfer.
    pub fn resolve(&self, retrieved: &str) -> String {
        match self {
            ArchiveName::Literal { name } => name.clone(),
            ArchiveName::DeferredCutout {
                suffix,
                folder_prefix,
            } => resolve_cutout(retrieved, suffix, folder_prefix),
        }
    }
}

/// Commas separate entries in the ancillary file lists elsewhere in the
/// system, so they must never make it into a package entry name.
pub fn sanitize(name: &str) -> String {
    name.replace(',', "_")
}

/// Split a file name into stem and lowercased extension, if it has a
/// distinguishable stem. Leading-dot and trailing-dot names don't.
pub fn split_extension(name: &str) -> Option<(&str, String)> {
    match name.rfind('.') {
        Some(i) if i > 0 && i < name.len() - 1 => {
            Some((&name[..i], name[i + 1..].to_ascii_lowercase()))
        }
        _ => None,
    }
}

/// The last path component of a filesystem path or URL path. Query strings
/// are dropped.
pub fn trailing_segment(path: &str) -> &str {
    let path = path.split(['?', '#']).next().unwrap_or(path);
    path.rsplit('/').next().unwrap_or(path)
}

/// Make sure a non-empty folder path ends with a separator.
pub fn folder_prefix<S: AsRef<str>>(folder: S) -> String {
    let folder = folder.as_ref();

    if folder.is_empty() || folder.ends_with('/') {
        folder.to_owned()
    } else {
        format!("{folder}/")
    }
}

/// The tag we append to cutout file names, encoding the cutout center and
/// its size in arcseconds.
pub fn cutout_suffix(pos: Position, size_deg: f64) -> String {
    format!("{}_asec{:.3}", position_tag(pos), size_deg * 3600.)
}

/// The center part of a cutout suffix. Centers that render the same here
/// produce the same archive name.
pub fn position_tag(pos: Position) -> String {
    format!("_ra{:.4}_dec{:.4}", pos.ra_deg, pos.dec_deg)
}

fn resolve_cutout(retrieved: &str, suffix: &str, folder_prefix: &str) -> String {
    let mut input = trailing_segment(retrieved);
    let mut gz = "";

    if let Some((stem, ext)) = split_extension(input) {
        if ext == GZ_EXTENSION {
            gz = ".gz";
            input = stem;
        }
    }

    let name = match split_extension(input) {
        Some((stem, ext)) => format!("{folder_prefix}{stem}{suffix}.{ext}{gz}"),
        None => format!("{folder_prefix}{input}{suffix}{gz}"),
    };

    sanitize(&name)
}
