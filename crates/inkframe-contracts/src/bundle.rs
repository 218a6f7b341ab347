use std::path::PathBuf;

use chrono::{DateTime, Local};
use serde::Serialize;

pub const ARCHIVE_EXTENSION: &str = "zip";
pub const DOCUMENT_EXTENSION: &str = "pdf";

/// Canonical on-disk and in-archive name of a panel image.
pub fn panel_file_name(index: u32) -> String {
    format!("panel_{index:02}.png")
}

/// Deliverable names derived from the request timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleNames {
    stamp: String,
}

impl BundleNames {
    pub fn from_stamp(stamp: impl Into<String>) -> Self {
        Self {
            stamp: stamp.into(),
        }
    }

    pub fn at(moment: DateTime<Local>) -> Self {
        Self::from_stamp(moment.format("%Y%m%d_%H%M%S").to_string())
    }

    pub fn stamp(&self) -> &str {
        &self.stamp
    }

    pub fn archive_name(&self) -> String {
        format!("comic_{}.{ARCHIVE_EXTENSION}", self.stamp)
    }

    pub fn document_name(&self) -> String {
        format!("comic_{}.{DOCUMENT_EXTENSION}", self.stamp)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Bundle {
    pub archive_path: PathBuf,
    pub document_path: PathBuf,
    /// True when the document had to fall back to the text-only layout.
    pub document_degraded: bool,
}
