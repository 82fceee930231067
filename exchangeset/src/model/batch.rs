//! File repository batch entries and batch status.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Attribute keys used by chart cell batches.
pub mod attributes {
    pub const CELL_NAME: &str = "CellName";
    pub const EDITION_NUMBER: &str = "EditionNumber";
    pub const UPDATE_NUMBER: &str = "UpdateNumber";
    pub const PRODUCT_CODE: &str = "ProductCode";
}

/// One key/value attribute of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchAttribute {
    pub key: String,
    pub value: String,
}

/// Hyperlink as returned by the file repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub href: String,
}

/// Links attached to a batch file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileLinks {
    pub get: Link,
}

/// A file belonging to a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchFile {
    pub filename: String,
    #[serde(default)]
    pub file_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    pub links: FileLinks,
}

impl BatchFile {
    /// Create a file entry with the given download href.
    pub fn new(filename: impl Into<String>, href: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            file_size: 0,
            hash: None,
            links: FileLinks {
                get: Link { href: href.into() },
            },
        }
    }

    /// Href to download this file from.
    pub fn download_href(&self) -> &str {
        &self.links.get.href
    }
}

/// A search result: one published batch and its files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchEntry {
    pub batch_id: String,
    #[serde(default)]
    pub attributes: Vec<BatchAttribute>,
    #[serde(default)]
    pub files: Vec<BatchFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_published_date: Option<DateTime<Utc>>,
    /// Set for entries produced by cancellation replacement; never cached.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub ignore_cache: bool,
}

impl BatchEntry {
    /// Create a chart cell entry with the standard attributes.
    pub fn for_cell(
        batch_id: impl Into<String>,
        cell_name: &str,
        edition_number: u32,
        update_number: u32,
        files: Vec<BatchFile>,
    ) -> Self {
        Self {
            batch_id: batch_id.into(),
            attributes: vec![
                BatchAttribute {
                    key: attributes::CELL_NAME.to_string(),
                    value: cell_name.to_string(),
                },
                BatchAttribute {
                    key: attributes::EDITION_NUMBER.to_string(),
                    value: edition_number.to_string(),
                },
                BatchAttribute {
                    key: attributes::UPDATE_NUMBER.to_string(),
                    value: update_number.to_string(),
                },
            ],
            files,
            batch_published_date: None,
            ignore_cache: false,
        }
    }

    /// Value of an attribute, matched case-insensitively on the key.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.key.eq_ignore_ascii_case(key))
            .map(|a| a.value.as_str())
    }

    /// Replace an attribute value, adding it when absent.
    pub fn set_attribute(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self
            .attributes
            .iter_mut()
            .find(|a| a.key.eq_ignore_ascii_case(key))
        {
            Some(attr) => attr.value = value,
            None => self.attributes.push(BatchAttribute {
                key: key.to_string(),
                value,
            }),
        }
    }

    pub fn cell_name(&self) -> Option<&str> {
        self.attribute(attributes::CELL_NAME)
    }

    pub fn edition_number(&self) -> Option<u32> {
        self.attribute(attributes::EDITION_NUMBER)
            .and_then(|v| v.trim().parse().ok())
    }

    pub fn update_number(&self) -> Option<u32> {
        self.attribute(attributes::UPDATE_NUMBER)
            .and_then(|v| v.trim().parse().ok())
    }
}

/// Commit state of a remote batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BatchStatus {
    CommitInProgress,
    Committed,
    Failed,
}

impl BatchStatus {
    /// True for `Committed` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::CommitInProgress)
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CommitInProgress => "CommitInProgress",
            Self::Committed => "Committed",
            Self::Failed => "Failed",
        };
        f.write_str(name)
    }
}

/// Status string the pipeline does not recognise.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown batch status: {0}")]
pub struct UnknownBatchStatus(pub String);

impl FromStr for BatchStatus {
    type Err = UnknownBatchStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "commitinprogress" | "incomplete" => Ok(Self::CommitInProgress),
            "committed" => Ok(Self::Committed),
            "failed" | "rolledback" => Ok(Self::Failed),
            _ => Err(UnknownBatchStatus(s.to_string())),
        }
    }
}
