//! Wire types for the file repository API.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{BatchAttribute, BatchEntry, Link};

/// Errors from remote repository calls.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The service answered with a non-success status.
    #[error("{method} {uri} returned HTTP {status}")]
    Status {
        method: &'static str,
        uri: String,
        status: u16,
    },

    /// The request never produced a response.
    #[error("{method} {uri} failed: {reason}")]
    Transport {
        method: &'static str,
        uri: String,
        reason: String,
    },

    /// The response body could not be decoded.
    #[error("invalid response from {uri}: {reason}")]
    Decode { uri: String, reason: String },

    /// A local file involved in the transfer could not be read or written.
    #[error("local file {}: {source}", .path.display())]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A URL could not be built from configuration or a response link.
    #[error("invalid URL {0}")]
    InvalidUrl(String),
}

impl RemoteError {
    /// HTTP status, when the failure was a status response.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Request URI, when known.
    pub fn uri(&self) -> Option<&str> {
        match self {
            Self::Status { uri, .. } | Self::Transport { uri, .. } | Self::Decode { uri, .. } => {
                Some(uri)
            }
            Self::Io { .. } | Self::InvalidUrl(_) => None,
        }
    }
}

/// Paging links on a search page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PagingLinks {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<Link>,
}

/// One page of search results.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchBatchResponse {
    #[serde(default)]
    pub count: u32,
    #[serde(default)]
    pub total: u32,
    #[serde(default)]
    pub entries: Vec<BatchEntry>,
    #[serde(default, rename = "_links", skip_serializing_if = "Option::is_none")]
    pub links: Option<PagingLinks>,
}

impl SearchBatchResponse {
    /// Href of the next page, if any.
    pub fn next_href(&self) -> Option<&str> {
        self.links
            .as_ref()
            .and_then(|l| l.next.as_ref())
            .map(|l| l.href.as_str())
            .filter(|href| !href.is_empty())
    }
}

/// Read access granted on a new batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Acl {
    #[serde(default)]
    pub read_users: Vec<String>,
    #[serde(default)]
    pub read_groups: Vec<String>,
}

/// Body of `POST /batch`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBatchRequest {
    pub business_unit: String,
    pub acl: Acl,
    #[serde(default)]
    pub attributes: Vec<BatchAttribute>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<String>,
}

/// Response of `POST /batch`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBatchResponse {
    pub batch_id: String,
}

/// Response of `GET /batch/{id}/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStatusResponse {
    #[serde(default)]
    pub batch_id: String,
    pub status: String,
}

/// Body of `PUT /batch/{id}/files/{name}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteBlockListRequest {
    pub block_ids: Vec<String>,
}

/// One file in the commit manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileManifestEntry {
    pub filename: String,
    /// Base64 MD5 of the whole file.
    pub hash: String,
}
