//! HTTP client for the file repository.
//!
//! One [`FileShareClient`] implements every narrow client trait. Requests are
//! built relative to a configured base URL, and `next` links returned by the
//! search endpoint are resolved against the same base.

use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use url::Url;

use super::traits::{BatchCommitter, BatchFileUploader, FileDownloader, SearchApi};
use super::types::{
    BatchStatusResponse, CreateBatchRequest, CreateBatchResponse, FileManifestEntry, RemoteError,
    SearchBatchResponse, WriteBlockListRequest,
};
use crate::cache::BoxFuture;
use crate::model::BatchStatus;

/// Default timeout for a single request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Async client for the file repository API.
#[derive(Debug, Clone)]
pub struct FileShareClient {
    client: Client,
    base_url: Url,
    access_token: Option<String>,
}

impl FileShareClient {
    /// Create a client for `base_url` with the default timeout.
    pub fn new(base_url: &str) -> Result<Self, RemoteError> {
        Self::with_timeout(base_url, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Create a client with a custom request timeout.
    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, RemoteError> {
        // A trailing slash makes relative joins append rather than replace.
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{}/", base_url)
        };
        let base_url =
            Url::parse(&normalized).map_err(|e| RemoteError::InvalidUrl(format!("{base_url}: {e}")))?;

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Transport {
                method: "INIT",
                uri: base_url.to_string(),
                reason: format!("failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url,
            access_token: None,
        })
    }

    /// Send a bearer token with every request.
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve a path or link against the base URL.
    ///
    /// Absolute URLs pass through. Relative links, with or without a leading
    /// slash, are appended to the base path.
    pub fn resolve(&self, href: &str) -> Result<Url, RemoteError> {
        if let Ok(url) = Url::parse(href) {
            return Ok(url);
        }
        self.base_url
            .join(href.trim_start_matches('/'))
            .map_err(|e| RemoteError::InvalidUrl(format!("{href}: {e}")))
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.access_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(
        &self,
        method: &'static str,
        url: &Url,
        builder: RequestBuilder,
    ) -> Result<Response, RemoteError> {
        debug!(method, uri = %url, "Sending request");
        let response = builder.send().await.map_err(|e| RemoteError::Transport {
            method,
            uri: url.to_string(),
            reason: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::Status {
                method,
                uri: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }

    async fn json<T: DeserializeOwned>(url: &Url, response: Response) -> Result<T, RemoteError> {
        let body = response.bytes().await.map_err(|e| RemoteError::Decode {
            uri: url.to_string(),
            reason: e.to_string(),
        })?;
        serde_json::from_slice(&body).map_err(|e| RemoteError::Decode {
            uri: url.to_string(),
            reason: e.to_string(),
        })
    }

    async fn get_page(&self, url: Url) -> Result<SearchBatchResponse, RemoteError> {
        let response = self
            .send("GET", &url, self.request(Method::GET, url.clone()))
            .await?;
        Self::json(&url, response).await
    }

    fn file_url(&self, batch_id: &str, file_name: &str) -> Result<Url, RemoteError> {
        self.resolve(&format!("batch/{}/files/{}", batch_id, file_name))
    }
}

impl SearchApi for FileShareClient {
    fn first_page<'a>(
        &'a self,
        filter: &'a str,
        page_size: usize,
    ) -> BoxFuture<'a, Result<SearchBatchResponse, RemoteError>> {
        Box::pin(async move {
            let mut url = self.resolve("batch")?;
            url.query_pairs_mut()
                .append_pair("limit", &page_size.to_string())
                .append_pair("start", "0")
                .append_pair("$filter", filter);
            self.get_page(url).await
        })
    }

    fn next_page<'a>(
        &'a self,
        href: &'a str,
    ) -> BoxFuture<'a, Result<SearchBatchResponse, RemoteError>> {
        Box::pin(async move {
            let url = self.resolve(href)?;
            self.get_page(url).await
        })
    }
}

impl FileDownloader for FileShareClient {
    fn download_file<'a>(
        &'a self,
        href: &'a str,
        destination: &'a Path,
    ) -> BoxFuture<'a, Result<u64, RemoteError>> {
        Box::pin(async move {
            let url = self.resolve(href)?;
            let response = self
                .send("GET", &url, self.request(Method::GET, url.clone()))
                .await?;

            let io_err = |source| RemoteError::Io {
                path: destination.to_path_buf(),
                source,
            };
            let mut file = tokio::fs::File::create(destination).await.map_err(io_err)?;

            let mut written = 0u64;
            let mut stream = response.bytes_stream();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|e| RemoteError::Transport {
                    method: "GET",
                    uri: url.to_string(),
                    reason: e.to_string(),
                })?;
                file.write_all(&chunk).await.map_err(io_err)?;
                written += chunk.len() as u64;
            }
            file.flush().await.map_err(io_err)?;

            debug!(uri = %url, bytes = written, path = %destination.display(), "Downloaded file");
            Ok(written)
        })
    }
}

impl BatchFileUploader for FileShareClient {
    fn create_file<'a>(
        &'a self,
        batch_id: &'a str,
        file_name: &'a str,
        length: u64,
        mime_type: &'a str,
    ) -> BoxFuture<'a, Result<(), RemoteError>> {
        Box::pin(async move {
            let url = self.file_url(batch_id, file_name)?;
            let builder = self
                .request(Method::POST, url.clone())
                .header("X-Content-Size", length.to_string())
                .header("X-MIME-Type", mime_type)
                .json(&serde_json::json!({ "attributes": [] }));
            self.send("POST", &url, builder).await?;
            Ok(())
        })
    }

    fn upload_block<'a>(
        &'a self,
        batch_id: &'a str,
        file_name: &'a str,
        block_id: &'a str,
        data: Bytes,
        content_md5: &'a str,
    ) -> BoxFuture<'a, Result<(), RemoteError>> {
        Box::pin(async move {
            let url = self.resolve(&format!("batch/{}/files/{}/{}", batch_id, file_name, block_id))?;
            let builder = self
                .request(Method::PUT, url.clone())
                .header("Content-MD5", content_md5)
                .header("Content-Type", "application/octet-stream")
                .body(data);
            self.send("PUT", &url, builder).await?;
            Ok(())
        })
    }

    fn write_block_list<'a>(
        &'a self,
        batch_id: &'a str,
        file_name: &'a str,
        block_ids: &'a [String],
    ) -> BoxFuture<'a, Result<(), RemoteError>> {
        Box::pin(async move {
            let url = self.file_url(batch_id, file_name)?;
            let body = WriteBlockListRequest {
                block_ids: block_ids.to_vec(),
            };
            let builder = self.request(Method::PUT, url.clone()).json(&body);
            self.send("PUT", &url, builder).await?;
            Ok(())
        })
    }
}

impl BatchCommitter for FileShareClient {
    fn create_batch<'a>(
        &'a self,
        request: &'a CreateBatchRequest,
    ) -> BoxFuture<'a, Result<String, RemoteError>> {
        Box::pin(async move {
            let url = self.resolve("batch")?;
            let builder = self.request(Method::POST, url.clone()).json(request);
            let response = self.send("POST", &url, builder).await?;
            let created: CreateBatchResponse = Self::json(&url, response).await?;
            Ok(created.batch_id)
        })
    }

    fn commit_batch<'a>(
        &'a self,
        batch_id: &'a str,
        manifest: &'a [FileManifestEntry],
    ) -> BoxFuture<'a, Result<(), RemoteError>> {
        Box::pin(async move {
            let url = self.resolve(&format!("batch/{}", batch_id))?;
            let builder = self.request(Method::PUT, url.clone()).json(manifest);
            self.send("PUT", &url, builder).await?;
            Ok(())
        })
    }

    fn batch_status<'a>(
        &'a self,
        batch_id: &'a str,
    ) -> BoxFuture<'a, Result<BatchStatus, RemoteError>> {
        Box::pin(async move {
            let url = self.resolve(&format!("batch/{}/status", batch_id))?;
            let response = self
                .send("GET", &url, self.request(Method::GET, url.clone()))
                .await?;
            let body: BatchStatusResponse = Self::json(&url, response).await?;
            body.status.parse().map_err(|e| RemoteError::Decode {
                uri: url.to_string(),
                reason: format!("{}", e),
            })
        })
    }
}
