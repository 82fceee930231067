//! Download of matched batch entries into the staging tree.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use super::paths::{staged_file_path, update_directory};
use crate::error::{EventId, FulfilmentError, FulfilmentResult};
use crate::model::{BatchEntry, ExchangeSetLayout, Product, ProductUpdate};
use crate::remote::FileDownloader;

/// Files staged for one product update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedEntry {
    pub update: ProductUpdate,
    pub directory: PathBuf,
    pub files: Vec<PathBuf>,
    pub bytes: u64,
}

/// Downloads every file of an entry into its product update directory.
///
/// Files of one entry download in sequence; callers run entries
/// concurrently in a [`crate::scope::TaskScope`] sharing the batch token.
#[derive(Clone)]
pub struct DownloadCoordinator {
    downloader: Arc<dyn FileDownloader>,
}

impl DownloadCoordinator {
    pub fn new(downloader: Arc<dyn FileDownloader>) -> Self {
        Self { downloader }
    }

    /// Download `entry` for `update_number` of `product` under `root`.
    ///
    /// A failed file cancels `token` and names the product and file. When
    /// the token fires first, in-flight transfers are dropped and the call
    /// returns [`FulfilmentError::Cancelled`].
    pub async fn download(
        &self,
        entry: &BatchEntry,
        product: &Product,
        update_number: u32,
        root: &Path,
        layout: ExchangeSetLayout,
        token: &CancellationToken,
    ) -> FulfilmentResult<DownloadedEntry> {
        if token.is_cancelled() {
            return Err(FulfilmentError::Cancelled);
        }

        let directory =
            update_directory(root, product, product.edition_number, update_number, layout)?;
        tokio::fs::create_dir_all(&directory)
            .await
            .map_err(|e| FulfilmentError::io(EventId::StagingFailed, "create", &directory, e))?;

        let mut files = Vec::with_capacity(entry.files.len());
        let mut bytes = 0;
        for file in &entry.files {
            if token.is_cancelled() {
                return Err(FulfilmentError::Cancelled);
            }

            let destination = match staged_file_path(&directory, product, &file.filename) {
                Ok(path) => path,
                Err(e) => {
                    error!(
                        event_id = EventId::StagingFailed.as_str(),
                        batch_id = %entry.batch_id,
                        product = %product.product_name,
                        update = update_number,
                        file = %file.filename,
                        "Refusing unsafe file name"
                    );
                    token.cancel();
                    return Err(e);
                }
            };
            let result = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(FulfilmentError::Cancelled),
                result = self.downloader.download_file(file.download_href(), &destination) => result,
            };

            match result {
                Ok(written) => {
                    bytes += written;
                    files.push(destination);
                }
                Err(source) => {
                    error!(
                        event_id = EventId::DownloadFailed.as_str(),
                        batch_id = %entry.batch_id,
                        product = %product.product_name,
                        update = update_number,
                        file = %file.filename,
                        uri = source.uri().unwrap_or(file.download_href()),
                        status = source.status(),
                        error = %source,
                        "File download failed"
                    );
                    token.cancel();
                    return Err(FulfilmentError::Download {
                        product_name: product.product_name.clone(),
                        file_name: file.filename.clone(),
                        source,
                    });
                }
            }
        }

        debug!(
            batch_id = %entry.batch_id,
            product = %product.product_name,
            update = update_number,
            files = files.len(),
            bytes,
            "Downloaded entry"
        );

        Ok(DownloadedEntry {
            update: ProductUpdate {
                product_name: product.product_name.clone(),
                edition_number: product.edition_number,
                update_number,
            },
            directory,
            files,
            bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::BoxFuture;
    use crate::model::BatchFile;
    use crate::remote::RemoteError;
    use crate::scope::TaskScope;
    use std::sync::Mutex;

    /// Writes the href into the destination. Hrefs containing `fail` error,
    /// hrefs containing `hang` never complete.
    #[derive(Default)]
    struct FakeDownloader {
        calls: Mutex<Vec<String>>,
    }

    impl FileDownloader for FakeDownloader {
        fn download_file<'a>(
            &'a self,
            href: &'a str,
            destination: &'a Path,
        ) -> BoxFuture<'a, Result<u64, RemoteError>> {
            self.calls.lock().unwrap().push(href.to_string());
            Box::pin(async move {
                if href.contains("fail") {
                    return Err(RemoteError::Status {
                        method: "GET",
                        uri: href.to_string(),
                        status: 500,
                    });
                }
                if href.contains("hang") {
                    std::future::pending::<()>().await;
                }
                tokio::fs::write(destination, href.as_bytes())
                    .await
                    .map_err(|source| RemoteError::Io {
                        path: destination.to_path_buf(),
                        source,
                    })?;
                Ok(href.len() as u64)
            })
        }
    }

    fn entry(name: &str, update: u32, hrefs: &[(&str, &str)]) -> BatchEntry {
        let files = hrefs
            .iter()
            .map(|(file, href)| BatchFile::new(*file, *href))
            .collect();
        BatchEntry::for_cell("b1", name, 9, update, files)
    }

    #[tokio::test]
    async fn test_download_writes_files_under_product_path() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = DownloadCoordinator::new(Arc::new(FakeDownloader::default()));
        let product = Product::new("DE416080", 9, vec![1]);
        let entry = entry(
            "DE416080",
            1,
            &[("DE416080.001", "/f/DE416080.001"), ("DE416080.TXT", "/f/DE416080.TXT")],
        );

        let downloaded = coordinator
            .download(
                &entry,
                &product,
                1,
                dir.path(),
                ExchangeSetLayout::Standard,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let expected_dir = dir.path().join("ENC_ROOT/DE/DE416080/9/1");
        assert_eq!(downloaded.directory, expected_dir);
        assert_eq!(downloaded.files.len(), 2);
        assert!(expected_dir.join("DE416080.001").exists());
        assert!(expected_dir.join("DE416080.TXT").exists());
        assert_eq!(downloaded.update.to_string(), "DE416080 9.1");
    }

    #[tokio::test]
    async fn test_cancelled_token_skips_download() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeDownloader::default());
        let coordinator = DownloadCoordinator::new(fake.clone());
        let token = CancellationToken::new();
        token.cancel();

        let result = coordinator
            .download(
                &entry("DE416080", 0, &[("DE416080.000", "/f/0")]),
                &Product::new("DE416080", 9, vec![0]),
                0,
                dir.path(),
                ExchangeSetLayout::Standard,
                &token,
            )
            .await;

        assert!(result.unwrap_err().is_cancelled());
        assert!(fake.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_one_failure_cancels_concurrent_downloads() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = DownloadCoordinator::new(Arc::new(FakeDownloader::default()));
        let token = CancellationToken::new();
        let mut scope = TaskScope::new(token.clone(), 3);
        let mut results = Vec::new();

        for (name, href) in [("AA000001", "/hang/1"), ("BB000002", "/fail/2"), ("CC000003", "/hang/3")] {
            let coordinator = coordinator.clone();
            let root = dir.path().to_path_buf();
            let token = token.clone();
            let (tx, rx) = tokio::sync::oneshot::channel();
            results.push(rx);
            scope.spawn(async move {
                let product = Product::new(name, 9, vec![0]);
                let file = format!("{}.000", name);
                let result = coordinator
                    .download(
                        &entry(name, 0, &[(file.as_str(), href)]),
                        &product,
                        0,
                        &root,
                        ExchangeSetLayout::Standard,
                        &token,
                    )
                    .await;
                let _ = tx.send(result.as_ref().map(|_| ()).map_err(|e| e.event_id()));
                result.map(|_| ())
            });
        }

        let err = scope.join_all().await.unwrap_err();
        assert!(matches!(
            &err,
            FulfilmentError::Download { product_name, file_name, .. }
                if product_name == "BB000002" && file_name == "BB000002.000"
        ));

        let mut cancelled = 0;
        for rx in results {
            if rx.await.unwrap() == Err(EventId::OperationCancelled) {
                cancelled += 1;
            }
        }
        assert_eq!(cancelled, 2);
    }

    #[tokio::test]
    async fn test_large_media_without_location_fails() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = DownloadCoordinator::new(Arc::new(FakeDownloader::default()));
        let err = coordinator
            .download(
                &entry("DE416080", 0, &[("DE416080.000", "/f/0")]),
                &Product::new("DE416080", 9, vec![0]),
                0,
                dir.path(),
                ExchangeSetLayout::LargeMedia,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.event_id(), EventId::InvalidBundleLocation);
    }

    #[tokio::test]
    async fn test_file_names_cannot_escape_update_directory() {
        let dir = tempfile::tempdir().unwrap();
        let stage = dir.path().join("stage");
        let absolute = dir.path().join("abs.000");
        let absolute = absolute.to_str().unwrap();
        let fake = Arc::new(FakeDownloader::default());
        let coordinator = DownloadCoordinator::new(fake.clone());
        let product = Product::new("DE416080", 9, vec![0]);

        for name in ["../../../escaped.000", absolute] {
            let token = CancellationToken::new();
            let err = coordinator
                .download(
                    &entry("DE416080", 0, &[(name, "/f/0")]),
                    &product,
                    0,
                    &stage,
                    ExchangeSetLayout::Standard,
                    &token,
                )
                .await
                .unwrap_err();

            assert!(matches!(
                &err,
                FulfilmentError::UnsafeFileName { product_name, file_name }
                    if product_name == "DE416080" && file_name == name
            ));
            assert!(token.is_cancelled());
        }

        assert!(fake.calls.lock().unwrap().is_empty());
        assert!(!stage.join("ENC_ROOT/escaped.000").exists());
        assert!(!dir.path().join("abs.000").exists());
    }
}
