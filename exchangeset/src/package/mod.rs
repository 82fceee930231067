//! Zip packaging of staged exchange sets.
//!
//! A staged tree is archived with paths relative to the staged directory and
//! `/` separators, in sorted order so identical trees produce identical
//! archives. Archiving runs on the blocking pool.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, instrument};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{EventId, FulfilmentError, FulfilmentResult};

/// A written archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackagedArchive {
    pub path: PathBuf,
    pub file_name: String,
    pub size: u64,
    pub entries: usize,
}

/// Archives staged directories into zip files.
#[derive(Debug, Clone, Copy)]
pub struct PackagingStep {
    compression: CompressionMethod,
}

impl Default for PackagingStep {
    fn default() -> Self {
        Self {
            compression: CompressionMethod::Deflated,
        }
    }
}

impl PackagingStep {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store entries without compression.
    pub fn stored(mut self) -> Self {
        self.compression = CompressionMethod::Stored;
        self
    }

    /// Archive every file under `source` into `archive_path`.
    ///
    /// `archive_path` must lie outside `source`.
    #[instrument(skip_all, fields(source = %source.display(), archive = %archive_path.display()))]
    pub async fn package(&self, source: &Path, archive_path: &Path) -> FulfilmentResult<PackagedArchive> {
        let source = source.to_path_buf();
        let archive_path = archive_path.to_path_buf();
        let compression = self.compression;

        let archive = tokio::task::spawn_blocking(move || {
            write_archive(&source, &archive_path, compression)
        })
        .await??;

        debug!(
            file = %archive.file_name,
            entries = archive.entries,
            bytes = archive.size,
            "Packaged exchange set"
        );
        Ok(archive)
    }
}

/// Top-level media folders (`M0{n}X02`) of a large media staging tree, sorted.
pub fn media_folders(root: &Path) -> FulfilmentResult<Vec<PathBuf>> {
    let read_err = |e| FulfilmentError::io(EventId::PackagingFailed, "read", root, e);
    let mut folders = Vec::new();
    for entry in fs::read_dir(root).map_err(read_err)? {
        let entry = entry.map_err(read_err)?;
        let is_media = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with('M') && name.ends_with("X02"));
        if is_media && entry.file_type().map_err(read_err)?.is_dir() {
            folders.push(entry.path());
        }
    }
    folders.sort();
    Ok(folders)
}

fn write_archive(
    source: &Path,
    archive_path: &Path,
    compression: CompressionMethod,
) -> FulfilmentResult<PackagedArchive> {
    let packaging = |reason: String| FulfilmentError::Packaging {
        path: source.to_path_buf(),
        reason,
    };

    let mut files = Vec::new();
    collect_files(source, &mut files).map_err(|e| packaging(e.to_string()))?;
    files.sort();

    if let Some(parent) = archive_path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| FulfilmentError::io(EventId::PackagingFailed, "create", parent, e))?;
    }
    let file = File::create(archive_path)
        .map_err(|e| FulfilmentError::io(EventId::PackagingFailed, "create", archive_path, e))?;

    let mut writer = ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default().compression_method(compression);

    for path in &files {
        let name = entry_name(source, path).ok_or_else(|| {
            packaging(format!("{} is not under the staged directory", path.display()))
        })?;
        writer
            .start_file(name, options)
            .map_err(|e| packaging(e.to_string()))?;
        let mut input = File::open(path)
            .map_err(|e| FulfilmentError::io(EventId::PackagingFailed, "open", path, e))?;
        io::copy(&mut input, &mut writer)
            .map_err(|e| FulfilmentError::io(EventId::PackagingFailed, "archive", path, e))?;
    }
    let mut output = writer.finish().map_err(|e| packaging(e.to_string()))?;
    output
        .flush()
        .map_err(|e| FulfilmentError::io(EventId::PackagingFailed, "write", archive_path, e))?;

    let size = fs::metadata(archive_path)
        .map_err(|e| FulfilmentError::io(EventId::PackagingFailed, "stat", archive_path, e))?
        .len();
    let file_name = archive_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    Ok(PackagedArchive {
        path: archive_path.to_path_buf(),
        file_name,
        size,
        entries: files.len(),
    })
}

fn collect_files(dir: &Path, files: &mut Vec<PathBuf>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            collect_files(&path, files)?;
        } else {
            files.push(path);
        }
    }
    Ok(())
}

/// Archive entry name: path relative to `root` joined with `/`.
fn entry_name(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Option<Vec<&str>> = relative.components().map(|c| c.as_os_str().to_str()).collect();
    Some(parts?.join("/"))
}
