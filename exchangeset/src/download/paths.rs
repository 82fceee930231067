//! Staging paths for downloaded chart files.
//!
//! ```text
//! standard:     <root>/ENC_ROOT/DE/DE416080/9/1
//! large media:  <root>/M01X02/B3/ENC_ROOT/DE/DE416080/9/1
//! ```

use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use crate::error::{FulfilmentError, FulfilmentResult};
use crate::model::{ExchangeSetLayout, Product};

/// Directory holding chart cells inside an exchange set.
pub const ENC_ROOT: &str = "ENC_ROOT";

fn bundle_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\s*[Mm](\d+)\s*;\s*[Bb](\d+)\s*$").expect("bundle location pattern is valid")
    })
}

/// Media and bundle numbers parsed from a `"M{n};B{k}"` bundle location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MediaLocation {
    pub media: u32,
    pub bundle: u32,
}

impl MediaLocation {
    /// Parse a bundle location such as `"M1;B3"`.
    pub fn parse(location: &str) -> Option<Self> {
        let captures = bundle_pattern().captures(location)?;
        Some(Self {
            media: captures[1].parse().ok()?,
            bundle: captures[2].parse().ok()?,
        })
    }

    /// Top-level media folder, e.g. `M01X02`.
    pub fn media_folder(&self) -> String {
        format!("M0{}X02", self.media)
    }

    /// Bundle folder inside the media folder, e.g. `B3`.
    pub fn bundle_folder(&self) -> String {
        format!("B{}", self.bundle)
    }
}

/// Parse a product's bundle location or fail with the product named.
pub fn media_location(product: &Product) -> FulfilmentResult<MediaLocation> {
    product
        .bundle_location
        .as_deref()
        .and_then(MediaLocation::parse)
        .ok_or_else(|| FulfilmentError::InvalidBundleLocation {
            product_name: product.product_name.clone(),
            location: product.bundle_location.clone(),
        })
}

/// Directory a product's cells are staged under, before edition and update.
pub fn product_directory(
    root: &Path,
    product: &Product,
    layout: ExchangeSetLayout,
) -> FulfilmentResult<PathBuf> {
    let base = match layout {
        ExchangeSetLayout::Standard => root.to_path_buf(),
        ExchangeSetLayout::LargeMedia => {
            let location = media_location(product)?;
            root.join(location.media_folder())
                .join(location.bundle_folder())
        }
    };
    Ok(base
        .join(ENC_ROOT)
        .join(product.shard_prefix())
        .join(&product.product_name))
}

/// Directory one update of a product is staged in.
pub fn update_directory(
    root: &Path,
    product: &Product,
    edition_number: u32,
    update_number: u32,
    layout: ExchangeSetLayout,
) -> FulfilmentResult<PathBuf> {
    Ok(product_directory(root, product, layout)?
        .join(edition_number.to_string())
        .join(update_number.to_string()))
}

/// Path of a remote file inside its update directory.
///
/// Only a single normal component is accepted: names with separators,
/// `..`, `.` or a root are rejected so a file can never leave `directory`.
pub fn staged_file_path(
    directory: &Path,
    product: &Product,
    file_name: &str,
) -> FulfilmentResult<PathBuf> {
    let mut components = Path::new(file_name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(name)), None) if name == file_name => Ok(directory.join(name)),
        _ => Err(FulfilmentError::UnsafeFileName {
            product_name: product.product_name.clone(),
            file_name: file_name.to_string(),
        }),
    }
}
