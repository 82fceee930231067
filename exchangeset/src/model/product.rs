//! Requested products and the update pairs they expand to.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::UnresolvedProduct;

/// Edition/update pair that superseded a product's edition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cancellation {
    pub edition_number: u32,
    pub update_number: u32,
}

/// One requested chart cell at one edition.
///
/// Products are built once per request from upstream catalogue data and are
/// never mutated afterwards; narrowing a product to fewer updates produces a
/// new value via [`Product::with_update_numbers`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub product_name: String,
    pub edition_number: u32,
    #[serde(default)]
    pub update_numbers: Vec<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancellation: Option<Cancellation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle_location: Option<String>,
    #[serde(default)]
    pub file_size: u64,
}

/// A single `(product, edition, update)` the pipeline must deliver.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProductUpdate {
    pub product_name: String,
    pub edition_number: u32,
    pub update_number: u32,
}

impl fmt::Display for ProductUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}.{}",
            self.product_name, self.edition_number, self.update_number
        )
    }
}

impl Product {
    /// Create a product with the given updates and no cancellation.
    pub fn new(name: impl Into<String>, edition_number: u32, update_numbers: Vec<u32>) -> Self {
        Self {
            product_name: name.into(),
            edition_number,
            update_numbers,
            cancellation: None,
            bundle_location: None,
            file_size: 0,
        }
    }

    /// Set the superseding edition/update pair.
    pub fn with_cancellation(mut self, edition_number: u32, update_number: u32) -> Self {
        self.cancellation = Some(Cancellation {
            edition_number,
            update_number,
        });
        self
    }

    /// Set the large-media bundle location (e.g. `"M1;B3"`).
    pub fn with_bundle_location(mut self, location: impl Into<String>) -> Self {
        self.bundle_location = Some(location.into());
        self
    }

    /// Set the catalogue file size in bytes.
    pub fn with_file_size(mut self, file_size: u64) -> Self {
        self.file_size = file_size;
        self
    }

    /// Copy of this product restricted to `update_numbers`.
    pub fn with_update_numbers(&self, update_numbers: Vec<u32>) -> Self {
        Self {
            update_numbers,
            ..self.clone()
        }
    }

    /// True when `update_number` must be resolved against the cancellation edition.
    pub fn is_cancellation_update(&self, update_number: u32) -> bool {
        self.cancellation
            .is_some_and(|c| c.update_number == update_number)
    }

    /// Edition the remote repository stores `update_number` under.
    pub fn search_edition_for(&self, update_number: u32) -> u32 {
        match self.cancellation {
            Some(c) if c.update_number == update_number => c.edition_number,
            _ => self.edition_number,
        }
    }

    /// Every update pair requested by this product.
    pub fn requested_updates(&self) -> impl Iterator<Item = ProductUpdate> + '_ {
        self.update_numbers.iter().map(|&update_number| ProductUpdate {
            product_name: self.product_name.clone(),
            edition_number: self.edition_number,
            update_number,
        })
    }

    /// Diagnostic view of this product for completeness errors.
    pub fn to_unresolved(&self) -> UnresolvedProduct {
        UnresolvedProduct {
            product_name: self.product_name.clone(),
            edition_number: self.edition_number,
            update_numbers: self.update_numbers.clone(),
        }
    }

    /// Two-character shard prefix used in the staging path.
    pub fn shard_prefix(&self) -> &str {
        let end = self
            .product_name
            .char_indices()
            .nth(2)
            .map(|(i, _)| i)
            .unwrap_or(self.product_name.len());
        &self.product_name[..end]
    }
}
