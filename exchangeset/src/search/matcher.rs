//! Matching of search results against requested product updates.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::{debug, trace};

use crate::error::UnresolvedProduct;
use crate::model::{attributes, BatchEntry, Product, ProductUpdate};

/// A search result accepted for one requested update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedEntry {
    pub product: Product,
    pub update_number: u32,
    pub entry: BatchEntry,
    /// True when the entry was found under the cancellation edition and
    /// relabelled to the requested edition.
    pub replaced: bool,
}

impl MatchedEntry {
    pub fn product_update(&self) -> ProductUpdate {
        ProductUpdate {
            product_name: self.product.product_name.clone(),
            edition_number: self.product.edition_number,
            update_number: self.update_number,
        }
    }
}

/// (upper-cased cell name, edition searched, update)
type SearchKey = (String, u32, u32);

/// Tracks which requested updates have been satisfied by search results.
///
/// Results are looked up by the edition the repository stores them under,
/// which for a cancellation update is the cancellation edition. The first
/// result for a pair wins; later duplicates are ignored.
#[derive(Debug)]
pub struct SearchMatcher {
    products: Vec<Product>,
    wanted: HashMap<SearchKey, (usize, u32)>,
    matched: HashSet<(usize, u32)>,
}

impl SearchMatcher {
    pub fn new(products: &[Product]) -> Self {
        let mut wanted = HashMap::new();
        for (index, product) in products.iter().enumerate() {
            for &update in &product.update_numbers {
                let key = (
                    product.product_name.to_ascii_uppercase(),
                    product.search_edition_for(update),
                    update,
                );
                wanted.entry(key).or_insert((index, update));
            }
        }
        Self {
            products: products.to_vec(),
            wanted,
            matched: HashSet::new(),
        }
    }

    /// Number of distinct requested pairs.
    pub fn requested(&self) -> usize {
        self.wanted.len()
    }

    pub fn matched(&self) -> usize {
        self.matched.len()
    }

    pub fn is_complete(&self) -> bool {
        self.matched.len() == self.wanted.len()
    }

    /// Accept `entry` if it satisfies an unmatched requested pair.
    pub fn accept(&mut self, mut entry: BatchEntry) -> Option<MatchedEntry> {
        let (Some(name), Some(edition), Some(update)) =
            (entry.cell_name(), entry.edition_number(), entry.update_number())
        else {
            debug!(batch_id = %entry.batch_id, "Search result is missing cell attributes");
            return None;
        };

        let key = (name.to_ascii_uppercase(), edition, update);
        let Some(&(index, update_number)) = self.wanted.get(&key) else {
            trace!(batch_id = %entry.batch_id, cell = name, edition, update, "Search result not requested");
            return None;
        };
        if !self.matched.insert((index, update_number)) {
            debug!(
                batch_id = %entry.batch_id,
                cell = name,
                edition,
                update,
                "Ignoring duplicate search result"
            );
            return None;
        }

        let product = &self.products[index];
        let replaced = product.is_cancellation_update(update_number);
        if replaced {
            entry.set_attribute(
                attributes::EDITION_NUMBER,
                product.edition_number.to_string(),
            );
            entry.ignore_cache = true;
        }

        Some(MatchedEntry {
            product: product.clone(),
            update_number,
            entry,
            replaced,
        })
    }

    /// Requested updates with no accepted result, grouped by product.
    pub fn unresolved(&self) -> Vec<UnresolvedProduct> {
        let mut by_product: BTreeMap<usize, Vec<u32>> = BTreeMap::new();
        for &(index, update) in self.wanted.values() {
            if !self.matched.contains(&(index, update)) {
                by_product.entry(index).or_default().push(update);
            }
        }
        by_product
            .into_iter()
            .map(|(index, mut updates)| {
                updates.sort_unstable();
                self.products[index].with_update_numbers(updates).to_unresolved()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BatchFile;

    fn result(batch: &str, cell: &str, edition: u32, update: u32) -> BatchEntry {
        BatchEntry::for_cell(
            batch,
            cell,
            edition,
            update,
            vec![BatchFile::new(format!("{}.{:03}", cell, update), "/f")],
        )
    }

    #[test]
    fn test_exact_match_accepted_once() {
        let mut matcher = SearchMatcher::new(&[Product::new("DE416080", 9, vec![0, 1])]);
        assert_eq!(matcher.requested(), 2);

        let matched = matcher.accept(result("b0", "DE416080", 9, 0)).unwrap();
        assert!(!matched.replaced);
        assert!(!matched.entry.ignore_cache);
        assert!(matcher.accept(result("b0-dup", "DE416080", 9, 0)).is_none());
        assert!(!matcher.is_complete());

        matcher.accept(result("b1", "DE416080", 9, 1)).unwrap();
        assert!(matcher.is_complete());
        assert!(matcher.unresolved().is_empty());
    }

    #[test]
    fn test_unrequested_results_rejected() {
        let mut matcher = SearchMatcher::new(&[Product::new("DE416080", 9, vec![1])]);
        assert!(matcher.accept(result("x", "DE416080", 8, 1)).is_none());
        assert!(matcher.accept(result("x", "DE416080", 9, 2)).is_none());
        assert!(matcher.accept(result("x", "GB100001", 9, 1)).is_none());
        assert_eq!(matcher.matched(), 0);
    }

    #[test]
    fn test_cell_name_case_insensitive() {
        let mut matcher = SearchMatcher::new(&[Product::new("DE416080", 9, vec![1])]);
        assert!(matcher.accept(result("x", "de416080", 9, 1)).is_some());
    }

    #[test]
    fn test_cancellation_replacement_relabels_and_skips_cache() {
        let product = Product::new("GB100001", 4, vec![1, 2]).with_cancellation(5, 2);
        let mut matcher = SearchMatcher::new(&[product]);

        // The cancelled update under the old edition is not what we want.
        assert!(matcher.accept(result("old", "GB100001", 4, 2)).is_none());

        let matched = matcher.accept(result("cx", "GB100001", 5, 2)).unwrap();
        assert!(matched.replaced);
        assert!(matched.entry.ignore_cache);
        assert_eq!(matched.entry.edition_number(), Some(4));
        assert_eq!(matched.product_update().to_string(), "GB100001 4.2");
    }

    #[test]
    fn test_unresolved_lists_residual_updates() {
        let mut matcher = SearchMatcher::new(&[
            Product::new("DE416080", 9, vec![0, 1, 2]),
            Product::new("GB100001", 3, vec![0]),
        ]);
        matcher.accept(result("b", "DE416080", 9, 1)).unwrap();

        let unresolved = matcher.unresolved();
        assert_eq!(unresolved.len(), 2);
        assert_eq!(unresolved[0].product_name, "DE416080");
        assert_eq!(unresolved[0].update_numbers, vec![0, 2]);
        assert_eq!(unresolved[1].product_name, "GB100001");
        assert_eq!(unresolved[1].update_numbers, vec![0]);
    }

    #[test]
    fn test_missing_attributes_rejected() {
        let mut matcher = SearchMatcher::new(&[Product::new("DE416080", 9, vec![1])]);
        let mut entry = result("b", "DE416080", 9, 1);
        entry.attributes.clear();
        assert!(matcher.accept(entry).is_none());
    }
}
