//! OData-style search filter generation.

use std::collections::BTreeMap;

use crate::model::Product;

/// Attribute names and fixed clauses used to build search filters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchFilterTemplate {
    pub business_unit_key: String,
    pub cell_name_key: String,
    pub edition_number_key: String,
    pub update_number_key: String,
    /// Extra clause ANDed into every query, e.g. `$batch(ProductCode) eq 'AVCS'`.
    pub product_clause: Option<String>,
}

impl Default for SearchFilterTemplate {
    fn default() -> Self {
        Self {
            business_unit_key: "BusinessUnit".to_string(),
            cell_name_key: "$batch(CellName)".to_string(),
            edition_number_key: "$batch(EditionNumber)".to_string(),
            update_number_key: "$batch(UpdateNumber)".to_string(),
            product_clause: Some("$batch(ProductCode) eq 'AVCS'".to_string()),
        }
    }
}

/// Quote a literal for an OData expression.
fn literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

impl SearchFilterTemplate {
    /// Default attribute names restricted to `product_code`, or unrestricted.
    pub fn for_product_code(product_code: Option<&str>) -> Self {
        Self {
            product_clause: product_code.map(|code| format!("$batch(ProductCode) eq {}", literal(code))),
            ..Self::default()
        }
    }

    /// Build the filter for a product set within one business unit.
    ///
    /// Each product contributes one group per edition it is searched under:
    /// its own edition for ordinary updates, and the cancellation edition for
    /// the cancelled update. Groups are ORed; the result is ANDed with the
    /// business unit and the product clause. Products without updates are
    /// left out.
    pub fn build(&self, products: &[Product], business_unit: &str) -> String {
        let groups: Vec<String> = products
            .iter()
            .flat_map(|product| self.product_groups(product))
            .collect();

        let mut filter = format!("{} eq {}", self.business_unit_key, literal(business_unit));
        if let Some(clause) = &self.product_clause {
            filter.push_str(" and ");
            filter.push_str(clause);
        }
        if !groups.is_empty() {
            filter.push_str(" and (");
            filter.push_str(&groups.join(" or "));
            filter.push(')');
        }
        filter
    }

    fn product_groups(&self, product: &Product) -> Vec<String> {
        let mut by_edition: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
        for &update in &product.update_numbers {
            by_edition
                .entry(product.search_edition_for(update))
                .or_default()
                .push(update);
        }

        by_edition
            .into_iter()
            .map(|(edition, updates)| {
                let updates = updates
                    .iter()
                    .map(|u| format!("{} eq {}", self.update_number_key, literal(&u.to_string())))
                    .collect::<Vec<_>>()
                    .join(" or ");
                format!(
                    "({} eq {} and {} eq {} and ({}))",
                    self.cell_name_key,
                    literal(&product.product_name),
                    self.edition_number_key,
                    literal(&edition.to_string()),
                    updates
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_product_filter() {
        let template = SearchFilterTemplate::default();
        let filter = template.build(&[Product::new("DE416080", 9, vec![0, 1])], "ADDS");
        assert_eq!(
            filter,
            "BusinessUnit eq 'ADDS' and $batch(ProductCode) eq 'AVCS' and \
             (($batch(CellName) eq 'DE416080' and $batch(EditionNumber) eq '9' and \
             ($batch(UpdateNumber) eq '0' or $batch(UpdateNumber) eq '1')))"
        );
    }

    #[test]
    fn test_product_code_clause() {
        assert_eq!(
            SearchFilterTemplate::for_product_code(Some("AVCS")),
            SearchFilterTemplate::default()
        );
        assert_eq!(SearchFilterTemplate::for_product_code(None).product_clause, None);
    }

    #[test]
    fn test_products_are_ored() {
        let template = SearchFilterTemplate {
            product_clause: None,
            ..Default::default()
        };
        let filter = template.build(
            &[
                Product::new("DE416080", 9, vec![0]),
                Product::new("GB100001", 3, vec![2]),
            ],
            "ADDS",
        );
        assert!(filter.starts_with("BusinessUnit eq 'ADDS' and ("));
        assert!(filter.contains("'DE416080'"));
        assert!(filter.contains(") or ($batch(CellName) eq 'GB100001'"));
        assert!(!filter.contains("ProductCode"));
    }

    #[test]
    fn test_cancellation_update_searched_under_cancellation_edition() {
        let template = SearchFilterTemplate::default();
        let product = Product::new("GB100001", 4, vec![1, 2]).with_cancellation(5, 2);
        let filter = template.build(&[product], "ADDS");
        assert!(filter.contains(
            "$batch(EditionNumber) eq '4' and ($batch(UpdateNumber) eq '1')"
        ));
        assert!(filter.contains(
            "$batch(EditionNumber) eq '5' and ($batch(UpdateNumber) eq '2')"
        ));
    }

    #[test]
    fn test_literals_are_escaped() {
        let template = SearchFilterTemplate::default();
        let filter = template.build(&[], "O'Brien");
        assert!(filter.starts_with("BusinessUnit eq 'O''Brien'"));
    }

    #[test]
    fn test_products_without_updates_are_skipped() {
        let template = SearchFilterTemplate::default();
        let filter = template.build(&[Product::new("DE416080", 9, vec![])], "ADDS");
        assert_eq!(
            filter,
            "BusinessUnit eq 'ADDS' and $batch(ProductCode) eq 'AVCS'"
        );
    }
}
