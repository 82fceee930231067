//! Exchange set staging layouts.

use std::fmt;

/// How downloaded cells are arranged on disk and packaged.
///
/// Passed explicitly through the pipeline so concurrent batches with
/// different layouts never share state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ExchangeSetLayout {
    /// One exchange set folder, packaged as a single zip.
    #[default]
    Standard,
    /// Media folders (`M01X02`, `M02X02`, ...) derived from each product's
    /// bundle location, packaged one zip per media folder.
    LargeMedia,
}

impl ExchangeSetLayout {
    pub fn is_large_media(&self) -> bool {
        matches!(self, Self::LargeMedia)
    }

    /// Parse from a config or CLI string.
    pub fn from_config_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "standard" => Some(Self::Standard),
            "large-media" | "large_media" | "largemedia" => Some(Self::LargeMedia),
            _ => None,
        }
    }
}

impl fmt::Display for ExchangeSetLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Standard => f.write_str("standard"),
            Self::LargeMedia => f.write_str("large-media"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_str() {
        assert_eq!(
            ExchangeSetLayout::from_config_str("Standard"),
            Some(ExchangeSetLayout::Standard)
        );
        assert_eq!(
            ExchangeSetLayout::from_config_str("large_media"),
            Some(ExchangeSetLayout::LargeMedia)
        );
        assert_eq!(ExchangeSetLayout::from_config_str("dvd"), None);
    }

    #[test]
    fn test_display_roundtrips_through_parse() {
        for layout in [ExchangeSetLayout::Standard, ExchangeSetLayout::LargeMedia] {
            assert_eq!(
                ExchangeSetLayout::from_config_str(&layout.to_string()),
                Some(layout)
            );
        }
    }
}
