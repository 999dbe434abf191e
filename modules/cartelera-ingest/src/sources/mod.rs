//! Bundled source catalog.
//!
//! One entry per provider, grouped by tier. Regions carry their INE
//! community codes. Everything here is static data; the registry indexes it
//! at startup.

mod bronze;
mod gold;
mod silver;

use cartelera_common::{SourceConfig, SourceMeta};

pub fn all() -> Vec<SourceConfig> {
    let mut sources = gold::sources();
    sources.extend(silver::sources());
    sources.extend(bronze::sources());
    sources
}

pub(crate) fn meta(slug: &str, name: &str, region: &str, region_code: &str) -> SourceMeta {
    SourceMeta {
        slug: slug.to_string(),
        name: name.to_string(),
        region: region.to_string(),
        region_code: region_code.to_string(),
        is_active: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn slugs_are_unique() {
        let mut seen = HashSet::new();
        for source in all() {
            assert!(seen.insert(source.slug().to_string()), "duplicate {}", source.slug());
        }
    }

    #[test]
    fn every_source_has_region_code() {
        for source in all() {
            assert!(!source.meta().region_code.is_empty(), "{}", source.slug());
            assert!(!source.meta().region.is_empty(), "{}", source.slug());
        }
    }

    #[test]
    fn catalog_covers_all_tiers() {
        use cartelera_common::SourceTier;
        let sources = all();
        for tier in [SourceTier::Gold, SourceTier::Silver, SourceTier::Bronze] {
            assert!(sources.iter().any(|s| s.tier() == tier), "missing {tier}");
        }
    }
}
