//! Process-wide source catalog.
//!
//! Built once at startup from the bundled configs and frozen for the rest of
//! the run. All lookups are over a bounded set (hundreds at most).

use std::collections::{BTreeMap, HashMap};

use cartelera_common::{SourceConfig, SourceTier};

pub struct SourceRegistry {
    sources: HashMap<String, SourceConfig>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self {
            sources: HashMap::new(),
        }
    }

    /// The registry with every bundled source.
    pub fn bundled() -> Self {
        let mut registry = Self::new();
        registry.register_many(crate::sources::all());
        registry
    }

    /// Re-registration of the same slug overwrites.
    pub fn register(&mut self, config: SourceConfig) {
        self.sources.insert(config.slug().to_string(), config);
    }

    pub fn register_many(&mut self, configs: Vec<SourceConfig>) {
        for config in configs {
            self.register(config);
        }
    }

    pub fn get(&self, slug: &str) -> Option<&SourceConfig> {
        self.sources.get(slug)
    }

    /// Active sources of a tier.
    pub fn by_tier(&self, tier: SourceTier) -> Vec<&SourceConfig> {
        let mut matches: Vec<_> = self
            .sources
            .values()
            .filter(|s| s.tier() == tier && s.is_active())
            .collect();
        matches.sort_by(|a, b| a.slug().cmp(b.slug()));
        matches
    }

    /// Active sources of a region (case-insensitive name match).
    pub fn by_region(&self, region: &str) -> Vec<&SourceConfig> {
        let needle = region.to_lowercase();
        let mut matches: Vec<_> = self
            .sources
            .values()
            .filter(|s| s.is_active() && s.meta().region.to_lowercase() == needle)
            .collect();
        matches.sort_by(|a, b| a.slug().cmp(b.slug()));
        matches
    }

    pub fn active(&self) -> Vec<&SourceConfig> {
        let mut matches: Vec<_> = self.sources.values().filter(|s| s.is_active()).collect();
        matches.sort_by(|a, b| a.slug().cmp(b.slug()));
        matches
    }

    pub fn all(&self) -> Vec<&SourceConfig> {
        let mut matches: Vec<_> = self.sources.values().collect();
        matches.sort_by(|a, b| a.slug().cmp(b.slug()));
        matches
    }

    pub fn slugs(&self) -> Vec<&str> {
        let mut slugs: Vec<_> = self.sources.keys().map(String::as_str).collect();
        slugs.sort();
        slugs
    }

    pub fn count(&self) -> usize {
        self.sources.len()
    }

    /// Active source counts per tier.
    pub fn count_by_tier(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for source in self.sources.values() {
            if source.is_active() {
                *counts.entry(source.tier().to_string()).or_insert(0) += 1;
            }
        }
        counts
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cartelera_common::{GoldSource, SourceMeta};

    fn gold(slug: &str, region: &str, active: bool) -> SourceConfig {
        SourceConfig::Gold(GoldSource::new(
            SourceMeta {
                slug: slug.to_string(),
                name: slug.to_string(),
                region: region.to_string(),
                region_code: "XX".to_string(),
                is_active: active,
            },
            "https://example.es/api",
        ))
    }

    #[test]
    fn register_and_get() {
        let mut r = SourceRegistry::new();
        r.register(gold("madrid", "Comunidad de Madrid", true));
        assert!(r.get("madrid").is_some());
        assert!(r.get("nope").is_none());
    }

    #[test]
    fn reregistration_overwrites() {
        let mut r = SourceRegistry::new();
        r.register(gold("madrid", "Comunidad de Madrid", true));
        r.register(gold("madrid", "Andalucía", true));
        assert_eq!(r.count(), 1);
        assert_eq!(r.get("madrid").unwrap().meta().region, "Andalucía");
    }

    #[test]
    fn by_region_is_case_insensitive_and_skips_inactive() {
        let mut r = SourceRegistry::new();
        r.register(gold("a", "Galicia", true));
        r.register(gold("b", "galicia", true));
        r.register(gold("c", "Galicia", false));
        assert_eq!(r.by_region("GALICIA").len(), 2);
    }

    #[test]
    fn count_by_tier_counts_active_only() {
        let mut r = SourceRegistry::new();
        r.register(gold("a", "Galicia", true));
        r.register(gold("b", "Galicia", false));
        let counts = r.count_by_tier();
        assert_eq!(counts.get("gold"), Some(&1));
    }

    #[test]
    fn bundled_catalog_is_consistent() {
        let r = SourceRegistry::bundled();
        assert!(r.count() > 0);
        // Every bundled slug resolves back to itself.
        for slug in r.slugs() {
            assert_eq!(r.get(slug).unwrap().slug(), slug);
        }
    }
}
