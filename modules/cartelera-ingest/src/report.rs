//! Per-run results and the end-of-run summary.

use std::collections::BTreeMap;
use std::time::Duration;

use cartelera_common::SourceTier;

/// Everything one source run produced, for the CLI/reporting layer.
#[derive(Debug)]
pub struct PipelineResult {
    pub source_slug: String,
    pub source_name: String,
    pub region: String,
    pub tier: Option<SourceTier>,

    pub raw_count: u32,
    pub parsed_count: u32,
    pub skipped_past: u32,
    pub batch_duplicates: u32,
    pub limited_count: u32,
    pub requested_limit: Option<usize>,
    /// False when the source had fewer events than requested.
    pub limit_reached: bool,

    pub enriched_count: u32,
    pub images_found: u32,

    pub inserted: u32,
    pub updated: u32,
    pub skipped: u32,
    pub failed: u32,

    pub categories: BTreeMap<String, u32>,
    pub regions: BTreeMap<String, u32>,

    pub success: bool,
    pub error: Option<String>,
    pub dry_run: bool,
    pub duration: Duration,
}

impl PipelineResult {
    pub fn new(source_slug: impl Into<String>) -> Self {
        Self {
            source_slug: source_slug.into(),
            source_name: String::new(),
            region: String::new(),
            tier: None,
            raw_count: 0,
            parsed_count: 0,
            skipped_past: 0,
            batch_duplicates: 0,
            limited_count: 0,
            requested_limit: None,
            limit_reached: true,
            enriched_count: 0,
            images_found: 0,
            inserted: 0,
            updated: 0,
            skipped: 0,
            failed: 0,
            categories: BTreeMap::new(),
            regions: BTreeMap::new(),
            success: false,
            error: None,
            dry_run: false,
            duration: Duration::ZERO,
        }
    }
}

impl std::fmt::Display for PipelineResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== {} ===", self.source_slug)?;
        if let Some(error) = &self.error {
            return writeln!(f, "ERROR: {error}");
        }
        writeln!(f, "Raw:           {}", self.raw_count)?;
        writeln!(f, "Parsed:        {}", self.parsed_count)?;
        writeln!(f, "Past dropped:  {}", self.skipped_past)?;
        if self.batch_duplicates > 0 {
            writeln!(f, "Batch dupes:   {}", self.batch_duplicates)?;
        }
        writeln!(f, "Processed:     {}", self.limited_count)?;
        writeln!(f, "Enriched:      {}", self.enriched_count)?;
        writeln!(f, "Images found:  {}", self.images_found)?;
        if self.dry_run {
            writeln!(f, "DRY RUN, nothing persisted")?;
        } else {
            writeln!(
                f,
                "Persisted:     {} inserted, {} updated, {} skipped, {} failed",
                self.inserted, self.updated, self.skipped, self.failed
            )?;
        }
        if !self.categories.is_empty() {
            let cats: Vec<String> = self
                .categories
                .iter()
                .map(|(slug, count)| format!("{slug}: {count}"))
                .collect();
            writeln!(f, "Categories:    {}", cats.join(", "))?;
        }
        writeln!(f, "Duration:      {:.1}s", self.duration.as_secs_f64())?;
        Ok(())
    }
}

/// The final summary table over every processed source.
pub fn summary_table(results: &[PipelineResult]) -> String {
    let mut out = String::new();
    out.push_str("\n==================== SUMMARY ====================\n");
    out.push_str(&format!(
        "{:<28} {:>7} {:>9} {:>8} {:>7}  {}\n",
        "Source", "Parsed", "Inserted", "Updated", "Skipped", "Status"
    ));

    let mut totals = (0u32, 0u32, 0u32, 0u32);
    for r in results {
        totals.0 += r.parsed_count;
        totals.1 += r.inserted;
        totals.2 += r.updated;
        totals.3 += r.skipped;

        let status = if !r.success {
            "ERR"
        } else if r.dry_run {
            "DRY"
        } else {
            "OK"
        };
        out.push_str(&format!(
            "{:<28} {:>7} {:>9} {:>8} {:>7}  {}\n",
            truncate(&r.source_slug, 28),
            r.parsed_count,
            r.inserted,
            r.updated,
            r.skipped,
            status
        ));
    }

    out.push_str(&format!(
        "{:<28} {:>7} {:>9} {:>8} {:>7}\n",
        "TOTAL", totals.0, totals.1, totals.2, totals.3
    ));
    out
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_includes_totals_and_status() {
        let mut ok = PipelineResult::new("madrid_datos_abiertos");
        ok.parsed_count = 10;
        ok.inserted = 8;
        ok.skipped = 2;
        ok.success = true;

        let mut err = PipelineResult::new("euskadi_kulturklik");
        err.success = false;
        err.error = Some("HTTP 500".to_string());

        let table = summary_table(&[ok, err]);
        assert!(table.contains("madrid_datos_abiertos"));
        assert!(table.contains("OK"));
        assert!(table.contains("ERR"));
        assert!(table.contains("TOTAL"));
    }

    #[test]
    fn display_shows_error_line_on_failure() {
        let mut r = PipelineResult::new("x");
        r.error = Some("unknown source".to_string());
        let text = format!("{r}");
        assert!(text.contains("ERROR: unknown source"));
    }
}
