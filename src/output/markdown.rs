//! Markdown summary generation
//!
//! This module generates the human-readable `summary.md` packed into every
//! run archive: run information, statistics, breakdowns and failures.

use crate::archive::RunMetadata;
use crate::output::stats::top_domains;
use crate::state::FetchOutcome;
use crate::storage::simple_mime;
use std::collections::BTreeMap;

/// Rows shown in the top domains and failures tables
const TABLE_LIMIT: usize = 20;

/// Formats a run as markdown
///
/// # Arguments
///
/// * `metadata` - The run's archive metadata
///
/// # Returns
///
/// A formatted markdown string
pub fn format_markdown_summary(metadata: &RunMetadata) -> String {
    let stats = &metadata.stats;
    let mut md = String::new();

    md.push_str("# Sumi-Scroll Run Summary\n\n");

    // Run metadata
    md.push_str("## Run Information\n\n");
    md.push_str(&format!("- **Run ID**: {}\n", metadata.run_id));
    md.push_str(&format!("- **Start URL**: {}\n", metadata.start_url));
    md.push_str(&format!("- **Started**: {}\n", metadata.started_at));
    if let Some(finished) = &metadata.finished_at {
        md.push_str(&format!("- **Finished**: {}\n", finished));
    }
    md.push_str(&format!(
        "- **Duration**: {:.2} seconds ({:.2} minutes)\n",
        stats.elapsed_seconds,
        stats.elapsed_seconds / 60.0
    ));
    md.push_str(&format!("- **Status**: {}\n", metadata.status.to_db_string()));
    md.push_str(&format!("- **Config Hash**: {}\n", metadata.config_hash));
    if let Some(error) = &metadata.error {
        md.push_str(&format!("- **Error**: {}\n", error));
    }
    md.push('\n');

    // Crawl settings
    let config = &metadata.config;
    md.push_str("## Crawl Settings\n\n");
    md.push_str("| Setting | Value |\n");
    md.push_str("|---------|-------|\n");
    md.push_str(&format!("| Max Depth | {} |\n", config.max_depth));
    md.push_str(&format!("| Max Pages | {} |\n", config.max_pages));
    md.push_str(&format!("| Max Pages per Domain | {} |\n", config.max_pages_per_domain));
    md.push_str(&format!("| Workers | {} |\n", config.max_workers));
    md.push_str(&format!("| Request Delay | {}s |\n", config.request_delay));
    md.push_str(&format!("| Respect robots.txt | {} |\n", config.respect_robots_txt));
    md.push_str(&format!("| Skip Assets | {} |\n\n", config.skip_assets));

    // Overall statistics
    md.push_str("## Overall Statistics\n\n");
    md.push_str(&format!("- **Resources Stored**: {}\n", stats.pages_scraped));
    md.push_str(&format!("- **Assets Stored**: {}\n", stats.assets_stored));
    md.push_str(&format!("- **Failed**: {}\n", stats.pages_failed));
    md.push_str(&format!("- **Skipped**: {}\n", stats.pages_skipped));
    md.push_str(&format!("- **Domains**: {}\n", stats.total_domains));
    md.push_str(&format!("- **Bytes Downloaded**: {}\n", stats.bytes_downloaded));
    md.push_str(&format!("- **Bytes Stored**: {}\n", stats.bytes_stored));
    md.push_str(&format!("- **Throughput**: {:.2} resources/sec\n\n", stats.pages_per_second));

    let stored: Vec<_> = metadata
        .records
        .iter()
        .filter(|r| r.outcome == FetchOutcome::Ok)
        .collect();

    // Depth breakdown
    if !stored.is_empty() {
        let mut depths: BTreeMap<u32, u64> = BTreeMap::new();
        let mut types: BTreeMap<String, u64> = BTreeMap::new();
        for record in &stored {
            *depths.entry(record.depth).or_insert(0) += 1;
            *types.entry(simple_mime(record.content_type.as_deref())).or_insert(0) += 1;
        }

        md.push_str("## Depth Breakdown\n\n");
        md.push_str("| Depth | Resources |\n");
        md.push_str("|-------|-----------|\n");
        for (depth, count) in &depths {
            md.push_str(&format!("| {} | {} |\n", depth, count));
        }
        md.push('\n');

        md.push_str("## Content Types\n\n");
        md.push_str("| Type | Resources |\n");
        md.push_str("|------|-----------|\n");
        for (content_type, count) in &types {
            md.push_str(&format!("| {} | {} |\n", content_type, count));
        }
        md.push('\n');
    }

    // Top domains
    if !stats.domain_counts.is_empty() {
        md.push_str(&format!("## Top {} Domains\n\n", TABLE_LIMIT));
        md.push_str("| Domain | Resources |\n");
        md.push_str("|--------|-----------|\n");
        for (domain, count) in top_domains(&stats.domain_counts, TABLE_LIMIT) {
            md.push_str(&format!("| {} | {} |\n", domain, count));
        }
        md.push('\n');
    }

    // Failures
    let failures: Vec<_> = metadata
        .records
        .iter()
        .filter(|r| r.outcome == FetchOutcome::Failed)
        .collect();
    if !failures.is_empty() {
        md.push_str("## Failures\n\n");
        md.push_str("| URL | Error |\n");
        md.push_str("|-----|-------|\n");
        for record in failures.iter().take(TABLE_LIMIT) {
            md.push_str(&format!(
                "| {} | {} |\n",
                record.url,
                record.error_message.as_deref().unwrap_or("unknown").replace('|', "\\|")
            ));
        }
        if failures.len() > TABLE_LIMIT {
            md.push_str(&format!("\n... and {} more\n", failures.len() - TABLE_LIMIT));
        }
        md.push('\n');
    }

    let soft_failures = stored.iter().filter(|r| r.soft_failure.is_some()).count();
    if soft_failures > 0 {
        md.push_str(&format!(
            "{} resources were stored unoptimized after an optimizer error.\n",
            soft_failures
        ));
    }

    md
}
