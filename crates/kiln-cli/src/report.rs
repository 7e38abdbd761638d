//! Console output

use anyhow::Result;
use kiln_build::{BuildSummary, ToolRegistry};

pub fn print_available(registry: &ToolRegistry) {
    println!("----- Available compiler and linkers -----");
    for (category, tools) in registry.available_by_category() {
        let names: Vec<&str> = tools.iter().map(|t| t.name()).collect();
        println!("{}: {}", category, names.join(", "));
    }
}

/// Human-readable summary; `verbose` adds per-stage timings
pub fn print_summary(summary: &BuildSummary, verbose: bool) {
    println!("\n{}", "=".repeat(60));
    println!("Build succeeded in {:.2}s", summary.report.total_seconds);
    println!("{}", "=".repeat(60));
    println!("  Workspace: {}", summary.project_workspace.display());
    if !summary.profile.is_empty() {
        println!("  Profile: {}", summary.profile);
    }
    println!(
        "  Files: {} discovered, {} preprocessed, {} compiled",
        summary.stats.files_discovered,
        summary.stats.files_preprocessed,
        summary.stats.files_compiled
    );
    println!(
        "  Cache: {} hits, {} misses",
        summary.stats.cache.hits, summary.stats.cache.misses
    );
    if verbose {
        for timing in &summary.report.stages {
            println!("  {:<12} {:.2}s", timing.stage.name(), timing.seconds);
        }
    }
    if let Some(swept) = summary.swept {
        println!("  Cache sweep: {} removed, {} kept", swept.removed, swept.kept);
    }
    for output in &summary.outputs {
        println!("  {}: {}", summary.link_target, output.display());
    }
    println!("{}", "=".repeat(60));
}

pub fn print_json(summary: &BuildSummary) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(summary)?);
    Ok(())
}
