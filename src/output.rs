use crate::models::ExperimentReport;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// Output format options
#[derive(Debug, Clone, Copy, ValueEnum, Serialize, Deserialize)]
pub enum OutputFormat {
    Plain,
    Json,
}

/// Print the experiment report in the chosen format
pub fn print_report(report: &ExperimentReport, format: OutputFormat) {
    match format {
        OutputFormat::Plain => print!("{}", render_plain(report)),
        OutputFormat::Json => print_json(report),
    }
}

/// Render the comparison table
pub fn render_plain(report: &ExperimentReport) -> String {
    let comparison = &report.comparison;
    let header_a = format!("Prompt {}", comparison.variant_a.to_uppercase());
    let header_b = format!("Prompt {}", comparison.variant_b.to_uppercase());

    let mut out = String::new();
    let _ = writeln!(out);
    let _ = writeln!(out, "{}", "=".repeat(60));
    let _ = writeln!(out, "RESULTS COMPARISON");
    let _ = writeln!(out, "{}", "=".repeat(60));
    let _ = writeln!(
        out,
        "{:<25} {:>12} {:>12} {:>10}",
        "Metric", header_a, header_b, "Winner"
    );
    let _ = writeln!(out, "{}", "-".repeat(60));

    for row in &comparison.rows {
        let _ = writeln!(
            out,
            "{:<25} {:>12.3} {:>12.3} {:>10}",
            row.metric.name(),
            row.value_a,
            row.value_b,
            row.winner.to_string()
        );
    }

    let n_items = report
        .variants
        .first()
        .map(|run| run.result.n_items)
        .unwrap_or(0);
    let _ = writeln!(out);
    let _ = writeln!(out, "Items evaluated: {}", n_items);

    if !report.descriptions.is_empty() {
        let _ = writeln!(out);
        for (label, description) in &report.descriptions {
            let _ = writeln!(out, "Prompt {}: {}", label.to_uppercase(), description);
        }
    }

    out
}

/// Render the report as pretty JSON
pub fn render_json(report: &ExperimentReport) -> serde_json::Result<String> {
    serde_json::to_string_pretty(report)
}

/// Print the report in JSON format
fn print_json(report: &ExperimentReport) {
    match render_json(report) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error serializing results to JSON: {}", e),
    }
}
