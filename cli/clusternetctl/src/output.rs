//! Run summary formatting.

use clap::ValueEnum;
use clusternet_reconcile::{ClusterOutcome, ClusterStatus, RunSummary};
use colored::Colorize;
use tabled::settings::Style;
use tabled::{Table, Tabled};

/// Output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table format.
    #[default]
    Table,
    /// JSON format.
    Json,
}

/// One processed cluster.
#[derive(Debug, Tabled)]
struct ClusterRow {
    #[tabled(rename = "CLUSTER")]
    cluster: String,
    #[tabled(rename = "MCE")]
    mce: String,
    #[tabled(rename = "STATUS")]
    status: String,
    #[tabled(rename = "VLAN")]
    vlan: String,
    #[tabled(rename = "SEGMENT")]
    segment: String,
    #[tabled(rename = "NETWORKS")]
    networks: String,
}

/// One failed cluster.
#[derive(Debug, Tabled)]
struct FailureRow {
    #[tabled(rename = "PATH")]
    path: String,
    #[tabled(rename = "KIND")]
    kind: String,
    #[tabled(rename = "ERROR")]
    error: String,
}

fn or_dash(value: Option<String>) -> String {
    value.unwrap_or_else(|| "-".to_string())
}

impl From<&ClusterOutcome> for ClusterRow {
    fn from(o: &ClusterOutcome) -> Self {
        Self {
            cluster: o.display_name(),
            mce: or_dash(o.mce_name.clone()),
            status: o.status.to_string(),
            vlan: or_dash(o.vlan_id.map(|v| v.to_string())),
            segment: or_dash(o.cluster_segment.map(|s| s.to_string())),
            networks: match o.mce_segment {
                Some(mce) => format!("<-> {mce}"),
                None if o.vlan_id.is_some() => "vlanId only".to_string(),
                None => "-".to_string(),
            },
        }
    }
}

impl From<&ClusterOutcome> for FailureRow {
    fn from(o: &ClusterOutcome) -> Self {
        Self {
            path: o.path.display().to_string(),
            kind: o.error_kind.unwrap_or("error").to_string(),
            error: o.detail.clone().unwrap_or_default(),
        }
    }
}

/// Print the run summary in the requested format.
pub fn print_summary(summary: &RunSummary, format: OutputFormat) {
    match format {
        OutputFormat::Table => print_table(summary),
        OutputFormat::Json => println!("{}", format_json(summary)),
    }
}

/// JSON rendering of the summary.
pub fn format_json(summary: &RunSummary) -> String {
    let value = serde_json::to_value(summary).unwrap_or_else(|_| serde_json::json!({}));
    let counts =
        serde_json::to_value(summary.counts()).unwrap_or_else(|_| serde_json::json!({}));
    let wrapped = serde_json::json!({ "summary": value, "counts": counts });
    serde_json::to_string_pretty(&wrapped).unwrap_or_else(|_| "{}".to_string())
}

fn print_table(summary: &RunSummary) {
    if summary.dry_run {
        print_info("DRY-RUN: no descriptor was written.");
    }
    if summary.mock_allocation {
        print_warning("Allocator service was unavailable; VLANs and segments are mock values.");
    }

    let rows: Vec<ClusterRow> = summary
        .outcomes
        .iter()
        .filter(|o| o.status != ClusterStatus::Skipped)
        .map(ClusterRow::from)
        .collect();
    if rows.is_empty() {
        println!("{}", "No clusters needed allocation.".dimmed());
    } else {
        let mut table = Table::new(rows);
        table.with(Style::sharp());
        println!("{table}");
    }

    let counts = summary.counts();
    println!(
        "\n{} {} processed in {:.1}s: {} updated, {} unchanged, {} skipped, {} failed",
        "Summary:".bold(),
        summary.outcomes.len(),
        summary.elapsed.as_secs_f64(),
        counts.updated.to_string().green(),
        counts.unchanged,
        counts.skipped.to_string().dimmed(),
        if counts.failed > 0 {
            counts.failed.to_string().red().bold()
        } else {
            counts.failed.to_string().normal()
        },
    );

    if summary.has_failures() {
        let failures: Vec<FailureRow> = summary.failures().map(FailureRow::from).collect();
        let mut table = Table::new(failures);
        table.with(Style::sharp());
        println!("\n{}\n{table}", "Failed clusters:".red().bold());
    }

    if summary.interrupted {
        print_warning("Interrupted: remaining clusters were not processed.");
    } else if !summary.has_failures() {
        print_success("All clusters reconciled.");
    }
}

/// Print a success message.
pub fn print_success(message: &str) {
    println!("{} {}", "Success:".green().bold(), message);
}

/// Print an info message.
pub fn print_info(message: &str) {
    println!("{} {}", "Info:".blue().bold(), message);
}

/// Print a warning message.
pub fn print_warning(message: &str) {
    println!("{} {}", "Warning:".yellow().bold(), message);
}
