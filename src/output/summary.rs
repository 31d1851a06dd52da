use std::fmt::Write;

use comfy_table::Cell;

use crate::model::{short_sha, CancelResult, Pipeline};
use crate::providers::sbom::SbomSummary;
use crate::workflow::{BuildReport, DrainOutcome, PromotionReport};

use super::styling::{bright, bright_green, bright_red, bright_yellow, cyan, dim};
use super::tables::{
    cancel_outcome_cell, create_cyan_header, create_table, optional_cell, pipeline_status_cell,
    synced_cell,
};

/// Prints the outcome of a bulk cancellation: counters, one row per
/// pipeline seen, and any provider or accounting errors.
pub fn print_cancel_summary(result: &CancelResult) {
    println!("{}", render_cancel_summary(result));
}

pub fn print_build_summary(report: &BuildReport) {
    println!("{}", render_build_summary(report));
}

pub fn print_promotion_summary(reports: &[PromotionReport]) {
    println!("{}", render_promotion_summary(reports));
}

pub fn print_drain_summary(outcome: &DrainOutcome) {
    println!("{}", render_drain_summary(outcome));
}

pub fn print_sbom_summary(image: &str, sbom: &SbomSummary) {
    println!("{}", render_sbom_summary(image, sbom));
}

fn add_section_header(output: &mut String, emoji: &str, title: &str) {
    let _ = writeln!(output, "{} {}", bright(emoji), bright(title).underlined());
}

fn pipelines_table(pipelines: &[Pipeline]) -> String {
    let mut table = create_table();
    table.set_header(create_cyan_header(&["Pipeline", "Repository", "Revision", "Status", "URL"]));
    for pipeline in pipelines {
        table.add_row(vec![
            Cell::new(pipeline.display_name()),
            Cell::new(&pipeline.repository),
            Cell::new(short_sha(&pipeline.sha)),
            pipeline_status_cell(pipeline.status),
            optional_cell(pipeline.web_url.as_deref()),
        ]);
    }
    table.to_string()
}

fn render_cancel_summary(result: &CancelResult) -> String {
    let mut output = String::new();

    add_section_header(&mut output, "🛑", "Pipeline Cancellation");
    let _ = writeln!(
        output,
        "  {} {}\n  {} {}\n  {} {}\n  {} {}\n",
        dim("Pipelines seen:"),
        bright_yellow(result.total),
        dim("Cancelled:"),
        bright_green(result.cancelled),
        dim("Failed:"),
        if result.failed > 0 {
            bright_red(result.failed)
        } else {
            dim(result.failed)
        },
        dim("Skipped:"),
        dim(result.skipped),
    );

    if result.details.is_empty() {
        let _ = writeln!(output, "{}", bright_yellow("No pipelines found."));
        return output;
    }

    let mut table = create_table();
    table.set_header(create_cyan_header(&[
        "Pipeline",
        "Repository",
        "Branch",
        "Outcome",
        "Reason",
    ]));
    for detail in &result.details {
        table.add_row(vec![
            Cell::new(detail.name.as_deref().unwrap_or(&detail.pipeline_id)),
            Cell::new(&detail.repository),
            optional_cell(detail.branch.as_deref()),
            cancel_outcome_cell(detail.outcome),
            optional_cell(detail.reason.as_deref()),
        ]);
    }
    let _ = writeln!(output, "{table}\n");

    if !result.errors.is_empty() {
        add_section_header(&mut output, "⚠️", "Errors");
        for error in &result.errors {
            let code = match (error.status_code, &error.provider_code) {
                (Some(status), Some(code)) => format!(" [{status} {code}]"),
                (Some(status), None) => format!(" [{status}]"),
                _ => String::new(),
            };
            let _ = writeln!(
                output,
                "  {} {}{}",
                bright_red(format!("{:?}", error.kind).to_lowercase()),
                error.message,
                dim(code)
            );
        }
    }

    output
}

fn render_build_summary(report: &BuildReport) -> String {
    let mut output = String::new();

    add_section_header(&mut output, "🏗️", "Source Build");
    let _ = writeln!(
        output,
        "  {} {:?}\n  {} {}\n  {} {}\n  {} {}\n",
        dim("Variant:"),
        report.variant,
        dim("Change:"),
        cyan(report.reference.describe()),
        dim("GitOps revision:"),
        cyan(short_sha(&report.gitops_revision)),
        dim("Development image:"),
        cyan(&report.image),
    );
    let _ = writeln!(output, "{}\n", pipelines_table(&report.pipelines));
    let _ = writeln!(output, "  {} {}", dim("Sync:"), dim(&report.sync.status));

    output
}

fn render_promotion_summary(reports: &[PromotionReport]) -> String {
    let mut output = String::new();

    add_section_header(&mut output, "🚢", "Promotions");
    if reports.is_empty() {
        let _ = writeln!(output, "{}", bright_yellow("Nothing was promoted."));
        return output;
    }

    let mut table = create_table();
    table.set_header(create_cyan_header(&[
        "Environment",
        "Image",
        "Change",
        "Pipeline",
        "Deployment",
    ]));
    for report in reports {
        table.add_row(vec![
            Cell::new(report.environment),
            Cell::new(&report.image),
            Cell::new(report.reference.describe()),
            pipeline_status_cell(report.pipeline.status),
            synced_cell(report.sync.synced),
        ]);
    }
    let _ = writeln!(output, "{table}");

    output
}

fn render_drain_summary(outcome: &DrainOutcome) -> String {
    match outcome {
        DrainOutcome::Cancelled(result) => render_cancel_summary(result),
        DrainOutcome::Drained { idle } => {
            let mut output = String::new();
            add_section_header(&mut output, "⏳", "Pipeline Runs");
            let state = if *idle {
                bright_green("All pipeline runs finished.")
            } else {
                bright_yellow("Pipeline runs still active after the timeout.")
            };
            let _ = writeln!(output, "  {state}");
            output
        }
    }
}

fn render_sbom_summary(image: &str, sbom: &SbomSummary) -> String {
    let mut output = String::new();

    add_section_header(&mut output, "📜", "SBOM");
    let published = sbom
        .published
        .map_or_else(|| "-".to_string(), |at| at.format("%Y-%m-%d %H:%M UTC").to_string());
    let _ = writeln!(
        output,
        "  {} {}\n  {} {}\n  {} {}\n  {} {}\n  {} {}",
        dim("Image:"),
        cyan(image),
        dim("SBOM id:"),
        bright_green(&sbom.id),
        dim("Name:"),
        sbom.name,
        dim("Document id:"),
        sbom.document_id.as_deref().unwrap_or("-"),
        dim("Published:"),
        dim(published),
    );

    output
}
