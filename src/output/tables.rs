use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color as TableColor, ContentArrangement, Table};

use crate::model::{CancelOutcome, PipelineStatus};

/// Table and cell creation helpers
pub fn create_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

pub fn create_cyan_header(labels: &[&str]) -> Vec<Cell> {
    labels
        .iter()
        .map(|label| Cell::new(*label).fg(TableColor::Cyan))
        .collect()
}

pub fn pipeline_status_cell(status: PipelineStatus) -> Cell {
    let color = match status {
        PipelineStatus::Success => TableColor::Green,
        PipelineStatus::Pending | PipelineStatus::Running => TableColor::Yellow,
        PipelineStatus::Failure | PipelineStatus::Cancelled => TableColor::Red,
        PipelineStatus::Unknown => TableColor::DarkGrey,
    };
    Cell::new(status.to_string()).fg(color)
}

pub fn cancel_outcome_cell(outcome: CancelOutcome) -> Cell {
    match outcome {
        CancelOutcome::Cancelled => Cell::new("cancelled").fg(TableColor::Green),
        CancelOutcome::Failed => Cell::new("failed").fg(TableColor::Red),
        CancelOutcome::Skipped => Cell::new("skipped").fg(TableColor::DarkGrey),
    }
}

pub fn synced_cell(synced: bool) -> Cell {
    if synced {
        Cell::new("synced").fg(TableColor::Green)
    } else {
        Cell::new("not synced").fg(TableColor::Red)
    }
}

pub fn optional_cell(value: Option<&str>) -> Cell {
    value.map_or_else(|| Cell::new("-").fg(TableColor::DarkGrey), Cell::new)
}
