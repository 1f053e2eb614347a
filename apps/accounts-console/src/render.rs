//! Plain-text rendering of snapshots and acknowledgments for the terminal console.

use std::io::{self, Write};

use chrono::{DateTime, Utc};

use crate::actions::Acknowledgment;
use crate::model::AccountRow;
use crate::synchronizer::{AccountListSnapshot, AccountListView};

const HEADERS: [&str; 4] = ["NAME", "PLAN", "TYPE", "STARTED"];

pub fn render_snapshot(out: &mut impl Write, snapshot: &AccountListSnapshot) -> io::Result<()> {
    match &snapshot.view {
        AccountListView::LoadFailed { message } => writeln!(out, "API error: {message}"),
        AccountListView::Accounts(rows) if rows.is_empty() => {
            if snapshot.generation == 0 {
                writeln!(out, "loading accounts...")
            } else {
                writeln!(out, "no accounts")
            }
        }
        AccountListView::Accounts(rows) => render_table(out, rows),
    }
}

fn render_table(out: &mut impl Write, rows: &[AccountRow]) -> io::Result<()> {
    let cells: Vec<[String; 4]> = rows
        .iter()
        .map(|row| {
            [
                row.workflow_id().to_string(),
                row.plan.as_str().to_string(),
                row.type_name().to_string(),
                format_started(row.record.start_time),
            ]
        })
        .collect();

    let mut widths = HEADERS.map(str::len);
    for row in &cells {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    write_row(out, &widths, &HEADERS.map(ToString::to_string))?;
    for row in &cells {
        write_row(out, &widths, row)?;
    }
    Ok(())
}

fn write_row(out: &mut impl Write, widths: &[usize; 4], cells: &[String; 4]) -> io::Result<()> {
    let line = cells
        .iter()
        .zip(widths)
        .map(|(cell, &width)| format!("{cell:<width$}"))
        .collect::<Vec<_>>()
        .join("  ");
    writeln!(out, "{}", line.trim_end())
}

fn format_started(start_time: Option<DateTime<Utc>>) -> String {
    start_time.map_or_else(
        || "-".to_string(),
        |value| value.format("%Y-%m-%d %H:%M:%S").to_string(),
    )
}

pub fn render_acknowledgment(out: &mut impl Write, ack: &Acknowledgment) -> io::Result<()> {
    writeln!(
        out,
        "[{}] {} {}",
        ack.level.label(),
        ack.title,
        ack.description
    )
}
