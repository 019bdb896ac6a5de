//! Output formatting shared by the reporting commands

use chrono::{DateTime, Utc};
use comfy_table::{presets::UTF8_FULL_CONDENSED, Cell, Color, ContentArrangement, Table};

/// Print a table with custom column colors
pub fn print_table_colored(headers: &[&str], rows: Vec<Vec<(String, Option<Color>)>>) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic);

    let header_cells: Vec<Cell> = headers
        .iter()
        .map(|h| Cell::new(h).fg(Color::Cyan))
        .collect();
    table.set_header(header_cells);

    for row in rows {
        let cells: Vec<Cell> = row
            .into_iter()
            .map(|(text, color)| match color {
                Some(c) => Cell::new(text).fg(c),
                None => Cell::new(text),
            })
            .collect();
        table.add_row(cells);
    }

    println!("{}", table);
}

/// Format a timestamp relative to `now`
///
/// Examples:
/// - "5 seconds ago"
/// - "3 hours ago"
/// - "2024-12-15 14:30" (if older than a week)
pub fn format_time_ago(time: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - time).num_seconds();
    if secs < 0 {
        return "just now".to_string();
    }

    let plural = |n: i64| if n == 1 { "" } else { "s" };
    if secs < 60 {
        format!("{} second{} ago", secs, plural(secs))
    } else if secs < 3600 {
        let mins = secs / 60;
        format!("{} minute{} ago", mins, plural(mins))
    } else if secs < 86400 {
        let hours = secs / 3600;
        format!("{} hour{} ago", hours, plural(hours))
    } else if secs < 604800 {
        let days = secs / 86400;
        format!("{} day{} ago", days, plural(days))
    } else {
        time.format("%Y-%m-%d %H:%M").to_string()
    }
}

/// Render a 0.0..=1.0 fraction as a fixed-width bar
pub fn progress_bar(fraction: f64, width: usize) -> String {
    let filled = ((fraction.clamp(0.0, 1.0) * width as f64).round() as usize).min(width);
    format!("[{}{}]", "#".repeat(filled), "-".repeat(width - filled))
}
