//! Display utilities for CLI output formatting.
//!
//! Table rendering for the human-readable output format, sized to the
//! terminal, plus small truncation helpers for narrow columns.

use tabled::settings::{Style, Width};
use tabled::{Table, Tabled};
use terminal_size::{Width as TerminalWidth, terminal_size};

/// Render rows as a table styled for terminal output. The table is truncated
/// to the terminal width when one can be detected.
pub(crate) fn render_table<T: Tabled>(rows: impl IntoIterator<Item = T>) -> String {
    let mut table = Table::new(rows);
    table.with(Style::psql());

    if let Some((TerminalWidth(width), _)) = terminal_size() {
        table.with(Width::truncate(width as usize));
    }

    table.to_string()
}

/// Truncates a string to fit within the specified maximum length, appending
/// "..." when content was cut. Works on character boundaries.
pub(crate) fn truncate_string(s: &str, max_len: usize) -> String {
    let chars: Vec<char> = s.chars().collect();

    if chars.len() <= max_len {
        s.to_string()
    } else {
        let available_chars = max_len.saturating_sub(3);
        if available_chars == 0 {
            "...".to_string()
        } else {
            let truncated: String = chars[..available_chars].iter().collect();
            format!("{}...", truncated)
        }
    }
}
