//! Output formatting for the CLI.

use crate::error::Result;
use console::{style, Style};
use serde::Serialize;
use std::fmt::Display;
use tabled::{settings::Style as TableStyle, Table, Tabled};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

/// Render rows in the requested format.
pub fn render_rows<T: Serialize + Tabled>(rows: &[T], format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Table if rows.is_empty() => Ok(style("No results found").dim().to_string()),
        OutputFormat::Table => Ok(Table::new(rows).with(TableStyle::rounded()).to_string()),
        OutputFormat::Json => Ok(serde_json::to_string_pretty(rows)?),
    }
}

/// Format and print rows in the specified format.
pub fn print_output<T: Serialize + Tabled>(rows: &[T], format: OutputFormat) -> Result<()> {
    println!("{}", render_rows(rows, format)?);
    Ok(())
}

/// Success message
pub fn success(msg: impl Display) {
    println!("{} {}", style("✓").green().bold(), msg);
}

/// Error message
pub fn error(msg: impl Display) {
    eprintln!("{} {}", style("✗").red().bold(), msg);
}

/// Print a key-value pair
pub fn print_kv(key: &str, value: impl Display) {
    let key_style = Style::new().cyan().bold();
    println!("{}: {}", key_style.apply_to(key), value);
}

/// Format bytes as human-readable size
pub fn format_bytes(bytes: u64) -> String {
    humansize::format_size(bytes, humansize::BINARY)
}

/// Quota limit, where 0 means no limit.
pub fn format_limit(limit: u64, bytes: bool) -> String {
    match (limit, bytes) {
        (0, _) => "unlimited".to_string(),
        (n, true) => format_bytes(n),
        (n, false) => n.to_string(),
    }
}
