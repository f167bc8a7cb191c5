//! Styled terminal output for the exporter CLI
//!
//! Progress and summaries go to stdout through these helpers; diagnostic
//! detail goes through the `log` facade instead.

use owo_colors::OwoColorize;

type Rgb = (u8, u8, u8);

const MINT: Rgb = (152, 225, 152);
const CORAL: Rgb = (255, 160, 160);
const CREAM: Rgb = (255, 230, 160);
const SKY: Rgb = (160, 200, 255);
const LAVENDER: Rgb = (181, 174, 254);
const TEAL: Rgb = (120, 180, 195);
const GREY: Rgb = (160, 160, 160);

/// Resource kind names are the widest cells
const FIRST_COLUMN: usize = 34;
const COLUMN: usize = 9;
const RULE: usize = 78;

fn status_line(symbol: &str, (r, g, b): Rgb, message: &str) -> String {
    format!(
        "{} {}",
        symbol.truecolor(r, g, b).bold(),
        message.bright_white()
    )
}

fn grey(text: &str) -> String {
    let (r, g, b) = GREY;
    text.truecolor(r, g, b).to_string()
}

fn pad_cells(cells: &[&str]) -> Vec<String> {
    cells
        .iter()
        .enumerate()
        .map(|(i, cell)| {
            let width = if i == 0 { FIRST_COLUMN } else { COLUMN };
            format!("{:<width$}", cell, width = width)
        })
        .collect()
}

pub fn success(message: &str) {
    println!("{}", status_line("✓", MINT, message));
}

/// Errors go to stderr so they survive redirecting the summary
pub fn error(message: &str) {
    eprintln!("{}", status_line("✗", CORAL, message));
}

pub fn warning(message: &str) {
    println!("{}", status_line("⚠", CREAM, message));
}

pub fn info(message: &str) {
    println!("{}", status_line("ℹ", SKY, message));
}

/// Section title with a rule underneath
pub fn section(title: &str) {
    let (r, g, b) = LAVENDER;
    println!("\n{}", title.truecolor(r, g, b).bold());
    println!("{}", grey(&"─".repeat(RULE)));
}

pub fn key_value(key: &str, value: &str) {
    println!("  {} {}", grey(&format!("{}:", key)), value.bright_white());
}

pub fn dimmed(message: &str) {
    println!("{}", grey(message));
}

pub fn blank() {
    println!();
}

pub fn table_header(columns: &[&str]) {
    let (r, g, b) = TEAL;
    let header = pad_cells(columns)
        .iter()
        .map(|c| c.truecolor(r, g, b).bold().to_string())
        .collect::<Vec<_>>()
        .join(" │ ");
    println!("  {}", header);
    println!("  {}", grey(&"─".repeat(RULE)));
}

pub fn table_row(values: &[&str]) {
    let row = pad_cells(values)
        .iter()
        .map(|v| v.bright_white().to_string())
        .collect::<Vec<_>>()
        .join(" │ ");
    println!("  {}", row);
}
