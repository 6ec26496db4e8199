//! Plain-text table rendering for previews, plans and reports.

use std::fmt::Write as _;

use itertools::Itertools;

/// Renders `headers` and `rows` as space-aligned columns with a dashed rule
/// under the header. Cells beyond the header count are dropped; short rows are
/// padded.
pub fn render_table(headers: &[String], rows: &[Vec<String>]) -> String {
    let headers = headers.iter().map(|h| flatten(h)).collect::<Vec<_>>();
    let rows = rows
        .iter()
        .map(|row| {
            (0..headers.len())
                .map(|idx| row.get(idx).map(|cell| flatten(cell)).unwrap_or_default())
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>();

    let widths = (0..headers.len())
        .map(|idx| {
            rows.iter()
                .map(|row| row[idx].chars().count())
                .chain(std::iter::once(headers[idx].chars().count()))
                .max()
                .unwrap_or(0)
                .max(3)
        })
        .collect::<Vec<_>>();

    let mut output = String::new();
    let _ = writeln!(output, "{}", line(&headers, &widths));
    let rule = widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>();
    let _ = writeln!(output, "{}", line(&rule, &widths));
    for row in &rows {
        let _ = writeln!(output, "{}", line(row, &widths));
    }
    output
}

pub fn print_table(headers: &[String], rows: &[Vec<String>]) {
    print!("{}", render_table(headers, rows));
}

/// Two-column `label  value` listing.
pub fn render_pairs(pairs: &[(&str, String)]) -> String {
    let width = pairs.iter().map(|(label, _)| label.len()).max().unwrap_or(0);
    pairs
        .iter()
        .map(|(label, value)| format!("{label:<width$}  {}", flatten(value)))
        .map(|row| row.trim_end().to_string())
        .join("\n")
        + "\n"
}

fn line(cells: &[String], widths: &[usize]) -> String {
    cells
        .iter()
        .zip(widths)
        .map(|(cell, width)| format!("{cell:<width$}"))
        .join("  ")
        .trim_end()
        .to_string()
}

fn flatten(value: &str) -> String {
    value.replace(['\r', '\n', '\t'], " ")
}
