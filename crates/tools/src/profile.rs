//! Shape detection for user-supplied data before it goes to the model.

use serde_json::Value;

/// What we could tell about a blob of data.
#[derive(Debug, Clone, PartialEq)]
pub struct DataProfile {
    pub row_count: usize,
    pub is_numeric: bool,
    pub headers: Option<Vec<String>>,
    pub preview: String,
}

const PREVIEW_NUMBERS: usize = 10;

/// Profile `data` as a JSON array, a delimited table, or a loose list of numbers.
///
/// Returns `None` when none of those readings yields anything.
pub fn profile_data(data: &str) -> Option<DataProfile> {
    if let Ok(Value::Array(rows)) = serde_json::from_str::<Value>(data) {
        let headers = rows
            .first()
            .and_then(Value::as_object)
            .map(|first| first.keys().cloned().collect())
            .unwrap_or_default();
        let head: Vec<&Value> = rows.iter().take(3).collect();
        return Some(DataProfile {
            row_count: rows.len(),
            is_numeric: false,
            headers: Some(headers),
            preview: serde_json::to_string_pretty(&head).unwrap_or_default(),
        });
    }

    let lines: Vec<&str> = data.trim().lines().collect();
    if let Some(first) = lines.first() {
        let cells: Vec<&str> = split_cells(first).collect();
        if cells.iter().all(|c| leading_number(c).is_some()) {
            let values: Vec<f64> = lines
                .iter()
                .flat_map(|line| split_cells(line).filter_map(leading_number))
                .collect();
            return Some(numeric_profile(&values));
        }

        let rows = lines.len() - 1;
        if rows > 0 {
            return Some(DataProfile {
                row_count: rows,
                is_numeric: false,
                headers: Some(cells.iter().map(|h| h.trim().to_string()).collect()),
                preview: lines.iter().take(4).copied().collect::<Vec<_>>().join("\n"),
            });
        }
    }

    // A single line of prose with numbers in it, e.g. "rent 2400 food 850"
    let numbers: Vec<f64> = data
        .split(|c: char| c.is_whitespace() || c == ',' || c == ';')
        .filter_map(leading_number)
        .collect();
    if numbers.is_empty() {
        return None;
    }
    Some(numeric_profile(&numbers))
}

fn split_cells(line: &str) -> impl Iterator<Item = &str> {
    line.split([',', '\t', ';'])
}

fn numeric_profile(values: &[f64]) -> DataProfile {
    let shown: Vec<String> = values.iter().take(PREVIEW_NUMBERS).map(|v| format_number(*v)).collect();
    let more = if values.len() > PREVIEW_NUMBERS { "..." } else { "" };
    DataProfile {
        row_count: values.len(),
        is_numeric: true,
        headers: None,
        preview: format!("Numbers: {}{more}", shown.join(", ")),
    }
}

/// Parse the numeric prefix of a cell, so `"2400 USD"` reads as 2400.
fn leading_number(cell: &str) -> Option<f64> {
    let s = cell.trim();
    let bytes = s.as_bytes();
    let mut end = 0;

    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end += 1;
    }
    let int_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    let mut digits = end - int_start;
    if end < bytes.len() && bytes[end] == b'.' {
        let frac_start = end + 1;
        let mut frac_end = frac_start;
        while frac_end < bytes.len() && bytes[frac_end].is_ascii_digit() {
            frac_end += 1;
        }
        digits += frac_end - frac_start;
        if digits > 0 {
            end = frac_end;
        }
    }
    if digits == 0 {
        return None;
    }
    if end < bytes.len() && matches!(bytes[end], b'e' | b'E') {
        let mut exp_end = end + 1;
        if matches!(bytes.get(exp_end), Some(b'+' | b'-')) {
            exp_end += 1;
        }
        let exp_digits_start = exp_end;
        while exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
            exp_end += 1;
        }
        if exp_end > exp_digits_start {
            end = exp_end;
        }
    }
    s[..end].parse().ok()
}

/// Render whole numbers without a trailing `.0`.
fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}
