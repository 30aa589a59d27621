//! Manifest CSV with formula-injection mitigation.

use chrono::SecondsFormat;

use crate::types::ReviewRow;

pub const MANIFEST_HEADER: [&str; 9] = [
    "学号",
    "姓名",
    "部门",
    "提交时间",
    "状态",
    "缺材料",
    "缺失必交项",
    "文件数",
    "总大小(MB)",
];

const FORMULA_TRIGGERS: [char; 4] = ['=', '+', '-', '@'];

/// Trim, then neutralize a leading spreadsheet formula trigger with `'`.
pub fn sanitize_for_csv_formula(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.starts_with(FORMULA_TRIGGERS) {
        format!("'{}", trimmed)
    } else {
        trimmed.to_string()
    }
}

/// Quote every cell, doubling embedded quotes.
pub fn escape_csv_cell(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

pub fn csv_cell(value: &str) -> String {
    escape_csv_cell(&sanitize_for_csv_formula(value))
}

fn csv_line<S: AsRef<str>>(cells: &[S]) -> String {
    cells
        .iter()
        .map(|c| csv_cell(c.as_ref()))
        .collect::<Vec<_>>()
        .join(",")
}

fn manifest_cells(row: &ReviewRow) -> [String; 9] {
    [
        row.student_no.clone(),
        row.user_name.clone(),
        row.department_names.join(" / "),
        row.submitted_at
            .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
            .unwrap_or_default(),
        row.status.as_str().to_string(),
        if row.missing_required { "是" } else { "否" }.to_string(),
        row.missing_item_titles.join(" / "),
        row.file_count.to_string(),
        format!("{:.2}", row.total_bytes as f64 / (1024.0 * 1024.0)),
    ]
}

/// Header plus one line per row, `\n` separated, without a trailing newline.
pub fn build_manifest(rows: &[ReviewRow]) -> String {
    let mut lines = Vec::with_capacity(rows.len() + 1);
    lines.push(csv_line(&MANIFEST_HEADER));
    for row in rows {
        lines.push(csv_line(&manifest_cells(row)));
    }
    lines.join("\n")
}
