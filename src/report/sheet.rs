// src/report/sheet.rs
use chrono::NaiveDate;
use serde_json::{json, Value};

use crate::extractors::register::REGISTRY_DATE_FORMAT;
use crate::extractors::validate::Validation;
use crate::report::record::DocumentRecord;
use crate::report::table::{ResultTable, TableEntry};

/// Title of the single tab in the result spreadsheet
pub const SHEET_TAB_TITLE: &str = "주식변동이력";

pub const COLUMNS: [&str; 19] = [
    "행 개수",
    "주식회사 제거",
    "기업명",
    "등록번호",
    "변경연월일",
    "등기연월일",
    "발행주식의 총수",
    "보통주식",
    "우선주식",
    "자본금의 액",
    "비고",
    "총 주식수 증감",
    "보통주 증감",
    "우선주 증감",
    // Filled in by analysts after the run
    "투자유치금액",
    "주당 단가",
    "기업가치",
    "최대",
    "최소",
];

pub const PREFERRED_COLUMN: usize = 8;
// Registration number and the two dates must not be reinterpreted as numbers
const TEXT_COLUMNS: [usize; 3] = [3, 4, 5];

/// `{folder_name}_result_YYYYMMDD`
pub fn result_sheet_title(folder_name: &str, run_date: NaiveDate) -> String {
    format!("{}_result_{}", folder_name, run_date.format("%Y%m%d"))
}

/// `1234567` -> `1,234,567`; absent values become an empty cell.
pub fn format_number(value: Option<i64>) -> String {
    let Some(value) = value else {
        return String::new();
    };
    let digits = value.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if value < 0 {
        out.push('-');
    }
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

fn format_date(date: Option<NaiveDate>) -> String {
    date.map(|d| d.format(REGISTRY_DATE_FORMAT).to_string()).unwrap_or_default()
}

fn record_row(record: &DocumentRecord) -> Vec<String> {
    let mut row = vec![
        record.document_row_count.to_string(),
        record.clean_name.clone().unwrap_or_default(),
        record.company_name.clone().unwrap_or_default(),
        record.registration_number.clone().unwrap_or_default(),
        format_date(record.change_date),
        format_date(record.registration_date),
        format_number(record.issued_shares),
        format_number(record.common_shares),
        format_number(record.preferred.computed_sum),
        format_number(record.capital),
        record.note(),
        format_number(record.delta_total),
        format_number(record.delta_common),
        format_number(record.delta_preferred),
    ];
    row.resize(COLUMNS.len(), String::new());
    row
}

/// Cell values plus the rows that need formatting. Row indexes count the header as row 0.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SheetLayout {
    pub values: Vec<Vec<String>>,
    /// Rows whose preferred-share cell failed validation
    pub highlight_rows: Vec<usize>,
    /// Last row of each company that is followed by another company
    pub boundary_rows: Vec<usize>,
}

impl SheetLayout {
    pub fn from_table(table: &ResultTable) -> Self {
        let mut layout = SheetLayout {
            values: vec![COLUMNS.iter().map(|c| c.to_string()).collect()],
            ..SheetLayout::default()
        };

        for entry in table.entries() {
            match entry {
                TableEntry::Record(record) => {
                    layout.values.push(record_row(record));
                    if record.validation() == Validation::Fail {
                        layout.highlight_rows.push(layout.values.len() - 1);
                    }
                }
                TableEntry::Separator => {
                    // A separator always follows at least one record
                    layout.boundary_rows.push(layout.values.len() - 1);
                }
            }
        }
        layout
    }

    /// `spreadsheets.batchUpdate` requests for text columns, highlights and company borders.
    pub fn format_requests(&self, sheet_id: i64) -> Vec<Value> {
        let mut requests = Vec::new();

        for col in TEXT_COLUMNS {
            requests.push(json!({
                "repeatCell": {
                    "range": {
                        "sheetId": sheet_id,
                        "startRowIndex": 1,
                        "startColumnIndex": col,
                        "endColumnIndex": col + 1,
                    },
                    "cell": { "userEnteredFormat": { "numberFormat": { "type": "TEXT" } } },
                    "fields": "userEnteredFormat.numberFormat",
                }
            }));
        }

        for &row in &self.highlight_rows {
            requests.push(json!({
                "repeatCell": {
                    "range": {
                        "sheetId": sheet_id,
                        "startRowIndex": row,
                        "endRowIndex": row + 1,
                        "startColumnIndex": PREFERRED_COLUMN,
                        "endColumnIndex": PREFERRED_COLUMN + 1,
                    },
                    "cell": {
                        "userEnteredFormat": {
                            "backgroundColor": { "red": 1.0, "green": 0.8, "blue": 0.8 },
                            "textFormat": { "foregroundColor": { "red": 0.85 } },
                        }
                    },
                    "fields": "userEnteredFormat(backgroundColor,textFormat.foregroundColor)",
                }
            }));
        }

        for &row in &self.boundary_rows {
            requests.push(json!({
                "updateBorders": {
                    "range": {
                        "sheetId": sheet_id,
                        "startRowIndex": row,
                        "endRowIndex": row + 1,
                        "startColumnIndex": 0,
                        "endColumnIndex": COLUMNS.len(),
                    },
                    "bottom": { "style": "SOLID_THICK", "width": 2 },
                }
            }));
        }

        requests
    }
}
