use rusqlite::Connection;
use serde::Serialize;
use serde_json::{json, Value};

use crate::grid::{self, ScheduleGrid};
use crate::store::StoreResult;
use crate::tally::{rate_string, Tally};

/// Inclusive cell span, zero-based rows and columns.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MergeRegion {
    pub start_row: usize,
    pub start_col: usize,
    pub end_row: usize,
    pub end_col: usize,
}

/// Logical spreadsheet description: cell values plus the merge regions a
/// writer needs to render the two-level header. Binary encoding is the
/// consumer's job; this structure is handed over verbatim.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetModel {
    pub sheet_name: String,
    pub file_name: String,
    pub rows: Vec<Vec<Value>>,
    pub merges: Vec<MergeRegion>,
}

const INFO_COLUMNS: [&str; 4] = ["No", "Name (KH)", "Name (EN)", "Gender"];
const STAT_COLUMNS: [&str; 5] = ["P", "A", "L", "E", "Rate (%)"];
const TITLE_ROWS: usize = 3; // title, period, spacer
const HEADER_TOP: usize = TITLE_ROWS;
const HEADER_SUB: usize = TITLE_ROWS + 1;

/// Builds the export sheet for a class and range. The column layout is
/// schedule-shaped — one status cell per (date, subject offered that date) —
/// so the grid is built through the schedule-anchored variant over the full
/// roster.
pub fn weekly_grid_sheet(
    conn: &Connection,
    class_id: i64,
    start: &str,
    end: &str,
) -> StoreResult<SheetModel> {
    let grid = grid::weekly_grid_by_schedule(conn, class_id, start, end)?;
    Ok(sheet_from_grid(&grid))
}

pub fn sheet_from_grid(grid: &ScheduleGrid) -> SheetModel {
    // Every date contributes max(1, offered subjects) columns; a date with
    // no subjects keeps a single placeholder column.
    let date_spans: Vec<(&String, usize)> = grid
        .period
        .dates
        .iter()
        .map(|date| {
            let n = grid.schedule[date].subjects.len();
            (date, n.max(1))
        })
        .collect();
    let date_col_total: usize = date_spans.iter().map(|(_, span)| span).sum();
    let total_cols = INFO_COLUMNS.len() + date_col_total + STAT_COLUMNS.len();

    let mut rows: Vec<Vec<Value>> = Vec::with_capacity(TITLE_ROWS + 2 + grid.students.len());
    let mut merges: Vec<MergeRegion> = Vec::new();

    rows.push(vec![json!(format!(
        "Weekly Attendance Report - {}",
        grid.class.class_name
    ))]);
    rows.push(vec![json!(format!(
        "Period: {} to {}",
        grid.period.start_date, grid.period.end_date
    ))]);
    rows.push(Vec::new());
    // Both title rows span the full sheet width.
    merges.push(MergeRegion {
        start_row: 0,
        start_col: 0,
        end_row: 0,
        end_col: total_cols - 1,
    });
    merges.push(MergeRegion {
        start_row: 1,
        start_col: 0,
        end_row: 1,
        end_col: total_cols - 1,
    });

    let mut top_header: Vec<Value> = Vec::with_capacity(total_cols);
    let mut sub_header: Vec<Value> = Vec::with_capacity(total_cols);
    for (col, label) in INFO_COLUMNS.iter().enumerate() {
        top_header.push(json!(label));
        sub_header.push(json!(""));
        merges.push(MergeRegion {
            start_row: HEADER_TOP,
            start_col: col,
            end_row: HEADER_SUB,
            end_col: col,
        });
    }

    let mut col = INFO_COLUMNS.len();
    for (date, span) in &date_spans {
        top_header.push(json!(date));
        for _ in 1..*span {
            top_header.push(json!(""));
        }
        let offered = &grid.schedule[*date].subjects;
        if offered.is_empty() {
            sub_header.push(json!("-"));
        } else {
            for s in offered {
                sub_header.push(json!(s.subject_name));
            }
        }
        if *span > 1 {
            merges.push(MergeRegion {
                start_row: HEADER_TOP,
                start_col: col,
                end_row: HEADER_TOP,
                end_col: col + span - 1,
            });
        }
        col += span;
    }

    top_header.push(json!("Statistics"));
    for _ in 1..STAT_COLUMNS.len() {
        top_header.push(json!(""));
    }
    for label in STAT_COLUMNS {
        sub_header.push(json!(label));
    }
    merges.push(MergeRegion {
        start_row: HEADER_TOP,
        start_col: col,
        end_row: HEADER_TOP,
        end_col: col + STAT_COLUMNS.len() - 1,
    });
    rows.push(top_header);
    rows.push(sub_header);

    for student in &grid.students {
        let mut row: Vec<Value> = Vec::with_capacity(total_cols);
        row.push(json!(student.row_number));
        row.push(json!(student.student_name_kh));
        row.push(json!(student.student_name_eng));
        row.push(json!(student.gender.clone().unwrap_or_default()));

        let mut tally = Tally::default();
        for (date, _) in &date_spans {
            let offered = &grid.schedule[*date].subjects;
            if offered.is_empty() {
                row.push(json!(""));
                continue;
            }
            let cell = &student.attendance[*date];
            for slot in &cell.subjects {
                match slot.status {
                    Some(status) => {
                        tally.add(status, 1);
                        row.push(json!(status.code()));
                    }
                    None => row.push(json!("")),
                }
            }
        }
        row.push(json!(tally.present));
        row.push(json!(tally.absent));
        row.push(json!(tally.late));
        row.push(json!(tally.excused));
        row.push(json!(rate_string(tally.present, tally.total(), 1)));
        rows.push(row);
    }

    let file_name = format!(
        "Attendance_{}_{}_to_{}.xlsx",
        grid.class.class_name, grid.period.start_date, grid.period.end_date
    )
    .replace(' ', "_");

    SheetModel {
        sheet_name: "Attendance".to_string(),
        file_name,
        rows,
        merges,
    }
}
