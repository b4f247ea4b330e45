use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, Value, ValueRef};
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::tally::{Status, Tally};

/// Structured failure carried from the store up through the handlers.
/// `message` keeps the underlying error text; it is never swallowed.
#[derive(Debug, Clone, Serialize)]
pub struct StoreError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl StoreError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn not_found(what: &str) -> Self {
        Self::new("not_found", format!("{} not found", what))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

fn q(e: rusqlite::Error) -> StoreError {
    StoreError::new("db_query_failed", e.to_string())
}

impl FromSql for Status {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        Status::parse(s).ok_or(FromSqlError::InvalidType)
    }
}

/// Composable read filter. Absent field = unconstrained. All queries built
/// from this are read-only.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pub date: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub class_id: Option<i64>,
    pub student_id: Option<i64>,
    /// Restricts to an explicit id set (e.g. one roster page). An empty
    /// vector matches nothing.
    pub student_ids: Option<Vec<i64>>,
    pub subject_id: Option<i64>,
    pub status: Option<Status>,
}

impl RecordFilter {
    pub fn on_date(date: &str) -> Self {
        RecordFilter {
            date: Some(date.to_string()),
            ..Default::default()
        }
    }

    pub fn between(start: &str, end: &str) -> Self {
        RecordFilter {
            date_from: Some(start.to_string()),
            date_to: Some(end.to_string()),
            ..Default::default()
        }
    }

    pub fn with_class(mut self, class_id: Option<i64>) -> Self {
        self.class_id = class_id;
        self
    }

    fn where_clause(&self) -> (String, Vec<Value>) {
        let mut conds: Vec<String> = Vec::new();
        let mut binds: Vec<Value> = Vec::new();
        if let Some(d) = &self.date {
            conds.push("a.attendance_date = ?".to_string());
            binds.push(Value::Text(d.clone()));
        }
        if let Some(d) = &self.date_from {
            conds.push("a.attendance_date >= ?".to_string());
            binds.push(Value::Text(d.clone()));
        }
        if let Some(d) = &self.date_to {
            conds.push("a.attendance_date <= ?".to_string());
            binds.push(Value::Text(d.clone()));
        }
        if let Some(id) = self.class_id {
            conds.push("s.class_id = ?".to_string());
            binds.push(Value::Integer(id));
        }
        if let Some(id) = self.student_id {
            conds.push("a.student_id = ?".to_string());
            binds.push(Value::Integer(id));
        }
        if let Some(ids) = &self.student_ids {
            if ids.is_empty() {
                conds.push("1 = 0".to_string());
            } else {
                let placeholders = std::iter::repeat("?")
                    .take(ids.len())
                    .collect::<Vec<_>>()
                    .join(",");
                conds.push(format!("a.student_id IN ({})", placeholders));
                for id in ids {
                    binds.push(Value::Integer(*id));
                }
            }
        }
        if let Some(id) = self.subject_id {
            conds.push("a.subject_id = ?".to_string());
            binds.push(Value::Integer(id));
        }
        if let Some(st) = self.status {
            conds.push("a.status = ?".to_string());
            binds.push(Value::Text(st.code().to_string()));
        }
        let sql = if conds.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conds.join(" AND "))
        };
        (sql, binds)
    }
}

/// Grouped status counts for everything matching the filter.
pub fn count_by_status(conn: &Connection, filter: &RecordFilter) -> StoreResult<Tally> {
    let (where_sql, binds) = filter.where_clause();
    let sql = format!(
        "SELECT a.status, COUNT(*)
         FROM attendance a
         JOIN students s ON s.id = a.student_id{}
         GROUP BY a.status",
        where_sql
    );
    let mut stmt = conn.prepare(&sql).map_err(q)?;
    let rows = stmt
        .query_map(params_from_iter(binds), |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(q)?;
    Ok(Tally::from_counts(
        rows.iter().map(|(code, n)| (code.as_str(), *n)),
    ))
}

/// Counts grouped by (date, status), for multi-day breakdowns. Dates with no
/// matching records are simply absent; callers zero-fill from the expanded
/// date axis.
pub fn count_by_status_and_date(
    conn: &Connection,
    filter: &RecordFilter,
) -> StoreResult<BTreeMap<String, Tally>> {
    let (where_sql, binds) = filter.where_clause();
    let sql = format!(
        "SELECT a.attendance_date, a.status, COUNT(*)
         FROM attendance a
         JOIN students s ON s.id = a.student_id{}
         GROUP BY a.attendance_date, a.status
         ORDER BY a.attendance_date",
        where_sql
    );
    let mut stmt = conn.prepare(&sql).map_err(q)?;
    let rows = stmt
        .query_map(params_from_iter(binds), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, i64>(2)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(q)?;
    let mut by_date: BTreeMap<String, Tally> = BTreeMap::new();
    for (date, code, count) in rows {
        if let Some(status) = Status::parse(&code) {
            by_date.entry(date).or_default().add(status, count);
        }
    }
    Ok(by_date)
}

/// Counts grouped by (student, status), for per-student rate sweeps such as
/// at-risk detection.
pub fn count_by_status_and_student(
    conn: &Connection,
    filter: &RecordFilter,
) -> StoreResult<BTreeMap<i64, Tally>> {
    let (where_sql, binds) = filter.where_clause();
    let sql = format!(
        "SELECT a.student_id, a.status, COUNT(*)
         FROM attendance a
         JOIN students s ON s.id = a.student_id{}
         GROUP BY a.student_id, a.status",
        where_sql
    );
    let mut stmt = conn.prepare(&sql).map_err(q)?;
    let rows = stmt
        .query_map(params_from_iter(binds), |r| {
            Ok((
                r.get::<_, i64>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, i64>(2)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(q)?;
    let mut by_student: BTreeMap<i64, Tally> = BTreeMap::new();
    for (student_id, code, count) in rows {
        if let Some(status) = Status::parse(&code) {
            by_student.entry(student_id).or_default().add(status, count);
        }
    }
    Ok(by_student)
}

#[derive(Debug, Clone)]
pub struct SubjectDayCount {
    pub date: String,
    pub subject_id: i64,
    pub subject_name: String,
    pub status: Status,
    pub count: i64,
}

/// Counts grouped by (date, subject, status) within the filter period, for
/// subject-aware grids.
pub fn count_by_status_and_subject(
    conn: &Connection,
    filter: &RecordFilter,
) -> StoreResult<Vec<SubjectDayCount>> {
    let (where_sql, binds) = filter.where_clause();
    let sql = format!(
        "SELECT a.attendance_date, a.subject_id, sub.name, a.status, COUNT(*)
         FROM attendance a
         JOIN students s ON s.id = a.student_id
         JOIN subjects sub ON sub.id = a.subject_id{}
         GROUP BY a.attendance_date, a.subject_id, a.status
         ORDER BY a.attendance_date, a.subject_id",
        where_sql
    );
    let mut stmt = conn.prepare(&sql).map_err(q)?;
    stmt.query_map(params_from_iter(binds), |r| {
        Ok(SubjectDayCount {
            date: r.get(0)?,
            subject_id: r.get(1)?,
            subject_name: r.get(2)?,
            status: r.get(3)?,
            count: r.get(4)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(q)
}

/// A full attendance row joined with its display attributes.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinedRecord {
    pub attendance_id: i64,
    pub student_id: i64,
    pub student_name_kh: String,
    pub student_name_eng: String,
    pub class_id: i64,
    pub class_code: String,
    pub teacher_id: i64,
    pub teacher_name: String,
    pub subject_id: i64,
    pub subject_name: String,
    pub subject_code: String,
    pub attendance_date: String,
    pub session: String,
    pub status: Status,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub enum RecordOrder {
    StudentNameAsc,
    DateDesc,
    DateSubjectAsc,
}

impl RecordOrder {
    fn sql(self) -> &'static str {
        match self {
            RecordOrder::StudentNameAsc => "s.name_eng ASC, a.attendance_date ASC, a.id ASC",
            RecordOrder::DateDesc => "a.attendance_date DESC, a.id DESC",
            RecordOrder::DateSubjectAsc => "a.attendance_date ASC, a.subject_id ASC, a.id ASC",
        }
    }
}

/// Ordered record list with joined student/class/teacher/subject attributes.
pub fn find_records(
    conn: &Connection,
    filter: &RecordFilter,
    order: RecordOrder,
    limit: Option<i64>,
    offset: Option<i64>,
) -> StoreResult<Vec<JoinedRecord>> {
    let (where_sql, mut binds) = filter.where_clause();
    let mut sql = format!(
        "SELECT a.id, a.student_id, s.name_kh, s.name_eng, s.class_id, c.code,
                a.teacher_id, t.name_eng, a.subject_id, sub.name, sub.code,
                a.attendance_date, a.session, a.status, a.notes
         FROM attendance a
         JOIN students s ON s.id = a.student_id
         JOIN classes c ON c.id = s.class_id
         JOIN teachers t ON t.id = a.teacher_id
         JOIN subjects sub ON sub.id = a.subject_id{}
         ORDER BY {}",
        where_sql,
        order.sql()
    );
    if let Some(n) = limit {
        sql.push_str(" LIMIT ?");
        binds.push(Value::Integer(n.max(0)));
        if let Some(off) = offset {
            sql.push_str(" OFFSET ?");
            binds.push(Value::Integer(off.max(0)));
        }
    }
    let mut stmt = conn.prepare(&sql).map_err(q)?;
    stmt.query_map(params_from_iter(binds), |r| {
        Ok(JoinedRecord {
            attendance_id: r.get(0)?,
            student_id: r.get(1)?,
            student_name_kh: r.get(2)?,
            student_name_eng: r.get(3)?,
            class_id: r.get(4)?,
            class_code: r.get(5)?,
            teacher_id: r.get(6)?,
            teacher_name: r.get(7)?,
            subject_id: r.get(8)?,
            subject_name: r.get(9)?,
            subject_code: r.get(10)?,
            attendance_date: r.get(11)?,
            session: r.get(12)?,
            status: r.get(13)?,
            notes: r.get(14)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(q)
}

pub fn count_records(conn: &Connection, filter: &RecordFilter) -> StoreResult<i64> {
    let (where_sql, binds) = filter.where_clause();
    let sql = format!(
        "SELECT COUNT(*)
         FROM attendance a
         JOIN students s ON s.id = a.student_id{}",
        where_sql
    );
    conn.query_row(&sql, params_from_iter(binds), |r| r.get(0))
        .map_err(q)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassRow {
    pub class_id: i64,
    pub class_code: String,
    pub class_name: String,
}

pub fn class_by_id(conn: &Connection, class_id: i64) -> StoreResult<Option<ClassRow>> {
    conn.query_row(
        "SELECT id, code, name FROM classes WHERE id = ?",
        [class_id],
        |r| {
            Ok(ClassRow {
                class_id: r.get(0)?,
                class_code: r.get(1)?,
                class_name: r.get(2)?,
            })
        },
    )
    .optional()
    .map_err(q)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRow {
    pub student_id: i64,
    pub class_id: i64,
    pub student_name_kh: String,
    pub student_name_eng: String,
    pub gender: Option<String>,
}

fn student_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<StudentRow> {
    Ok(StudentRow {
        student_id: r.get(0)?,
        class_id: r.get(1)?,
        student_name_kh: r.get(2)?,
        student_name_eng: r.get(3)?,
        gender: r.get(4)?,
    })
}

pub fn student_by_id(conn: &Connection, student_id: i64) -> StoreResult<Option<StudentRow>> {
    conn.query_row(
        "SELECT id, class_id, name_kh, name_eng, gender FROM students WHERE id = ?",
        [student_id],
        student_from_row,
    )
    .optional()
    .map_err(q)
}

/// All students of a class, or of the whole school when `class_id` is None,
/// ordered by id.
pub fn list_students(conn: &Connection, class_id: Option<i64>) -> StoreResult<Vec<StudentRow>> {
    let (sql, binds): (&str, Vec<Value>) = match class_id {
        Some(id) => (
            "SELECT id, class_id, name_kh, name_eng, gender
             FROM students WHERE class_id = ? ORDER BY id",
            vec![Value::Integer(id)],
        ),
        None => (
            "SELECT id, class_id, name_kh, name_eng, gender FROM students ORDER BY id",
            Vec::new(),
        ),
    };
    let mut stmt = conn.prepare(sql).map_err(q)?;
    stmt.query_map(params_from_iter(binds), student_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(q)
}

/// One page of a class roster, optionally narrowed by a search term. The
/// term matches either display name case-insensitively; when it parses as an
/// integer it also matches the student id exactly.
pub fn student_page(
    conn: &Connection,
    class_id: i64,
    search: Option<&str>,
    limit: i64,
    offset: i64,
) -> StoreResult<(i64, Vec<StudentRow>)> {
    let mut conds = vec!["class_id = ?".to_string()];
    let mut binds = vec![Value::Integer(class_id)];
    if let Some(term) = search.map(str::trim).filter(|t| !t.is_empty()) {
        let like = format!("%{}%", term);
        let mut or = vec!["name_eng LIKE ?", "name_kh LIKE ?"];
        binds.push(Value::Text(like.clone()));
        binds.push(Value::Text(like));
        if let Ok(id) = term.parse::<i64>() {
            or.push("id = ?");
            binds.push(Value::Integer(id));
        }
        conds.push(format!("({})", or.join(" OR ")));
    }
    let where_sql = conds.join(" AND ");

    let total: i64 = conn
        .query_row(
            &format!("SELECT COUNT(*) FROM students WHERE {}", where_sql),
            params_from_iter(binds.clone()),
            |r| r.get(0),
        )
        .map_err(q)?;

    binds.push(Value::Integer(limit.max(0)));
    binds.push(Value::Integer(offset.max(0)));
    let mut stmt = conn
        .prepare(&format!(
            "SELECT id, class_id, name_kh, name_eng, gender
             FROM students WHERE {} ORDER BY id LIMIT ? OFFSET ?",
            where_sql
        ))
        .map_err(q)?;
    let rows = stmt
        .query_map(params_from_iter(binds), student_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(q)?;
    Ok((total, rows))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectRef {
    pub subject_id: i64,
    pub subject_name: String,
    pub subject_code: String,
}

/// Distinct subjects that actually have attendance for the class in the
/// period. A period with no attendance data yields an empty list.
pub fn subjects_in_period(
    conn: &Connection,
    class_id: i64,
    start: &str,
    end: &str,
) -> StoreResult<Vec<SubjectRef>> {
    let mut stmt = conn
        .prepare(
            "SELECT DISTINCT sub.id, sub.name, sub.code
             FROM attendance a
             JOIN students s ON s.id = a.student_id
             JOIN subjects sub ON sub.id = a.subject_id
             WHERE s.class_id = ? AND a.attendance_date >= ? AND a.attendance_date <= ?
             ORDER BY sub.id",
        )
        .map_err(q)?;
    stmt.query_map((class_id, start, end), |r| {
        Ok(SubjectRef {
            subject_id: r.get(0)?,
            subject_name: r.get(1)?,
            subject_code: r.get(2)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(q)
}
