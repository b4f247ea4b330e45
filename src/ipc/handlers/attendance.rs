use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

use super::{db_conn, opt_i64, opt_str, required_i64, required_str, respond, store_failure};
use crate::dates;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::store::{self, RecordFilter, RecordOrder};
use crate::tally::Status;

const DEFAULT_SESSION: &str = "morning";
const DEFAULT_PAGE: i64 = 1;
const DEFAULT_LIMIT: i64 = 50;

fn student_exists(conn: &Connection, student_id: i64) -> rusqlite::Result<bool> {
    conn.query_row("SELECT 1 FROM students WHERE id = ?", [student_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
}

/// One record per (student, date, subject, session); a resubmission updates
/// the existing row in place instead of duplicating it.
fn upsert_record(
    conn: &Connection,
    student_id: i64,
    teacher_id: i64,
    subject_id: i64,
    date: &str,
    session: &str,
    status: Status,
    notes: Option<&str>,
) -> rusqlite::Result<i64> {
    conn.query_row(
        "INSERT INTO attendance(student_id, teacher_id, subject_id, attendance_date,
                                session, status, notes, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, datetime('now'), datetime('now'))
         ON CONFLICT(student_id, attendance_date, subject_id, session) DO UPDATE SET
           status = excluded.status,
           notes = excluded.notes,
           teacher_id = excluded.teacher_id,
           updated_at = excluded.updated_at
         RETURNING id",
        (
            student_id,
            teacher_id,
            subject_id,
            date,
            session,
            status.code(),
            notes,
        ),
        |r| r.get(0),
    )
}

fn handle_record(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let student_id = match required_i64(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let teacher_id = match required_i64(req, "teacherId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let subject_id = match required_i64(req, "subjectId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let date = match required_str(req, "date") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let status_code = match required_str(req, "status") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if let Err(e) = dates::parse_date(&date) {
        return store_failure(&req.id, e);
    }
    let Some(status) = Status::parse(&status_code) else {
        return err(
            &req.id,
            "bad_params",
            "status must be one of: P, A, L, E",
            Some(json!({ "status": status_code })),
        );
    };
    let session = opt_str(req, "session").unwrap_or_else(|| DEFAULT_SESSION.to_string());
    let notes = opt_str(req, "notes");

    match student_exists(conn, student_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "student not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    match upsert_record(
        conn,
        student_id,
        teacher_id,
        subject_id,
        &date,
        &session,
        status,
        notes.as_deref(),
    ) {
        Ok(id) => ok(&req.id, json!({ "attendanceId": id })),
        Err(e) => err(&req.id, "db_insert_failed", e.to_string(), None),
    }
}

fn handle_bulk_record(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let date = match required_str(req, "date") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let teacher_id = match required_i64(req, "teacherId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let subject_id = match required_i64(req, "subjectId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if let Err(e) = dates::parse_date(&date) {
        return store_failure(&req.id, e);
    }
    let session = opt_str(req, "session").unwrap_or_else(|| DEFAULT_SESSION.to_string());
    let Some(entries) = req.params.get("records").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing records", None);
    };

    let tx = match conn.unchecked_transaction() {
        Ok(tx) => tx,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Bad rows are skipped and reported, not fatal; the good rows still land.
    let mut successful = 0i64;
    let mut failures: Vec<serde_json::Value> = Vec::new();
    for entry in entries {
        let student_id = entry.get("studentId").and_then(|v| v.as_i64());
        let status = entry
            .get("status")
            .and_then(|v| v.as_str())
            .and_then(Status::parse);
        let notes = entry.get("notes").and_then(|v| v.as_str());
        let (Some(student_id), Some(status)) = (student_id, status) else {
            failures.push(json!({ "record": entry, "reason": "bad studentId or status" }));
            continue;
        };
        match student_exists(&tx, student_id) {
            Ok(true) => {}
            Ok(false) => {
                failures.push(json!({ "studentId": student_id, "reason": "student not found" }));
                continue;
            }
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
        match upsert_record(
            &tx, student_id, teacher_id, subject_id, &date, &session, status, notes,
        ) {
            Ok(_) => successful += 1,
            Err(e) => {
                failures.push(json!({ "studentId": student_id, "reason": e.to_string() }));
            }
        }
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }
    ok(
        &req.id,
        json!({
            "total": entries.len(),
            "successful": successful,
            "failed": failures.len(),
            "failures": failures,
        }),
    )
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let mut filter = RecordFilter {
        date: opt_str(req, "date"),
        date_from: opt_str(req, "startDate"),
        date_to: opt_str(req, "endDate"),
        class_id: opt_i64(req, "classId"),
        student_id: opt_i64(req, "studentId"),
        subject_id: opt_i64(req, "subjectId"),
        ..Default::default()
    };
    if let Some(code) = opt_str(req, "status") {
        let Some(status) = Status::parse(&code) else {
            return err(
                &req.id,
                "bad_params",
                "status must be one of: P, A, L, E",
                Some(json!({ "status": code })),
            );
        };
        filter.status = Some(status);
    }
    for d in [&filter.date, &filter.date_from, &filter.date_to]
        .into_iter()
        .flatten()
    {
        if let Err(e) = dates::parse_date(d) {
            return store_failure(&req.id, e);
        }
    }

    let page = opt_i64(req, "page").unwrap_or(DEFAULT_PAGE).max(1);
    let limit = opt_i64(req, "limit").unwrap_or(DEFAULT_LIMIT).max(0);
    let offset = (page - 1) * limit;

    let total = match store::count_records(conn, &filter) {
        Ok(n) => n,
        Err(e) => return store_failure(&req.id, e),
    };
    let records = match store::find_records(
        conn,
        &filter,
        RecordOrder::DateDesc,
        Some(limit),
        Some(offset),
    ) {
        Ok(r) => r,
        Err(e) => return store_failure(&req.id, e),
    };
    let total_pages = if limit > 0 {
        (total + limit - 1) / limit
    } else {
        0
    };
    respond(
        &req.id,
        &json!({
            "records": records,
            "pagination": {
                "total": total,
                "page": page,
                "limit": limit,
                "totalPages": total_pages,
            }
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.record" => Some(handle_record(state, req)),
        "attendance.bulkRecord" => Some(handle_bulk_record(state, req)),
        "attendance.list" => Some(handle_list(state, req)),
        _ => None,
    }
}
