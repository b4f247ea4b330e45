use super::{db_conn, opt_i64, opt_str, required_i64, required_str, respond, store_failure};
use crate::dates;
use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};
use crate::report;

fn handle_daily(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let date = match required_str(req, "date") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match report::daily_report(conn, &date, opt_i64(req, "classId")) {
        Ok(r) => respond(&req.id, &r),
        Err(e) => store_failure(&req.id, e),
    }
}

fn handle_weekly(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let start = match required_str(req, "startDate") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let end = match required_str(req, "endDate") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match report::weekly_report(conn, &start, &end, opt_i64(req, "classId")) {
        Ok(r) => respond(&req.id, &r),
        Err(e) => store_failure(&req.id, e),
    }
}

fn handle_student_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let student_id = match required_i64(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let start = opt_str(req, "startDate");
    let end = opt_str(req, "endDate");
    match report::student_summary(conn, student_id, start.as_deref(), end.as_deref()) {
        Ok(r) => respond(&req.id, &r),
        Err(e) => store_failure(&req.id, e),
    }
}

fn handle_class_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let class_id = match required_i64(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let date = opt_str(req, "date");
    match report::class_summary(conn, class_id, date.as_deref()) {
        Ok(r) => respond(&req.id, &r),
        Err(e) => store_failure(&req.id, e),
    }
}

fn handle_monthly_calendar(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let year = match required_i64(req, "year") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let month = match required_i64(req, "month") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if !(1..=12).contains(&month) {
        return err(&req.id, "bad_params", "month must be between 1 and 12", None);
    }
    match report::monthly_calendar(conn, year as i32, month as u32, opt_i64(req, "classId")) {
        Ok(r) => respond(&req.id, &r),
        Err(e) => store_failure(&req.id, e),
    }
}

fn handle_at_risk(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let date = opt_str(req, "date").unwrap_or_else(dates::today);
    match report::at_risk_students(conn, opt_i64(req, "classId"), &date) {
        Ok(students) => respond(&req.id, &serde_json::json!({ "students": students })),
        Err(e) => store_failure(&req.id, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.daily" => Some(handle_daily(state, req)),
        "reports.weekly" => Some(handle_weekly(state, req)),
        "reports.studentSummary" => Some(handle_student_summary(state, req)),
        "reports.classSummary" => Some(handle_class_summary(state, req)),
        "reports.monthlyCalendar" => Some(handle_monthly_calendar(state, req)),
        "reports.atRisk" => Some(handle_at_risk(state, req)),
        _ => None,
    }
}
