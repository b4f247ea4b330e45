use super::{db_conn, required_i64, required_str, respond, store_failure};
use crate::export;
use crate::ipc::types::{AppState, Request};

fn handle_weekly_grid_sheet(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let class_id = match required_i64(req, "classId") {
        Ok(v) => v,
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
    match export::weekly_grid_sheet(conn, class_id, &start, &end) {
        Ok(sheet) => respond(&req.id, &sheet),
        Err(e) => store_failure(&req.id, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "export.weeklyGridSheet" => Some(handle_weekly_grid_sheet(state, req)),
        _ => None,
    }
}
