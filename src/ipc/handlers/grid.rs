use super::{db_conn, opt_i64, opt_str, required_i64, required_str, respond, store_failure};
use crate::grid;
use crate::ipc::types::{AppState, Request};

fn handle_weekly(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let page = opt_i64(req, "page").unwrap_or(grid::DEFAULT_PAGE);
    let limit = opt_i64(req, "limit").unwrap_or(grid::DEFAULT_LIMIT);
    let search = opt_str(req, "search");
    match grid::weekly_grid(
        conn,
        class_id,
        &start,
        &end,
        page,
        limit,
        search.as_deref(),
    ) {
        Ok(g) => respond(&req.id, &g),
        Err(e) => store_failure(&req.id, e),
    }
}

fn handle_weekly_schedule(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    match grid::weekly_grid_by_schedule(conn, class_id, &start, &end) {
        Ok(g) => respond(&req.id, &g),
        Err(e) => store_failure(&req.id, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grid.weekly" => Some(handle_weekly(state, req)),
        "grid.weeklySchedule" => Some(handle_weekly_schedule(state, req)),
        _ => None,
    }
}
