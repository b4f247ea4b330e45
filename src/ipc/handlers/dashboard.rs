use super::{db_conn, opt_i64, opt_str, respond, store_failure};
use crate::ipc::types::{AppState, Request};
use crate::report;

fn handle_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let date = opt_str(req, "date");
    match report::dashboard_summary(conn, date.as_deref(), opt_i64(req, "classId")) {
        Ok(d) => respond(&req.id, &d),
        Err(e) => store_failure(&req.id, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "dashboard.summary" => Some(handle_summary(state, req)),
        _ => None,
    }
}
