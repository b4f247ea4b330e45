pub mod attendance;
pub mod core;
pub mod dashboard;
pub mod export;
pub mod grid;
pub mod reports;
pub mod roster;

use rusqlite::Connection;
use serde::Serialize;

use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::store::StoreError;

fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

fn required_i64(req: &Request, key: &str) -> Result<i64, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

fn opt_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
}

fn opt_i64(req: &Request, key: &str) -> Option<i64> {
    req.params.get(key).and_then(|v| v.as_i64())
}

fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

fn respond<T: Serialize>(id: &str, value: &T) -> serde_json::Value {
    match serde_json::to_value(value) {
        Ok(v) => ok(id, v),
        Err(e) => err(id, "internal", e.to_string(), None),
    }
}

fn store_failure(id: &str, e: StoreError) -> serde_json::Value {
    err(id, &e.code, e.message, e.details)
}
