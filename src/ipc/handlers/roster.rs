use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

use super::{db_conn, opt_i64, opt_str, required_i64, required_str, respond, store_failure};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::store;

fn handle_classes_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let code = match required_str(req, "code") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let res = conn.execute(
        "INSERT INTO classes(code, name, created_at, updated_at)
         VALUES(?, ?, datetime('now'), datetime('now'))",
        (&code, &name),
    );
    match res {
        Ok(_) => ok(
            &req.id,
            json!({ "classId": conn.last_insert_rowid(), "code": code, "name": name }),
        ),
        Err(e) => err(&req.id, "db_insert_failed", e.to_string(), None),
    }
}

fn handle_classes_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let rows = conn
        .prepare("SELECT id, code, name FROM classes ORDER BY id")
        .and_then(|mut stmt| {
            stmt.query_map([], |r| {
                Ok(json!({
                    "classId": r.get::<_, i64>(0)?,
                    "code": r.get::<_, String>(1)?,
                    "name": r.get::<_, String>(2)?,
                }))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        });
    match rows {
        Ok(classes) => ok(&req.id, json!({ "classes": classes })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn class_exists(conn: &Connection, class_id: i64) -> rusqlite::Result<bool> {
    conn.query_row("SELECT 1 FROM classes WHERE id = ?", [class_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let class_id = match required_i64(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let name_kh = match required_str(req, "nameKh") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let name_eng = match required_str(req, "nameEng") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let gender = opt_str(req, "gender");

    match class_exists(conn, class_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "class not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let res = conn.execute(
        "INSERT INTO students(class_id, name_kh, name_eng, gender, created_at, updated_at)
         VALUES(?, ?, ?, ?, datetime('now'), datetime('now'))",
        (class_id, &name_kh, &name_eng, &gender),
    );
    match res {
        Ok(_) => ok(&req.id, json!({ "studentId": conn.last_insert_rowid() })),
        Err(e) => err(&req.id, "db_insert_failed", e.to_string(), None),
    }
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match store::list_students(conn, opt_i64(req, "classId")) {
        Ok(students) => respond(&req.id, &json!({ "students": students })),
        Err(e) => store_failure(&req.id, e),
    }
}

fn handle_subjects_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let code = match required_str(req, "code") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let description = opt_str(req, "description");
    let res = conn.execute(
        "INSERT INTO subjects(name, code, description, created_at, updated_at)
         VALUES(?, ?, ?, datetime('now'), datetime('now'))",
        (&name, &code, &description),
    );
    match res {
        Ok(_) => ok(&req.id, json!({ "subjectId": conn.last_insert_rowid() })),
        Err(e) => err(&req.id, "db_insert_failed", e.to_string(), None),
    }
}

fn handle_subjects_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let rows = conn
        .prepare("SELECT id, name, code, description FROM subjects ORDER BY id")
        .and_then(|mut stmt| {
            stmt.query_map([], |r| {
                Ok(json!({
                    "subjectId": r.get::<_, i64>(0)?,
                    "name": r.get::<_, String>(1)?,
                    "code": r.get::<_, String>(2)?,
                    "description": r.get::<_, Option<String>>(3)?,
                }))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        });
    match rows {
        Ok(subjects) => ok(&req.id, json!({ "subjects": subjects })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_teachers_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let phone = opt_str(req, "phone");
    let res = conn.execute(
        "INSERT INTO teachers(name_eng, phone, created_at, updated_at)
         VALUES(?, ?, datetime('now'), datetime('now'))",
        (&name, &phone),
    );
    match res {
        Ok(_) => ok(&req.id, json!({ "teacherId": conn.last_insert_rowid() })),
        Err(e) => err(&req.id, "db_insert_failed", e.to_string(), None),
    }
}

fn handle_teachers_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let rows = conn
        .prepare("SELECT id, name_eng, phone FROM teachers ORDER BY id")
        .and_then(|mut stmt| {
            stmt.query_map([], |r| {
                Ok(json!({
                    "teacherId": r.get::<_, i64>(0)?,
                    "name": r.get::<_, String>(1)?,
                    "phone": r.get::<_, Option<String>>(2)?,
                }))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        });
    match rows {
        Ok(teachers) => ok(&req.id, json!({ "teachers": teachers })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.create" => Some(handle_classes_create(state, req)),
        "classes.list" => Some(handle_classes_list(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.list" => Some(handle_students_list(state, req)),
        "subjects.create" => Some(handle_subjects_create(state, req)),
        "subjects.list" => Some(handle_subjects_list(state, req)),
        "teachers.create" => Some(handle_teachers_create(state, req)),
        "teachers.list" => Some(handle_teachers_list(state, req)),
        _ => None,
    }
}
