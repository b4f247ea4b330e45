use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_attendanced");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn attendanced");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request_raw(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request_raw(stdin, reader, id, method, params);
    if value.get("ok").and_then(|v| v.as_bool()) == Some(false) {
        let code = value
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        assert_ne!(
            code, "not_implemented",
            "unexpected unknown method for {}",
            method
        );
    }
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().expect("result")
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("attendanced-router-smoke");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert!(health.get("version").and_then(|v| v.as_str()).is_some());

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "classes.create",
        json!({ "code": "7A", "name": "Grade 7A" }),
    );
    let class_id = created
        .get("classId")
        .and_then(|v| v.as_i64())
        .expect("classId");
    let _ = request_ok(&mut stdin, &mut reader, "4", "classes.list", json!({}));

    let teacher = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "teachers.create",
        json!({ "name": "Sok Dany" }),
    );
    let teacher_id = teacher
        .get("teacherId")
        .and_then(|v| v.as_i64())
        .expect("teacherId");
    let _ = request_ok(&mut stdin, &mut reader, "6", "teachers.list", json!({}));

    let subject = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "subjects.create",
        json!({ "name": "Mathematics", "code": "MATH" }),
    );
    let subject_id = subject
        .get("subjectId")
        .and_then(|v| v.as_i64())
        .expect("subjectId");
    let _ = request_ok(&mut stdin, &mut reader, "8", "subjects.list", json!({}));

    let student = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "students.create",
        json!({ "classId": class_id, "nameKh": "សុខា", "nameEng": "Sokha", "gender": "F" }),
    );
    let student_id = student
        .get("studentId")
        .and_then(|v| v.as_i64())
        .expect("studentId");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "students.list",
        json!({ "classId": class_id }),
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "attendance.record",
        json!({
            "studentId": student_id,
            "teacherId": teacher_id,
            "subjectId": subject_id,
            "date": "2024-03-04",
            "status": "P"
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "attendance.bulkRecord",
        json!({
            "date": "2024-03-05",
            "teacherId": teacher_id,
            "subjectId": subject_id,
            "records": [{ "studentId": student_id, "status": "A" }]
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "attendance.list",
        json!({ "studentId": student_id }),
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "14",
        "reports.daily",
        json!({ "date": "2024-03-04", "classId": class_id }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "15",
        "reports.weekly",
        json!({ "startDate": "2024-03-04", "endDate": "2024-03-10", "classId": class_id }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "16",
        "reports.studentSummary",
        json!({ "studentId": student_id }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "17",
        "reports.classSummary",
        json!({ "classId": class_id, "date": "2024-03-04" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "18",
        "reports.monthlyCalendar",
        json!({ "year": 2024, "month": 3, "classId": class_id }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "19",
        "reports.atRisk",
        json!({ "classId": class_id, "date": "2024-03-31" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "20",
        "dashboard.summary",
        json!({ "date": "2024-03-05", "classId": class_id }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "21",
        "grid.weekly",
        json!({ "classId": class_id, "startDate": "2024-03-04", "endDate": "2024-03-08" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "22",
        "grid.weeklySchedule",
        json!({ "classId": class_id, "startDate": "2024-03-04", "endDate": "2024-03-08" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "23",
        "export.weeklyGridSheet",
        json!({ "classId": class_id, "startDate": "2024-03-04", "endDate": "2024-03-08" }),
    );

    let unknown = request_raw(&mut stdin, &mut reader, "24", "no.suchMethod", json!({}));
    assert_eq!(unknown.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        unknown
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str()),
        Some("not_implemented")
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn methods_needing_a_workspace_refuse_before_select() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let resp = request(
        &mut stdin,
        &mut reader,
        "1",
        "reports.daily",
        json!({ "date": "2024-03-04" }),
    );
    assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        resp.get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str()),
        Some("no_workspace")
    );
    drop(stdin);
    let _ = child.wait();
}
