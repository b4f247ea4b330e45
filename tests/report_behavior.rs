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

struct Sidecar {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    seq: u64,
}

impl Sidecar {
    fn start(workspace: &PathBuf) -> Sidecar {
        let (child, stdin, reader) = spawn_sidecar();
        let mut s = Sidecar {
            child,
            stdin,
            reader,
            seq: 0,
        };
        s.ok(
            "workspace.select",
            json!({ "path": workspace.to_string_lossy() }),
        );
        s
    }

    fn call(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        self.seq += 1;
        let id = self.seq.to_string();
        let payload = json!({ "id": id, "method": method, "params": params });
        writeln!(self.stdin, "{}", payload).expect("write request");
        self.stdin.flush().expect("flush request");
        let mut line = String::new();
        self.reader.read_line(&mut line).expect("read response");
        let value: serde_json::Value =
            serde_json::from_str(line.trim()).expect("parse response json");
        assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id.as_str()));
        value
    }

    fn ok(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        let value = self.call(method, params);
        assert_eq!(
            value.get("ok").and_then(|v| v.as_bool()),
            Some(true),
            "{} failed: {}",
            method,
            value
        );
        value.get("result").cloned().expect("result")
    }

    fn err_code(&mut self, method: &str, params: serde_json::Value) -> String {
        let value = self.call(method, params);
        assert_eq!(
            value.get("ok").and_then(|v| v.as_bool()),
            Some(false),
            "{} unexpectedly succeeded: {}",
            method,
            value
        );
        value
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str())
            .expect("error code")
            .to_string()
    }

    fn finish(mut self, workspace: PathBuf) {
        drop(self.stdin);
        let _ = self.child.wait();
        let _ = std::fs::remove_dir_all(workspace);
    }
}

struct Fixture {
    class_id: i64,
    teacher_id: i64,
    subject_id: i64,
    alice: i64,
    bob: i64,
    chan: i64,
}

/// Four students; Dara never gets a record.
///
/// date      Alice  Bob  Chan
/// 2024-03-04  P     A    L
/// 2024-03-05  P
/// 2024-03-06        P
/// 2024-03-07        P
/// 2024-03-08        A
fn seed(s: &mut Sidecar) -> Fixture {
    let class = s.ok("classes.create", json!({ "code": "7A", "name": "Grade 7A" }));
    let class_id = class.get("classId").and_then(|v| v.as_i64()).unwrap();
    let teacher = s.ok("teachers.create", json!({ "name": "Sok Dany" }));
    let teacher_id = teacher.get("teacherId").and_then(|v| v.as_i64()).unwrap();
    let subject = s.ok(
        "subjects.create",
        json!({ "name": "Mathematics", "code": "MATH" }),
    );
    let subject_id = subject.get("subjectId").and_then(|v| v.as_i64()).unwrap();

    let mut student = |s: &mut Sidecar, kh: &str, eng: &str| -> i64 {
        s.ok(
            "students.create",
            json!({ "classId": class_id, "nameKh": kh, "nameEng": eng }),
        )
        .get("studentId")
        .and_then(|v| v.as_i64())
        .unwrap()
    };
    let alice = student(s, "អាលីស", "Alice");
    let bob = student(s, "បូប", "Bob");
    let chan = student(s, "ចាន់", "Chan");
    let _dara = student(s, "ដារ៉ា", "Dara");

    for (student_id, date, status) in [
        (alice, "2024-03-04", "P"),
        (alice, "2024-03-05", "P"),
        (bob, "2024-03-04", "A"),
        (bob, "2024-03-06", "P"),
        (bob, "2024-03-07", "P"),
        (bob, "2024-03-08", "A"),
        (chan, "2024-03-04", "L"),
    ] {
        s.ok(
            "attendance.record",
            json!({
                "studentId": student_id,
                "teacherId": teacher_id,
                "subjectId": subject_id,
                "date": date,
                "status": status
            }),
        );
    }

    Fixture {
        class_id,
        teacher_id,
        subject_id,
        alice,
        bob,
        chan,
    }
}

#[test]
fn daily_report_sorts_by_name_and_tallies() {
    let workspace = temp_dir("attendanced-daily");
    let mut s = Sidecar::start(&workspace);
    let f = seed(&mut s);

    let report = s.ok(
        "reports.daily",
        json!({ "date": "2024-03-04", "classId": f.class_id }),
    );
    let stats = report.get("statistics").unwrap();
    assert_eq!(stats.get("total").and_then(|v| v.as_i64()), Some(3));
    assert_eq!(stats.get("present").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(stats.get("absent").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(stats.get("late").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(
        stats.get("attendanceRate").and_then(|v| v.as_str()),
        Some("33.33%")
    );

    let names: Vec<&str> = report
        .get("records")
        .and_then(|v| v.as_array())
        .unwrap()
        .iter()
        .map(|r| r.get("studentNameEng").and_then(|v| v.as_str()).unwrap())
        .collect();
    assert_eq!(names, vec!["Alice", "Bob", "Chan"]);

    assert_eq!(
        s.err_code("reports.daily", json!({ "date": "04/03/2024" })),
        "invalid_range"
    );
    s.finish(workspace);
}

#[test]
fn weekly_report_zero_fills_quiet_days() {
    let workspace = temp_dir("attendanced-weekly");
    let mut s = Sidecar::start(&workspace);
    let f = seed(&mut s);

    let report = s.ok(
        "reports.weekly",
        json!({
            "startDate": "2024-03-04",
            "endDate": "2024-03-10",
            "classId": f.class_id
        }),
    );
    let breakdown = report
        .get("dailyBreakdown")
        .and_then(|v| v.as_array())
        .unwrap();
    assert_eq!(breakdown.len(), 7);
    let totals: Vec<i64> = breakdown
        .iter()
        .map(|d| d.get("total").and_then(|v| v.as_i64()).unwrap())
        .collect();
    assert_eq!(totals, vec![3, 1, 1, 1, 1, 0, 0]);
    assert_eq!(
        breakdown[5].get("date").and_then(|v| v.as_str()),
        Some("2024-03-09")
    );

    let overall = report.get("overallStatistics").unwrap();
    assert_eq!(overall.get("total").and_then(|v| v.as_i64()), Some(7));
    assert_eq!(overall.get("present").and_then(|v| v.as_i64()), Some(4));
    assert_eq!(
        overall.get("attendanceRate").and_then(|v| v.as_str()),
        Some("57.14%")
    );

    assert_eq!(
        s.err_code(
            "reports.weekly",
            json!({ "startDate": "2024-03-10", "endDate": "2024-03-04" })
        ),
        "invalid_range"
    );
    s.finish(workspace);
}

#[test]
fn student_summary_rates_over_own_records() {
    let workspace = temp_dir("attendanced-student-summary");
    let mut s = Sidecar::start(&workspace);
    let f = seed(&mut s);

    let summary = s.ok(
        "reports.studentSummary",
        json!({
            "studentId": f.bob,
            "startDate": "2024-03-01",
            "endDate": "2024-03-31"
        }),
    );
    let stats = summary.get("statistics").unwrap();
    assert_eq!(stats.get("total").and_then(|v| v.as_i64()), Some(4));
    assert_eq!(stats.get("present").and_then(|v| v.as_i64()), Some(2));
    assert_eq!(
        stats.get("attendanceRate").and_then(|v| v.as_str()),
        Some("50.00%")
    );

    let recent = summary
        .get("recentRecords")
        .and_then(|v| v.as_array())
        .unwrap();
    assert_eq!(recent.len(), 4);
    // newest first
    assert_eq!(
        recent[0].get("attendanceDate").and_then(|v| v.as_str()),
        Some("2024-03-08")
    );

    assert_eq!(
        s.err_code("reports.studentSummary", json!({ "studentId": 999_999 })),
        "not_found"
    );
    s.finish(workspace);
}

#[test]
fn class_summary_rates_over_roster_size() {
    let workspace = temp_dir("attendanced-class-summary");
    let mut s = Sidecar::start(&workspace);
    let f = seed(&mut s);

    // Only Alice has a record on the 5th; the other three show NO_RECORD and
    // the rate divides by roster size, not record count.
    let summary = s.ok(
        "reports.classSummary",
        json!({ "classId": f.class_id, "date": "2024-03-05" }),
    );
    assert_eq!(
        summary.get("totalStudents").and_then(|v| v.as_i64()),
        Some(4)
    );
    let stats = summary.get("statistics").unwrap();
    assert_eq!(stats.get("present").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(stats.get("noRecord").and_then(|v| v.as_i64()), Some(3));
    assert_eq!(
        stats.get("attendanceRate").and_then(|v| v.as_str()),
        Some("25.00%")
    );

    let rows = summary.get("students").and_then(|v| v.as_array()).unwrap();
    assert_eq!(rows.len(), 4);
    assert_eq!(
        rows[0].get("status").and_then(|v| v.as_str()),
        Some("P"),
        "Alice sorts first and was present"
    );
    assert_eq!(rows[1].get("status").and_then(|v| v.as_str()), Some("NO_RECORD"));

    assert_eq!(
        s.err_code("reports.classSummary", json!({ "classId": 999_999 })),
        "not_found"
    );
    s.finish(workspace);
}

#[test]
fn monthly_calendar_covers_every_day_of_month() {
    let workspace = temp_dir("attendanced-calendar");
    let mut s = Sidecar::start(&workspace);
    let f = seed(&mut s);

    let leap = s.ok(
        "reports.monthlyCalendar",
        json!({ "year": 2024, "month": 2, "classId": f.class_id }),
    );
    assert_eq!(leap.get("totalDays").and_then(|v| v.as_i64()), Some(29));
    let days = leap
        .get("dailyStatistics")
        .and_then(|v| v.as_array())
        .unwrap();
    assert_eq!(days.len(), 29);
    // 2024-02-01 is a Thursday; Sunday = 0.
    assert_eq!(days[0].get("dayOfWeek").and_then(|v| v.as_i64()), Some(4));
    assert!(days.iter().all(|d| d.get("total").and_then(|v| v.as_i64()) == Some(0)));

    let plain = s.ok(
        "reports.monthlyCalendar",
        json!({ "year": 2023, "month": 2 }),
    );
    assert_eq!(plain.get("totalDays").and_then(|v| v.as_i64()), Some(28));

    let march = s.ok(
        "reports.monthlyCalendar",
        json!({ "year": 2024, "month": 3, "classId": f.class_id }),
    );
    let march_days = march
        .get("dailyStatistics")
        .and_then(|v| v.as_array())
        .unwrap();
    assert_eq!(march_days.len(), 31);
    assert_eq!(march_days[3].get("total").and_then(|v| v.as_i64()), Some(3));

    assert_eq!(
        s.err_code("reports.monthlyCalendar", json!({ "year": 2024, "month": 13 })),
        "bad_params"
    );
    s.finish(workspace);
}

#[test]
fn at_risk_flags_low_rates_ascending_and_skips_recordless_students() {
    let workspace = temp_dir("attendanced-at-risk");
    let mut s = Sidecar::start(&workspace);
    let f = seed(&mut s);

    let result = s.ok(
        "reports.atRisk",
        json!({ "classId": f.class_id, "date": "2024-03-31" }),
    );
    let students = result.get("students").and_then(|v| v.as_array()).unwrap();
    // Chan 0/1, Bob 2/4. Alice is at 100% and Dara has no records at all, so
    // neither is flagged.
    assert_eq!(students.len(), 2);
    assert_eq!(
        students[0].get("studentId").and_then(|v| v.as_i64()),
        Some(f.chan)
    );
    assert_eq!(
        students[0].get("attendanceRate").and_then(|v| v.as_str()),
        Some("0.0%")
    );
    assert_eq!(
        students[1].get("studentId").and_then(|v| v.as_i64()),
        Some(f.bob)
    );
    assert_eq!(
        students[1].get("attendanceRate").and_then(|v| v.as_str()),
        Some("50.0%")
    );
    assert_eq!(
        students[1].get("daysPresent").and_then(|v| v.as_i64()),
        Some(2)
    );
    assert_eq!(
        students[1].get("totalDays").and_then(|v| v.as_i64()),
        Some(4)
    );
    s.finish(workspace);
}

#[test]
fn dashboard_aggregates_relative_to_reference_date() {
    let workspace = temp_dir("attendanced-dashboard");
    let mut s = Sidecar::start(&workspace);
    let f = seed(&mut s);
    let _ = (f.teacher_id, f.subject_id, f.alice);

    let dash = s.ok(
        "dashboard.summary",
        json!({ "date": "2024-03-08", "classId": f.class_id }),
    );
    let today = dash.get("today").unwrap();
    assert_eq!(today.get("total").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(today.get("absent").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(
        today.get("attendanceRate").and_then(|v| v.as_str()),
        Some("0.0%")
    );

    let week = dash.get("thisWeek").unwrap();
    assert_eq!(
        week.get("startDate").and_then(|v| v.as_str()),
        Some("2024-03-02")
    );
    assert_eq!(week.get("total").and_then(|v| v.as_i64()), Some(7));

    let absences = dash
        .get("recentAbsences")
        .and_then(|v| v.as_array())
        .unwrap();
    assert_eq!(absences.len(), 2);
    assert_eq!(
        absences[0].get("attendanceDate").and_then(|v| v.as_str()),
        Some("2024-03-08")
    );
    assert!(absences
        .iter()
        .all(|r| r.get("status").and_then(|v| v.as_str()) == Some("A")));

    let at_risk = dash
        .get("studentsAtRisk")
        .and_then(|v| v.as_array())
        .unwrap();
    assert_eq!(at_risk.len(), 2);
    assert!(dash.get("generatedAt").and_then(|v| v.as_str()).is_some());
    s.finish(workspace);
}
