use rusqlite::Connection;
use serde::Serialize;

use crate::dates;
use crate::store::{
    self, ClassRow, JoinedRecord, RecordFilter, RecordOrder, StoreError, StoreResult,
};
use crate::tally::{rate_string, rate_value, Statistics, Status, Tally};

/// How many recent records a student summary attaches.
const RECENT_RECORD_LIMIT: i64 = 10;
/// Trailing-window lengths the dashboard and at-risk detection use.
const WEEK_WINDOW_DAYS: i64 = 7;
const MONTH_WINDOW_DAYS: i64 = 30;
/// Students below this trailing-30-day rate are flagged at risk.
const AT_RISK_THRESHOLD: f64 = 75.0;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Period {
    pub start_date: String,
    pub end_date: String,
}

// ---- daily ----

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyReport {
    pub date: String,
    pub class_id: Option<i64>,
    pub records: Vec<JoinedRecord>,
    pub statistics: Statistics,
}

/// Tallies one day and attaches the joined record list, sorted by student
/// display name.
pub fn daily_report(
    conn: &Connection,
    date: &str,
    class_id: Option<i64>,
) -> StoreResult<DailyReport> {
    dates::parse_date(date)?;
    let filter = RecordFilter::on_date(date).with_class(class_id);
    let records = store::find_records(conn, &filter, RecordOrder::StudentNameAsc, None, None)?;
    let tally = store::count_by_status(conn, &filter)?;
    Ok(DailyReport {
        date: date.to_string(),
        class_id,
        records,
        statistics: tally.statistics(2),
    })
}

// ---- weekly ----

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DayBreakdown {
    pub date: String,
    pub present: i64,
    pub absent: i64,
    pub late: i64,
    pub excused: i64,
    pub total: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeeklyReport {
    pub period: Period,
    pub class_id: Option<i64>,
    pub daily_breakdown: Vec<DayBreakdown>,
    pub overall_statistics: Statistics,
}

/// Per-day and overall tallies across an inclusive range. Every day of the
/// range appears in the breakdown; days without records are all-zero.
pub fn weekly_report(
    conn: &Connection,
    start: &str,
    end: &str,
    class_id: Option<i64>,
) -> StoreResult<WeeklyReport> {
    let days = dates::expand_range(start, end)?;
    let filter = RecordFilter::between(start, end).with_class(class_id);
    let by_date = store::count_by_status_and_date(conn, &filter)?;
    let overall = store::count_by_status(conn, &filter)?;

    let daily_breakdown = days
        .into_iter()
        .map(|date| {
            let t = by_date.get(&date).copied().unwrap_or_default();
            DayBreakdown {
                date,
                present: t.present,
                absent: t.absent,
                late: t.late,
                excused: t.excused,
                total: t.total(),
            }
        })
        .collect();

    Ok(WeeklyReport {
        period: Period {
            start_date: start.to_string(),
            end_date: end.to_string(),
        },
        class_id,
        daily_breakdown,
        overall_statistics: overall.statistics(2),
    })
}

// ---- student summary ----

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentHeader {
    pub student_id: i64,
    pub student_name_kh: String,
    pub student_name_eng: String,
    pub class: Option<ClassRow>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentSummary {
    pub student: StudentHeader,
    pub period: Period,
    pub statistics: Statistics,
    pub recent_records: Vec<JoinedRecord>,
}

/// One student's tally over a range (default: the trailing 30 days ending
/// today), with up to 10 most recent records attached.
///
/// The rate denominator is the student's own record count, not class size —
/// see `class_summary` for the deliberately different convention.
pub fn student_summary(
    conn: &Connection,
    student_id: i64,
    start: Option<&str>,
    end: Option<&str>,
) -> StoreResult<StudentSummary> {
    let end = match end {
        Some(e) => {
            dates::parse_date(e)?;
            e.to_string()
        }
        None => dates::today(),
    };
    let start = match start {
        Some(s) => {
            dates::parse_date(s)?;
            s.to_string()
        }
        None => dates::trailing_window(&end, MONTH_WINDOW_DAYS)?,
    };
    if dates::parse_date(&end)? < dates::parse_date(&start)? {
        return Err(StoreError::new(
            "invalid_range",
            format!("end date {} precedes start date {}", end, start),
        ));
    }

    let student = store::student_by_id(conn, student_id)?
        .ok_or_else(|| StoreError::not_found("student"))?;
    let class = store::class_by_id(conn, student.class_id)?;

    let mut filter = RecordFilter::between(&start, &end);
    filter.student_id = Some(student_id);
    let tally = store::count_by_status(conn, &filter)?;
    let recent_records = store::find_records(
        conn,
        &filter,
        RecordOrder::DateDesc,
        Some(RECENT_RECORD_LIMIT),
        None,
    )?;

    Ok(StudentSummary {
        student: StudentHeader {
            student_id: student.student_id,
            student_name_kh: student.student_name_kh,
            student_name_eng: student.student_name_eng,
            class,
        },
        period: Period {
            start_date: start,
            end_date: end,
        },
        statistics: tally.statistics(2),
        recent_records,
    })
}

// ---- class summary ----

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassSummaryStudent {
    pub student_id: i64,
    pub student_name_kh: String,
    pub student_name_eng: String,
    /// "P"/"A"/"L"/"E", or "NO_RECORD" when the student has no record for
    /// the queried date.
    pub status: String,
    pub notes: Option<String>,
    pub subject_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassSummaryStatistics {
    pub present: i64,
    pub absent: i64,
    pub late: i64,
    pub excused: i64,
    pub no_record: i64,
    pub attendance_rate: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassSummary {
    pub class: ClassRow,
    pub date: Option<String>,
    pub total_students: i64,
    pub statistics: ClassSummaryStatistics,
    pub students: Vec<ClassSummaryStudent>,
}

/// One status per student of the class for `date` (or the newest record ever
/// when no date is given). Students without a record count toward
/// `no_record`, and the rate divides present-count by roster size — a
/// different denominator than the record-count rate used elsewhere. Both
/// conventions are intentional; do not unify them.
pub fn class_summary(
    conn: &Connection,
    class_id: i64,
    date: Option<&str>,
) -> StoreResult<ClassSummary> {
    if let Some(d) = date {
        dates::parse_date(d)?;
    }
    let class =
        store::class_by_id(conn, class_id)?.ok_or_else(|| StoreError::not_found("class"))?;

    let mut students = store::list_students(conn, Some(class_id))?;
    students.sort_by(|a, b| a.student_name_eng.cmp(&b.student_name_eng));

    let mut filter = RecordFilter::default().with_class(Some(class_id));
    filter.date = date.map(str::to_string);
    // Newest first, so the first record seen per student wins.
    let records = store::find_records(conn, &filter, RecordOrder::DateDesc, None, None)?;
    let mut by_student: std::collections::HashMap<i64, &JoinedRecord> =
        std::collections::HashMap::new();
    for rec in &records {
        by_student.entry(rec.student_id).or_insert(rec);
    }

    let mut tally = Tally::default();
    let mut no_record = 0i64;
    let rows: Vec<ClassSummaryStudent> = students
        .iter()
        .map(|s| match by_student.get(&s.student_id) {
            Some(rec) => {
                tally.add(rec.status, 1);
                ClassSummaryStudent {
                    student_id: s.student_id,
                    student_name_kh: s.student_name_kh.clone(),
                    student_name_eng: s.student_name_eng.clone(),
                    status: rec.status.code().to_string(),
                    notes: rec.notes.clone(),
                    subject_name: Some(rec.subject_name.clone()),
                }
            }
            None => {
                no_record += 1;
                ClassSummaryStudent {
                    student_id: s.student_id,
                    student_name_kh: s.student_name_kh.clone(),
                    student_name_eng: s.student_name_eng.clone(),
                    status: "NO_RECORD".to_string(),
                    notes: None,
                    subject_name: None,
                }
            }
        })
        .collect();

    let total_students = students.len() as i64;
    Ok(ClassSummary {
        class,
        date: date.map(str::to_string),
        total_students,
        statistics: ClassSummaryStatistics {
            present: tally.present,
            absent: tally.absent,
            late: tally.late,
            excused: tally.excused,
            no_record,
            attendance_rate: rate_string(tally.present, total_students, 2),
        },
        students: rows,
    })
}

// ---- monthly calendar ----

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarDay {
    pub date: String,
    /// Sunday = 0 through Saturday = 6.
    pub day_of_week: u32,
    pub present: i64,
    pub absent: i64,
    pub late: i64,
    pub excused: i64,
    pub total: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyCalendar {
    pub year: i32,
    pub month: u32,
    pub month_name: String,
    pub total_days: usize,
    pub class_id: Option<i64>,
    pub daily_statistics: Vec<CalendarDay>,
}

/// A tally for every calendar day of the month; days without records show
/// all-zero rather than being omitted.
pub fn monthly_calendar(
    conn: &Connection,
    year: i32,
    month: u32,
    class_id: Option<i64>,
) -> StoreResult<MonthlyCalendar> {
    let (start, end) = dates::month_span(year, month)?;
    let days = dates::expand_range(&start, &end)?;
    let filter = RecordFilter::between(&start, &end).with_class(class_id);
    let by_date = store::count_by_status_and_date(conn, &filter)?;

    let daily_statistics = days
        .iter()
        .map(|date| {
            let t = by_date.get(date).copied().unwrap_or_default();
            Ok(CalendarDay {
                date: date.clone(),
                day_of_week: dates::day_of_week_index(date)?,
                present: t.present,
                absent: t.absent,
                late: t.late,
                excused: t.excused,
                total: t.total(),
            })
        })
        .collect::<StoreResult<Vec<_>>>()?;

    Ok(MonthlyCalendar {
        year,
        month,
        month_name: dates::month_name(month).to_string(),
        total_days: days.len(),
        class_id,
        daily_statistics,
    })
}

// ---- at-risk students ----

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AtRiskStudent {
    pub student_id: i64,
    pub student_name_kh: String,
    pub student_name_eng: String,
    pub attendance_rate: String,
    pub days_present: i64,
    pub total_days: i64,
}

/// Students whose trailing-30-day rate (over their own records) falls below
/// 75%, ascending by rate. A student with no records in the window defaults
/// to 100% — absence of data is not penalized.
pub fn at_risk_students(
    conn: &Connection,
    class_id: Option<i64>,
    reference_date: &str,
) -> StoreResult<Vec<AtRiskStudent>> {
    let start = dates::trailing_window(reference_date, MONTH_WINDOW_DAYS)?;
    let students = store::list_students(conn, class_id)?;
    let filter = RecordFilter::between(&start, reference_date).with_class(class_id);
    let by_student = store::count_by_status_and_student(conn, &filter)?;

    let mut flagged: Vec<(f64, AtRiskStudent)> = students
        .into_iter()
        .filter_map(|s| {
            let t = by_student.get(&s.student_id).copied().unwrap_or_default();
            let rate = if t.total() > 0 {
                rate_value(t.present, t.total())
            } else {
                100.0
            };
            if rate >= AT_RISK_THRESHOLD {
                return None;
            }
            Some((
                rate,
                AtRiskStudent {
                    student_id: s.student_id,
                    student_name_kh: s.student_name_kh,
                    student_name_eng: s.student_name_eng,
                    attendance_rate: format!("{:.1}%", rate),
                    days_present: t.present,
                    total_days: t.total(),
                },
            ))
        })
        .collect();
    flagged.sort_by(|a, b| {
        a.0.partial_cmp(&b.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.1.student_id.cmp(&b.1.student_id))
    });
    Ok(flagged.into_iter().map(|(_, s)| s).collect())
}

// ---- dashboard ----

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DayStats {
    pub date: String,
    pub present: i64,
    pub absent: i64,
    pub late: i64,
    pub excused: i64,
    pub total: i64,
    pub attendance_rate: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodStats {
    pub start_date: String,
    pub end_date: String,
    pub present: i64,
    pub absent: i64,
    pub late: i64,
    pub excused: i64,
    pub total: i64,
    pub attendance_rate: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dashboard {
    pub today: DayStats,
    pub this_week: PeriodStats,
    pub this_month: PeriodStats,
    pub students_at_risk: Vec<AtRiskStudent>,
    pub recent_absences: Vec<JoinedRecord>,
    pub generated_at: String,
}

fn day_stats(conn: &Connection, date: &str, class_id: Option<i64>) -> StoreResult<DayStats> {
    let t = store::count_by_status(conn, &RecordFilter::on_date(date).with_class(class_id))?;
    Ok(DayStats {
        date: date.to_string(),
        present: t.present,
        absent: t.absent,
        late: t.late,
        excused: t.excused,
        total: t.total(),
        attendance_rate: rate_string(t.present, t.total(), 1),
    })
}

fn period_stats(
    conn: &Connection,
    start: &str,
    end: &str,
    class_id: Option<i64>,
) -> StoreResult<PeriodStats> {
    let t = store::count_by_status(conn, &RecordFilter::between(start, end).with_class(class_id))?;
    Ok(PeriodStats {
        start_date: start.to_string(),
        end_date: end.to_string(),
        present: t.present,
        absent: t.absent,
        late: t.late,
        excused: t.excused,
        total: t.total(),
        attendance_rate: rate_string(t.present, t.total(), 1),
    })
}

/// Today / trailing-week / trailing-month tallies plus at-risk detection and
/// the 10 most recent absences, all evaluated relative to one reference date.
pub fn dashboard_summary(
    conn: &Connection,
    date: Option<&str>,
    class_id: Option<i64>,
) -> StoreResult<Dashboard> {
    let target = match date {
        Some(d) => {
            dates::parse_date(d)?;
            d.to_string()
        }
        None => dates::today(),
    };
    let week_start = dates::trailing_window(&target, WEEK_WINDOW_DAYS)?;
    let month_start = dates::trailing_window(&target, MONTH_WINDOW_DAYS)?;

    let today = day_stats(conn, &target, class_id)?;
    let this_week = period_stats(conn, &week_start, &target, class_id)?;
    let this_month = period_stats(conn, &month_start, &target, class_id)?;
    let students_at_risk = at_risk_students(conn, class_id, &target)?;

    let mut absence_filter = RecordFilter::between(&week_start, &target).with_class(class_id);
    absence_filter.status = Some(Status::Absent);
    let recent_absences = store::find_records(
        conn,
        &absence_filter,
        RecordOrder::DateDesc,
        Some(RECENT_RECORD_LIMIT),
        None,
    )?;

    Ok(Dashboard {
        today,
        this_week,
        this_month,
        students_at_risk,
        recent_absences,
        generated_at: chrono::Utc::now().to_rfc3339(),
    })
}
