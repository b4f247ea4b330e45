use rusqlite::Connection;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use crate::dates;
use crate::store::{
    self, ClassRow, JoinedRecord, RecordFilter, RecordOrder, StoreError, StoreResult, SubjectRef,
};
use crate::tally::{rate_string, Status, Tally};

pub const DEFAULT_PAGE: i64 = 1;
pub const DEFAULT_LIMIT: i64 = 50;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GridPeriod {
    pub start_date: String,
    pub end_date: String,
    pub dates: Vec<String>,
    pub total_days: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub total: i64,
    pub page: i64,
    pub limit: i64,
    pub total_pages: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEntry {
    pub session: String,
    pub status: Status,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectCell {
    pub subject_id: i64,
    pub entries: Vec<SessionEntry>,
}

#[derive(Debug, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DaySummary {
    pub present: i64,
    pub absent: i64,
    pub late: i64,
    pub excused: i64,
    pub total: i64,
}

impl From<Tally> for DaySummary {
    fn from(t: Tally) -> Self {
        DaySummary {
            present: t.present,
            absent: t.absent,
            late: t.late,
            excused: t.excused,
            total: t.total(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DayCell {
    pub subjects: Vec<SubjectCell>,
    pub summary: DaySummary,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowStatistics {
    pub present: i64,
    pub absent: i64,
    pub late: i64,
    pub excused: i64,
    pub total_records: i64,
    pub attendance_rate: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GridRow {
    pub row_number: i64,
    pub student_id: i64,
    pub student_name_kh: String,
    pub student_name_eng: String,
    pub gender: Option<String>,
    pub attendance: BTreeMap<String, DayCell>,
    pub statistics: RowStatistics,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectDayStats {
    pub subject_name: String,
    pub present: i64,
    pub absent: i64,
    pub late: i64,
    pub excused: i64,
    pub total: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyStats {
    pub by_subject: BTreeMap<i64, SubjectDayStats>,
    pub total: DaySummary,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverallStats {
    pub total_students: i64,
    pub total_days: usize,
    pub total_subjects: usize,
    pub present: i64,
    pub absent: i64,
    pub late: i64,
    pub excused: i64,
    pub total_records: i64,
    pub attendance_rate: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeeklyGrid {
    pub class: ClassRow,
    pub period: GridPeriod,
    pub subjects: Vec<SubjectRef>,
    pub students: Vec<GridRow>,
    pub daily_statistics: BTreeMap<String, DailyStats>,
    pub overall_statistics: OverallStats,
    pub pagination: Pagination,
}

/// Free-form weekly grid: one paginated, searchable roster page crossed with
/// every day of the range, subject detail per cell. Subjects are whatever
/// actually has attendance in the period; daily and overall roll-ups cover
/// the whole class so they do not shift between pages.
pub fn weekly_grid(
    conn: &Connection,
    class_id: i64,
    start: &str,
    end: &str,
    page: i64,
    limit: i64,
    search: Option<&str>,
) -> StoreResult<WeeklyGrid> {
    let day_axis = dates::expand_range(start, end)?;
    let class =
        store::class_by_id(conn, class_id)?.ok_or_else(|| StoreError::not_found("class"))?;

    let page = page.max(1);
    let limit = limit.max(0);
    let offset = (page - 1) * limit;
    let (total_students, students) = store::student_page(conn, class_id, search, limit, offset)?;

    let subjects = store::subjects_in_period(conn, class_id, start, end)?;

    let class_filter = RecordFilter::between(start, end).with_class(Some(class_id));
    let mut page_filter = class_filter.clone();
    page_filter.student_ids = Some(students.iter().map(|s| s.student_id).collect());
    let records = store::find_records(conn, &page_filter, RecordOrder::DateSubjectAsc, None, None)?;

    // (student, date) -> records, in stable date/subject order
    let mut cell_records: HashMap<(i64, &str), Vec<&JoinedRecord>> = HashMap::new();
    for rec in &records {
        cell_records
            .entry((rec.student_id, rec.attendance_date.as_str()))
            .or_default()
            .push(rec);
    }

    let rows = students
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let mut attendance: BTreeMap<String, DayCell> = BTreeMap::new();
            let mut row_tally = Tally::default();
            for date in &day_axis {
                let day_records = cell_records
                    .get(&(s.student_id, date.as_str()))
                    .map(Vec::as_slice)
                    .unwrap_or(&[]);
                let mut by_subject: BTreeMap<i64, Vec<SessionEntry>> = BTreeMap::new();
                let mut day_tally = Tally::default();
                for rec in day_records {
                    by_subject.entry(rec.subject_id).or_default().push(SessionEntry {
                        session: rec.session.clone(),
                        status: rec.status,
                        notes: rec.notes.clone(),
                    });
                    day_tally.add(rec.status, 1);
                    row_tally.add(rec.status, 1);
                }
                attendance.insert(
                    date.clone(),
                    DayCell {
                        subjects: by_subject
                            .into_iter()
                            .map(|(subject_id, entries)| SubjectCell {
                                subject_id,
                                entries,
                            })
                            .collect(),
                        summary: day_tally.into(),
                    },
                );
            }
            GridRow {
                row_number: offset + i as i64 + 1,
                student_id: s.student_id,
                student_name_kh: s.student_name_kh.clone(),
                student_name_eng: s.student_name_eng.clone(),
                gender: s.gender.clone(),
                attendance,
                statistics: RowStatistics {
                    present: row_tally.present,
                    absent: row_tally.absent,
                    late: row_tally.late,
                    excused: row_tally.excused,
                    total_records: row_tally.total(),
                    attendance_rate: rate_string(row_tally.present, row_tally.total(), 1),
                },
            }
        })
        .collect();

    // Class-wide roll-ups from the grouped-count queries.
    let day_totals = store::count_by_status_and_date(conn, &class_filter)?;
    let subject_day_counts = store::count_by_status_and_subject(conn, &class_filter)?;
    let mut daily_statistics: BTreeMap<String, DailyStats> = day_axis
        .iter()
        .map(|date| {
            let t = day_totals.get(date).copied().unwrap_or_default();
            (
                date.clone(),
                DailyStats {
                    by_subject: BTreeMap::new(),
                    total: t.into(),
                },
            )
        })
        .collect();
    for c in subject_day_counts {
        let Some(day) = daily_statistics.get_mut(&c.date) else {
            continue;
        };
        let entry = day
            .by_subject
            .entry(c.subject_id)
            .or_insert_with(|| SubjectDayStats {
                subject_name: c.subject_name.clone(),
                present: 0,
                absent: 0,
                late: 0,
                excused: 0,
                total: 0,
            });
        match c.status {
            Status::Present => entry.present += c.count,
            Status::Absent => entry.absent += c.count,
            Status::Late => entry.late += c.count,
            Status::Excused => entry.excused += c.count,
        }
        entry.total += c.count;
    }

    let overall = store::count_by_status(conn, &class_filter)?;
    let total_pages = if limit > 0 {
        (total_students + limit - 1) / limit
    } else {
        0
    };
    let overall_statistics = OverallStats {
        total_students,
        total_days: day_axis.len(),
        total_subjects: subjects.len(),
        present: overall.present,
        absent: overall.absent,
        late: overall.late,
        excused: overall.excused,
        total_records: overall.total(),
        attendance_rate: rate_string(overall.present, overall.total(), 1),
    };

    Ok(WeeklyGrid {
        class,
        period: GridPeriod {
            start_date: start.to_string(),
            end_date: end.to_string(),
            total_days: day_axis.len(),
            dates: day_axis,
        },
        subjects,
        students: rows,
        daily_statistics,
        overall_statistics,
        pagination: Pagination {
            total: total_students,
            page,
            limit,
            total_pages,
        },
    })
}

// ---- schedule-anchored variant ----

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleSubject {
    pub subject_id: i64,
    pub subject_name: String,
    pub session: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DaySchedule {
    pub day_of_week: String,
    pub subjects: Vec<ScheduleSubject>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleCell {
    pub subject_id: i64,
    pub subject_name: String,
    pub session: String,
    /// None when the student has no record for this offered slot.
    pub status: Option<Status>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleDayCell {
    pub subjects: Vec<ScheduleCell>,
    pub summary: DaySummary,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRow {
    pub row_number: i64,
    pub student_id: i64,
    pub student_name_kh: String,
    pub student_name_eng: String,
    pub gender: Option<String>,
    pub attendance: BTreeMap<String, ScheduleDayCell>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleGrid {
    pub class: ClassRow,
    pub period: GridPeriod,
    pub schedule: BTreeMap<String, DaySchedule>,
    pub students: Vec<ScheduleRow>,
}

/// Schedule-anchored grid: the (subject, session) set offered per date is
/// discovered from the records present, then every student of the class gets
/// an explicit cell per offering — status None where nothing was recorded.
pub fn weekly_grid_by_schedule(
    conn: &Connection,
    class_id: i64,
    start: &str,
    end: &str,
) -> StoreResult<ScheduleGrid> {
    let day_axis = dates::expand_range(start, end)?;
    let class =
        store::class_by_id(conn, class_id)?.ok_or_else(|| StoreError::not_found("class"))?;

    let students = store::list_students(conn, Some(class_id))?;
    let filter = RecordFilter::between(start, end).with_class(Some(class_id));
    let records = store::find_records(conn, &filter, RecordOrder::DateSubjectAsc, None, None)?;

    let mut schedule: BTreeMap<String, DaySchedule> = BTreeMap::new();
    for date in &day_axis {
        schedule.insert(
            date.clone(),
            DaySchedule {
                day_of_week: dates::weekday_name(date)?.to_string(),
                subjects: Vec::new(),
            },
        );
    }
    for rec in &records {
        let Some(day) = schedule.get_mut(&rec.attendance_date) else {
            continue;
        };
        if !day.subjects.iter().any(|s| s.subject_id == rec.subject_id) {
            day.subjects.push(ScheduleSubject {
                subject_id: rec.subject_id,
                subject_name: rec.subject_name.clone(),
                session: rec.session.clone(),
            });
        }
    }

    // (student, date, subject) -> record, first (earliest) wins
    let mut by_slot: HashMap<(i64, &str, i64), &JoinedRecord> = HashMap::new();
    for rec in &records {
        by_slot
            .entry((rec.student_id, rec.attendance_date.as_str(), rec.subject_id))
            .or_insert(rec);
    }

    let rows = students
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let mut attendance: BTreeMap<String, ScheduleDayCell> = BTreeMap::new();
            for date in &day_axis {
                let offered = &schedule[date].subjects;
                let mut day_tally = Tally::default();
                let subjects = offered
                    .iter()
                    .map(|slot| {
                        let rec =
                            by_slot.get(&(s.student_id, date.as_str(), slot.subject_id));
                        if let Some(r) = rec {
                            day_tally.add(r.status, 1);
                        }
                        ScheduleCell {
                            subject_id: slot.subject_id,
                            subject_name: slot.subject_name.clone(),
                            session: slot.session.clone(),
                            status: rec.map(|r| r.status),
                            notes: rec.and_then(|r| r.notes.clone()),
                        }
                    })
                    .collect();
                attendance.insert(
                    date.clone(),
                    ScheduleDayCell {
                        subjects,
                        summary: day_tally.into(),
                    },
                );
            }
            ScheduleRow {
                row_number: i as i64 + 1,
                student_id: s.student_id,
                student_name_kh: s.student_name_kh.clone(),
                student_name_eng: s.student_name_eng.clone(),
                gender: s.gender.clone(),
                attendance,
            }
        })
        .collect();

    Ok(ScheduleGrid {
        class,
        period: GridPeriod {
            start_date: start.to_string(),
            end_date: end.to_string(),
            total_days: day_axis.len(),
            dates: day_axis,
        },
        schedule,
        students: rows,
    })
}
