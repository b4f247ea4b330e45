use chrono::{Datelike, Duration, NaiveDate, Weekday};

use crate::store::StoreError;

pub const DATE_FMT: &str = "%Y-%m-%d";

pub fn parse_date(s: &str) -> Result<NaiveDate, StoreError> {
    NaiveDate::parse_from_str(s.trim(), DATE_FMT).map_err(|_| {
        StoreError::new("invalid_range", format!("invalid date: {}", s))
    })
}

/// Every calendar day from `start` to `end` inclusive, ascending.
/// Plain calendar arithmetic; no timezone is involved anywhere.
pub fn expand_range(start: &str, end: &str) -> Result<Vec<String>, StoreError> {
    let s = parse_date(start)?;
    let e = parse_date(end)?;
    if e < s {
        return Err(StoreError::new(
            "invalid_range",
            format!("end date {} precedes start date {}", end, start),
        ));
    }
    let mut days = Vec::with_capacity((e - s).num_days() as usize + 1);
    let mut d = s;
    while d <= e {
        days.push(d.format(DATE_FMT).to_string());
        d += Duration::days(1);
    }
    Ok(days)
}

/// First and last day of a calendar month, as ISO day strings.
pub fn month_span(year: i32, month: u32) -> Result<(String, String), StoreError> {
    let first = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(|| {
        StoreError::new(
            "invalid_range",
            format!("invalid year/month: {}-{}", year, month),
        )
    })?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    };
    // month was validated above, so the following month's first day exists
    let last = next.map(|d| d - Duration::days(1)).ok_or_else(|| {
        StoreError::new("invalid_range", "month arithmetic overflow")
    })?;
    Ok((
        first.format(DATE_FMT).to_string(),
        last.format(DATE_FMT).to_string(),
    ))
}

/// The day `days_back - 1` days before `end`, so [start, end] spans
/// exactly `days_back` calendar days.
pub fn trailing_window(end: &str, days_back: i64) -> Result<String, StoreError> {
    let e = parse_date(end)?;
    let s = e - Duration::days(days_back - 1);
    Ok(s.format(DATE_FMT).to_string())
}

pub fn weekday_name(date: &str) -> Result<&'static str, StoreError> {
    let d = parse_date(date)?;
    Ok(match d.weekday() {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    })
}

pub fn month_name(month: u32) -> &'static str {
    match month {
        1 => "January",
        2 => "February",
        3 => "March",
        4 => "April",
        5 => "May",
        6 => "June",
        7 => "July",
        8 => "August",
        9 => "September",
        10 => "October",
        11 => "November",
        12 => "December",
        _ => "",
    }
}

/// Sunday = 0 through Saturday = 6, the convention the calendar view uses.
pub fn day_of_week_index(date: &str) -> Result<u32, StoreError> {
    let d = parse_date(date)?;
    Ok(d.weekday().num_days_from_sunday())
}

pub fn today() -> String {
    chrono::Local::now().date_naive().format(DATE_FMT).to_string()
}
