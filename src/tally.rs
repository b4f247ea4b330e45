use serde::Serialize;

/// Closed attendance status set. Anything else coming out of the store is a
/// construction-time error, never a silent miscount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Present,
    Absent,
    Late,
    Excused,
}

impl Status {
    pub fn parse(code: &str) -> Option<Status> {
        match code {
            "P" => Some(Status::Present),
            "A" => Some(Status::Absent),
            "L" => Some(Status::Late),
            "E" => Some(Status::Excused),
            _ => None,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Status::Present => "P",
            Status::Absent => "A",
            Status::Late => "L",
            Status::Excused => "E",
        }
    }
}

impl Serialize for Status {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.code())
    }
}

/// Derived counts over a filtered record set. Never persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub present: i64,
    pub absent: i64,
    pub late: i64,
    pub excused: i64,
}

impl Tally {
    pub fn add(&mut self, status: Status, count: i64) {
        match status {
            Status::Present => self.present += count,
            Status::Absent => self.absent += count,
            Status::Late => self.late += count,
            Status::Excused => self.excused += count,
        }
    }

    /// Folds (status-code, count) pairs; unknown codes are ignored so they
    /// never leak into the rate denominator.
    pub fn from_counts<'a, I>(counts: I) -> Tally
    where
        I: IntoIterator<Item = (&'a str, i64)>,
    {
        let mut t = Tally::default();
        for (code, count) in counts {
            if let Some(status) = Status::parse(code) {
                t.add(status, count);
            }
        }
        t
    }

    pub fn total(&self) -> i64 {
        self.present + self.absent + self.late + self.excused
    }

    /// Present-only rate over this tally's own total.
    pub fn rate(&self) -> f64 {
        rate_value(self.present, self.total())
    }

    pub fn statistics(&self, decimals: usize) -> Statistics {
        Statistics {
            total: self.total(),
            present: self.present,
            absent: self.absent,
            late: self.late,
            excused: self.excused,
            attendance_rate: rate_string(self.present, self.total(), decimals),
        }
    }
}

pub fn rate_value(present: i64, total: i64) -> f64 {
    if total > 0 {
        present as f64 / total as f64 * 100.0
    } else {
        0.0
    }
}

/// Rendered rate with a trailing "%", or "0%" when there is nothing to rate.
pub fn rate_string(present: i64, total: i64, decimals: usize) -> String {
    if total > 0 {
        format!("{:.*}%", decimals, rate_value(present, total))
    } else {
        "0%".to_string()
    }
}

/// The statistics block every report carries.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    pub total: i64,
    pub present: i64,
    pub absent: i64,
    pub late: i64,
    pub excused: i64,
    pub attendance_rate: String,
}
