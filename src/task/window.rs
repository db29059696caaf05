//! Task execution time windows.
//!
//! A window is a five-field expression `"WEEKDAYS MONTHS DAYS HOURS MINUTES"`
//! where each field is a comma-separated list of values or inclusive ranges,
//! e.g. `"1-5 1-12 1-31 7-9,21 0-59"` (weekdays Mon-Fri, any month/day,
//! 07:00-09:59 or 21:00-21:59).

use chrono::{DateTime, Datelike, TimeZone, Timelike};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WindowError {
    #[error("time window must have exactly 5 fields, got {0}")]
    FieldCount(usize),
    #[error("invalid range segment '{0}'")]
    BadSegment(String),
    #[error("value {value} out of bounds {min}-{max} in segment '{segment}'")]
    OutOfBounds {
        segment: String,
        value: u32,
        min: u32,
        max: u32,
    },
}

/// One field: a set of inclusive ranges.
#[derive(Debug, Clone)]
struct FieldRanges(Vec<(u32, u32)>);

impl FieldRanges {
    fn parse(field: &str, min: u32, max: u32) -> Result<Self, WindowError> {
        let mut ranges = Vec::new();
        for segment in field.split(',') {
            let segment = segment.trim();
            let (lo, hi) = match segment.split_once('-') {
                Some((lo, hi)) => (
                    lo.parse::<u32>()
                        .map_err(|_| WindowError::BadSegment(segment.to_string()))?,
                    hi.parse::<u32>()
                        .map_err(|_| WindowError::BadSegment(segment.to_string()))?,
                ),
                None => {
                    let value = segment
                        .parse::<u32>()
                        .map_err(|_| WindowError::BadSegment(segment.to_string()))?;
                    (value, value)
                }
            };
            for value in [lo, hi] {
                if value < min || value > max {
                    return Err(WindowError::OutOfBounds {
                        segment: segment.to_string(),
                        value,
                        min,
                        max,
                    });
                }
            }
            if lo > hi {
                return Err(WindowError::BadSegment(segment.to_string()));
            }
            ranges.push((lo, hi));
        }
        Ok(Self(ranges))
    }

    fn contains(&self, value: u32) -> bool {
        self.0.iter().any(|(lo, hi)| (*lo..=*hi).contains(&value))
    }
}

/// Parsed execution window checked once at task construction.
#[derive(Debug, Clone)]
pub struct TimeWindow {
    weekdays: FieldRanges,
    months: FieldRanges,
    days: FieldRanges,
    hours: FieldRanges,
    minutes: FieldRanges,
}

impl TimeWindow {
    pub fn parse(expression: &str) -> Result<Self, WindowError> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(WindowError::FieldCount(fields.len()));
        }
        Ok(Self {
            weekdays: FieldRanges::parse(fields[0], 1, 7)?,
            months: FieldRanges::parse(fields[1], 1, 12)?,
            days: FieldRanges::parse(fields[2], 1, 31)?,
            hours: FieldRanges::parse(fields[3], 0, 23)?,
            minutes: FieldRanges::parse(fields[4], 0, 59)?,
        })
    }

    /// Whether the given instant falls inside the window. Weekdays are
    /// numbered from Monday = 1.
    pub fn contains<Tz: TimeZone>(&self, at: &DateTime<Tz>) -> bool {
        self.weekdays.contains(at.weekday().number_from_monday())
            && self.months.contains(at.month())
            && self.days.contains(at.day())
            && self.hours.contains(at.hour())
            && self.minutes.contains(at.minute())
    }
}
